use std::path::Path;

use log::info;
use serde::Deserialize;
use thiserror::Error;

use crate::error::MarketError;
use crate::listings::{validate_prices, validate_quantity};
use crate::models::{Identity, Listing, ListingId};
use crate::store::{IdentityDirectory, ListingStore, StoreError};

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Failed to read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse seed file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Failed to store seed record: {0}")]
    Store(#[from] StoreError),
    #[error("Invalid seeded listing {id}: {source}")]
    Listing { id: ListingId, source: MarketError },
}

#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub identities: Vec<Identity>,
    #[serde(default)]
    pub listings: Vec<Listing>,
}

impl Seed {
    pub async fn from_file(path: &Path) -> Result<Self, SeedError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Loads every record. Listings are checked against the same rules as
    /// listings created over the API before anything is stored; the first
    /// invalid listing, duplicate or storage failure aborts.
    pub async fn apply<S>(self, store: &S) -> Result<(), SeedError>
    where
        S: IdentityDirectory + ListingStore,
    {
        let (identities, listings) = (self.identities.len(), self.listings.len());

        for listing in &self.listings {
            validate_prices(listing.price_per_unit, listing.extra_charge)
                .and_then(|()| validate_quantity(listing.quantity))
                .map_err(|source| SeedError::Listing {
                    id: listing.id.clone(),
                    source,
                })?;
        }

        for identity in self.identities {
            store.insert_identity(identity).await?;
        }
        for listing in self.listings {
            store.insert_listing(listing).await?;
        }

        info!("Seeded {identities} identities and {listings} listings");
        Ok(())
    }
}
