use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use log::info;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::MarketError;
use crate::links::normalize_phone;
use crate::messages::ServerMessage;
use crate::models::{Identity, Listing, ListingId, ProductType};
use crate::notify::Dispatcher;
use crate::store::ListingStore;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewListing {
    pub product_type: ProductType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price_per_unit: Decimal,
    #[serde(default)]
    pub extra_charge: Option<Decimal>,
    pub quantity: Decimal,
    pub location_text: String,
    #[serde(default)]
    pub live_location_url: Option<String>,
    #[serde(default)]
    pub available_date: Option<NaiveDate>,
    #[serde(default)]
    pub seller_phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
    pub price_per_unit: Decimal,
    #[serde(default)]
    pub extra_charge: Option<Decimal>,
}

#[derive(Clone)]
pub struct ListingService {
    listings: Arc<dyn ListingStore>,
    dispatcher: Dispatcher,
}

impl ListingService {
    pub fn new(listings: Arc<dyn ListingStore>, dispatcher: Dispatcher) -> Self {
        Self {
            listings,
            dispatcher,
        }
    }

    /// Stores a new active listing and tells every connected client about it.
    pub async fn create(&self, seller: &Identity, draft: NewListing) -> Result<Listing, MarketError> {
        require_seller(seller)?;

        let title = draft.title.trim().to_string();
        if title.is_empty() {
            return Err(MarketError::validation("Title is required"));
        }
        let location_text = draft.location_text.trim().to_string();
        if location_text.is_empty() {
            return Err(MarketError::validation("Location is required"));
        }
        validate_prices(draft.price_per_unit, draft.extra_charge)?;
        validate_quantity(draft.quantity)?;

        let seller_phone = draft
            .seller_phone
            .filter(|phone| normalize_phone(Some(phone.as_str())).is_some())
            .or_else(|| {
                seller
                    .phone
                    .clone()
                    .filter(|phone| normalize_phone(Some(phone.as_str())).is_some())
            })
            .ok_or_else(|| MarketError::validation("Seller phone is required"))?;

        let listing = self
            .listings
            .insert_listing(Listing {
                id: ListingId::generate(),
                seller_id: seller.id.clone(),
                product_type: draft.product_type,
                title,
                description: draft.description,
                price_per_unit: draft.price_per_unit,
                extra_charge: draft.extra_charge,
                quantity: draft.quantity,
                location_text,
                live_location_url: draft.live_location_url,
                available_date: draft.available_date,
                seller_phone,
                active: true,
                created_at: Utc::now(),
            })
            .await?;

        info!("Listing {} created by {}", listing.id, seller.id);

        self.dispatcher.broadcast(ServerMessage::NewListing {
            message: format!("New {} listed: {}", product_label(listing.product_type), listing.title),
            listing: Box::new(listing.clone()),
        });

        Ok(listing)
    }

    pub async fn active(&self, limit: usize) -> Result<Vec<Listing>, MarketError> {
        Ok(self.listings.active_listings(limit).await?)
    }

    pub async fn mine(&self, seller: &Identity) -> Result<Vec<Listing>, MarketError> {
        require_seller(seller)?;
        Ok(self.listings.listings_by_seller(&seller.id).await?)
    }

    pub async fn toggle(&self, seller: &Identity, id: &ListingId) -> Result<Listing, MarketError> {
        let mut listing = self.owned(seller, id).await?;
        listing.active = !listing.active;
        self.save(listing).await
    }

    /// Reprices a listing. Orders already placed keep their own snapshot.
    pub async fn reprice(
        &self,
        seller: &Identity,
        id: &ListingId,
        change: PriceChange,
    ) -> Result<Listing, MarketError> {
        validate_prices(change.price_per_unit, change.extra_charge)?;
        let mut listing = self.owned(seller, id).await?;
        listing.price_per_unit = change.price_per_unit;
        listing.extra_charge = change.extra_charge;
        self.save(listing).await
    }

    pub async fn delete(&self, seller: &Identity, id: &ListingId) -> Result<(), MarketError> {
        self.owned(seller, id).await?;
        if !self.listings.delete_listing(id).await? {
            return Err(MarketError::not_found("Listing not found"));
        }
        info!("Listing {id} deleted by {}", seller.id);
        Ok(())
    }

    async fn owned(&self, seller: &Identity, id: &ListingId) -> Result<Listing, MarketError> {
        require_seller(seller)?;
        self.listings
            .find_listing(id)
            .await?
            .filter(|listing| listing.seller_id == seller.id)
            .ok_or_else(|| MarketError::not_found("Listing not found"))
    }

    async fn save(&self, listing: Listing) -> Result<Listing, MarketError> {
        if self.listings.update_listing(listing.clone()).await? {
            Ok(listing)
        } else {
            Err(MarketError::not_found("Listing not found"))
        }
    }
}

fn require_seller(identity: &Identity) -> Result<(), MarketError> {
    if identity.is_seller() {
        Ok(())
    } else {
        Err(MarketError::forbidden("Seller access only"))
    }
}

pub(crate) fn validate_prices(price_per_unit: Decimal, extra_charge: Option<Decimal>) -> Result<(), MarketError> {
    if price_per_unit <= Decimal::ZERO {
        return Err(MarketError::validation("Price must be greater than 0"));
    }
    if extra_charge.is_some_and(|extra| extra < Decimal::ZERO) {
        return Err(MarketError::validation("Extra charge cannot be negative"));
    }
    Ok(())
}

pub(crate) fn validate_quantity(quantity: Decimal) -> Result<(), MarketError> {
    if quantity < Decimal::ZERO {
        return Err(MarketError::validation("Quantity cannot be negative"));
    }
    Ok(())
}

fn product_label(product_type: ProductType) -> &'static str {
    match product_type {
        ProductType::Vegetable => "vegetable",
        ProductType::Fruit => "fruit",
    }
}
