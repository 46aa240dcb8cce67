use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{
    Comment, CommentId, Identity, Listing, ListingId, Order, OrderId, UserId,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record {0} already exists")]
    Duplicate(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn find_listing(&self, id: &ListingId) -> Result<Option<Listing>, StoreError>;

    async fn insert_listing(&self, listing: Listing) -> Result<Listing, StoreError>;

    /// Replaces a stored listing. Returns false if it no longer exists.
    async fn update_listing(&self, listing: Listing) -> Result<bool, StoreError>;

    async fn delete_listing(&self, id: &ListingId) -> Result<bool, StoreError>;

    /// Active listings, newest first.
    async fn active_listings(&self, limit: usize) -> Result<Vec<Listing>, StoreError>;

    /// All listings of one seller, newest first.
    async fn listings_by_seller(&self, seller: &UserId) -> Result<Vec<Listing>, StoreError>;
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn find_identity(&self, id: &UserId) -> Result<Option<Identity>, StoreError>;

    async fn insert_identity(&self, identity: Identity) -> Result<(), StoreError>;
}

/// Append-only: orders are inserted once and never rewritten here.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    async fn insert_order(&self, order: Order) -> Result<Order, StoreError>;

    async fn find_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;

    async fn orders_for_buyer(&self, buyer: &UserId) -> Result<Vec<Order>, StoreError>;

    async fn orders_for_seller(&self, seller: &UserId) -> Result<Vec<Order>, StoreError>;
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn insert_comment(&self, comment: Comment) -> Result<Comment, StoreError>;

    async fn find_comment(&self, id: &CommentId) -> Result<Option<Comment>, StoreError>;

    async fn update_comment(&self, comment: Comment) -> Result<bool, StoreError>;

    /// Comments on one listing, oldest first.
    async fn comments_for_listing(&self, listing: &ListingId) -> Result<Vec<Comment>, StoreError>;
}

/// Process-local storage for every collection.
#[derive(Default)]
pub struct MemoryStore {
    identities: RwLock<HashMap<UserId, Identity>>,
    listings: RwLock<HashMap<ListingId, Listing>>,
    orders: RwLock<HashMap<OrderId, Order>>,
    comments: RwLock<HashMap<CommentId, Comment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn find_listing(&self, id: &ListingId) -> Result<Option<Listing>, StoreError> {
        let listings = self.listings.read().await;
        Ok(listings.get(id).cloned())
    }

    async fn insert_listing(&self, listing: Listing) -> Result<Listing, StoreError> {
        let mut listings = self.listings.write().await;
        if listings.contains_key(&listing.id) {
            return Err(StoreError::Duplicate(listing.id.to_string()));
        }
        listings.insert(listing.id.clone(), listing.clone());
        Ok(listing)
    }

    async fn update_listing(&self, listing: Listing) -> Result<bool, StoreError> {
        let mut listings = self.listings.write().await;
        match listings.get_mut(&listing.id) {
            Some(stored) => {
                *stored = listing;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_listing(&self, id: &ListingId) -> Result<bool, StoreError> {
        let mut listings = self.listings.write().await;
        Ok(listings.remove(id).is_some())
    }

    async fn active_listings(&self, limit: usize) -> Result<Vec<Listing>, StoreError> {
        let listings = self.listings.read().await;
        let mut active: Vec<Listing> = listings
            .values()
            .filter(|listing| listing.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        active.truncate(limit);
        Ok(active)
    }

    async fn listings_by_seller(&self, seller: &UserId) -> Result<Vec<Listing>, StoreError> {
        let listings = self.listings.read().await;
        let mut owned: Vec<Listing> = listings
            .values()
            .filter(|listing| &listing.seller_id == seller)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }
}

#[async_trait]
impl IdentityDirectory for MemoryStore {
    async fn find_identity(&self, id: &UserId) -> Result<Option<Identity>, StoreError> {
        let identities = self.identities.read().await;
        Ok(identities.get(id).cloned())
    }

    async fn insert_identity(&self, identity: Identity) -> Result<(), StoreError> {
        let mut identities = self.identities.write().await;
        if identities.contains_key(&identity.id) {
            return Err(StoreError::Duplicate(identity.id.to_string()));
        }
        identities.insert(identity.id.clone(), identity);
        Ok(())
    }
}

#[async_trait]
impl OrderLedger for MemoryStore {
    async fn insert_order(&self, order: Order) -> Result<Order, StoreError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(StoreError::Duplicate(order.id.to_string()));
        }
        orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn find_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.read().await;
        Ok(orders.get(id).cloned())
    }

    async fn orders_for_buyer(&self, buyer: &UserId) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.read().await;
        Ok(newest_first(orders.values().filter(|order| &order.buyer_id == buyer)))
    }

    async fn orders_for_seller(&self, seller: &UserId) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.read().await;
        Ok(newest_first(orders.values().filter(|order| &order.seller_id == seller)))
    }
}

fn newest_first<'a>(orders: impl Iterator<Item = &'a Order>) -> Vec<Order> {
    let mut orders: Vec<Order> = orders.cloned().collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    orders
}

#[async_trait]
impl CommentStore for MemoryStore {
    async fn insert_comment(&self, comment: Comment) -> Result<Comment, StoreError> {
        let mut comments = self.comments.write().await;
        if comments.contains_key(&comment.id) {
            return Err(StoreError::Duplicate(comment.id.to_string()));
        }
        comments.insert(comment.id.clone(), comment.clone());
        Ok(comment)
    }

    async fn find_comment(&self, id: &CommentId) -> Result<Option<Comment>, StoreError> {
        let comments = self.comments.read().await;
        Ok(comments.get(id).cloned())
    }

    async fn update_comment(&self, comment: Comment) -> Result<bool, StoreError> {
        let mut comments = self.comments.write().await;
        match comments.get_mut(&comment.id) {
            Some(stored) => {
                *stored = comment;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn comments_for_listing(&self, listing: &ListingId) -> Result<Vec<Comment>, StoreError> {
        let comments = self.comments.read().await;
        let mut thread: Vec<Comment> = comments
            .values()
            .filter(|comment| &comment.listing_id == listing)
            .cloned()
            .collect();
        thread.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(thread)
    }
}
