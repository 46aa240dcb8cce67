use std::sync::Arc;

use chrono::Utc;
use log::info;

use crate::error::MarketError;
use crate::messages::ServerMessage;
use crate::models::{Comment, CommentId, Identity, ListingId};
use crate::notify::Dispatcher;
use crate::store::{CommentStore, ListingStore};

#[derive(Clone)]
pub struct CommentService {
    comments: Arc<dyn CommentStore>,
    listings: Arc<dyn ListingStore>,
    dispatcher: Dispatcher,
}

impl CommentService {
    pub fn new(
        comments: Arc<dyn CommentStore>,
        listings: Arc<dyn ListingStore>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            comments,
            listings,
            dispatcher,
        }
    }

    /// Posts a comment and alerts the listing's seller, unless the seller wrote it.
    pub async fn add(
        &self,
        author: &Identity,
        listing_id: &ListingId,
        text: &str,
    ) -> Result<Comment, MarketError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MarketError::validation("Comment text is required"));
        }

        let listing = self
            .listings
            .find_listing(listing_id)
            .await?
            .ok_or_else(|| MarketError::not_found("Listing not found"))?;

        let comment = self
            .comments
            .insert_comment(Comment {
                id: CommentId::generate(),
                listing_id: listing.id.clone(),
                author_id: author.id.clone(),
                author_name: author.name.clone(),
                text: text.to_string(),
                seller_reply: None,
                created_at: Utc::now(),
                replied_at: None,
            })
            .await?;

        info!("Comment {} on listing {} by {}", comment.id, listing.id, author.id);

        if listing.seller_id != author.id {
            self.dispatcher.notify_user(
                listing.seller_id,
                ServerMessage::alert(format!(
                    "{} commented on {}: {}",
                    author.name, listing.title, comment.text
                )),
            );
        }

        Ok(comment)
    }

    pub async fn for_listing(&self, listing_id: &ListingId) -> Result<Vec<Comment>, MarketError> {
        Ok(self.comments.comments_for_listing(listing_id).await?)
    }

    /// Stores the seller's reply and alerts the comment's author.
    pub async fn reply(
        &self,
        seller: &Identity,
        comment_id: &CommentId,
        reply: &str,
    ) -> Result<Comment, MarketError> {
        if !seller.is_seller() {
            return Err(MarketError::forbidden("Seller access only"));
        }

        let reply = reply.trim();
        if reply.is_empty() {
            return Err(MarketError::validation("Reply text is required"));
        }

        let mut comment = self
            .comments
            .find_comment(comment_id)
            .await?
            .ok_or_else(|| MarketError::not_found("Comment not found"))?;

        let listing = self
            .listings
            .find_listing(&comment.listing_id)
            .await?
            .ok_or_else(|| MarketError::not_found("Listing not found"))?;

        if listing.seller_id != seller.id {
            return Err(MarketError::forbidden("Not authorized to reply"));
        }

        comment.seller_reply = Some(reply.to_string());
        comment.replied_at = Some(Utc::now());

        if !self.comments.update_comment(comment.clone()).await? {
            return Err(MarketError::not_found("Comment not found"));
        }

        info!("Seller {} replied to comment {}", seller.id, comment.id);

        self.dispatcher.notify_user(
            comment.author_id.clone(),
            ServerMessage::alert(format!(
                "{} replied to your comment on {}: {reply}",
                seller.name, listing.title
            )),
        );

        Ok(comment)
    }
}
