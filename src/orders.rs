//! Order placement.
//!
//! An order prices itself from the listing as it is read, stores those
//! numbers on the order and never looks at the listing again. Stock is not
//! reserved or decremented: concurrent buyers may all order against the same
//! advertised quantity.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::error::MarketError;
use crate::links::{mailto_link, messaging_link};
use crate::messages::ServerMessage;
use crate::models::{coerce_quantity, Identity, ListingId, Order, OrderId, OrderStatus, UserId};
use crate::notify::Dispatcher;
use crate::store::{IdentityDirectory, ListingStore, OrderLedger};

/// What the buyer gets back: the stored order plus ready-made texts and links.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order: Order,
    pub buyer_message: String,
    pub seller_message: String,
    pub buyer_whats_app: Option<String>,
    pub seller_whats_app: Option<String>,
    pub buyer_email: Option<String>,
    pub seller_email: Option<String>,
}

#[derive(Clone)]
pub struct OrderService {
    listings: Arc<dyn ListingStore>,
    identities: Arc<dyn IdentityDirectory>,
    ledger: Arc<dyn OrderLedger>,
    dispatcher: Dispatcher,
    messaging_link_base: String,
}

impl OrderService {
    pub fn new(
        listings: Arc<dyn ListingStore>,
        identities: Arc<dyn IdentityDirectory>,
        ledger: Arc<dyn OrderLedger>,
        dispatcher: Dispatcher,
        messaging_link_base: String,
    ) -> Self {
        Self {
            listings,
            identities,
            ledger,
            dispatcher,
            messaging_link_base,
        }
    }

    pub async fn place_order(
        &self,
        buyer_id: &UserId,
        listing_id: &ListingId,
        quantity: &Value,
    ) -> Result<OrderReceipt, MarketError> {
        let listing = match self.listings.find_listing(listing_id).await? {
            Some(listing) if listing.active => listing,
            Some(_) => {
                warn!("Order against inactive listing {listing_id} by {buyer_id}");
                return Err(MarketError::conflict("Listing not available"));
            }
            None => {
                warn!("Order against unknown listing {listing_id} by {buyer_id}");
                return Err(MarketError::conflict("Listing not available"));
            }
        };

        let buyer = self
            .identities
            .find_identity(buyer_id)
            .await?
            .ok_or_else(|| MarketError::not_found("Buyer not found"))?;

        let quantity = coerce_quantity(quantity)
            .filter(|quantity| *quantity > Decimal::ZERO)
            .ok_or_else(|| MarketError::validation("Quantity must be greater than 0"))?;

        let price_per_unit = listing.price_per_unit;
        let extra_charge = listing.extra_charge;
        let total_price = order_total(price_per_unit, extra_charge, quantity)
            .ok_or_else(|| MarketError::validation("Quantity is too large"))?;

        // Missing seller record only costs us the seller's email link.
        let seller = self.identities.find_identity(&listing.seller_id).await?;
        let seller_phone = Some(listing.seller_phone.trim())
            .filter(|phone| !phone.is_empty())
            .map(String::from)
            .or_else(|| seller.as_ref().and_then(|seller| seller.phone.clone()));

        let order = self
            .ledger
            .insert_order(Order {
                id: OrderId::generate(),
                buyer_id: buyer.id.clone(),
                seller_id: listing.seller_id.clone(),
                listing_id: listing.id.clone(),
                listing_title: listing.title.clone(),
                quantity,
                price_per_unit_snapshot: price_per_unit,
                extra_charge_snapshot: extra_charge,
                total_price,
                buyer_name: buyer.name.clone(),
                buyer_phone: buyer.phone.clone(),
                buyer_email: buyer.email.clone(),
                seller_phone: seller_phone.clone(),
                status: OrderStatus::Confirmed,
                created_at: Utc::now(),
            })
            .await?;

        info!(
            "Order {} placed: {} x {} for {} by {}",
            order.id, order.quantity, order.listing_id, order.total_price, order.buyer_id
        );

        let buyer_message = buyer_message(&order);
        let seller_message = seller_message(&order, &buyer);

        self.dispatcher.notify_user(
            order.seller_id.clone(),
            ServerMessage::alert(seller_message.clone()),
        );

        let base = &self.messaging_link_base;
        Ok(OrderReceipt {
            buyer_whats_app: messaging_link(base, buyer.phone.as_deref(), &buyer_message),
            seller_whats_app: messaging_link(base, seller_phone.as_deref(), &seller_message),
            buyer_email: mailto_link(buyer.email.as_deref(), "Order Confirmation", &buyer_message),
            seller_email: mailto_link(
                seller.as_ref().and_then(|seller| seller.email.as_deref()),
                "New Order Received",
                &seller_message,
            ),
            order,
            buyer_message,
            seller_message,
        })
    }

    /// Sellers see orders placed with them; everyone else sees their purchases.
    pub async fn orders_for(&self, caller: &Identity) -> Result<Vec<Order>, MarketError> {
        let orders = if caller.is_seller() {
            self.ledger.orders_for_seller(&caller.id).await?
        } else {
            self.ledger.orders_for_buyer(&caller.id).await?
        };
        Ok(orders)
    }
}

/// `None` when the total does not fit in a `Decimal`.
pub fn order_total(
    price_per_unit: Decimal,
    extra_charge: Option<Decimal>,
    quantity: Decimal,
) -> Option<Decimal> {
    price_per_unit
        .checked_mul(quantity)?
        .checked_add(extra_charge.unwrap_or(Decimal::ZERO))
}

fn buyer_message(order: &Order) -> String {
    format!(
        "Order confirmed\nProduct: {}\nPrice per kg: {}\nQuantity: {} kg\nTotal: {}",
        order.listing_title,
        order.price_per_unit_snapshot.normalize(),
        order.quantity.normalize(),
        order.total_price.normalize()
    )
}

fn seller_message(order: &Order, buyer: &Identity) -> String {
    format!(
        "New order received\nProduct: {}\nBuyer: {} ({})\nQuantity: {} kg\nTotal: {}",
        order.listing_title,
        buyer.name,
        buyer.contact(),
        order.quantity.normalize(),
        order.total_price.normalize()
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::models::{Listing, ProductType, Role};
    use crate::notify::Notifier;
    use crate::room::ConnectionRegistry;
    use crate::store::{MemoryStore, StoreError};

    struct TestContext {
        store: Arc<MemoryStore>,
        registry: Arc<ConnectionRegistry>,
        orders: OrderService,
        buyer: Identity,
        seller: Identity,
    }

    impl TestContext {
        async fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let registry = Arc::new(ConnectionRegistry::new());
            let dispatcher = Dispatcher::spawn(registry.clone());

            let buyer = Identity {
                id: UserId::from("buyer-1"),
                name: "Ravi".to_string(),
                email: Some("ravi@example.com".to_string()),
                phone: Some("(044) 123-4567".to_string()),
                role: Role::Buyer,
                language: "en".to_string(),
            };
            let seller = Identity {
                id: UserId::from("seller-1"),
                name: "Meena".to_string(),
                email: Some("meena@example.com".to_string()),
                phone: Some("+91 90000 11111".to_string()),
                role: Role::Seller,
                language: "en".to_string(),
            };
            store.insert_identity(buyer.clone()).await.expect("insert buyer");
            store.insert_identity(seller.clone()).await.expect("insert seller");

            let orders = OrderService::new(
                store.clone(),
                store.clone(),
                store.clone(),
                dispatcher,
                "https://wa.me".to_string(),
            );

            Self {
                store,
                registry,
                orders,
                buyer,
                seller,
            }
        }

        async fn listing(&self, price: Decimal, extra: Option<Decimal>, active: bool) -> Listing {
            self.store
                .insert_listing(Listing {
                    id: ListingId::generate(),
                    seller_id: self.seller.id.clone(),
                    product_type: ProductType::Vegetable,
                    title: "Tomatoes".to_string(),
                    description: String::new(),
                    price_per_unit: price,
                    extra_charge: extra,
                    quantity: Decimal::from(100),
                    location_text: "Market road".to_string(),
                    live_location_url: None,
                    available_date: None,
                    seller_phone: "90000-11111".to_string(),
                    active,
                    created_at: Utc::now(),
                })
                .await
                .expect("insert listing")
        }

        async fn seller_socket(&self) -> mpsc::UnboundedReceiver<String> {
            let (tx, rx) = mpsc::unbounded_channel();
            let conn = self.registry.connect(tx).await;
            self.registry.join(&conn, self.seller.id.clone()).await;
            rx
        }
    }

    #[tokio::test]
    async fn order_is_priced_and_seller_is_alerted() {
        let ctx = TestContext::new().await;
        let listing = ctx.listing(Decimal::from(20), None, true).await;
        let mut seller_rx = ctx.seller_socket().await;

        let receipt = ctx
            .orders
            .place_order(&ctx.buyer.id, &listing.id, &json!(5))
            .await
            .expect("place_order should succeed");

        assert_eq!(receipt.order.total_price, Decimal::from(100));
        assert_eq!(receipt.order.status, OrderStatus::Confirmed);
        assert_eq!(receipt.order.seller_id, ctx.seller.id);
        assert!(receipt.buyer_message.contains("Total: 100"));

        let frame = tokio::time::timeout(Duration::from_secs(1), seller_rx.recv())
            .await
            .expect("alert should arrive")
            .expect("outbox open");
        let value: Value = serde_json::from_str(&frame).expect("json frame");
        assert_eq!(value["event"], "personal_alert");
        let message = value["data"]["message"].as_str().unwrap_or_default();
        assert!(message.contains("Ravi"), "got {message}");
        assert!(message.contains('5'), "got {message}");
    }

    #[tokio::test]
    async fn extra_charge_is_added_once() {
        let ctx = TestContext::new().await;
        let listing = ctx
            .listing(Decimal::new(1250, 2), Some(Decimal::new(750, 2)), true)
            .await;

        let receipt = ctx
            .orders
            .place_order(&ctx.buyer.id, &listing.id, &json!("3"))
            .await
            .expect("place_order should succeed");

        // 12.50 * 3 + 7.50
        assert_eq!(receipt.order.total_price, Decimal::from(45));
        assert_eq!(receipt.order.extra_charge_snapshot, Some(Decimal::new(750, 2)));
    }

    #[test]
    fn total_is_exact() {
        assert_eq!(
            order_total(Decimal::new(10, 1), None, Decimal::new(3, 1)),
            Some(Decimal::new(3, 1))
        );
        assert_eq!(
            order_total(Decimal::new(333, 2), Some(Decimal::ONE), Decimal::from(3)),
            Some(Decimal::new(1099, 2))
        );
    }

    #[test]
    fn total_overflow_is_none() {
        assert_eq!(order_total(Decimal::from(20), None, Decimal::MAX), None);
        assert_eq!(
            order_total(Decimal::ONE, Some(Decimal::MAX), Decimal::ONE),
            None
        );
    }

    #[tokio::test]
    async fn oversized_totals_are_rejected_without_an_order() {
        let ctx = TestContext::new().await;
        let listing = ctx.listing(Decimal::from(20), None, true).await;

        let result = ctx
            .orders
            .place_order(
                &ctx.buyer.id,
                &listing.id,
                &json!("79228162514264337593543950335"),
            )
            .await;
        assert!(
            matches!(&result, Err(MarketError::Validation(message)) if message == "Quantity is too large"),
            "got {result:?}"
        );

        let surcharged = ctx.listing(Decimal::ONE, Some(Decimal::MAX), true).await;
        let result = ctx
            .orders
            .place_order(&ctx.buyer.id, &surcharged.id, &json!(1))
            .await;
        assert!(matches!(result, Err(MarketError::Validation(_))), "got {result:?}");

        let orders = ctx.store.orders_for_buyer(&ctx.buyer.id).await.expect("list");
        assert!(orders.is_empty());
    }

    #[tokio::test]
    async fn snapshot_survives_price_change() {
        let ctx = TestContext::new().await;
        let mut listing = ctx.listing(Decimal::from(20), None, true).await;

        let receipt = ctx
            .orders
            .place_order(&ctx.buyer.id, &listing.id, &json!(2))
            .await
            .expect("place_order should succeed");

        listing.price_per_unit = Decimal::from(35);
        ctx.store
            .update_listing(listing)
            .await
            .expect("update listing");

        let stored = ctx
            .store
            .find_order(&receipt.order.id)
            .await
            .expect("find order")
            .expect("order exists");
        assert_eq!(stored.price_per_unit_snapshot, Decimal::from(20));
        assert_eq!(stored.total_price, Decimal::from(40));
    }

    #[tokio::test]
    async fn inactive_listing_is_rejected_without_an_order() {
        let ctx = TestContext::new().await;
        let listing = ctx.listing(Decimal::from(20), None, false).await;

        let result = ctx
            .orders
            .place_order(&ctx.buyer.id, &listing.id, &json!(5))
            .await;

        assert!(
            matches!(result, Err(MarketError::Conflict(_))),
            "expected Conflict, got {result:?}"
        );
        let orders = ctx.store.orders_for_buyer(&ctx.buyer.id).await.expect("list");
        assert!(orders.is_empty());
    }

    #[tokio::test]
    async fn unknown_listing_is_unavailable() {
        let ctx = TestContext::new().await;

        let result = ctx
            .orders
            .place_order(&ctx.buyer.id, &ListingId::from("nope"), &json!(5))
            .await;

        assert!(matches!(result, Err(MarketError::Conflict(_))));
    }

    #[tokio::test]
    async fn unknown_buyer_is_not_found() {
        let ctx = TestContext::new().await;
        let listing = ctx.listing(Decimal::from(20), None, true).await;

        let result = ctx
            .orders
            .place_order(&UserId::from("ghost"), &listing.id, &json!(5))
            .await;

        assert!(matches!(result, Err(MarketError::NotFound(_))));
    }

    #[tokio::test]
    async fn bad_quantities_are_rejected_without_an_order() {
        let ctx = TestContext::new().await;
        let listing = ctx.listing(Decimal::from(20), None, true).await;

        for quantity in [
            json!(0),
            json!(-2),
            json!("abc"),
            json!(null),
            json!("0"),
            json!(1e30),
            json!("1e40"),
            json!("79228162514264337593543950335"),
        ] {
            let result = ctx
                .orders
                .place_order(&ctx.buyer.id, &listing.id, &quantity)
                .await;
            assert!(
                matches!(result, Err(MarketError::Validation(_))),
                "quantity {quantity} gave {result:?}"
            );
        }

        let orders = ctx.store.orders_for_buyer(&ctx.buyer.id).await.expect("list");
        assert!(orders.is_empty());
    }

    #[tokio::test]
    async fn order_succeeds_with_nobody_listening() {
        let ctx = TestContext::new().await;
        let listing = ctx.listing(Decimal::from(20), None, true).await;

        let receipt = ctx
            .orders
            .place_order(&ctx.buyer.id, &listing.id, &json!(1))
            .await;

        assert!(receipt.is_ok());
        assert_eq!(ctx.registry.room_size(&ctx.seller.id).await, 0);
    }

    #[tokio::test]
    async fn contact_links_are_derived() {
        let ctx = TestContext::new().await;
        let listing = ctx.listing(Decimal::from(20), None, true).await;

        let receipt = ctx
            .orders
            .place_order(&ctx.buyer.id, &listing.id, &json!(5))
            .await
            .expect("place_order should succeed");

        let buyer_link = receipt.buyer_whats_app.expect("buyer has a phone");
        assert!(buyer_link.starts_with("https://wa.me/0441234567?text="));
        let seller_link = receipt.seller_whats_app.expect("listing has a phone");
        assert!(seller_link.starts_with("https://wa.me/9000011111?text="));
        assert!(receipt
            .buyer_email
            .expect("buyer has email")
            .starts_with("mailto:ravi@example.com?subject=Order%20Confirmation"));
        assert!(receipt
            .seller_email
            .expect("seller has email")
            .starts_with("mailto:meena@example.com?subject=New%20Order%20Received"));
    }

    #[tokio::test]
    async fn buyer_without_phone_or_email_gets_null_links() {
        let ctx = TestContext::new().await;
        let listing = ctx.listing(Decimal::from(20), None, true).await;
        let quiet = Identity {
            id: UserId::from("quiet"),
            name: "Quiet".to_string(),
            email: None,
            phone: Some(String::new()),
            role: Role::Buyer,
            language: "en".to_string(),
        };
        ctx.store.insert_identity(quiet.clone()).await.expect("insert");

        let receipt = ctx
            .orders
            .place_order(&quiet.id, &listing.id, &json!(1))
            .await
            .expect("place_order should succeed");

        assert_eq!(receipt.buyer_whats_app, None);
        assert_eq!(receipt.buyer_email, None);
        assert_eq!(receipt.order.buyer_email, None);
    }

    #[tokio::test]
    async fn sellers_list_orders_placed_with_them() {
        let ctx = TestContext::new().await;
        let listing = ctx.listing(Decimal::from(20), None, true).await;
        ctx.orders
            .place_order(&ctx.buyer.id, &listing.id, &json!(1))
            .await
            .expect("first order");
        ctx.orders
            .place_order(&ctx.buyer.id, &listing.id, &json!(2))
            .await
            .expect("second order");

        let for_seller = ctx.orders.orders_for(&ctx.seller).await.expect("seller orders");
        let for_buyer = ctx.orders.orders_for(&ctx.buyer).await.expect("buyer orders");

        assert_eq!(for_seller.len(), 2);
        assert_eq!(for_buyer.len(), 2);
        assert!(for_buyer[0].created_at >= for_buyer[1].created_at);
    }

    struct BrokenLedger;

    #[async_trait]
    impl OrderLedger for BrokenLedger {
        async fn insert_order(&self, _order: Order) -> Result<Order, StoreError> {
            Err(StoreError::Unavailable("write refused".to_string()))
        }

        async fn find_order(&self, _id: &OrderId) -> Result<Option<Order>, StoreError> {
            Ok(None)
        }

        async fn orders_for_buyer(&self, _buyer: &UserId) -> Result<Vec<Order>, StoreError> {
            Ok(Vec::new())
        }

        async fn orders_for_seller(&self, _seller: &UserId) -> Result<Vec<Order>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn ledger_failure_is_internal_and_sends_no_alert() {
        let ctx = TestContext::new().await;
        let listing = ctx.listing(Decimal::from(20), None, true).await;
        let mut seller_rx = ctx.seller_socket().await;
        let orders = OrderService::new(
            ctx.store.clone(),
            ctx.store.clone(),
            Arc::new(BrokenLedger),
            Dispatcher::spawn(ctx.registry.clone()),
            "https://wa.me".to_string(),
        );

        let result = orders.place_order(&ctx.buyer.id, &listing.id, &json!(1)).await;

        assert!(matches!(result, Err(MarketError::Internal(_))));
        let waited = tokio::time::timeout(Duration::from_millis(100), seller_rx.recv()).await;
        assert!(waited.is_err(), "no alert expected");
    }
}
