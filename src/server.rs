use std::sync::Arc;

use chrono::Duration;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::auth::{bearer_token, TokenCipher, TokenError};
use crate::comments::CommentService;
use crate::config::Config;
use crate::error::MarketError;
use crate::listings::ListingService;
use crate::messages::{ClientMessage, JoinPayload, ServerMessage};
use crate::models::{Identity, UserId};
use crate::notify::{Dispatcher, Notifier};
use crate::orders::OrderService;
use crate::room::ConnectionRegistry;
use crate::store::{IdentityDirectory, MemoryStore};

/// Shared state behind every HTTP handler and socket.
pub struct Server {
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub tokens: TokenCipher,
    pub orders: OrderService,
    pub listings: ListingService,
    pub comments: CommentService,
}

impl Server {
    /// Must be called inside a tokio runtime: it starts the dispatch task.
    pub fn new(config: Config, store: Arc<MemoryStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::spawn(registry.clone());

        Server {
            tokens: TokenCipher::from_secret(&config.token_secret),
            orders: OrderService::new(
                store.clone(),
                store.clone(),
                store.clone(),
                dispatcher.clone(),
                config.messaging_link_base.clone(),
            ),
            listings: ListingService::new(store.clone(), dispatcher.clone()),
            comments: CommentService::new(store.clone(), store.clone(), dispatcher),
            config,
            store,
            registry,
        }
    }

    pub fn issue_token(&self, user: &UserId) -> Result<String, TokenError> {
        self.tokens
            .issue(user, Duration::seconds(self.config.token_ttl_secs))
    }

    /// Resolves an `Authorization` header to a stored identity.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<Identity, MarketError> {
        let token = bearer_token(header)
            .ok_or_else(|| MarketError::unauthorized("Not authorized, no token"))?;

        let claims = self.tokens.verify(token).map_err(|e| {
            debug!("Rejected bearer token: {e}");
            MarketError::unauthorized("Token failed")
        })?;

        self.store
            .find_identity(&claims.sub)
            .await?
            .ok_or_else(|| MarketError::unauthorized("User not found"))
    }

    fn resolve_join(&self, payload: JoinPayload) -> Result<UserId, MarketError> {
        match payload {
            JoinPayload::Token { token } => self
                .tokens
                .verify(&token)
                .map(|claims| claims.sub)
                .map_err(|e| MarketError::Unauthorized(e.to_string())),
            JoinPayload::UserId(user) if self.config.allow_unverified_join => Ok(user),
            JoinPayload::UserId(_) => Err(MarketError::unauthorized("Join requires a token")),
        }
    }

    pub async fn handle_connection(self: Arc<Self>, ws: WebSocket) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let connection_id = self.registry.connect(tx).await;
        info!("Realtime connection {connection_id} opened");

        // Ends once the registry drops the sender on disconnect.
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = ws_tx.send(Message::text(text)).await {
                    warn!("Failed to send WebSocket message: {e}");
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(msg) if msg.is_close() => break,
                Ok(msg) => {
                    if let Ok(text) = msg.to_str() {
                        self.handle_client_message(&connection_id, text).await;
                    }
                }
                Err(e) => {
                    warn!("WebSocket error on {connection_id}: {e}");
                    break;
                }
            }
        }

        self.registry.disconnect(&connection_id).await;
        info!("Realtime connection {connection_id} closed");
    }

    async fn handle_client_message(&self, connection_id: &str, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring unreadable frame from {connection_id}: {e}");
                return;
            }
        };

        match message {
            ClientMessage::Join(payload) => {
                let reply = match self.resolve_join(payload) {
                    Ok(user) => {
                        self.registry.join(connection_id, user.clone()).await;
                        ServerMessage::Joined { user_id: user }
                    }
                    Err(e) => {
                        warn!("Join refused for {connection_id}: {e}");
                        ServerMessage::Error {
                            message: e.to_string(),
                        }
                    }
                };
                self.registry.send_to_connection(connection_id, &reply).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::room::ConnectionState;

    async fn server(allow_unverified_join: bool) -> Arc<Server> {
        let config = Config {
            allow_unverified_join,
            ..Config::default()
        };
        let store = Arc::new(MemoryStore::new());
        store
            .insert_identity(Identity {
                id: UserId::from("seller-1"),
                name: "Meena".to_string(),
                email: None,
                phone: None,
                role: Role::Seller,
                language: "en".to_string(),
            })
            .await
            .expect("insert identity");
        Arc::new(Server::new(config, store))
    }

    async fn open(server: &Server) -> (String, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (server.registry.connect(tx).await, rx)
    }

    #[tokio::test]
    async fn token_join_identifies_the_connection() {
        let server = server(false).await;
        let (conn, mut rx) = open(&server).await;
        let token = server.issue_token(&UserId::from("seller-1")).expect("issue");

        let frame = serde_json::json!({"event": "join", "data": {"token": token}}).to_string();
        server.handle_client_message(&conn, &frame).await;

        assert_eq!(
            server.registry.state(&conn).await,
            Some(ConnectionState::Identified(UserId::from("seller-1")))
        );
        assert!(rx.try_recv().expect("ack").contains("\"joined\""));
    }

    #[tokio::test]
    async fn bare_user_id_join_is_refused_by_default() {
        let server = server(false).await;
        let (conn, mut rx) = open(&server).await;

        server
            .handle_client_message(&conn, r#"{"event":"join","data":"seller-1"}"#)
            .await;

        assert_eq!(server.registry.state(&conn).await, Some(ConnectionState::Anonymous));
        assert!(rx.try_recv().expect("error reply").contains("\"error\""));
    }

    #[tokio::test]
    async fn bare_user_id_join_works_in_compatibility_mode() {
        let server = server(true).await;
        let (conn, _rx) = open(&server).await;

        server
            .handle_client_message(&conn, r#"{"event":"join","data":"seller-1"}"#)
            .await;

        assert_eq!(server.registry.room_size(&UserId::from("seller-1")).await, 1);
    }

    #[tokio::test]
    async fn garbage_frames_are_ignored() {
        let server = server(true).await;
        let (conn, mut rx) = open(&server).await;

        server.handle_client_message(&conn, "not json").await;
        server
            .handle_client_message(&conn, r#"{"event":"dance","data":1}"#)
            .await;

        assert!(rx.try_recv().is_err());
        assert_eq!(server.registry.state(&conn).await, Some(ConnectionState::Anonymous));
    }

    #[tokio::test]
    async fn authenticate_resolves_bearer_tokens() {
        let server = server(false).await;
        let token = server.issue_token(&UserId::from("seller-1")).expect("issue");

        let identity = server
            .authenticate(Some(&format!("Bearer {token}")))
            .await
            .expect("authenticate should succeed");
        assert_eq!(identity.name, "Meena");

        let missing = server.authenticate(None).await;
        assert!(matches!(missing, Err(MarketError::Unauthorized(_))));

        let stranger = server.issue_token(&UserId::from("ghost")).expect("issue");
        let unknown = server.authenticate(Some(&format!("Bearer {stranger}"))).await;
        assert!(matches!(unknown, Err(MarketError::Unauthorized(_))));
    }
}
