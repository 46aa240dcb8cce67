use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::messages::ServerMessage;
use crate::models::UserId;
use crate::notify::Notifier;

pub type ConnectionId = String;

/// Outbound text frames for one live socket, drained by its writer task.
pub type Outbox = mpsc::UnboundedSender<String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Anonymous,
    Identified(UserId),
}

struct Connection {
    state: ConnectionState,
    outbox: Outbox,
}

/// Live connections of one user. Exists only while it has members.
#[derive(Default)]
struct Room {
    members: HashSet<ConnectionId>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<UserId, Room>,
}

impl Registry {
    fn leave_room(&mut self, connection_id: &str, user: &UserId) {
        if let Some(room) = self.rooms.get_mut(user) {
            room.members.remove(connection_id);
            if room.members.is_empty() {
                self.rooms.remove(user);
            }
        }
    }
}

/// In-process connection registry. Rooms are keyed by user id; a connection
/// belongs to at most one room.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Registry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly opened socket as anonymous.
    pub async fn connect(&self, outbox: Outbox) -> ConnectionId {
        let connection_id = Uuid::new_v4().to_string();
        let mut registry = self.inner.write().await;
        registry.connections.insert(
            connection_id.clone(),
            Connection {
                state: ConnectionState::Anonymous,
                outbox,
            },
        );
        connection_id
    }

    pub async fn state(&self, connection_id: &str) -> Option<ConnectionState> {
        let registry = self.inner.read().await;
        registry
            .connections
            .get(connection_id)
            .map(|connection| connection.state.clone())
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn room_size(&self, user: &UserId) -> usize {
        let registry = self.inner.read().await;
        registry.rooms.get(user).map_or(0, |room| room.members.len())
    }

    /// Sends straight to one connection, for handshake replies.
    pub async fn send_to_connection(&self, connection_id: &str, message: &ServerMessage) -> bool {
        let Ok(text) = serde_json::to_string(message) else {
            return false;
        };
        let registry = self.inner.read().await;
        registry
            .connections
            .get(connection_id)
            .is_some_and(|connection| connection.outbox.send(text).is_ok())
    }
}

#[async_trait]
impl Notifier for ConnectionRegistry {
    async fn join(&self, connection_id: &str, user: UserId) -> bool {
        let mut registry = self.inner.write().await;

        let previous = match registry.connections.get(connection_id) {
            Some(connection) => connection.state.clone(),
            None => return false,
        };

        match previous {
            ConnectionState::Identified(current) if current == user => return true,
            ConnectionState::Identified(current) => registry.leave_room(connection_id, &current),
            ConnectionState::Anonymous => {}
        }

        registry
            .rooms
            .entry(user.clone())
            .or_default()
            .members
            .insert(connection_id.to_string());

        if let Some(connection) = registry.connections.get_mut(connection_id) {
            connection.state = ConnectionState::Identified(user.clone());
        }

        info!("Connection {connection_id} joined room {user}");
        true
    }

    async fn disconnect(&self, connection_id: &str) {
        let mut registry = self.inner.write().await;
        let Some(connection) = registry.connections.remove(connection_id) else {
            return;
        };

        if let ConnectionState::Identified(user) = connection.state {
            registry.leave_room(connection_id, &user);
        }
        info!("Connection {connection_id} removed");
    }

    async fn emit_to_user(&self, user: &UserId, message: &ServerMessage) -> usize {
        let Ok(text) = serde_json::to_string(message) else {
            return 0;
        };

        let registry = self.inner.read().await;
        let Some(room) = registry.rooms.get(user) else {
            debug!("No live connections for {user}, dropping {}", message.event_name());
            return 0;
        };

        room.members
            .iter()
            .filter_map(|member| registry.connections.get(member))
            .filter(|connection| connection.outbox.send(text.clone()).is_ok())
            .count()
    }

    async fn emit_to_all(&self, message: &ServerMessage) -> usize {
        let Ok(text) = serde_json::to_string(message) else {
            return 0;
        };

        let registry = self.inner.read().await;
        registry
            .connections
            .values()
            .filter(|connection| connection.outbox.send(text.clone()).is_ok())
            .count()
    }
}
