use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::messages::ServerMessage;
use crate::models::UserId;

/// Realtime delivery backend. The in-process [`ConnectionRegistry`] is one
/// implementation; a broker with one topic per user id would be another.
///
/// [`ConnectionRegistry`]: crate::room::ConnectionRegistry
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Puts a connection into the room of `user`. Returns false for an unknown connection.
    async fn join(&self, connection_id: &str, user: UserId) -> bool;

    async fn disconnect(&self, connection_id: &str);

    /// Returns how many live connections accepted the message.
    async fn emit_to_user(&self, user: &UserId, message: &ServerMessage) -> usize;

    async fn emit_to_all(&self, message: &ServerMessage) -> usize;
}

#[derive(Debug)]
pub enum Notification {
    ToUser { user: UserId, message: ServerMessage },
    ToAll { message: ServerMessage },
}

/// Post-commit, fire-and-forget delivery. Callers enqueue and move on; a
/// single task drains the queue so messages to one room keep their order.
#[derive(Clone)]
pub struct Dispatcher {
    queue: mpsc::UnboundedSender<Notification>,
}

impl Dispatcher {
    /// Starts the dispatch task on the current tokio runtime.
    pub fn spawn(notifier: Arc<dyn Notifier>) -> Self {
        let (queue, mut pending) = mpsc::unbounded_channel::<Notification>();

        tokio::spawn(async move {
            while let Some(notification) = pending.recv().await {
                deliver(notifier.as_ref(), notification).await;
            }
        });

        Self { queue }
    }

    pub fn notify_user(&self, user: UserId, message: ServerMessage) {
        self.enqueue(Notification::ToUser { user, message });
    }

    pub fn broadcast(&self, message: ServerMessage) {
        self.enqueue(Notification::ToAll { message });
    }

    fn enqueue(&self, notification: Notification) {
        if let Err(e) = self.queue.send(notification) {
            warn!("Dispatcher stopped, dropping notification: {:?}", e.0);
        }
    }
}

async fn deliver(notifier: &dyn Notifier, notification: Notification) {
    match notification {
        Notification::ToUser { user, message } => {
            let delivered = notifier.emit_to_user(&user, &message).await;
            debug!("{} to {user}: {delivered} connection(s)", message.event_name());
        }
        Notification::ToAll { message } => {
            let delivered = notifier.emit_to_all(&message).await;
            debug!("{} broadcast: {delivered} connection(s)", message.event_name());
        }
    }
}
