use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, trace};
use uuid::Uuid;

use parley_db::Database;
use parley_types::events::GatewayEvent;
use parley_types::models::Message;

use crate::presence::{ConnectionHandle, PresenceRegistry};

/// Longest accepted message body, in characters.
pub const MAX_BODY_CHARS: usize = 4000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sender or receiver does not exist")]
    UnknownParticipant,
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

/// Append-only message log the router persists into.
pub trait MessageStore: Send + Sync + 'static {
    fn append(&self, sender_id: Uuid, receiver_id: Uuid, body: &str) -> Result<Message, StoreError>;
}

impl MessageStore for Database {
    fn append(&self, sender_id: Uuid, receiver_id: Uuid, body: &str) -> Result<Message, StoreError> {
        let row = self
            .append_message(&sender_id.to_string(), &receiver_id.to_string(), body)?
            .ok_or(StoreError::UnknownParticipant)?;
        Ok(Message::try_from(row)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),
    #[error("message store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),
}

/// Persists direct messages and pushes them to both parties' open channels.
#[derive(Clone)]
pub struct MessageRouter {
    store: Arc<dyn MessageStore>,
    presence: PresenceRegistry,
}

impl MessageRouter {
    pub fn new(store: Arc<dyn MessageStore>, presence: PresenceRegistry) -> Self {
        Self { store, presence }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Persist a message from `sender_id` to `receiver_id`, then deliver it
    /// to every connection of the receiver and of the sender.
    ///
    /// Delivery is best-effort: a closed connection is skipped and never
    /// undoes the write. Nothing is delivered if the write fails.
    pub async fn route(
        &self,
        sender_id: Uuid,
        receiver_id: Option<Uuid>,
        body: &str,
    ) -> Result<Message, RouterError> {
        let receiver_id = receiver_id
            .filter(|id| !id.is_nil())
            .ok_or(RouterError::InvalidPayload("missing receiver"))?;
        if body.trim().is_empty() {
            return Err(RouterError::InvalidPayload("empty body"));
        }
        if body.chars().count() > MAX_BODY_CHARS {
            return Err(RouterError::InvalidPayload("body too long"));
        }

        // Run blocking DB insert off the async runtime
        let store = self.store.clone();
        let body = body.to_string();
        let message = tokio::task::spawn_blocking(move || store.append(sender_id, receiver_id, &body))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                RouterError::StoreUnavailable(e.into())
            })?
            .map_err(|e| match e {
                StoreError::UnknownParticipant => RouterError::InvalidPayload("unknown receiver"),
                StoreError::Unavailable(e) => {
                    error!("Failed to persist message from {}: {:#}", sender_id, e);
                    RouterError::StoreUnavailable(e)
                }
            })?;

        let delivered = self.fan_out(&message).await;
        debug!(
            "Message {} from {} to {} delivered to {} connection(s)",
            message.id, message.sender_id, message.receiver_id, delivered
        );

        Ok(message)
    }

    async fn fan_out(&self, message: &Message) -> usize {
        let mut targets: HashSet<ConnectionHandle> =
            self.presence.lookup(message.receiver_id).await.into_iter().collect();
        if message.sender_id != message.receiver_id {
            targets.extend(self.presence.lookup(message.sender_id).await);
        }

        let mut delivered = 0;
        for handle in targets {
            if handle.send(GatewayEvent::MessageCreate(message.clone())) {
                delivered += 1;
            } else {
                trace!("Connection {} closed before delivery", handle.id());
            }
        }
        delivered
    }
}
