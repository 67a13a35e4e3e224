use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication; the connection has joined
    /// the user's channel.
    Ready { user_id: Uuid, username: String },

    /// Handshake rejected. The server closes the socket right after.
    InvalidSession { reason: String },

    /// A direct message was persisted. Sent to both parties' open channels.
    MessageCreate(Message),

    /// A send request could not be persisted.
    SendFailed { reason: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Send a direct message to another user
    SendMessage {
        #[serde(default)]
        receiver_id: Option<Uuid>,
        #[serde(default)]
        body: String,
    },
}
