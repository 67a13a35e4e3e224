use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The server refused the handshake; carries its reason
    /// (`malformed`, `expired`, `bad_signature`).
    #[error("session rejected: {0}")]
    Rejected(String),

    #[error("handshake failed: {0}")]
    Handshake(&'static str),

    #[error("session is closed")]
    Closed,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}
