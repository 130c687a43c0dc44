//! Realtime error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Channel join rejected: {0}")]
    JoinRejected(String),

    #[error("Channel closed by server: {0}")]
    ChannelClosed(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RealtimeResult<T> = Result<T, RealtimeError>;
