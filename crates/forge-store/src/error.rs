//! Store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode store response: {0}")]
    Decode(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),

    #[error("Rejected write: {0}")]
    Rejected(#[from] forge_core::CoreError),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::HttpClient(e.to_string())
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
