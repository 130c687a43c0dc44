//! Oracle error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Price source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode price response: {0}")]
    Decode(String),

    #[error("Invalid price for {symbol}: {price}")]
    InvalidPrice { symbol: String, price: String },

    #[error("No price available for {0}")]
    Unavailable(String),
}

pub type OracleResult<T> = Result<T, OracleError>;
