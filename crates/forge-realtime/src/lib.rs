//! Realtime client for the trade push path.
//!
//! Speaks the Phoenix channel protocol used by Supabase Realtime:
//! - Joins one `postgres_changes` channel on the trades table
//! - Automatic reconnection and rejoin with exponential backoff
//! - Phoenix heartbeat with reply timeout detection
//! - Decoded trade rows forwarded through a [`TradeSubscription`]
//!
//! [`TradeSubscription`]: forge_store::TradeSubscription

pub mod connection;
pub mod error;
pub mod feed;
pub mod heartbeat;
pub mod message;

pub use connection::{ConnectionManager, ConnectionState, RealtimeConfig};
pub use error::{RealtimeError, RealtimeResult};
pub use feed::RealtimeTradeFeed;
pub use message::{ChangeType, PhoenixMessage, PostgresChange};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the TLS crypto provider. Call before the first connection.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
