//! `TradeFeed` over a Realtime channel.

use async_trait::async_trait;
use forge_store::{StoreResult, TradeFeed, TradeSubscription};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::connection::{ConnectionManager, RealtimeConfig};

/// Buffer between the socket task and the subscriber.
const SUBSCRIPTION_BUFFER: usize = 256;

/// Trade feed backed by Realtime `postgres_changes` on the trades table.
///
/// Each subscription owns its own socket. The socket task ends when the
/// subscription is dropped or unsubscribed, or when reconnection gives up;
/// in the last case the subscriber sees the stream end.
pub struct RealtimeTradeFeed {
    config: RealtimeConfig,
}

impl RealtimeTradeFeed {
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TradeFeed for RealtimeTradeFeed {
    async fn subscribe(&self) -> StoreResult<TradeSubscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        let manager = ConnectionManager::new(self.config.clone(), tx, cancel.clone());

        tokio::spawn(async move {
            match manager.run().await {
                Ok(()) => info!("Realtime trade feed stopped"),
                Err(e) => error!(?e, "Realtime trade feed gave up"),
            }
        });

        Ok(TradeSubscription::new(rx, cancel))
    }
}
