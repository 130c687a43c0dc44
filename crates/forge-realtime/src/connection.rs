//! Realtime WebSocket connection manager.
//!
//! Handles the socket lifecycle, channel join, automatic reconnection with
//! exponential backoff and rejoin after reconnection. Changes that happen
//! while the socket is down are not replayed; the monitor's poll path picks
//! them up.

use crate::error::{RealtimeError, RealtimeResult};
use crate::heartbeat::HeartbeatManager;
use crate::message::{
    PhoenixMessage, EVENT_CLOSE, EVENT_ERROR, EVENT_POSTGRES_CHANGES, EVENT_REPLY, EVENT_SYSTEM,
};
use forge_core::Trade;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rand::Rng;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Realtime connection configuration.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Socket endpoint, e.g. `wss://project.supabase.co/realtime/v1/websocket`.
    pub url: String,
    /// Sent as the `apikey` query parameter and the join access token.
    pub api_key: String,
    pub schema: String,
    pub table: String,
    /// Optional row filter (`status=eq.active`).
    pub filter: Option<String>,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Heartbeat reply must arrive within this.
    pub heartbeat_timeout_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            schema: "public".to_string(),
            table: "trades".to_string(),
            filter: None,
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30000,
            heartbeat_interval_ms: 30000,
            heartbeat_timeout_ms: 10000,
        }
    }
}

impl RealtimeConfig {
    /// Channel topic for the configured table.
    pub fn topic(&self) -> String {
        format!("realtime:{}:{}", self.schema, self.table)
    }

    /// Endpoint with the api key and protocol version appended.
    pub fn socket_url(&self) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}apikey={}&vsn=1.0.0", self.url, self.api_key)
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket open, join sent, reply pending.
    Joining,
    Joined,
    Reconnecting,
}

/// Realtime connection manager for one channel.
pub struct ConnectionManager {
    config: RealtimeConfig,
    topic: String,
    state: RwLock<ConnectionState>,
    heartbeat: HeartbeatManager,
    next_ref: AtomicU64,
    /// Ref of the join sent on the current socket.
    join_ref: AtomicU64,
    reconnect_count: AtomicU32,
    trade_tx: mpsc::Sender<Trade>,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager forwarding decoded trades to `trade_tx`.
    ///
    /// Cancelling `shutdown_token` closes the socket and ends [`run`](Self::run).
    pub fn new(
        config: RealtimeConfig,
        trade_tx: mpsc::Sender<Trade>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            topic: config.topic(),
            heartbeat: HeartbeatManager::new(
                config.heartbeat_interval_ms,
                config.heartbeat_timeout_ms,
            ),
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            next_ref: AtomicU64::new(1),
            join_ref: AtomicU64::new(0),
            reconnect_count: AtomicU32::new(0),
            trade_tx,
            shutdown_token,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        info!("Realtime shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn take_ref(&self) -> u64 {
        self.next_ref.fetch_add(1, Ordering::Relaxed)
    }

    /// Connect, join and forward changes until shutdown or the retry limit.
    pub async fn run(&self) -> RealtimeResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);

            match self.try_connect().await {
                Ok(()) => info!(topic = %self.topic, "Realtime connection closed"),
                Err(e) => error!(?e, topic = %self.topic, "Realtime connection error"),
            }

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            attempt += 1;
            self.reconnect_count.store(attempt, Ordering::Relaxed);

            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "Max reconnection attempts reached");
                self.set_state(ConnectionState::Disconnected);
                return Err(RealtimeError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            self.set_state(ConnectionState::Reconnecting);

            let delay = self.calculate_backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            }
        }
    }

    async fn try_connect(&self) -> RealtimeResult<()> {
        info!(url = %self.config.url, topic = %self.topic, "Connecting to Realtime");

        let (ws_stream, _response) =
            connect_async_tls_with_config(self.config.socket_url(), None, true, None).await?;
        let (mut write, mut read) = ws_stream.split();

        self.set_state(ConnectionState::Joining);
        self.heartbeat.reset();

        let join_ref = self.take_ref();
        self.join_ref.store(join_ref, Ordering::Relaxed);
        let join = PhoenixMessage::join(
            &self.topic,
            join_ref,
            &self.config.schema,
            &self.config.table,
            self.config.filter.as_deref(),
            &self.config.api_key,
        );
        write
            .send(Message::Text(serde_json::to_string(&join)?))
            .await?;
        debug!(join_ref, "Join sent");

        let mut heartbeat_check =
            tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms / 2));
        heartbeat_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    let leave = PhoenixMessage::leave(&self.topic, self.take_ref());
                    if let Ok(text) = serde_json::to_string(&leave) {
                        let _ = write.send(Message::Text(text)).await;
                    }
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "Realtime socket closed by server");
                            return Err(RealtimeError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            warn!("Realtime stream ended");
                            return Ok(());
                        }
                        _ => {}
                    }
                }

                _ = heartbeat_check.tick() => {
                    if self.heartbeat.is_timed_out() {
                        error!("Heartbeat timeout");
                        return Err(RealtimeError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_send() {
                        let msg_ref = self.take_ref();
                        let frame = serde_json::to_string(&PhoenixMessage::heartbeat(msg_ref))?;
                        write.send(Message::Text(frame)).await?;
                        self.heartbeat.record_sent(msg_ref);
                    }
                }
            }
        }
    }

    /// Handle one text frame. Errors force a reconnect.
    async fn handle_text_message(&self, text: &str) -> RealtimeResult<()> {
        let msg: PhoenixMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(?e, "Skipping malformed Realtime frame");
                return Ok(());
            }
        };

        if msg.is_heartbeat_reply() {
            let msg_ref = msg.msg_ref.as_deref().and_then(|r| r.parse().ok());
            self.heartbeat.record_reply(msg_ref);
            return Ok(());
        }

        if msg.topic != self.topic {
            debug!(topic = %msg.topic, event = %msg.event, "Frame for another topic");
            return Ok(());
        }

        match msg.event.as_str() {
            EVENT_REPLY => {
                if !msg.is_ref(self.join_ref.load(Ordering::Relaxed)) {
                    return Ok(());
                }
                match msg.reply_status() {
                    Some("ok") => {
                        self.set_state(ConnectionState::Joined);
                        self.reconnect_count.store(0, Ordering::Relaxed);
                        info!(topic = %self.topic, "Channel joined");
                    }
                    _ => {
                        let response = msg
                            .payload
                            .get("response")
                            .map(ToString::to_string)
                            .unwrap_or_default();
                        return Err(RealtimeError::JoinRejected(response));
                    }
                }
            }
            EVENT_POSTGRES_CHANGES => match msg.as_postgres_change() {
                Some(Ok(change)) => match change.trade() {
                    Ok(Some(trade)) => self.forward(trade).await,
                    Ok(None) => debug!(change = ?change.change_type, "Change without trade row"),
                    Err(e) => warn!(?e, "Skipping undecodable trade row"),
                },
                Some(Err(e)) => warn!(?e, "Skipping malformed change payload"),
                None => {}
            },
            EVENT_ERROR | EVENT_CLOSE => {
                return Err(RealtimeError::ChannelClosed(msg.event));
            }
            EVENT_SYSTEM => debug!(payload = %msg.payload, "System message"),
            other => debug!(event = other, "Unhandled event"),
        }

        Ok(())
    }

    async fn forward(&self, trade: Trade) {
        debug!(trade_id = %trade.id, status = %trade.status, "Trade change received");
        if self.trade_tx.send(trade).await.is_err() {
            info!("Trade subscriber dropped, closing Realtime connection");
            self.shutdown_token.cancel();
        }
    }

    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_base_delay_ms;
        let max = self.config.reconnect_max_delay_ms;

        // base * 2^(attempt-1), capped
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = base.saturating_mul(1u64 << exponent).min(max);

        let jitter = rand::thread_rng().gen_range(0..=1000);
        Duration::from_millis(delay + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use forge_core::{BuildingId, Price, RiskTable, RiskTier, TradeStatus, UserId};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn manager() -> (ConnectionManager, mpsc::Receiver<Trade>) {
        let (tx, rx) = mpsc::channel(8);
        let config = RealtimeConfig {
            url: "ws://127.0.0.1:1/socket".to_string(),
            api_key: "anon".to_string(),
            ..Default::default()
        };
        (ConnectionManager::new(config, tx, CancellationToken::new()), rx)
    }

    fn change_frame(trade: &Trade) -> String {
        json!({
            "topic": "realtime:public:trades",
            "event": "postgres_changes",
            "payload": { "data": {
                "schema": "public",
                "table": "trades",
                "type": "INSERT",
                "record": trade,
            }},
            "ref": null
        })
        .to_string()
    }

    fn trade() -> Trade {
        let table = RiskTable::default();
        let mut trade = Trade::open(
            BuildingId::new(),
            UserId::new(),
            "BTC",
            RiskTier::Low,
            table.get(RiskTier::Low),
            5,
            Price::new(dec!(60000)),
            Utc::now(),
        )
        .unwrap();
        trade.status = TradeStatus::Active;
        trade
    }

    #[test]
    fn test_default_config() {
        let config = RealtimeConfig::default();
        assert_eq!(config.max_reconnect_attempts, 0);
        assert_eq!(config.heartbeat_interval_ms, 30000);
        assert_eq!(config.topic(), "realtime:public:trades");
    }

    #[test]
    fn test_socket_url_appends_params() {
        let mut config = RealtimeConfig {
            url: "wss://x.supabase.co/realtime/v1/websocket".to_string(),
            api_key: "k".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.socket_url(),
            "wss://x.supabase.co/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
        config.url.push_str("?log_level=info");
        assert!(config.socket_url().ends_with("?log_level=info&apikey=k&vsn=1.0.0"));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let (m, _rx) = manager();
        let first = m.calculate_backoff_delay(1).as_millis();
        assert!((1000..=2000).contains(&first));
        let third = m.calculate_backoff_delay(3).as_millis();
        assert!((4000..=5000).contains(&third));
        let capped = m.calculate_backoff_delay(20).as_millis();
        assert!((30000..=31000).contains(&capped));
    }

    #[tokio::test]
    async fn test_change_is_forwarded() {
        let (m, mut rx) = manager();
        let t = trade();
        m.handle_text_message(&change_frame(&t)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), t);
    }

    #[tokio::test]
    async fn test_join_reply_marks_joined() {
        let (m, _rx) = manager();
        m.join_ref.store(4, Ordering::Relaxed);
        let reply = r#"{"topic":"realtime:public:trades","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"4"}"#;
        m.handle_text_message(reply).await.unwrap();
        assert_eq!(m.state(), ConnectionState::Joined);
    }

    #[tokio::test]
    async fn test_join_rejection_is_error() {
        let (m, _rx) = manager();
        m.join_ref.store(1, Ordering::Relaxed);
        let reply = r#"{"topic":"realtime:public:trades","event":"phx_reply","payload":{"status":"error","response":{"reason":"denied"}},"ref":"1"}"#;
        let result = m.handle_text_message(reply).await;
        assert!(matches!(result, Err(RealtimeError::JoinRejected(_))));
    }

    #[tokio::test]
    async fn test_channel_error_forces_reconnect() {
        let (m, _rx) = manager();
        let frame = r#"{"topic":"realtime:public:trades","event":"phx_error","payload":{},"ref":null}"#;
        assert!(matches!(
            m.handle_text_message(frame).await,
            Err(RealtimeError::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let (m, mut rx) = manager();
        m.handle_text_message("not json").await.unwrap();
        m.handle_text_message(
            r#"{"topic":"realtime:public:trades","event":"postgres_changes","payload":{"data":{"schema":"public","table":"trades","type":"INSERT","record":{"id":"bad"}}},"ref":null}"#,
        )
        .await
        .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_triggers_shutdown() {
        let (m, rx) = manager();
        drop(rx);
        m.handle_text_message(&change_frame(&trade())).await.unwrap();
        assert!(m.is_shutdown());
    }
}
