//! Mock Realtime server for integration tests.
//!
//! Provides a WebSocket server speaking enough of the Phoenix protocol to:
//! - Accept connections and acknowledge channel joins
//! - Answer heartbeats
//! - Push `postgres_changes` frames to every joined client
//! - Drop every connection on demand
//! - Record received frames

use forge_core::Trade;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum ServerCommand {
    Frame(String),
    Drop,
}

/// A mock Realtime server for testing.
pub struct MockRealtimeServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    commands: broadcast::Sender<ServerCommand>,
    messages: Arc<Mutex<VecDeque<Value>>>,
    connections: Arc<Mutex<u32>>,
    joins: Arc<Mutex<u32>>,
}

impl MockRealtimeServer {
    /// Start a new mock server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages: Arc<Mutex<VecDeque<Value>>> = Arc::new(Mutex::new(VecDeque::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let joins: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let (commands, _) = broadcast::channel(64);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let state = (messages.clone(), connections.clone(), joins.clone());
        let commands_clone = commands.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let (messages, connections, joins) = state.clone();
                        let commands = commands_clone.subscribe();
                        tokio::spawn(handle_connection(stream, commands, messages, connections, joins));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            commands,
            messages,
            connections,
            joins,
        }
    }

    /// Socket URL, in the shape of a hosted Realtime endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}/realtime/v1/websocket", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Joins acknowledged so far.
    pub async fn join_count(&self) -> u32 {
        *self.joins.lock().await
    }

    pub async fn received_messages(&self) -> Vec<Value> {
        self.messages.lock().await.iter().cloned().collect()
    }

    /// Push an UPDATE of `trade` on `topic` to every connected client.
    pub fn push_trade(&self, topic: &str, trade: &Trade) {
        let frame = json!({
            "topic": topic,
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "schema": "public",
                    "table": "trades",
                    "type": "UPDATE",
                    "commit_timestamp": "2026-01-01T00:00:00Z",
                    "record": trade,
                    "old_record": { "id": trade.id },
                },
                "ids": [1],
            },
            "ref": null,
        });
        let _ = self.commands.send(ServerCommand::Frame(frame.to_string()));
    }

    /// Send a raw text frame to every connected client.
    pub fn push_raw(&self, text: &str) {
        let _ = self.commands.send(ServerCommand::Frame(text.to_string()));
    }

    /// Close every open connection from the server side.
    pub fn drop_connections(&self) {
        let _ = self.commands.send(ServerCommand::Drop);
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    mut commands: broadcast::Receiver<ServerCommand>,
    messages: Arc<Mutex<VecDeque<Value>>>,
    connections: Arc<Mutex<u32>>,
    joins: Arc<Mutex<u32>>,
) {
    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    messages.lock().await.push_back(frame.clone());

                    let event = frame["event"].as_str().unwrap_or_default();
                    let reply = match event {
                        "phx_join" => {
                            *joins.lock().await += 1;
                            Some(json!({
                                "topic": frame["topic"],
                                "event": "phx_reply",
                                "payload": { "status": "ok", "response": { "postgres_changes": [] } },
                                "ref": frame["ref"],
                            }))
                        }
                        "heartbeat" | "phx_leave" => Some(json!({
                            "topic": frame["topic"],
                            "event": "phx_reply",
                            "payload": { "status": "ok", "response": {} },
                            "ref": frame["ref"],
                        })),
                        _ => None,
                    };
                    if let Some(reply) = reply {
                        let _ = write.send(Message::Text(reply.to_string())).await;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },

            command = commands.recv() => match command {
                Ok(ServerCommand::Frame(text)) => {
                    let _ = write.send(Message::Text(text)).await;
                }
                Ok(ServerCommand::Drop) | Err(_) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockRealtimeServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }
}
