//! Socket.IO control channel
//!
//! Connects to the operator server with the `rust_socketio` async client
//! and forwards the inbound operator events.

use async_trait::async_trait;
use futures::FutureExt;
use rust_socketio::{
    asynchronous::{Client, ClientBuilder},
    Payload,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ControlChannel};
use crate::events::EventCategory;
use crate::{BridgeError, Result};

/// Socket.IO channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketIoConfig {
    /// Server URL (e.g., "http://localhost:3000")
    pub url: String,
    /// Namespace (default: "/")
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Events to listen for
    #[serde(default = "default_events")]
    pub events: Vec<String>,
}

fn default_namespace() -> String {
    "/".to_string()
}

fn default_events() -> Vec<String> {
    EventCategory::INBOUND
        .iter()
        .map(|category| category.name().to_string())
        .collect()
}

impl Default for SocketIoConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".to_string(),
            namespace: default_namespace(),
            events: default_events(),
        }
    }
}

pub struct SocketIoChannel {
    config: SocketIoConfig,
    client: Option<Client>,
    connected: Arc<AtomicBool>,
}

impl SocketIoChannel {
    pub fn new(config: SocketIoConfig) -> Self {
        Self {
            config,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &SocketIoConfig {
        &self.config
    }

    fn payload_args(payload: Payload) -> Vec<Value> {
        match payload {
            Payload::Text(values) => values,
            Payload::Binary(data) => vec![Value::Array(
                data.iter().map(|&b| Value::Number(b.into())).collect(),
            )],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl ControlChannel for SocketIoChannel {
    async fn start(&mut self) -> Result<mpsc::Receiver<ChannelEvent>> {
        if self.client.is_some() {
            return Err(BridgeError::ConnectionFailed(
                "Socket.IO channel already running".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(100);

        let mut builder = ClientBuilder::new(self.config.url.as_str())
            .namespace(self.config.namespace.as_str())
            .reconnect(false);

        let connected = self.connected.clone();
        let tx_close = tx.clone();
        builder = builder.on("close", move |_, _| {
            let connected = connected.clone();
            let tx = tx_close.clone();
            async move {
                warn!("Socket.IO disconnected");
                connected.store(false, Ordering::SeqCst);
                let _ = tx
                    .send(ChannelEvent::Disconnected {
                        reason: Some("server closed the connection".to_string()),
                    })
                    .await;
            }
            .boxed()
        });

        builder = builder.on("error", |payload, _| {
            async move {
                warn!("Socket.IO error: {:?}", payload);
            }
            .boxed()
        });

        for event in &self.config.events {
            let name = event.clone();
            let tx_event = tx.clone();

            builder = builder.on(event.as_str(), move |payload, _| {
                let name = name.clone();
                let tx = tx_event.clone();
                async move {
                    let args = SocketIoChannel::payload_args(payload);
                    debug!("Socket.IO received event: {}", name);
                    let _ = tx.send(ChannelEvent::Event { name, args }).await;
                }
                .boxed()
            });
        }

        let client = builder.connect().await.map_err(|e| {
            BridgeError::ConnectionFailed(format!("Socket.IO connect failed: {:?}", e))
        })?;

        self.client = Some(client);
        self.connected.store(true, Ordering::SeqCst);
        let _ = tx.send(ChannelEvent::Connected).await;

        info!("Socket.IO channel connected to {}", self.config.url);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(client) = self.client.take() {
            let _ = client.disconnect().await;
            info!("Socket.IO channel stopped");
        }
        Ok(())
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| BridgeError::Send("Not connected".to_string()))?;

        client
            .emit(event, payload)
            .await
            .map_err(|e| BridgeError::Send(format!("Socket.IO emit failed: {:?}", e)))?;

        debug!("Socket.IO emitted: {}", event);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
