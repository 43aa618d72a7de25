//! Control channel trait definitions

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::Result;

/// Events from the control channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Channel connected to the server
    Connected,
    /// Channel lost its connection
    Disconnected { reason: Option<String> },
    /// Named event with its arguments
    Event { name: String, args: Vec<Value> },
}

/// Named-event publish/subscribe connection to the operator server
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Connect and start delivering events
    async fn start(&mut self) -> Result<mpsc::Receiver<ChannelEvent>>;

    /// Disconnect; the event receiver ends
    async fn stop(&mut self) -> Result<()>;

    /// Publish an event to the server
    async fn emit(&self, event: &str, payload: Value) -> Result<()>;

    fn is_connected(&self) -> bool;
}
