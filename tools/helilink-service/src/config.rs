//! Service configuration
//!
//! Loaded from an optional TOML file; every key has a default.

use anyhow::{ensure, Context, Result};
use helilink_accessory::{LinkConfig, SerialHostConfig};
use helilink_bridge::{ServiceConfig, SocketIoConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelilinkConfig {
    #[serde(default)]
    pub channel: ChannelSection,
    #[serde(default)]
    pub keepalive: KeepaliveSection,
    #[serde(default)]
    pub accessory: AccessorySection,
}

/// Control channel server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSection {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Delay before reconnecting a lost channel
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,
}

/// Liveness probe against the channel server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveSection {
    #[serde(default = "default_keepalive_path")]
    pub path: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Serial accessory selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessorySection {
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub vendor_id: Option<u16>,
    #[serde(default)]
    pub product_id: Option<u16>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,
}

fn default_server_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_retry_secs() -> u64 {
    5
}

fn default_keepalive_path() -> String {
    "/keepalive".to_string()
}

fn default_interval_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_reconnect_interval_secs() -> u64 {
    5
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            retry_secs: default_retry_secs(),
        }
    }
}

impl Default for KeepaliveSection {
    fn default() -> Self {
        Self {
            path: default_keepalive_path(),
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for AccessorySection {
    fn default() -> Self {
        Self {
            port: None,
            vendor_id: None,
            product_id: None,
            baud_rate: default_baud_rate(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
        }
    }
}

impl HelilinkConfig {
    /// Load from `path`, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject periods the timers cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.keepalive.interval_secs > 0,
            "keepalive.interval_secs must be at least 1"
        );
        ensure!(
            self.keepalive.timeout_secs > 0,
            "keepalive.timeout_secs must be at least 1"
        );
        ensure!(
            self.accessory.reconnect_interval_secs > 0,
            "accessory.reconnect_interval_secs must be at least 1"
        );
        Ok(())
    }

    pub fn serial_host(&self) -> SerialHostConfig {
        SerialHostConfig {
            port: self.accessory.port.clone(),
            vendor_id: self.accessory.vendor_id,
            product_id: self.accessory.product_id,
            baud_rate: self.accessory.baud_rate,
            ..Default::default()
        }
    }

    pub fn link(&self) -> LinkConfig {
        LinkConfig {
            reconnect_interval: Duration::from_secs(self.accessory.reconnect_interval_secs),
        }
    }

    pub fn socketio(&self) -> SocketIoConfig {
        SocketIoConfig {
            url: self.channel.server_url.clone(),
            ..Default::default()
        }
    }

    pub fn service(&self) -> ServiceConfig {
        ServiceConfig {
            keepalive_interval: Duration::from_secs(self.keepalive.interval_secs),
            channel_retry: Duration::from_secs(self.channel.retry_secs),
        }
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.keepalive.timeout_secs)
    }
}
