//! Server configuration model.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration. Loading from disk lives in the binary; this module
//! is only the DTO.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clipboard::FormatTag;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9123;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ListenSettings,
    pub clipboard: ClipboardSettings,
    pub render: RenderSettings,
    pub rpc: RpcSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenSettings {
    pub host: String,
    pub port: u16,
    /// Stop accepting once the last connected session goes away.
    pub idle_shutdown: bool,
}

impl ListenSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            idle_shutdown: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipboardBackend {
    #[default]
    System,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipboardSettings {
    pub backend: ClipboardBackend,
    pub write_attempts: u32,
    pub retry_delay_ms: u64,
    /// Wait after an external change before reading. Best effort only.
    pub settle_delay_ms: u64,
    /// Formats read and broadcast after an external change.
    pub broadcast_formats: Vec<FormatTag>,
}

impl ClipboardSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for ClipboardSettings {
    fn default() -> Self {
        Self {
            backend: ClipboardBackend::default(),
            write_attempts: 10,
            retry_delay_ms: 100,
            settle_delay_ms: 500,
            broadcast_formats: vec![FormatTag::text()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub timeout_ms: u64,
}

impl RenderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    pub max_frame_bytes: usize,
    pub outbound_queue_depth: usize,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            max_frame_bytes: 16 * 1024 * 1024,
            outbound_queue_depth: 64,
        }
    }
}
