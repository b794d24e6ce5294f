//! Panel configuration
//!
//! Loaded from TOML. Every field has a default so an empty file is valid.
//!
//! ```toml
//! host = "10.0.0.5"
//! port = 9000
//! input_counts = "1005,1005,1005,1005,1005"
//! output_counts = "0,0,0,0,0"
//! auto_take = false
//! reset_after_take = false
//!
//! [session]
//! probe_interval_ms = 3000
//! ```

use matrixlink_client::SessionConfig;
use matrixlink_core::{TreePath, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{PanelError, Result};
use crate::matrix::{MatrixKind, DEFAULT_HISTORY_LIMIT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Device address
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-matrix input counts used before the device is reachable
    #[serde(default = "default_input_counts")]
    pub input_counts: String,
    /// Per-matrix output counts used before the device is reachable
    #[serde(default = "default_output_counts")]
    pub output_counts: String,
    /// Route as soon as a source is picked
    #[serde(default)]
    pub auto_take: bool,
    /// Clear the selection after every take
    #[serde(default)]
    pub reset_after_take: bool,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default)]
    pub session: SessionSettings,
}

/// Connection timing, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_reconnect_max_interval_ms")]
    pub reconnect_max_interval_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_input_counts() -> String {
    "1005,1005,1005,1005,1005".to_string()
}

fn default_output_counts() -> String {
    "0,0,0,0,0".to_string()
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_probe_interval_ms() -> u64 {
    3_000
}

fn default_probe_path() -> String {
    "1".to_string()
}

fn default_reconnect_interval_ms() -> u64 {
    1_000
}

fn default_reconnect_max_interval_ms() -> u64 {
    30_000
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_path: default_probe_path(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            reconnect_max_interval_ms: default_reconnect_max_interval_ms(),
        }
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            input_counts: default_input_counts(),
            output_counts: default_output_counts(),
            auto_take: false,
            reset_after_take: false,
            history_limit: default_history_limit(),
            session: SessionSettings::default(),
        }
    }
}

impl PanelConfig {
    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading config from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// `host:port` of the device
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Offline (inputs, outputs) per matrix, in [`MatrixKind::ALL`] order
    pub fn offline_counts(&self) -> Vec<(u32, u32)> {
        let inputs = parse_counts(&self.input_counts);
        let outputs = parse_counts(&self.output_counts);
        (0..MatrixKind::ALL.len())
            .map(|i| {
                (
                    inputs.get(i).copied().unwrap_or(0),
                    outputs.get(i).copied().unwrap_or(0),
                )
            })
            .collect()
    }

    /// Session timing for a [`ConnectionSession`](matrixlink_client::ConnectionSession)
    pub fn session_config(&self) -> Result<SessionConfig> {
        let probe_path = TreePath::parse(&self.session.probe_path).map_err(|e| {
            PanelError::Config(format!("probe_path '{}': {}", self.session.probe_path, e))
        })?;
        if self.session.probe_interval_ms == 0 {
            return Err(PanelError::Config("probe_interval_ms must be positive".into()));
        }
        if self.session.reconnect_interval_ms == 0 {
            return Err(PanelError::Config("reconnect_interval_ms must be positive".into()));
        }

        let mut config = SessionConfig::new(self.address());
        config.request_timeout = Duration::from_millis(self.session.request_timeout_ms);
        config.probe_interval = Duration::from_millis(self.session.probe_interval_ms);
        config.probe_path = probe_path;
        config.reconnect_interval = Duration::from_millis(self.session.reconnect_interval_ms);
        config.reconnect_max_interval =
            Duration::from_millis(self.session.reconnect_max_interval_ms);
        Ok(config)
    }
}

/// Parse a comma-separated count list. Bad entries count as zero.
pub fn parse_counts(s: &str) -> Vec<u32> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse().unwrap_or_else(|_| {
                warn!("Ignoring invalid count '{}'", part);
                0
            })
        })
        .collect()
}

/// Join counts back into the comma-separated form
pub fn format_counts(counts: impl IntoIterator<Item = u32>) -> String {
    counts
        .into_iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
