//! Configuration loading for the session engine
//!
//! Settings resolve in priority order:
//! 1. Explicit caller-supplied value (highest)
//! 2. Environment variable
//! 3. TOML config file (`<config dir>/harmonia/config.toml`)
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the session store endpoint
pub const STORE_URL_ENV: &str = "HARMONIA_STORE_URL";

/// Tunable policy values for the session engine.
///
/// The throttle/collapse values bound outbound push rate without queuing;
/// see the sync channel for how they are applied.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the remote session store
    pub store_url: String,
    /// Periodic push cadence while playing (default 5s)
    pub push_interval: Duration,
    /// Window within which a second immediate push is dropped (default 2s)
    pub push_collapse_window: Duration,
    /// First reconnect delay after transport loss (default 1s)
    pub reconnect_backoff_initial: Duration,
    /// Reconnect delay ceiling (default 30s)
    pub reconnect_backoff_max: Duration,
    /// Retry cadence for the presence roster request while disconnected (default 2s)
    pub presence_poll_interval: Duration,
    /// Device jump is forced only when seek target differs from the
    /// device-reported position by more than this (default 1.0s)
    pub seek_force_threshold_seconds: f64,
    /// Defer before re-issuing "start" on a repeat-one restart (default 50ms)
    pub restart_defer: Duration,
    /// "Previous" below this position goes to the prior track; at or above it
    /// restarts the current one (default 3.0s)
    pub previous_restart_threshold_seconds: f64,
    /// EventBus buffer capacity (default 256)
    pub event_bus_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_url: "http://localhost:8081".to_string(),
            push_interval: Duration::from_secs(5),
            push_collapse_window: Duration::from_secs(2),
            reconnect_backoff_initial: Duration::from_secs(1),
            reconnect_backoff_max: Duration::from_secs(30),
            presence_poll_interval: Duration::from_secs(2),
            seek_force_threshold_seconds: 1.0,
            restart_defer: Duration::from_millis(50),
            previous_restart_threshold_seconds: 3.0,
            event_bus_capacity: 256,
        }
    }
}

/// On-disk representation (`[session]` table of config.toml); every field
/// optional so a partial file only overrides what it names.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    session: FileSessionTable,
}

#[derive(Debug, Default, Deserialize)]
struct FileSessionTable {
    store_url: Option<String>,
    push_interval_ms: Option<u64>,
    push_collapse_window_ms: Option<u64>,
    reconnect_backoff_initial_ms: Option<u64>,
    reconnect_backoff_max_ms: Option<u64>,
    presence_poll_interval_ms: Option<u64>,
    seek_force_threshold_seconds: Option<f64>,
    restart_defer_ms: Option<u64>,
    previous_restart_threshold_seconds: Option<f64>,
    event_bus_capacity: Option<usize>,
}

impl SessionConfig {
    /// Load configuration, resolving the store URL per the priority order.
    ///
    /// `store_url_arg` is the caller-supplied (e.g. CLI) value, if any.
    pub fn load(store_url_arg: Option<&str>) -> Result<Self> {
        let mut config = match default_config_path() {
            Some(path) if path.exists() => {
                tracing::debug!("Loading session config from {}", path.display());
                Self::from_file(&path)?
            }
            _ => Self::default(),
        };

        if let Ok(url) = std::env::var(STORE_URL_ENV) {
            config.store_url = url;
        }
        if let Some(url) = store_url_arg {
            config.store_url = url.to_string();
        }

        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a TOML document, applying defaults for anything unspecified.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid config file: {}", e)))?;
        let t = file.session;
        let d = Self::default();

        Ok(Self {
            store_url: t.store_url.unwrap_or(d.store_url),
            push_interval: t
                .push_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(d.push_interval),
            push_collapse_window: t
                .push_collapse_window_ms
                .map(Duration::from_millis)
                .unwrap_or(d.push_collapse_window),
            reconnect_backoff_initial: t
                .reconnect_backoff_initial_ms
                .map(Duration::from_millis)
                .unwrap_or(d.reconnect_backoff_initial),
            reconnect_backoff_max: t
                .reconnect_backoff_max_ms
                .map(Duration::from_millis)
                .unwrap_or(d.reconnect_backoff_max),
            presence_poll_interval: t
                .presence_poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(d.presence_poll_interval),
            seek_force_threshold_seconds: t
                .seek_force_threshold_seconds
                .unwrap_or(d.seek_force_threshold_seconds),
            restart_defer: t
                .restart_defer_ms
                .map(Duration::from_millis)
                .unwrap_or(d.restart_defer),
            previous_restart_threshold_seconds: t
                .previous_restart_threshold_seconds
                .unwrap_or(d.previous_restart_threshold_seconds),
            event_bus_capacity: t.event_bus_capacity.unwrap_or(d.event_bus_capacity),
        })
    }
}

/// Default platform config file path (`<config dir>/harmonia/config.toml`)
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("harmonia").join("config.toml"))
}
