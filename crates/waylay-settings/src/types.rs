//! Settings type definitions.
//!
//! All types use camelCase JSON and `#[serde(default)]`, so a settings file
//! only needs the keys it changes.

use serde::{Deserialize, Serialize};
use waylay_core::hooks::HookSetup;

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "hooks": { "defaultRules": [{ "uuidMask": "^billing", "action": "pass-through" }] }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WaylaySettings {
    /// Settings schema version.
    pub version: String,
    /// WebSocket endpoint.
    pub server: ServerSettings,
    /// Hook router seeding.
    pub hooks: HookSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for WaylaySettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            hooks: HookSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl WaylaySettings {
    /// Reject values the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.server.ws_path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.wsPath must start with '/', got '{}'",
                self.server.ws_path
            )));
        }
        if self.server.outbound_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundCapacity must be at least 1".to_string(),
            ));
        }
        if self.server.ping_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.pingIntervalMs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// WebSocket endpoint settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Path of the WebSocket upgrade route.
    pub ws_path: String,
    /// Frames buffered per peer before new ones are dropped.
    pub outbound_capacity: usize,
    /// Interval between keep-alive pings.
    pub ping_interval_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7420,
            ws_path: "/ws".to_string(),
            outbound_capacity: 256,
            ping_interval_ms: 30_000,
        }
    }
}

/// Hook router settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HookSettings {
    /// Rules the hub's router starts with, newest last (the last entry is
    /// evaluated first, as if added in order).
    pub default_rules: Vec<HookSetup>,
    /// How often expired queue entries are dropped.
    pub prune_interval_ms: u64,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            default_rules: Vec::new(),
            prune_interval_ms: 10_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
