//! User-facing configuration for a sync session.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{SyncError, SyncResult};

/// Default delay between the end of a drain and the next scheduled fetch.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Default padding added to every scheduled fetch, and the fast-retry delay.
pub const DEFAULT_PADDING_DELAY: Duration = Duration::from_secs(30);

/// Configuration for a sync session.
///
/// Only `as_of`, `field_derivation_config` and `tz` affect what is computed;
/// the remaining options control scheduling and logging.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    refresh_interval: Duration,
    padding_delay: Duration,
    as_of: Option<DateTime<Utc>>,
    field_derivation_config: Option<Value>,
    tz: Option<String>,
    debug: bool,
    trace: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncConfig {
    /// Creates a configuration with default scheduling that tracks "now".
    pub fn new() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            padding_delay: DEFAULT_PADDING_DELAY,
            as_of: None,
            field_derivation_config: None,
            tz: None,
            debug: false,
            trace: false,
        }
    }

    /// Set the delay between a completed drain and the next fetch.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the padding added to scheduled fetches.
    pub fn with_padding_delay(mut self, delay: Duration) -> Self {
        self.padding_delay = delay;
        self
    }

    /// Pin the session to a historical instant.
    pub fn with_as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    /// Set the opaque configuration handed to the field-derivation step.
    pub fn with_field_derivation_config(mut self, config: Value) -> Self {
        self.field_derivation_config = Some(config);
        self
    }

    /// Override the workspace time zone for the calculator.
    pub fn with_tz(mut self, tz: impl Into<String>) -> Self {
        self.tz = Some(tz.into());
        self
    }

    /// Enable debug logging.
    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Enable per-phase trace logging.
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    /// Get the refresh interval.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Get the padding delay.
    pub fn padding_delay(&self) -> Duration {
        self.padding_delay
    }

    /// Delay before the next fetch once the backlog is drained.
    pub fn scheduled_delay(&self) -> Duration {
        self.refresh_interval + self.padding_delay
    }

    /// Get the historical pin, if any.
    pub fn as_of(&self) -> Option<DateTime<Utc>> {
        self.as_of
    }

    /// Get the field-derivation configuration.
    pub fn field_derivation_config(&self) -> Option<&Value> {
        self.field_derivation_config.as_ref()
    }

    /// Get the time zone override.
    pub fn tz(&self) -> Option<&str> {
        self.tz.as_deref()
    }

    /// Whether debug logging is enabled.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Whether trace logging is enabled.
    pub fn trace(&self) -> bool {
        self.trace
    }
}

/// On-disk form of a session configuration.
///
/// ```json
/// {
///   "refreshIntervalMs": 1800000,
///   "paddingDelayMs": 30000,
///   "asOf": "2024-01-15T00:00:00Z",
///   "tz": "America/Denver",
///   "calculatorConfig": { "groupBy": "ScheduleState" }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfigFile {
    #[serde(default)]
    pub refresh_interval_ms: Option<u64>,
    #[serde(default)]
    pub padding_delay_ms: Option<u64>,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
    #[serde(default, alias = "deriveFieldsOnSnapshotsConfig")]
    pub field_derivation_config: Option<Value>,
    #[serde(default)]
    pub tz: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub trace: bool,
    #[serde(default)]
    pub calculator_config: Option<Map<String, Value>>,
}

impl SyncConfigFile {
    /// Parses a configuration document.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SyncError::configuration(format!("Invalid config document: {e}")))
    }

    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::configuration(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Splits into the session configuration and the calculator configuration.
    pub fn into_parts(self) -> (SyncConfig, Option<Map<String, Value>>) {
        let mut config = SyncConfig::new()
            .with_debug(self.debug)
            .with_trace(self.trace);
        if let Some(ms) = self.refresh_interval_ms {
            config = config.with_refresh_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.padding_delay_ms {
            config = config.with_padding_delay(Duration::from_millis(ms));
        }
        if let Some(as_of) = self.as_of {
            config = config.with_as_of(as_of);
        }
        if let Some(derivation) = self.field_derivation_config {
            config = config.with_field_derivation_config(derivation);
        }
        if let Some(tz) = self.tz {
            config = config.with_tz(tz);
        }
        (config, self.calculator_config)
    }
}
