//! Logging configuration for sync sessions.
//!
//! Sessions log through `tracing`. [`LogConfig`] decides how chatty a session
//! is; [`setup`] installs a subscriber for binaries that want one.

use tracing::Level;

/// Logging configuration for a sync session.
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Base log level for snapsync components
    pub base_level: Level,
    /// Whether to log every state-machine transition
    pub log_phase_transitions: bool,
    /// Whether to log per-page merge details
    pub log_merge_details: bool,
    /// Maximum length for logged field values (to prevent huge logs)
    pub max_field_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: Level::INFO,
            log_phase_transitions: false,
            log_merge_details: false,
            max_field_length: 256,
        }
    }
}

impl LogConfig {
    /// Creates a verbose configuration suitable for debugging.
    pub fn verbose() -> Self {
        Self {
            base_level: Level::TRACE,
            log_phase_transitions: true,
            log_merge_details: true,
            max_field_length: 1024,
        }
    }

    /// Maps the `debug` and `trace` flags of a session configuration.
    ///
    /// `trace` implies `debug`.
    pub fn from_flags(debug: bool, trace: bool) -> Self {
        if trace {
            Self::verbose()
        } else if debug {
            Self {
                base_level: Level::DEBUG,
                log_merge_details: true,
                ..Self::default()
            }
        } else {
            Self::default()
        }
    }
}

/// Logs a state-machine transition when the config asks for it.
#[macro_export]
macro_rules! log_phase {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_phase_transitions {
            tracing::trace!($($arg)*);
        }
    };
}

/// Logs merge details when the config asks for it.
#[macro_export]
macro_rules! log_merge {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_merge_details {
            tracing::debug!($($arg)*);
        }
    };
}

/// Truncates a string to the maximum field length if needed.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    match value.char_indices().nth(max_length) {
        None => value.to_string(),
        Some((cut, _)) => format!("{}...(truncated)", &value[..cut]),
    }
}

/// Utilities for installing a `tracing` subscriber.
pub mod setup {
    use tracing::Level;

    use super::LogConfig;

    /// Configuration for the process-wide subscriber.
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Log level for everything else
        pub level: Level,
        /// Log level for snapsync components specifically
        pub snapsync_level: Level,
        /// Whether to use JSON output format
        pub json_format: bool,
        /// Whether to write to stderr instead of stdout
        pub stderr: bool,
        /// Environment filter override
        pub env_filter: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::INFO,
                snapsync_level: Level::INFO,
                json_format: false,
                stderr: true,
                env_filter: None,
            }
        }
    }

    impl LoggingConfig {
        /// Creates a subscriber configuration matching a session's [`LogConfig`].
        pub fn for_session(log: &LogConfig) -> Self {
            Self {
                snapsync_level: log.base_level,
                ..Self::default()
            }
        }

        /// Sets the log level for snapsync components.
        pub fn with_snapsync_level(mut self, level: Level) -> Self {
            self.snapsync_level = level;
            self
        }

        /// Sets whether to use JSON output format.
        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        /// Sets a custom environment filter.
        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// Builds the environment filter string.
        pub fn env_filter(&self) -> String {
            if let Some(ref filter) = self.env_filter {
                filter.clone()
            } else {
                format!(
                    "{},snapsync={}",
                    self.level.as_str().to_lowercase(),
                    self.snapsync_level.as_str().to_lowercase()
                )
            }
        }
    }

    /// Installs a global subscriber. `RUST_LOG` overrides the configured filter.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use snapsync::logging::setup::{init_logging, LoggingConfig};
    ///
    /// init_logging(LoggingConfig::default().with_json_format(true)).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

        let fmt_layer = match (config.json_format, config.stderr) {
            (true, true) => tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .boxed(),
            (true, false) => tracing_subscriber::fmt::layer().json().boxed(),
            (false, true) => tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .boxed(),
            (false, false) => tracing_subscriber::fmt::layer().boxed(),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.base_level, Level::INFO);
        assert!(!config.log_phase_transitions);
        assert!(!config.log_merge_details);
        assert_eq!(config.max_field_length, 256);
    }

    #[test]
    fn test_log_config_from_flags() {
        assert_eq!(LogConfig::from_flags(false, false), LogConfig::default());

        let debug = LogConfig::from_flags(true, false);
        assert_eq!(debug.base_level, Level::DEBUG);
        assert!(debug.log_merge_details);
        assert!(!debug.log_phase_transitions);

        assert_eq!(LogConfig::from_flags(false, true), LogConfig::verbose());
        assert_eq!(LogConfig::from_flags(true, true), LogConfig::verbose());
    }

    #[test]
    fn test_env_filter_string() {
        let config = setup::LoggingConfig::default().with_snapsync_level(Level::TRACE);
        assert_eq!(config.env_filter(), "info,snapsync=trace");

        let session = setup::LoggingConfig::for_session(&LogConfig::from_flags(true, false));
        assert_eq!(session.env_filter(), "info,snapsync=debug");
        assert!(session.stderr);

        let custom = setup::LoggingConfig::default().with_env_filter("warn");
        assert_eq!(custom.env_filter(), "warn");
    }

    #[test]
    fn test_truncate_field() {
        assert_eq!(truncate_field("hello", 10), "hello");
        assert_eq!(
            truncate_field("this is a very long text that should be truncated", 10),
            "this is a ...(truncated)"
        );
        assert_eq!(truncate_field("ééé", 2), "éé...(truncated)");
    }
}
