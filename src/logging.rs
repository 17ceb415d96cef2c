//! Logging setup for service-container
//!
//! The container emits `tracing` events under the `service_container`
//! target: registrations, provider builds, scope lifecycle and pool slot
//! activity at `DEBUG`, individual resolutions at `TRACE`, pool exhaustion
//! at `WARN`. This module installs a `tracing-subscriber` for applications
//! that do not bring their own.
//!
//! # Features
//!
//! - `logging` - Emit events (default)
//! - `logging-json` - JSON structured output
//! - `logging-pretty` - Human-readable output
//!
//! # Example
//!
//! ```rust,ignore
//! use service_container::logging;
//!
//! // JSON if logging-json is enabled, pretty otherwise
//! logging::init();
//!
//! // Only container events, with pool timing detail
//! logging::builder()
//!     .trace()
//!     .container_only()
//!     .with_thread_names()
//!     .pretty()
//!     .init();
//! ```

use tracing::Level;

/// Target used by every event the container emits
pub const TARGET: &str = "service_container";

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON structured logging
    #[default]
    Json,
    /// Multi-line human-readable output
    Pretty,
    /// Single-line output
    Compact,
}

/// Builder for the logging subscriber
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    respect_env: bool,
    with_file: bool,
    with_line_number: bool,
    with_thread_ids: bool,
    with_thread_names: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            respect_env: true,
            with_file: false,
            with_line_number: false,
            with_thread_ids: false,
            with_thread_names: false,
        }
    }
}

impl LoggingBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum level
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Include per-resolution events
    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    /// Registration, scope and pool activity
    pub fn debug(self) -> Self {
        self.with_level(Level::DEBUG)
    }

    /// Set level to INFO
    pub fn info(self) -> Self {
        self.with_level(Level::INFO)
    }

    /// Only pool exhaustion and other warnings
    pub fn warn(self) -> Self {
        self.with_level(Level::WARN)
    }

    /// Only show events from one target
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Only show events emitted by the container
    pub fn container_only(self) -> Self {
        self.with_target_filter(TARGET)
    }

    /// Ignore `RUST_LOG` and use the configured level and target only
    pub fn ignore_env(mut self) -> Self {
        self.respect_env = false;
        self
    }

    /// Include file names
    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    /// Include line numbers
    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    /// Include thread IDs
    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    /// Include thread names; useful when following pool waits
    pub fn with_thread_names(mut self) -> Self {
        self.with_thread_names = true;
        self
    }

    /// JSON output
    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    /// Pretty output
    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    /// Compact output
    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// The filter directive this builder installs when `RUST_LOG` is unset
    pub fn directive(&self) -> String {
        match self.target {
            Some(target) => format!("{}={}", target, self.level),
            None => self.level.to_string(),
        }
    }

    /// Install the global subscriber.
    ///
    /// Returns `false` if a global subscriber was already installed.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn init(self) -> bool {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let filter = if self.respect_env {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
        } else {
            EnvFilter::new(self.directive())
        };
        let registry = tracing_subscriber::registry().with(filter);

        let layer = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_thread_ids(self.with_thread_ids)
            .with_thread_names(self.with_thread_names)
            .with_target(true);

        match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => registry.with(layer.json()).try_init().is_ok(),
            // Without JSON support the default format degrades to pretty
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => registry.with(layer.pretty()).try_init().is_ok(),
            LogFormat::Pretty => registry.with(layer.pretty()).try_init().is_ok(),
            LogFormat::Compact => registry.with(layer.compact()).try_init().is_ok(),
        }
    }

    /// No subscriber support compiled in
    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn init(self) -> bool {
        false
    }
}

/// Create a logging builder
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Initialize logging with default settings.
///
/// JSON when `logging-json` is enabled, pretty when only `logging-pretty` is.
pub fn init() -> bool {
    if cfg!(feature = "logging-json") {
        init_json()
    } else {
        init_pretty()
    }
}

/// Initialize JSON structured logging
///
/// # Example output
/// ```json
/// {"timestamp":"2026-01-01T00:00:00.000Z","level":"DEBUG","fields":{"message":"Registering service","service":"app::Db","lifetime":"singleton"},"target":"service_container"}
/// ```
pub fn init_json() -> bool {
    builder().json().debug().init()
}

/// Initialize human-readable logging
///
/// # Example output
/// ```text
///   2026-01-01T00:00:00.000Z DEBUG service_container: Disposed scope, scope_id: 3, released: 2
/// ```
pub fn init_pretty() -> bool {
    builder().pretty().debug().init()
}

/// Initialize logging that shows container events only
pub fn init_container_only() -> bool {
    builder().container_only().debug().init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = LoggingBuilder::default();
        assert_eq!(builder.level, Level::DEBUG);
        assert_eq!(builder.format, LogFormat::Json);
        assert!(builder.target.is_none());
        assert!(builder.respect_env);
        assert_eq!(builder.directive(), "DEBUG");
    }

    #[test]
    fn test_builder_chain() {
        let builder = LoggingBuilder::new()
            .trace()
            .pretty()
            .with_file()
            .with_line_number()
            .container_only()
            .ignore_env();

        assert_eq!(builder.level, Level::TRACE);
        assert_eq!(builder.format, LogFormat::Pretty);
        assert!(builder.with_file);
        assert!(builder.with_line_number);
        assert!(!builder.respect_env);
        assert_eq!(builder.target, Some(TARGET));
        assert_eq!(builder.directive(), "service_container=TRACE");
    }
}
