//! Logging facade and subscriber setup
//!
//! This module provides the [`Logger`] used by every component. A logger is named
//! after the component that owns it (`registry.client`, `registry.tasks.PurgeOldTags`,
//! ...) and forwards messages to `tracing` with that name attached as the
//! `logger` field, so log lines from background jobs stay attributable.

use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Component-scoped logger
#[derive(Debug, Clone)]
pub struct Logger {
    name: String,
    start_time: Instant,
}

impl Logger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_time: Instant::now(),
        }
    }

    /// Main section heading
    pub fn section(&self, title: &str) {
        tracing::info!(logger = %self.name, "=== {} ===", title);
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(logger = %self.name, "{}", message);
    }

    /// Detailed information (only shown at debug level)
    pub fn detail(&self, message: &str) {
        tracing::debug!(logger = %self.name, "   {}", message);
    }

    /// Information message
    pub fn info(&self, message: &str) {
        tracing::info!(logger = %self.name, "{}", message);
    }

    /// Success message
    pub fn success(&self, message: &str) {
        tracing::info!(logger = %self.name, outcome = "success", "{}", message);
    }

    /// Warning message
    pub fn warning(&self, message: &str) {
        tracing::warn!(logger = %self.name, "{}", message);
    }

    /// Error message
    pub fn error(&self, message: &str) {
        tracing::error!(logger = %self.name, "{}", message);
    }

    /// Time since this logger was created
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Format duration in human-readable format
    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{:.2}s", duration.as_secs_f64())
        } else if secs < 3600 {
            format!("{}m{}s", secs / 60, secs % 60)
        } else {
            format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `debug` selects the debug level for this
/// crate and info for everything else. Calling this twice is harmless.
pub fn init(debug: bool) {
    let default_directive = if debug {
        "info,registry_ui=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_units() {
        let logger = Logger::new("test");
        assert_eq!(logger.format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(logger.format_duration(Duration::from_secs(125)), "2m5s");
        assert_eq!(logger.format_duration(Duration::from_secs(3725)), "1h2m5s");
    }

    #[test]
    fn init_is_idempotent() {
        init(false);
        init(true);
    }
}
