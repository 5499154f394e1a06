//! Structured logging utilities for ctools components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use ctools_config::{log_audit_warn, log_cli_info};
//!
//! log_audit_warn!(member = %path, "hash mismatch");
//! log_cli_info!(envs = 3, "scanning environments");
//! ```

/// Variable consulted first for the log filter
pub const LOG_ENV_VAR: &str = "CTOOLS_LOG";

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const ENV: &'static str = "ENV";
    pub const AUDIT: &'static str = "AUDIT";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Map a `-v` count onto a level, starting from `Warn`.
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === ENV logging macros ===

#[macro_export]
macro_rules! log_env_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = "ENV", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_env_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = "ENV", $($arg)+)
    };
}

// === AUDIT logging macros ===

#[macro_export]
macro_rules! log_audit_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = "AUDIT", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_audit_info {
    ($($arg:tt)+) => {
        tracing::info!(component = "AUDIT", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_audit_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = "AUDIT", $($arg)+)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($($arg:tt)+) => {
        tracing::info!(component = "CLI", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = "CLI", $($arg)+)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
///
/// `CTOOLS_LOG` wins over `RUST_LOG`, which wins over `level`. Output goes
/// to stderr so command output on stdout stays machine readable.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
