//! Structured logging utilities for the dentry cache monitor.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use dcache_config::logging::*;
//!
//! log_probe_info!("Collector ready", stats_capacity = 4096);
//! log_export_debug!("Drained batch", records = 12);
//! ```
//!
//! None of these macros may be used on the probe hot path: formatting a
//! record allocates.

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const PROBE: &'static str = "PROBE";
    pub const EXPORT: &'static str = "EXPORT";
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
    /// Map a `-v` repetition count onto a level (0 = info).
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === PROBE logging macros ===

#[macro_export]
macro_rules! log_probe_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::PROBE, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_probe_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::PROBE, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_probe_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::PROBE, $($key = $value,)* $msg)
    };
}

// === EXPORT logging macros ===

#[macro_export]
macro_rules! log_export_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::EXPORT, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_export_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::EXPORT, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_export_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::EXPORT, $($key = $value,)* $msg)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::CLI, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::CLI, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::CLI, $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::PROBE, "PROBE");
        assert_eq!(Component::EXPORT, "EXPORT");
        assert_eq!(Component::CLI, "CLI");
    }

    #[test]
    fn test_component_macros_expand() {
        crate::log_probe_debug!("walk", depth = 3);
        crate::log_export_info!("flushed", bytes = 64usize);
        crate::log_cli_warn!("stopped");
    }

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(LogLevel::from_verbosity(0), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(1), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(5), LogLevel::Trace);
        assert_eq!(LogLevel::Warn.as_filter(), "warn");
    }
}
