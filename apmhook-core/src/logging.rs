//! Logging surface used by the adapter
//!
//! Hooks never return errors to the host; every soft failure is reported
//! through a [`PluginLogger`] instead. The default implementation forwards to
//! `tracing`.

use std::error::Error;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the `EnvFilter` directive for [`init_tracing`]
pub const LOG_ENV: &str = "APM_LOG";

/// Leveled logger injected into the plugin by the host
pub trait PluginLogger: Send + Sync {
    fn error(&self, message: &str, err: &dyn Error);
    fn debug(&self, message: &str);
}

/// Forwards plugin log lines to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl PluginLogger for TracingLogger {
    fn error(&self, message: &str, err: &dyn Error) {
        tracing::error!(target: "apmhook", error = %err, "{}", message);
    }

    fn debug(&self, message: &str) {
        tracing::debug!(target: "apmhook", "{}", message);
    }
}

/// Install a stderr fmt subscriber for hosts that do not configure their own.
///
/// The filter comes from `APM_LOG`, falling back to `default_directive`.
/// Calling this more than once is harmless.
pub fn init_tracing(default_directive: &str) {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_logger_accepts_plain_errors() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        TracingLogger.error("something failed", &err);
        TracingLogger.debug("still running");
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing("warn");
        init_tracing("debug");
    }
}
