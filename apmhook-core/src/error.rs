//! Error types for the APM lifecycle adapter
//!
//! Only [`BackendInitError`] ever leaves the adapter. Everything else is
//! absorbed at the hook boundary: logged through the plugin logger and the
//! request context handed back untouched.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which adapter-owned context slot a lookup targeted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Transaction,
    ResponseSink,
    Segment,
    ExternalRequest,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Slot::Transaction => "transaction",
            Slot::ResponseSink => "response-sink",
            Slot::Segment => "external-segment",
            Slot::ExternalRequest => "external-request",
        };
        f.write_str(name)
    }
}

/// A context slot was absent, or held a handle that is no longer usable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextLookupError {
    /// Nothing was stored under the slot in this context view
    #[error("expected {expected} in `{slot}` slot, found nothing")]
    Missing { slot: Slot, expected: &'static str },

    /// The slot holds a handle that was already closed
    #[error("{expected} in `{slot}` slot is already closed")]
    Closed { slot: Slot, expected: &'static str },
}

impl ContextLookupError {
    pub fn slot(&self) -> Slot {
        match self {
            ContextLookupError::Missing { slot, .. } | ContextLookupError::Closed { slot, .. } => {
                *slot
            }
        }
    }
}

/// Direction of an outbound call payload being mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => f.write_str("request"),
            Direction::Response => f.write_str("response"),
        }
    }
}

/// An outbound call could not be translated into the backend shape
#[derive(Error, Debug)]
pub enum MappingError {
    #[error("failed to serialize outbound call body for the external {direction}")]
    Body {
        direction: Direction,
        #[source]
        source: serde_json::Error,
    },
}

/// The backend declined to open a transaction (disabled or not initialized)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("APM backend did not start transaction `{transaction}`")]
pub struct BackendUnavailable {
    pub transaction: String,
}

/// Configuration could not be loaded
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {name} value: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("failed to read APM config from {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse APM config")]
    Yaml(#[from] serde_yaml_ng::Error),
}

/// The APM backend failed to initialize. Fatal: surfaced to whoever
/// constructs the plugin so the host can run without telemetry or abort.
#[derive(Error, Debug)]
pub enum BackendInitError {
    #[error("APM application name is required when the agent is enabled")]
    MissingAppName,

    #[error("invalid APM configuration")]
    Config(#[from] ConfigError),
}
