//! APM backend contract.
//!
//! The adapter drives an existing tracing session API and never implements
//! one. These traits are the seam: anything that can open transactions and
//! segments can sit behind the plugin.
//!
//! ```text
//! ApmBackend
//!   ├── start_transaction(name) ─► Transaction
//!   │     ├── set_web_request / set_web_response / add_attribute
//!   │     ├── start_segment("Flush") ─► Segment
//!   │     └── new_scope() ─► Transaction (call scope)
//!   │           └── start_external_segment(req) ─► ExternalSegment
//!   └── record_custom_event(type, attributes)
//! ```
//!
//! [`recorder::RecordingBackend`] is the in-process implementation.

pub mod recorder;
pub mod span;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use url::Url;

use crate::pipeline::{serialize_url, BodyPayload, Headers};

pub use recorder::{BackendStats, Harvest, RecordingBackend};

// ============================================================================
// Traits
// ============================================================================

/// Entry point of an APM backend
pub trait ApmBackend: Send + Sync {
    /// Start a transaction, or `None` when the backend cannot track one
    /// (disabled, not connected).
    fn start_transaction(&self, name: &str) -> Option<Arc<dyn Transaction>>;

    fn record_custom_event(&self, event_type: &str, attributes: Attributes);
}

/// One open transaction. Shared by concurrent outbound calls, so every method
/// takes `&self` and implementations synchronize internally.
pub trait Transaction: Send + Sync {
    fn set_web_request(&self, request: WebRequest);

    /// Register the sink the backend reads response shape from at `end`.
    fn set_web_response(&self, sink: Arc<ResponseSink>);

    fn add_attribute(&self, key: &str, value: AttributeValue);

    fn start_segment(&self, name: &str) -> Box<dyn Segment>;

    /// A logical child unit of work. Segments started from the returned
    /// transaction are attributed to that unit.
    fn new_scope(&self) -> Arc<dyn Transaction>;

    fn start_external_segment(&self, request: &ExternalRequest) -> Box<dyn ExternalSegment>;

    fn end(&self);
}

/// A named span inside a transaction. Consumed by `end`.
pub trait Segment: Send {
    fn end(self: Box<Self>);
}

/// A span tracking exactly one outbound call. Consumed by `end`.
pub trait ExternalSegment: Send {
    fn add_attribute(&mut self, key: &str, value: AttributeValue);

    fn set_response(&mut self, response: ExternalResponse);

    fn end(self: Box<Self>);
}

// ============================================================================
// Attributes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

pub type Attributes = BTreeMap<String, AttributeValue>;

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<u16> for AttributeValue {
    fn from(value: u16) -> Self {
        AttributeValue::Int(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

// ============================================================================
// Web request / response
// ============================================================================

/// Inbound request metadata attached to a transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebRequest {
    pub method: String,
    #[serde(serialize_with = "serialize_url")]
    pub url: Url,
    pub headers: Headers,
}

/// Write-only response target registered with a transaction.
///
/// The backend reads it to infer the response shape; the real response is
/// written by the pipeline elsewhere.
#[derive(Debug, Default)]
pub struct ResponseSink {
    state: Mutex<SinkState>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SinkState {
    pub status: Option<u16>,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl ResponseSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_header(&self, name: &str, value: &str) {
        self.state().headers.add(name, value);
    }

    /// Record the status. Only the first status written is kept.
    pub fn write_header(&self, status: u16) {
        let mut state = self.state();
        if state.status.is_none() {
            state.status = Some(status);
        }
    }

    /// Append body bytes, returning how many were accepted.
    pub fn write(&self, body: &[u8]) -> usize {
        self.state().body.extend_from_slice(body);
        body.len()
    }

    pub fn snapshot(&self) -> SinkState {
        self.state().clone()
    }
}

// ============================================================================
// External calls
// ============================================================================

/// An outbound call in the shape the backend's external segment expects
#[derive(Debug, Clone)]
pub struct ExternalRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// The pipeline's original body, kept for the response wrapper
    pub payload: Arc<dyn BodyPayload>,
}

/// The outcome of an outbound call, linked to its request
#[derive(Debug, Clone)]
pub struct ExternalResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub request: Arc<ExternalRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_keeps_first_status() {
        let sink = ResponseSink::new();
        sink.write_header(200);
        sink.write_header(500);
        assert_eq!(sink.snapshot().status, Some(200));
    }

    #[test]
    fn test_sink_appends_body_and_headers() {
        let sink = ResponseSink::new();
        sink.add_header("Content-Type", "application/json");
        assert_eq!(sink.write(b"{\"ok\":"), 6);
        sink.write(b"true}");

        let state = sink.snapshot();
        assert_eq!(state.body, b"{\"ok\":true}".to_vec());
        assert_eq!(state.headers.get("Content-Type"), Some("application/json"));
    }

    #[test]
    fn test_attribute_values_serialize_untagged() {
        let mut attrs = Attributes::new();
        attrs.insert("query".into(), "id=7".into());
        attrs.insert("status".into(), 503u16.into());
        attrs.insert("cached".into(), false.into());

        let json = serde_json::to_string(&attrs).unwrap();
        assert_eq!(json, r#"{"cached":false,"query":"id=7","status":503}"#);
    }

    #[test]
    fn test_attribute_accessors() {
        assert_eq!(AttributeValue::from("x").as_str(), Some("x"));
        assert_eq!(AttributeValue::from(3i64).as_int(), Some(3));
        assert_eq!(AttributeValue::from(1.5).as_str(), None);
    }
}
