//! Span records produced by the recording backend.
//!
//! The record hierarchy mirrors what the plugin drives:
//!
//! ```text
//! TransactionRecord (root - one per inbound request)
//!   ├── name "<verb> <path>", request, attributes {query}
//!   ├── response (status, headers, body size from the sink)
//!   │
//!   ├── SegmentRecord kind=internal  "Flush"            scope 0
//!   └── SegmentRecord kind=external  "External/host/http" scope 1..n
//!         └── method, url, status, attributes {errordetail}
//! ```
//!
//! Segments reference their transaction only through `trace_id` and
//! `parent_span_id`; a record never keeps a transaction alive.

use serde::Serialize;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use super::{Attributes, SinkState, WebRequest};
use crate::pipeline::Headers;

// ============================================================================
// Helper Functions
// ============================================================================

/// Generate a unique 16-character hex span ID (8 bytes).
pub(crate) fn generate_span_id() -> String {
    let uuid = Uuid::now_v7();
    hex::encode(&uuid.as_bytes()[8..16])
}

/// Generate a 32-character hex trace ID (UUID v7, time-ordered).
pub(crate) fn generate_trace_id() -> String {
    hex::encode(Uuid::now_v7().as_bytes())
}

/// Convert SystemTime to nanoseconds since Unix epoch.
fn system_time_to_nanos(time: &SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Serialize SystemTime as RFC3339 string.
fn serialize_system_time<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use chrono::{DateTime, Utc};
    let datetime: DateTime<Utc> = (*time).into();
    serializer.serialize_str(&datetime.to_rfc3339())
}

// ============================================================================
// Transaction
// ============================================================================

/// A finished (or in-flight) transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRecord {
    pub trace_id: String,
    pub span_id: String,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,

    #[serde(serialize_with = "serialize_system_time")]
    pub timestamp: SystemTime,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<WebRequest>,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseRecord>,

    /// Call scopes derived from this transaction
    pub scopes: u32,

    pub duration_ms: u64,

    #[serde(skip)]
    start_instant: Option<Instant>,
}

impl TransactionRecord {
    pub fn new(name: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            trace_id: generate_trace_id(),
            span_id: generate_span_id(),
            start_time_unix_nano: system_time_to_nanos(&now),
            end_time_unix_nano: 0,
            timestamp: now,
            name: name.into(),
            request: None,
            attributes: Attributes::new(),
            response: None,
            scopes: 0,
            duration_ms: 0,
            start_instant: Some(Instant::now()),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.end_time_unix_nano != 0
    }

    /// Set end time and duration. Later calls are no-ops.
    pub fn finalize(&mut self) {
        if let Some(start) = self.start_instant.take() {
            self.end_time_unix_nano = system_time_to_nanos(&SystemTime::now())
                .max(self.start_time_unix_nano + 1);
            self.duration_ms = start.elapsed().as_millis() as u64;
        }
    }
}

/// Response shape observed through the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    pub body_bytes: usize,
}

impl From<SinkState> for ResponseRecord {
    fn from(state: SinkState) -> Self {
        Self {
            status: state.status,
            headers: state.headers,
            body_bytes: state.body.len(),
        }
    }
}

// ============================================================================
// Segments
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Internal,
    External,
}

/// A finished segment inside a transaction.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentRecord {
    pub trace_id: String,
    pub span_id: String,
    /// Span id of the owning transaction
    pub parent_span_id: String,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,

    pub name: String,
    pub kind: SegmentKind,

    /// 0 for the transaction itself, n for the n-th call scope
    pub scope: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalCall>,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,

    pub duration_ms: u64,

    #[serde(skip)]
    start_instant: Option<Instant>,
}

/// Outbound call details of an external segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalCall {
    pub method: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl SegmentRecord {
    pub fn new(
        name: impl Into<String>,
        kind: SegmentKind,
        trace_id: String,
        parent_span_id: String,
        scope: u32,
    ) -> Self {
        Self {
            trace_id,
            span_id: generate_span_id(),
            parent_span_id,
            start_time_unix_nano: system_time_to_nanos(&SystemTime::now()),
            end_time_unix_nano: 0,
            name: name.into(),
            kind,
            scope,
            external: None,
            attributes: Attributes::new(),
            duration_ms: 0,
            start_instant: Some(Instant::now()),
        }
    }

    pub fn finalize(&mut self) {
        if let Some(start) = self.start_instant.take() {
            self.end_time_unix_nano = system_time_to_nanos(&SystemTime::now())
                .max(self.start_time_unix_nano + 1);
            self.duration_ms = start.elapsed().as_millis() as u64;
        }
    }
}

// ============================================================================
// Custom events
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CustomEventRecord {
    pub event_type: String,
    #[serde(serialize_with = "serialize_system_time")]
    pub timestamp: SystemTime,
    pub attributes: Attributes,
}

impl CustomEventRecord {
    pub fn new(event_type: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: SystemTime::now(),
            attributes,
        }
    }
}
