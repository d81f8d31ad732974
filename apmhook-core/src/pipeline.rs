//! Host pipeline contract
//!
//! Types the host hands to the hooks and the [`LifecyclePlugin`] trait it
//! drives. The host decides when hooks fire; a plugin only reacts.
//!
//! ```text
//! on_request_enter
//!   ├── on_query_start / on_query_end
//!   ├── on_call_start ── on_call_end      (per outbound call, may overlap)
//!   └── ...
//! on_request_exit
//! ```

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::carrier::RequestContext;

// ============================================================================
// Headers
// ============================================================================

/// Multi-valued header map. Names are kept verbatim and every value added
/// under a name is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any existing values for the name.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.entry(name.into()).or_default().push(value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every (name, value) pair, one per stored value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(name, values)| {
            values
                .iter()
                .map(move |value| (name.as_str(), value.as_str()))
        })
    }

    /// Number of stored values across all names.
    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.add(name, value);
        }
        headers
    }
}

// ============================================================================
// Bodies
// ============================================================================

/// A body the host attached to an outbound call. It is serialized to JSON
/// only when the adapter needs bytes, and that may fail.
pub trait BodyPayload: fmt::Debug + Send + Sync {
    fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>>;
}

impl<T> BodyPayload for T
where
    T: Serialize + fmt::Debug + Send + Sync,
{
    fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

// ============================================================================
// Inbound transaction
// ============================================================================

/// Request metadata available when a request enters the pipeline
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub method: String,
    pub url: Url,
    pub headers: Headers,
}

impl TransactionRequest {
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into(),
            url,
            headers: Headers::new(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// The response the pipeline is about to send back
#[derive(Debug, Clone, Default)]
pub struct TransactionResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: Headers,
}

impl TransactionResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

// ============================================================================
// Outbound calls
// ============================================================================

/// An outbound HTTP call the pipeline makes on behalf of a request
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: String,
    pub scheme: String,
    pub host: String,
    /// Path including any query string, exactly as the pipeline built it
    pub path: String,
    pub headers: Headers,
    pub body: Arc<dyn BodyPayload>,
}

impl OutboundRequest {
    /// A call with a JSON `null` body.
    pub fn new(
        method: impl Into<String>,
        scheme: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            scheme: scheme.into(),
            host: host.into(),
            path: path.into(),
            headers: Headers::new(),
            body: Arc::new(serde_json::Value::Null),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body<B>(mut self, body: B) -> Self
    where
        B: BodyPayload + 'static,
    {
        self.body = Arc::new(body);
        self
    }
}

/// The outcome of an outbound call
#[derive(Debug, Clone, Default)]
pub struct OutboundResponse {
    pub status: u16,
    pub headers: Headers,
    pub duration: Duration,
}

impl OutboundResponse {
    pub fn new(status: u16, duration: Duration) -> Self {
        Self {
            status,
            headers: Headers::new(),
            duration,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// Error the pipeline observed while performing an outbound call
pub type CallError = dyn Error + Send + Sync;

// ============================================================================
// Queries
// ============================================================================

/// Identity of the query being resolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryContext {
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub revision: Option<u32>,
}

/// Serialize a `Url` as its string form.
pub(crate) fn serialize_url<S>(url: &Url, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(url.as_str())
}

// ============================================================================
// Hook surface
// ============================================================================

/// Hooks a host pipeline invokes on a lifecycle plugin.
///
/// Every hook takes the current context view and returns the view downstream
/// stages must use. Hooks never fail: a plugin that cannot do its job returns
/// the view it was given.
pub trait LifecyclePlugin: Send + Sync {
    fn name(&self) -> &str;

    /// The request entered the pipeline.
    fn on_request_enter(&self, ctx: RequestContext, request: &TransactionRequest)
        -> RequestContext;

    /// The request is leaving the pipeline with `response`.
    fn on_request_exit(&self, ctx: RequestContext, response: &TransactionResponse)
        -> RequestContext;

    fn on_query_start(
        &self,
        ctx: RequestContext,
        _query: &str,
        _query_ctx: &QueryContext,
    ) -> RequestContext {
        ctx
    }

    fn on_query_end(
        &self,
        ctx: RequestContext,
        _query: &str,
        _result: &serde_json::Value,
    ) -> RequestContext {
        ctx
    }

    /// An outbound call is about to be sent.
    fn on_call_start(&self, ctx: RequestContext, request: &OutboundRequest) -> RequestContext;

    /// An outbound call finished, successfully or not.
    fn on_call_end(
        &self,
        ctx: RequestContext,
        request: &OutboundRequest,
        response: &OutboundResponse,
        error: Option<&CallError>,
    ) -> RequestContext;
}
