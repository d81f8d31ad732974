//! RecordingBackend - in-process `ApmBackend` that keeps finished records.
//!
//! Transactions, segments and custom events are stored in a shared harvest
//! when they end. A host can export the harvest on its own schedule
//! ([`RecordingBackend::drain`]); the counters in [`BackendStats`] make every
//! start/end observable, which is what the lifecycle tests rely on.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use super::span::{
    CustomEventRecord, ExternalCall, ResponseRecord, SegmentKind, SegmentRecord,
    TransactionRecord,
};
use super::{
    ApmBackend, AttributeValue, Attributes, ExternalRequest, ExternalResponse, ExternalSegment,
    ResponseSink, Segment, Transaction, WebRequest,
};
use crate::config::AgentConfig;
use crate::error::BackendInitError;

/// Start/end counters, one pair per tracked object kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    pub transactions_started: u64,
    pub transactions_ended: u64,
    pub segments_started: u64,
    pub segments_ended: u64,
    pub external_segments_started: u64,
    pub external_segments_ended: u64,
    pub custom_events: u64,
}

impl BackendStats {
    /// Total number of backend calls that opened, closed or recorded something.
    pub fn total(&self) -> u64 {
        self.transactions_started
            + self.transactions_ended
            + self.segments_started
            + self.segments_ended
            + self.external_segments_started
            + self.external_segments_ended
            + self.custom_events
    }
}

/// Finished records awaiting export
#[derive(Debug, Clone, Default, Serialize)]
pub struct Harvest {
    pub transactions: Vec<TransactionRecord>,
    pub segments: Vec<SegmentRecord>,
    pub custom_events: Vec<CustomEventRecord>,
    /// Transactions discarded because `max_samples_stored` was reached
    pub dropped_transactions: u64,
}

impl Harvest {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.segments.is_empty() && self.custom_events.is_empty()
    }

    pub fn segments_of<'a>(
        &'a self,
        transaction: &'a TransactionRecord,
    ) -> impl Iterator<Item = &'a SegmentRecord> + 'a {
        self.segments
            .iter()
            .filter(move |s| s.parent_span_id == transaction.span_id)
    }
}

#[derive(Debug, Default)]
struct State {
    harvest: Harvest,
    stats: BackendStats,
}

#[derive(Debug)]
struct Recorder {
    app_name: String,
    enabled: bool,
    max_samples_stored: usize,
    state: Mutex<State>,
}

impl Recorder {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_transaction(&self, record: TransactionRecord) {
        let mut state = self.state();
        state.stats.transactions_ended += 1;
        if state.harvest.transactions.len() < self.max_samples_stored {
            state.harvest.transactions.push(record);
        } else {
            state.harvest.dropped_transactions += 1;
            debug!(
                app = %self.app_name,
                transaction = %record.name,
                limit = self.max_samples_stored,
                "transaction event limit reached, dropping record"
            );
        }
    }

    fn store_segment(&self, record: SegmentRecord) {
        let mut state = self.state();
        match record.kind {
            SegmentKind::Internal => state.stats.segments_ended += 1,
            SegmentKind::External => state.stats.external_segments_ended += 1,
        }
        state.harvest.segments.push(record);
    }
}

/// In-process APM backend. Cheap to clone; clones share one harvest.
#[derive(Debug, Clone)]
pub struct RecordingBackend {
    inner: Arc<Recorder>,
}

impl RecordingBackend {
    pub fn new(config: &AgentConfig) -> Result<Self, BackendInitError> {
        config.validate()?;

        info!(
            app = %config.app_name,
            enabled = config.enabled,
            max_samples_stored = config.transaction_events.max_samples_stored,
            "APM recording backend initialized"
        );

        Ok(Self {
            inner: Arc::new(Recorder {
                app_name: config.app_name.clone(),
                enabled: config.enabled,
                max_samples_stored: config.transaction_events.max_samples_stored,
                state: Mutex::new(State::default()),
            }),
        })
    }

    pub fn app_name(&self) -> &str {
        &self.inner.app_name
    }

    pub fn stats(&self) -> BackendStats {
        self.inner.state().stats
    }

    /// Copy of everything recorded so far.
    pub fn harvest(&self) -> Harvest {
        self.inner.state().harvest.clone()
    }

    /// Take the recorded harvest, leaving an empty one. Counters are kept.
    pub fn drain(&self) -> Harvest {
        std::mem::take(&mut self.inner.state().harvest)
    }
}

impl ApmBackend for RecordingBackend {
    fn start_transaction(&self, name: &str) -> Option<Arc<dyn Transaction>> {
        if !self.inner.enabled {
            return None;
        }
        self.inner.state().stats.transactions_started += 1;

        let shared = Arc::new(SharedTransaction {
            recorder: Arc::clone(&self.inner),
            record: Mutex::new(TransactionRecord::new(name)),
            sink: Mutex::new(None),
            next_scope: AtomicU32::new(1),
        });
        Some(Arc::new(RecordedTransaction { shared, scope: 0 }))
    }

    fn record_custom_event(&self, event_type: &str, attributes: Attributes) {
        let mut state = self.inner.state();
        state.stats.custom_events += 1;
        state
            .harvest
            .custom_events
            .push(CustomEventRecord::new(event_type, attributes));
    }
}

// ============================================================================
// Transactions
// ============================================================================

struct SharedTransaction {
    recorder: Arc<Recorder>,
    record: Mutex<TransactionRecord>,
    sink: Mutex<Option<Arc<ResponseSink>>>,
    next_scope: AtomicU32,
}

impl SharedTransaction {
    fn record(&self) -> MutexGuard<'_, TransactionRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// (trace_id, span_id) for child segments.
    fn ids(&self) -> (String, String) {
        let record = self.record();
        (record.trace_id.clone(), record.span_id.clone())
    }
}

/// A transaction, or one call scope of it. Scopes share the same record.
struct RecordedTransaction {
    shared: Arc<SharedTransaction>,
    scope: u32,
}

impl RecordedTransaction {
    fn segment(&self, name: String, kind: SegmentKind) -> SegmentRecord {
        let (trace_id, parent_span_id) = self.shared.ids();
        let mut state = self.shared.recorder.state();
        match kind {
            SegmentKind::Internal => state.stats.segments_started += 1,
            SegmentKind::External => state.stats.external_segments_started += 1,
        }
        SegmentRecord::new(name, kind, trace_id, parent_span_id, self.scope)
    }
}

impl Transaction for RecordedTransaction {
    fn set_web_request(&self, request: WebRequest) {
        self.shared.record().request = Some(request);
    }

    fn set_web_response(&self, sink: Arc<ResponseSink>) {
        *self.shared.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn add_attribute(&self, key: &str, value: AttributeValue) {
        self.shared.record().attributes.insert(key.to_string(), value);
    }

    fn start_segment(&self, name: &str) -> Box<dyn Segment> {
        Box::new(RecordedSegment {
            recorder: Arc::clone(&self.shared.recorder),
            record: self.segment(name.to_string(), SegmentKind::Internal),
        })
    }

    fn new_scope(&self) -> Arc<dyn Transaction> {
        let scope = self.shared.next_scope.fetch_add(1, Ordering::Relaxed);
        self.shared.record().scopes = scope;
        Arc::new(RecordedTransaction {
            shared: Arc::clone(&self.shared),
            scope,
        })
    }

    fn start_external_segment(&self, request: &ExternalRequest) -> Box<dyn ExternalSegment> {
        let host = url::Url::parse(&request.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());

        let mut record = self.segment(format!("External/{host}/http"), SegmentKind::External);
        record.external = Some(ExternalCall {
            method: request.method.clone(),
            url: request.url.clone(),
            status: None,
        });

        Box::new(RecordedExternalSegment {
            recorder: Arc::clone(&self.shared.recorder),
            record,
        })
    }

    fn end(&self) {
        let record = {
            let mut record = self.shared.record();
            if record.is_finalized() {
                return;
            }
            if let Some(sink) = self
                .shared
                .sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
            {
                record.response = Some(ResponseRecord::from(sink.snapshot()));
            }
            record.finalize();
            record.clone()
        };
        self.shared.recorder.store_transaction(record);
    }
}

// ============================================================================
// Segments
// ============================================================================

struct RecordedSegment {
    recorder: Arc<Recorder>,
    record: SegmentRecord,
}

impl Segment for RecordedSegment {
    fn end(self: Box<Self>) {
        let RecordedSegment {
            recorder,
            mut record,
        } = *self;
        record.finalize();
        recorder.store_segment(record);
    }
}

struct RecordedExternalSegment {
    recorder: Arc<Recorder>,
    record: SegmentRecord,
}

impl ExternalSegment for RecordedExternalSegment {
    fn add_attribute(&mut self, key: &str, value: AttributeValue) {
        self.record.attributes.insert(key.to_string(), value);
    }

    fn set_response(&mut self, response: ExternalResponse) {
        if let Some(call) = self.record.external.as_mut() {
            call.status = Some(response.status);
        }
    }

    fn end(self: Box<Self>) {
        let RecordedExternalSegment {
            recorder,
            mut record,
        } = *self;
        record.finalize();
        recorder.store_segment(record);
    }
}
