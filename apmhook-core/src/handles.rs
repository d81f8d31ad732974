//! Handles stored in the request context, and the guards that close them.
//!
//! A handle is shared through immutable context views, so closing goes
//! through interior state: the transaction handle flips an atomic flag, the
//! segment handle gives its segment away exactly once. Guards release on
//! drop, which covers early returns on every error path.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::{AttributeValue, ExternalResponse, ExternalSegment, Segment, Transaction};

// ============================================================================
// Transaction
// ============================================================================

/// One open APM transaction, shared by the request and all of its calls
pub struct TransactionHandle {
    transaction: Arc<dyn Transaction>,
    name: String,
    closed: AtomicBool,
}

impl TransactionHandle {
    pub(crate) fn new(transaction: Arc<dyn Transaction>, name: String) -> Self {
        Self {
            transaction,
            name,
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn transaction(&self) -> &dyn Transaction {
        self.transaction.as_ref()
    }

    /// Close the transaction. Returns false if it was already closed.
    pub fn end(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.transaction.end();
        true
    }

    /// Close the transaction when the returned guard goes out of scope.
    pub(crate) fn end_on_drop(&self) -> TransactionGuard<'_> {
        TransactionGuard { handle: self }
    }
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub(crate) struct TransactionGuard<'a> {
    handle: &'a TransactionHandle,
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        self.handle.end();
    }
}

// ============================================================================
// External segment
// ============================================================================

/// The open segment of one outbound call
pub struct SegmentHandle {
    segment: Mutex<Option<Box<dyn ExternalSegment>>>,
}

impl SegmentHandle {
    pub(crate) fn new(segment: Box<dyn ExternalSegment>) -> Self {
        Self {
            segment: Mutex::new(Some(segment)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.segment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Take ownership of the segment. Only the first caller gets it.
    pub(crate) fn take(&self) -> Option<SegmentGuard> {
        self.segment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|segment| SegmentGuard {
                segment: Some(segment),
            })
    }
}

impl fmt::Debug for SegmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentHandle")
            .field("open", &self.is_open())
            .finish()
    }
}

/// An external segment taken out of its handle; ends on drop
pub(crate) struct SegmentGuard {
    segment: Option<Box<dyn ExternalSegment>>,
}

impl SegmentGuard {
    pub(crate) fn add_attribute(&mut self, key: &str, value: AttributeValue) {
        if let Some(segment) = self.segment.as_mut() {
            segment.add_attribute(key, value);
        }
    }

    pub(crate) fn set_response(&mut self, response: ExternalResponse) {
        if let Some(segment) = self.segment.as_mut() {
            segment.set_response(response);
        }
    }

    pub(crate) fn end(mut self) {
        if let Some(segment) = self.segment.take() {
            segment.end();
        }
    }
}

impl Drop for SegmentGuard {
    fn drop(&mut self) {
        if let Some(segment) = self.segment.take() {
            segment.end();
        }
    }
}

// ============================================================================
// Plain segment
// ============================================================================

/// A named sub-span that ends on drop
pub(crate) struct SpanGuard {
    segment: Option<Box<dyn Segment>>,
}

impl SpanGuard {
    pub(crate) fn new(segment: Box<dyn Segment>) -> Self {
        Self {
            segment: Some(segment),
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if let Some(segment) = self.segment.take() {
            segment.end();
        }
    }
}
