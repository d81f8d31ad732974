//! Context slots owned by the plugin.
//!
//! Slot key types are private to this module, so no other code can read,
//! shadow or collide with them. Readers get a typed `Option`; the lookup
//! helpers turn absence into a [`ContextLookupError`] for logging.

use std::sync::Arc;

use crate::backend::{ExternalRequest, ResponseSink};
use crate::carrier::RequestContext;
use crate::error::{ContextLookupError, Slot};
use crate::handles::{SegmentHandle, TransactionHandle};

struct TransactionSlot(Arc<TransactionHandle>);
struct ResponseSinkSlot(Arc<ResponseSink>);
struct SegmentSlot(Arc<SegmentHandle>);
struct ExternalRequestSlot(Arc<ExternalRequest>);

pub fn transaction_handle(ctx: &RequestContext) -> Option<Arc<TransactionHandle>> {
    ctx.get::<TransactionSlot>().map(|slot| Arc::clone(&slot.0))
}

pub fn response_sink(ctx: &RequestContext) -> Option<Arc<ResponseSink>> {
    ctx.get::<ResponseSinkSlot>().map(|slot| Arc::clone(&slot.0))
}

pub fn segment_handle(ctx: &RequestContext) -> Option<Arc<SegmentHandle>> {
    ctx.get::<SegmentSlot>().map(|slot| Arc::clone(&slot.0))
}

pub fn external_request(ctx: &RequestContext) -> Option<Arc<ExternalRequest>> {
    ctx.get::<ExternalRequestSlot>().map(|slot| Arc::clone(&slot.0))
}

/// The transaction handle, which must still be open.
pub(crate) fn open_transaction(
    ctx: &RequestContext,
) -> Result<Arc<TransactionHandle>, ContextLookupError> {
    let handle = transaction_handle(ctx).ok_or(ContextLookupError::Missing {
        slot: Slot::Transaction,
        expected: "TransactionHandle",
    })?;
    if handle.is_closed() {
        return Err(ContextLookupError::Closed {
            slot: Slot::Transaction,
            expected: "TransactionHandle",
        });
    }
    Ok(handle)
}

pub(crate) fn lookup_response_sink(
    ctx: &RequestContext,
) -> Result<Arc<ResponseSink>, ContextLookupError> {
    response_sink(ctx).ok_or(ContextLookupError::Missing {
        slot: Slot::ResponseSink,
        expected: "ResponseSink",
    })
}

pub(crate) fn lookup_external_request(
    ctx: &RequestContext,
) -> Result<Arc<ExternalRequest>, ContextLookupError> {
    external_request(ctx).ok_or(ContextLookupError::Missing {
        slot: Slot::ExternalRequest,
        expected: "ExternalRequest",
    })
}

pub(crate) fn closed_segment() -> ContextLookupError {
    ContextLookupError::Closed {
        slot: Slot::Segment,
        expected: "SegmentHandle",
    }
}

pub(crate) fn with_transaction(ctx: &RequestContext, handle: Arc<TransactionHandle>) -> RequestContext {
    ctx.with(TransactionSlot(handle))
}

pub(crate) fn with_response_sink(ctx: &RequestContext, sink: Arc<ResponseSink>) -> RequestContext {
    ctx.with(ResponseSinkSlot(sink))
}

pub(crate) fn with_segment(ctx: &RequestContext, handle: Arc<SegmentHandle>) -> RequestContext {
    ctx.with(SegmentSlot(handle))
}

pub(crate) fn with_external_request(
    ctx: &RequestContext,
    request: Arc<ExternalRequest>,
) -> RequestContext {
    ctx.with(ExternalRequestSlot(request))
}
