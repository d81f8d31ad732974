//! Segment lifecycle: one external segment per outbound call.

use std::sync::Arc;

use super::{slots, ApmPlugin};
use crate::carrier::RequestContext;
use crate::handles::SegmentHandle;
use crate::mapper;
use crate::pipeline::{CallError, OutboundRequest, OutboundResponse};

pub const ATTR_ERROR_DETAIL: &str = "errordetail";

impl ApmPlugin {
    pub(super) fn start_call(&self, ctx: RequestContext, request: &OutboundRequest) -> RequestContext {
        // Calls made outside an open transaction are not tracked.
        let txn = match slots::open_transaction(&ctx) {
            Ok(txn) => txn,
            Err(err) => {
                self.log
                    .debug(&format!("outbound call to {} not tracked: {}", request.host, err));
                return ctx;
            }
        };

        let external = match mapper::to_backend_request(request) {
            Ok(external) => Arc::new(external),
            Err(err) => {
                self.log
                    .error("failed to map outbound request for APM segment", &err);
                return ctx;
            }
        };

        let scope = txn.transaction().new_scope();
        let segment = scope.start_external_segment(&external);

        let ctx = slots::with_segment(&ctx, Arc::new(SegmentHandle::new(segment)));
        slots::with_external_request(&ctx, external)
    }

    pub(super) fn end_call(
        &self,
        ctx: RequestContext,
        request: &OutboundRequest,
        response: &OutboundResponse,
        error: Option<&CallError>,
    ) -> RequestContext {
        let Some(handle) = slots::segment_handle(&ctx) else {
            return ctx;
        };
        let Some(mut segment) = handle.take() else {
            self.log.error(
                "failed to retrieve APM segment from context",
                &slots::closed_segment(),
            );
            return ctx;
        };

        let external = match slots::lookup_external_request(&ctx) {
            Ok(external) => external,
            Err(err) => {
                self.log
                    .error("failed to retrieve APM external request from context", &err);
                return ctx;
            }
        };

        let mapped = match mapper::to_backend_response(&external, response) {
            Ok(mapped) => mapped,
            Err(err) => {
                self.log
                    .error("failed to map outbound response for APM segment", &err);
                return ctx;
            }
        };

        if let Some(err) = error {
            segment.add_attribute(ATTR_ERROR_DETAIL, err.to_string().into());
        }
        segment.set_response(mapped);
        segment.end();

        if let Some(event_type) = self.call_event_type.as_deref() {
            let errors: Vec<&CallError> = error.into_iter().collect();
            self.send_custom_event(event_type, request, response, &errors);
        }

        ctx
    }
}
