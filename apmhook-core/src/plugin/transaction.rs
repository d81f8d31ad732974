//! Transaction lifecycle: open at request entry, flush and close at exit.

use std::sync::Arc;
use url::Url;

use super::{slots, ApmPlugin};
use crate::backend::{ResponseSink, WebRequest};
use crate::carrier::RequestContext;
use crate::error::BackendUnavailable;
use crate::handles::{SpanGuard, TransactionHandle};
use crate::pipeline::{TransactionRequest, TransactionResponse};

pub const ATTR_QUERY: &str = "query";
pub const FLUSH_SEGMENT: &str = "Flush";

impl ApmPlugin {
    pub(super) fn enter_transaction(
        &self,
        ctx: RequestContext,
        request: &TransactionRequest,
    ) -> RequestContext {
        let name = transaction_name(&request.method, &request.url);
        let Some(txn) = self.backend.start_transaction(&name) else {
            self.log.error(
                "failed to start APM transaction",
                &BackendUnavailable { transaction: name },
            );
            return ctx;
        };

        txn.set_web_request(WebRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
        });
        txn.add_attribute(ATTR_QUERY, encoded_query(&request.url).into());

        let sink = Arc::new(ResponseSink::new());
        txn.set_web_response(Arc::clone(&sink));

        let handle = Arc::new(TransactionHandle::new(txn, name));
        let ctx = slots::with_transaction(&ctx, handle);
        slots::with_response_sink(&ctx, sink)
    }

    pub(super) fn exit_transaction(
        &self,
        ctx: RequestContext,
        response: &TransactionResponse,
    ) -> RequestContext {
        let txn = match slots::open_transaction(&ctx) {
            Ok(txn) => txn,
            Err(err) => {
                self.log
                    .error("failed to retrieve APM transaction from context", &err);
                return ctx;
            }
        };
        let _release = txn.end_on_drop();

        let sink = match slots::lookup_response_sink(&ctx) {
            Ok(sink) => sink,
            Err(err) => {
                self.log
                    .error("failed to retrieve APM response sink from context", &err);
                return ctx;
            }
        };

        {
            let _flush = SpanGuard::new(txn.transaction().start_segment(FLUSH_SEGMENT));
            for (name, value) in response.headers.iter() {
                sink.add_header(name, value);
            }
            sink.write_header(response.status);
            sink.write(&response.body);
        }

        ctx
    }
}

/// `"<verb> <path>"`. The query string is left out to bound name cardinality.
pub(crate) fn transaction_name(method: &str, url: &Url) -> String {
    format!("{} {}", method, url.path())
}

/// The query string re-encoded with pairs sorted by key. Values under the
/// same key keep their original order.
pub(crate) fn encoded_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}
