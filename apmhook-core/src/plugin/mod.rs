//! The APM lifecycle plugin.
//!
//! ## Lifecycle
//!
//! ```text
//! NoTransaction ──enter──► TransactionOpen ──exit──► TransactionClosed
//!                               │
//!                               └─ per outbound call (any number, may overlap):
//!                                  NoSegment ──start──► SegmentOpen ──end──► SegmentClosed
//! ```
//!
//! Hooks never fail the request. Missing or closed handles are logged once
//! through the plugin logger and the context comes back untouched. Handles
//! that were opened are released by drop guards, so every exit path closes
//! them exactly once.
//!
//! ## Construction
//!
//! The host's composition root builds the plugin explicitly:
//!
//! ```ignore
//! let config = AgentConfig::from_env()?;
//! let (plugin, backend) = ApmPlugin::with_recorder(&config, Arc::new(TracingLogger))?;
//! pipeline.register(Arc::new(plugin));
//! ```

mod events;
mod segment;
pub mod slots;
mod transaction;

use std::sync::Arc;

use crate::backend::{ApmBackend, RecordingBackend};
use crate::carrier::RequestContext;
use crate::config::AgentConfig;
use crate::error::BackendInitError;
use crate::logging::PluginLogger;
use crate::pipeline::{
    CallError, LifecyclePlugin, OutboundRequest, OutboundResponse, TransactionRequest,
    TransactionResponse,
};

pub use events::{ATTR_DURATION, ATTR_ERRORS, ATTR_METHOD, ATTR_STATUS, ATTR_URL};
pub use segment::ATTR_ERROR_DETAIL;
pub use transaction::{ATTR_QUERY, FLUSH_SEGMENT};

pub const PLUGIN_NAME: &str = "ApmPlugin";

/// Drives APM transactions and segments from pipeline lifecycle hooks
pub struct ApmPlugin {
    backend: Arc<dyn ApmBackend>,
    log: Arc<dyn PluginLogger>,
    call_event_type: Option<String>,
}

impl ApmPlugin {
    pub fn new(backend: Arc<dyn ApmBackend>, log: Arc<dyn PluginLogger>) -> Self {
        Self {
            backend,
            log,
            call_event_type: None,
        }
    }

    /// Also report every completed outbound call as a custom event.
    pub fn with_call_events(mut self, event_type: impl Into<String>) -> Self {
        self.call_event_type = Some(event_type.into());
        self
    }

    /// Build the plugin on top of a [`RecordingBackend`] configured from
    /// `config`. The backend is returned too so the host can drain it.
    pub fn with_recorder(
        config: &AgentConfig,
        log: Arc<dyn PluginLogger>,
    ) -> Result<(Self, RecordingBackend), BackendInitError> {
        let backend = match RecordingBackend::new(config) {
            Ok(backend) => backend,
            Err(err) => {
                log.error("failed to initialize APM backend", &err);
                return Err(err);
            }
        };

        let mut plugin = Self::new(Arc::new(backend.clone()), log);
        plugin.call_event_type = config.call_event_type.clone();
        Ok((plugin, backend))
    }
}

impl LifecyclePlugin for ApmPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_request_enter(
        &self,
        ctx: RequestContext,
        request: &TransactionRequest,
    ) -> RequestContext {
        self.enter_transaction(ctx, request)
    }

    fn on_request_exit(
        &self,
        ctx: RequestContext,
        response: &TransactionResponse,
    ) -> RequestContext {
        self.exit_transaction(ctx, response)
    }

    fn on_call_start(&self, ctx: RequestContext, request: &OutboundRequest) -> RequestContext {
        self.start_call(ctx, request)
    }

    fn on_call_end(
        &self,
        ctx: RequestContext,
        request: &OutboundRequest,
        response: &OutboundResponse,
        error: Option<&CallError>,
    ) -> RequestContext {
        self.end_call(ctx, request, response, error)
    }
}
