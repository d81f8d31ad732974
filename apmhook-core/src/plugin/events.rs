use super::ApmPlugin;
use crate::backend::{AttributeValue, Attributes};
use crate::pipeline::{CallError, OutboundRequest, OutboundResponse};

pub const ATTR_URL: &str = "url";
pub const ATTR_STATUS: &str = "status";
pub const ATTR_DURATION: &str = "durationMillis";
pub const ATTR_METHOD: &str = "method";
pub const ATTR_ERRORS: &str = "errors";

impl ApmPlugin {
    /// Report one outbound call as a named custom event.
    pub fn send_custom_event(
        &self,
        event_type: &str,
        request: &OutboundRequest,
        response: &OutboundResponse,
        errors: &[&CallError],
    ) {
        self.log
            .debug(&format!("preparing custom event {event_type} for {}", request.host));

        let mut attributes = Attributes::new();
        attributes.insert(ATTR_URL.into(), request.host.as_str().into());
        attributes.insert(ATTR_STATUS.into(), response.status.into());
        attributes.insert(
            ATTR_DURATION.into(),
            AttributeValue::Int(i64::try_from(response.duration.as_millis()).unwrap_or(i64::MAX)),
        );
        attributes.insert(ATTR_METHOD.into(), request.method.as_str().into());
        if !errors.is_empty() {
            attributes.insert(ATTR_ERRORS.into(), encode_errors(errors).into());
        }

        self.backend.record_custom_event(event_type, attributes);
        self.log.debug(&format!("custom event {event_type} sent"));
    }
}

/// Error messages as a JSON array string, or joined with `", "` if that fails.
fn encode_errors(errors: &[&CallError]) -> String {
    let messages: Vec<String> = errors.iter().map(|err| err.to_string()).collect();
    serde_json::to_string(&messages).unwrap_or_else(|_| messages.join(", "))
}
