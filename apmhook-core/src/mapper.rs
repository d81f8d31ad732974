//! Pure translation between the pipeline's outbound call types and the
//! backend's external segment types.

use std::sync::Arc;

use crate::backend::{ExternalRequest, ExternalResponse};
use crate::error::{Direction, MappingError};
use crate::pipeline::{Headers, OutboundRequest, OutboundResponse};

/// Build the backend-shaped request for an outbound call.
///
/// The URL is `scheme://host` followed by the path as given; no
/// normalization happens here.
pub fn to_backend_request(request: &OutboundRequest) -> Result<ExternalRequest, MappingError> {
    let body = request
        .body
        .to_json_bytes()
        .map_err(|source| MappingError::Body {
            direction: Direction::Request,
            source,
        })?;

    Ok(ExternalRequest {
        method: request.method.clone(),
        url: format!("{}://{}{}", request.scheme, request.host, request.path),
        headers: copy_headers(&request.headers),
        body,
        payload: Arc::clone(&request.body),
    })
}

/// Build the backend-shaped response for a finished call.
///
/// The wrapper body is the *original request's* payload re-serialized, not
/// the response body. Segment instrumentation only reads status and headers.
// TODO: confirm with the backend owners whether the response body should be
// carried here instead of the request payload.
pub fn to_backend_response(
    original: &Arc<ExternalRequest>,
    response: &OutboundResponse,
) -> Result<ExternalResponse, MappingError> {
    let body = original
        .payload
        .to_json_bytes()
        .map_err(|source| MappingError::Body {
            direction: Direction::Response,
            source,
        })?;

    Ok(ExternalResponse {
        status: response.status,
        headers: copy_headers(&response.headers),
        body,
        request: Arc::clone(original),
    })
}

fn copy_headers(source: &Headers) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in source.iter() {
        headers.add(name, value);
    }
    headers
}
