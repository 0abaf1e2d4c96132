pub mod home;
pub mod playlist;
pub mod prefixed;
pub mod segment;

use crate::{error::Result, metrics};
use axum::{
    http::{HeaderMap, header},
    response::Response,
};
use std::time::Instant;

/// Record request metrics for a finished handler, whichever way it went.
pub(crate) fn observe(
    endpoint: &'static str,
    start: Instant,
    result: Result<Response>,
) -> Result<Response> {
    let status = match &result {
        Ok(resp) => resp.status(),
        Err(e) => e.status(),
    };
    metrics::record_request(endpoint, status.as_u16());
    metrics::record_duration(endpoint, start);
    result
}

/// Inbound `Range` header, if any.
pub(crate) fn range_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
