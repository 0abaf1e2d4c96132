use crate::{
    error::{RelayError, Result},
    headers::{Overrides, parse_overrides},
    hls::{link::parse_target, resolver::origin_of},
    relay::RelayRequest,
    server::{
        handlers::{observe, range_header},
        state::AppState,
    },
};
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Response,
};
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;
use url::Url;

/// `GET /ts-proxy?url=..&headers=..`: relay a segment, key or init section.
pub async fn serve_segment(
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response> {
    let start = Instant::now();
    let result = relay_from_params(&state, &params, &headers).await;
    observe("segment", start, result)
}

/// `GET /mp4-proxy?url=..&headers=..`: relay progressive media with seeking.
pub async fn serve_mp4(
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response> {
    let start = Instant::now();
    let result = relay_from_params(&state, &params, &headers).await;
    observe("mp4", start, result)
}

/// `GET /fetch?url=..&ref=..`: relay any resource, presenting `ref` as the
/// `Referer` and its origin as `Origin`.
pub async fn serve_fetch(
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response> {
    let start = Instant::now();

    let result = async {
        let target = target_param(&params)?;

        let mut overrides = Overrides::new();
        if let Some(referer) = params.get("ref").filter(|r| !r.is_empty()) {
            overrides.insert("Referer".to_string(), referer.clone());
            if let Ok(url) = Url::parse(referer) {
                overrides.insert("Origin".to_string(), origin_of(&url));
            }
        }

        relay_media(&state, target, overrides, range_header(&headers)).await
    }
    .await;

    observe("fetch", start, result)
}

/// Stream `target` to the caller with the inbound `Range` forwarded.
pub(crate) async fn relay_media(
    state: &AppState,
    target: Url,
    overrides: Overrides,
    range: Option<String>,
) -> Result<Response> {
    state.permit(&target)?;
    debug!("Relaying {}", target);

    let request = RelayRequest::new(target, overrides).with_range(range);
    state.relay.stream(&request).await
}

async fn relay_from_params(
    state: &AppState,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Result<Response> {
    let target = target_param(params)?;
    let overrides = parse_overrides(params.get("headers").map(String::as_str));
    relay_media(state, target, overrides, range_header(headers)).await
}

fn target_param(params: &HashMap<String, String>) -> Result<Url> {
    let raw = params
        .get("url")
        .ok_or_else(|| RelayError::BadRequest("Missing url parameter".to_string()))?;
    parse_target(raw)
}
