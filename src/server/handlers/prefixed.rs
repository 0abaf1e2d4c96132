//! Routes whose upstream is encoded in the request path.
//!
//! `/{prefix}/{path}?host=..` serves the mirrored and detached prefix modes;
//! anything else of the form `/{domain}/{path}` is path-embedded. Playlists
//! are picked by the `.m3u8` extension, everything else is relayed as media.

use crate::{
    error::{RelayError, Result},
    headers::parse_overrides,
    hls::link::{
        LinkStyle, detached_target, embedded_target, is_playlist_path, mirrored_target,
        strip_leading_slash,
    },
    server::{
        handlers::{observe, playlist::rewrite_playlist, range_header, segment::relay_media},
        state::AppState,
    },
};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::time::Instant;
use url::Url;

/// Fallback handler for every path not claimed by a named route.
pub async fn dispatch(
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response> {
    if method != Method::GET && method != Method::HEAD {
        return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response());
    }

    let start = Instant::now();
    let (target, style) = match route(uri.path(), &params, &state.config.hls_prefixes) {
        Ok(routed) => routed,
        Err(e) => return observe("path", start, Err(e)),
    };
    let overrides = parse_overrides(params.get("headers").map(String::as_str));

    if is_playlist_path(target.path()) {
        let result = rewrite_playlist(&state, target, &overrides, style).await;
        observe("path_playlist", start, result)
    } else {
        let result = relay_media(&state, target, overrides, range_header(&headers)).await;
        observe("path_media", start, result)
    }
}

/// Decode the upstream URL and link style from a raw request path.
fn route(
    path: &str,
    params: &HashMap<String, String>,
    mirrored: &[String],
) -> Result<(Url, LinkStyle)> {
    let (first, rest) = strip_leading_slash(path)
        .split_once('/')
        .ok_or_else(|| RelayError::BadRequest("Invalid path format".to_string()))?;

    match LinkStyle::for_prefix(first, mirrored) {
        Some(style) => {
            let host = params
                .get("host")
                .filter(|h| !h.is_empty())
                .ok_or_else(|| RelayError::BadRequest("Missing host parameter".to_string()))?;

            let target = match &style {
                LinkStyle::Mirrored { prefix } => mirrored_target(host, prefix, rest)?,
                _ => detached_target(host, rest)?,
            };
            Ok((target, style))
        }
        None => Ok((embedded_target(path)?, LinkStyle::PathEmbedded)),
    }
}
