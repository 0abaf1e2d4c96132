use crate::{
    error::{RelayError, Result},
    headers::{Overrides, parse_overrides, resolve_headers},
    hls::{
        link::{LinkBuilder, LinkStyle, parse_target},
        rewrite::{PLAYLIST_CONTENT_TYPE, rewrite},
    },
    metrics,
    server::{handlers::observe, state::AppState},
};
use axum::{
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::time::Instant;
use tracing::info;
use url::Url;

/// `GET /proxy?url=..&headers=..`: fetch a playlist and rewrite every
/// reference in it to a query-style relay link.
pub async fn serve_playlist(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Result<Response> {
    let start = Instant::now();

    let result = async {
        let raw = params
            .get("url")
            .ok_or_else(|| RelayError::BadRequest("Missing url parameter".to_string()))?;
        let target = parse_target(raw)?;
        let overrides = parse_overrides(params.get("headers").map(String::as_str));

        rewrite_playlist(&state, target, &overrides, LinkStyle::Query).await
    }
    .await;

    observe("playlist", start, result)
}

/// Fetch `target` and answer with its rewritten body, links shaped by `style`.
///
/// The headers used for the fetch are the ones carried into every link, so
/// segments and keys are requested the same way the playlist was.
pub(crate) async fn rewrite_playlist(
    state: &AppState,
    target: Url,
    overrides: &Overrides,
    style: LinkStyle,
) -> Result<Response> {
    state.permit(&target)?;
    info!("Fetching playlist from origin: {}", target);

    let headers = resolve_headers(target.as_str(), overrides);
    let fetched = state.relay.fetch_playlist(&target, &headers).await?;

    let mut links = LinkBuilder::new(&state.config.public_url, style, &headers);
    if !overrides.is_empty() {
        links = links.embedding_headers();
    }
    let rewritten = rewrite(&fetched.body, &fetched.url, &links)?;
    metrics::record_rewrite(&rewritten.stats);

    if rewritten.stats.unresolved > 0 {
        info!(
            "{} references in {} left unchanged",
            rewritten.stats.unresolved, fetched.url
        );
    }

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)],
        rewritten.body,
    )
        .into_response())
}
