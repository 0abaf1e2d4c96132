//! Outbound fetching and response pass-through.
//!
//! Playlists are buffered and decoded so they can be rewritten; everything
//! else is streamed to the caller byte-for-byte. Nothing here retries: a
//! failed fetch surfaces immediately.

use crate::error::{RelayError, Result};
use crate::headers::{Overrides, ResolvedHeaders, resolve_headers};
use crate::metrics;
use crate::server::target::check_target;
use axum::{
    body::Body,
    http::{HeaderValue, header},
    response::Response,
};
use flate2::read::{GzDecoder, ZlibDecoder};
use futures_util::TryStreamExt;
use reqwest::{Client, redirect};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Redirects followed before a fetch fails.
pub const MAX_REDIRECTS: usize = 5;

/// How long pooled connections stay open while idle.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Idle connections kept per upstream host.
pub const POOL_MAX_IDLE_PER_HOST: usize = 10;

/// Build the shared outbound client.
///
/// `timeout` bounds connecting and each idle read; whole-request deadlines
/// are applied per fetch by [`Relay`]. Unless `allow_private` is set, every
/// redirect hop goes through [`check_target`] before it is followed.
pub fn build_client(timeout: Duration, allow_private: bool) -> reqwest::Result<Client> {
    Client::builder()
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .redirect(redirect_policy(allow_private))
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
}

fn redirect_policy(allow_private: bool) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("too many redirects (max {MAX_REDIRECTS})"));
        }
        if !allow_private && let Err(e) = check_target(attempt.url()) {
            warn!("Refusing redirect to {}: {}", attempt.url(), e);
            return attempt.error(e);
        }
        attempt.follow()
    })
}

/// One inbound request, reduced to what the relay needs.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub target: Url,
    pub overrides: Overrides,
    /// Inbound `Range` header, forwarded verbatim.
    pub range: Option<String>,
}

impl RelayRequest {
    pub fn new(target: Url, overrides: Overrides) -> Self {
        Self {
            target,
            overrides,
            range: None,
        }
    }

    pub fn with_range(mut self, range: Option<String>) -> Self {
        self.range = range.filter(|r| !r.trim().is_empty());
        self
    }

    /// Headers sent upstream: header policy for the target, then the inbound
    /// `Range` unless an override already sets one.
    pub fn effective_headers(&self) -> ResolvedHeaders {
        let mut headers = resolve_headers(self.target.as_str(), &self.overrides);
        if let Some(range) = &self.range
            && !headers.contains("Range")
        {
            headers.insert("Range", range.clone());
        }
        headers
    }
}

/// A fetched and decoded playlist.
#[derive(Debug, Clone)]
pub struct FetchedPlaylist {
    pub body: String,
    /// URL the body was served from, after redirects.
    pub url: Url,
}

/// Performs outbound fetches through the shared pooled client.
#[derive(Debug, Clone)]
pub struct Relay {
    client: Client,
    timeout: Duration,
}

impl Relay {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Fetch a playlist body in full and decode it to text.
    ///
    /// # Errors
    /// - [`RelayError::UpstreamFetch`] on connection, timeout or redirect-limit
    ///   failure
    /// - [`RelayError::UpstreamStatus`] on a non-2xx answer
    /// - [`RelayError::ReadFailed`] if the body cannot be read or decoded
    pub async fn fetch_playlist(
        &self,
        target: &Url,
        headers: &ResolvedHeaders,
    ) -> Result<FetchedPlaylist> {
        debug!("Fetching playlist {}", target);

        let response = self
            .client
            .get(target.clone())
            .headers(headers.to_header_map())
            .timeout(self.timeout)
            .send()
            .await
            .inspect_err(|e| {
                warn!("Playlist fetch failed for {}: {}", target, e);
                metrics::record_upstream_error();
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Playlist fetch returned {} for {}", status, target);
            metrics::record_upstream_error();
            return Err(RelayError::UpstreamStatus(status.as_u16()));
        }

        let url = response.url().clone();
        let encoding = response
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);

        let raw = response
            .bytes()
            .await
            .map_err(|e| RelayError::ReadFailed(e.to_string()))?;

        let decoded = decode_body(&raw, encoding.as_deref())?;
        let body = match String::from_utf8(decoded) {
            Ok(text) => text,
            Err(e) => {
                warn!("Playlist from {} is not valid UTF-8, decoding lossily", url);
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };

        Ok(FetchedPlaylist { body, url })
    }

    /// Relay a non-playlist resource, streaming the upstream body as-is.
    ///
    /// Status, `Content-Length`, `Content-Range` and `Content-Encoding` are
    /// passed through; `Accept-Ranges` defaults to `bytes`. Non-2xx statuses
    /// are relayed rather than turned into errors.
    pub async fn stream(&self, request: &RelayRequest) -> Result<Response> {
        let target = &request.target;
        let headers = request.effective_headers();
        debug!("Streaming {} (range: {:?})", target, request.range);

        let send = self
            .client
            .get(target.clone())
            .headers(headers.to_header_map())
            .send();

        let upstream = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("Upstream fetch failed for {}: {}", target, e);
                metrics::record_upstream_error();
                return Err(RelayError::UpstreamFetch(e));
            }
            Err(_) => {
                warn!("Upstream fetch timed out for {}", target);
                metrics::record_upstream_error();
                return Err(RelayError::UpstreamTimeout(self.timeout));
            }
        };

        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();

        let content_type = upstream_headers
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(content_type_for(target.path())));

        let target_for_log = target.to_string();
        let stream = upstream.bytes_stream().inspect_err(move |e| {
            warn!("Upstream body failed mid-stream for {}: {}", target_for_log, e);
        });

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;

        let out = response.headers_mut();
        out.insert(header::CONTENT_TYPE, content_type);
        for name in [
            header::CONTENT_LENGTH,
            header::CONTENT_RANGE,
            header::CONTENT_ENCODING,
        ] {
            if let Some(value) = upstream_headers.get(&name) {
                out.insert(name, value.clone());
            }
        }
        out.insert(
            header::ACCEPT_RANGES,
            upstream_headers
                .get(header::ACCEPT_RANGES)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("bytes")),
        );

        Ok(response)
    }
}

/// Undo a `gzip` or `deflate` content encoding. Other encodings are passed
/// through untouched.
fn decode_body(raw: &[u8], encoding: Option<&str>) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();

    let result = match encoding {
        Some(enc) if enc.contains("gzip") => GzDecoder::new(raw).read_to_end(&mut decoded),
        Some(enc) if enc.contains("deflate") => ZlibDecoder::new(raw).read_to_end(&mut decoded),
        _ => return Ok(raw.to_vec()),
    };

    result.map_err(|e| RelayError::ReadFailed(format!("Failed to decompress body: {e}")))?;
    Ok(decoded)
}

/// Content type guessed from a path's extension, for upstreams that send none.
pub fn content_type_for(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    let ext = lower.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");

    match ext {
        "ts" => "video/mp2t",
        "m3u8" => "application/vnd.apple.mpegurl",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "mp4" | "m4s" | "m4v" => "video/mp4",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "vtt" => "text/vtt",
        _ => "application/octet-stream",
    }
}
