//! Relay link construction.
//!
//! A relay link is the URL a player fetches instead of the original resource.
//! Each [`LinkStyle`] has a matching decoder (`*_target`) used by the routes
//! that receive those links, so a link always dereferences to the URL it was
//! built from.

use crate::error::{RelayError, Result};
use crate::headers::ResolvedHeaders;
use crate::hls::resolver::{host_and_port, is_http, origin_of, relay_path};
use url::{Url, form_urlencoded};

/// Endpoint serving rewritten playlists in query style.
pub const PLAYLIST_ENDPOINT: &str = "/proxy";
/// Endpoint streaming segments, keys and other binary content in query style.
pub const SEGMENT_ENDPOINT: &str = "/ts-proxy";

/// How relay links are shaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStyle {
    /// `{public}/proxy|/ts-proxy?url=..&headers=..`
    Query,
    /// `{public}{prefix}{rest}?host=..&headers=..` where the upstream path is
    /// `{prefix}{rest}`.
    Mirrored { prefix: String },
    /// `{public}{prefix}{path}?host=..&headers=..` where the upstream path is
    /// `/{path}`.
    Detached { prefix: String },
    /// `{public}/{host[:port]}{path}`, always fetched over https. Carries
    /// `?headers=..` only when the playlist request did.
    PathEmbedded,
}

impl LinkStyle {
    /// Style for a first path segment such as `hls-playback` or `file2`.
    pub fn for_prefix(segment: &str, mirrored: &[String]) -> Option<Self> {
        if mirrored.iter().any(|m| m == segment) {
            return Some(LinkStyle::Mirrored {
                prefix: format!("/{segment}/"),
            });
        }
        let digits = segment.strip_prefix("file")?;
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return Some(LinkStyle::Detached {
                prefix: format!("/{segment}/"),
            });
        }
        None
    }
}

/// Builds relay links for one playlist.
///
/// The header parameter is encoded once; every link produced is a pure
/// function of the target URL.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    public_url: String,
    style: LinkStyle,
    headers_param: String,
    embed_headers: bool,
}

impl LinkBuilder {
    pub fn new(public_url: &str, style: LinkStyle, headers: &ResolvedHeaders) -> Self {
        Self {
            public_url: public_url.trim_end_matches('/').to_string(),
            style,
            headers_param: encode(&headers.to_json()),
            embed_headers: false,
        }
    }

    /// Append the header parameter to path-embedded links too, so a playlist
    /// requested with overrides passes them on to every link.
    pub fn embedding_headers(mut self) -> Self {
        self.embed_headers = true;
        self
    }

    /// `true` when `reference` already points back at this relay.
    pub fn is_relay_link(&self, reference: &str) -> bool {
        reference
            .strip_prefix(self.public_url.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Relay link for `target`.
    ///
    /// Targets the configured style cannot express (query strings, foreign
    /// prefixes, plain http for path-embedded links) fall back to query style.
    pub fn link(&self, target: &Url) -> String {
        let expressible = target.query().is_none();

        match &self.style {
            LinkStyle::Mirrored { prefix } if expressible => {
                if let Some(rest) = relay_path(target, prefix) {
                    return format!(
                        "{}{}{}?host={}&headers={}",
                        self.public_url,
                        prefix,
                        rest,
                        encode(&origin_of(target)),
                        self.headers_param
                    );
                }
            }
            LinkStyle::Detached { prefix } if expressible => {
                return format!(
                    "{}{}{}?host={}&headers={}",
                    self.public_url,
                    prefix,
                    strip_leading_slash(target.path()),
                    encode(&origin_of(target)),
                    self.headers_param
                );
            }
            LinkStyle::PathEmbedded if expressible && target.scheme() == "https" => {
                if let Some(host) = host_and_port(target).filter(|h| is_embeddable_host(h)) {
                    let link = format!("{}/{}{}", self.public_url, host, target.path());
                    if self.embed_headers {
                        return format!("{link}?headers={}", self.headers_param);
                    }
                    return link;
                }
            }
            _ => {}
        }

        let endpoint = if is_playlist_path(target.path()) {
            PLAYLIST_ENDPOINT
        } else {
            SEGMENT_ENDPOINT
        };
        self.query_link(target, endpoint)
    }

    /// Relay link for a reference known to be a playlist (variant streams,
    /// renditions) regardless of its extension.
    ///
    /// Prefixed and path-embedded routes pick the playlist handler by
    /// extension, so extensionless playlists use query style.
    pub fn playlist_link(&self, target: &Url) -> String {
        if self.style != LinkStyle::Query && is_playlist_path(target.path()) {
            return self.link(target);
        }
        self.query_link(target, PLAYLIST_ENDPOINT)
    }

    fn query_link(&self, target: &Url, endpoint: &str) -> String {
        format!(
            "{}{}?url={}&headers={}",
            self.public_url,
            endpoint,
            encode(target.as_str()),
            self.headers_param
        )
    }
}

/// `true` for paths naming an HLS playlist.
pub fn is_playlist_path(path: &str) -> bool {
    path.to_ascii_lowercase().ends_with(".m3u8")
}

/// Upstream URL for a mirrored-prefix request: `{host}{prefix}{rest}`.
///
/// `rest` is taken verbatim; repeated slashes belong to the upstream path.
pub fn mirrored_target(host: &str, prefix: &str, rest: &str) -> Result<Url> {
    let origin = parse_host_param(host)?;
    parse_target(&format!("{origin}{prefix}{rest}"))
}

/// Upstream URL for a detached-prefix request: `{host}/{rest}`.
pub fn detached_target(host: &str, rest: &str) -> Result<Url> {
    let origin = parse_host_param(host)?;
    parse_target(&format!("{origin}/{rest}"))
}

/// Split `/{host[:port]}/{rest}` and build `https://{host}/{rest}`.
///
/// The first segment must pass [`is_embeddable_host`].
pub fn embedded_target(path: &str) -> Result<Url> {
    let (domain, rest) = strip_leading_slash(path)
        .split_once('/')
        .ok_or_else(|| RelayError::BadRequest("Invalid path format".to_string()))?;

    if !is_embeddable_host(domain) || rest.is_empty() {
        return Err(RelayError::BadRequest("Invalid path format".to_string()));
    }

    parse_target(&format!("https://{domain}/{rest}"))
}

/// Parse an absolute `http`/`https` target URL.
pub fn parse_target(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| RelayError::BadRequest(format!("Invalid target URL {raw:?}: {e}")))?;
    if !is_http(&url) || url.host_str().is_none() {
        return Err(RelayError::BadRequest(format!(
            "Target must be an absolute http(s) URL: {raw}"
        )));
    }
    Ok(url)
}

/// A path-embedded first segment must look like a domain or IPv4 address.
/// Bare names such as `localhost` and bracketed IPv6 literals are not
/// decodable from a path.
pub fn is_embeddable_host(host: &str) -> bool {
    host.contains('.') && !host.starts_with('[')
}

/// Drop exactly one leading `/`.
pub fn strip_leading_slash(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

fn parse_host_param(host: &str) -> Result<String> {
    let url = parse_target(host)?;
    Ok(origin_of(&url))
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
