//! Reference resolution for playlist URIs.
//!
//! Resolution never fails hard: anything that cannot be turned into a
//! fetchable `http(s)` URL comes back as [`Resolution::Unresolved`] so the
//! rewrite engine can emit the line untouched.

use tracing::debug;
use url::Url;

/// Outcome of resolving a playlist reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Absolute `http`/`https` URL of the referenced resource.
    Resolved(Url),
    /// The reference as it appeared in the playlist.
    Unresolved(String),
}

/// Resolve `reference` against `base`.
///
/// Absolute `http`/`https` references are parsed on their own and never
/// combined with `base`. Everything else follows RFC 3986 reference
/// resolution: `/x` replaces the path, `x` resolves against the base's
/// directory, dot segments are collapsed.
pub fn resolve(reference: &str, base: &Url) -> Resolution {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Resolution::Unresolved(reference.to_string());
    }

    if has_http_scheme(trimmed) {
        return match Url::parse(trimmed) {
            Ok(url) => Resolution::Resolved(url),
            Err(e) => {
                debug!("Leaving malformed absolute reference {:?}: {}", trimmed, e);
                Resolution::Unresolved(reference.to_string())
            }
        };
    }

    // skd://, data:, etc. are not fetchable through the relay
    if let Ok(other) = Url::parse(trimmed) {
        debug!(
            "Leaving reference with scheme {:?} unchanged",
            other.scheme()
        );
        return Resolution::Unresolved(reference.to_string());
    }

    match base.join(trimmed) {
        Ok(url) if is_http(&url) => Resolution::Resolved(url),
        Ok(url) => {
            debug!("Reference {:?} resolves outside http(s): {}", trimmed, url);
            Resolution::Unresolved(reference.to_string())
        }
        Err(e) => {
            debug!("Could not resolve {:?} against {}: {}", trimmed, base, e);
            Resolution::Unresolved(reference.to_string())
        }
    }
}

/// `true` when `reference` starts with `http://` or `https://`
/// (case-insensitive).
pub fn has_http_scheme(reference: &str) -> bool {
    let lower = reference
        .get(..8)
        .unwrap_or(reference)
        .to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// `scheme://host[:port]` of `url`, as carried in the `host` link parameter.
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// `host[:port]` of `url`; the port is omitted when it is the scheme default.
pub fn host_and_port(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Path of `url` with a relay-specific `prefix` stripped.
///
/// `prefix` is given with leading and trailing slashes (`/hls-playback/`).
/// Returns `None` when the path does not start with it.
pub fn relay_path<'a>(url: &'a Url, prefix: &str) -> Option<&'a str> {
    url.path().strip_prefix(prefix)
}
