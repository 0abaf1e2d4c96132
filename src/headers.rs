//! Outbound request header policy.
//!
//! Every upstream fetch carries a browser-like baseline, a `Referer`/`Origin`
//! pair picked from [`REFERER_RULES`] by target hostname, and finally the
//! caller's overrides. The merged set is also what gets JSON-encoded into
//! relay links, so the ordering must be deterministic.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;
use url::Url;

/// Caller-supplied header overrides, as decoded from the `headers` parameter.
pub type Overrides = BTreeMap<String, String>;

/// Baseline headers sent regardless of target.
const BASELINE: &[(&str, &str)] = &[
    (
        "User-Agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ),
    ("Accept", "*/*"),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Accept-Encoding", "gzip, deflate"),
    ("Connection", "keep-alive"),
    ("Sec-Fetch-Dest", "empty"),
    ("Sec-Fetch-Mode", "cors"),
    ("Sec-Fetch-Site", "cross-site"),
];

/// A hostname rule selecting a fixed `Referer`/`Origin` pair.
#[derive(Debug, Clone, Copy)]
pub struct RefererRule {
    /// Matched as a substring of the lowercased target hostname.
    pub host_contains: &'static str,
    pub referer: &'static str,
    pub origin: &'static str,
}

/// Evaluated in order; first match wins. Hosts matching nothing get their
/// own origin as `Referer`/`Origin`.
pub const REFERER_RULES: &[RefererRule] = &[
    RefererRule {
        host_contains: "1hd.su",
        referer: "https://videostr.net/",
        origin: "https://videostr.net",
    },
    RefererRule {
        host_contains: "rainflare",
        referer: "https://videostr.net/",
        origin: "https://videostr.net",
    },
    RefererRule {
        host_contains: "lightbeam",
        referer: "https://videostr.net/",
        origin: "https://videostr.net",
    },
    RefererRule {
        host_contains: "videostr",
        referer: "https://videostr.net/",
        origin: "https://videostr.net",
    },
];

/// Effective outbound headers for one request.
///
/// Names keep the spelling they were inserted with; lookups and replacement
/// are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResolvedHeaders(BTreeMap<String, String>);

impl ResolvedHeaders {
    /// Insert a header, replacing any existing entry with the same
    /// case-insensitive name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.0.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
        self.0.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge overrides on top; empty values mean "no override".
    pub fn merge(&mut self, overrides: &Overrides) {
        for (name, value) in overrides {
            if !value.is_empty() {
                self.insert(name.clone(), value.clone());
            }
        }
    }

    /// JSON object encoding used in relay links.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// Convert to a reqwest header map, skipping names or values that are not
    /// valid HTTP.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.0.len());
        for (name, value) in &self.0 {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => {
                    map.insert(n, v);
                }
                _ => warn!("Dropping invalid outbound header {:?}", name),
            }
        }
        map
    }
}

/// Full header set for `target`: baseline, domain `Referer`/`Origin`, then
/// `overrides`.
pub fn resolve_headers(target: &str, overrides: &Overrides) -> ResolvedHeaders {
    let mut headers = baseline();
    let (referer, origin) = referer_pair(target);
    headers.insert("Referer", referer);
    headers.insert("Origin", origin);
    headers.merge(overrides);
    headers
}

/// Decode the JSON object carried in a `headers` query parameter.
///
/// Malformed input is not an error: the caller falls back to defaults.
/// Non-string values are skipped.
pub fn parse_overrides(raw: Option<&str>) -> Overrides {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Overrides::new();
    };

    match serde_json::from_str::<BTreeMap<String, serde_json::Value>>(raw) {
        Ok(map) => map
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect(),
        Err(e) => {
            warn!("Ignoring malformed headers parameter: {}", e);
            Overrides::new()
        }
    }
}

fn baseline() -> ResolvedHeaders {
    let mut headers = ResolvedHeaders::default();
    for (name, value) in BASELINE {
        headers.insert(*name, *value);
    }
    headers
}

fn referer_pair(target: &str) -> (String, String) {
    let fallback = &REFERER_RULES[0];
    let Ok(url) = Url::parse(target) else {
        return (fallback.referer.to_string(), fallback.origin.to_string());
    };
    let Some(host) = url.host_str().map(|h| h.to_ascii_lowercase()) else {
        return (fallback.referer.to_string(), fallback.origin.to_string());
    };

    if let Some(rule) = REFERER_RULES
        .iter()
        .find(|rule| host.contains(rule.host_contains))
    {
        return (rule.referer.to_string(), rule.origin.to_string());
    }

    let origin = url.origin().ascii_serialization();
    (format!("{origin}/"), origin)
}
