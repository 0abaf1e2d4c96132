//! Line-level playlist rewriting.
//!
//! The playlist is never parsed into a model and re-serialized: each line is
//! classified and either copied through byte-for-byte or has its resource
//! reference swapped for a relay link. Unknown tags, attribute order and
//! whitespace all survive untouched.

use crate::error::{RelayError, Result};
use crate::hls::link::LinkBuilder;
use crate::hls::resolver::{Resolution, resolve};
use tracing::debug;
use url::Url;

/// Media type of every rewritten playlist.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

const PLAYLIST_MARKER: &str = "#EXTM3U";
const MASTER_MARKER: &str = "#EXT-X-STREAM-INF";

/// Directives whose following line is a stream reference in a master playlist.
const STREAM_DIRECTIVES: &[&str] = &["EXT-X-STREAM-INF", "EXT-X-MEDIA", "EXT-X-I-FRAME-STREAM-INF"];

/// Directives whose `URI` attribute names another playlist.
const PLAYLIST_URI_DIRECTIVES: &[&str] = &[
    "EXT-X-MEDIA",
    "EXT-X-I-FRAME-STREAM-INF",
    "EXT-X-RENDITION-REPORT",
];

/// Counters collected during one rewrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// References replaced by relay links.
    pub rewritten: usize,
    /// References left as-is because they could not be resolved.
    pub unresolved: usize,
}

/// A rewritten playlist body.
#[derive(Debug, Clone)]
pub struct Rewritten {
    pub body: String,
    pub stats: RewriteStats,
}

/// Check that `body` is an HLS playlist: after leading whitespace (and an
/// optional byte-order mark) it must start with `#EXTM3U`.
pub fn validate_playlist(body: &str) -> Result<()> {
    let start = body.trim_start_matches('\u{feff}').trim_start();
    if start.starts_with(PLAYLIST_MARKER) {
        Ok(())
    } else {
        Err(RelayError::InvalidPlaylist)
    }
}

/// A master playlist lists variant streams rather than segments.
pub fn is_master_playlist(body: &str) -> bool {
    body.contains(MASTER_MARKER)
}

/// Classification of one playlist line, borrowed from the line itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind<'a> {
    Blank,
    /// `#` line without a quoted URI. `name` is empty for plain comments.
    Directive { name: &'a str },
    /// `#` line carrying `URI="..."`; `start..end` spans the quoted value
    /// including both quotes.
    DirectiveWithUri {
        name: &'a str,
        uri: &'a str,
        start: usize,
        end: usize,
    },
    /// Segment URI or variant playlist URI.
    Reference(&'a str),
}

fn classify(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if !trimmed.starts_with('#') {
        return LineKind::Reference(trimmed);
    }

    let name = directive_name(trimmed);
    match extract_quoted_uri(line) {
        Some((uri, start, end)) => LineKind::DirectiveWithUri {
            name,
            uri,
            start,
            end,
        },
        None => LineKind::Directive { name },
    }
}

/// Tag name of a `#EXT...` line (`EXT-X-KEY` for `#EXT-X-KEY:METHOD=...`).
/// Comments that are not tags have an empty name.
fn directive_name(line: &str) -> &str {
    let body = &line[1..];
    if !body.starts_with("EXT") {
        return "";
    }
    body.split(':').next().unwrap_or(body).trim_end()
}

/// Find the `URI="..."` attribute of a tag line.
///
/// Returns the value (without quotes), the byte offset of the opening quote
/// and the byte offset one past the closing quote. Only a standalone `URI`
/// attribute matches; `X-ASSET-URI` and friends do not.
fn extract_quoted_uri(line: &str) -> Option<(&str, usize, usize)> {
    const MARKER: &str = "URI=\"";

    let marker_pos = line.match_indices(MARKER).find_map(|(pos, _)| {
        let preceding = line[..pos].chars().next_back();
        matches!(preceding, Some(':') | Some(',') | Some(' ')).then_some(pos)
    })?;

    let value_start = marker_pos + MARKER.len();
    let closing = line[value_start..].find('"')?;
    let value = &line[value_start..value_start + closing];

    Some((value, value_start - 1, value_start + closing + 1))
}

/// Name of the most recent tag seen in a master playlist.
///
/// Lives only for the duration of one [`rewrite`] call.
#[derive(Debug, Clone, Copy, Default)]
struct TagContext<'a> {
    last: Option<&'a str>,
}

impl<'a> TagContext<'a> {
    fn observe(&mut self, name: &'a str) {
        // Plain comments do not break a tag/URI pair
        if !name.is_empty() {
            self.last = Some(name);
        }
    }

    fn admits_reference(&self) -> bool {
        self.last
            .is_some_and(|name| STREAM_DIRECTIVES.contains(&name))
    }

    fn consume(&mut self) {
        self.last = None;
    }
}

/// Rewrite every fetchable reference in `body` into a relay link.
///
/// `base` is the URL the playlist was fetched from; relative references
/// resolve against it. Blank lines, unrecognized tags and unresolvable
/// references are emitted exactly as they appeared. Line endings are kept.
///
/// # Errors
/// [`RelayError::InvalidPlaylist`] if `body` is not an HLS playlist. Nothing
/// is rewritten in that case.
pub fn rewrite(body: &str, base: &Url, links: &LinkBuilder) -> Result<Rewritten> {
    validate_playlist(body)?;

    let master = is_master_playlist(body);
    let mut context = TagContext::default();
    let mut stats = RewriteStats::default();
    let mut out = String::with_capacity(body.len() * 2);

    for (idx, raw) in body.split('\n').enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        let (line, cr) = match raw.strip_suffix('\r') {
            Some(line) => (line, "\r"),
            None => (raw, ""),
        };

        match classify(line) {
            LineKind::Blank => out.push_str(raw),

            LineKind::Directive { name } => {
                if master {
                    context.observe(name);
                }
                out.push_str(raw);
            }

            LineKind::DirectiveWithUri {
                name,
                uri,
                start,
                end,
            } => {
                if master {
                    context.observe(name);
                }
                let playlist = PLAYLIST_URI_DIRECTIVES.contains(&name);
                match relay_link(uri, base, links, playlist, &mut stats) {
                    Some(link) => {
                        out.push_str(&line[..start]);
                        out.push('"');
                        out.push_str(&link);
                        out.push('"');
                        out.push_str(&line[end..]);
                        out.push_str(cr);
                    }
                    None => out.push_str(raw),
                }
            }

            LineKind::Reference(reference) => {
                if master && !context.admits_reference() {
                    debug!("Leaving {:?} outside stream context unchanged", reference);
                    out.push_str(raw);
                    continue;
                }
                context.consume();

                match relay_link(reference, base, links, master, &mut stats) {
                    Some(link) => {
                        out.push_str(&link);
                        out.push_str(cr);
                    }
                    None => out.push_str(raw),
                }
            }
        }
    }

    debug!(
        "Rewrote playlist from {}: {} references rewritten, {} unresolved",
        base, stats.rewritten, stats.unresolved
    );

    Ok(Rewritten { body: out, stats })
}

fn relay_link(
    reference: &str,
    base: &Url,
    links: &LinkBuilder,
    playlist: bool,
    stats: &mut RewriteStats,
) -> Option<String> {
    if links.is_relay_link(reference) {
        return None;
    }

    match resolve(reference, base) {
        Resolution::Resolved(target) => {
            stats.rewritten += 1;
            Some(if playlist {
                links.playlist_link(&target)
            } else {
                links.link(&target)
            })
        }
        Resolution::Unresolved(original) => {
            debug!("Leaving unresolved reference {:?} unchanged", original);
            stats.unresolved += 1;
            None
        }
    }
}
