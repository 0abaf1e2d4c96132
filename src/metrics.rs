//! Prometheus metrics for the relay.

use crate::hls::rewrite::RewriteStats;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the global recorder on first call and return its render handle.
///
/// Later calls reuse the same handle. Returns `None` if another recorder was
/// already installed by something else in the process.
pub fn init() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            match metrics::set_global_recorder(recorder) {
                Ok(()) => Some(handle),
                Err(e) => {
                    warn!("Metrics recorder not installed: {}", e);
                    None
                }
            }
        })
        .clone()
}

pub fn record_request(endpoint: &'static str, status: u16) {
    counter!(
        "relay_requests_total",
        "endpoint" => endpoint,
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_duration(endpoint: &'static str, start: Instant) {
    histogram!("relay_request_duration_seconds", "endpoint" => endpoint)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error() {
    counter!("relay_upstream_errors_total").increment(1);
}

pub fn record_rewrite(stats: &RewriteStats) {
    counter!("relay_playlists_rewritten_total").increment(1);
    counter!("relay_references_rewritten_total").increment(stats.rewritten as u64);
    counter!("relay_references_unresolved_total").increment(stats.unresolved as u64);
}
