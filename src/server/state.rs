use crate::{
    config::Config,
    error::Result,
    relay::{Relay, build_client},
    server::target::check_target,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Outbound fetcher wrapping the shared pooled client
    pub relay: Relay,
    /// Prometheus render handle, absent if the recorder could not be installed
    pub metrics: Option<PrometheusHandle>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> std::result::Result<Self, reqwest::Error> {
        let client = build_client(config.upstream_timeout, config.allow_private_targets)?;
        let relay = Relay::new(client, config.upstream_timeout);

        Ok(Self {
            config: Arc::new(config),
            relay,
            metrics: crate::metrics::init(),
            started_at: Instant::now(),
        })
    }

    /// Apply the private-address check unless the deployment allows it.
    pub fn permit(&self, target: &Url) -> Result<()> {
        if self.config.allow_private_targets {
            return Ok(());
        }
        check_target(target)
    }
}
