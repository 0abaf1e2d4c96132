use std::env;
use std::time::Duration;

/// Prefixes whose first path segment is also part of the upstream path.
const DEFAULT_HLS_PREFIXES: &str = "hls-playback,v2-hls-playback,v3-hls-playback";

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Base URL clients use to reach this relay; every relay link starts
    /// with it. Never ends with `/`.
    pub public_url: String,
    /// CORS allow-list. Empty means any origin.
    pub allowed_origins: Vec<String>,
    /// Deadline for upstream fetches
    pub upstream_timeout: Duration,
    /// Skip the private/reserved address check on targets
    pub allow_private_targets: bool,
    /// First path segments served in mirrored-prefix mode
    pub hls_prefixes: Vec<String>,
    pub is_dev: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable has a default; only values that are present but
    /// unparseable are errors.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let base_port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|e| format!("Invalid PORT: {e}"))?;

        // Cluster deployments run one process per instance on consecutive ports
        let instance: u16 = match env::var("NODE_APP_INSTANCE") {
            Ok(v) => v
                .parse()
                .map_err(|e| format!("Invalid NODE_APP_INSTANCE: {e}"))?,
            Err(_) => 0,
        };
        let port = base_port
            .checked_add(instance)
            .ok_or("PORT + NODE_APP_INSTANCE overflows")?;

        let public_url = env::var("PUBLIC_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| format!("http://{host}:{port}"))
            .trim_end_matches('/')
            .to_string();

        let allowed_origins = split_list(&env::var("ALLOWED_ORIGINS").unwrap_or_default());

        let timeout_secs: u64 = env::var("UPSTREAM_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|e| format!("Invalid UPSTREAM_TIMEOUT_SECS: {e}"))?;
        if timeout_secs == 0 {
            return Err("UPSTREAM_TIMEOUT_SECS must be greater than zero".into());
        }

        let allow_private_targets = env::var("ALLOW_PRIVATE_TARGETS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(is_dev);

        let hls_prefixes = split_list(
            &env::var("HLS_PREFIXES").unwrap_or_else(|_| DEFAULT_HLS_PREFIXES.to_string()),
        )
        .into_iter()
        .map(|p| p.trim_matches('/').to_string())
        .filter(|p| !p.is_empty())
        .collect();

        Ok(Config {
            host,
            port,
            public_url,
            allowed_origins,
            upstream_timeout: Duration::from_secs(timeout_secs),
            allow_private_targets,
            hls_prefixes,
            is_dev,
        })
    }

    /// Address the listener binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
