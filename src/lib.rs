pub mod config;
pub mod error;
pub mod headers;
pub mod hls;
pub mod metrics;
pub mod relay;
pub mod server;
