use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Errors surfaced by the relay to its HTTP callers.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or unparseable target, host, or path.
    #[error("{0}")]
    BadRequest(String),

    /// Target points at a private or reserved address.
    #[error("Target not allowed: {0}")]
    ForbiddenTarget(String),

    /// Connection, timeout, or redirect-limit failure talking to the origin.
    #[error("Failed to fetch upstream content")]
    UpstreamFetch(#[from] reqwest::Error),

    /// Origin did not answer within the upstream timeout.
    #[error("Upstream timed out after {0:?}")]
    UpstreamTimeout(std::time::Duration),

    /// Origin answered a playlist fetch with a non-success status.
    #[error("Upstream returned {0}")]
    UpstreamStatus(u16),

    /// Fetched body does not start with `#EXTM3U`.
    #[error("Upstream content is not an HLS playlist")]
    InvalidPlaylist,

    /// Body could not be read or decompressed.
    #[error("Failed to read upstream content")]
    ReadFailed(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::ForbiddenTarget(_) => StatusCode::FORBIDDEN,
            RelayError::UpstreamFetch(_)
            | RelayError::UpstreamStatus(_)
            | RelayError::InvalidPlaylist => StatusCode::BAD_GATEWAY,
            RelayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RelayError::ReadFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Extra context for the `details` field of the JSON envelope.
    fn details(&self) -> Option<String> {
        match self {
            RelayError::UpstreamFetch(e) => Some(e.to_string()),
            RelayError::ReadFailed(detail) => Some(detail.clone()),
            _ => None,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let details = self.details();

        if status.is_server_error() {
            error!("{}: {:?}", self, details);
        } else {
            warn!("{}: {:?}", self, details);
        }

        let body = json!({
            "error": self.to_string(),
            "details": details,
        });

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
