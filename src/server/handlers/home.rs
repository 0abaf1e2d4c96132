use crate::server::state::AppState;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

/// `GET /`: describe the available endpoints.
pub async fn home(State(state): State<AppState>) -> Json<Value> {
    let allowed_origins = if state.config.allowed_origins.is_empty() {
        "All (*)".to_string()
    } else {
        state.config.allowed_origins.join(", ")
    };

    Json(json!({
        "message": "HLS Cross-Origin Relay",
        "endpoints": {
            "m3u8": "/proxy?url={m3u8_url}&headers={optional_headers}",
            "ts": "/ts-proxy?url={segment_url}&headers={optional_headers}",
            "mp4": "/mp4-proxy?url={mp4_url}&headers={optional_headers}",
            "fetch": "/fetch?url={any_url}&ref={optional_referer}",
            "prefixed": "/{prefix}/{path}?host={origin}&headers={optional_headers}",
            "path": "/{host}/{path}",
        },
        "allowedOrigins": allowed_origins,
    }))
}

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn serve_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
