pub mod handlers;
pub mod state;
pub mod target;

use crate::config::Config;
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    response::Response,
    routing::get,
};
use state::AppState;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

const VERSION_HEADER: HeaderName = HeaderName::from_static("x-relay-version");

/// Build the Axum router with all routes and layers.
///
/// Split out from [`start`] so tests can drive the router without binding a
/// listener.
pub async fn build_router(config: Config) -> Result<Router, Box<dyn std::error::Error>> {
    let cors = cors_layer(&config.allowed_origins);
    let state = AppState::new(config)?;

    let app = Router::new()
        .route("/", get(handlers::home::home))
        .route("/health", get(handlers::home::health_check))
        .route("/metrics", get(handlers::home::serve_metrics))
        .route("/proxy", get(handlers::playlist::serve_playlist))
        .route("/ts-proxy", get(handlers::segment::serve_segment))
        .route("/mp4-proxy", get(handlers::segment::serve_mp4))
        .route("/fetch", get(handlers::segment::serve_fetch))
        .fallback(handlers::prefixed::dispatch)
        .layer(middleware::map_response(stamp_version))
        .layer(cors)
        .with_state(state);

    Ok(app)
}

/// Start the Axum HTTP server
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.bind_addr();
    let public_url = config.public_url.clone();

    if config.allowed_origins.is_empty() {
        info!("Allowed origins: All (*)");
    } else {
        info!("Allowed origins: {}", config.allowed_origins.join(", "));
    }
    if config.allow_private_targets {
        warn!("Private and loopback targets are allowed");
    }

    let app = build_router(config).await?;

    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("🚀 Server listening on http://{} (links use {})", addr, public_url);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}

async fn stamp_version(mut response: Response) -> Response {
    response.headers_mut().insert(
        VERSION_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

/// Any origin without credentials when the allow-list is empty, otherwise
/// only the listed origins, with credentials.
fn cors_layer(allowed: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::RANGE])
        .expose_headers([
            header::CONTENT_RANGE,
            header::ACCEPT_RANGES,
            header::CONTENT_LENGTH,
        ]);

    if allowed.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid allowed origin {:?}", origin);
                None
            }
        })
        .collect();

    layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}
