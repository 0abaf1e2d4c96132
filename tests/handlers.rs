//! Handler-level tests using tower::ServiceExt::oneshot.
//!
//! Tests the full Axum router (layers + handlers) without binding a TCP
//! listener. Upstream origins are wiremock servers on loopback, so private
//! targets are allowed unless a test says otherwise.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use hls_relay::config::Config;
use hls_relay::server::build_router;
use http_body_util::BodyExt;
use std::time::Duration;
use tower::ServiceExt;
use url::{Url, form_urlencoded};
use wiremock::matchers::{header as header_is, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PUBLIC: &str = "http://relay.test";

const KEYED_PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:4\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n\
#EXTINF:4.0,\n\
seg1.ts\n\
#EXTINF:4.0,\n\
seg2.ts\n\
#EXT-X-ENDLIST\n";

/// Build a test config with sensible defaults.
fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        public_url: PUBLIC.to_string(),
        allowed_origins: Vec::new(),
        upstream_timeout: Duration::from_secs(5),
        allow_private_targets: true,
        hls_prefixes: vec![
            "hls-playback".to_string(),
            "v2-hls-playback".to_string(),
            "v3-hls-playback".to_string(),
        ],
        is_dev: true,
    }
}

async fn app() -> Router {
    build_router(test_config()).await.unwrap()
}

fn enc(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn query_param(link: &str, name: &str) -> Option<String> {
    Url::parse(link)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

// ── Service endpoints ───────────────────────────────────────────────────────

#[tokio::test]
async fn health_returns_200_with_json() {
    let resp = app().await.oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert!(json["uptime_seconds"].is_number());
}

#[tokio::test]
async fn all_responses_include_version_header() {
    let resp = app().await.oneshot(get("/health")).await.unwrap();
    let version = resp
        .headers()
        .get("x-relay-version")
        .expect("missing X-Relay-Version header");

    assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn root_describes_endpoints() {
    let resp = app().await.oneshot(get("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert!(json["endpoints"]["m3u8"].as_str().unwrap().starts_with("/proxy"));
    assert_eq!(json["allowedOrigins"], "All (*)");
}

#[tokio::test]
async fn metrics_endpoint_renders_prometheus_text() {
    let app = app().await;
    // Generate at least one request sample first
    app.clone().oneshot(get("/proxy")).await.unwrap();

    let resp = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("relay_requests_total"));
}

// ── Request validation ──────────────────────────────────────────────────────

#[tokio::test]
async fn proxy_without_url_is_400_with_envelope() {
    let resp = app().await.oneshot(get("/proxy")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let json = body_json(resp).await;
    assert_eq!(json["error"], "Missing url parameter");
    assert!(json["details"].is_null());
}

#[tokio::test]
async fn proxy_with_relative_url_is_400() {
    let resp = app()
        .await
        .oneshot(get("/proxy?url=%2Fpath%2Fplaylist.m3u8"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn private_target_is_403_when_not_allowed() {
    let mut config = test_config();
    config.allow_private_targets = false;
    let app = build_router(config).await.unwrap();

    let uri = format!("/ts-proxy?url={}", enc("http://169.254.169.254/latest/meta-data/"));
    let resp = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn single_segment_path_is_400() {
    let resp = app().await.oneshot(get("/nonexistent")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn prefixed_route_without_host_is_400() {
    let resp = app()
        .await
        .oneshot(get("/hls-playback/abc/index.m3u8"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "Missing host parameter");
}

#[tokio::test]
async fn path_embedded_private_target_is_403() {
    let mut config = test_config();
    config.allow_private_targets = false;
    let app = build_router(config).await.unwrap();

    let headers = enc(r#"{"X-Token":"secret"}"#);
    let uri = format!("/127.0.0.1:9/live/index.m3u8?headers={headers}");
    let resp = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

// ── Playlist rewriting ──────────────────────────────────────────────────────

#[tokio::test]
async fn proxy_rewrites_key_and_segments() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/path/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(KEYED_PLAYLIST))
        .mount(&origin)
        .await;

    let playlist_url = format!("{}/path/playlist.m3u8", origin.uri());
    let resp = app()
        .await
        .oneshot(get(&format!("/proxy?url={}", enc(&playlist_url))))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_TYPE],
        "application/vnd.apple.mpegurl"
    );

    let body = body_text(resp).await;
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), KEYED_PLAYLIST.lines().count());

    let key_line = lines
        .iter()
        .find(|l| l.starts_with("#EXT-X-KEY"))
        .unwrap();
    let key_link = key_line
        .split("URI=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .unwrap();
    assert!(key_link.starts_with("http://relay.test/ts-proxy?url="));
    assert_eq!(
        query_param(key_link, "url").unwrap(),
        format!("{}/path/key.bin", origin.uri())
    );

    let segments: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|l| !l.starts_with('#') && !l.is_empty())
        .collect();
    assert_eq!(segments.len(), 2);
    for (link, name) in segments.iter().zip(["seg1.ts", "seg2.ts"]) {
        assert_eq!(
            query_param(link, "url").unwrap(),
            format!("{}/path/{}", origin.uri(), name)
        );
        let headers: serde_json::Value =
            serde_json::from_str(&query_param(link, "headers").unwrap()).unwrap();
        assert!(headers["User-Agent"].is_string());
    }
}

#[tokio::test]
async fn proxy_forwards_header_overrides_upstream_and_into_links() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_is("x-token", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXTINF:4,\nseg.ts\n"))
        .mount(&origin)
        .await;

    let playlist_url = format!("{}/live.m3u8", origin.uri());
    let uri = format!(
        "/proxy?url={}&headers={}",
        enc(&playlist_url),
        enc(r#"{"X-Token":"abc"}"#)
    );
    let resp = app().await.oneshot(get(&uri)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_text(resp).await;
    let seg = body.lines().find(|l| l.starts_with("http")).unwrap();
    let headers: serde_json::Value =
        serde_json::from_str(&query_param(seg, "headers").unwrap()).unwrap();
    assert_eq!(headers["X-Token"], "abc");
}

#[tokio::test]
async fn proxy_rejects_non_playlist_with_502() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
        .mount(&origin)
        .await;

    let uri = format!("/proxy?url={}", enc(&format!("{}/x.m3u8", origin.uri())));
    let resp = app().await.oneshot(get(&uri)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        body_json(resp).await["error"],
        "Upstream content is not an HLS playlist"
    );
}

#[tokio::test]
async fn proxy_upstream_error_status_is_502() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&origin)
        .await;

    let uri = format!("/proxy?url={}", enc(&format!("{}/gone.m3u8", origin.uri())));
    let resp = app().await.oneshot(get(&uri)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(resp).await["error"], "Upstream returned 404");
}

#[tokio::test]
async fn detached_prefix_route_rewrites_in_prefix_style() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/path/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(KEYED_PLAYLIST))
        .mount(&origin)
        .await;

    let uri = format!("/file1/path/playlist.m3u8?host={}", enc(&origin.uri()));
    let resp = app().await.oneshot(get(&uri)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_text(resp).await;
    let seg = body.lines().find(|l| l.contains("seg1.ts")).unwrap();
    assert!(seg.starts_with("http://relay.test/file1/path/seg1.ts?host="));
    assert_eq!(query_param(seg, "host").unwrap(), origin.uri());
    assert!(body.contains("URI=\"http://relay.test/file1/path/key.bin?host="));
}

// ── Media relay ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn mp4_proxy_forwards_range() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/movie.mp4"))
        .and(header_is("range", "bytes=0-99"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 0-99/5000")
                .set_body_bytes(vec![1u8; 100]),
        )
        .mount(&origin)
        .await;

    let uri = format!("/mp4-proxy?url={}", enc(&format!("{}/movie.mp4", origin.uri())));
    let req = Request::builder()
        .uri(uri)
        .header(header::RANGE, "bytes=0-99")
        .body(Body::empty())
        .unwrap();

    let resp = app().await.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes 0-99/5000");
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(resp.headers()[header::ACCEPT_RANGES], "bytes");
}

#[tokio::test]
async fn ts_proxy_guesses_content_type() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x47u8; 188]))
        .mount(&origin)
        .await;

    let uri = format!("/ts-proxy?url={}", enc(&format!("{}/a/seg1.ts", origin.uri())));
    let resp = app().await.oneshot(get(&uri)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "video/mp2t");

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.len(), 188);
}

#[tokio::test]
async fn fetch_presents_ref_as_referer_and_origin() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_is("referer", "https://player.example/watch/1"))
        .and(header_is("origin", "https://player.example"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG".to_vec()))
        .mount(&origin)
        .await;

    let uri = format!(
        "/fetch?url={}&ref={}",
        enc(&format!("{}/thumb.png", origin.uri())),
        enc("https://player.example/watch/1")
    );
    let resp = app().await.oneshot(get(&uri)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
}

// ── CORS ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn preflight_allows_any_origin_by_default() {
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/ts-proxy")
        .header(header::ORIGIN, "https://player.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "range")
        .body(Body::empty())
        .unwrap();

    let resp = app().await.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert!(
        resp.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
            .to_str()
            .unwrap()
            .contains("GET")
    );
}

#[tokio::test]
async fn allow_list_echoes_listed_origin_with_credentials() {
    let mut config = test_config();
    config.allowed_origins = vec!["https://player.example".to_string()];
    let app = build_router(config).await.unwrap();

    let req = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "https://player.example")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(
        resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://player.example"
    );
    assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

    let req = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "https://evil.example")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}
