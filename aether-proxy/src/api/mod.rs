//! API Module
//!
//! HTTP surface of the reverse proxy:
//! - `GET /health`: JSON snapshot of registered apps
//! - `OPTIONS *`: CORS preflight
//! - anything else: routed by subdomain (proxy, 404, or listing page)

pub mod error;
pub mod health;
pub mod pages;
pub mod proxy;

use axum::{Router, routing::get};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::registry::AppRegistry;

/// Shared state for proxy handlers
#[derive(Debug, Clone)]
pub struct ProxyState {
    pub registry: Arc<AppRegistry>,
    pub client: reqwest::Client,
}

impl ProxyState {
    /// Creates proxy state with an HTTP client suited to forwarding.
    ///
    /// Redirects are relayed to the caller instead of followed, and
    /// environment proxies are ignored since backends are local.
    pub fn new(registry: Arc<AppRegistry>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self { registry, client })
    }
}

/// Create the proxy router
pub fn create_router(state: ProxyState) -> Router {
    Router::new()
        .route(
            "/health",
            get(health::health_check).options(proxy::preflight),
        )
        .fallback(proxy::dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serves the proxy on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: ProxyState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = state.registry.config().clone();
    tracing::info!("Reverse proxy listening on {}", listener.local_addr()?);
    tracing::info!("   Dashboard: {}", config.listing_url());
    tracing::info!("   Apps: {}", config.public_url("<appId>"));

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use axum::body::{Body, Bytes};
    use axum::http::{HeaderMap, Method, Request, StatusCode, header};
    use axum::routing::post;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> ProxyState {
        let registry = Arc::new(AppRegistry::new(ProxyConfig::default()));
        ProxyState::new(registry).unwrap()
    }

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Starts a throwaway backend app on an ephemeral port
    async fn spawn_backend() -> u16 {
        let app = Router::new()
            .route(
                "/",
                get(|| async { ([("x-backend", "yes")], "hello from backend") }),
            )
            .route(
                "/echo",
                post(|method: Method, uri: axum::http::Uri, body: String| async move {
                    format!("{} {} {}", method, uri, body)
                }),
            )
            .route(
                "/host",
                get(|headers: HeaderMap| async move {
                    headers
                        .get(header::HOST)
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                }),
            )
            .route(
                "/stream",
                get(|| async {
                    let chunks = vec![
                        Ok::<_, std::io::Error>(Bytes::from_static(b"chunk-1 ")),
                        Ok(Bytes::from_static(b"chunk-2")),
                    ];
                    (
                        [(header::CONNECTION, "keep-alive")],
                        Body::from_stream(futures_util::stream::iter(chunks)),
                    )
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    fn request(method: Method, host: &str, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, host)
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_lists_registered_apps() {
        let state = test_state();
        state.registry.register("acme-pr1", 5001);
        let app = create_router(state);

        let resp = app
            .oneshot(request(Method::GET, "localhost:8080", "/health", Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["domain"], "localhost");
        assert_eq!(json["activeApps"], 1);
        assert_eq!(json["apps"][0]["id"], "acme-pr1");
        assert_eq!(json["apps"][0]["port"], 5001);
        assert_eq!(json["apps"][0]["subdomain"], "acme-pr1.localhost:8080");
    }

    #[tokio::test]
    async fn test_options_short_circuits_with_cors() {
        let app = create_router(test_state());

        let resp = app
            .oneshot(request(
                Method::OPTIONS,
                "unknown.localhost:8080",
                "/api/anything",
                Body::empty(),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_no_subdomain_serves_listing() {
        let state = test_state();
        state.registry.register("acme-pr1", 5001);
        let app = create_router(state);

        let resp = app
            .oneshot(request(Method::GET, "localhost:8080", "/", Body::empty()))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let page = body_string(resp).await;
        assert!(page.contains("acme-pr1"));
        assert!(page.contains("Aether Reverse Proxy"));
    }

    #[tokio::test]
    async fn test_unknown_subdomain_is_404_with_link_back() {
        let app = create_router(test_state());

        let resp = app
            .oneshot(request(
                Method::GET,
                "unknown.localhost:8080",
                "/",
                Body::empty(),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let page = body_string(resp).await;
        assert!(page.contains("unknown"));
        assert!(page.contains(r#"href="http://localhost:8080""#));
    }

    #[tokio::test]
    async fn test_forwards_to_registered_backend() {
        let port = spawn_backend().await;
        let state = test_state();
        state.registry.register("acme-pr1", port);
        let app = create_router(state);

        let resp = app
            .oneshot(request(
                Method::GET,
                "acme-pr1.localhost:8080",
                "/",
                Body::empty(),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-backend"], "yes");
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(body_string(resp).await, "hello from backend");
    }

    #[tokio::test]
    async fn test_forwards_method_path_query_and_body() {
        let port = spawn_backend().await;
        let state = test_state();
        state.registry.register("acme-pr1", port);
        let app = create_router(state);

        let resp = app
            .oneshot(request(
                Method::POST,
                "acme-pr1.localhost:8080",
                "/echo?x=1",
                Body::from("ping"),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "POST /echo?x=1 ping");
    }

    #[tokio::test]
    async fn test_forwards_original_host_header() {
        let port = spawn_backend().await;
        let state = test_state();
        state.registry.register("acme-pr1", port);
        let app = create_router(state);

        let resp = app
            .oneshot(request(
                Method::GET,
                "acme-pr1.localhost:8080",
                "/host",
                Body::empty(),
            ))
            .await
            .unwrap();

        assert_eq!(body_string(resp).await, "acme-pr1.localhost:8080");
    }

    #[tokio::test]
    async fn test_streamed_response_drops_hop_by_hop_headers() {
        let port = spawn_backend().await;
        let state = test_state();
        state.registry.register("acme-pr1", port);
        let app = create_router(state);

        let resp = app
            .oneshot(request(
                Method::GET,
                "acme-pr1.localhost:8080",
                "/stream",
                Body::empty(),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.headers().contains_key(header::TRANSFER_ENCODING));
        assert!(!resp.headers().contains_key(header::CONNECTION));
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(body_string(resp).await, "chunk-1 chunk-2");
    }

    #[tokio::test]
    async fn test_last_registration_wins_for_routing() {
        let stale = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stale_port = stale.local_addr().unwrap().port();
        drop(stale);
        let live_port = spawn_backend().await;

        let state = test_state();
        state.registry.register("acme-pr1", stale_port);
        state.registry.register("acme-pr1", live_port);
        let app = create_router(state);

        let resp = app
            .oneshot(request(
                Method::GET,
                "acme-pr1.localhost:8080",
                "/",
                Body::empty(),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_502() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let state = test_state();
        state.registry.register("gone", port);
        let app = create_router(state);

        let resp = app
            .oneshot(request(Method::GET, "gone.localhost:8080", "/", Body::empty()))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let page = body_string(resp).await;
        assert!(page.contains("View active deployments"));
    }
}
