//! Proxy API Handlers
//!
//! Routes every non-status request by the Host header's subdomain.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
};

use crate::api::ProxyState;
use crate::api::error::ProxyError;
use crate::api::pages;

/// Headers that describe a single connection and must not be relayed
pub const HOP_BY_HOP_HEADERS: [&str; 4] =
    ["transfer-encoding", "connection", "keep-alive", "upgrade"];

/// Upper bound on a buffered request body
pub const MAX_REQUEST_BODY: usize = 32 * 1024 * 1024;

/// Removes hop-by-hop headers in place
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Merges permissive cross-origin headers, overriding any backend values
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
}

/// OPTIONS *
/// CORS preflight short-circuit, independent of subdomain resolution
pub async fn preflight() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    apply_cors(response.headers_mut());
    response
}

/// Fallback handler for every request that is not a status request
pub async fn dispatch(State(state): State<ProxyState>, req: Request) -> Response {
    if req.method() == Method::OPTIONS {
        return preflight().await;
    }

    let config = state.registry.config();
    let host = request_host(&req);

    let Some(app_id) = config.extract_subdomain(&host) else {
        let apps = state.registry.snapshot();
        return Html(pages::listing_page(config, &apps)).into_response();
    };

    // The port is copied out here; later registry changes do not affect this request
    let Some(port) = state.registry.lookup(&app_id) else {
        return ProxyError::AppNotFound {
            app_id,
            listing_url: config.listing_url(),
        }
        .into_response();
    };

    match forward(&state, &app_id, port, req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Forwards the request to the backend and streams the response back.
///
/// The request body is buffered (bounded by [`MAX_REQUEST_BODY`]); the
/// response body is streamed.
async fn forward(
    state: &ProxyState,
    app_id: &str,
    port: u16,
    req: Request,
) -> Result<Response, ProxyError> {
    let (parts, body) = req.into_parts();

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!(
        "http://{}:{}{}",
        state.registry.config().upstream_host,
        port,
        path
    );

    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| ProxyError::from_body_error(e, MAX_REQUEST_BODY))?;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);

    tracing::debug!("Proxying {} {} to port {}", parts.method, path, port);

    let mut upstream = state.client.request(parts.method, &url).headers(headers);
    if !body.is_empty() {
        upstream = upstream.body(body);
    }

    let backend = upstream
        .send()
        .await
        .map_err(|source| ProxyError::Unreachable {
            app_id: app_id.to_string(),
            port,
            listing_url: state.registry.config().listing_url(),
            source,
        })?;

    let status = backend.status();
    let mut response_headers = backend.headers().clone();
    strip_hop_by_hop(&mut response_headers);
    apply_cors(&mut response_headers);

    let mut response = Response::new(Body::from_stream(backend.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;

    Ok(response)
}

/// Host of the request, from the Host header or the absolute URI
fn request_host(req: &Request) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }

    #[test]
    fn test_apply_cors_overrides_backend_values() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("https://only.example"),
        );

        apply_cors(&mut headers);

        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
        assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_HEADERS));
    }
}
