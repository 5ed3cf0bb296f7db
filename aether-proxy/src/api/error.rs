//! Proxy Error Handling
//!
//! Routing failures are HTTP responses, never process-level errors.

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use std::error::Error as _;
use thiserror::Error;

use crate::api::pages;
use crate::api::proxy::apply_cors;

/// Resolvable routing failure
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Subdomain present but not registered
    #[error("no deployment found for {app_id}")]
    AppNotFound { app_id: String, listing_url: String },

    /// Backend refused the connection or failed mid-request
    #[error("backend for {app_id} on port {port} is unreachable: {source}")]
    Unreachable {
        app_id: String,
        port: u16,
        listing_url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Client body exceeded the buffering limit
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Client body could not be read (disconnect, malformed chunking)
    #[error("failed to read request body: {0}")]
    RequestBody(#[source] axum::Error),
}

impl ProxyError {
    /// Classifies a failure of reading the request body under `limit`
    pub fn from_body_error(error: axum::Error, limit: usize) -> Self {
        let over_limit = error
            .source()
            .is_some_and(|source| source.is::<LengthLimitError>());

        if over_limit {
            ProxyError::BodyTooLarge { limit }
        } else {
            ProxyError::RequestBody(error)
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ProxyError::AppNotFound {
                app_id,
                listing_url,
            } => {
                tracing::debug!("No route for {}", app_id);
                (
                    StatusCode::NOT_FOUND,
                    pages::not_found_page(app_id, listing_url),
                )
            }
            ProxyError::Unreachable {
                app_id,
                listing_url,
                ..
            } => {
                tracing::error!("Proxy error: {}", self);
                (
                    StatusCode::BAD_GATEWAY,
                    pages::bad_gateway_page(app_id, listing_url),
                )
            }
            ProxyError::BodyTooLarge { .. } => {
                tracing::warn!("Rejected request: {}", self);
                return plain(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
            }
            ProxyError::RequestBody(e) => {
                tracing::warn!("Rejected request body: {}", e);
                return plain(StatusCode::BAD_REQUEST, "Malformed request body");
            }
        };

        let mut response = (status, Html(body)).into_response();
        apply_cors(response.headers_mut());
        response
    }
}

fn plain(status: StatusCode, message: &'static str) -> Response {
    let mut response = (status, message).into_response();
    apply_cors(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, Bytes};

    #[tokio::test]
    async fn test_oversized_body_is_413() {
        let err = axum::body::to_bytes(Body::from("0123456789"), 4)
            .await
            .unwrap_err();

        let err = ProxyError::from_body_error(err, 4);
        assert!(matches!(err, ProxyError::BodyTooLarge { limit: 4 }));

        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_broken_body_is_400() {
        let stream = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client went away",
            )),
        ]);
        let err = axum::body::to_bytes(Body::from_stream(stream), 1024)
            .await
            .unwrap_err();

        let err = ProxyError::from_body_error(err, 1024);
        assert!(matches!(err, ProxyError::RequestBody(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
