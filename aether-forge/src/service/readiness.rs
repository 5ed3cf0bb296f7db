//! Readiness probing
//!
//! A container counts as ready once its published port answers an HTTP
//! request with any status. A bare TCP connect is not enough: the runtime's
//! port forwarder accepts connections before the app inside is listening.

use async_trait::async_trait;
use std::time::Duration;

/// Per-attempt limit on a readiness request
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Service trait for checking a started app is serving
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn is_ready(&self, port: u16) -> bool;
}

/// Issues `GET /` against the app's host port
#[derive(Debug, Clone)]
pub struct HttpReadinessProbe {
    client: reqwest::Client,
    host: String,
}

impl HttpReadinessProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .timeout(PROBE_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            host: "127.0.0.1".to_string(),
        })
    }
}

#[async_trait]
impl ReadinessProbe for HttpReadinessProbe {
    async fn is_ready(&self, port: u16) -> bool {
        let url = format!("http://{}:{}/", self.host, port);
        match self.client.get(&url).send().await {
            Ok(response) => {
                tracing::debug!(port, status = %response.status(), "Readiness probe answered");
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};

    #[tokio::test]
    async fn test_any_http_status_counts_as_ready() {
        let app = Router::new().route("/", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        assert!(HttpReadinessProbe::new().unwrap().is_ready(port).await);
    }

    #[tokio::test]
    async fn test_closed_port_is_not_ready() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!HttpReadinessProbe::new().unwrap().is_ready(port).await);
    }
}
