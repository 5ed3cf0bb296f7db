//! Proxy status DTOs

use serde::{Deserialize, Serialize};

/// One registered application as reported by `GET /health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub id: String,
    pub port: u16,
    /// Public host the app is reachable at, e.g. `acme-pr1.localhost:8080`
    pub subdomain: String,
}

/// Body of `GET /health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub domain: String,
    pub active_apps: usize,
    pub apps: Vec<AppInfo>,
}
