//! Aether Proxy
//!
//! Subdomain-routing reverse proxy for deployed apps.
//!
//! - Configuration: listen port, base domain, protocol
//! - Registry: app identifier → backend port
//! - API: `/health`, CORS preflight, listing page, forwarding

pub mod api;
pub mod config;
pub mod registry;

pub use api::{ProxyState, create_router, serve};
pub use config::ProxyConfig;
pub use registry::AppRegistry;
