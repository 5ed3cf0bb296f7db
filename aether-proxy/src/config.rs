//! Proxy configuration
//!
//! Controls how public URLs are built and how the Host header is mapped
//! back to an app identifier.

/// Base domain used for local development
pub const LOCAL_DOMAIN: &str = "localhost";

/// Reverse proxy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Port the proxy listens on, also embedded in local-dev URLs
    pub port: u16,

    /// Address the listener binds to
    pub bind_host: String,

    /// Base domain apps are exposed under (`localhost` in development)
    pub base_domain: String,

    /// Whether public URLs use `https://`
    pub https: bool,

    /// Host the backends listen on
    pub upstream_host: String,
}

impl ProxyConfig {
    pub fn new(port: u16, base_domain: impl Into<String>, https: bool) -> Self {
        Self {
            port,
            bind_host: "0.0.0.0".to_string(),
            base_domain: base_domain.into().trim_matches('.').to_ascii_lowercase(),
            https,
            upstream_host: "127.0.0.1".to_string(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.base_domain == LOCAL_DOMAIN
    }

    pub fn protocol(&self) -> &'static str {
        if self.https { "https" } else { "http" }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    /// Public host for an app: `<id>.localhost:<port>` or `<id>.<domain>`
    pub fn public_host(&self, app_id: &str) -> String {
        if self.is_local() {
            format!("{}.{}:{}", app_id, LOCAL_DOMAIN, self.port)
        } else {
            format!("{}.{}", app_id, self.base_domain)
        }
    }

    pub fn public_url(&self, app_id: &str) -> String {
        format!("{}://{}", self.protocol(), self.public_host(app_id))
    }

    /// URL of the listing page served on the bare domain
    pub fn listing_url(&self) -> String {
        if self.is_local() {
            format!("{}://{}:{}", self.protocol(), LOCAL_DOMAIN, self.port)
        } else {
            format!("{}://{}", self.protocol(), self.base_domain)
        }
    }

    /// Extracts the app identifier from a Host header value.
    ///
    /// Accepts `<id>.<base_domain>` with or without a `:port` suffix. Returns
    /// `None` for the bare domain, for foreign domains and for nested
    /// subdomains such as `a.b.<base_domain>`.
    pub fn extract_subdomain(&self, host: &str) -> Option<String> {
        let host = strip_port(host.trim()).trim_end_matches('.').to_ascii_lowercase();
        let suffix = format!(".{}", self.base_domain);

        let label = host.strip_suffix(&suffix)?;
        if label.is_empty() || label.contains('.') {
            return None;
        }

        Some(label.to_string())
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::new(8080, LOCAL_DOMAIN, false)
    }
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}
