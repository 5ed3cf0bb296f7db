//! App registry
//!
//! The identifier → port map is the only proxy state. Writes come from
//! pipeline completions and teardown; reads come from every proxied request.
//! All access goes through this type so the locking discipline lives here.

use aether_core::dto::proxy::AppInfo;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use crate::config::ProxyConfig;

/// In-memory registry of deployed apps
#[derive(Debug)]
pub struct AppRegistry {
    config: ProxyConfig,
    apps: RwLock<HashMap<String, u16>>,
}

impl AppRegistry {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            apps: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Maps `app_id` to `port` and returns the app's public URL.
    ///
    /// Re-registering an identifier replaces its port (last write wins).
    pub fn register(&self, app_id: &str, port: u16) -> String {
        let previous = self
            .apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(app_id.to_string(), port);

        let url = self.config.public_url(app_id);
        match previous {
            Some(old) if old != port => {
                info!(app_id, old_port = old, port, "Re-registered app at {}", url)
            }
            _ => info!(app_id, port, "Registered app at {}", url),
        }
        url
    }

    /// Removes `app_id`, returning the port it pointed at
    pub fn unregister(&self, app_id: &str) -> Option<u16> {
        let removed = self
            .apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(app_id);

        if let Some(port) = removed {
            info!(app_id, port, "Unregistered app");
        }
        removed
    }

    /// Removes `app_id` only while it still points at `port`.
    ///
    /// Returns `true` if the entry was removed. Used by teardown so that an
    /// old deployment never removes the route of a newer one.
    pub fn unregister_if(&self, app_id: &str, port: u16) -> bool {
        let mut apps = self.apps.write().unwrap_or_else(PoisonError::into_inner);
        if apps.get(app_id) == Some(&port) {
            apps.remove(app_id);
            info!(app_id, port, "Unregistered app");
            true
        } else {
            debug!(app_id, port, "Skipping unregister, route points elsewhere");
            false
        }
    }

    pub fn lookup(&self, app_id: &str) -> Option<u16> {
        self.apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app_id)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.apps.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn public_url(&self, app_id: &str) -> String {
        self.config.public_url(app_id)
    }

    /// Snapshot of all registered apps, sorted by identifier
    pub fn snapshot(&self) -> Vec<AppInfo> {
        let apps = self.apps.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<AppInfo> = apps
            .iter()
            .map(|(id, port)| AppInfo {
                id: id.clone(),
                port: *port,
                subdomain: self.config.public_host(id),
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }
}
