//! Cached bridge configuration.
//!
//! The configuration store lives on the privileged side; the page only
//! ever sees a cached snapshot, refreshed when the privileged side
//! notifies of a change. A malformed or absent cache degrades to
//! "proxying disabled" — it never raises.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

/// One configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Domain rule pattern evaluated against the page origin.
    pub domain_rules: String,
    /// Whether the debugging service is reached over TLS.
    #[serde(rename = "enableSSL")]
    pub enable_ssl: bool,
    /// Host (optionally host:port) of the debugging service.
    pub service_address: String,
}

impl BridgeConfig {
    /// Host part of the configured service address.
    ///
    /// Bracketed IPv6 literals keep their brackets, matching what URL
    /// parsing reports for the request side of the comparison.
    pub fn service_host(&self) -> String {
        match Url::parse(&format!("http://{}", self.service_address)) {
            Ok(url) => url
                .host_str()
                .unwrap_or(&self.service_address)
                .to_string(),
            Err(_) => self.service_address.clone(),
        }
    }
}

/// Synchronously readable configuration cache.
#[derive(Clone, Default)]
pub struct ConfigCache {
    inner: Arc<RwLock<Option<BridgeConfig>>>,
}

impl ConfigCache {
    /// An empty cache: proxying disabled until the first refresh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh from a raw JSON notification.
    ///
    /// Malformed input clears the cache instead of raising, so a broken
    /// store can only ever disable proxying.
    pub fn refresh(&self, raw: &str) {
        match serde_json::from_str::<BridgeConfig>(raw) {
            Ok(config) => {
                debug!(service = %config.service_address, "configuration cache refreshed");
                *self.write() = Some(config);
            }
            Err(e) => {
                warn!("malformed configuration ignored, proxying disabled: {}", e);
                *self.write() = None;
            }
        }
    }

    /// Replace the cached snapshot directly.
    pub fn set(&self, config: BridgeConfig) {
        *self.write() = Some(config);
    }

    /// Drop the cached snapshot.
    pub fn clear(&self) {
        *self.write() = None;
    }

    /// Current snapshot, if any.
    pub fn snapshot(&self) -> Option<BridgeConfig> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<BridgeConfig>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
