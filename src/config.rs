//! Runtime configuration, loaded once from JSON.
//!
//! ```json
//! {
//!   "serviceManagerHost": "https://sm.example.com/",
//!   "storageMode": "server",
//!   "maxArrayIndexToStore": 50,
//!   "partialPlayback": { "keepAlive": ["Checkout"] },
//!   "offlineConfig": [ { "service": "Catalog", "action": "STORAGE_THEN_LIVE" } ],
//!   "handlerMap": [
//!     { "element": "submit", "action": "click:webservice", "attr": "Checkout",
//!       "responseHandler": "popup:Order placed", "failureHandler": "popupErrors:" }
//!   ]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::handler_map::HandlerEntry;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_COOKIE_LIFESPAN_SECS: u64 = 60 * 60;

/// Which backend holds field data for the lifetime of the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    #[default]
    Session,
    Server,
}

/// Per-service behavior when the network is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfflineAction {
    /// Tell the user to retry later and drop the request.
    Error,
    /// Queue the request for a later replay.
    SyncLater,
    /// Serve the cached response without touching the network.
    StorageThenLive,
    /// Go to the network, cache what succeeds.
    LiveThenStorage,
}

impl OfflineAction {
    /// Whether successful responses are written to the offline cache.
    pub fn caches_responses(self) -> bool {
        matches!(self, OfflineAction::StorageThenLive | OfflineAction::LiveThenStorage)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineRule {
    pub service: String,
    pub action: OfflineAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialPlayback {
    /// Services that get `&keepAlive=true` appended to their query.
    pub keep_alive: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub service_manager_host: String,
    pub storage_mode: StorageMode,
    pub web_service_timeout_ms: u64,
    pub cookie_lifespan_secs: u64,
    pub max_array_index_to_store: Option<usize>,
    pub show_status_messages: bool,
    pub partial_playback: PartialPlayback,
    pub offline_config: Vec<OfflineRule>,
    pub handler_map: Vec<HandlerEntry>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_manager_host: String::new(),
            storage_mode: StorageMode::default(),
            web_service_timeout_ms: DEFAULT_TIMEOUT_MS,
            cookie_lifespan_secs: DEFAULT_COOKIE_LIFESPAN_SECS,
            max_array_index_to_store: None,
            show_status_messages: false,
            partial_playback: PartialPlayback::default(),
            offline_config: Vec::new(),
            handler_map: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Parses the JSON configuration. Handler strings are validated here, so a
    /// malformed `responseHandler` fails the load rather than the call.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            if e.is_data() {
                CoreError::Config(e.to_string())
            } else {
                CoreError::Serialization(e)
            }
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Host prefix without surrounding whitespace or a trailing slash.
    pub fn host(&self) -> &str {
        let host = self.service_manager_host.trim();
        host.strip_suffix('/').unwrap_or(host)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.web_service_timeout_ms)
    }

    pub fn keeps_alive(&self, service: &str) -> bool {
        self.partial_playback.keep_alive.iter().any(|s| s == service)
    }
}
