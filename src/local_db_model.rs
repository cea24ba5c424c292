//! Records persisted in durable local storage.
//!
//! Offline requests are not stored as one blob: each field sits under its own key,
//! `offlineReq_<index>_<field>`, so a record can be tombstoned field by field and
//! the queue cursors `offlineReq_start` / `offlineReq_end` stay independent of it.

use serde::{Deserialize, Serialize};

pub const REQUEST_PREFIX: &str = "offlineReq_";
pub const RESPONSE_PREFIX: &str = "offlineRes_";
pub const START_CURSOR_KEY: &str = "offlineReq_start";
pub const END_CURSOR_KEY: &str = "offlineReq_end";

/// A webservice call captured while the network was unreachable.
///
/// ```rust
/// use offline_form_core::local_db_model::OfflineRequestRecord;
///
/// let record = OfflineRequestRecord {
///     index: 4,
///     page: "orders.html".to_string(),
///     service: "Checkout".to_string(),
///     time: "2024-01-15 10:30:00".to_string(),
///     url: "/ServiceManager/Macro/ExecMacro/Checkout".to_string(),
///     query: "qty=2&json=true".to_string(),
/// };
/// assert_eq!(record.field_key("service"), "offlineReq_4_service");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineRequestRecord {
    /// Dense, append-only position in the queue. Never reused after deletion.
    pub index: usize,
    /// Page the request was issued from.
    pub page: String,
    pub service: String,
    /// Local wall-clock time of capture, for display.
    pub time: String,
    /// Absolute URL the request was going to.
    pub url: String,
    /// Fully built query string, replayed verbatim.
    pub query: String,
}

impl OfflineRequestRecord {
    /// Field names in storage order. `service` doubles as the liveness marker.
    pub const FIELDS: [&'static str; 5] = ["page", "service", "time", "url", "query"];

    pub fn field_key(&self, field: &str) -> String {
        request_field_key(self.index, field)
    }

    pub fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("page", &self.page),
            ("service", &self.service),
            ("time", &self.time),
            ("url", &self.url),
            ("query", &self.query),
        ]
    }
}

pub fn request_field_key(index: usize, field: &str) -> String {
    format!("{REQUEST_PREFIX}{index}_{field}")
}

pub fn response_key(service: &str) -> String {
    format!("{RESPONSE_PREFIX}{service}")
}
