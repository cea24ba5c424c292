//! Key/value field storage.
//!
//! Every field the runtime knows about lives in exactly one [`DataStore`]. The backend
//! is picked once from [`StorageMode`] when the [`crate::AppState`] is built and never
//! changes afterwards, so reads and writes always hit the same backend:
//!
//! - [`SessionStore`]: ephemeral, lives as long as the runtime. Values are kept as
//!   strings, the way browser session storage coerces them.
//! - [`ServerStore`]: a JSON object mirrored to the service manager under the
//!   session's `userDataId`. Values keep their JSON type.
//!
//! [`crate::local_db_state::LocalDbState`] implements the same trait on top of LMDB
//! and backs the offline queue.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::config::StorageMode;
use crate::error::Result;

/// Uniform access to a flat string-keyed store.
pub trait KeyValueStore: Send {
    fn get_item(&self, key: &str) -> Result<Option<Value>>;

    fn set_item(&mut self, key: &str, value: Value) -> Result<()>;

    fn remove_item(&mut self, key: &str) -> Result<()>;

    /// Every live key, in the backend's iteration order.
    fn keys(&self) -> Result<Vec<String>>;

    fn clear(&mut self) -> Result<()>;

    fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_item(key)?.is_some())
    }

    /// Removes every key containing `fragment`.
    fn remove_items_containing(&mut self, fragment: &str) -> Result<usize> {
        let doomed: Vec<String> = self
            .keys()?
            .into_iter()
            .filter(|key| key.contains(fragment))
            .collect();
        for key in &doomed {
            self.remove_item(key)?;
        }
        Ok(doomed.len())
    }
}

/// Renders a value the way string-only storage keeps it.
pub fn stringify_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalizes a stored value for comparison: strings are trimmed, booleans and
/// numbers pass through, anything else (including a missing value) becomes `""`.
pub fn clean_value(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(s)) => Value::String(s.trim().to_string()),
        Some(v @ Value::Bool(_)) | Some(v @ Value::Number(_)) => v.clone(),
        _ => Value::String(String::new()),
    }
}

/// Ephemeral per-runtime storage.
#[derive(Debug, Default, Clone)]
pub struct SessionStore {
    items: BTreeMap<String, String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl KeyValueStore for SessionStore {
    fn get_item(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.items.get(key).map(|v| Value::String(v.clone())))
    }

    fn set_item(&mut self, key: &str, value: Value) -> Result<()> {
        self.items.insert(key.to_string(), stringify_value(&value));
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        self.items.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.items.keys().cloned().collect())
    }

    fn clear(&mut self) -> Result<()> {
        self.items.clear();
        Ok(())
    }
}

/// Field data persisted on the service manager.
///
/// Removal writes `null` instead of dropping the key so the next save clears the
/// value on the server as well. Null entries read back as missing.
#[derive(Debug, Default, Clone)]
pub struct ServerStore {
    data: Map<String, Value>,
}

impl ServerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the local copy with the `data` object of a user-data document.
    /// Anything that is not `{"data": {...}}` leaves the store empty.
    pub fn load_envelope(&mut self, body: &str) {
        self.data = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|doc| match doc.get("data") {
                Some(Value::Object(map)) => Some(map.clone()),
                _ => None,
            })
            .unwrap_or_default();
    }

    /// The `{"data": {...}}` document saved back to the server.
    pub fn envelope(&self) -> Value {
        let mut root = Map::new();
        root.insert("data".to_string(), Value::Object(self.data.clone()));
        Value::Object(root)
    }

    /// Blanks every known key with the literal `"null"`, which the server treats as cleared.
    pub fn blank_all(&mut self) {
        for value in self.data.values_mut() {
            *value = Value::String("null".to_string());
        }
    }
}

impl KeyValueStore for ServerStore {
    fn get_item(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.data.get(key).filter(|v| !v.is_null()).cloned())
    }

    fn set_item(&mut self, key: &str, value: Value) -> Result<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        if let Some(slot) = self.data.get_mut(key) {
            *slot = Value::Null;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .data
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn clear(&mut self) -> Result<()> {
        self.data.clear();
        Ok(())
    }
}

/// The single authoritative field store of a runtime.
#[derive(Debug, Clone)]
pub enum DataStore {
    Session(SessionStore),
    Server(ServerStore),
}

impl DataStore {
    pub fn for_mode(mode: StorageMode) -> Self {
        match mode {
            StorageMode::Session => DataStore::Session(SessionStore::new()),
            StorageMode::Server => DataStore::Server(ServerStore::new()),
        }
    }

    pub fn mode(&self) -> StorageMode {
        match self {
            DataStore::Session(_) => StorageMode::Session,
            DataStore::Server(_) => StorageMode::Server,
        }
    }

    /// Wipes user data: session storage is emptied, server data is blanked so the
    /// next save clears it remotely.
    pub fn clear_user_data(&mut self) -> Result<()> {
        match self {
            DataStore::Session(store) => store.clear(),
            DataStore::Server(store) => {
                store.blank_all();
                Ok(())
            }
        }
    }

    fn backend(&self) -> &dyn KeyValueStore {
        match self {
            DataStore::Session(store) => store,
            DataStore::Server(store) => store,
        }
    }

    fn backend_mut(&mut self) -> &mut dyn KeyValueStore {
        match self {
            DataStore::Session(store) => store,
            DataStore::Server(store) => store,
        }
    }
}

impl KeyValueStore for DataStore {
    fn get_item(&self, key: &str) -> Result<Option<Value>> {
        self.backend().get_item(key)
    }

    fn set_item(&mut self, key: &str, value: Value) -> Result<()> {
        self.backend_mut().set_item(key, value)
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        self.backend_mut().remove_item(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.backend().keys()
    }

    fn clear(&mut self) -> Result<()> {
        self.backend_mut().clear()
    }
}
