//! Offline request queue and response cache.
//!
//! The queue is an append-only run of indices between two persisted cursors.
//! Deleting a record removes its fields and nothing else: the cursors never move
//! back and the freed index is never reused, so the range can become sparse.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Local;
use log::{debug, info};
use serde_json::Value;

use crate::config::{OfflineAction, OfflineRule};
use crate::error::{CoreError, Result};
use crate::local_db_model::{
    request_field_key, response_key, OfflineRequestRecord, END_CURSOR_KEY, START_CURSOR_KEY,
};
use crate::store::{stringify_value, KeyValueStore};

pub struct OfflineGateway {
    storage: Mutex<Box<dyn KeyValueStore>>,
    rules: HashMap<String, OfflineAction>,
}

impl OfflineGateway {
    pub fn new(storage: Box<dyn KeyValueStore>, rules: &[OfflineRule]) -> Self {
        let rules = rules
            .iter()
            .map(|rule| (rule.service.clone(), rule.action))
            .collect();
        Self {
            storage: Mutex::new(storage),
            rules,
        }
    }

    fn storage(&self) -> Result<MutexGuard<'_, Box<dyn KeyValueStore>>> {
        self.storage
            .lock()
            .map_err(|_| CoreError::Storage("offline storage lock poisoned".to_string()))
    }

    /// The configured policy for `service`, if any.
    pub fn action_for(&self, service: &str) -> Option<OfflineAction> {
        self.rules.get(service).copied()
    }

    fn read_string(storage: &dyn KeyValueStore, key: &str) -> Result<Option<String>> {
        Ok(storage.get_item(key)?.map(|v| stringify_value(&v)))
    }

    fn read_cursor(storage: &dyn KeyValueStore, key: &str) -> Result<Option<usize>> {
        match Self::read_string(storage, key)? {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| CoreError::Storage(format!("corrupt cursor {key}: '{raw}'"))),
            None => Ok(None),
        }
    }

    /// First index of the queue range; 0 until something says otherwise.
    pub fn first_index(&self) -> Result<usize> {
        let storage = self.storage()?;
        Ok(Self::read_cursor(&**storage, START_CURSOR_KEY)?.unwrap_or(0))
    }

    /// Last index ever appended, `None` for a queue that was never written.
    pub fn last_index(&self) -> Result<Option<usize>> {
        let storage = self.storage()?;
        Self::read_cursor(&**storage, END_CURSOR_KEY)
    }

    /// Appends a request at `last_index + 1` and advances the end cursor.
    pub fn store_request(
        &self,
        page: &str,
        service: &str,
        url: &str,
        query: &str,
    ) -> Result<OfflineRequestRecord> {
        let mut storage = self.storage()?;
        let index = Self::read_cursor(&**storage, END_CURSOR_KEY)?.map_or(0, |end| end + 1);

        let record = OfflineRequestRecord {
            index,
            page: page.to_string(),
            service: service.to_string(),
            time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            url: url.to_string(),
            query: query.to_string(),
        };

        for (field, value) in record.fields() {
            storage.set_item(&record.field_key(field), Value::String(value.to_string()))?;
        }
        storage.set_item(END_CURSOR_KEY, Value::String(index.to_string()))?;

        info!("Queued offline request #{index} for service {service}");
        Ok(record)
    }

    /// Removes every field of record `index`. Cursors are left untouched.
    pub fn delete_request(&self, index: usize) -> Result<()> {
        let mut storage = self.storage()?;
        for field in OfflineRequestRecord::FIELDS {
            storage.remove_item(&request_field_key(index, field))?;
        }
        debug!("Deleted offline request #{index}");
        Ok(())
    }

    fn read_request(storage: &dyn KeyValueStore, index: usize) -> Result<Option<OfflineRequestRecord>> {
        let Some(service) = Self::read_string(storage, &request_field_key(index, "service"))? else {
            return Ok(None);
        };
        let field = |name: &str| -> Result<String> {
            Ok(Self::read_string(storage, &request_field_key(index, name))?.unwrap_or_default())
        };
        Ok(Some(OfflineRequestRecord {
            index,
            page: field("page")?,
            service,
            time: field("time")?,
            url: field("url")?,
            query: field("query")?,
        }))
    }

    pub fn request(&self, index: usize) -> Result<Option<OfflineRequestRecord>> {
        let storage = self.storage()?;
        Self::read_request(&**storage, index)
    }

    /// Live records between the cursors, in index order.
    pub fn requests(&self) -> Result<Vec<OfflineRequestRecord>> {
        let storage = self.storage()?;
        let start = Self::read_cursor(&**storage, START_CURSOR_KEY)?.unwrap_or(0);
        let Some(end) = Self::read_cursor(&**storage, END_CURSOR_KEY)? else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for index in start..=end {
            if let Some(record) = Self::read_request(&**storage, index)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// The cached response for `service`, regardless of policy.
    pub fn cached_response(&self, service: &str) -> Result<Option<Value>> {
        let storage = self.storage()?;
        match Self::read_string(&**storage, &response_key(service))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// The response to serve instead of calling the network: only services set to
    /// `STORAGE_THEN_LIVE` ever get one.
    pub fn load_cached_response(&self, service: &str) -> Result<Option<Value>> {
        if self.action_for(service) != Some(OfflineAction::StorageThenLive) {
            return Ok(None);
        }
        self.cached_response(service)
    }

    /// Caches `response` when the service's policy keeps responses. Returns whether it did.
    pub fn store_response_if_needed(&self, service: &str, response: &Value) -> Result<bool> {
        if !self.action_for(service).is_some_and(OfflineAction::caches_responses) {
            return Ok(false);
        }
        let mut storage = self.storage()?;
        storage.set_item(&response_key(service), Value::String(response.to_string()))?;
        Ok(true)
    }

    pub fn delete_response(&self, service: &str) -> Result<()> {
        let mut storage = self.storage()?;
        storage.remove_item(&response_key(service))
    }
}
