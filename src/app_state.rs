//! The runtime context.
//!
//! One [`AppState`] is built at start-up and shared by every operation. It owns the
//! field store, durable local storage, the handler registry, the in-flight flag of
//! the invoker and the last service response.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};
use rand::Rng;
use serde_json::Value;

use crate::config::{AppConfig, StorageMode};
use crate::cookie::{CookieJar, Expiry, MemoryCookieJar};
use crate::error::{CoreError, Result};
use crate::handler::HandlerRegistry;
use crate::handler_map::{
    handlers_for_element, handlers_for_key, onload_handlers, table_click_handlers, ActionKind,
    HandlerEntry,
};
use crate::indexed;
use crate::invoker::{CallOutcome, ServiceCall};
use crate::local_db_state::LocalDbState;
use crate::offline::OfflineGateway;
use crate::store::{clean_value, stringify_value, DataStore, KeyValueStore, SessionStore};
use crate::transport::{HttpTransport, ServiceRequest, Transport};
use crate::tree;
use crate::ui::{page_name_from_path, url_parameters, FieldSnapshot, FormSnapshot, NoopUi, UiBridge};

pub const USER_DATA_COOKIE: &str = "userDataId";
pub const USER_DATA_PATH: &str = "/ServiceManager/Macro/UserData/";
const MAX_USER_DATA_ID: u64 = 10_000_000;

/// Keys that belong to other libraries sharing session storage.
const FOREIGN_KEY_MARKERS: [&str; 2] = ["ls.", "serviceManagerLocalStorage."];

pub struct AppState {
    pub(crate) config: AppConfig,
    pub(crate) store: Mutex<DataStore>,
    pub(crate) offline: OfflineGateway,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) ui: Arc<dyn UiBridge>,
    pub(crate) form: Arc<dyn FormSnapshot>,
    pub(crate) cookies: Arc<dyn CookieJar>,
    pub(crate) waiting_for_response: AtomicBool,
    pub(crate) last_response: Mutex<Option<Value>>,
    pub(crate) user_data_id: Mutex<Option<u64>>,
    pub(crate) location: Mutex<Option<String>>,
}

pub struct AppStateBuilder {
    config: AppConfig,
    transport: Option<Arc<dyn Transport>>,
    local_storage: Option<Box<dyn KeyValueStore>>,
    local_db_path: Option<PathBuf>,
    handlers: HandlerRegistry,
    ui: Arc<dyn UiBridge>,
    form: Arc<dyn FormSnapshot>,
    cookies: Arc<dyn CookieJar>,
}

impl AppStateBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            transport: None,
            local_storage: None,
            local_db_path: None,
            handlers: HandlerRegistry::new(),
            ui: Arc::new(NoopUi),
            form: Arc::new(FieldSnapshot::new()),
            cookies: Arc::new(MemoryCookieJar::new()),
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Durable storage for the offline queue; takes precedence over [`Self::local_db_path`].
    pub fn local_storage(mut self, storage: Box<dyn KeyValueStore>) -> Self {
        self.local_storage = Some(storage);
        self
    }

    /// Directory of the LMDB environment holding offline data.
    pub fn local_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_db_path = Some(path.into());
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn ui(mut self, ui: Arc<dyn UiBridge>) -> Self {
        self.ui = ui;
        self
    }

    pub fn form(mut self, form: Arc<dyn FormSnapshot>) -> Self {
        self.form = form;
        self
    }

    pub fn cookies(mut self, cookies: Arc<dyn CookieJar>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn build(self) -> Result<AppState> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };

        let local: Box<dyn KeyValueStore> = match (self.local_storage, self.local_db_path) {
            (Some(storage), _) => storage,
            (None, Some(path)) => Box::new(LocalDbState::open_dir(path)?),
            (None, None) => {
                warn!("No durable local storage configured; offline data will not survive a restart");
                Box::new(SessionStore::new())
            }
        };

        let store = DataStore::for_mode(self.config.storage_mode);
        info!("Runtime initialized with {:?} storage", self.config.storage_mode);

        Ok(AppState {
            offline: OfflineGateway::new(local, &self.config.offline_config),
            store: Mutex::new(store),
            config: self.config,
            transport,
            handlers: self.handlers,
            ui: self.ui,
            form: self.form,
            cookies: self.cookies,
            waiting_for_response: AtomicBool::new(false),
            last_response: Mutex::new(None),
            user_data_id: Mutex::new(None),
            location: Mutex::new(None),
        })
    }
}

fn poisoned(what: &str) -> CoreError {
    CoreError::Storage(format!("{what} lock poisoned"))
}

impl AppState {
    pub fn builder(config: AppConfig) -> AppStateBuilder {
        AppStateBuilder::new(config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.config.storage_mode
    }

    pub fn offline(&self) -> &OfflineGateway {
        &self.offline
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub(crate) fn data(&self) -> Result<MutexGuard<'_, DataStore>> {
        self.store.lock().map_err(|_| poisoned("store"))
    }

    // ---------------------------------------------------------------------
    // Field store
    // ---------------------------------------------------------------------

    pub fn store(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.data()?.set_item(key, value.into())
    }

    /// The value under `key`; with `trim` it goes through [`clean_value`], without it
    /// a missing key is `Value::Null`.
    pub fn get_session_field_value(&self, key: &str, trim: bool) -> Result<Value> {
        let value = self.data()?.get_item(key)?;
        Ok(if trim {
            clean_value(value.as_ref())
        } else {
            value.unwrap_or(Value::Null)
        })
    }

    /// Trimmed value rendered as a string.
    pub fn field_string(&self, key: &str) -> Result<String> {
        Ok(stringify_value(&self.get_session_field_value(key, true)?))
    }

    pub fn remove_item(&self, key: &str) -> Result<()> {
        self.data()?.remove_item(key)
    }

    pub fn remove_items_containing(&self, fragment: &str) -> Result<usize> {
        self.data()?.remove_items_containing(fragment)
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        self.data()?.contains_key(key)
    }

    /// Copies row `index` of the column of `field_name` into `field_name` itself.
    pub fn store_from_index(&self, field_name: &str, index: usize) -> Result<()> {
        let value = self.get_session_field_value(&indexed::indexed_key(field_name, index), true)?;
        self.store(field_name, value)
    }

    /// Replaces the stored table with `rows`, bounded by `maxArrayIndexToStore`.
    pub fn store_array(&self, rows: &[Value]) -> Result<usize> {
        let mut data = self.data()?;
        indexed::store_array(&mut *data, rows, self.config.max_array_index_to_store)
    }

    pub fn highest_index(&self, field_name: &str) -> Result<Option<usize>> {
        let data = self.data()?;
        indexed::highest_index(&*data, field_name)
    }

    pub fn clear_user_data(&self) -> Result<()> {
        self.data()?.clear_user_data()
    }

    /// Stored fields as `key=value&...`, skipping keys owned by other libraries.
    pub fn stored_fields_as_query_string(&self) -> Result<String> {
        let data = self.data()?;
        let mut pairs = Vec::new();
        for key in data.keys()? {
            if FOREIGN_KEY_MARKERS.iter().any(|marker| key.contains(marker)) {
                continue;
            }
            let value = match data.get_item(&key)? {
                Some(Value::Null) | None => String::new(),
                Some(value) => stringify_value(&value),
            };
            pairs.push(format!("{key}={value}"));
        }
        Ok(pairs.join("&"))
    }

    /// Stores a field and pushes it to the page.
    pub fn populate_field(&self, name: &str, value: &Value, postfix: Option<&str>) -> Result<()> {
        self.store(name, value.clone())?;
        self.ui.populate_field(name, value, postfix);
        Ok(())
    }

    pub fn populate_status_messages(&self, status_bar: &str, popup: &str, error: &str) -> Result<()> {
        let (status_bar, popup) = if !error.is_empty() && status_bar.is_empty() && popup.is_empty() {
            (error, error)
        } else {
            (status_bar, popup)
        };
        self.populate_field("StatusBarMessages", &Value::String(status_bar.to_string()), None)?;
        self.populate_field("PopupMessages", &Value::String(popup.to_string()), None)
    }

    pub fn clear_status_messages(&self) {
        let empty = Value::String(String::new());
        self.ui.populate_field("StatusBarMessages", &empty, None);
        self.ui.populate_field("PopupMessages", &empty, None);
    }

    // ---------------------------------------------------------------------
    // Last response
    // ---------------------------------------------------------------------

    pub fn last_response(&self) -> Option<Value> {
        self.last_response.lock().ok().and_then(|r| r.clone())
    }

    pub(crate) fn set_last_response(&self, response: &Value) -> Result<()> {
        *self.last_response.lock().map_err(|_| poisoned("response"))? = Some(response.clone());
        Ok(())
    }

    /// First value named `name` in the last response, `""` if absent.
    pub fn response_node_value(&self, name: &str) -> String {
        self.last_response()
            .map(|response| tree::find_first_string(&response, name))
            .unwrap_or_default()
    }

    pub fn response_node_values(&self, name: &str) -> Vec<Value> {
        self.last_response()
            .map(|response| tree::find_values(&response, name))
            .unwrap_or_default()
    }

    pub fn set_response_node_value(&self, name: &str, value: &Value) -> Result<()> {
        let mut guard = self.last_response.lock().map_err(|_| poisoned("response"))?;
        if let Some(response) = guard.as_mut() {
            tree::set_values(response, name, value);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // User data lifecycle
    // ---------------------------------------------------------------------

    pub fn user_data_id(&self) -> Option<u64> {
        self.user_data_id.lock().ok().and_then(|id| *id)
    }

    fn user_data_url(&self, id: u64) -> String {
        format!("{}{USER_DATA_PATH}{id}", self.config.host())
    }

    /// Start-up sequence of a page. `location` is the page URL; its query
    /// parameters become fields.
    pub async fn init_data(&self, location: &str) -> Result<()> {
        *self.location.lock().map_err(|_| poisoned("location"))? = Some(location.to_string());

        let cookie_id = self
            .cookies
            .get_item(USER_DATA_COOKIE)
            .and_then(|raw| raw.trim().parse::<u64>().ok());

        let id = match self.storage_mode() {
            StorageMode::Session => {
                self.ui.refresh_from_store();
                cookie_id
            }
            StorageMode::Server => match cookie_id {
                Some(id) => {
                    self.set_user_data_id(Some(id))?;
                    self.load_user_data_from_server().await?;
                    Some(id)
                }
                None => {
                    let id = rand::thread_rng().gen_range(1..=MAX_USER_DATA_ID);
                    let lifespan = Expiry::Duration(self.config.cookie_lifespan_secs);
                    if !self.cookies.set_item(USER_DATA_COOKIE, &id.to_string(), Some(lifespan)) {
                        warn!("Could not persist {USER_DATA_COOKIE} cookie");
                    }
                    info!("Minted user data id {id}");
                    Some(id)
                }
            },
        };
        self.set_user_data_id(id)?;

        for (name, value) in url_parameters(location) {
            self.populate_field(&name, &Value::String(value), None)?;
        }

        self.execute_on_load_handlers().await
    }

    /// Current page name: the UI's answer, else the last segment of the page location.
    pub fn page_name(&self) -> String {
        let name = self.ui.page_name();
        if !name.is_empty() {
            return name;
        }
        self.location
            .lock()
            .ok()
            .and_then(|location| location.as_deref().map(page_name_from_path))
            .unwrap_or_default()
    }

    fn set_user_data_id(&self, id: Option<u64>) -> Result<()> {
        *self.user_data_id.lock().map_err(|_| poisoned("user data id"))? = id;
        Ok(())
    }

    /// Replaces server-mode data with the server copy. Transport trouble or a
    /// malformed document leaves the store empty.
    pub async fn load_user_data_from_server(&self) -> Result<()> {
        let Some(id) = self.user_data_id() else {
            return Ok(());
        };
        let request = ServiceRequest::get(self.user_data_url(id), self.config.timeout());
        let body = match self.transport.send(request).await {
            Ok(response) if response.is_success() => response.body,
            Ok(response) => {
                warn!("Loading user data {id} failed with status {}", response.status);
                String::new()
            }
            Err(e) => {
                warn!("Loading user data {id} failed: {e:?}");
                String::new()
            }
        };

        if let DataStore::Server(server) = &mut *self.data()? {
            server.load_envelope(&body);
        }
        self.ui.refresh_from_store();
        Ok(())
    }

    /// Persists the current form: into the session store, or merged into server
    /// data and PUT back to the service manager.
    pub async fn save_user_data(&self) -> Result<()> {
        let fields = self.form.fields();
        let envelope = {
            let mut data = self.data()?;
            for field in &fields {
                if !field.id.is_empty() {
                    data.set_item(&field.id, field.input.to_value())?;
                }
            }
            match &*data {
                DataStore::Server(server) => Some(server.envelope()),
                DataStore::Session(_) => None,
            }
        };

        let (Some(envelope), Some(id)) = (envelope, self.user_data_id()) else {
            return Ok(());
        };
        let request =
            ServiceRequest::put_json(self.user_data_url(id), envelope.to_string(), self.config.timeout());
        match self.transport.send(request).await {
            Ok(response) if response.is_success() => {}
            Ok(response) => warn!("Saving user data {id} failed with status {}", response.status),
            Err(e) => warn!("Saving user data {id} failed: {e:?}"),
        }
        Ok(())
    }

    pub async fn navigate(&self, target: &str) -> Result<()> {
        self.save_user_data().await?;
        self.ui.navigate(target);
        Ok(())
    }

    /// Service description from `/ServiceManager/Macro/Service/<name>`.
    pub async fn fetch_service(&self, service: &str) -> Result<Option<Value>> {
        let service = service.trim();
        if service.is_empty() {
            return Ok(None);
        }
        let url = format!("{}/ServiceManager/Macro/Service/{service}", self.config.host());
        let response = self
            .transport
            .send(ServiceRequest::get(url, self.config.timeout()))
            .await
            .map_err(|e| CoreError::Transport(format!("{e:?}")))?;
        if !response.is_success() {
            return Err(CoreError::Transport(format!(
                "service {service} lookup failed with status {}",
                response.status
            )));
        }
        Ok(Some(serde_json::from_str(&response.body)?))
    }

    // ---------------------------------------------------------------------
    // Handler map
    // ---------------------------------------------------------------------

    /// Runs one handler-map entry. `args` are forwarded to plain functions.
    pub async fn execute_handler(&self, entry: &HandlerEntry, args: &[Value]) -> Result<Option<CallOutcome>> {
        if let Some(pre) = entry.pre_function.as_deref().filter(|p| !p.is_empty()) {
            (self.handlers.action(pre)?)(args);
        }

        match entry.kind() {
            Some(ActionKind::Function) => {
                (self.handlers.action(&entry.attr)?)(args);
                Ok(None)
            }
            Some(ActionKind::WebService) => {
                let call = ServiceCall {
                    service: entry.attr.clone(),
                    params: String::new(),
                    init_handler: entry.init_handler.clone().filter(|h| !h.is_empty()),
                    response_handler: entry.response_handler.clone(),
                    failure_handler: entry.failure_handler.clone(),
                    populate_fields: true,
                };
                self.call_web_service_with_all_params(call).await.map(Some)
            }
            Some(ActionKind::Navigate) => {
                self.navigate(&entry.attr).await?;
                Ok(None)
            }
            None => {
                warn!("Handler action '{}' is not recognized", entry.action);
                Ok(None)
            }
        }
    }

    async fn execute_all(&self, entries: Vec<&HandlerEntry>, args: &[Value]) -> Result<usize> {
        let count = entries.len();
        for entry in entries {
            self.execute_handler(entry, args).await?;
        }
        Ok(count)
    }

    /// Runs the onload entries, then announces the page as initialized.
    pub async fn execute_on_load_handlers(&self) -> Result<()> {
        self.execute_all(onload_handlers(&self.config.handler_map), &[]).await?;
        self.ui.page_initialized();
        Ok(())
    }

    pub async fn on_element_activated(&self, element_id: &str) -> Result<usize> {
        self.execute_all(handlers_for_element(&self.config.handler_map, element_id), &[])
            .await
    }

    pub async fn on_key_pressed(&self, key_code: u32, target_id: &str) -> Result<usize> {
        self.execute_all(handlers_for_key(&self.config.handler_map, key_code, target_id), &[])
            .await
    }

    pub async fn on_table_clicked(&self, row: usize, col: usize, cells: &[Value]) -> Result<usize> {
        let args = [Value::from(row), Value::from(col), Value::Array(cells.to_vec())];
        self.execute_all(table_click_handlers(&self.config.handler_map), &args)
            .await
    }
}
