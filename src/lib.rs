//! # Offline Form Core
//!
//! A runtime that binds form fields to remote webservice calls, designed for embedding
//! behind a UI layer through FFI (Foreign Function Interface) or as a Rust library.
//!
//! ## Features
//!
//! - **Dual-mode field store**: per-session in memory, or server-persisted user data
//! - **Indexed tables**: tabular responses flattened into `NAME_0`, `NAME_1`, … keys
//! - **Any-depth response lookup**: key search and replace over arbitrary JSON documents
//! - **Single-flight calls**: at most one webservice call awaits a response at a time
//! - **Offline support**: LMDB-backed request queue and response cache per service
//! - **Safe error handling**: No `unwrap()` calls in production code
//!
//! ## Quick Start
//!
//! ```no_run
//! use offline_form_core::{AppConfig, AppState, ServiceCall};
//!
//! # async fn run() -> offline_form_core::Result<()> {
//! let config = AppConfig::from_json_str(r#"{"serviceManagerHost": "https://sm.example.com"}"#)?;
//! let state = AppState::builder(config).local_db_path("offline_store.lmdb").build()?;
//!
//! state.store("CustomerId", "42")?;
//! let outcome = state.call_web_service(ServiceCall::new("GetCustomer").params("id=42")).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## FFI Functions
//!
//! - [`create_runtime`] - Build a runtime from JSON configuration
//! - [`store_field`] / [`get_field_value`] - Field store access
//! - [`get_highest_index`] - Highest stored row of a column
//! - [`find_values_json`] / [`set_values_json`] - Response tree search and replace
//! - [`get_offline_requests`] / [`delete_offline_request`] - Offline queue administration
//! - [`call_web_service`] - Blocking webservice call
//! - [`destroy_runtime`] / [`free_c_string`] - Resource cleanup

pub mod app_response;
pub mod app_state;
pub mod config;
pub mod cookie;
pub mod error;
pub mod handler;
pub mod handler_map;
pub mod indexed;
pub mod invoker;
pub mod local_db_model;
pub mod local_db_state;
pub mod offline;
pub mod store;
pub mod transport;
pub mod tree;
pub mod ui;

pub use crate::app_response::AppResponse;
pub use crate::app_state::{AppState, AppStateBuilder};
pub use crate::config::{AppConfig, OfflineAction, StorageMode};
pub use crate::error::{CoreError, Result};
pub use crate::handler::{Handler, HandlerRegistry};
pub use crate::invoker::{CallOutcome, ServiceCall};

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use log::{info, warn};
use serde_json::Value;
use tokio::runtime::Runtime;

/// A runtime handed to FFI callers: the state plus the executor its calls run on.
pub struct FormRuntime {
    state: AppState,
    executor: Runtime,
}

impl FormRuntime {
    pub fn state(&self) -> &AppState {
        &self.state
    }
}

/// Creates a runtime from a JSON configuration.
///
/// Offline data lives in the LMDB environment at `storage_path`.
///
/// # Returns
///
/// A pointer to the [`FormRuntime`], or null on failure. Release it with [`destroy_runtime`].
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use offline_form_core::create_runtime;
///
/// let config = CString::new(r#"{"storageMode":"session"}"#).unwrap();
/// let path = CString::new("forms.lmdb").unwrap();
/// let runtime = create_runtime(config.as_ptr(), path.as_ptr());
/// assert!(!runtime.is_null());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn create_runtime(config_json: *const c_char, storage_path: *const c_char) -> *mut FormRuntime {
    let (Some(config_json), Some(storage_path)) = (c_str_arg(config_json), c_str_arg(storage_path)) else {
        warn!("Invalid pointer passed to create_runtime");
        return std::ptr::null_mut();
    };

    let config = match AppConfig::from_json_str(&config_json) {
        Ok(config) => config,
        Err(e) => {
            warn!("❌ Invalid runtime configuration: {e}");
            return std::ptr::null_mut();
        }
    };

    let executor = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(executor) => executor,
        Err(e) => {
            warn!("❌ Failed to start executor: {e}");
            return std::ptr::null_mut();
        }
    };

    // reqwest clients must be built inside a runtime context
    let state = {
        let _entered = executor.enter();
        AppState::builder(config).local_db_path(&storage_path).build()
    };

    match state {
        Ok(state) => {
            info!("✅ Runtime initialized with storage at {storage_path}");
            Box::into_raw(Box::new(FormRuntime { state, executor }))
        }
        Err(e) => {
            warn!("❌ Failed to initialize runtime: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Stores `value_json` under `key`. A value that is not valid JSON is stored as a string.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_field(runtime: *mut FormRuntime, key: *const c_char, value_json: *const c_char) -> *const c_char {
    let runtime = match runtime_ref(runtime) {
        Ok(runtime) => runtime,
        Err(err) => return err,
    };
    let key = match c_ptr_to_string(key, "key") {
        Ok(key) => key,
        Err(err) => return err,
    };
    let raw = match c_ptr_to_string(value_json, "value") {
        Ok(raw) => raw,
        Err(err) => return err,
    };

    let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
    match runtime.state.store(&key, value) {
        Ok(()) => response_to_c_string(&AppResponse::success(key)),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Returns the trimmed value under `key` as JSON; missing keys read as `""`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_field_value(runtime: *mut FormRuntime, key: *const c_char) -> *const c_char {
    let runtime = match runtime_ref(runtime) {
        Ok(runtime) => runtime,
        Err(err) => return err,
    };
    let key = match c_ptr_to_string(key, "key") {
        Ok(key) => key,
        Err(err) => return err,
    };

    match runtime.state.get_session_field_value(&key, true) {
        Ok(value) => response_to_c_string(&AppResponse::success(value.to_string())),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Highest stored row index of the column of `field`, `-1` when there is none.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_highest_index(runtime: *mut FormRuntime, field: *const c_char) -> *const c_char {
    let runtime = match runtime_ref(runtime) {
        Ok(runtime) => runtime,
        Err(err) => return err,
    };
    let field = match c_ptr_to_string(field, "field") {
        Ok(field) => field,
        Err(err) => return err,
    };

    match runtime.state.highest_index(&field) {
        Ok(index) => {
            let index = index.map_or(-1, |i| i as i64);
            response_to_c_string(&AppResponse::success(index.to_string()))
        }
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Every value stored under `key` anywhere in `tree_json`, as a JSON array.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn find_values_json(tree_json: *const c_char, key: *const c_char) -> *const c_char {
    let tree = match c_ptr_to_json(tree_json, "tree") {
        Ok(tree) => tree,
        Err(err) => return err,
    };
    let key = match c_ptr_to_string(key, "key") {
        Ok(key) => key,
        Err(err) => return err,
    };

    let found = Value::Array(tree::find_values(&tree, &key));
    response_to_c_string(&AppResponse::success(found.to_string()))
}

/// `tree_json` with every occurrence of `key` replaced by `value_json`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn set_values_json(tree_json: *const c_char, key: *const c_char, value_json: *const c_char) -> *const c_char {
    let mut tree = match c_ptr_to_json(tree_json, "tree") {
        Ok(tree) => tree,
        Err(err) => return err,
    };
    let key = match c_ptr_to_string(key, "key") {
        Ok(key) => key,
        Err(err) => return err,
    };
    let value = match c_ptr_to_json(value_json, "value") {
        Ok(value) => value,
        Err(err) => return err,
    };

    tree::set_values(&mut tree, &key, &value);
    response_to_c_string(&AppResponse::success(tree.to_string()))
}

/// Live offline requests in queue order, as a JSON array.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_offline_requests(runtime: *mut FormRuntime) -> *const c_char {
    let runtime = match runtime_ref(runtime) {
        Ok(runtime) => runtime,
        Err(err) => return err,
    };

    let records = match runtime.state.offline().requests() {
        Ok(records) => records,
        Err(e) => return response_to_c_string(&AppResponse::from(e)),
    };
    match serde_json::to_string(&records) {
        Ok(json) => response_to_c_string(&AppResponse::success(json)),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn delete_offline_request(runtime: *mut FormRuntime, index: u64) -> *const c_char {
    let runtime = match runtime_ref(runtime) {
        Ok(runtime) => runtime,
        Err(err) => return err,
    };

    match runtime.state.offline().delete_request(index as usize) {
        Ok(()) => response_to_c_string(&AppResponse::success(index.to_string())),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Calls a webservice and blocks until it completes. The outcome comes back as JSON,
/// e.g. `{"outcome":"success"}`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn call_web_service(runtime: *mut FormRuntime, service: *const c_char, params: *const c_char) -> *const c_char {
    let runtime = match runtime_ref(runtime) {
        Ok(runtime) => runtime,
        Err(err) => return err,
    };
    let service = match c_ptr_to_string(service, "service") {
        Ok(service) => service,
        Err(err) => return err,
    };
    let params = if params.is_null() {
        String::new()
    } else {
        match c_ptr_to_string(params, "params") {
            Ok(params) => params,
            Err(err) => return err,
        }
    };

    let call = ServiceCall::new(service).params(params);
    let outcome = runtime.executor.block_on(runtime.state.call_web_service(call));
    match outcome {
        Ok(outcome) => match serde_json::to_string(&outcome) {
            Ok(json) => response_to_c_string(&AppResponse::success(json)),
            Err(e) => response_to_c_string(&AppResponse::from(e)),
        },
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Releases a runtime created by [`create_runtime`], closing its LMDB environment.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn destroy_runtime(runtime: *mut FormRuntime) {
    if runtime.is_null() {
        return;
    }
    drop(unsafe { Box::from_raw(runtime) });
    info!("Runtime destroyed");
}

/// Frees a string returned by any function of this library.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn free_c_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    drop(unsafe { CString::from_raw(ptr) });
}

fn runtime_ref<'a>(runtime: *mut FormRuntime) -> std::result::Result<&'a FormRuntime, *const c_char> {
    match unsafe { runtime.as_ref() } {
        Some(runtime) => Ok(runtime),
        None => Err(response_to_c_string(&AppResponse::BadRequest(
            "Null runtime pointer".to_string(),
        ))),
    }
}

fn c_str_arg(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok().map(str::to_string)
}

/// Converts an [`AppResponse`] to a C string owned by the caller, null if it cannot be encoded.
fn response_to_c_string(response: &AppResponse) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

/// Reads a C string argument; failures come back as a ready-made error response.
fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> std::result::Result<String, *const c_char> {
    if ptr.is_null() {
        let error = AppResponse::BadRequest(format!("Null {field_name} pointer"));
        return Err(response_to_c_string(&error));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => {
            let error = AppResponse::BadRequest(format!("Invalid UTF-8 in {field_name}: {e}"));
            Err(response_to_c_string(&error))
        }
    }
}

fn c_ptr_to_json(ptr: *const c_char, field_name: &str) -> std::result::Result<Value, *const c_char> {
    let raw = c_ptr_to_string(ptr, field_name)?;
    serde_json::from_str(&raw).map_err(|e| {
        let error = AppResponse::SerializationError(format!("Invalid JSON in {field_name}: {e}"));
        response_to_c_string(&error)
    })
}
