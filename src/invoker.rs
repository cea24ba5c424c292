//! The webservice call pipeline.
//!
//! `Idle → AwaitingResponse → {Success, Error, Offline} → Idle`. Only one call may await a
//! response at a time; a call made meanwhile is dropped, not queued. Every call that
//! reaches the network or the offline cache ends with a `response_received` notification.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;

use crate::app_state::AppState;
use crate::config::{OfflineAction, StorageMode};
use crate::error::Result;
use crate::handler::{format_service_errors, Handler, ResponseArgs, ServiceErrors, DEFAULT_ERRORS_TITLE};
use crate::store::stringify_value;
use crate::transport::{ServiceRequest, TransportError};
use crate::tree;
use crate::ui::CallStatus;

pub const EXEC_MACRO_PATH: &str = "/ServiceManager/Macro/ExecMacro/";
pub const SERVICE_DISABLED: &str = "Service is disabled.";

const OFFLINE_TITLE: &str = "Offline";

/// One invocation of a service, with the handlers that receive its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCall {
    /// Macro name or URL path.
    pub service: String,
    /// Query string, without the tokens the invoker appends itself.
    pub params: String,
    pub init_handler: Option<String>,
    pub response_handler: Option<Handler>,
    pub failure_handler: Option<Handler>,
    /// Whether response elements are pushed into fields.
    pub populate_fields: bool,
}

impl ServiceCall {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            params: String::new(),
            init_handler: None,
            response_handler: None,
            failure_handler: None,
            populate_fields: true,
        }
    }

    pub fn params(mut self, params: impl Into<String>) -> Self {
        self.params = params.into();
        self
    }

    pub fn init_handler(mut self, name: impl Into<String>) -> Self {
        self.init_handler = Some(name.into());
        self
    }

    pub fn response_handler(mut self, handler: Handler) -> Self {
        self.response_handler = Some(handler);
        self
    }

    pub fn failure_handler(mut self, handler: Handler) -> Self {
        self.failure_handler = Some(handler);
        self
    }

    pub fn populate_fields(mut self, populate: bool) -> Self {
        self.populate_fields = populate;
        self
    }
}

/// Failures that carry no usable error document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureStatus {
    NotFound,
    Internal,
    ParseError,
    Timeout,
    Abort,
    Other(u16),
}

impl FailureStatus {
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => FailureStatus::NotFound,
            500 => FailureStatus::Internal,
            other => FailureStatus::Other(other),
        }
    }

    pub fn popup_message(&self, body: &str) -> String {
        match self {
            FailureStatus::NotFound => {
                "Service has failed with status of 404 - Requested page not found".to_string()
            }
            FailureStatus::Internal => {
                "Service has failed with status of 500 - Internal Server Error".to_string()
            }
            FailureStatus::ParseError => "Requested url parse failed".to_string(),
            FailureStatus::Timeout => "Timeout reached, no response".to_string(),
            FailureStatus::Abort => "Ajax request aborted".to_string(),
            FailureStatus::Other(_) => format!("Unexpected Error: \n{body}"),
        }
    }
}

/// How a call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CallOutcome {
    /// Another call was awaiting its response.
    Dropped,
    /// Empty service identifier.
    Skipped,
    /// The init handler returned `false`.
    Aborted,
    Success,
    /// The service answered "Service is disabled.".
    Disabled,
    /// The response carried an `Error` value.
    ServiceError { message: String, status: u16 },
    TransportFailure { status: FailureStatus },
    /// The network was unreachable; `queued` is the index of a `SYNC_LATER` record.
    Offline {
        action: Option<OfflineAction>,
        queued: Option<usize>,
    },
}

/// Where a service identifier points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    /// Last path segment, used for response keys and offline rules.
    pub service: String,
    pub url: String,
}

/// Bare names become macro calls; anything with `/`, `.` or `:` is taken as a path.
pub fn resolve_target(host: &str, identifier: &str) -> ServiceTarget {
    let path = if identifier.contains(['/', '.', ':']) {
        identifier.to_string()
    } else {
        format!("{EXEC_MACRO_PATH}{identifier}")
    };
    let service = path.rsplit('/').next().unwrap_or_default().to_string();
    ServiceTarget {
        service,
        url: format!("{host}{path}"),
    }
}

/// Percent-encodes `raw` like a browser's `encodeURI`: URI delimiters stay as they are.
pub fn encode_uri(raw: &str) -> String {
    const KEEP: &str = ";,/?:@&=+$-_.!~*'()#";

    let mut out = String::with_capacity(raw.len());
    let mut buf = [0u8; 4];
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || KEEP.contains(c) {
            out.push(c);
        } else {
            out.push_str(&urlencoding::encode(c.encode_utf8(&mut buf)));
        }
    }
    out
}

/// `Response.<service>TableArray.<service>ArrayItem`, always as a list. `None` when the
/// response has no table at all.
fn table_rows(response: &Value, service: &str) -> Option<Vec<Value>> {
    let table = response.get(format!("{service}TableArray"))?;
    Some(match table.get(format!("{service}ArrayItem")) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(item) => vec![item.clone()],
    })
}

fn message_text(message: &Value, key: &str) -> String {
    match message.get(key) {
        Some(Value::Null) | None => String::new(),
        Some(value) => stringify_value(value),
    }
}

/// Marks a call in flight until dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AppState {
    /// Whether a call is currently awaiting its response.
    pub fn is_waiting_for_response(&self) -> bool {
        self.waiting_for_response.load(Ordering::Acquire)
    }

    pub async fn call_web_service(&self, call: ServiceCall) -> Result<CallOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.waiting_for_response) else {
            debug!("Dropping call to {} while another call is in flight", call.service);
            return Ok(CallOutcome::Dropped);
        };

        let identifier = call.service.trim();
        if identifier.is_empty() {
            return Ok(CallOutcome::Skipped);
        }

        let target = resolve_target(self.config.host(), identifier);
        let query = self.build_query(&target.service, &call.params);

        if let Some(name) = call.init_handler.as_deref() {
            if !(self.handlers.init(name)?)(&target.service) {
                info!("Call to {} aborted by init handler {name}", target.service);
                return Ok(CallOutcome::Aborted);
            }
        }

        self.ui.request_started();

        let outcome = self.dispatch(&call, &target, &query).await;
        if let Err(e) = &outcome {
            warn!("Call to {} failed: {e}", target.service);
            self.ui
                .response_received(None, &target.service, CallStatus::Error, call.populate_fields);
        }
        outcome
    }

    /// Everything after `request_started`. Each successful path ends with its own
    /// `response_received`; errors are reported by the caller.
    async fn dispatch(&self, call: &ServiceCall, target: &ServiceTarget, query: &str) -> Result<CallOutcome> {
        if let Some(cached) = self.offline.load_cached_response(&target.service)? {
            debug!("Serving {} from the offline cache", target.service);
            return self.on_success(call, &target.service, &cached).await;
        }

        let request = ServiceRequest::post_form(&target.url, query, self.config.timeout());
        match self.transport.send(request).await {
            Ok(response) if response.is_unreachable() => {
                self.on_offline(call, target, query).await
            }
            Ok(response) if response.is_success() => {
                match serde_json::from_str::<Value>(&response.body) {
                    Ok(json) => {
                        self.offline.store_response_if_needed(&target.service, &json)?;
                        self.on_success(call, &target.service, &json).await
                    }
                    Err(e) => {
                        warn!("Response of {} is not JSON: {e}", target.service);
                        self.on_failure(call, &target.service, FailureStatus::ParseError, response.status, &response.body)
                            .await
                    }
                }
            }
            Ok(response) => {
                warn!("Call to {} failed with status {}", target.service, response.status);
                let status = FailureStatus::from_status(response.status);
                self.on_failure(call, &target.service, status, response.status, &response.body)
                    .await
            }
            Err(TransportError::Unreachable(reason)) => {
                warn!("Service {} unreachable: {reason}", target.service);
                self.on_offline(call, target, query).await
            }
            Err(TransportError::Timeout) => {
                warn!("Call to {} timed out", target.service);
                self.on_failure(call, &target.service, FailureStatus::Timeout, 0, "")
                    .await
            }
            Err(TransportError::Aborted(reason)) => {
                warn!("Call to {} aborted: {reason}", target.service);
                self.on_failure(call, &target.service, FailureStatus::Abort, 0, &reason)
                    .await
            }
        }
    }

    /// Calls the service with every field as a parameter: the stored fields in session
    /// mode (after saving the form), the form itself in server mode.
    pub async fn call_web_service_with_all_params(&self, call: ServiceCall) -> Result<CallOutcome> {
        let params = match self.storage_mode() {
            StorageMode::Session => {
                self.save_user_data().await?;
                self.stored_fields_as_query_string()?
            }
            StorageMode::Server => self.form.input_fields_as_query_string(),
        };
        self.call_web_service(call.params(params)).await
    }

    fn build_query(&self, service: &str, params: &str) -> String {
        let seed: f64 = rand::thread_rng().gen_range(0.0..1_000_000.0);
        let user_data_id = self
            .user_data_id()
            .map_or_else(|| "null".to_string(), |id| id.to_string());

        let mut query = format!(
            "{}&randomSeed={seed}&userDataId={user_data_id}&json=true",
            encode_uri(params)
        );
        if self.config.keeps_alive(service) {
            query.push_str("&keepAlive=true");
        }
        query
    }

    async fn on_success(&self, call: &ServiceCall, service: &str, json: &Value) -> Result<CallOutcome> {
        self.set_last_response(json)?;
        let error = tree::find_first_string(json, "Error");

        if error == SERVICE_DISABLED {
            self.ui.show_info_popup(DEFAULT_ERRORS_TITLE, &error);
            let args = ResponseArgs {
                data: None,
                service,
                table_rows: None,
                errors: None,
            };
            self.execute_response_handler(call.failure_handler.as_ref(), args)
                .await?;
            self.ui
                .response_received(None, service, CallStatus::Error, call.populate_fields);
            return Ok(CallOutcome::Disabled);
        }

        if !error.is_empty() {
            let errors = ServiceErrors {
                message: error,
                status: 200,
            };
            self.analyze_json(json, service, call.failure_handler.as_ref(), Some(&errors), call.populate_fields)
                .await?;
            self.ui
                .response_received(None, service, CallStatus::Error, call.populate_fields);
            return Ok(CallOutcome::ServiceError {
                message: errors.message,
                status: errors.status,
            });
        }

        self.analyze_json(json, service, call.response_handler.as_ref(), None, call.populate_fields)
            .await?;
        self.ui
            .response_received(Some(json), service, CallStatus::Success, call.populate_fields);
        Ok(CallOutcome::Success)
    }

    async fn on_failure(
        &self,
        call: &ServiceCall,
        service: &str,
        failure: FailureStatus,
        http_status: u16,
        body: &str,
    ) -> Result<CallOutcome> {
        let parsed = serde_json::from_str::<Value>(body).ok();
        let error = parsed
            .as_ref()
            .map(|doc| tree::find_first_string(doc, "Error"))
            .unwrap_or_default();

        match parsed.as_ref().filter(|_| !error.is_empty()) {
            Some(doc) => {
                let errors = ServiceErrors {
                    message: error,
                    status: http_status,
                };
                self.analyze_json(doc, service, call.failure_handler.as_ref(), Some(&errors), call.populate_fields)
                    .await?;
            }
            None => {
                self.ui
                    .show_info_popup(DEFAULT_ERRORS_TITLE, &failure.popup_message(body));
                let handler = call.failure_handler.as_ref().filter(|h| !h.collects_errors());
                let args = ResponseArgs {
                    data: parsed.as_ref(),
                    service,
                    table_rows: None,
                    errors: None,
                };
                self.execute_response_handler(handler, args).await?;
            }
        }

        self.ui
            .response_received(None, service, CallStatus::Error, call.populate_fields);
        Ok(CallOutcome::TransportFailure { status: failure })
    }

    async fn on_offline(&self, call: &ServiceCall, target: &ServiceTarget, query: &str) -> Result<CallOutcome> {
        self.ui.stop_spinner();
        let action = self.offline.action_for(&target.service);
        info!("Service {} is offline, applying {action:?}", target.service);

        let mut queued = None;
        match action {
            Some(OfflineAction::Error) => {
                self.ui.show_info_popup(OFFLINE_TITLE, "Please try again later.");
            }
            Some(OfflineAction::SyncLater) => {
                let page = self.page_name();
                let record = self
                    .offline
                    .store_request(&page, &target.service, &target.url, query)?;
                queued = Some(record.index);
                self.ui
                    .show_info_popup(OFFLINE_TITLE, "Your action will be synced later.");
            }
            Some(OfflineAction::LiveThenStorage) => {
                if let Some(cached) = self.offline.cached_response(&target.service)? {
                    return self.on_success(call, &target.service, &cached).await;
                }
            }
            Some(OfflineAction::StorageThenLive) | None => {}
        }

        self.ui
            .response_received(None, &target.service, CallStatus::Error, call.populate_fields);
        Ok(CallOutcome::Offline { action, queued })
    }

    /// Moves a well-formed response into the store and the page, then runs `handler`.
    /// Documents without a `Response` root go to `handler` untouched.
    pub(crate) async fn analyze_json(
        &self,
        json: &Value,
        service: &str,
        handler: Option<&Handler>,
        errors: Option<&ServiceErrors>,
        populate_fields: bool,
    ) -> Result<()> {
        let Some(response) = json.get("Response") else {
            let args = ResponseArgs {
                data: Some(json),
                service,
                table_rows: None,
                errors,
            };
            return self.execute_response_handler(handler, args).await;
        };

        if let Some(message) = response.get(format!("{service}Message")) {
            if let Some(session_id) = message.get("sessionId").filter(|v| !v.is_null()) {
                self.store("sessionId", session_id.clone())?;
            }
            if self.config.show_status_messages {
                self.populate_status_messages(
                    &message_text(message, "StatusBarMessages"),
                    &message_text(message, "PopupMessages"),
                    &message_text(message, "Error"),
                )?;
            }
        }

        if let Some(Value::Object(elements)) = response.get(format!("{service}Elements")) {
            for (name, value) in elements {
                if populate_fields {
                    self.populate_field(name, value, Some("_output"))?;
                } else if self.storage_mode() == StorageMode::Server {
                    self.store(name, value.clone())?;
                }
            }
        }

        let rows = table_rows(response, service);
        if let Some(rows) = rows.as_deref() {
            self.store_array(rows)?;
        }
        if populate_fields {
            self.ui.refresh_from_store();
        }

        let args = ResponseArgs {
            data: Some(json),
            service,
            table_rows: rows.as_deref(),
            errors,
        };
        self.execute_response_handler(handler, args).await
    }

    pub(crate) async fn execute_response_handler(
        &self,
        handler: Option<&Handler>,
        args: ResponseArgs<'_>,
    ) -> Result<()> {
        let Some(handler) = handler else {
            return Ok(());
        };

        match handler {
            Handler::Invoke(name) => (self.handlers.response(name)?)(args),
            Handler::PopupErrors { title, fallback } => match args.errors {
                Some(errors) => {
                    let text = format!("{fallback}{}", errors.message);
                    self.ui
                        .show_info_popup(title, &format_service_errors(&text, errors.status));
                }
                None if !fallback.is_empty() => self.ui.show_info_popup(title, fallback),
                None => {}
            },
            Handler::PopupAndNavigate { text, target } => {
                self.ui.show_info_popup("", text);
                self.navigate(target).await?;
            }
            Handler::Popup(text) => self.ui.show_info_popup("", text),
            Handler::Navigate(target) => self.navigate(target).await?,
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Offline replay
    // ---------------------------------------------------------------------

    /// Re-posts queued request `index`. The record is deleted once the server answers 2xx.
    /// Returns `Ok(false)` when the record is gone, the replay failed, or a call is in flight.
    pub async fn sync_offline_request(&self, index: usize) -> Result<bool> {
        let Some(record) = self.offline.request(index)? else {
            return Ok(false);
        };
        let Some(_guard) = InFlightGuard::acquire(&self.waiting_for_response) else {
            debug!("Skipping replay of #{index} while a call is in flight");
            return Ok(false);
        };

        let request = ServiceRequest::post_form(record.url.as_str(), record.query.as_str(), self.config.timeout());
        match self.transport.send(request).await {
            Ok(response) if response.is_success() => {
                self.offline.delete_request(index)?;
                info!("Replayed offline request #{index} for {}", record.service);
                Ok(true)
            }
            Ok(response) => {
                warn!("Replay of #{index} failed with status {}", response.status);
                Ok(false)
            }
            Err(e) => {
                warn!("Replay of #{index} failed: {e:?}");
                Ok(false)
            }
        }
    }

    /// Replays every queued request in index order.
    pub async fn sync_all_offline_requests(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for record in self.offline.requests()? {
            if self.sync_offline_request(record.index).await? {
                report.synced.push(record.index);
            } else {
                report.failed.push(record.index);
            }
        }
        Ok(report)
    }

    pub fn delete_offline_response(&self, service: &str) -> Result<()> {
        self.offline.delete_response(service)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced: Vec<usize>,
    pub failed: Vec<usize>,
}
