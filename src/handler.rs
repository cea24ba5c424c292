//! Named callbacks and the handler conventions attached to service calls.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{CoreError, Result};

const POPUP_ERRORS: &str = "popupErrors:";
const POPUP_AND_NAVIGATE: &str = "popupAndNavigate:";
const POPUP: &str = "popup:";
const NAVIGATE: &str = "navigate:";

pub const DEFAULT_ERRORS_TITLE: &str = "Service Error";

/// What to do once a call completes, parsed once from its configuration string:
///
/// | string                       | variant              |
/// |------------------------------|----------------------|
/// | `name`                       | `Invoke`             |
/// | `popupErrors:<fallback>`     | `PopupErrors`        |
/// | `popupAndNavigate:<text>:<target>` | `PopupAndNavigate` |
/// | `popup:<text>`               | `Popup`              |
/// | `navigate:<target>`          | `Navigate`           |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handler {
    Invoke(String),
    PopupErrors { title: String, fallback: String },
    PopupAndNavigate { text: String, target: String },
    Popup(String),
    Navigate(String),
}

impl Handler {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CoreError::InvalidHandler("empty handler".to_string()));
        }

        if let Some(fallback) = raw.strip_prefix(POPUP_ERRORS) {
            return Ok(Handler::PopupErrors {
                title: DEFAULT_ERRORS_TITLE.to_string(),
                fallback: fallback.to_string(),
            });
        }
        if let Some(rest) = raw.strip_prefix(POPUP_AND_NAVIGATE) {
            return match rest.rsplit_once(':') {
                Some((text, target)) => Ok(Handler::PopupAndNavigate {
                    text: text.to_string(),
                    target: target.to_string(),
                }),
                None => Err(CoreError::InvalidHandler(format!(
                    "'{raw}' needs both popup text and a target"
                ))),
            };
        }
        if let Some(text) = raw.strip_prefix(POPUP) {
            return Ok(Handler::Popup(text.to_string()));
        }
        if let Some(target) = raw.strip_prefix(NAVIGATE) {
            return Ok(Handler::Navigate(target.to_string()));
        }
        if raw.contains(':') {
            return Err(CoreError::InvalidHandler(format!("unknown handler convention '{raw}'")));
        }
        Ok(Handler::Invoke(raw.to_string()))
    }

    /// Whether the handler collects service errors into its own popup.
    pub fn collects_errors(&self) -> bool {
        matches!(self, Handler::PopupErrors { .. })
    }
}

impl Display for Handler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Invoke(name) => write!(f, "{name}"),
            Handler::PopupErrors { fallback, .. } => write!(f, "{POPUP_ERRORS}{fallback}"),
            Handler::PopupAndNavigate { text, target } => {
                write!(f, "{POPUP_AND_NAVIGATE}{text}:{target}")
            }
            Handler::Popup(text) => write!(f, "{POPUP}{text}"),
            Handler::Navigate(target) => write!(f, "{NAVIGATE}{target}"),
        }
    }
}

impl Serialize for Handler {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Handler {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Handler::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde helper for optional handler fields where `""` means "no handler".
pub fn deserialize_optional_handler<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Handler>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        Some(raw) if !raw.trim().is_empty() => {
            Handler::parse(&raw).map(Some).map_err(serde::de::Error::custom)
        }
        _ => Ok(None),
    }
}

/// Error details attached to a failure handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceErrors {
    pub message: String,
    pub status: u16,
}

/// Arguments passed to a registered response or failure callback.
#[derive(Debug, Clone, Copy)]
pub struct ResponseArgs<'a> {
    pub data: Option<&'a Value>,
    pub service: &'a str,
    pub table_rows: Option<&'a [Value]>,
    pub errors: Option<&'a ServiceErrors>,
}

/// Runs before dispatch; returning `false` aborts the call.
pub type InitFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;
pub type ResponseFn = Arc<dyn for<'a> Fn(ResponseArgs<'a>) + Send + Sync>;
/// Plain functions referenced from the handler map.
pub type ActionFn = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Callbacks addressable by name, populated before the runtime starts.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    init: HashMap<String, InitFn>,
    response: HashMap<String, ResponseFn>,
    actions: HashMap<String, ActionFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_init<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.init.insert(name.into(), Arc::new(f));
        self
    }

    pub fn register_response<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: for<'a> Fn(ResponseArgs<'a>) + Send + Sync + 'static,
    {
        self.response.insert(name.into(), Arc::new(f));
        self
    }

    pub fn register_action<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn init(&self, name: &str) -> Result<InitFn> {
        self.init
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownHandler(name.to_string()))
    }

    pub fn response(&self, name: &str) -> Result<ResponseFn> {
        self.response
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownHandler(name.to_string()))
    }

    pub fn action(&self, name: &str) -> Result<ActionFn> {
        self.actions
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownHandler(name.to_string()))
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("init", &self.init.keys().collect::<Vec<_>>())
            .field("response", &self.response.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Body of the errors popup: a status header, then one bullet per `;`-separated
/// message. Text inside single quotes is kept whole, separators included.
pub fn format_service_errors(message: &str, status: u16) -> String {
    const BULLET: &str = "<br />&#9658;";

    let mut out = format!("<div> Service failed with errors [status {status}]:{BULLET}");
    for (i, segment) in message.split('\'').enumerate() {
        if i % 2 == 1 {
            out.push('\'');
            out.push_str(segment);
            out.push('\'');
        } else {
            out.push_str(&segment.split(';').collect::<Vec<_>>().join(BULLET));
        }
    }
    out.push_str("<div/>");
    out
}
