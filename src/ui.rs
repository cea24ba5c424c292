//! The seams towards the presentation layer.
//!
//! Rendering, popups and field discovery belong to whoever embeds the runtime.
//! [`UiBridge`] receives what the core wants shown; [`FormSnapshot`] reports the
//! current form contents.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// Presentation callbacks. Every method defaults to doing nothing.
pub trait UiBridge: Send + Sync {
    /// Blocking informational message.
    fn show_info_popup(&self, _title: &str, _message: &str) {}

    /// Push a value into the field `name`, preferring `name + postfix` when it exists.
    fn populate_field(&self, _name: &str, _value: &Value, _postfix: Option<&str>) {}

    /// Re-read every field, and any table or list, from the store.
    fn refresh_from_store(&self) {}

    fn navigate(&self, _target: &str) {}

    fn stop_spinner(&self) {}

    fn request_started(&self) {}

    fn response_received(
        &self,
        _response: Option<&Value>,
        _service: &str,
        _status: CallStatus,
        _populate_fields: bool,
    ) {
    }

    fn page_initialized(&self) {}

    /// Name of the current page, recorded with queued offline requests. When empty,
    /// the runtime derives it from the location passed to `init_data`.
    fn page_name(&self) -> String {
        String::new()
    }
}

/// A [`UiBridge`] that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUi;

impl UiBridge for NoopUi {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldInput {
    Text(String),
    Checkbox(bool),
}

impl FieldInput {
    pub fn as_string(&self) -> String {
        match self {
            FieldInput::Text(text) => text.clone(),
            FieldInput::Checkbox(checked) => checked.to_string(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            FieldInput::Text(text) => Value::String(text.clone()),
            FieldInput::Checkbox(checked) => Value::Bool(*checked),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub id: String,
    pub input: FieldInput,
}

/// Current input fields of the page.
pub trait FormSnapshot: Send + Sync {
    fn fields(&self) -> Vec<FormField>;

    /// `id=value&...` with values percent-encoded; empty values are sent as `null`.
    fn input_fields_as_query_string(&self) -> String {
        self.fields()
            .iter()
            .filter(|f| !f.id.is_empty())
            .map(|f| {
                let value = urlencoding::encode(&f.input.as_string()).into_owned();
                let value = if value.is_empty() { "null".to_string() } else { value };
                format!("{}={}", f.id, value)
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// `{"data": {id: "value", ...}}`, checkbox states as `"true"`/`"false"`.
    fn input_fields_as_json(&self) -> String {
        let data: Map<String, Value> = self
            .fields()
            .into_iter()
            .filter(|f| !f.id.is_empty())
            .map(|f| (f.id, Value::String(f.input.as_string())))
            .collect();
        let mut root = Map::new();
        root.insert("data".to_string(), Value::Object(data));
        Value::Object(root).to_string()
    }
}

/// A fixed set of field values, for hosts that collect the form themselves.
#[derive(Debug, Clone, Default)]
pub struct FieldSnapshot {
    fields: BTreeMap<String, FieldInput>,
}

impl FieldSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(id.into(), FieldInput::Text(value.into()));
        self
    }

    pub fn checkbox(mut self, id: impl Into<String>, checked: bool) -> Self {
        self.fields.insert(id.into(), FieldInput::Checkbox(checked));
        self
    }
}

impl FormSnapshot for FieldSnapshot {
    fn fields(&self) -> Vec<FormField> {
        self.fields
            .iter()
            .map(|(id, input)| FormField {
                id: id.clone(),
                input: input.clone(),
            })
            .collect()
    }
}

/// Last path segment of a page URL, without any `?query` or `#fragment`.
pub fn page_name_from_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/').next().unwrap_or_default().to_string()
}

/// `?a=1&b=2` parameters of a URL, in order, without decoding.
pub fn url_parameters(url: &str) -> Vec<(String, String)> {
    let Some((_, query)) = url.split_once('?') else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
