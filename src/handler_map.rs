//! Page event bindings: which element, key or page event triggers which action.

use serde::{Deserialize, Serialize};

use crate::handler::{deserialize_optional_handler, Handler};

pub const ENTER_KEY: u32 = 13;

/// One binding of the handler map.
///
/// `action` is a trigger/kind pair such as `click:webservice`, `onload:function` or
/// `tableClick:navigate`; a bare `onload` means "call `attr` as a webservice on load".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HandlerEntry {
    pub element: Option<String>,
    pub key: Option<u32>,
    pub action: String,
    pub attr: String,
    pub init_handler: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_handler")]
    pub response_handler: Option<Handler>,
    #[serde(deserialize_with = "deserialize_optional_handler")]
    pub failure_handler: Option<Handler>,
    pub pre_function: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Function,
    WebService,
    Navigate,
}

impl HandlerEntry {
    pub fn kind(&self) -> Option<ActionKind> {
        let action = self.action.as_str();
        if action.ends_with("function") {
            Some(ActionKind::Function)
        } else if action.ends_with("webservice") || action == "onload" {
            Some(ActionKind::WebService)
        } else if action.ends_with("navigate") {
            Some(ActionKind::Navigate)
        } else {
            None
        }
    }

    fn element_is_unset(&self) -> bool {
        self.element.as_deref().map_or(true, str::is_empty)
    }
}

/// Entries bound to clicks on `element_id`.
pub fn handlers_for_element<'a>(
    entries: &'a [HandlerEntry],
    element_id: &str,
) -> Vec<&'a HandlerEntry> {
    entries
        .iter()
        .filter(|e| e.element.as_deref() == Some(element_id))
        .collect()
}

/// Entries bound to `key_code`, either globally or on the focused `target_id`.
pub fn handlers_for_key<'a>(
    entries: &'a [HandlerEntry],
    key_code: u32,
    target_id: &str,
) -> Vec<&'a HandlerEntry> {
    entries
        .iter()
        .filter(|e| e.key == Some(key_code))
        .filter(|e| e.element_is_unset() || e.element.as_deref() == Some(target_id))
        .collect()
}

fn handlers_for_actions<'a>(entries: &'a [HandlerEntry], actions: &[&str]) -> Vec<&'a HandlerEntry> {
    actions
        .iter()
        .flat_map(|action| entries.iter().filter(move |e| e.action == *action))
        .collect()
}

/// Page-load entries: webservice calls first, then navigations, then functions.
pub fn onload_handlers(entries: &[HandlerEntry]) -> Vec<&HandlerEntry> {
    handlers_for_actions(entries, &["onload", "onload:navigate", "onload:function"])
}

pub fn table_click_handlers(entries: &[HandlerEntry]) -> Vec<&HandlerEntry> {
    handlers_for_actions(
        entries,
        &["tableClick:webservice", "tableClick:navigate", "tableClick:function"],
    )
}
