//! Cookie handling for the `userDataId` session cookie.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

const RESERVED_NAMES: [&str; 5] = ["expires", "max-age", "path", "domain", "secure"];
const NEVER_EXPIRES: &str = "Fri, 31 Dec 9999 23:59:59 GMT";

/// When a cookie stops being valid. No expiry at all means "end of session".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    Duration(u64),
    At(DateTime<Utc>),
}

impl Expiry {
    fn attribute(&self) -> String {
        match self {
            Expiry::Never => format!("; expires={NEVER_EXPIRES}"),
            Expiry::Duration(secs) => format!("; max-age={secs}"),
            Expiry::At(at) => format!("; expires={}", at.format("%a, %d %b %Y %H:%M:%S GMT")),
        }
    }

    fn deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Expiry::Never => None,
            Expiry::Duration(secs) => i64::try_from(*secs)
                .ok()
                .and_then(ChronoDuration::try_seconds)
                .and_then(|d| now.checked_add_signed(d)),
            Expiry::At(at) => Some(*at),
        }
    }
}

fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name))
}

/// Builds a `Set-Cookie`-style assignment for hosts that keep the `userDataId` cookie
/// in a real browser or HTTP response instead of a [`MemoryCookieJar`]. `None` for
/// empty or reserved names.
pub fn format_set_cookie(
    name: &str,
    value: &str,
    expiry: Option<Expiry>,
    path: Option<&str>,
    domain: Option<&str>,
    secure: bool,
) -> Option<String> {
    if name.is_empty() || is_reserved(name) {
        return None;
    }

    let mut cookie = format!("{}={}", urlencoding::encode(name), urlencoding::encode(value));
    if let Some(expiry) = expiry {
        cookie.push_str(&expiry.attribute());
    }
    if let Some(domain) = domain {
        cookie.push_str(&format!("; domain={domain}"));
    }
    if let Some(path) = path {
        cookie.push_str(&format!("; path={path}"));
    }
    if secure {
        cookie.push_str("; secure");
    }
    Some(cookie)
}

/// Cookie storage as seen by the runtime.
pub trait CookieJar: Send + Sync {
    fn get_item(&self, name: &str) -> Option<String>;

    /// Returns `false` when the name is rejected.
    fn set_item(&self, name: &str, value: &str, expiry: Option<Expiry>) -> bool;

    fn remove_item(&self, name: &str) -> bool;

    fn has_item(&self, name: &str) -> bool {
        self.get_item(name).is_some()
    }

    fn keys(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
struct StoredCookie {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process cookie jar that honors expiry on read.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<BTreeMap<String, StoredCookie>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(cookie: &StoredCookie, now: DateTime<Utc>) -> bool {
        cookie.expires_at.map_or(true, |at| at > now)
    }
}

impl CookieJar for MemoryCookieJar {
    fn get_item(&self, name: &str) -> Option<String> {
        let cookies = self.cookies.lock().ok()?;
        let now = Utc::now();
        cookies
            .get(name)
            .filter(|c| Self::live(c, now))
            .map(|c| c.value.clone())
    }

    fn set_item(&self, name: &str, value: &str, expiry: Option<Expiry>) -> bool {
        if name.is_empty() || is_reserved(name) {
            return false;
        }
        let Ok(mut cookies) = self.cookies.lock() else {
            return false;
        };
        let expires_at = expiry.and_then(|e| e.deadline(Utc::now()));
        cookies.insert(
            name.to_string(),
            StoredCookie {
                value: value.to_string(),
                expires_at,
            },
        );
        true
    }

    fn remove_item(&self, name: &str) -> bool {
        if !self.has_item(name) {
            return false;
        }
        match self.cookies.lock() {
            Ok(mut cookies) => cookies.remove(name).is_some(),
            Err(_) => false,
        }
    }

    fn keys(&self) -> Vec<String> {
        let Ok(cookies) = self.cookies.lock() else {
            return Vec::new();
        };
        let now = Utc::now();
        cookies
            .iter()
            .filter(|(_, c)| Self::live(c, now))
            .map(|(name, _)| name.clone())
            .collect()
    }
}
