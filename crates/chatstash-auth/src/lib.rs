//! Bearer-token discovery over a captured page-state snapshot.
//!
//! The hosted chat service exposes its access token in several places
//! depending on how the page was rendered: a bootstrap script blob, web
//! storage, a server-rendered state object, or cookies. The UI collaborator
//! captures these into a [`PageState`] snapshot and hands it to the core;
//! [`resolve_token`] tries each source in a fixed priority order.
//!
//! A missing token is not an error: the remote service may still authorize
//! the request via ambient session cookies, so callers treat `None` as
//! "proceed unauthenticated".

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Token embedded in a bootstrap blob with JSON-escaped quoting:
/// `\"accessToken\",\"<token>\"`.
static ESCAPED_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\\"accessToken\\",\\"([^"\\]+)\\""#).expect("valid regex"));

/// Same field with plain quoting: `"accessToken","<token>"`.
static PLAIN_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""accessToken","([^"]+)""#).expect("valid regex"));

/// Session cookie set by the service's auth layer.
const SESSION_COOKIE: &str = "__Secure-next-auth.session-token";

/// Alternate cookie names seen across service deployments.
const ALTERNATE_COOKIES: &[&str] = &[
    "session-token",
    "auth-token",
    "openai-session",
    "chatgpt-token",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// A snapshot of the local browser state the resolver reads from.
///
/// All fields default to empty so partial snapshots deserialize cleanly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageState {
    /// Inline script bodies from the rendered page.
    #[serde(default)]
    pub scripts: Vec<String>,
    /// Persistent keyed store (localStorage).
    #[serde(default)]
    pub local_storage: HashMap<String, String>,
    /// Session-scoped keyed store (sessionStorage).
    #[serde(default)]
    pub session_storage: HashMap<String, String>,
    /// Server-rendered state object, if the page embeds one.
    #[serde(default)]
    pub bootstrap_state: Option<serde_json::Value>,
    /// Cookies visible to the page, in document order.
    #[serde(default)]
    pub cookies: Vec<Cookie>,
}

impl PageState {
    /// Load a snapshot previously exported by the UI collaborator.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read page snapshot: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse page snapshot: {}", path.display()))
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Render the snapshot's cookies as a `cookie` header value, so requests
    /// carry the ambient session even when no bearer token was found.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Discover a bearer token from the snapshot, trying each source in fixed
/// priority order. Returns `None` when no source yields a non-empty value.
pub fn resolve_token(page: &PageState) -> Option<String> {
    // (a) bootstrap script blob, escaped quoting first.
    for script in &page.scripts {
        if !script.contains("accessToken") {
            continue;
        }
        if let Some(caps) = ESCAPED_TOKEN.captures(script) {
            debug!("access token found in bootstrap script (escaped)");
            return non_empty(caps[1].to_string());
        }
        if let Some(caps) = PLAIN_TOKEN.captures(script) {
            debug!("access token found in bootstrap script (plain)");
            return non_empty(caps[1].to_string());
        }
    }

    // (b) persistent keyed store.
    if let Some(token) = page.local_storage.get("accessToken") {
        debug!("access token found in local storage");
        if let Some(token) = non_empty(token.clone()) {
            return Some(token);
        }
    }

    // (c) session-scoped keyed store.
    if let Some(token) = page.session_storage.get("accessToken") {
        debug!("access token found in session storage");
        if let Some(token) = non_empty(token.clone()) {
            return Some(token);
        }
    }

    // (d) server-rendered state object.
    if let Some(token) = page
        .bootstrap_state
        .as_ref()
        .and_then(|state| state.pointer("/props/accessToken"))
        .and_then(|v| v.as_str())
    {
        debug!("access token found in server-rendered state");
        if let Some(token) = non_empty(token.to_string()) {
            return Some(token);
        }
    }

    // (e) cookies named accessToken / authToken.
    for name in ["accessToken", "authToken"] {
        if let Some(value) = page.cookie(name) {
            debug!("access token found in cookie {}", name);
            if let Some(token) = non_empty(value.to_string()) {
                return Some(token);
            }
        }
    }

    // (f) the named session cookie.
    if let Some(value) = page.cookie(SESSION_COOKIE) {
        debug!("session token found in {}", SESSION_COOKIE);
        if let Some(token) = non_empty(value.to_string()) {
            return Some(token);
        }
    }

    // (g) alternate cookie names.
    for name in ALTERNATE_COOKIES {
        if let Some(value) = page.cookie(name) {
            debug!("token found in alternate cookie {}", name);
            if let Some(token) = non_empty(value.to_string()) {
                return Some(token);
            }
        }
    }

    debug!("no access token found in page snapshot");
    None
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
