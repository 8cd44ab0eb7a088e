//! Client session state
//!
//! A `ClientSession` carries everything that changes over the lifetime of one
//! connection to an OData service: the CSRF token, cookies handed out by the
//! server and the protocol mode discovered from `$metadata`.
//!
//! The session has no internal locking. Operations take it by `&mut`, so
//! concurrent callers must serialize access themselves (for example behind a
//! `tokio::sync::Mutex`, as the MCP server does).

use serde::{Deserialize, Serialize};

/// Accept header value for OData v4 JSON responses
pub const ACCEPT_JSON_V4: &str = "application/json;odata.metadata=minimal";

/// Accept header value for legacy (v2) JSON responses
pub const ACCEPT_JSON: &str = "application/json";

/// Wire protocol spoken by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ODataVersion {
    #[default]
    V2,
    V4,
}

impl ODataVersion {
    /// Map a metadata version string onto a protocol mode.
    ///
    /// Only "4.0" and "4.01" select v4; anything else is treated as v2.
    pub fn from_metadata_version(version: &str) -> Self {
        match version.trim() {
            "4.0" | "4.01" => ODataVersion::V4,
            _ => ODataVersion::V2,
        }
    }

    pub fn is_v4(self) -> bool {
        self == ODataVersion::V4
    }

    /// Accept header for JSON payloads in this mode
    pub fn accept_header(self) -> &'static str {
        match self {
            ODataVersion::V4 => ACCEPT_JSON_V4,
            ODataVersion::V2 => ACCEPT_JSON,
        }
    }
}

/// Statically configured credentials
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Cookies sent with every request, in configuration order
    pub cookies: Vec<(String, String)>,
}

impl Credentials {
    /// Basic auth pair, only when both halves are configured and non-empty
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

/// Cookie captured from a server response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
}

/// Mutable per-connection state
#[derive(Debug, Clone)]
pub struct ClientSession {
    base_url: String,
    credentials: Credentials,
    session_cookies: Vec<SessionCookie>,
    csrf_token: Option<String>,
    version: ODataVersion,
}

impl ClientSession {
    /// Create a session for a service root. The root is normalized to end with `/`.
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        let base_url = base_url.into();
        let base_url = if base_url.ends_with('/') {
            base_url
        } else {
            format!("{}/", base_url)
        };

        Self {
            base_url,
            credentials,
            session_cookies: Vec::new(),
            csrf_token: None,
            version: ODataVersion::V2,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn version(&self) -> ODataVersion {
        self.version
    }

    pub fn set_version(&mut self, version: ODataVersion) {
        self.version = version;
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    pub fn set_csrf_token(&mut self, token: String) {
        self.csrf_token = Some(token);
    }

    pub fn clear_csrf_token(&mut self) {
        self.csrf_token = None;
    }

    pub fn session_cookies(&self) -> &[SessionCookie] {
        &self.session_cookies
    }

    /// Merge cookies received from the server. A cookie whose name is
    /// already held replaces the old value in place.
    pub fn add_session_cookies(&mut self, cookies: impl IntoIterator<Item = SessionCookie>) {
        for cookie in cookies {
            match self.session_cookies.iter_mut().find(|c| c.name == cookie.name) {
                Some(existing) => existing.value = cookie.value,
                None => self.session_cookies.push(cookie),
            }
        }
    }

    /// Render the `Cookie` header: static cookies first, then session cookies.
    pub fn cookie_header(&self) -> Option<String> {
        let pairs: Vec<String> = self
            .credentials
            .cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .chain(
                self.session_cookies
                    .iter()
                    .map(|c| format!("{}={}", c.name, c.value)),
            )
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

/// Shorten a secret for log output
pub(crate) fn preview(secret: &str) -> String {
    if secret.chars().count() > 20 {
        let head: String = secret.chars().take(20).collect();
        format!("{}...", head)
    } else {
        secret.to_string()
    }
}
