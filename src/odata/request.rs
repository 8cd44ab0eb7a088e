//! Request construction
//!
//! `ODataRequest` describes one logical call with its body buffered up front,
//! so the same descriptor can be turned into a fresh `reqwest::Request` more
//! than once (the CSRF retry replays it byte for byte). `RequestBuilder`
//! applies the current session state to a descriptor.

use super::error::ODataError;
use super::session::ClientSession;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, COOKIE, USER_AGENT};
use reqwest::{Client, Method, Url};
use serde::Serialize;

/// CSRF token header name
pub const CSRF_TOKEN_HEADER: &str = "X-CSRF-Token";

/// Sentinel value asking the server to issue a token
pub const CSRF_TOKEN_FETCH: &str = "Fetch";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_XML: &str = "application/xml";

/// Default User-Agent
pub const DEFAULT_USER_AGENT: &str = concat!("odata-mcp/", env!("CARGO_PKG_VERSION"));

/// Verbs that change server state and take part in the CSRF handshake
pub fn is_modifying(method: &Method) -> bool {
    matches!(method.as_str(), "POST" | "PUT" | "PATCH" | "MERGE" | "DELETE")
}

/// Buffered description of one HTTP call
#[derive(Debug, Clone)]
pub struct ODataRequest {
    pub method: Method,
    /// Path and query relative to the service root
    pub endpoint: String,
    pub body: Option<Bytes>,
    /// Applied after the session headers, so they win
    pub headers: HeaderMap,
}

impl ODataRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    /// Serialize `body` as JSON and buffer it
    pub fn with_json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ODataError> {
        let data = serde_json::to_vec(body)
            .map_err(|e| ODataError::RequestError(format!("failed to marshal request body: {}", e)))?;
        self.body = Some(Bytes::from(data));
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
        Ok(self)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, ODataError> {
        self.set_header(name, value)?;
        Ok(self)
    }

    /// Replace a header override in place
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), ODataError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ODataError::RequestError(format!("invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ODataError::RequestError(format!("invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn is_modifying(&self) -> bool {
        is_modifying(&self.method)
    }
}

/// Assembles authenticated requests from session state
#[derive(Debug, Clone, Copy)]
pub struct RequestBuilder<'a> {
    http: &'a Client,
    user_agent: &'a str,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(http: &'a Client, user_agent: &'a str) -> Self {
        Self { http, user_agent }
    }

    /// Resolve the full URL for an endpoint under the session's service root
    pub fn url(session: &ClientSession, endpoint: &str) -> Result<Url, ODataError> {
        let full = format!("{}{}", session.base_url(), endpoint.trim_start_matches('/'));
        Url::parse(&full)
            .map_err(|e| ODataError::RequestError(format!("invalid URL {}: {}", full, e)))
    }

    pub fn build(
        &self,
        session: &ClientSession,
        request: &ODataRequest,
    ) -> Result<reqwest::Request, ODataError> {
        let url = Self::url(session, &request.endpoint)?;

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .header(USER_AGENT, self.user_agent)
            .header(ACCEPT, session.version().accept_header());

        if let Some((user, pass)) = session.credentials().basic_auth() {
            builder = builder.basic_auth(user, Some(pass));
        }

        if let Some(cookies) = session.cookie_header() {
            builder = builder.header(COOKIE, cookies);
        }

        if let Some(token) = session.csrf_token() {
            tracing::debug!(
                "Adding CSRF token to request: {}",
                super::session::preview(token)
            );
            builder = builder.header(CSRF_TOKEN_HEADER, token);
        }

        let mut built = builder
            .build()
            .map_err(|e| ODataError::RequestError(e.to_string()))?;

        for (name, value) in request.headers.iter() {
            built.headers_mut().insert(name.clone(), value.clone());
        }

        if let Some(ref body) = request.body {
            *built.body_mut() = Some(reqwest::Body::from(body.clone()));
        }

        Ok(built)
    }
}
