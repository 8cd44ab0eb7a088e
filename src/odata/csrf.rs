//! CSRF token handshake
//!
//! Some backends (SAP Gateway in particular) reject state-changing requests
//! unless they carry a token obtained by sending `X-CSRF-Token: Fetch` to the
//! service root. The session moves through:
//!
//! ```text
//! NoToken -> fetch -> Held(token) -> 403 + CSRF signal -> NoToken
//!         -> refetch -> Held(new) -> replay original once -> done
//! ```
//!
//! Replay happens at most once per logical operation. If the refetch fails,
//! the original 403 status and body are reported.

use super::client::{ODataClient, RawResponse};
use super::error::ODataError;
use super::request::{ODataRequest, CSRF_TOKEN_FETCH, CSRF_TOKEN_HEADER};
use super::session::{preview, ClientSession};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

/// Header value servers send when a token is missing
const CSRF_REQUIRED: &str = "required";

/// Read a usable token from response headers.
///
/// `HeaderMap` lookups are case-insensitive, so `X-CSRF-Token`,
/// `x-csrf-token` and `X-Csrf-Token` are all found here. The sentinel echoed
/// back by servers that did not issue a token is not a token.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(CSRF_TOKEN_HEADER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .find(|v| !v.is_empty() && !v.eq_ignore_ascii_case(CSRF_TOKEN_FETCH))
        .map(String::from)
}

/// Whether a 403 was caused by a missing or stale CSRF token
pub fn is_csrf_rejection(headers: &HeaderMap, body: &[u8]) -> bool {
    let required = headers
        .get(CSRF_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(CSRF_REQUIRED));

    required || String::from_utf8_lossy(body).to_lowercase().contains("csrf")
}

impl ODataClient {
    /// Fetch a fresh token into the session, replacing any held one.
    pub async fn fetch_csrf_token(
        &self,
        session: &mut ClientSession,
        cancel: &CancellationToken,
    ) -> Result<(), ODataError> {
        tracing::debug!("Fetching CSRF token...");
        session.clear_csrf_token();

        let request = ODataRequest::get("").with_header(CSRF_TOKEN_HEADER, CSRF_TOKEN_FETCH)?;

        let response = self
            .dispatch(session, cancel, &request)
            .await
            .map_err(|e| match e {
                ODataError::Cancelled => ODataError::Cancelled,
                other => ODataError::TokenFetchError(other.to_string()),
            })?;

        tracing::debug!("Token fetch response status: {}", response.status);

        if !response.cookies.is_empty() {
            tracing::debug!(
                "Received {} session cookies during token fetch",
                response.cookies.len()
            );
            for cookie in &response.cookies {
                tracing::debug!("Cookie: {}={}", cookie.name, preview(&cookie.value));
            }
            session.add_session_cookies(response.cookies);
        }

        let token = extract_token(&response.headers).ok_or_else(|| {
            ODataError::TokenFetchError("CSRF token not found in response headers".to_string())
        })?;

        tracing::debug!("CSRF token fetched successfully: {}", preview(&token));
        session.set_csrf_token(token);
        Ok(())
    }

    /// Pre-flight fetch before a modifying call. Failure is tolerated: some
    /// services never ask for a token. Cancellation is not.
    pub(crate) async fn prefetch_csrf_token(
        &self,
        session: &mut ClientSession,
        cancel: &CancellationToken,
    ) -> Result<(), ODataError> {
        match self.fetch_csrf_token(session, cancel).await {
            Err(ODataError::Cancelled) => Err(ODataError::Cancelled),
            Err(e) => {
                tracing::warn!("Failed to fetch CSRF token, proceeding without it: {}", e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Send a request, replaying it once with a fresh token when a modifying
    /// call is rejected for CSRF reasons.
    pub(crate) async fn execute(
        &self,
        session: &mut ClientSession,
        cancel: &CancellationToken,
        mut request: ODataRequest,
    ) -> Result<RawResponse, ODataError> {
        let response = self.dispatch(session, cancel, &request).await?;

        if response.status != StatusCode::FORBIDDEN
            || !request.is_modifying()
            || !is_csrf_rejection(&response.headers, &response.body)
        {
            return Ok(response);
        }

        tracing::warn!("CSRF token validation failed, attempting to refetch...");
        session.clear_csrf_token();

        if let Err(e) = self.fetch_csrf_token(session, cancel).await {
            if matches!(e, ODataError::Cancelled) {
                return Err(e);
            }
            tracing::warn!("CSRF token refetch failed: {}", e);
            return Err(ODataError::CsrfRetryFailed {
                status: response.status.as_u16(),
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        if let Some(token) = session.csrf_token() {
            request.set_header(CSRF_TOKEN_HEADER, token)?;
        }

        if cancel.is_cancelled() {
            return Err(ODataError::Cancelled);
        }

        tracing::info!("Retrying {} {} with new CSRF token", request.method, request.endpoint);
        self.dispatch(session, cancel, &request).await
    }
}
