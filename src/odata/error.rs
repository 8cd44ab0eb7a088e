//! OData client errors
//!
//! `ODataError` is the single error type returned by every client operation.
//! Failure responses (status >= 400) are turned into errors by [`synthesize`],
//! which never fails: a structured `{"error": {...}}` payload becomes a
//! `ProtocolError` with a composed message, anything else becomes a
//! `ServerError` carrying the raw body.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// OData client errors
#[derive(Error, Debug)]
pub enum ODataError {
    #[error("Failed to create request: {0}")]
    RequestError(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSRF token fetch failed: {0}")]
    TokenFetchError(String),

    #[error("CSRF token required but refetch failed. Status: {status}. Response: {body}")]
    CsrfRetryFailed { status: u16, body: String },

    #[error("{message}")]
    ProtocolError {
        status: u16,
        error: ServiceError,
        message: String,
    },

    #[error("HTTP {0}: {1}")]
    ServerError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl ODataError {
    /// HTTP status attached to the error, if the service answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            ODataError::CsrfRetryFailed { status, .. }
            | ODataError::ProtocolError { status, .. }
            | ODataError::ServerError(status, _) => Some(*status),
            ODataError::HttpError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Structured error reported by the service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceError {
    #[serde(default, deserialize_with = "null_as_default")]
    pub code: String,

    #[serde(default, deserialize_with = "deserialize_message")]
    pub message: String,

    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub severity: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub details: Vec<ErrorDetail>,

    #[serde(default, rename = "innererror", alias = "innerError")]
    pub inner_error: Option<Map<String, Value>>,
}

/// One entry of `error.details`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default, deserialize_with = "deserialize_message")]
    pub message: String,

    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    error: Option<ServiceError>,
}

/// v4 sends `"message": "text"`, v2 sends `"message": {"lang": "en", "value": "text"}`
fn deserialize_message<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Object(map) => map
            .get("value")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// `null` is treated like an absent field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Build an error from a failure response. Total: any body yields an error
/// with a non-empty message.
pub fn synthesize(status: u16, body: &[u8], verbose: bool) -> ODataError {
    match parse_service_error(body) {
        Some(error) => {
            let message = compose_message(&error, status, verbose);
            ODataError::ProtocolError {
                status,
                error,
                message,
            }
        }
        None => ODataError::ServerError(status, String::from_utf8_lossy(body).into_owned()),
    }
}

fn parse_service_error(body: &[u8]) -> Option<ServiceError> {
    let payload: ErrorPayload = serde_json::from_slice(body).ok()?;
    payload.error.filter(|e| !e.message.is_empty())
}

fn compose_message(error: &ServiceError, status: u16, verbose: bool) -> String {
    let mut msg = format!("OData error (HTTP {})", status);

    if !error.code.is_empty() {
        msg.push_str(&format!(" [{}]", error.code));
    }

    msg.push_str(&format!(": {}", error.message));

    if let Some(target) = error.target.as_deref().filter(|t| !t.is_empty()) {
        msg.push_str(&format!(" (target: {})", target));
    }

    if let Some(severity) = error.severity.as_deref().filter(|s| !s.is_empty()) {
        msg.push_str(&format!(" [severity: {}]", severity));
    }

    if !error.details.is_empty() {
        let details: Vec<String> = error
            .details
            .iter()
            .map(|d| match d.target.as_deref().filter(|t| !t.is_empty()) {
                Some(target) => format!("{} (target: {})", d.message, target),
                None => d.message.clone(),
            })
            .collect();
        msg.push_str(" | Details: ");
        msg.push_str(&details.join("; "));
    }

    if verbose {
        if let Some(inner) = error.inner_error.as_ref().filter(|m| !m.is_empty()) {
            if let Ok(serialized) = serde_json::to_string(inner) {
                msg.push_str(" | Inner error: ");
                msg.push_str(&serialized);
            }
        }
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_full_structured_error() {
        let payload = body(json!({
            "error": {
                "code": "SY/530",
                "message": "Material not found",
                "target": "MaterialID",
                "severity": "error",
                "details": [
                    {"message": "Check the key", "target": "MaterialID"},
                    {"message": "Second hint"}
                ]
            }
        }));

        let err = synthesize(400, &payload, false);
        assert_eq!(
            err.to_string(),
            "OData error (HTTP 400) [SY/530]: Material not found (target: MaterialID) \
             [severity: error] | Details: Check the key (target: MaterialID); Second hint"
        );
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn test_minimal_structured_error() {
        let payload = body(json!({"error": {"message": "Forbidden"}}));
        let err = synthesize(403, &payload, false);
        assert_eq!(err.to_string(), "OData error (HTTP 403): Forbidden");
    }

    #[test]
    fn test_v2_message_object() {
        let payload = body(json!({
            "error": {
                "code": "/IWBEP/CM_MGW_RT/020",
                "message": {"lang": "en", "value": "Resource not found for segment"}
            }
        }));
        match synthesize(404, &payload, false) {
            ODataError::ProtocolError { error, message, .. } => {
                assert_eq!(error.message, "Resource not found for segment");
                assert!(message.starts_with("OData error (HTTP 404) [/IWBEP/CM_MGW_RT/020]"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_null_fields_treated_as_absent() {
        let payload = body(json!({
            "error": {
                "code": null,
                "message": "Quantity must be positive",
                "target": null,
                "severity": null,
                "details": null,
                "innererror": null
            }
        }));
        let err = synthesize(400, &payload, true);
        assert_eq!(err.to_string(), "OData error (HTTP 400): Quantity must be positive");

        let payload = body(json!({
            "error": {
                "code": "E2",
                "message": "Invalid",
                "details": [{"message": "Bad field", "target": null}]
            }
        }));
        assert_eq!(
            synthesize(400, &payload, false).to_string(),
            "OData error (HTTP 400) [E2]: Invalid | Details: Bad field"
        );
    }

    #[test]
    fn test_inner_error_only_when_verbose() {
        let payload = body(json!({
            "error": {
                "code": "E1",
                "message": "Boom",
                "innererror": {"transactionid": "ABC"}
            }
        }));

        let quiet = synthesize(500, &payload, false).to_string();
        assert!(!quiet.contains("Inner error"));

        let loud = synthesize(500, &payload, true).to_string();
        assert!(loud.ends_with(r#" | Inner error: {"transactionid":"ABC"}"#));
    }

    #[test]
    fn test_fallback_on_garbage() {
        let err = synthesize(502, b"<html>Bad Gateway</html>", false);
        assert_eq!(err.to_string(), "HTTP 502: <html>Bad Gateway</html>");

        let err = synthesize(500, &[0xff, 0xfe, 0x00], false);
        assert!(err.to_string().starts_with("HTTP 500: "));

        let err = synthesize(404, b"", false);
        assert_eq!(err.to_string(), "HTTP 404: ");
    }

    #[test]
    fn test_fallback_when_message_missing() {
        let err = synthesize(400, br#"{"error": {"code": "X"}}"#, false);
        assert!(matches!(err, ODataError::ServerError(400, _)));

        let err = synthesize(400, br#"{"error": null}"#, false);
        assert!(matches!(err, ODataError::ServerError(400, _)));

        let err = synthesize(400, br#"[1, 2, 3]"#, false);
        assert!(matches!(err, ODataError::ServerError(400, _)));
    }

    #[test]
    fn test_synthesis_is_total() {
        let bodies: Vec<&[u8]> = vec![
            b"",
            b"null",
            b"{",
            b"{\"error\": 42}",
            b"{\"error\": {\"message\": 7}}",
            b"\x00\x01\x02",
        ];
        for b in bodies {
            let msg = synthesize(500, b, true).to_string();
            assert!(!msg.is_empty());
        }
    }
}
