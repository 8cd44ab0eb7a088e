//! Response normalization
//!
//! Turns raw response bytes into a `ResponseEnvelope`, hiding the difference
//! between the v2 `{"d": {"results": [...], "__count": "3"}}` shape and the v4
//! `{"value": [...], "@odata.count": 3}` shape.

use super::error::{self, ODataError};
use super::session::ODataVersion;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const ODATA_COUNT: &str = "@odata.count";
const ODATA_NEXT_LINK: &str = "@odata.nextLink";
const ODATA_CONTEXT: &str = "@odata.context";

/// Uniform result of a read or write operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Entity list or single entity; `Null` for bodiless responses
    pub value: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,

    #[serde(rename = "nextLink", skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,

    /// v4 only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ResponseEnvelope {
    /// Number of records in `value` (1 for a single entity, 0 for none)
    pub fn record_count(&self) -> usize {
        match &self.value {
            Value::Array(items) => items.len(),
            Value::Null => 0,
            _ => 1,
        }
    }
}

/// Interpret a complete response
pub fn normalize(
    status: u16,
    body: &[u8],
    version: ODataVersion,
    verbose: bool,
) -> Result<ResponseEnvelope, ODataError> {
    if status >= 400 {
        return Err(error::synthesize(status, body, verbose));
    }

    if body.is_empty() {
        return Ok(ResponseEnvelope::default());
    }

    if verbose {
        tracing::debug!("Raw response: {}", String::from_utf8_lossy(body));
    }

    let decoded = decode(body, version)?;
    Ok(extract(decoded, version))
}

/// Version-aware JSON decoding. v2 payloads are unwrapped from `d` and their
/// `results`/`__count`/`__next` keys renamed to the v4 spellings, so the
/// extraction step only has one shape to deal with.
pub fn decode(body: &[u8], version: ODataVersion) -> Result<Value, ODataError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ODataError::ParseError(format!("Failed to parse OData response: {}", e)))?;

    if version.is_v4() {
        return Ok(value);
    }

    Ok(unwrap_v2(value))
}

fn unwrap_v2(value: Value) -> Value {
    let mut outer = match value {
        Value::Object(outer) => outer,
        other => return other,
    };

    let Some(inner) = outer.remove("d") else {
        return Value::Object(outer);
    };

    match inner {
        Value::Object(mut d) if d.contains_key("results") => {
            let mut normalized = Map::new();
            if let Some(results) = d.remove("results") {
                normalized.insert("value".to_string(), results);
            }
            if let Some(count) = d.remove("__count") {
                normalized.insert(ODATA_COUNT.to_string(), count);
            }
            if let Some(next) = d.remove("__next") {
                normalized.insert(ODATA_NEXT_LINK.to_string(), next);
            }
            Value::Object(normalized)
        }
        Value::Array(items) => {
            let mut normalized = Map::new();
            normalized.insert("value".to_string(), Value::Array(items));
            Value::Object(normalized)
        }
        other => other,
    }
}

fn extract(decoded: Value, version: ODataVersion) -> ResponseEnvelope {
    let mut map = match decoded {
        Value::Object(map) => map,
        other => {
            return ResponseEnvelope {
                value: other,
                ..Default::default()
            }
        }
    };

    let count = map.get(ODATA_COUNT).and_then(parse_count);
    let next_link = map
        .get(ODATA_NEXT_LINK)
        .and_then(|v| v.as_str())
        .map(String::from);
    let context = if version.is_v4() {
        map.get(ODATA_CONTEXT)
            .and_then(|v| v.as_str())
            .map(String::from)
    } else {
        None
    };

    let value = match map.remove("value") {
        Some(value) => value,
        None => Value::Object(map),
    };

    ResponseEnvelope {
        value,
        count,
        next_link,
        context,
    }
}

/// Numbers are truncated to i64, strings parsed as decimal; anything else is ignored
fn parse_count(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}
