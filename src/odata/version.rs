//! Version adapter
//!
//! Translates caller-facing query options, key predicates and function
//! parameters into the wire conventions of OData v2 or v4.

use super::session::ODataVersion;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

pub const QUERY_FORMAT: &str = "$format";
pub const QUERY_INLINE_COUNT: &str = "$inlinecount";
pub const QUERY_COUNT: &str = "$count";

/// Query parameters as sent on the wire. Ordering is irrelevant to the
/// protocol; a sorted map keeps URLs deterministic.
pub type QueryParams = BTreeMap<String, String>;

/// Query options for OData requests
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub select: Option<Vec<String>>,
    pub filter: Option<String>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub orderby: Option<String>,
    pub expand: Option<Vec<String>>,
    pub search: Option<String>,
    pub skiptoken: Option<String>,
    /// `$inlinecount` value ("allpages" / "none")
    pub inline_count: Option<String>,
    /// Any other parameters, passed through verbatim
    pub extra: QueryParams,
}

impl QueryOptions {
    /// Flatten into raw parameters. Empty values are dropped.
    pub fn to_params(&self) -> QueryParams {
        let mut params = self.extra.clone();

        if let Some(ref select) = self.select {
            params.insert("$select".to_string(), select.join(","));
        }
        if let Some(ref filter) = self.filter {
            params.insert("$filter".to_string(), filter.clone());
        }
        if let Some(top) = self.top {
            params.insert("$top".to_string(), top.to_string());
        }
        if let Some(skip) = self.skip {
            params.insert("$skip".to_string(), skip.to_string());
        }
        if let Some(ref orderby) = self.orderby {
            params.insert("$orderby".to_string(), orderby.clone());
        }
        if let Some(ref expand) = self.expand {
            params.insert("$expand".to_string(), expand.join(","));
        }
        if let Some(ref search) = self.search {
            params.insert("$search".to_string(), search.clone());
        }
        if let Some(ref skiptoken) = self.skiptoken {
            params.insert("$skiptoken".to_string(), skiptoken.clone());
        }
        if let Some(ref inline_count) = self.inline_count {
            params.insert(QUERY_INLINE_COUNT.to_string(), inline_count.clone());
        }

        params.retain(|_, v| !v.is_empty());
        params
    }
}

/// Build the final parameters for an entity-set listing.
///
/// v2 always asks for JSON and defaults `$inlinecount=allpages`. v4 drops the
/// format directive and rewrites `$inlinecount` into `$count=true|false`.
/// Caller values win over defaults.
pub fn list_query(version: ODataVersion, options: &QueryOptions) -> QueryParams {
    let caller = options.to_params();
    let mut params = QueryParams::new();

    if !version.is_v4() {
        params.insert(QUERY_FORMAT.to_string(), "json".to_string());
        if !caller.contains_key(QUERY_INLINE_COUNT) {
            params.insert(QUERY_INLINE_COUNT.to_string(), "allpages".to_string());
        }
    }

    for (key, value) in caller {
        if version.is_v4() && key == QUERY_INLINE_COUNT {
            match value.as_str() {
                "allpages" => {
                    params.insert(QUERY_COUNT.to_string(), "true".to_string());
                }
                "none" => {
                    params.insert(QUERY_COUNT.to_string(), "false".to_string());
                }
                _ => {}
            }
            continue;
        }
        params.insert(key, value);
    }

    params
}

/// Render parameters as a query string (without the leading `?`)
pub fn encode_query(params: &QueryParams) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Append an encoded query to a path
pub fn with_query(path: &str, params: &QueryParams) -> String {
    if params.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, encode_query(params))
    }
}

/// Literal value usable in a key predicate or function parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ODataLiteral {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Anything else, stringified and treated like a string
    Other(String),
}

impl ODataLiteral {
    /// Render for a key predicate: strings single-quoted, no escaping
    pub fn to_key_literal(&self) -> String {
        match self {
            ODataLiteral::String(s) | ODataLiteral::Other(s) => format!("'{}'", s),
            ODataLiteral::Integer(i) => i.to_string(),
            ODataLiteral::Float(f) => f.to_string(),
            ODataLiteral::Boolean(b) => b.to_string(),
        }
    }

    /// Render for a function-import query parameter: strings single-quoted
    /// with URL-escaped content
    pub fn to_query_literal(&self) -> String {
        match self {
            ODataLiteral::String(s) | ODataLiteral::Other(s) => {
                format!("'{}'", urlencoding::encode(s))
            }
            ODataLiteral::Integer(i) => i.to_string(),
            ODataLiteral::Float(f) => f.to_string(),
            ODataLiteral::Boolean(b) => b.to_string(),
        }
    }
}

impl From<&Value> for ODataLiteral {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(s) => ODataLiteral::String(s.clone()),
            Value::Bool(b) => ODataLiteral::Boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ODataLiteral::Integer(i)
                } else if let Some(f) = n.as_f64().filter(|_| !n.is_u64()) {
                    ODataLiteral::Float(f)
                } else {
                    ODataLiteral::Other(n.to_string())
                }
            }
            other => ODataLiteral::Other(other.to_string()),
        }
    }
}

impl From<&str> for ODataLiteral {
    fn from(value: &str) -> Self {
        ODataLiteral::String(value.to_string())
    }
}

impl From<String> for ODataLiteral {
    fn from(value: String) -> Self {
        ODataLiteral::String(value)
    }
}

impl From<i64> for ODataLiteral {
    fn from(value: i64) -> Self {
        ODataLiteral::Integer(value)
    }
}

impl From<f64> for ODataLiteral {
    fn from(value: f64) -> Self {
        ODataLiteral::Float(value)
    }
}

impl From<bool> for ODataLiteral {
    fn from(value: bool) -> Self {
        ODataLiteral::Boolean(value)
    }
}

/// Ordered key fields addressing one entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyPredicate(Vec<(String, ODataLiteral)>);

impl KeyPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key field. Re-adding a field replaces its value in place.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<ODataLiteral>) -> Self {
        let field = field.into();
        let value = value.into();
        match self.0.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = value,
            None => self.0.push((field, value)),
        }
        self
    }

    /// Build from a JSON object, keeping its insertion order
    pub fn from_json_map(map: &Map<String, Value>) -> Self {
        Self(
            map.iter()
                .map(|(k, v)| (k.clone(), ODataLiteral::from(v)))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for KeyPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [(_, value)] = self.0.as_slice() {
            return f.write_str(&value.to_key_literal());
        }

        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.to_key_literal()))
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// `EntitySet(predicate)`
pub fn entity_path(entity_set: &str, key: &KeyPredicate) -> String {
    format!("{}({})", entity_set, key)
}

/// Encode function-import parameters into a query string, in insertion order
pub fn function_query(parameters: &Map<String, Value>) -> String {
    parameters
        .iter()
        .map(|(k, v)| format!("{}={}", k, ODataLiteral::from(v).to_query_literal()))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_query_options_empty() {
        let options = QueryOptions::default();
        assert!(options.to_params().is_empty());
    }

    #[test]
    fn test_query_options_full() {
        let options = QueryOptions {
            select: Some(vec!["Name".to_string(), "Price".to_string()]),
            filter: Some("Price gt 10".to_string()),
            top: Some(10),
            orderby: Some("Name asc".to_string()),
            ..with_empty_extra()
        };

        let params = options.to_params();
        assert_eq!(params["$select"], "Name,Price");
        assert_eq!(params["$filter"], "Price gt 10");
        assert_eq!(params["$top"], "10");
        assert_eq!(params["$orderby"], "Name asc");
        assert!(!params.contains_key("$skip"));
        assert!(!params.contains_key("sap-language"));
    }

    fn with_empty_extra() -> QueryOptions {
        let mut extra = QueryParams::new();
        extra.insert("sap-language".to_string(), String::new());
        QueryOptions {
            extra,
            ..Default::default()
        }
    }

    #[test]
    fn test_v2_list_defaults() {
        let params = list_query(ODataVersion::V2, &QueryOptions::default());
        assert_eq!(params.len(), 2);
        assert_eq!(params[QUERY_FORMAT], "json");
        assert_eq!(params[QUERY_INLINE_COUNT], "allpages");
    }

    #[test]
    fn test_v2_caller_inline_count_wins() {
        let options = QueryOptions {
            inline_count: Some("none".to_string()),
            ..Default::default()
        };
        let params = list_query(ODataVersion::V2, &options);
        assert_eq!(params[QUERY_INLINE_COUNT], "none");
        assert_eq!(params[QUERY_FORMAT], "json");
    }

    #[test]
    fn test_v2_caller_overrides_format() {
        let mut extra = QueryParams::new();
        extra.insert(QUERY_FORMAT.to_string(), "xml".to_string());
        let options = QueryOptions {
            extra,
            ..Default::default()
        };
        let params = list_query(ODataVersion::V2, &options);
        assert_eq!(params[QUERY_FORMAT], "xml");
    }

    #[test]
    fn test_v4_count_translation() {
        let allpages = QueryOptions {
            inline_count: Some("allpages".to_string()),
            ..Default::default()
        };
        let params = list_query(ODataVersion::V4, &allpages);
        assert_eq!(params[QUERY_COUNT], "true");
        assert!(!params.contains_key(QUERY_INLINE_COUNT));
        assert!(!params.contains_key(QUERY_FORMAT));

        let none = QueryOptions {
            inline_count: Some("none".to_string()),
            ..Default::default()
        };
        let params = list_query(ODataVersion::V4, &none);
        assert_eq!(params[QUERY_COUNT], "false");
        assert!(!params.contains_key(QUERY_INLINE_COUNT));
    }

    #[test]
    fn test_v4_defaults_empty() {
        let params = list_query(ODataVersion::V4, &QueryOptions::default());
        assert!(params.is_empty());

        let odd = QueryOptions {
            inline_count: Some("sometimes".to_string()),
            top: Some(5),
            ..Default::default()
        };
        let params = list_query(ODataVersion::V4, &odd);
        assert_eq!(params.len(), 1);
        assert_eq!(params["$top"], "5");
    }

    #[test]
    fn test_encode_query() {
        let mut params = QueryParams::new();
        params.insert("$filter".to_string(), "Name eq 'A B'".to_string());
        params.insert("$top".to_string(), "5".to_string());
        assert_eq!(
            encode_query(&params),
            "%24filter=Name%20eq%20%27A%20B%27&%24top=5"
        );
        assert_eq!(with_query("Products", &QueryParams::new()), "Products");
    }

    #[test]
    fn test_single_key_bare_value() {
        let key = KeyPredicate::from_json_map(&object(json!({"ID": 42})));
        assert_eq!(key.to_string(), "42");

        let key = KeyPredicate::new().with("ProductID", "HT-1000");
        assert_eq!(key.to_string(), "'HT-1000'");
    }

    #[test]
    fn test_composite_key() {
        let key = KeyPredicate::from_json_map(&object(json!({"CategoryID": "A", "ItemID": 7})));
        let rendered = key.to_string();
        assert_eq!(rendered, "CategoryID='A',ItemID=7");

        let parts: Vec<&str> = rendered.split(',').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts.contains(&"CategoryID='A'"));
        assert!(parts.contains(&"ItemID=7"));
    }

    #[test]
    fn test_composite_key_each_field_once() {
        let key = KeyPredicate::new()
            .with("A", 1i64)
            .with("B", true)
            .with("A", 2i64);
        assert_eq!(key.len(), 2);
        assert_eq!(key.to_string(), "A=2,B=true");
    }

    #[test]
    fn test_string_key_not_escaped() {
        let key = KeyPredicate::new().with("Name", "O'Brien & Co");
        assert_eq!(key.to_string(), "'O'Brien & Co'");
    }

    #[test]
    fn test_literal_kinds() {
        assert_eq!(ODataLiteral::from(&json!(1.5)).to_key_literal(), "1.5");
        assert_eq!(ODataLiteral::from(&json!(false)).to_key_literal(), "false");
        assert_eq!(ODataLiteral::from(&json!(-3)).to_key_literal(), "-3");
        assert_eq!(ODataLiteral::from(&json!(null)).to_key_literal(), "'null'");
        assert_eq!(
            ODataLiteral::from(&json!([1, 2])).to_key_literal(),
            "'[1,2]'"
        );
        assert_eq!(
            ODataLiteral::from(&json!(u64::MAX)),
            ODataLiteral::Other(u64::MAX.to_string())
        );
    }

    #[test]
    fn test_entity_path() {
        let key = KeyPredicate::new().with("ID", 42i64);
        assert_eq!(entity_path("Products", &key), "Products(42)");
    }

    #[test]
    fn test_function_query() {
        let params = object(json!({
            "City": "New York",
            "Radius": 5,
            "Exact": true,
            "Factor": 0.5
        }));
        assert_eq!(
            function_query(&params),
            "City='New%20York'&Radius=5&Exact=true&Factor=0.5"
        );
    }
}
