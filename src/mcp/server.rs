//! MCP Server implementation for OData
//!
//! Exposes the client operations as tools. The server owns the one
//! `ClientSession` for its service behind a mutex, so tool calls are
//! serialized against the session's CSRF token, cookies and protocol mode.

use crate::mcp::protocol::*;
use crate::odata::{
    ClientSession, FunctionMethod, KeyPredicate, ODataClient, ODataError, ODataLiteral,
    QueryOptions, ResponseEnvelope, UpdateMethod,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// MCP Server for one OData service
pub struct ODataMcpServer {
    client: Arc<ODataClient>,
    session: Mutex<ClientSession>,
}

impl ODataMcpServer {
    pub fn new(client: Arc<ODataClient>, session: ClientSession) -> Self {
        Self {
            client,
            session: Mutex::new(session),
        }
    }

    /// Fetch `$metadata` once so the session runs in the right protocol mode.
    pub async fn bootstrap(&self, cancel: &CancellationToken) -> Result<(), ODataError> {
        let mut session = self.session.lock().await;
        let metadata = self.client.get_metadata(&mut session, cancel).await?;
        tracing::info!(
            "Service {} speaks OData {} ({:?} mode)",
            metadata.service_root,
            metadata.version,
            session.version()
        );
        Ok(())
    }

    /// Get list of available tools
    pub fn get_tools() -> Vec<Tool> {
        vec![
            Tool {
                name: "filter_entities".to_string(),
                description: "List entities of an entity set with OData query options. Returns value, count and nextLink.".to_string(),
                input_schema: create_tool_schema(&[
                    ("entity_set", ParamKind::String, "Entity set name, e.g. 'ProductSet'", true),
                    ("filter", ParamKind::String, "OData $filter expression, e.g. \"Price gt 100\"", false),
                    ("select", ParamKind::String, "Comma-separated fields to select", false),
                    ("expand", ParamKind::String, "Comma-separated navigation properties to expand", false),
                    ("orderby", ParamKind::String, "Sort order, e.g. 'Name asc'", false),
                    ("top", ParamKind::Integer, "Maximum records to return", false),
                    ("skip", ParamKind::Integer, "Number of records to skip", false),
                    ("skiptoken", ParamKind::String, "Server-driven paging token", false),
                    ("inlinecount", ParamKind::String, "'allpages' or 'none'", false),
                    ("search", ParamKind::String, "Free-text $search (v4 services)", false),
                ]),
            },
            Tool {
                name: "get_entity".to_string(),
                description: "Get a single entity by key".to_string(),
                input_schema: create_tool_schema(&[
                    ("entity_set", ParamKind::String, "Entity set name", true),
                    ("key", ParamKind::Object, "Key fields, e.g. {\"ProductID\": \"HT-1000\"}", true),
                    ("select", ParamKind::String, "Comma-separated fields to select", false),
                    ("expand", ParamKind::String, "Comma-separated navigation properties to expand", false),
                ]),
            },
            Tool {
                name: "create_entity".to_string(),
                description: "Create a new entity in an entity set".to_string(),
                input_schema: create_tool_schema(&[
                    ("entity_set", ParamKind::String, "Entity set name", true),
                    ("data", ParamKind::Object, "Entity properties", true),
                ]),
            },
            Tool {
                name: "update_entity".to_string(),
                description: "Update an existing entity".to_string(),
                input_schema: create_tool_schema(&[
                    ("entity_set", ParamKind::String, "Entity set name", true),
                    ("key", ParamKind::Object, "Key fields", true),
                    ("data", ParamKind::Object, "Properties to write", true),
                    ("method", ParamKind::String, "PUT (default), PATCH or MERGE", false),
                ]),
            },
            Tool {
                name: "delete_entity".to_string(),
                description: "Delete an entity".to_string(),
                input_schema: create_tool_schema(&[
                    ("entity_set", ParamKind::String, "Entity set name", true),
                    ("key", ParamKind::Object, "Key fields", true),
                ]),
            },
            Tool {
                name: "call_function".to_string(),
                description: "Call a function import".to_string(),
                input_schema: create_tool_schema(&[
                    ("function_name", ParamKind::String, "Function import name", true),
                    ("parameters", ParamKind::Object, "Function parameters", false),
                    ("method", ParamKind::String, "GET (default) or POST", false),
                ]),
            },
            Tool {
                name: "get_metadata".to_string(),
                description: "Fetch the service $metadata: version, entity types, entity sets and function imports".to_string(),
                input_schema: create_tool_schema(&[]),
            },
        ]
    }

    /// Handle one JSON-RPC request. Notifications get no response.
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!("Notification: {}", request.method);
            return None;
        }

        let id = request.id.clone();
        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            ),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({"tools": Self::get_tools()})),
            "tools/call" => {
                let params: CallToolParams = match request.params.map(serde_json::from_value) {
                    Some(Ok(params)) => params,
                    Some(Err(e)) => {
                        return Some(JsonRpcResponse::error(
                            id,
                            INVALID_PARAMS,
                            format!("Invalid params: {}", e),
                        ))
                    }
                    None => return Some(JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params")),
                };

                let result = self.call_tool(&params.name, &params.arguments, cancel).await;
                match serde_json::to_value(result) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
                }
            }
            other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", other)),
        };

        Some(response)
    }

    /// Handle a tool call
    pub async fn call_tool(
        &self,
        name: &str,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> CallToolResult {
        let result = match name {
            "filter_entities" => self.filter_entities(args, cancel).await,
            "get_entity" => self.get_entity(args, cancel).await,
            "create_entity" => self.create_entity(args, cancel).await,
            "update_entity" => self.update_entity(args, cancel).await,
            "delete_entity" => self.delete_entity(args, cancel).await,
            "call_function" => self.call_function(args, cancel).await,
            "get_metadata" => self.get_metadata(cancel).await,
            _ => Err(format!("Unknown tool: {}", name)),
        };

        match result {
            Ok(text) => CallToolResult::text(text),
            Err(message) => CallToolResult::error(message),
        }
    }

    async fn filter_entities(
        &self,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<String, String> {
        let entity_set = required_str(args, "entity_set")?;
        let options = QueryOptions {
            filter: str_arg(args, "filter"),
            select: list_arg(args, "select"),
            expand: list_arg(args, "expand"),
            orderby: str_arg(args, "orderby"),
            top: parse_number_arg(args, "top"),
            skip: parse_number_arg(args, "skip"),
            skiptoken: str_arg(args, "skiptoken"),
            inline_count: str_arg(args, "inlinecount"),
            search: str_arg(args, "search"),
            ..Default::default()
        };

        let mut session = self.session.lock().await;
        let envelope = self
            .client
            .get_entity_set(&mut session, cancel, &entity_set, &options)
            .await;
        render(envelope)
    }

    async fn get_entity(
        &self,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<String, String> {
        let entity_set = required_str(args, "entity_set")?;
        let key = key_arg(args)?;
        let options = QueryOptions {
            select: list_arg(args, "select"),
            expand: list_arg(args, "expand"),
            ..Default::default()
        };

        let mut session = self.session.lock().await;
        render(
            self.client
                .get_entity(&mut session, cancel, &entity_set, &key, &options)
                .await,
        )
    }

    async fn create_entity(
        &self,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<String, String> {
        let entity_set = required_str(args, "entity_set")?;
        let data = object_arg(args, "data")?.ok_or("Missing required parameter: data")?;

        let mut session = self.session.lock().await;
        render(
            self.client
                .create_entity(&mut session, cancel, &entity_set, &data)
                .await,
        )
    }

    async fn update_entity(
        &self,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<String, String> {
        let entity_set = required_str(args, "entity_set")?;
        let key = key_arg(args)?;
        let data = object_arg(args, "data")?.ok_or("Missing required parameter: data")?;
        let method = match str_arg(args, "method") {
            Some(m) => UpdateMethod::parse(&m).ok_or_else(|| format!("Unsupported update method: {}", m))?,
            None => UpdateMethod::default(),
        };

        let mut session = self.session.lock().await;
        render(
            self.client
                .update_entity(&mut session, cancel, &entity_set, &key, &data, method)
                .await,
        )
    }

    async fn delete_entity(
        &self,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<String, String> {
        let entity_set = required_str(args, "entity_set")?;
        let key = key_arg(args)?;

        let mut session = self.session.lock().await;
        self.client
            .delete_entity(&mut session, cancel, &entity_set, &key)
            .await
            .map(|_| format!("Deleted {}({})", entity_set, key))
            .map_err(|e| format!("Error: {}", e))
    }

    async fn call_function(
        &self,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<String, String> {
        let function_name = required_str(args, "function_name")?;
        let parameters = object_arg(args, "parameters")?.unwrap_or_default();
        let method = match str_arg(args, "method") {
            Some(m) => FunctionMethod::parse(&m).ok_or_else(|| format!("Unsupported function method: {}", m))?,
            None => FunctionMethod::default(),
        };

        let mut session = self.session.lock().await;
        render(
            self.client
                .call_function(&mut session, cancel, &function_name, &parameters, method)
                .await,
        )
    }

    async fn get_metadata(&self, cancel: &CancellationToken) -> Result<String, String> {
        let mut session = self.session.lock().await;
        let metadata = self
            .client
            .get_metadata(&mut session, cancel)
            .await
            .map_err(|e| format!("Error fetching metadata: {}", e))?;
        serde_json::to_string_pretty(&metadata).map_err(|e| e.to_string())
    }
}

fn render(result: Result<ResponseEnvelope, ODataError>) -> Result<String, String> {
    let envelope = result.map_err(|e| format!("Error: {}", e))?;
    serde_json::to_string_pretty(&envelope).map_err(|e| e.to_string())
}

fn str_arg(args: &Map<String, Value>, name: &str) -> Option<String> {
    match args.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn required_str(args: &Map<String, Value>, name: &str) -> Result<String, String> {
    str_arg(args, name).ok_or_else(|| format!("Missing required parameter: {}", name))
}

fn list_arg(args: &Map<String, Value>, name: &str) -> Option<Vec<String>> {
    str_arg(args, name).map(|s| s.split(',').map(|f| f.trim().to_string()).collect())
}

/// Parse a number argument from JSON (handles both string and number types)
fn parse_number_arg(args: &Map<String, Value>, name: &str) -> Option<usize> {
    args.get(name).and_then(|v| {
        v.as_u64()
            .map(|n| n as usize)
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    })
}

/// Object argument given either as a JSON object or as JSON text
fn object_arg(args: &Map<String, Value>, name: &str) -> Result<Option<Map<String, Value>>, String> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            _ => Err(format!("Parameter {} must be a JSON object", name)),
        },
        Some(_) => Err(format!("Parameter {} must be a JSON object", name)),
    }
}

/// Key given as an object, JSON text, or a bare value. Anything that is not
/// an object becomes a single-field key rendered as its literal.
fn key_arg(args: &Map<String, Value>) -> Result<KeyPredicate, String> {
    let value = args
        .get("key")
        .filter(|v| !v.is_null())
        .ok_or("Missing required parameter: key")?;

    let key = match value {
        Value::Object(map) => KeyPredicate::from_json_map(map),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => KeyPredicate::from_json_map(&map),
            _ => KeyPredicate::new().with("key", ODataLiteral::from(value)),
        },
        other => KeyPredicate::new().with("key", ODataLiteral::from(other)),
    };

    if key.is_empty() {
        return Err("Parameter key must not be empty".to_string());
    }
    Ok(key)
}
