//! JSON-RPC tool-call layer.
//!
//! Tool calls travel as JSON-RPC 2.0 envelopes POSTed to a single endpoint.
//! HTTP failures are classified like any other call; failures reported inside
//! a 2xx envelope are classified by their RPC code instead.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::client::{HttpClient, RequestDescriptor, RequestOptions};
use crate::error::{classify_rpc, GatewayError, Result};

/// JSON-RPC version string.
pub const JSONRPC_VERSION: &str = "2.0";

const CLIENT_NAME: &str = "agent-gateway";

/// A JSON-RPC request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: &'static str,
    /// Request ID for correlating responses.
    pub id: String,
    /// Method name to call.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a request with a fresh id.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Lifecycle notifications delivered to an [`McpObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpObserverEvent {
    /// About to send an RPC.
    Request {
        /// RPC method.
        method: String,
        /// Envelope id.
        id: String,
    },
    /// The RPC returned a result.
    Response {
        /// RPC method.
        method: String,
        /// Envelope id.
        id: String,
    },
    /// The RPC failed.
    Error {
        /// RPC method.
        method: String,
        /// Envelope id.
        id: String,
        /// Rendered error.
        message: String,
    },
}

/// Callback observing tool-call RPCs.
pub type McpObserver = Arc<dyn Fn(&McpObserverEvent) + Send + Sync>;

/// Options for a single tool-call RPC.
#[derive(Debug, Clone, Default)]
pub struct McpCallOptions {
    /// Makes the call safe to retry.
    pub idempotency_key: Option<String>,
    /// Trace id pinned for every attempt.
    pub trace_id: Option<String>,
    /// Owner identity forwarded with `tools/call`.
    pub owner_agent: Option<String>,
    /// Send the arguments without checking them against the cached schema.
    pub skip_validation: bool,
}

/// Input schemas learned from `tools/list`, keyed by tool name.
///
/// Entries are only ever added or replaced with the same shape, so concurrent
/// readers and writers need no coordination beyond the lock. The cache is
/// never invalidated on its own; call [`ToolSchemaCache::clear`] to reset.
#[derive(Clone, Default)]
pub struct ToolSchemaCache {
    schemas: Arc<RwLock<HashMap<String, Value>>>,
}

impl ToolSchemaCache {
    /// Schema for a tool, if it has been listed.
    pub fn get(&self, tool: &str) -> Option<Value> {
        self.schemas.read().get(tool).cloned()
    }

    /// Record a tool's input schema.
    pub fn insert(&self, tool: impl Into<String>, schema: Value) {
        self.schemas.write().insert(tool.into(), schema);
    }

    /// Number of cached schemas.
    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    /// Whether no schema has been cached.
    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }

    /// Forget every cached schema.
    pub fn clear(&self) {
        self.schemas.write().clear();
    }
}

impl fmt::Debug for ToolSchemaCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schemas = self.schemas.read();
        let mut names: Vec<&String> = schemas.keys().collect();
        names.sort();
        f.debug_struct("ToolSchemaCache").field("tools", &names).finish()
    }
}

/// Send `initialize`.
pub(crate) async fn initialize(client: &HttpClient, options: &McpCallOptions) -> Result<Value> {
    let params = json!({
        "protocolVersion": client.config().mcp_protocol_version,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    call(client, "initialize", Some(params), options).await
}

/// Send `tools/list` and record every tool's input schema.
pub(crate) async fn list_tools(client: &HttpClient, options: &McpCallOptions) -> Result<Value> {
    let result = call(client, "tools/list", None, options).await?;
    let tools = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            GatewayError::contract_violation(
                200,
                "tools/list result is missing the tools array",
                Some(result.clone()),
            )
        })?;

    for tool in tools {
        let name = tool.get("name").and_then(Value::as_str);
        let schema = tool
            .get("inputSchema")
            .or_else(|| tool.get("input_schema"))
            .filter(|schema| schema.is_object());
        if let (Some(name), Some(schema)) = (name, schema) {
            client.tool_schemas().insert(name, schema.clone());
        }
    }
    Ok(result)
}

/// Send `tools/call`, checking the arguments against the cached schema first.
pub(crate) async fn call_tool(
    client: &HttpClient,
    name: &str,
    arguments: Value,
    options: &McpCallOptions,
) -> Result<Map<String, Value>> {
    if name.trim().is_empty() {
        return Err(GatewayError::invalid_argument("tool name is required"));
    }
    if !options.skip_validation {
        if let Some(schema) = client.tool_schemas().get(name) {
            validate_arguments(name, &schema, &arguments)?;
        }
    }

    let mut params = json!({ "name": name, "arguments": arguments });
    let owner = options
        .owner_agent
        .as_deref()
        .or(client.config().default_owner_agent.as_deref());
    if let Some(owner) = owner {
        params["owner_agent"] = Value::String(owner.to_string());
    }

    match call(client, "tools/call", Some(params), options).await? {
        Value::Object(result) => Ok(result),
        other => Err(GatewayError::contract_violation(
            200,
            format!("tools/call result for {name} is not an object"),
            Some(other),
        )),
    }
}

/// Run one RPC and unwrap its envelope.
pub(crate) async fn call(
    client: &HttpClient,
    method: &str,
    params: Option<Value>,
    options: &McpCallOptions,
) -> Result<Value> {
    let envelope = JsonRpcRequest::new(method, params);
    let observer = client.config().mcp_observer.clone();
    let notify = |event: McpObserverEvent| {
        if let Some(ref observer) = observer {
            observer(&event);
        }
    };

    notify(McpObserverEvent::Request {
        method: method.to_string(),
        id: envelope.id.clone(),
    });
    debug!(method, id = %envelope.id, "tool-call rpc");

    let outcome = exchange(client, &envelope, options).await;
    match &outcome {
        Ok(_) => notify(McpObserverEvent::Response {
            method: method.to_string(),
            id: envelope.id.clone(),
        }),
        Err(error) => notify(McpObserverEvent::Error {
            method: method.to_string(),
            id: envelope.id.clone(),
            message: error.to_string(),
        }),
    }
    outcome
}

async fn exchange(
    client: &HttpClient,
    envelope: &JsonRpcRequest,
    options: &McpCallOptions,
) -> Result<Value> {
    let request_options = RequestOptions {
        headers: None,
        idempotency_key: options.idempotency_key.clone(),
        trace_id: options.trace_id.clone(),
    };
    let request = RequestDescriptor::new(Method::POST, client.config().mcp_endpoint.clone())
        .json(serde_json::to_value(envelope)?)
        .options(request_options)
        .retry_by_method();

    let response = client.send(&request).await?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let text = response.text().await?;

    let body: Value = serde_json::from_str(&text).map_err(|e| {
        GatewayError::contract_violation(
            status,
            format!("tool-call response is not valid JSON: {e}"),
            Some(Value::String(text.clone())),
        )
    })?;
    let mut fields = match body {
        Value::Object(fields) => fields,
        other => {
            return Err(GatewayError::contract_violation(
                status,
                "tool-call response is not a JSON object",
                Some(other),
            ))
        }
    };

    if let Some(error) = fields.get("error").filter(|e| !e.is_null()) {
        return Err(classify_rpc(status, &headers, error));
    }
    fields.remove("result").ok_or_else(|| {
        GatewayError::contract_violation(
            status,
            "tool-call response carries neither result nor error",
            Some(Value::Object(fields.clone())),
        )
    })
}

/// Shallow check of tool arguments: object shape, required keys, and the
/// declared `type` of each supplied property.
pub fn validate_arguments(tool: &str, schema: &Value, arguments: &Value) -> Result<()> {
    let Some(supplied) = arguments.as_object() else {
        return Err(GatewayError::invalid_argument(format!(
            "arguments for tool {tool} must be a JSON object"
        )));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !supplied.contains_key(key) {
                return Err(GatewayError::invalid_argument(format!(
                    "tool {tool} is missing required argument `{key}`"
                )));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (key, value) in supplied {
        let Some(declared) = properties.get(key).and_then(|p| p.get("type")) else {
            continue;
        };
        let accepted: Vec<&str> = match declared {
            Value::String(single) => vec![single.as_str()],
            Value::Array(many) => many.iter().filter_map(Value::as_str).collect(),
            _ => continue,
        };
        if !accepted.is_empty() && !accepted.iter().any(|t| matches_type(t, value)) {
            return Err(GatewayError::invalid_argument(format!(
                "tool {tool} argument `{key}` must be of type {}",
                accepted.join(" | ")
            )));
        }
    }
    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}
