mod common;

use std::sync::{Arc, Mutex};

use agent_gateway::{Gateway, GatewayError, McpCallOptions, McpObserverEvent};
use common::{gateway_for, options_for, RecordingSleeper};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": "srv",
        "result": result
    }))
}

fn rpc_error(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": "srv",
        "error": { "code": code, "message": message }
    }))
}

async fn mount_tool_list(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({ "method": "tools/list" })))
        .respond_with(rpc_result(json!({
            "tools": [
                {
                    "name": "intents.get",
                    "inputSchema": {
                        "type": "object",
                        "required": ["intent_id"],
                        "properties": { "intent_id": { "type": "string" } }
                    }
                },
                { "name": "inbox.list" }
            ]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn initialize_announces_protocol_version() {
    let server = MockServer::start().await;
    let (gateway, _) = gateway_for(&server.uri());

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("authorization", "Bearer gw_test"))
        .and(body_partial_json(json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "clientInfo": { "name": "agent-gateway" }
            }
        })))
        .respond_with(rpc_result(json!({ "serverInfo": { "name": "gateway" } })))
        .expect(1)
        .mount(&server)
        .await;

    let session = gateway
        .mcp_initialize(McpCallOptions::default())
        .await
        .expect("initialize failed");
    assert_eq!(session["serverInfo"]["name"], "gateway");
}

#[tokio::test]
async fn listed_schemas_validate_calls_locally() {
    let server = MockServer::start().await;
    let (gateway, _) = gateway_for(&server.uri());
    mount_tool_list(&server).await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({ "method": "tools/call" })))
        .respond_with(rpc_result(json!({ "content": [] })))
        .expect(0)
        .mount(&server)
        .await;

    gateway
        .mcp_list_tools(McpCallOptions::default())
        .await
        .expect("list failed");
    assert_eq!(gateway.tool_schemas().len(), 1);

    let err = gateway
        .mcp_call_tool("intents.get", json!({ "intent_id": 42 }), McpCallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidArgument(_)));

    let err = gateway
        .mcp_call_tool("intents.get", json!({}), McpCallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidArgument(_)));
}

#[tokio::test]
async fn tool_calls_return_the_result_object() {
    let server = MockServer::start().await;
    let sleeper = Arc::new(RecordingSleeper::default());
    let gateway = Gateway::new(
        options_for(&server.uri(), sleeper).with_default_owner_agent("agent://owner"),
    )
    .expect("failed to create gateway client");
    mount_tool_list(&server).await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({
            "method": "tools/call",
            "params": {
                "name": "intents.get",
                "arguments": { "intent_id": "int_1" },
                "owner_agent": "agent://owner"
            }
        })))
        .respond_with(rpc_result(json!({
            "content": [{ "type": "text", "text": "COMPLETED" }],
            "isError": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    gateway
        .mcp_list_tools(McpCallOptions::default())
        .await
        .expect("list failed");
    let result = gateway
        .mcp_call_tool(
            "intents.get",
            json!({ "intent_id": "int_1" }),
            McpCallOptions::default(),
        )
        .await
        .expect("call failed");

    assert_eq!(result["content"][0]["text"], "COMPLETED");
}

#[tokio::test]
async fn rpc_errors_are_classified_by_code() {
    let cases = [
        (-32029, "rate limited"),
        (-32001, "unauthorized"),
        (-32602, "bad params"),
        (-32603, "internal"),
    ];

    for (code, message) in cases {
        let server = MockServer::start().await;
        let (gateway, _) = gateway_for(&server.uri());
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(rpc_error(code, message))
            .expect(1)
            .mount(&server)
            .await;

        let err = gateway
            .mcp_call_tool("inbox.list", json!({}), McpCallOptions::default())
            .await
            .unwrap_err();

        let matched = match code {
            -32029 => matches!(err, GatewayError::RateLimit(_)),
            -32001 => matches!(err, GatewayError::Auth(_)),
            -32602 => matches!(err, GatewayError::Validation(_)),
            _ => matches!(err, GatewayError::Server(_)),
        };
        assert!(matched, "code {code} produced {err:?}");
        let api = err.api_error().expect("classified");
        assert_eq!(api.rpc_code, Some(code));
        assert_eq!(api.message, message);
    }
}

#[tokio::test]
async fn non_object_tool_result_is_a_server_error() {
    let server = MockServer::start().await;
    let (gateway, _) = gateway_for(&server.uri());

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(rpc_result(json!("just text")))
        .expect(1)
        .mount(&server)
        .await;

    let err = gateway
        .mcp_call_tool("inbox.list", json!({}), McpCallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Server(_)));
}

#[tokio::test]
async fn custom_endpoint_and_observer() {
    let server = MockServer::start().await;
    let seen: Arc<Mutex<Vec<McpObserverEvent>>> = Arc::default();
    let recorder = seen.clone();
    let sleeper = Arc::new(RecordingSleeper::default());
    let gateway = Gateway::new(
        options_for(&server.uri(), sleeper)
            .with_mcp_endpoint("/rpc/tools")
            .with_mcp_observer(Arc::new(move |event: &McpObserverEvent| {
                recorder.lock().unwrap().push(event.clone());
            })),
    )
    .expect("failed to create gateway client");

    Mock::given(method("POST"))
        .and(path("/rpc/tools"))
        .and(body_partial_json(json!({ "method": "tools/list" })))
        .respond_with(rpc_result(json!({ "tools": [] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rpc/tools"))
        .and(body_partial_json(json!({ "method": "tools/call" })))
        .respond_with(rpc_error(-32601, "no such tool"))
        .expect(1)
        .mount(&server)
        .await;

    gateway
        .mcp_list_tools(McpCallOptions::default())
        .await
        .expect("list failed");
    gateway
        .mcp_call_tool("missing", json!({}), McpCallOptions::default())
        .await
        .unwrap_err();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    assert!(matches!(&seen[0], McpObserverEvent::Request { method, .. } if method == "tools/list"));
    assert!(matches!(&seen[1], McpObserverEvent::Response { method, .. } if method == "tools/list"));
    assert!(matches!(&seen[2], McpObserverEvent::Request { method, .. } if method == "tools/call"));
    assert!(
        matches!(&seen[3], McpObserverEvent::Error { method, message, .. } if method == "tools/call" && message.contains("no such tool"))
    );
}
