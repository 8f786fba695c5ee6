mod common;

use std::time::Duration;

use agent_gateway::{ClientOptions, Gateway, GatewayError, ObserveOptions};
use common::gateway_for;
use futures_util::StreamExt;
use serde_json::json;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STREAM: &str = "/v1/intents/int_1/events/stream";
const EVENTS: &str = "/v1/intents/int_1/events";

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
}

async fn mount_stream_status(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path(STREAM))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Empty page, then seq 1, then (with since=1) the terminal seq 2.
async fn mount_polling_script(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(EVENTS))
        .and(query_param_is_missing("since"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "events": [] })))
        .up_to_n_times(1)
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(EVENTS))
        .and(query_param_is_missing("since"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "events": [{ "seq": 1, "status": "IN_PROGRESS", "event_type": "intent.progress" }]
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(EVENTS))
        .and(query_param("since", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "events": [
                { "seq": 1, "status": "IN_PROGRESS", "event_type": "intent.progress" },
                { "seq": 2, "status": "COMPLETED", "event_type": "intent.completed" }
            ]
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn falls_back_to_polling_when_stream_is_missing() {
    let server = MockServer::start().await;
    let (gateway, sleeper) = gateway_for(&server.uri());
    mount_stream_status(&server, 404).await;
    mount_polling_script(&server).await;

    let events: Vec<_> = gateway
        .observe("int_1", ObserveOptions::default().poll_interval_ms(250))
        .expect("observe failed")
        .into_stream()
        .collect()
        .await;

    let seqs: Vec<u64> = events
        .into_iter()
        .map(|event| event.expect("event failed").seq().expect("seq"))
        .collect();
    assert_eq!(seqs, vec![1, 2]);
    assert_eq!(sleeper.delays(), vec![Duration::from_millis(250)]);
}

#[tokio::test]
async fn wait_for_returns_the_terminal_event() {
    let server = MockServer::start().await;
    let (gateway, _) = gateway_for(&server.uri());
    mount_stream_status(&server, 501).await;
    mount_polling_script(&server).await;

    let terminal = gateway
        .wait_for("int_1", ObserveOptions::default())
        .await
        .expect("wait_for failed");

    assert_eq!(terminal.seq(), Some(2));
    assert_eq!(terminal.status(), Some("COMPLETED"));
}

#[tokio::test]
async fn stream_events_are_filtered_and_deduplicated() {
    let server = MockServer::start().await;
    let (gateway, _) = gateway_for(&server.uri());

    Mock::given(method("GET"))
        .and(path(STREAM))
        .and(query_param("since", "0"))
        .and(query_param("wait_seconds", "5"))
        .respond_with(sse(concat!(
            ": keep-alive\n\n",
            "event: ping\ndata: {}\n\n",
            "event: intent.progress\ndata: {\"seq\":1,\"status\":\"IN_PROGRESS\"}\n\n",
            "event: intent.progress\ndata: {\"seq\":1,\"status\":\"IN_PROGRESS\"}\n\n",
            "event: intent.progress\ndata: not json\n\n",
            "event: intent.completed\ndata: {\"seq\":2,\"status\":\"COMPLETED\"}\n\n",
            "event: intent.progress\ndata: {\"seq\":3,\"status\":\"IN_PROGRESS\"}\n\n",
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(EVENTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "events": [] })))
        .expect(0)
        .mount(&server)
        .await;

    let mut observer = gateway
        .observe("int_1", ObserveOptions::default().wait_seconds(5))
        .expect("observe failed");

    let first = observer.next().await.expect("first").expect("first ok");
    assert_eq!(first.seq(), Some(1));
    let second = observer.next().await.expect("second").expect("second ok");
    assert_eq!(second.seq(), Some(2));
    assert!(second.is_terminal());
    assert!(observer.next().await.is_none());
    assert_eq!(observer.cursor(), 2);
}

#[tokio::test]
async fn stream_reconnects_from_the_cursor() {
    let server = MockServer::start().await;
    let (gateway, _) = gateway_for(&server.uri());

    Mock::given(method("GET"))
        .and(path(STREAM))
        .and(query_param("since", "0"))
        .respond_with(sse(
            "event: intent.progress\ndata: {\"seq\":1,\"status\":\"IN_PROGRESS\"}\n\n",
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(STREAM))
        .and(query_param("since", "1"))
        .respond_with(sse(concat!(
            "event: intent.progress\ndata: {\"seq\":1,\"status\":\"IN_PROGRESS\"}\n\n",
            "event: intent.failed\ndata: {\"seq\":2,\"event_type\":\"intent.failed\"}\n\n",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let terminal = gateway
        .wait_for("int_1", ObserveOptions::default())
        .await
        .expect("wait_for failed");

    assert_eq!(terminal.seq(), Some(2));
    assert_eq!(terminal.event_type(), Some("intent.failed"));
}

#[tokio::test]
async fn resumes_after_the_given_sequence() {
    let server = MockServer::start().await;
    let (gateway, _) = gateway_for(&server.uri());
    mount_stream_status(&server, 405).await;

    Mock::given(method("GET"))
        .and(path(EVENTS))
        .and(query_param("since", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "events": [
                { "seq": 7, "status": "IN_PROGRESS" },
                { "seq": 8, "status": "CANCELED" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let terminal = gateway
        .wait_for("int_1", ObserveOptions::default().since(7))
        .await
        .expect("wait_for failed");

    assert_eq!(terminal.seq(), Some(8));
}

#[tokio::test]
async fn missing_events_array_is_a_server_error() {
    let server = MockServer::start().await;
    let (gateway, _) = gateway_for(&server.uri());
    mount_stream_status(&server, 404).await;

    Mock::given(method("GET"))
        .and(path(EVENTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let mut observer = gateway
        .observe("int_1", ObserveOptions::default())
        .expect("observe failed");
    let err = observer.next().await.expect("an item").unwrap_err();

    assert!(matches!(err, GatewayError::Server(_)));
    assert!(observer.next().await.is_none());
}

#[tokio::test]
async fn other_stream_failures_are_not_masked_by_polling() {
    let server = MockServer::start().await;
    let (gateway, _) = gateway_for(&server.uri());

    Mock::given(method("GET"))
        .and(path(STREAM))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": "bad key" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(EVENTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "events": [] })))
        .expect(0)
        .mount(&server)
        .await;

    let err = gateway
        .wait_for("int_1", ObserveOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Auth(_)));
}

#[tokio::test]
async fn gives_up_at_the_deadline() {
    let server = MockServer::start().await;
    let gateway = Gateway::new(ClientOptions::new("gw_test").with_base_url(server.uri()))
        .expect("failed to create gateway client");
    mount_stream_status(&server, 404).await;

    Mock::given(method("GET"))
        .and(path(EVENTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "events": [] })))
        .mount(&server)
        .await;

    let err = gateway
        .wait_for(
            "int_1",
            ObserveOptions::default().poll_interval_ms(20).timeout_ms(200),
        )
        .await
        .unwrap_err();

    match err {
        GatewayError::Timeout {
            intent_id,
            timeout_ms,
        } => {
            assert_eq!(intent_id, "int_1");
            assert_eq!(timeout_ms, 200);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}
