//! Connection hub: operations, fan-out, eviction and shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use chat_core::application::services::MessageServiceImpl;
use chat_core::domain::OutboxStatus;
use chat_core::presentation::websocket::{
    ConnectionHub, HubConfig, HubError, Operation, OperationError, OperationHandler,
    OperationKind, OperationRouter, SendMessageHandler,
};

use crate::common::{InMemoryOutbox, StalledClient, TestClient};

const WAIT: Duration = Duration::from_secs(2);

fn config() -> HubConfig {
    HubConfig {
        outbound_queue_capacity: 4,
        operation_timeout: Duration::from_secs(3),
        write_wait: Duration::from_millis(200),
        shutdown_timeout: Duration::from_secs(2),
        ..HubConfig::default()
    }
}

/// Handler failing with a fixed error, counting attempts.
struct Failing {
    error: OperationError,
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl OperationHandler for Failing {
    async fn handle(&self, _operation: &Operation) -> Result<Option<Value>, OperationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

fn hub_failing_with(error: OperationError) -> (ConnectionHub, Arc<AtomicUsize>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let hub = ConnectionHub::new(config());
    let router = OperationRouter::new().register(
        OperationKind::SendMessage,
        Failing {
            error,
            attempts: attempts.clone(),
        },
    );
    hub.start(router).unwrap();
    (hub, attempts)
}

fn send_message(id: i64, chat_id: &str, content: &str) -> String {
    json!({
        "id": id,
        "operation": "send_message",
        "body": { "user_id": "u1", "chat_id": chat_id, "content": content }
    })
    .to_string()
}

#[tokio::test]
async fn send_message_is_recorded_answered_and_fanned_out() {
    let outbox = InMemoryOutbox::new();
    let hub = ConnectionHub::new(config());
    let service = Arc::new(MessageServiceImpl::new(
        outbox.clone(),
        outbox.clone(),
        Arc::new(hub.broadcaster()),
        "message",
    ));
    hub.start(
        OperationRouter::new()
            .register(OperationKind::SendMessage, SendMessageHandler::new(service)),
    )
    .unwrap();

    let mut sender = TestClient::connect(&hub, &["c1"]).unwrap();
    let mut listener = TestClient::connect(&hub, &["c1", "c9"]).unwrap();
    let mut bystander = TestClient::connect(&hub, &["c2"]).unwrap();

    sender.send(&send_message(7, "c1", "hi"));

    let mut frames = vec![
        sender.next_json(WAIT).await.unwrap(),
        sender.next_json(WAIT).await.unwrap(),
    ];
    frames.sort_by_key(|frame| frame["id"].as_i64());

    assert_eq!(
        frames[0],
        json!({
            "id": 0,
            "operation_type": "broadcast",
            "success": true,
            "data": { "user_id": "u1", "chat_id": "c1", "content": "hi" }
        })
    );
    assert_eq!(
        frames[1],
        json!({
            "id": 7,
            "operation_type": "send_message",
            "success": true,
            "data": { "message": "success" }
        })
    );

    let fanned = listener.next_json(WAIT).await.unwrap();
    assert_eq!(fanned["data"]["content"], "hi");
    assert_eq!(bystander.next_json(Duration::from_millis(200)).await, None);

    let rows = outbox.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, OutboxStatus::Pending);
    assert_eq!(rows[0].entity_name, "message");
}

#[tokio::test]
async fn invalid_message_is_rejected_without_retry() {
    let outbox = InMemoryOutbox::new();
    let hub = ConnectionHub::new(config());
    let service = Arc::new(MessageServiceImpl::new(
        outbox.clone(),
        outbox.clone(),
        Arc::new(hub.broadcaster()),
        "message",
    ));
    hub.start(
        OperationRouter::new()
            .register(OperationKind::SendMessage, SendMessageHandler::new(service)),
    )
    .unwrap();

    let mut client = TestClient::connect(&hub, &["c1"]).unwrap();
    client.send(&send_message(1, "c1", ""));

    let response = client.next_json(WAIT).await.unwrap();
    assert_eq!(response["success"], false);
    assert!(response["error"]
        .as_str()
        .unwrap()
        .starts_with("invalid operation format"));
    assert!(outbox.rows().is_empty());
}

#[tokio::test]
async fn malformed_frame_gets_format_error() {
    let (hub, attempts) = hub_failing_with(OperationError::Transient("unused".into()));
    let mut client = TestClient::connect(&hub, &["c1"]).unwrap();

    client.send("{not json");
    let response = client.next_json(WAIT).await.unwrap();

    assert_eq!(response["success"], false);
    assert!(response["error"]
        .as_str()
        .unwrap()
        .starts_with("invalid operation format"));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_and_server_only_operations_are_unsupported() {
    let (hub, attempts) = hub_failing_with(OperationError::Transient("unused".into()));
    let mut client = TestClient::connect(&hub, &["c1"]).unwrap();

    for (id, operation) in [(1, "delete_chat"), (2, "broadcast")] {
        client.send(&json!({ "id": id, "operation": operation, "body": {} }).to_string());
        let response = client.next_json(WAIT).await.unwrap();
        assert_eq!(response["id"], id);
        assert_eq!(response["operation_type"], operation);
        assert_eq!(response["success"], false);
        assert_eq!(
            response["error"],
            format!("unsupported operation: {operation}")
        );
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transient_failures_are_retried_three_times() {
    let (hub, attempts) = hub_failing_with(OperationError::Transient("db busy".into()));
    let mut client = TestClient::connect(&hub, &["c1"]).unwrap();

    client.send(&send_message(5, "c1", "hi"));
    let response = client.next_json(Duration::from_secs(4)).await.unwrap();

    assert_eq!(response["id"], 5);
    assert_eq!(response["success"], false);
    assert_eq!(response["error"], "temporary failure, please retry");
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn terminal_failures_are_answered_once() {
    let (hub, attempts) = hub_failing_with(OperationError::Canceled);
    let mut client = TestClient::connect(&hub, &["c1"]).unwrap();

    client.send(&send_message(5, "c1", "hi"));
    let response = client.next_json(WAIT).await.unwrap();

    assert_eq!(response["error"], "operation canceled");
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_consumer_is_evicted_and_others_keep_receiving() {
    let hub = ConnectionHub::new(HubConfig {
        outbound_queue_capacity: 2,
        write_wait: Duration::from_secs(1),
        ..config()
    });
    hub.start(OperationRouter::new()).unwrap();

    let mut healthy = TestClient::connect(&hub, &["c1"]).unwrap();
    let stalled = StalledClient::connect(&hub, &["c1"]).unwrap();

    let mut evicted_at = None;
    for round in 0..10 {
        let report = hub.broadcast("c1", Arc::from(format!(r#"{{"round":{round}}}"#)));
        if report.evicted == 1 {
            assert_eq!(report.delivered, 1);
            evicted_at = Some(round);
            break;
        }
        assert_eq!(report.delivered, 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let evicted_at = evicted_at.expect("stalled session was never evicted");
    assert!(!hub.contains(&stalled.id));
    assert!(hub.contains(&healthy.id));
    assert_eq!(hub.subscriber_count("c1"), 1);

    for round in 0..=evicted_at {
        let frame = healthy.next_json(WAIT).await.unwrap();
        assert_eq!(frame["round"], round);
    }

    let after = hub.broadcast("c1", Arc::from(r#"{"round":99}"#));
    assert_eq!((after.delivered, after.evicted), (1, 0));
}

#[tokio::test]
async fn client_hang_up_removes_session() {
    let hub = ConnectionHub::new(config());
    hub.start(OperationRouter::new()).unwrap();

    let client = TestClient::connect(&hub, &["c1", "c2"]).unwrap();
    assert_eq!(hub.active_sessions(), 1);

    client.hang_up();
    for _ in 0..50 {
        if !hub.contains(&client.id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(!hub.contains(&client.id));
    assert_eq!(hub.subscriber_count("c1"), 0);
    assert_eq!(hub.subscriber_count("c2"), 0);
    assert!(!hub.remove(&client.id));
}

#[tokio::test]
async fn shutdown_closes_sessions_and_refuses_new_work() {
    let hub = ConnectionHub::new(config());
    hub.start(OperationRouter::new()).unwrap();

    let mut first = TestClient::connect(&hub, &["c1"]).unwrap();
    let mut second = TestClient::connect(&hub, &["c2"]).unwrap();
    let broadcaster = hub.broadcaster();

    hub.shutdown().await.unwrap();

    assert!(first.closed(WAIT).await);
    assert!(second.closed(WAIT).await);
    assert_eq!(hub.active_sessions(), 0);
    assert!(hub.is_closing());
    assert!(matches!(
        TestClient::connect(&hub, &["c1"]),
        Err(HubError::Closed)
    ));
    assert_eq!(
        broadcaster.broadcast("c1", json!({})).await,
        Err(HubError::Closed)
    );
}
