//! Integration tests driving a full client over the in-process
//! transport, with the test playing the remote gateway.

use std::time::Duration;

use gateway_client::transport::{MemoryHandle, MemoryTransport};
use gateway_client::{ClientError, ConnectionEvent, GatewayClient};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

struct TestGateway {
    client: GatewayClient,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    remote: MemoryHandle,
}

impl TestGateway {
    async fn connect() -> Self {
        let (transport, remote) = MemoryTransport::pair();
        remote.open();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = GatewayClient::with_transport(transport, Some(events_tx))
            .await
            .expect("connect");
        Self {
            client,
            events: events_rx,
            remote,
        }
    }

    /// Next request the client put on the wire, decoded.
    async fn sent_request(&mut self) -> Value {
        let frame = self.remote.sent_frame().await.expect("a frame was sent");
        serde_json::from_str(&frame).expect("request is valid json")
    }

    fn reply(&self, id: &Value, result: Value) {
        self.remote
            .push_frame(json!({"id": id, "error": null, "result": result}).to_string());
    }

    fn reply_error(&self, id: &Value, error: Value) {
        self.remote
            .push_frame(json!({"id": id, "error": error, "result": []}).to_string());
    }
}

async fn assert_no_update(updates: &mut gateway_client::Updates) {
    let outcome = timeout(Duration::from_millis(50), updates.recv()).await;
    assert!(outcome.is_err(), "expected no update, got {outcome:?}");
}

#[tokio::test]
async fn test_reply_routed_by_id_not_arrival_order() {
    let mut gw = TestGateway::connect().await;

    let first = tokio::spawn({
        let client = gw.client.clone();
        async move { client.fetch_last_height().await }
    });
    let first_req = gw.sent_request().await;
    assert_eq!(first_req["command"], "fetch_last_height");

    let second = tokio::spawn({
        let client = gw.client.clone();
        async move { client.fetch_block_height("00ab").await }
    });
    let second_req = gw.sent_request().await;
    assert_eq!(second_req["command"], "fetch_block_height");

    // Answer in reverse order; each caller still gets its own reply.
    gw.reply(&second_req["id"], json!([120]));
    gw.reply(&first_req["id"], json!([812000]));

    assert_eq!(first.await.unwrap().unwrap(), json!(812000));
    assert_eq!(second.await.unwrap().unwrap(), json!(120));
}

#[tokio::test]
async fn test_duplicate_reply_is_dropped() {
    let mut gw = TestGateway::connect().await;

    let call = tokio::spawn({
        let client = gw.client.clone();
        async move { client.fetch_last_height().await }
    });
    let request = gw.sent_request().await;
    gw.reply(&request["id"], json!([100]));
    assert_eq!(call.await.unwrap().unwrap(), json!(100));

    // Re-delivery finds no handler; the client keeps working.
    gw.reply(&request["id"], json!([999]));

    let next = tokio::spawn({
        let client = gw.client.clone();
        async move { client.fetch_last_height().await }
    });
    let request = gw.sent_request().await;
    gw.reply(&request["id"], json!([101]));
    assert_eq!(next.await.unwrap().unwrap(), json!(101));
}

#[tokio::test]
async fn test_server_error_passed_through_untouched() {
    let mut gw = TestGateway::connect().await;

    let call = tokio::spawn({
        let client = gw.client.clone();
        async move { client.fetch_transaction("deadbeef").await }
    });
    let request = gw.sent_request().await;
    gw.reply_error(&request["id"], json!({"code": 4, "message": "not found"}));

    match call.await.unwrap() {
        Err(ClientError::Server(error)) => {
            assert_eq!(error, json!({"code": 4, "message": "not found"}));
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_frame_is_dropped_not_fatal() {
    let mut gw = TestGateway::connect().await;

    gw.remote.push_frame("this is not json");
    gw.remote.push_frame(r#"{"type":"update"}"#);

    let call = tokio::spawn({
        let client = gw.client.clone();
        async move { client.fetch_last_height().await }
    });
    let request = gw.sent_request().await;
    gw.reply(&request["id"], json!([5]));
    assert_eq!(call.await.unwrap().unwrap(), json!(5));
}

#[tokio::test]
async fn test_subscribe_routes_updates_to_subscriber() {
    let mut gw = TestGateway::connect().await;

    let subscribe = tokio::spawn({
        let client = gw.client.clone();
        async move { client.subscribe_address_with_updates("1ABC").await }
    });
    let request = gw.sent_request().await;
    assert_eq!(request["command"], "subscribe_address");
    assert_eq!(request["params"], json!(["1ABC"]));
    gw.reply(&request["id"], json!(["ok"]));
    let (ack, mut updates) = subscribe.await.unwrap().unwrap();
    assert_eq!(ack, json!("ok"));

    gw.remote
        .push_frame(r#"{"type":"update","address":"1ABC","result":[42]}"#);
    let update = updates.recv().await.expect("update delivered");
    assert_eq!(update.first_result(), Some(&json!(42)));

    // An update for an address nobody subscribed to is dropped.
    gw.remote
        .push_frame(r#"{"type":"update","address":"1XYZ","result":[7]}"#);
    assert_no_update(&mut updates).await;
}

#[tokio::test]
async fn test_chan_and_address_namespaces_are_distinct() {
    let mut gw = TestGateway::connect().await;

    let subscribe = tokio::spawn({
        let client = gw.client.clone();
        async move { client.subscribe_address_with_updates("T1").await }
    });
    let request = gw.sent_request().await;
    gw.reply(&request["id"], json!(["ok"]));
    let (_, mut updates) = subscribe.await.unwrap().unwrap();

    // Same string, different namespace: must not reach the address
    // subscriber.
    gw.remote
        .push_frame(r#"{"type":"chan_update","thread":"T1","result":[1]}"#);
    assert_no_update(&mut updates).await;
}

#[tokio::test]
async fn test_chan_subscribe_routes_by_thread() {
    let mut gw = TestGateway::connect().await;

    let subscribe = tokio::spawn({
        let client = gw.client.clone();
        async move { client.chan_subscribe_with_updates("general", "T1").await }
    });
    let request = gw.sent_request().await;
    assert_eq!(request["command"], "chan_subscribe");
    assert_eq!(request["params"], json!(["general", "T1"]));
    gw.reply(&request["id"], json!([]));
    let (_, mut updates) = subscribe.await.unwrap().unwrap();

    gw.remote
        .push_frame(r#"{"type":"chan_update","thread":"T1","data":"hello"}"#);
    let update = updates.recv().await.expect("chan update delivered");
    assert_eq!(update.rest.get("data"), Some(&json!("hello")));
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let mut gw = TestGateway::connect().await;

    for _ in 0..2 {
        let unsubscribe = tokio::spawn({
            let client = gw.client.clone();
            async move { client.unsubscribe_address("1ABC").await }
        });
        let request = gw.sent_request().await;
        assert_eq!(request["command"], "unsubscribe_address");
        gw.reply(&request["id"], json!(["ok"]));
        assert_eq!(unsubscribe.await.unwrap().unwrap(), json!("ok"));
    }
}

#[tokio::test]
async fn test_unsubscribe_stops_updates_before_reply_arrives() {
    let mut gw = TestGateway::connect().await;

    let subscribe = tokio::spawn({
        let client = gw.client.clone();
        async move { client.subscribe_address_with_updates("1ABC").await }
    });
    let request = gw.sent_request().await;
    gw.reply(&request["id"], json!(["ok"]));
    let (_, mut updates) = subscribe.await.unwrap().unwrap();

    let unsubscribe = tokio::spawn({
        let client = gw.client.clone();
        async move { client.unsubscribe_address("1ABC").await }
    });
    let request = gw.sent_request().await;

    // The unsubscribe request is still in flight, but the standing
    // handler is already gone: this update must not be delivered.
    gw.remote
        .push_frame(r#"{"type":"update","address":"1ABC","result":[9]}"#);
    gw.reply(&request["id"], json!(["ok"]));
    unsubscribe.await.unwrap().unwrap();

    assert!(updates.recv().await.is_none());
}

#[tokio::test]
async fn test_resubscribe_replaces_previous_stream() {
    let mut gw = TestGateway::connect().await;

    let first = tokio::spawn({
        let client = gw.client.clone();
        async move { client.subscribe_address_with_updates("1ABC").await }
    });
    let request = gw.sent_request().await;
    gw.reply(&request["id"], json!(["ok"]));
    let (_, mut first_updates) = first.await.unwrap().unwrap();

    let second = tokio::spawn({
        let client = gw.client.clone();
        async move { client.subscribe_address_with_updates("1ABC").await }
    });
    let request = gw.sent_request().await;
    gw.reply(&request["id"], json!(["ok"]));
    let (_, mut second_updates) = second.await.unwrap().unwrap();

    gw.remote
        .push_frame(r#"{"type":"update","address":"1ABC","result":[1]}"#);
    let update = second_updates.recv().await.expect("new stream gets update");
    assert_eq!(update.first_result(), Some(&json!(1)));

    // Last subscribe wins: the first stream's sender was dropped.
    assert!(first_updates.recv().await.is_none());
}

#[tokio::test]
async fn test_close_drops_pending_and_clears_table() {
    let mut gw = TestGateway::connect().await;

    let pending = tokio::spawn({
        let client = gw.client.clone();
        async move { client.fetch_last_height().await }
    });
    let request = gw.sent_request().await;

    gw.client.close().await;
    assert!(!gw.client.is_connected());

    assert!(matches!(
        pending.await.unwrap(),
        Err(ClientError::Closed)
    ));
    assert!(matches!(
        gw.events.recv().await,
        Some(ConnectionEvent::Disconnected { .. })
    ));

    // A reply landing after close finds no handler and nothing to do.
    gw.reply(&request["id"], json!([1]));

    assert!(matches!(
        gw.client.fetch_last_height().await,
        Err(ClientError::Closed)
    ));
}

#[tokio::test]
async fn test_pre_connect_error_fails_the_connect_call() {
    let (transport, remote) = MemoryTransport::pair();
    remote.push_error("connection refused");

    let result = GatewayClient::with_transport(transport, None).await;
    match result {
        Err(ClientError::Connect(message)) => assert_eq!(message, "connection refused"),
        other => panic!("expected connect error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_pre_connect_hangup_fails_the_connect_call() {
    let (transport, remote) = MemoryTransport::pair();
    remote.hang_up();

    assert!(matches!(
        GatewayClient::with_transport(transport, None).await,
        Err(ClientError::Connect(_))
    ));
}

#[tokio::test]
async fn test_post_connect_error_leaves_connection_up() {
    let mut gw = TestGateway::connect().await;

    gw.remote.push_error("tls hiccup");
    match gw.events.recv().await {
        Some(ConnectionEvent::TransportError { message }) => assert_eq!(message, "tls hiccup"),
        other => panic!("expected transport error event, got {other:?}"),
    }
    assert!(gw.client.is_connected());

    // The connection still carries requests.
    let call = tokio::spawn({
        let client = gw.client.clone();
        async move { client.fetch_last_height().await }
    });
    let request = gw.sent_request().await;
    gw.reply(&request["id"], json!([7]));
    assert_eq!(call.await.unwrap().unwrap(), json!(7));
}

#[tokio::test]
async fn test_peer_hangup_emits_disconnect_and_drops_pending() {
    let mut gw = TestGateway::connect().await;

    let pending = tokio::spawn({
        let client = gw.client.clone();
        async move { client.fetch_last_height().await }
    });
    gw.sent_request().await;

    gw.remote.hang_up();
    assert!(matches!(
        gw.events.recv().await,
        Some(ConnectionEvent::Disconnected { .. })
    ));
    assert!(!gw.client.is_connected());
    assert!(matches!(
        pending.await.unwrap(),
        Err(ClientError::Closed)
    ));
}

#[tokio::test]
async fn test_dropped_update_receiver_is_cleaned_up() {
    let mut gw = TestGateway::connect().await;

    let subscribe = tokio::spawn({
        let client = gw.client.clone();
        async move { client.subscribe_address_with_updates("1ABC").await }
    });
    let request = gw.sent_request().await;
    gw.reply(&request["id"], json!(["ok"]));
    let (_, updates) = subscribe.await.unwrap().unwrap();
    drop(updates);

    // First push hits the dead receiver and removes the entry; the
    // second finds nothing. A fresh subscription works as usual.
    gw.remote
        .push_frame(r#"{"type":"update","address":"1ABC","result":[1]}"#);
    gw.remote
        .push_frame(r#"{"type":"update","address":"1ABC","result":[2]}"#);

    let resubscribe = tokio::spawn({
        let client = gw.client.clone();
        async move { client.subscribe_address_with_updates("1ABC").await }
    });
    let request = gw.sent_request().await;
    gw.reply(&request["id"], json!(["ok"]));
    let (_, mut updates) = resubscribe.await.unwrap().unwrap();

    gw.remote
        .push_frame(r#"{"type":"update","address":"1ABC","result":[3]}"#);
    let update = updates.recv().await.expect("fresh stream gets update");
    assert_eq!(update.first_result(), Some(&json!(3)));
}

#[tokio::test]
async fn test_fetch_transaction_index_returns_both_slots() {
    let mut gw = TestGateway::connect().await;

    let call = tokio::spawn({
        let client = gw.client.clone();
        async move { client.fetch_transaction_index("deadbeef").await }
    });
    let request = gw.sent_request().await;
    gw.reply(&request["id"], json!([812000, 3]));
    assert_eq!(call.await.unwrap().unwrap(), (json!(812000), json!(3)));
}

#[tokio::test]
async fn test_empty_result_is_a_malformed_reply() {
    let mut gw = TestGateway::connect().await;

    let call = tokio::spawn({
        let client = gw.client.clone();
        async move { client.fetch_last_height().await }
    });
    let request = gw.sent_request().await;
    gw.reply(&request["id"], json!([]));
    assert!(matches!(
        call.await.unwrap(),
        Err(ClientError::MalformedReply(_))
    ));
}

#[tokio::test]
async fn test_fetch_history_defaults_height_to_zero() {
    let mut gw = TestGateway::connect().await;

    let call = tokio::spawn({
        let client = gw.client.clone();
        async move { client.fetch_history("1ABC", None).await }
    });
    let request = gw.sent_request().await;
    assert_eq!(request["params"], json!(["1ABC", 0]));
    gw.reply(&request["id"], json!([[]]));
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_chained_call_from_reply_context() {
    let mut gw = TestGateway::connect().await;

    // A caller reacting to one reply immediately issues the next
    // request; the router must not be disturbed by it.
    let chained = tokio::spawn({
        let client = gw.client.clone();
        async move {
            let height = client.fetch_last_height().await?;
            client.fetch_block_header(height.as_u64().unwrap()).await
        }
    });
    let request = gw.sent_request().await;
    gw.reply(&request["id"], json!([812000]));
    let request = gw.sent_request().await;
    assert_eq!(request["command"], "fetch_block_header");
    assert_eq!(request["params"], json!([812000]));
    gw.reply(&request["id"], json!(["header"]));
    assert_eq!(chained.await.unwrap().unwrap(), json!("header"));
}
