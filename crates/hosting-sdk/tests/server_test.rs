//! End-to-end lifecycle tests against the mock local proxy

mod support;

use std::time::Duration;

use axum::http::StatusCode;
use hosting_sdk::model::{HoldRequest, ReserveRequest};
use hosting_sdk::{SdkError, Server, ServerOptions, ServerType};
use serde_json::json;
use support::{write_config, MockLocalProxy, TEST_JWT};
use tokio::time::timeout;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    server: Server,
    proxy: MockLocalProxy,
    dir: tempfile::TempDir,
    config_path: std::path::PathBuf,
}

async fn start(server_type: ServerType, extra: serde_json::Value) -> Harness {
    let proxy = MockLocalProxy::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = write_config(&dir, &proxy, extra);

    let options = ServerOptions {
        config_path: config_path.clone(),
        ..ServerOptions::default()
    };
    let server = Server::with_options(server_type, options);
    server.start().await.expect("server start");

    Harness {
        server,
        proxy,
        dir,
        config_path,
    }
}

impl Harness {
    /// Rewrites the configuration document, merging `extra` over the base
    /// document the harness started with.
    fn rewrite_config(&self, extra: serde_json::Value) {
        write_config(&self.dir, &self.proxy, extra);
    }
}

#[tokio::test]
async fn config_rewrite_triggers_allocation_events() {
    let harness = start(ServerType::Allocation, json!({})).await;
    let mut allocated = harness.server.take_allocate_receiver().expect("receiver");
    let mut deallocated = harness.server.take_deallocate_receiver().expect("receiver");
    let mut configs = harness
        .server
        .take_configuration_receiver()
        .expect("receiver");

    // Drain the snapshot pushed during startup.
    timeout(EVENT_TIMEOUT, configs.recv())
        .await
        .expect("startup config")
        .expect("startup config");

    harness.rewrite_config(json!({ "allocatedUUID": "a-uuid", "maxPlayers": "12" }));

    let allocation_id = timeout(EVENT_TIMEOUT, allocated.recv())
        .await
        .expect("allocate event in time")
        .expect("allocate event");
    assert_eq!(allocation_id, "a-uuid");

    let config = timeout(EVENT_TIMEOUT, configs.recv())
        .await
        .expect("config event in time")
        .expect("config event");
    assert_eq!(config.allocated_uuid, "a-uuid");
    assert_eq!(config.extra.get("maxPlayers").map(String::as_str), Some("12"));

    // A later Config() read returns at least that snapshot.
    assert_eq!(harness.server.config().allocated_uuid, "a-uuid");

    harness.rewrite_config(json!({ "allocatedUUID": "" }));
    let allocation_id = timeout(EVENT_TIMEOUT, deallocated.recv())
        .await
        .expect("deallocate event in time")
        .expect("deallocate event");
    assert_eq!(allocation_id, "");

    harness.server.stop().await.expect("stop");
}

#[tokio::test]
async fn config_truncation_is_silently_ignored() {
    let harness = start(ServerType::Allocation, json!({})).await;
    let mut errors = harness.server.take_error_receiver().expect("receiver");
    let mut allocated = harness.server.take_allocate_receiver().expect("receiver");

    // The platform truncates the file before rewriting it.
    std::fs::write(&harness.config_path, b"").expect("truncate");
    assert!(
        timeout(Duration::from_millis(700), errors.recv()).await.is_err(),
        "truncation must not surface an error"
    );

    harness.rewrite_config(json!({ "allocatedUUID": "after-truncate" }));
    let allocation_id = timeout(EVENT_TIMEOUT, allocated.recv())
        .await
        .expect("allocate event in time")
        .expect("allocate event");
    assert_eq!(allocation_id, "after-truncate");

    harness.server.stop().await.expect("stop");
}

#[tokio::test]
async fn broker_events_reach_the_embedder() {
    let harness = start(ServerType::Allocation, json!({})).await;
    let mut allocated = harness.server.take_allocate_receiver().expect("receiver");
    let mut deallocated = harness.server.take_deallocate_receiver().expect("receiver");

    assert_eq!(
        *harness.proxy.recorded.subscriptions.lock(),
        vec!["server#1".to_string()]
    );

    harness.proxy.publish_event(json!({
        "EventType": "AllocateEventType",
        "EventID": "e-1",
        "ServerID": 1,
        "AllocationID": "broker-uuid",
    }));

    let allocation_id = timeout(EVENT_TIMEOUT, allocated.recv())
        .await
        .expect("allocate event in time")
        .expect("allocate event");
    assert_eq!(allocation_id, "broker-uuid");

    // Unknown event types are tolerated and produce nothing.
    harness.proxy.publish_event(json!({
        "EventType": "SomethingElse",
        "EventID": "e-2",
        "ServerID": 1,
    }));

    harness.proxy.publish_event(json!({
        "EventType": "ServerDeallocateEvent",
        "EventID": "e-3",
        "ServerID": 1,
        "AllocationID": "",
    }));

    let allocation_id = timeout(EVENT_TIMEOUT, deallocated.recv())
        .await
        .expect("deallocate event in time")
        .expect("deallocate event");
    assert_eq!(allocation_id, "");

    harness.server.stop().await.expect("stop");
}

/// Starts a server whose configuration already points the matchmaker at the
/// mock proxy (which shares its listener with the matchmaker endpoints).
async fn start_with_backfill(allocation_id: &str) -> Harness {
    let proxy = MockLocalProxy::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = write_config(
        &dir,
        &proxy,
        json!({
            "allocatedUUID": allocation_id,
            "enableBackfill": "true",
            "matchmakerUrl": proxy.host(),
        }),
    );

    let options = ServerOptions {
        config_path: config_path.clone(),
        ..ServerOptions::default()
    };
    let server = Server::with_options(ServerType::Allocation, options);
    server.start().await.expect("server start");

    Harness {
        server,
        proxy,
        dir,
        config_path,
    }
}

#[tokio::test]
async fn backfill_loop_approves_once_per_second() {
    let harness = start_with_backfill("u1").await;

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let approvals = harness.proxy.recorded.approvals.lock().clone();
    assert!(
        approvals.len() >= 2,
        "expected at least two approvals, got {}",
        approvals.len()
    );
    for approval in &approvals {
        assert_eq!(approval.allocation_id, "u1");
        assert_eq!(
            approval.authorization.as_deref(),
            Some(format!("Bearer {TEST_JWT}").as_str())
        );
    }

    harness.server.stop().await.expect("stop");
}

#[tokio::test]
async fn backfill_rate_limit_is_reported_and_survived() {
    let harness = start_with_backfill("u2").await;
    let mut errors = harness.server.take_error_receiver().expect("receiver");

    harness.proxy.set_backfill_status(StatusCode::TOO_MANY_REQUESTS);

    let err = loop {
        let err = timeout(EVENT_TIMEOUT, errors.recv())
            .await
            .expect("error in time")
            .expect("error");
        // Approvals in flight before the status flip may still succeed.
        if matches!(err, SdkError::BackfillRetry) {
            break err;
        }
    };
    assert!(matches!(err, SdkError::BackfillRetry));

    // The loop keeps approving after a 429.
    harness.proxy.set_backfill_status(StatusCode::OK);
    let before = harness.proxy.recorded.approvals.lock().len();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(harness.proxy.recorded.approvals.lock().len() > before);

    harness.server.stop().await.expect("stop");
}

#[tokio::test]
async fn query_protocol_follows_config_rewrites() {
    let harness = start(ServerType::Allocation, json!({})).await;

    harness.rewrite_config(json!({ "queryType": "a2s" }));

    // The endpoint restarts asynchronously; poll until the A2S handshake
    // answers on the current binding.
    let client = tokio::net::UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("client socket");
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "endpoint never switched to a2s"
        );

        let Some(addr) = harness.server.query_addr().await else {
            tokio::time::sleep(Duration::from_millis(50)).await;
            continue;
        };
        client
            .send_to(&[0xFF, 0xFF, 0xFF, 0xFF, 0x54], addr)
            .await
            .expect("send");

        let mut buf = [0u8; 64];
        match timeout(Duration::from_millis(250), client.recv_from(&mut buf)).await {
            Ok(Ok((n, _))) if n >= 5 && buf[4] == 0x41 => break,
            _ => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }

    harness.server.stop().await.expect("stop");
}

#[tokio::test]
async fn reservation_operations_round_trip() {
    let harness = start(ServerType::Reservation, json!({ "allocatedUUID": "alloc-1" })).await;

    let reservation = harness
        .server
        .reserve(&ReserveRequest::default())
        .await
        .expect("reserve");
    assert_eq!(reservation.reservation_id, "res-uuid");
    assert_eq!(reservation.game_port, 9000);

    // Every local proxy request carries a generated request ID.
    let request_ids = harness.proxy.recorded.reservation_request_ids.lock().clone();
    assert_eq!(request_ids.len(), 1);
    assert!(!request_ids[0].is_empty());

    harness.server.unreserve().await.expect("unreserve");

    let status = harness
        .server
        .hold(&HoldRequest {
            timeout: "2m".to_string(),
        })
        .await
        .expect("hold");
    assert!(status.held);
    assert!(harness.server.hold_status().await.expect("hold status").held);
    harness.server.release().await.expect("release");

    harness.server.ready_for_players().await.expect("ready");
    let patches = harness.proxy.recorded.patches.lock().clone();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].allocation_id, "alloc-1");
    assert_eq!(patches[0].body, json!({ "ready": true }));
    assert!(patches[0].request_id.is_some());

    harness.server.stop().await.expect("stop");
}

#[tokio::test]
async fn reserve_is_not_applicable_to_allocation_servers() {
    let harness = start(ServerType::Allocation, json!({})).await;

    assert!(matches!(
        harness.server.reserve(&ReserveRequest::default()).await,
        Err(SdkError::OperationNotApplicable)
    ));
    assert!(matches!(
        harness.server.unreserve().await,
        Err(SdkError::OperationNotApplicable)
    ));

    harness.server.stop().await.expect("stop");
}

#[tokio::test]
async fn metric_bounds_and_protocol_support() {
    let harness = start(ServerType::Allocation, json!({})).await;

    harness.server.set_metric(0, 0.5).expect("metric 0");
    harness.server.set_metric(9, 1.0).expect("metric 9");
    assert!(matches!(
        harness.server.set_metric(10, 1.0),
        Err(SdkError::MetricOutOfBounds)
    ));
    harness.server.stop().await.expect("stop");

    let a2s = start(ServerType::Allocation, json!({ "queryType": "a2s" })).await;
    assert!(matches!(
        a2s.server.set_metric(0, 1.0),
        Err(SdkError::MetricsUnsupported)
    ));
    a2s.server.stop().await.expect("stop");
}

#[tokio::test]
async fn stop_is_idempotent_and_pushes_final_deallocation() {
    let harness = start(ServerType::Allocation, json!({})).await;
    let mut deallocated = harness.server.take_deallocate_receiver().expect("receiver");

    harness.server.stop().await.expect("first stop");
    let final_event = timeout(EVENT_TIMEOUT, deallocated.recv())
        .await
        .expect("deallocation in time")
        .expect("deallocation");
    assert_eq!(final_event, "");

    harness.server.stop().await.expect("second stop");
}

#[tokio::test]
async fn start_fails_on_unsupported_query_type() {
    let proxy = MockLocalProxy::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = write_config(&dir, &proxy, json!({ "queryType": "tf2e" }));

    let options = ServerOptions {
        config_path,
        ..ServerOptions::default()
    };
    let server = Server::with_options(ServerType::Allocation, options);

    assert!(matches!(
        server.start().await,
        Err(SdkError::UnsupportedQueryType(t)) if t == "tf2e"
    ));
}
