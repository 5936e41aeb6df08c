#![allow(dead_code)] // not every test binary exercises the whole mock
//! Mock local proxy, broker and matchmaker for end-to-end tests
//!
//! One axum server plays all three roles the SDK talks to: the local proxy
//! REST API, the WebSocket broker publishing allocation events, and the
//! matchmaker backfill endpoint. Tests publish broker frames through
//! [`MockLocalProxy::publish`] and inspect recorded requests afterwards.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::broadcast;

pub const TEST_JWT: &str = "test-jwt-token";

/// One recorded backfill approval call.
#[derive(Clone, Debug)]
pub struct Approval {
    pub allocation_id: String,
    pub authorization: Option<String>,
}

/// One recorded allocation patch.
#[derive(Clone, Debug)]
pub struct AllocationPatch {
    pub allocation_id: String,
    pub body: serde_json::Value,
    pub request_id: Option<String>,
}

#[derive(Default)]
pub struct Recorded {
    pub approvals: Mutex<Vec<Approval>>,
    pub patches: Mutex<Vec<AllocationPatch>>,
    pub reservation_request_ids: Mutex<Vec<String>>,
    pub subscriptions: Mutex<Vec<String>>,
}

struct ProxyState {
    publish: broadcast::Sender<String>,
    recorded: Arc<Recorded>,
    backfill_status: Mutex<StatusCode>,
}

/// A mock of the machine-local proxy (plus the matchmaker, which shares the
/// listener for convenience).
pub struct MockLocalProxy {
    pub addr: SocketAddr,
    pub recorded: Arc<Recorded>,
    publish: broadcast::Sender<String>,
    state: Arc<ProxyState>,
}

impl MockLocalProxy {
    pub async fn start() -> Self {
        let (publish, _) = broadcast::channel(16);
        let recorded = Arc::new(Recorded::default());
        let state = Arc::new(ProxyState {
            publish: publish.clone(),
            recorded: Arc::clone(&recorded),
            backfill_status: Mutex::new(StatusCode::OK),
        });

        let app = Router::new()
            .route("/token", get(token))
            .route("/v1/connection/websocket", get(ws_handler))
            .route(
                "/v1/servers/:id/reservations",
                post(reserve).delete(unreserve),
            )
            .route(
                "/v1/servers/:id/hold",
                post(hold).get(hold_status).delete(release),
            )
            .route(
                "/v1/servers/:id/allocations/:allocation_id",
                patch(patch_allocation),
            )
            .route("/v2/backfill/:allocation_id/approvals", post(approve_backfill))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock proxy");
        let addr = listener.local_addr().expect("mock proxy addr");

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            recorded,
            publish,
            state,
        }
    }

    /// Base URL of the proxy, including the scheme.
    pub fn host(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Publishes a broker frame to every connected subscriber.
    pub fn publish_event(&self, event: serde_json::Value) {
        let frame = json!({ "channel": "server", "data": event }).to_string();
        let _ = self.publish.send(frame);
    }

    /// Makes subsequent backfill approvals answer with `status`.
    pub fn set_backfill_status(&self, status: StatusCode) {
        *self.state.backfill_status.lock() = status;
    }
}

async fn token() -> Json<serde_json::Value> {
    Json(json!({ "token": TEST_JWT, "error": "" }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ProxyState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<ProxyState>) {
    // The SDK opens with a subscribe request; acknowledge it.
    let channel = match socket.recv().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("channel").and_then(|c| c.as_str()).map(String::from))
            .unwrap_or_default(),
        _ => return,
    };

    state.recorded.subscriptions.lock().push(channel.clone());

    let ack = json!({ "result": "subscribed", "channel": channel }).to_string();
    if socket.send(Message::Text(ack)).await.is_err() {
        return;
    }

    let mut frames = state.publish.subscribe();
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    if socket.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn reserve(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    if let Some(request_id) = headers.get("X-Request-ID").and_then(|v| v.to_str().ok()) {
        state
            .recorded
            .reservation_request_ids
            .lock()
            .push(request_id.to_string());
    }

    Json(json!({
        "buildConfigurationId": 1234,
        "created": "2024-01-01T00:00:00Z",
        "fulfilled": "2024-01-01T00:00:01Z",
        "gamePort": 9000,
        "ipv4": "127.0.0.1",
        "requested": "2024-01-01T00:00:00Z",
        "reservationId": "res-uuid",
    }))
}

async fn unreserve() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn hold() -> Json<serde_json::Value> {
    Json(json!({ "expiresAt": 1893456000, "held": true }))
}

async fn hold_status() -> Json<serde_json::Value> {
    Json(json!({ "expiresAt": 1893456000, "held": true }))
}

async fn release() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn patch_allocation(
    State(state): State<Arc<ProxyState>>,
    Path((_, allocation_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    state.recorded.patches.lock().push(AllocationPatch {
        allocation_id,
        body,
        request_id: headers
            .get("X-Request-ID")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    });
    StatusCode::NO_CONTENT
}

async fn approve_backfill(
    State(state): State<Arc<ProxyState>>,
    Path(allocation_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.recorded.approvals.lock().push(Approval {
        allocation_id,
        authorization: headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    });

    let status = *state.backfill_status.lock();
    if status == StatusCode::OK {
        (StatusCode::OK, Json(json!({ "ID": "ticket-1" }))).into_response()
    } else {
        status.into_response()
    }
}

/// Writes a configuration document pointing at the mock proxy and returns
/// its path alongside the guard keeping the directory alive.
pub fn write_config(
    dir: &tempfile::TempDir,
    proxy: &MockLocalProxy,
    extra: serde_json::Value,
) -> std::path::PathBuf {
    let mut doc = json!({
        "localProxyUrl": proxy.host(),
        "queryPort": "0",
        "port": "9000",
        "serverID": "1",
        "serverLogDir": dir.path().join("logs").to_string_lossy(),
    });

    if let (Some(doc), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            doc.insert(k.clone(), v.clone());
        }
    }

    let path = dir.path().join("server.json");
    std::fs::write(&path, serde_json::to_vec(&doc).expect("serialize config")).expect("write config");
    path
}
