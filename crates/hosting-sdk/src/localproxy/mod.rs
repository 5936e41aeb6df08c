//! Client for the machine-local proxy
//!
//! The local proxy is the SDK's window onto the platform: a REST API for
//! reservations, holds and allocation patches, and a WebSocket broker that
//! publishes allocation lifecycle events on a per-server channel.
//!
//! The subscription wire format is JSON frames. The client sends
//! `{"method":"subscribe","channel":"server#<id>"}` after connecting and
//! waits for a frame whose `result` is `"subscribed"`. Publications arrive
//! either as a bare event object or wrapped as `{"channel":..,"data":{..}}`.

mod event;

pub use event::{Event, EventKind};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::SdkError;
use crate::events::EventChannels;
use crate::model::{
    HoldRequest, HoldStatus, PatchAllocationRequest, ReserveRequest, ReserveResponse,
};

/// Per-request timeout for every local proxy HTTP call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before retrying a failed broker subscription.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

type Callback = Box<dyn Fn(Event) + Send + Sync>;

/// A client to the local proxy, owning both the REST surface and the broker
/// subscription for one server.
pub(crate) struct Client {
    host: String,
    ws_url: String,
    server_id: i64,
    http: reqwest::Client,
    callbacks: RwLock<HashMap<EventKind, Callback>>,
    events: Arc<EventChannels>,
    shutdown: CancellationToken,
}

impl Client {
    /// Creates a client for the proxy named in `config` and the given
    /// server ID.
    pub fn new(
        config: &Config,
        server_id: i64,
        events: Arc<EventChannels>,
        shutdown: CancellationToken,
    ) -> Result<Self, SdkError> {
        Ok(Self {
            host: config.local_proxy_url().to_string(),
            ws_url: format!(
                "ws://{}/v1/connection/websocket",
                config.local_proxy_host()
            ),
            server_id,
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            callbacks: RwLock::new(HashMap::new()),
            events,
            shutdown,
        })
    }

    /// Registers a callback for the given event kind. Later registrations
    /// replace earlier ones.
    pub fn register_callback(&self, kind: EventKind, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.callbacks.write().insert(kind, Box::new(callback));
    }

    // ========================================================================
    // Broker subscription
    // ========================================================================

    /// Connects to the broker and subscribes to this server's channel.
    /// Does not return until a successful subscription has been observed;
    /// the returned handle owns the subscription for its remaining
    /// lifetime.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, SdkError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(run_subscription(Arc::clone(self), ready_tx));

        tokio::select! {
            _ = self.shutdown.cancelled() => {
                Err(SdkError::Subscribe("shut down before the subscription was ready".into()))
            }
            result = ready_rx => match result {
                Ok(()) => Ok(handle),
                Err(_) => Err(SdkError::Subscribe("subscription task exited before ready".into())),
            }
        }
    }

    fn channel(&self) -> String {
        format!("server#{}", self.server_id)
    }

    /// One connect-subscribe-read cycle. Returns `Ok` when the connection
    /// ends cleanly (the caller decides whether to reconnect) and `Err` on
    /// any connect or subscribe failure.
    async fn subscribe_once(&self, ready: &mut Option<oneshot::Sender<()>>) -> Result<(), String> {
        let (stream, _) = tokio_tungstenite::connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| format!("error connecting to broker at {}: {e}", self.ws_url))?;
        let (mut write, mut read) = stream.split();

        let request = serde_json::json!({ "method": "subscribe", "channel": self.channel() });
        write
            .send(Message::Text(request.to_string()))
            .await
            .map_err(|e| format!("error sending subscribe request: {e}"))?;

        // Wait for the acknowledgement before reporting readiness.
        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                frame = read.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    let value: serde_json::Value = serde_json::from_str(&text)
                        .map_err(|e| format!("error decoding subscribe reply: {e}"))?;
                    if value.get("result").and_then(|v| v.as_str()) == Some("subscribed") {
                        break;
                    }
                    return Err(format!("broker rejected subscription: {text}"));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(format!("error reading subscribe reply: {e}")),
                None => return Err("broker closed the connection before subscribing".into()),
            }
        }

        info!(channel = %self.channel(), "subscribed to local proxy events");
        if let Some(tx) = ready.take() {
            let _ = tx.send(());
        }

        // Publication loop.
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("broker connection closed");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(format!("error reading from broker: {e}")),
                },
            }
        }
    }

    /// Decodes one publication frame and triggers the callback registered
    /// for its kind, if any.
    fn dispatch(&self, text: &str) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                self.events
                    .push_error(SdkError::Subscribe(format!("error decoding event: {e}")));
                return;
            }
        };

        // Publications may arrive wrapped in a channel envelope.
        let payload = match value.get("data") {
            Some(data) => data.clone(),
            None => value,
        };

        match Event::from_value(payload) {
            Ok(event) => {
                if let Some(callback) = self.callbacks.read().get(&event.kind) {
                    callback(event);
                }
            }
            Err(e) => {
                self.events
                    .push_error(SdkError::Subscribe(format!("error decoding event: {e}")));
            }
        }
    }

    // ========================================================================
    // REST surface
    // ========================================================================

    /// Reserves this server instance. Only applicable for reservation-based
    /// fleets.
    pub async fn reserve_self(&self, args: &ReserveRequest) -> Result<ReserveResponse, SdkError> {
        let request_id = Uuid::new_v4().to_string();
        let resp = self
            .http
            .post(format!(
                "{}/v1/servers/{}/reservations",
                self.host, self.server_id
            ))
            .header("X-Request-ID", &request_id)
            .json(args)
            .send()
            .await?;

        let resp = Self::expect_status(resp, reqwest::StatusCode::OK, &request_id).await?;
        Ok(resp.json().await?)
    }

    /// Unreserves this server instance, making it available for use.
    pub async fn unreserve_self(&self) -> Result<(), SdkError> {
        let request_id = Uuid::new_v4().to_string();
        let resp = self
            .http
            .delete(format!(
                "{}/v1/servers/{}/reservations",
                self.host, self.server_id
            ))
            .header("X-Request-ID", &request_id)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body("{}")
            .send()
            .await?;

        Self::expect_status(resp, reqwest::StatusCode::NO_CONTENT, &request_id).await?;
        Ok(())
    }

    /// Holds this server, preventing descaling until the hold expires or is
    /// released.
    pub async fn hold_self(&self, args: &HoldRequest) -> Result<HoldStatus, SdkError> {
        let request_id = Uuid::new_v4().to_string();
        let resp = self
            .http
            .post(format!("{}/v1/servers/{}/hold", self.host, self.server_id))
            .header("X-Request-ID", &request_id)
            .json(args)
            .send()
            .await?;

        let resp = Self::expect_status(resp, reqwest::StatusCode::OK, &request_id).await?;
        Ok(resp.json().await?)
    }

    /// Fetches the status of the hold for this server.
    pub async fn hold_status(&self) -> Result<HoldStatus, SdkError> {
        let request_id = Uuid::new_v4().to_string();
        let resp = self
            .http
            .get(format!("{}/v1/servers/{}/hold", self.host, self.server_id))
            .header("X-Request-ID", &request_id)
            .send()
            .await?;

        let resp = Self::expect_status(resp, reqwest::StatusCode::OK, &request_id).await?;
        Ok(resp.json().await?)
    }

    /// Releases any existing hold for this server.
    pub async fn release_self(&self) -> Result<(), SdkError> {
        let request_id = Uuid::new_v4().to_string();
        let resp = self
            .http
            .delete(format!("{}/v1/servers/{}/hold", self.host, self.server_id))
            .header("X-Request-ID", &request_id)
            .send()
            .await?;

        Self::expect_status(resp, reqwest::StatusCode::NO_CONTENT, &request_id).await?;
        Ok(())
    }

    /// Patches this server's allocation.
    pub async fn patch_allocation(
        &self,
        allocation_id: &str,
        args: &PatchAllocationRequest,
    ) -> Result<(), SdkError> {
        let request_id = Uuid::new_v4().to_string();
        let resp = self
            .http
            .patch(format!(
                "{}/v1/servers/{}/allocations/{}",
                self.host, self.server_id, allocation_id
            ))
            .header("X-Request-ID", &request_id)
            .json(args)
            .send()
            .await?;

        Self::expect_status(resp, reqwest::StatusCode::NO_CONTENT, &request_id).await?;
        Ok(())
    }

    async fn expect_status(
        resp: reqwest::Response,
        expected: reqwest::StatusCode,
        request_id: &str,
    ) -> Result<reqwest::Response, SdkError> {
        let status = resp.status();
        if status == expected {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(SdkError::UnexpectedResponse {
            request_id: request_id.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

/// Long-lived subscription loop: resubscribes one second after any failure
/// until shut down, surfacing each failure on the error channel.
async fn run_subscription(client: Arc<Client>, ready_tx: oneshot::Sender<()>) {
    let mut ready = Some(ready_tx);

    while !client.shutdown.is_cancelled() {
        if let Err(e) = client.subscribe_once(&mut ready).await {
            warn!(error = %e, "local proxy subscription failed");
            client.events.push_error(SdkError::Subscribe(e));
        }

        // The proxy may not know about this server yet; pause before
        // resubscribing.
        tokio::select! {
            _ = client.shutdown.cancelled() => break,
            _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
        }
    }
}
