//! SDK facade: server lifecycle, event channels and query state surface

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backfill;
use crate::config::{Config, QueryProtocol};
use crate::error::SdkError;
use crate::events::EventChannels;
use crate::localproxy::{self, EventKind};
use crate::model::{
    HoldRequest, HoldStatus, PatchAllocationRequest, ReserveRequest, ReserveResponse,
};
use crate::query::{
    A2sResponder, QueryEndpoint, QueryResponder, QueryState, SqpResponder, UdpBinding, MAX_METRICS,
};
use crate::watcher;

/// Default size of the query socket's write buffer.
pub const DEFAULT_WRITE_BUFFER_BYTES: usize = 1024;

/// Default size of the query socket's read buffer.
pub const DEFAULT_READ_BUFFER_BYTES: usize = 1024;

/// Default write deadline for responding to a query request.
pub const DEFAULT_WRITE_DEADLINE: Duration = Duration::from_secs(1);

/// Default read deadline for consuming a query request.
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(3);

/// The usage model of the server: allocated on demand by the platform, or
/// explicitly reserved ahead of time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerType {
    Allocation,
    Reservation,
}

/// Tunables applied when the server is constructed.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Path of the configuration document the platform maintains.
    pub config_path: PathBuf,
    /// Read buffer size for the query socket.
    pub query_read_buffer_bytes: usize,
    /// Write buffer size for the query socket.
    pub query_write_buffer_bytes: usize,
    /// Deadline for consuming one query request.
    pub query_read_deadline: Duration,
    /// Deadline for writing one query response.
    pub query_write_deadline: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            config_path: home.join("server.json"),
            query_read_buffer_bytes: DEFAULT_READ_BUFFER_BYTES,
            query_write_buffer_bytes: DEFAULT_WRITE_BUFFER_BYTES,
            query_read_deadline: DEFAULT_READ_DEADLINE,
            query_write_deadline: DEFAULT_WRITE_DEADLINE,
        }
    }
}

/// An instance of a game server embedded in the hosting platform: answers
/// query requests, tracks the allocation lifecycle, and surfaces events to
/// the embedding application.
///
/// The server is cheaply cloneable; clones share all state. As the server
/// can start in an allocated state, take the allocation receivers and start
/// consuming them before calling [`start`](Self::start).
#[derive(Clone)]
pub struct Server {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) server_type: ServerType,
    pub(crate) options: ServerOptions,
    pub(crate) state: Arc<QueryState>,
    pub(crate) events: Arc<EventChannels>,
    pub(crate) current_config: Arc<RwLock<Config>>,
    pub(crate) endpoint: tokio::sync::Mutex<Option<QueryEndpoint>>,
    pub(crate) local_proxy: RwLock<Option<Arc<localproxy::Client>>>,
    pub(crate) allocation_id: Mutex<String>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Creates a new server of the given type with default options.
    pub fn new(server_type: ServerType) -> Self {
        Self::with_options(server_type, ServerOptions::default())
    }

    pub fn with_options(server_type: ServerType, options: ServerOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                server_type,
                options,
                state: Arc::new(QueryState::new()),
                events: Arc::new(EventChannels::new()),
                current_config: Arc::new(RwLock::new(Config::default())),
                endpoint: tokio::sync::Mutex::new(None),
                local_proxy: RwLock::new(None),
                allocation_id: Mutex::new(String::new()),
                shutdown: CancellationToken::new(),
                tasks: tokio::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts the server: loads the initial configuration, opens the query
    /// endpoint, and spawns the configuration watcher, the allocation
    /// subscriber and (when enabled) the backfill keep-alive. Returns once
    /// the watcher and the subscriber have both signalled readiness.
    pub async fn start(&self) -> Result<(), SdkError> {
        let config = Config::from_file(&self.inner.options.config_path)?;

        // The platform collects log files from this directory.
        tokio::fs::create_dir_all(&config.server_log_dir)
            .await
            .map_err(SdkError::LogDir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(
                &config.server_log_dir,
                std::fs::Permissions::from_mode(0o744),
            )
            .await
            .map_err(SdkError::LogDir)?;
        }

        self.set_config(config.clone());

        // Defaults for the query endpoint; the embedder can overwrite them
        // at any point.
        self.set_server_name(format!("hosting-sdk-server - {}", config.server_id));
        self.set_game_map("hosting-sdk-map");
        self.inner
            .state
            .set_port(config.port.as_u16().unwrap_or_default());

        self.switch_query_protocol(&config).await?;

        // Configuration watcher.
        let (watcher_ready_tx, watcher_ready_rx) = oneshot::channel();
        let watcher_task = tokio::spawn(watcher::run(self.clone(), watcher_ready_tx));
        self.inner.tasks.lock().await.push(watcher_task);

        // Allocation subscriber.
        let server_id = config
            .server_id
            .as_i64()
            .ok_or_else(|| SdkError::InvalidServerId(config.server_id.to_string()))?;
        let proxy = Arc::new(localproxy::Client::new(
            &config,
            server_id,
            Arc::clone(&self.inner.events),
            self.inner.shutdown.child_token(),
        )?);

        if self.inner.server_type == ServerType::Allocation {
            let server = self.clone();
            proxy.register_callback(EventKind::Allocate, move |event| {
                *server.inner.allocation_id.lock() = event.allocation_id.clone();
                server.inner.events.push_allocated(event.allocation_id);
            });

            let server = self.clone();
            proxy.register_callback(EventKind::Deallocate, move |event| {
                *server.inner.allocation_id.lock() = event.allocation_id.clone();
                server.inner.events.push_deallocated(event.allocation_id);
            });
        }

        let subscription_task = proxy.start().await?;
        self.inner.tasks.lock().await.push(subscription_task);
        *self.inner.local_proxy.write() = Some(proxy);

        watcher_ready_rx
            .await
            .map_err(|_| SdkError::Watch(notify::Error::generic("config watcher exited early")))??;

        if config.backfill_enabled() {
            let task = tokio::spawn(backfill::run(
                Arc::clone(&self.inner.current_config),
                Arc::clone(&self.inner.events),
                self.inner.shutdown.child_token(),
            ));
            self.inner.tasks.lock().await.push(task);
        }

        info!(server_id = %config.server_id, query_type = %config.query_type, "server started");
        Ok(())
    }

    /// Stops the server: closes the query binding, signals termination to
    /// every task, waits for them to finish, and pushes one final empty
    /// deallocation event. Safe to call more than once.
    pub async fn stop(&self) -> Result<(), SdkError> {
        // Closing the binding first lets the reader exit without pushing
        // spurious errors.
        if let Some(endpoint) = self.inner.endpoint.lock().await.take() {
            endpoint.shutdown().await;
        }

        self.inner.shutdown.cancel();

        let tasks: Vec<_> = self.inner.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        self.inner.events.push_deallocated(String::new());
        info!("server stopped");
        Ok(())
    }

    /// Blocks until the process receives `SIGINT` or `SIGTERM`, then stops
    /// the server. The platform's process manager sends `SIGTERM` for a
    /// graceful stop.
    pub async fn wait_until_terminated(&self) -> Result<(), SdkError> {
        #[cfg(unix)]
        {
            let mut terminate =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .map_err(SdkError::Signal)?;
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await.map_err(SdkError::Signal)?;

        self.stop().await
    }

    // ========================================================================
    // Event channels
    // ========================================================================

    /// Receiver for allocation events. Can be taken once.
    pub fn take_allocate_receiver(&self) -> Option<mpsc::Receiver<String>> {
        self.inner.events.take_allocated()
    }

    /// Receiver for deallocation events. Can be taken once.
    pub fn take_deallocate_receiver(&self) -> Option<mpsc::Receiver<String>> {
        self.inner.events.take_deallocated()
    }

    /// Receiver for configuration-change events. Can be taken once.
    pub fn take_configuration_receiver(&self) -> Option<mpsc::Receiver<Config>> {
        self.inner.events.take_config()
    }

    /// Receiver for asynchronous runtime errors. Can be taken once.
    pub fn take_error_receiver(&self) -> Option<mpsc::Receiver<SdkError>> {
        self.inner.events.take_errors()
    }

    // ========================================================================
    // Query state
    // ========================================================================

    /// Sets the server name for query purposes.
    pub fn set_server_name(&self, name: impl Into<String>) {
        self.inner.state.set_server_name(name);
    }

    /// Sets the game type for query purposes.
    pub fn set_game_type(&self, game_type: impl Into<String>) {
        self.inner.state.set_game_type(game_type);
    }

    /// Sets the game map for query purposes.
    pub fn set_game_map(&self, game_map: impl Into<String>) {
        self.inner.state.set_game_map(game_map);
    }

    /// Sets the maximum player count reported in queries. The SDK does not
    /// enforce the limit.
    pub fn set_max_players(&self, max: i32) {
        self.inner.state.set_max_players(max);
    }

    /// Records a player joining and returns the new count.
    pub fn player_joined(&self) -> i32 {
        self.inner.state.player_joined()
    }

    /// Records a player leaving and returns the new count.
    pub fn player_left(&self) -> i32 {
        self.inner.state.player_left()
    }

    /// Sets the player count directly. Negative values clamp to zero.
    pub fn set_current_players(&self, players: i32) {
        self.inner.state.set_current_players(players);
    }

    /// Sets the metric at `index`, growing the metrics buffer as needed.
    /// Metrics are only carried by the SQP protocol; at most
    /// [`MAX_METRICS`] values are supported.
    pub fn set_metric(&self, index: usize, value: f32) -> Result<(), SdkError> {
        if self.config().query_type != QueryProtocol::Sqp {
            return Err(SdkError::MetricsUnsupported);
        }
        if index >= MAX_METRICS {
            return Err(SdkError::MetricOutOfBounds);
        }

        self.inner.state.write_metric(index, value);
        Ok(())
    }

    /// Returns a copy of the configuration the server is currently using.
    pub fn config(&self) -> Config {
        self.inner.current_config.read().clone()
    }

    // ========================================================================
    // Local proxy operations
    // ========================================================================

    /// Reserves this server for use. Only applicable to reservation-based
    /// fleets.
    pub async fn reserve(&self, args: &ReserveRequest) -> Result<ReserveResponse, SdkError> {
        if self.inner.server_type != ServerType::Reservation {
            return Err(SdkError::OperationNotApplicable);
        }
        self.local_proxy()?.reserve_self(args).await
    }

    /// Unreserves this server, making it available for use. Only applicable
    /// to reservation-based fleets.
    pub async fn unreserve(&self) -> Result<(), SdkError> {
        if self.inner.server_type != ServerType::Reservation {
            return Err(SdkError::OperationNotApplicable);
        }
        self.local_proxy()?.unreserve_self().await
    }

    /// Holds this server, preventing descaling until the hold expires or is
    /// released.
    pub async fn hold(&self, args: &HoldRequest) -> Result<HoldStatus, SdkError> {
        self.local_proxy()?.hold_self(args).await
    }

    /// Gets the status of the hold for this server.
    pub async fn hold_status(&self) -> Result<HoldStatus, SdkError> {
        self.local_proxy()?.hold_status().await
    }

    /// Releases any existing hold for this server.
    pub async fn release(&self) -> Result<(), SdkError> {
        self.local_proxy()?.release_self().await
    }

    /// Indicates the server is ready for players to join.
    pub async fn ready_for_players(&self) -> Result<(), SdkError> {
        let allocation_id = self.config().allocated_uuid;
        self.local_proxy()?
            .patch_allocation(&allocation_id, &PatchAllocationRequest { ready: true })
            .await
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn local_proxy(&self) -> Result<Arc<localproxy::Client>, SdkError> {
        self.inner
            .local_proxy
            .read()
            .clone()
            .ok_or(SdkError::NotStarted)
    }

    /// Replaces the configuration snapshot and notifies the consumer.
    pub(crate) fn set_config(&self, config: Config) {
        *self.inner.current_config.write() = config.clone();
        self.inner.events.push_config(config);
    }

    /// Selects the responder for the configured query protocol and
    /// (re)starts the endpoint on the configured port. The previous binding
    /// is closed before the new one is opened.
    pub(crate) async fn switch_query_protocol(&self, config: &Config) -> Result<(), SdkError> {
        let responder: Arc<dyn QueryResponder> = match &config.query_type {
            QueryProtocol::Sqp => Arc::new(SqpResponder::new(Arc::clone(&self.inner.state))),
            QueryProtocol::A2s => Arc::new(A2sResponder::new(Arc::clone(&self.inner.state))),
            QueryProtocol::Other(other) => {
                return Err(SdkError::UnsupportedQueryType(other.clone()))
            }
        };

        let port = config
            .query_port
            .as_u16()
            .ok_or_else(|| SdkError::InvalidQueryPort(config.query_port.to_string()))?;

        let mut endpoint = self.inner.endpoint.lock().await;
        if let Some(previous) = endpoint.take() {
            previous.shutdown().await;
        }

        let options = &self.inner.options;
        let binding = UdpBinding::bind(
            port,
            options.query_read_buffer_bytes,
            options.query_write_buffer_bytes,
            options.query_read_deadline,
            options.query_write_deadline,
        )
        .await
        .map_err(SdkError::QueryBind)?;

        info!(%port, query_type = %config.query_type, "query endpoint listening");
        *endpoint = Some(QueryEndpoint::start(
            Arc::new(binding),
            responder,
            Arc::clone(&self.inner.events),
        ));
        Ok(())
    }

    /// The port the query endpoint is currently bound to. Mostly useful in
    /// tests, where the configured port is zero.
    pub async fn query_addr(&self) -> Option<std::net::SocketAddr> {
        self.inner
            .endpoint
            .lock()
            .await
            .as_ref()
            .and_then(|e| e.local_addr())
    }
}
