//! Error types for the hosting SDK

use thiserror::Error;

use crate::query::QueryError;

/// Result type for SDK operations
pub type Result<T> = std::result::Result<T, SdkError>;

/// SDK errors
///
/// Errors raised during [`Server::start`](crate::Server::start) abort
/// initialization and are returned directly. Everything that happens after
/// startup is asynchronous and surfaced on the error channel instead, where
/// delivery is lossy when the consumer has not drained the previous entry.
#[derive(Debug, Error)]
pub enum SdkError {
    // ========== Configuration ==========
    #[error("error reading configuration: {0}")]
    ConfigRead(#[source] std::io::Error),

    #[error("error parsing configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("error creating log directory: {0}")]
    LogDir(#[source] std::io::Error),

    #[error("error parsing server ID: {0:?}")]
    InvalidServerId(String),

    #[error("invalid query port: {0:?}")]
    InvalidQueryPort(String),

    // ========== Query endpoint ==========
    #[error("supplied query type is not supported: {0:?}")]
    UnsupportedQueryType(String),

    #[error("error binding query endpoint: {0}")]
    QueryBind(#[source] std::io::Error),

    #[error("query: error reading from socket: {0}")]
    QueryRead(#[source] std::io::Error),

    #[error("query: error writing to socket: {0}")]
    QueryWrite(#[source] std::io::Error),

    #[error("query: error responding: {0}")]
    Query(#[from] QueryError),

    // ========== Lifecycle ==========
    #[error("error watching configuration file: {0}")]
    Watch(#[from] notify::Error),

    #[error("error subscribing to local proxy events: {0}")]
    Subscribe(String),

    #[error("error installing signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("server has not been started")]
    NotStarted,

    // ========== Query state ==========
    #[error("metrics are not supported for this query type")]
    MetricsUnsupported,

    #[error("metric index provided will overflow the metrics buffer")]
    MetricOutOfBounds,

    // ========== Local proxy ==========
    #[error("the operation requested is not applicable to the server type")]
    OperationNotApplicable,

    #[error("unexpected response from local proxy, request ID: {request_id}, status: {status}, error: {body}")]
    UnexpectedResponse {
        request_id: String,
        status: u16,
        body: String,
    },

    #[error("error making request: {0}")]
    Http(#[from] reqwest::Error),

    // ========== Matchmaker backfill ==========
    #[error("failed to retrieve JWT token")]
    TokenFetch,

    #[error("failed to approve backfill ticket")]
    BackfillApprove,

    #[error("matchmaker rate limited the backfill approval, will retry")]
    BackfillRetry,

    #[error("server is not allocated")]
    NotAllocated,
}
