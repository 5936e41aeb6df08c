//! Game-server-side SDK for the managed hosting platform
//!
//! A game server embeds this SDK to participate in the platform's
//! allocation lifecycle. The SDK:
//!
//! - answers monitoring queries over UDP in the SQP or A2S wire protocol,
//!   with a challenge/response scheme guarding against reflected traffic;
//! - watches the platform-maintained configuration document and subscribes
//!   to the machine-local pub/sub broker, surfacing allocate / deallocate /
//!   configuration-changed events to the embedder;
//! - optionally keeps the matchmaker backfill ticket alive while an
//!   allocation is active.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use hosting_sdk::{Server, ServerType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), hosting_sdk::SdkError> {
//!     let server = Server::new(ServerType::Allocation);
//!
//!     // Take the receivers before starting: the server can start in an
//!     // allocated state.
//!     let mut allocated = server.take_allocate_receiver().unwrap();
//!     tokio::spawn(async move {
//!         while let Some(allocation_id) = allocated.recv().await {
//!             println!("allocated: {allocation_id}");
//!         }
//!     });
//!
//!     server.start().await?;
//!     server.set_max_players(16);
//!     server.wait_until_terminated().await
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Your game server                     │
//! ├──────────────────────────────────────────────────────────┤
//! │                       Hosting SDK                        │
//! │  ┌───────────┐  ┌──────────────┐  ┌───────────────────┐  │
//! │  │  Query    │  │  Allocation  │  │  Backfill         │  │
//! │  │  endpoint │  │  lifecycle   │  │  keep-alive       │  │
//! │  │ (SQP/A2S) │  │ (watch + ws) │  │ (token + approve) │  │
//! │  └───────────┘  └──────────────┘  └───────────────────┘  │
//! ├──────────────────────────────────────────────────────────┤
//! │   discovery clients · local proxy · matchmaker service   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Event delivery is intentionally lossy: every event channel holds one
//! entry, and an undrained consumer drops newer events of that kind rather
//! than stalling the SDK's internal loops.

mod backfill;
mod config;
mod error;
mod events;
mod localproxy;
pub mod model;
mod query;
mod server;
mod watcher;

pub use config::{
    Config, NumericString, QueryProtocol, DEFAULT_LOCAL_PROXY_URL, DEFAULT_MATCHMAKER_URL,
};
pub use error::{Result, SdkError};
pub use localproxy::{Event, EventKind};
pub use query::{A2sResponder, QueryError, QueryResponder, QueryState, SqpResponder, MAX_METRICS};
pub use server::{
    Server, ServerOptions, ServerType, DEFAULT_READ_BUFFER_BYTES, DEFAULT_READ_DEADLINE,
    DEFAULT_WRITE_BUFFER_BYTES, DEFAULT_WRITE_DEADLINE,
};
