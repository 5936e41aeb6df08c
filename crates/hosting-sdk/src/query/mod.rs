//! UDP query protocols
//!
//! The platform's discovery clients probe game servers over UDP with one of
//! two binary protocols, SQP or A2S. Both share a challenge/response scheme
//! that ties a query to the address it was issued to, mitigating reflected
//! UDP attacks: a client first requests a nonce, then echoes it in the
//! actual query.

mod a2s;
mod bind;
mod challenge;
mod endpoint;
mod sqp;
mod state;

pub use a2s::A2sResponder;
pub use sqp::{SqpResponder, MAX_METRICS};
pub use state::QueryState;

pub(crate) use bind::{BindError, UdpBinding};
pub(crate) use challenge::ChallengeTable;
pub(crate) use endpoint::QueryEndpoint;

use thiserror::Error;

/// Errors produced while decoding or answering a query packet. These are
/// per-packet failures: the endpoint reports them and keeps serving.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("unsupported query: {0:02x?}")]
    UnsupportedQuery(Vec<u8>),

    #[error("invalid packet length")]
    InvalidPacketLength,

    #[error("unsupported sqp version: {0}")]
    UnsupportedVersion(u16),

    #[error("no challenge")]
    NoChallenge,

    #[error("challenge mismatch")]
    ChallengeMismatch,
}

/// A responder capable of answering one query wire format.
///
/// `respond` consumes a single decoded datagram from `client_addr` (textual
/// `host:port`) and produces the bytes to send back.
pub trait QueryResponder: Send + Sync {
    fn respond(&self, client_addr: &str, buf: &[u8]) -> Result<Vec<u8>, QueryError>;
}
