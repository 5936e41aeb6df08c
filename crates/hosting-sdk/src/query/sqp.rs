//! SQP query responder
//!
//! The SQP wire format uses big-endian integers and length-prefixed UTF-8
//! strings (a single length byte, no terminator). A client first sends a
//! challenge packet of five zero bytes, then echoes the issued challenge in
//! a query packet selecting the chunks it wants.

use std::sync::Arc;

use bytes::BufMut;

use super::state::StateSnapshot;
use super::{ChallengeTable, QueryError, QueryResponder, QueryState};

/// Maximum number of metrics the metrics buffer supports.
pub const MAX_METRICS: usize = 10;

/// The SQP version this responder speaks.
const SQP_VERSION: u16 = 1;

/// Requested-chunk bit selecting the server-info block. Bit 4 requests the
/// metrics block, which version 1 does not carry; it is silently omitted.
const CHUNK_SERVER_INFO: u8 = 0x01;

/// Responder capable of answering SQP-formatted queries.
pub struct SqpResponder {
    challenges: ChallengeTable,
    state: Arc<QueryState>,
}

impl SqpResponder {
    pub fn new(state: Arc<QueryState>) -> Self {
        Self {
            challenges: ChallengeTable::new(),
            state,
        }
    }

    fn handle_challenge(&self, client_addr: &str) -> Result<Vec<u8>, QueryError> {
        let challenge = self.challenges.generate(client_addr);

        let mut resp = Vec::with_capacity(5);
        resp.put_u8(0);
        resp.put_u32(challenge);
        Ok(resp)
    }

    fn handle_query(&self, client_addr: &str, buf: &[u8]) -> Result<Vec<u8>, QueryError> {
        if buf.len() < 8 {
            return Err(QueryError::InvalidPacketLength);
        }

        let supplied = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        self.challenges.consume(client_addr, supplied)?;

        let version = u16::from_be_bytes([buf[5], buf[6]]);
        if version != SQP_VERSION {
            return Err(QueryError::UnsupportedVersion(version));
        }

        let requested = buf[7];
        let snapshot = self.state.snapshot();

        let mut chunks = Vec::new();
        if requested & CHUNK_SERVER_INFO != 0 {
            let info = encode_server_info(&snapshot);
            chunks.put_u32(info.len() as u32);
            chunks.extend_from_slice(&info);
        }

        let mut resp = Vec::with_capacity(11 + chunks.len());
        resp.put_u8(1);
        resp.put_u32(supplied);
        resp.put_u16(SQP_VERSION);
        resp.put_u8(0); // current packet number
        resp.put_u8(0); // last packet number
        resp.put_u16(chunks.len() as u16);
        resp.extend_from_slice(&chunks);
        Ok(resp)
    }
}

impl QueryResponder for SqpResponder {
    fn respond(&self, client_addr: &str, buf: &[u8]) -> Result<Vec<u8>, QueryError> {
        if is_challenge(buf) {
            self.handle_challenge(client_addr)
        } else if is_query(buf) {
            self.handle_query(client_addr, buf)
        } else {
            let header = buf.iter().copied().take(5).collect();
            Err(QueryError::UnsupportedQuery(header))
        }
    }
}

fn is_challenge(buf: &[u8]) -> bool {
    buf.len() >= 5 && buf[..5] == [0, 0, 0, 0, 0]
}

fn is_query(buf: &[u8]) -> bool {
    buf.first() == Some(&1)
}

/// Server-info chunk: players, limits, identification strings and the game
/// port.
fn encode_server_info(snapshot: &StateSnapshot) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_u16(snapshot.current_players as u16);
    out.put_u16(snapshot.max_players as u16);
    put_string(&mut out, &snapshot.server_name);
    put_string(&mut out, &snapshot.game_type);
    put_string(&mut out, ""); // build ID, not exposed through the state
    put_string(&mut out, &snapshot.game_map);
    out.put_u16(snapshot.port);
    out
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    let bytes = &s.as_bytes()[..s.len().min(u8::MAX as usize)];
    out.put_u8(bytes.len() as u8);
    out.extend_from_slice(bytes);
}
