//! A2S query responder
//!
//! A2S uses little-endian integers and NUL-terminated strings. Only the
//! `A2S_INFO` request is served. A request without a challenge (or with a
//! zero challenge) receives an `S2C_CHALLENGE` reply; the client retries
//! with the challenge appended and receives the info payload.

use std::sync::Arc;

use bytes::BufMut;

use super::{ChallengeTable, QueryError, QueryResponder, QueryState};

const A2S_INFO_REQUEST: [u8; 5] = [0xFF, 0xFF, 0xFF, 0xFF, 0x54];
const A2S_INFO_RESPONSE: [u8; 5] = [0xFF, 0xFF, 0xFF, 0xFF, 0x49];
const S2C_CHALLENGE_RESPONSE: [u8; 5] = [0xFF, 0xFF, 0xFF, 0xFF, 0x41];

/// Responder capable of answering A2S-formatted queries.
pub struct A2sResponder {
    challenges: ChallengeTable,
    state: Arc<QueryState>,
}

struct InfoRequest {
    challenge: u32,
}

impl A2sResponder {
    pub fn new(state: Arc<QueryState>) -> Self {
        Self {
            challenges: ChallengeTable::new(),
            state,
        }
    }

    fn handle_info_request(&self, client_addr: &str, buf: &[u8]) -> Result<Vec<u8>, QueryError> {
        let request = parse_info_request(buf)?;

        // No challenge supplied yet: issue one and expect it on the retry.
        if request.challenge == 0 {
            let challenge = self.challenges.generate(client_addr);
            let mut resp = Vec::with_capacity(9);
            resp.put_slice(&S2C_CHALLENGE_RESPONSE);
            resp.put_u32_le(challenge);
            return Ok(resp);
        }

        self.challenges.consume(client_addr, request.challenge)?;

        let snapshot = self.state.snapshot();
        let mut resp = Vec::new();
        resp.put_slice(&A2S_INFO_RESPONSE);
        resp.put_u8(1); // protocol
        put_cstring(&mut resp, &snapshot.server_name);
        put_cstring(&mut resp, &snapshot.game_map);
        put_cstring(&mut resp, "n/a"); // game folder
        put_cstring(&mut resp, &snapshot.game_type);
        resp.put_i16_le(0); // steam app ID
        resp.put_u8(snapshot.current_players as u8);
        resp.put_u8(snapshot.max_players as u8);
        resp.put_u8(0); // bots
        resp.put_u8(b'd'); // dedicated server
        resp.put_u8(host_environment());
        resp.put_u8(0); // visibility
        resp.put_u8(0); // VAC
        Ok(resp)
    }
}

impl QueryResponder for A2sResponder {
    fn respond(&self, client_addr: &str, buf: &[u8]) -> Result<Vec<u8>, QueryError> {
        if buf.len() >= 5 && buf[..5] == A2S_INFO_REQUEST {
            self.handle_info_request(client_addr, buf)
        } else {
            let header = buf.iter().copied().take(5).collect();
            Err(QueryError::UnsupportedQuery(header))
        }
    }
}

/// Parses the optional NUL-terminated payload and the optional trailing
/// challenge of an `A2S_INFO` request. The payload itself is ignored.
fn parse_info_request(buf: &[u8]) -> Result<InfoRequest, QueryError> {
    let mut idx = 5;
    while idx < buf.len() && buf[idx] != 0 {
        idx += 1;
    }

    // Skip the terminator; anything left is the challenge.
    idx += 1;
    let challenge = match buf.len().checked_sub(idx) {
        None | Some(0) => 0,
        Some(n) if n >= 4 => u32::from_le_bytes([buf[idx], buf[idx + 1], buf[idx + 2], buf[idx + 3]]),
        Some(_) => return Err(QueryError::InvalidPacketLength),
    };

    Ok(InfoRequest { challenge })
}

fn put_cstring(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.put_u8(0);
}

/// Environment byte reported in the info response, derived from the host
/// operating system.
fn host_environment() -> u8 {
    if cfg!(target_os = "macos") {
        b'm'
    } else if cfg!(target_os = "windows") {
        b'w'
    } else {
        b'l'
    }
}
