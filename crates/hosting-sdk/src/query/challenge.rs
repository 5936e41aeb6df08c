//! Challenge table shared by the query responders

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{RwLock, RwLockWriteGuard};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::trace;

use super::QueryError;

/// How long an issued challenge stays valid.
const CHALLENGE_TTL: Duration = Duration::from_secs(60);

/// Minimum time between sweeps of expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug)]
struct ChallengeEntry {
    value: u32,
    expires_at: Instant,
}

/// Maps client addresses to their outstanding challenge value.
///
/// A client holds at most one live entry; issuing a new challenge replaces
/// the previous one, and consuming is single-use. Expired entries are
/// removed by a sweep launched from the issue path, which runs as a
/// detached task so that issuers never wait on it.
pub(crate) struct ChallengeTable {
    entries: Arc<RwLock<HashMap<String, ChallengeEntry>>>,
    last_swept: RwLock<Instant>,
}

impl ChallengeTable {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            last_swept: RwLock::new(Instant::now()),
        }
    }

    /// Issues a new challenge for `client`, replacing any previous entry.
    /// The value is four cryptographically random bytes read big-endian.
    pub fn generate(&self, client: &str) -> u32 {
        // Schedule the sweep first so an issue failure can never starve
        // cleanup.
        self.maybe_sweep();

        let mut raw = [0u8; 4];
        OsRng.fill_bytes(&mut raw);
        let value = u32::from_be_bytes(raw);

        self.entries.write().insert(
            client.to_string(),
            ChallengeEntry {
                value,
                expires_at: Instant::now() + CHALLENGE_TTL,
            },
        );

        value
    }

    /// Atomically removes the entry for `client` and compares it against
    /// the supplied value. A consumed challenge cannot be used again.
    pub fn consume(&self, client: &str, supplied: u32) -> Result<(), QueryError> {
        match self.entries.write().remove(client) {
            None => Err(QueryError::NoChallenge),
            Some(entry) if entry.value != supplied => Err(QueryError::ChallengeMismatch),
            Some(_) => Ok(()),
        }
    }

    /// Launches an asynchronous sweep of expired entries when the last one
    /// is more than [`SWEEP_INTERVAL`] old.
    fn maybe_sweep(&self) {
        if self.last_swept.read().elapsed() <= SWEEP_INTERVAL {
            return;
        }

        let mut last_swept = self.last_swept.write();
        // Another generator may have won the upgrade race.
        if last_swept.elapsed() <= SWEEP_INTERVAL {
            return;
        }
        *last_swept = Instant::now();
        let _read = RwLockWriteGuard::downgrade(last_swept);

        let entries = Arc::clone(&self.entries);
        let epoch = Instant::now();
        tokio::spawn(async move {
            let mut entries = entries.write();
            let before = entries.len();
            entries.retain(|_, entry| entry.expires_at > epoch);
            trace!(removed = before - entries.len(), "swept stale challenges");
        });
    }

    #[cfg(test)]
    fn insert_expired(&self, client: &str, value: u32) {
        self.entries.write().insert(
            client.to_string(),
            ChallengeEntry {
                value,
                expires_at: Instant::now() - Duration::from_secs(1),
            },
        );
    }

    #[cfg(test)]
    fn mark_sweep_stale(&self) {
        *self.last_swept.write() = Instant::now() - SWEEP_INTERVAL - Duration::from_secs(1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().len()
    }
}
