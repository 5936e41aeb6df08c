//! Shared query state sampled by the responders

use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;

/// Game state applicable to an incoming query, for example the current
/// player count or the map name.
///
/// All mutations are serialized under a single mutex. The current player
/// count is additionally mirrored in an atomic so responder encoding can
/// sample it without taking the lock.
#[derive(Debug, Default)]
pub struct QueryState {
    current_players: AtomicI32,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    server_name: String,
    game_type: String,
    game_map: String,
    max_players: i32,
    port: u16,
    metrics: Vec<f32>,
}

/// A point-in-time copy of [`QueryState`] handed to the wire encoders.
#[derive(Clone, Debug, Default)]
pub(crate) struct StateSnapshot {
    pub current_players: i32,
    pub max_players: i32,
    pub server_name: String,
    pub game_type: String,
    pub game_map: String,
    pub port: u16,
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_server_name(&self, name: impl Into<String>) {
        self.inner.lock().server_name = name.into();
    }

    pub fn set_game_type(&self, game_type: impl Into<String>) {
        self.inner.lock().game_type = game_type.into();
    }

    pub fn set_game_map(&self, game_map: impl Into<String>) {
        self.inner.lock().game_map = game_map.into();
    }

    pub fn set_max_players(&self, max: i32) {
        self.inner.lock().max_players = max;
    }

    pub fn set_port(&self, port: u16) {
        self.inner.lock().port = port;
    }

    /// Records a player joining and returns the new count.
    pub fn player_joined(&self) -> i32 {
        let _guard = self.inner.lock();
        let n = self.current_players.load(Ordering::SeqCst) + 1;
        self.current_players.store(n, Ordering::SeqCst);
        n
    }

    /// Records a player leaving and returns the new count. The count never
    /// goes below zero.
    pub fn player_left(&self) -> i32 {
        let _guard = self.inner.lock();
        let mut n = self.current_players.load(Ordering::SeqCst);
        if n > 0 {
            n -= 1;
            self.current_players.store(n, Ordering::SeqCst);
        }
        n
    }

    /// Sets the player count directly, as an alternative to
    /// [`player_joined`](Self::player_joined) /
    /// [`player_left`](Self::player_left). Negative values clamp to zero.
    pub fn set_current_players(&self, players: i32) {
        let _guard = self.inner.lock();
        self.current_players.store(players.max(0), Ordering::SeqCst);
    }

    pub fn current_players(&self) -> i32 {
        self.current_players.load(Ordering::SeqCst)
    }

    /// Writes `value` at `index`, zero-extending the metrics buffer when the
    /// index is past its current length. Bounds are checked by the caller.
    pub(crate) fn write_metric(&self, index: usize, value: f32) {
        let mut inner = self.inner.lock();
        if index >= inner.metrics.len() {
            inner.metrics.resize(index + 1, 0.0);
        }
        inner.metrics[index] = value;
    }

    pub(crate) fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock();
        StateSnapshot {
            current_players: self.current_players.load(Ordering::SeqCst),
            max_players: inner.max_players,
            server_name: inner.server_name.clone(),
            game_type: inner.game_type.clone(),
            game_map: inner.game_map.clone(),
            port: inner.port,
        }
    }

    #[cfg(test)]
    fn metrics(&self) -> Vec<f32> {
        self.inner.lock().metrics.clone()
    }
}
