//! Process-wide session counters.
//!
//! [`SessionStats`] is created once at process start and shared by every
//! session through an `Arc`. It is never reset per session: the session id
//! generator and the connection counters only make sense across the whole
//! process lifetime.
//!
//! # Examples
//!
//! ```rust
//! use queue_session::stats::SessionStats;
//! use std::sync::Arc;
//!
//! let stats = Arc::new(SessionStats::new());
//! let id = stats.connection_opened();
//! assert_eq!(id, 1);
//!
//! stats.record_get(true);
//! let snapshot = stats.snapshot();
//! assert_eq!(snapshot.current_connections, 1);
//! assert_eq!(snapshot.get_hits, 1);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;

/// Shared counter service injected into every session.
#[derive(Debug, Default)]
pub struct SessionStats {
    last_session_id: AtomicU64,
    total_connections: AtomicU64,
    current_connections: AtomicU64,
    cmd_get: AtomicU64,
    cmd_peek: AtomicU64,
    cmd_set: AtomicU64,
    get_hits: AtomicU64,
    get_misses: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub total_connections: u64,
    pub current_connections: u64,
    pub cmd_get: u64,
    pub cmd_peek: u64,
    pub cmd_set: u64,
    pub get_hits: u64,
    pub get_misses: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and allocate its session id.
    ///
    /// Ids start at 1 and increase monotonically for the process lifetime.
    pub fn connection_opened(&self) -> u64 {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.current_connections.fetch_add(1, Ordering::Relaxed);
        self.last_session_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a finished connection.
    pub fn connection_closed(&self) {
        // Saturate rather than wrap if a caller closes more than it opened.
        let _ = self
            .current_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_sub(1)
            });
    }

    /// Count a get command and whether it produced an item.
    pub fn record_get(&self, hit: bool) {
        self.cmd_get.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.get_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.get_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_peek(&self) {
        self.cmd_peek.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.cmd_set.fetch_add(1, Ordering::Relaxed);
    }

    pub fn current_connections(&self) -> u64 {
        self.current_connections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            current_connections: self.current_connections.load(Ordering::Relaxed),
            cmd_get: self.cmd_get.load(Ordering::Relaxed),
            cmd_peek: self.cmd_peek.load(Ordering::Relaxed),
            cmd_set: self.cmd_set.load(Ordering::Relaxed),
            get_hits: self.get_hits.load(Ordering::Relaxed),
            get_misses: self.get_misses.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Render as a JSON object, for stats dumps
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
