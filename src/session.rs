//! Per-client session table.
//!
//! A single `HashMap` keyed by the client's transport address, guarded by
//! one coarse lock — session-table operations are O(1) and never block, so
//! there's no need to split the map or reach for per-session locks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::sync::Mutex;

/// A resource mid-transfer to one client.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    pub chunks: Vec<Vec<u8>>,
    pub cursor: usize,
    pub(crate) last_active: Instant,
}

impl SessionRecord {
    fn new(session_id: String, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            session_id,
            chunks,
            cursor: 0,
            last_active: Instant::now(),
        }
    }

    /// `true` once the cursor sits on the final chunk (the one tagged `DONE`).
    pub fn is_complete(&self) -> bool {
        self.cursor == self.chunks.len() - 1
    }

    /// The chunk at the current cursor. `chunks` is never empty and `cursor`
    /// never exceeds `chunks.len() - 1`, so this always has a value.
    pub fn current_chunk(&self) -> Option<&[u8]> {
        self.chunks.get(self.cursor).map(Vec::as_slice)
    }
}

/// Session records keyed by client `SocketAddr`, behind one mutex.
///
/// A new `GET` from an address that already holds a record replaces it
/// outright — no partial-session reuse.
#[derive(Debug, Default)]
pub struct SessionTable {
    inner: Mutex<HashMap<SocketAddr, SessionRecord>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Start (or restart) a session for `addr`.
    pub async fn insert_or_replace(&self, addr: SocketAddr, session_id: String, chunks: Vec<Vec<u8>>) {
        let mut table = self.inner.lock().await;
        table.insert(addr, SessionRecord::new(session_id, chunks));
    }

    /// A snapshot of the record for `addr`, if one exists.
    pub async fn get(&self, addr: SocketAddr) -> Option<SessionRecord> {
        self.inner.lock().await.get(&addr).cloned()
    }

    /// Advance `addr`'s cursor by one, capped at the last chunk index, if
    /// `addr` holds a record whose `session_id` matches. Returns the
    /// post-advance snapshot.
    pub async fn advance(&self, addr: SocketAddr, session_id: &str) -> Option<SessionRecord> {
        let mut table = self.inner.lock().await;
        let record = table.get_mut(&addr)?;
        if record.session_id != session_id {
            return None;
        }
        let last_index = record.chunks.len() - 1;
        record.cursor = (record.cursor + 1).min(last_index);
        record.last_active = Instant::now();
        Some(record.clone())
    }

    /// Remove and return the record for `addr`, if any.
    pub async fn remove(&self, addr: SocketAddr) -> Option<SessionRecord> {
        self.inner.lock().await.remove(&addr)
    }

    /// Drop every record whose last activity is older than `idle_timeout`,
    /// returning the `(addr, session_id)` of each reaped record.
    ///
    /// A periodic sweep rather than per-datagram expiry checks, since
    /// sessions are short-lived and the table is already small.
    pub async fn reap_idle(&self, idle_timeout: std::time::Duration) -> Vec<(SocketAddr, String)> {
        let mut table = self.inner.lock().await;
        let now = Instant::now();
        let stale: Vec<SocketAddr> = table
            .iter()
            .filter(|(_, record)| now.duration_since(record.last_active) > idle_timeout)
            .map(|(addr, _)| *addr)
            .collect();
        stale
            .into_iter()
            .filter_map(|addr| table.remove(&addr).map(|record| (addr, record.session_id)))
            .collect()
    }

    /// Number of sessions currently tracked, for logging/diagnostics.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
