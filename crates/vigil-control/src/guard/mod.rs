//! Per-connection admission checks that run before an event reaches its
//! project: rate limiting, deduplication and sequence ordering.
//!
//! State is keyed by connection id, so a client id reused elsewhere never
//! shares it. It must be released when the connection closes so churn does
//! not grow it without bound.

mod dedup;
mod rate;
mod sequence;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use vigil_types::IngestConfig;

pub use dedup::DedupCache;
pub use rate::{RateLimitError, WindowCounter};
pub use sequence::{SequenceCheck, SequenceTracker};

/// What to do with a submitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Already accepted within the dedup TTL; acknowledge as duplicate.
    Duplicate,
    /// Sequence number not above the last accepted; acknowledge as no-op.
    Stale { expected: u64 },
    /// Process it. `gap` is the number of skipped sequence numbers.
    Accept { gap: u64 },
}

#[derive(Debug)]
struct ConnectionGuard {
    dedup: DedupCache,
    sequence: SequenceTracker,
    rate: WindowCounter,
}

#[derive(Debug)]
pub struct IngestionGuard {
    connections: Mutex<HashMap<Uuid, ConnectionGuard>>,
    dedup_capacity: usize,
    dedup_ttl: Duration,
    messages_per_second: u32,
}

impl IngestionGuard {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            dedup_capacity: config.dedup_capacity,
            dedup_ttl: Duration::from_secs(config.dedup_ttl_secs),
            messages_per_second: config.messages_per_second,
        }
    }

    fn fresh(&self, now: Instant) -> ConnectionGuard {
        ConnectionGuard {
            dedup: DedupCache::new(self.dedup_capacity, self.dedup_ttl),
            sequence: SequenceTracker::default(),
            rate: WindowCounter::new(self.messages_per_second, now),
        }
    }

    fn with_connection<T>(&self, conn: Uuid, f: impl FnOnce(&mut ConnectionGuard) -> T) -> T {
        let now = Instant::now();
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        let guard = connections.entry(conn).or_insert_with(|| self.fresh(now));
        f(guard)
    }

    /// Start tracking a connection.
    pub fn register(&self, conn: Uuid) {
        let fresh = self.fresh(Instant::now());
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        connections.insert(conn, fresh);
    }

    /// Count one inbound message against the connection's rate window.
    pub fn admit(&self, conn: Uuid) -> Result<(), RateLimitError> {
        let result = self.with_connection(conn, |g| g.rate.check(Instant::now()));
        if let Err(e) = &result {
            if e.notify {
                warn!(conn_id = %conn, "{e}");
            }
        }
        result
    }

    /// Decide whether an event should be processed. An accepted id is
    /// remembered immediately; call [`commit`](Self::commit) once it is
    /// persisted or [`reject`](Self::reject) if it was not.
    pub fn check(&self, conn: Uuid, event_id: Uuid, sequence_number: u64) -> Admission {
        let now = Instant::now();
        self.with_connection(conn, |g| {
            if g.dedup.contains(&event_id, now) {
                debug!(conn_id = %conn, event_id = %event_id, "duplicate event");
                return Admission::Duplicate;
            }
            match g.sequence.check(sequence_number) {
                SequenceCheck::Stale { expected } => Admission::Stale { expected },
                SequenceCheck::Accept { gap } => {
                    g.dedup.insert(event_id, now);
                    if gap > 0 {
                        warn!(
                            conn_id = %conn,
                            sequence_number,
                            gap,
                            "sequence gap"
                        );
                    }
                    Admission::Accept { gap }
                }
            }
        })
    }

    pub fn commit(&self, conn: Uuid, sequence_number: u64) {
        self.with_connection(conn, |g| g.sequence.commit(sequence_number));
    }

    pub fn reject(&self, conn: Uuid, event_id: &Uuid) {
        self.with_connection(conn, |g| g.dedup.forget(event_id));
    }

    /// Drop all state for a closed connection.
    pub fn release(&self, conn: Uuid) {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        connections.remove(&conn);
    }

    pub fn tracked_connections(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
