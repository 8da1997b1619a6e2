//! Bounded, expiring memory of event ids already accepted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Fraction of capacity at which a cleanup pass runs.
const CLEANUP_THRESHOLD: f64 = 0.9;

#[derive(Debug)]
pub struct DedupCache {
    seen: HashMap<Uuid, Instant>,
    capacity: usize,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Whether `id` was recorded less than one TTL ago.
    pub fn contains(&self, id: &Uuid, now: Instant) -> bool {
        self.seen
            .get(id)
            .is_some_and(|first| now.duration_since(*first) < self.ttl)
    }

    /// Record `id` as seen at `now`. Returns false if it was already live.
    pub fn insert(&mut self, id: Uuid, now: Instant) -> bool {
        if self.contains(&id, now) {
            return false;
        }
        if self.seen.len() as f64 >= self.capacity as f64 * CLEANUP_THRESHOLD {
            self.cleanup(now);
        }
        self.seen.insert(id, now);
        true
    }

    /// Drop `id` so a retry of the same event is processed again.
    pub fn forget(&mut self, id: &Uuid) {
        self.seen.remove(id);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Evict expired entries, then the oldest until below capacity.
    fn cleanup(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.seen.retain(|_, first| now.duration_since(*first) < ttl);

        if self.seen.len() >= self.capacity {
            let mut by_age: Vec<(Uuid, Instant)> =
                self.seen.iter().map(|(id, t)| (*id, *t)).collect();
            by_age.sort_by_key(|(_, t)| *t);
            // leave room for the entry about to be inserted
            let excess = self.seen.len() + 1 - self.capacity;
            for (id, _) in by_age.into_iter().take(excess) {
                self.seen.remove(&id);
            }
        }
    }
}
