//! TTL tracking for cached completions.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::fingerprint::Fingerprint;

/// Tracks the expiry deadline of each cached entry.
///
/// Unlike an idle timeout, a hit does not extend an entry's life: it expires
/// a fixed TTL after it was stored.
#[derive(Debug, Default)]
pub struct TtlTracker {
    deadlines: HashMap<Fingerprint, Instant>,
}

impl TtlTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the clock for `key`.
    pub fn insert(&mut self, key: Fingerprint, ttl: Duration) {
        self.deadlines.insert(key, Instant::now() + ttl);
    }

    /// Check if an entry has expired. Untracked entries count as expired.
    pub fn is_expired(&self, key: &Fingerprint) -> bool {
        match self.deadlines.get(key) {
            None => true,
            Some(deadline) => Instant::now() >= *deadline,
        }
    }

    /// Stop tracking `key`.
    pub fn remove(&mut self, key: &Fingerprint) {
        self.deadlines.remove(key);
    }

    /// Remove all expired entries and return their keys.
    pub fn drain_expired(&mut self) -> Vec<Fingerprint> {
        let now = Instant::now();
        let expired: Vec<Fingerprint> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.deadlines.remove(key);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}
