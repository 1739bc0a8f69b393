//! Time-windowed per-key in-flight counter.
//!
//! Every increment records one timestamped entry. Entries older than the
//! configured TTL stop counting even if nobody decrements them, so a lost
//! decrement can never pin a user at their ceiling forever.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::roles::Ceiling;

/// Thread-safe queue-depth counter keyed by `K` (usually a user id).
///
/// Designed to be wrapped in `Arc` and shared; all access goes through the
/// methods below, the underlying map is never exposed.
#[derive(Debug)]
pub struct QueueThrottle<K> {
    ttl: Duration,
    entries: Mutex<HashMap<K, VecDeque<Instant>>>,
}

impl<K: Eq + Hash + Clone> QueueThrottle<K> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record `n` new entries for `key`.
    pub fn increment_by(&self, n: usize, key: &K) {
        if n == 0 {
            return;
        }
        let now = Instant::now();
        let mut entries = self.lock();
        let queue = entries.entry(key.clone()).or_default();
        queue.extend(std::iter::repeat(now).take(n));
    }

    /// Remove the `n` oldest entries for `key`. Never goes below zero.
    pub fn decrement_by(&self, n: usize, key: &K) {
        let mut entries = self.lock();
        if let Some(queue) = entries.get_mut(key) {
            let n = n.min(queue.len());
            queue.drain(..n);
            if queue.is_empty() {
                entries.remove(key);
            }
        }
    }

    /// Number of live (non-expired) entries for `key`.
    pub fn num_queued(&self, key: &K) -> usize {
        let mut entries = self.lock();
        Self::purge(&mut entries, key, self.ttl)
    }

    /// Atomically check `ceiling` against the live count and, if it admits
    /// one more, record the entry. Returns whether the slot was taken.
    ///
    /// Doing the check and the increment under one lock keeps concurrent
    /// submissions from the same user from both slipping under the ceiling.
    pub fn try_acquire(&self, key: &K, ceiling: Ceiling) -> bool {
        let mut entries = self.lock();
        let live = Self::purge(&mut entries, key, self.ttl);
        if !ceiling.admits(live) {
            return false;
        }
        entries
            .entry(key.clone())
            .or_default()
            .push_back(Instant::now());
        true
    }

    /// Drop expired entries for `key` and return the remaining count.
    fn purge(entries: &mut HashMap<K, VecDeque<Instant>>, key: &K, ttl: Duration) -> usize {
        let Some(queue) = entries.get_mut(key) else {
            return 0;
        };
        // Entries are appended in time order, so expired ones sit at the front.
        while queue
            .front()
            .is_some_and(|enqueued_at| enqueued_at.elapsed() >= ttl)
        {
            queue.pop_front();
        }
        let live = queue.len();
        if live == 0 {
            entries.remove(key);
        }
        live
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, VecDeque<Instant>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
