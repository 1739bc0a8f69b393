//! Admission controller: per-user concurrency ceilings with an overflow
//! queue for non-interactive callers.
//!
//! A successful admission yields an [`AdmissionSlot`]. Dropping the slot
//! gives the throttle entry back, which covers every failure between
//! admission and publish. Once the job is handed to the broker the slot is
//! [`hand_off`](AdmissionSlot::hand_off)ed and the entry is released by
//! whoever finalizes the job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gatehouse_core::job::Caller;
use gatehouse_core::roles::Ceiling;
use gatehouse_core::throttle::QueueThrottle;
use gatehouse_core::types::DbId;

use crate::error::AdmissionError;

pub struct AdmissionController {
    throttle: Arc<QueueThrottle<DbId>>,
    overflow: Arc<OverflowCounter>,
    overflow_max: usize,
    penalty: Duration,
}

impl AdmissionController {
    pub fn new(throttle: Arc<QueueThrottle<DbId>>, overflow_max: usize, penalty: Duration) -> Self {
        Self {
            throttle,
            overflow: Arc::new(OverflowCounter::default()),
            overflow_max,
            penalty,
        }
    }

    pub fn throttle(&self) -> &Arc<QueueThrottle<DbId>> {
        &self.throttle
    }

    /// Callers currently waiting in `user_id`'s overflow queue.
    pub fn overflow_size(&self, user_id: DbId) -> usize {
        self.overflow.get(user_id)
    }

    /// Take one in-flight slot for `caller` under `ceiling`.
    ///
    /// Interactive callers are rejected as soon as the ceiling is reached.
    /// Others join the user's overflow queue and re-poll, sleeping
    /// `penalty * overflow_size` between polls, until a slot frees up. The
    /// overflow queue itself is capped at `overflow_max` waiters.
    pub async fn admit(&self, caller: &Caller, ceiling: Ceiling) -> Result<AdmissionSlot, AdmissionError> {
        if caller.is_banned {
            return Err(AdmissionError::Banned);
        }

        let user_id = caller.user_id;
        if self.throttle.try_acquire(&user_id, ceiling) {
            return Ok(self.slot(user_id));
        }

        let limit = match ceiling {
            Ceiling::Limited(max) => max,
            Ceiling::Unbounded => u32::MAX,
        };

        if caller.channel.is_interactive() {
            tracing::warn!(user_id, ceiling = limit, "Admission rejected, queue full");
            return Err(AdmissionError::QueueFull { ceiling: limit });
        }

        let waiter = OverflowWaiter::enter(Arc::clone(&self.overflow), user_id);
        if waiter.size_on_entry > self.overflow_max {
            tracing::warn!(
                user_id,
                overflow = waiter.size_on_entry,
                overflow_max = self.overflow_max,
                "Admission rejected, overflow queue full",
            );
            return Err(AdmissionError::OverflowFull {
                size: waiter.size_on_entry,
            });
        }

        tracing::info!(user_id, overflow = waiter.size_on_entry, "Caller entered overflow queue");
        loop {
            let size = self.overflow.get(user_id).max(1);
            tokio::time::sleep(self.penalty * size as u32).await;
            if self.throttle.try_acquire(&user_id, ceiling) {
                tracing::debug!(user_id, "Caller admitted from overflow queue");
                return Ok(self.slot(user_id));
            }
        }
    }

    fn slot(&self, user_id: DbId) -> AdmissionSlot {
        AdmissionSlot {
            throttle: Arc::clone(&self.throttle),
            user_id,
            armed: true,
        }
    }
}

/// One in-flight entry in the throttle, released on drop unless handed off.
#[derive(Debug)]
pub struct AdmissionSlot {
    throttle: Arc<QueueThrottle<DbId>>,
    user_id: DbId,
    armed: bool,
}

impl AdmissionSlot {
    pub fn user_id(&self) -> DbId {
        self.user_id
    }

    /// Keep the entry after this slot is dropped; job finalization
    /// releases it instead.
    pub fn hand_off(mut self) {
        self.armed = false;
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        if self.armed {
            self.throttle.decrement_by(1, &self.user_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Overflow bookkeeping
// ---------------------------------------------------------------------------

#[derive(Default)]
struct OverflowCounter {
    waiting: Mutex<HashMap<DbId, usize>>,
}

impl OverflowCounter {
    fn get(&self, user_id: DbId) -> usize {
        self.lock().get(&user_id).copied().unwrap_or(0)
    }

    fn increment(&self, user_id: DbId) -> usize {
        let mut waiting = self.lock();
        let count = waiting.entry(user_id).or_insert(0);
        *count += 1;
        *count
    }

    fn decrement(&self, user_id: DbId) {
        let mut waiting = self.lock();
        if let Some(count) = waiting.get_mut(&user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                waiting.remove(&user_id);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DbId, usize>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Membership in an overflow queue; leaves it on drop, including when the
/// waiting request is cancelled.
struct OverflowWaiter {
    counter: Arc<OverflowCounter>,
    user_id: DbId,
    size_on_entry: usize,
}

impl OverflowWaiter {
    fn enter(counter: Arc<OverflowCounter>, user_id: DbId) -> Self {
        let size_on_entry = counter.increment(user_id);
        Self {
            counter,
            user_id,
            size_on_entry,
        }
    }
}

impl Drop for OverflowWaiter {
    fn drop(&mut self) {
        self.counter.decrement(self.user_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
