//! Job id -> response sink rendezvous between dispatch and callback.
//!
//! A synchronous caller registers a sink *before* its job is published so a
//! fast callback can never arrive ahead of the registration. Registration
//! hands back a [`CorrelationGuard`]; dropping the guard removes the entry,
//! so every exit path of the waiter (result, failure, timeout, early return,
//! panic unwind) releases it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::error::CoreError;
use crate::types::JobId;

/// Default number of messages buffered per waiting job.
pub const DEFAULT_SINK_CAPACITY: usize = 8;

/// Thread-safe map from job id to the channel its waiter listens on.
pub struct CorrelationTable<M> {
    entries: Mutex<HashMap<JobId, mpsc::Sender<M>>>,
}

impl<M> CorrelationTable<M> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a sink for `job_id`.
    ///
    /// At most one live entry per job: returns `Conflict` if one exists.
    pub fn put(&self, job_id: JobId, sink: mpsc::Sender<M>) -> Result<(), CoreError> {
        let mut entries = self.lock();
        if entries.contains_key(&job_id) {
            return Err(CoreError::Conflict(format!(
                "Job {job_id} already has a registered waiter"
            )));
        }
        entries.insert(job_id, sink);
        Ok(())
    }

    /// Clone out the sink for `job_id`, if a waiter is registered.
    pub fn get(&self, job_id: &JobId) -> Option<mpsc::Sender<M>> {
        self.lock().get(job_id).cloned()
    }

    /// Remove the entry for `job_id`. Returns whether one existed.
    pub fn delete(&self, job_id: &JobId) -> bool {
        self.lock().remove(job_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a bounded channel, register its sender under `job_id` and
    /// return the receiver together with a guard that deregisters on drop.
    pub fn register(
        self: &Arc<Self>,
        job_id: JobId,
        capacity: usize,
    ) -> Result<(CorrelationGuard<M>, mpsc::Receiver<M>), CoreError> {
        let (tx, rx) = mpsc::channel(capacity);
        self.put(job_id, tx)?;
        let guard = CorrelationGuard {
            table: Arc::clone(self),
            job_id,
        };
        Ok((guard, rx))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, mpsc::Sender<M>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M> Default for CorrelationTable<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes its job's entry from the [`CorrelationTable`] when dropped.
pub struct CorrelationGuard<M> {
    table: Arc<CorrelationTable<M>>,
    job_id: JobId,
}

impl<M> CorrelationGuard<M> {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }
}

impl<M> Drop for CorrelationGuard<M> {
    fn drop(&mut self) {
        self.table.delete(&self.job_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn put_get_delete() {
        let table = CorrelationTable::<u32>::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(1);
        table.put(id, tx).unwrap();
        assert!(table.get(&id).is_some());
        assert!(table.delete(&id));
        assert!(table.get(&id).is_none());
        assert!(!table.delete(&id));
    }

    #[test]
    fn second_put_for_same_job_conflicts() {
        let table = CorrelationTable::<u32>::new();
        let id = Uuid::new_v4();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        table.put(id, tx1).unwrap();
        assert_matches!(table.put(id, tx2), Err(CoreError::Conflict(_)));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn guard_deregisters_on_drop() {
        let table = Arc::new(CorrelationTable::<u32>::new());
        let id = Uuid::new_v4();
        {
            let (_guard, mut rx) = table.register(id, DEFAULT_SINK_CAPACITY).unwrap();
            let sink = table.get(&id).expect("registered");
            sink.send(42).await.unwrap();
            assert_eq!(rx.recv().await, Some(42));
        }
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn guard_releases_on_early_error_return() {
        async fn waiter(table: Arc<CorrelationTable<u32>>, id: JobId) -> Result<(), CoreError> {
            let (_guard, _rx) = table.register(id, 1)?;
            Err(CoreError::Internal("publish failed".into()))
        }

        let table = Arc::new(CorrelationTable::<u32>::new());
        let id = Uuid::new_v4();
        assert!(waiter(Arc::clone(&table), id).await.is_err());
        assert!(table.get(&id).is_none());
    }
}
