//! Persisted work queue.
//!
//! The queue is a list snapshot persisted in full on every mutation. That
//! makes pops and requeues trivially restart-safe: whatever the last write
//! said is the queue. An absent snapshot means "no batch was ever enqueued",
//! which callers treat differently from an empty list.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::engine::processor::WorkUnitId;
use crate::error::Result;
use crate::store::StateStore;

/// Manages the persisted unit queue for one batch kind.
#[derive(Clone)]
pub struct QueueManager {
    store: Arc<dyn StateStore>,
    key: String,
}

impl QueueManager {
    pub fn new(store: Arc<dyn StateStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Replace the queue with a fresh workload.
    pub async fn enqueue_all(&self, units: Vec<WorkUnitId>) -> Result<()> {
        self.persist(&VecDeque::from(units)).await
    }

    /// Pop the unit at the queue front. `None` means the queue is empty or
    /// was never populated.
    pub async fn pop_front(&self) -> Result<Option<WorkUnitId>> {
        let mut units = match self.load().await? {
            Some(units) => units,
            None => return Ok(None),
        };

        let unit = units.pop_front();
        if unit.is_some() {
            self.persist(&units).await?;
        }
        Ok(unit)
    }

    /// Put a unit back at the queue front so it is retried first.
    pub async fn push_front(&self, unit: WorkUnitId) -> Result<()> {
        let mut units = self.load().await?.unwrap_or_default();
        units.push_front(unit);
        self.persist(&units).await
    }

    /// Whether `unit` is currently queued.
    pub async fn contains(&self, unit: &WorkUnitId) -> Result<bool> {
        Ok(self
            .load()
            .await?
            .map(|units| units.contains(unit))
            .unwrap_or(false))
    }

    /// Number of queued units.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.load().await?.map(|units| units.len()).unwrap_or(0))
    }

    /// Whether a snapshot exists at all. Distinguishes "drained" from
    /// "never started".
    pub async fn is_populated(&self) -> Result<bool> {
        Ok(self.store.get(&self.key).await?.is_some())
    }

    /// Drop the snapshot entirely.
    pub async fn clear(&self) -> Result<()> {
        self.store.delete(&self.key).await
    }

    async fn load(&self) -> Result<Option<VecDeque<WorkUnitId>>> {
        self.store.as_ref().get_json(&self.key).await
    }

    async fn persist(&self, units: &VecDeque<WorkUnitId>) -> Result<()> {
        self.store.as_ref().set_json(&self.key, units).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn queue() -> QueueManager {
        QueueManager::new(Arc::new(MemoryStore::new()), "suite:test:queue")
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = queue();
        queue
            .enqueue_all(vec!["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();

        assert_eq!(queue.pop_front().await.unwrap(), Some("a".into()));
        assert_eq!(queue.pop_front().await.unwrap(), Some("b".into()));
        assert_eq!(queue.pop_front().await.unwrap(), Some("c".into()));
        assert_eq!(queue.pop_front().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_push_front_retries_first() {
        let queue = queue();
        queue
            .enqueue_all(vec!["a".into(), "b".into()])
            .await
            .unwrap();

        let unit = queue.pop_front().await.unwrap().unwrap();
        queue.push_front(unit.clone()).await.unwrap();

        assert_eq!(queue.pop_front().await.unwrap(), Some(unit));
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_distinct_from_unpopulated() {
        let queue = queue();
        assert!(!queue.is_populated().await.unwrap());

        queue.enqueue_all(vec!["a".into()]).await.unwrap();
        queue.pop_front().await.unwrap();

        // Drained, but the snapshot still exists
        assert!(queue.is_populated().await.unwrap());
        assert_eq!(queue.len().await.unwrap(), 0);

        queue.clear().await.unwrap();
        assert!(!queue.is_populated().await.unwrap());
    }

    #[tokio::test]
    async fn test_contains() {
        let queue = queue();
        queue.enqueue_all(vec!["a".into()]).await.unwrap();
        assert!(queue.contains(&"a".into()).await.unwrap());
        assert!(!queue.contains(&"b".into()).await.unwrap());
    }
}
