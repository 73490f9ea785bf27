//! Bounded worker slots for one pipeline stage.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::ItemId;

/// Pipeline stage a pool serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    /// Network-bound source resolution and download.
    Fetch,
    /// CPU-bound external transcoding tools.
    Transcode,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Fetch => write!(f, "fetch"),
            StageKind::Transcode => write!(f, "transcode"),
        }
    }
}

/// Configuration for a stage pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePoolConfig {
    /// Maximum concurrent workers.
    pub max_workers: usize,
}

impl StagePoolConfig {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }
}

/// A fixed number of slots; a job holds one while it works on this stage.
pub struct StagePool {
    kind: StageKind,
    config: StagePoolConfig,
    semaphore: Arc<Semaphore>,
    active_workers: Arc<AtomicUsize>,
}

/// A held slot. Released on drop.
pub struct StagePermit {
    kind: StageKind,
    id: ItemId,
    _permit: OwnedSemaphorePermit,
    active_workers: Arc<AtomicUsize>,
}

impl Drop for StagePermit {
    fn drop(&mut self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
        debug!(item_id = %self.id, stage = %self.kind, "Released worker slot");
    }
}

impl StagePool {
    pub fn new(kind: StageKind, config: StagePoolConfig) -> Self {
        let config = StagePoolConfig::new(config.max_workers);
        Self {
            kind,
            semaphore: Arc::new(Semaphore::new(config.max_workers)),
            config,
            active_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot. Returns `None` if `cancel` fires first.
    pub async fn acquire(&self, id: ItemId, cancel: &CancellationToken) -> Option<StagePermit> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok()?,
        };
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        debug!(item_id = %id, stage = %self.kind, "Acquired worker slot");
        Some(StagePermit {
            kind: self.kind,
            id,
            _permit: permit,
            active_workers: self.active_workers.clone(),
        })
    }

    /// Close the pool; pending and future `acquire` calls return `None`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::Fetch.to_string(), "fetch");
        assert_eq!(StageKind::Transcode.to_string(), "transcode");
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let pool = StagePool::new(StageKind::Transcode, StagePoolConfig { max_workers: 0 });
        assert_eq!(pool.max_workers(), 1);
    }

    #[tokio::test]
    async fn test_single_slot_serializes_work() {
        let pool = StagePool::new(StageKind::Transcode, StagePoolConfig::new(1));
        let cancel = CancellationToken::new();

        let first = pool.acquire(ItemId(1), &cancel).await.unwrap();
        assert_eq!(pool.active_count(), 1);

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            pool.acquire(ItemId(2), &cancel),
        )
        .await;
        assert!(blocked.is_err());

        drop(first);
        assert_eq!(pool.active_count(), 0);
        let second = pool.acquire(ItemId(2), &cancel).await;
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn test_acquire_returns_none_when_cancelled() {
        let pool = StagePool::new(StageKind::Fetch, StagePoolConfig::new(1));
        let cancel = CancellationToken::new();
        let _held = pool.acquire(ItemId(1), &cancel).await.unwrap();

        cancel.cancel();
        assert!(pool.acquire(ItemId(2), &cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_closed_pool_rejects() {
        let pool = StagePool::new(StageKind::Fetch, StagePoolConfig::new(2));
        pool.close();
        assert!(pool.acquire(ItemId(1), &CancellationToken::new()).await.is_none());
    }
}
