//! Durable progress-store boundary.
//!
//! A manager reads authoritative progress exactly once, at activation, to
//! cover whatever this node missed while it did not own the partition.
//! The store itself lives elsewhere (it is fed from the log by a separate
//! persister); only the read side is modeled here, plus an in-memory
//! implementation for tests and local runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::record::TimerKey;
use crate::schedule::Progress;

/// Read-only client for persisted timer progress.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Returns the persisted progress of every timer in the partition.
    async fn progresses(&self, partition: u32) -> Result<HashMap<TimerKey, Progress>>;
}

/// Fetches with bounded retries. Exhausting the retries is fatal for the
/// caller: activating with unknown progress risks duplicate or lost fires.
pub async fn fetch_with_retry(
    store: &dyn ProgressStore,
    partition: u32,
    attempts: u32,
    backoff: Duration,
) -> Result<HashMap<TimerKey, Progress>> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match store.progresses(partition).await {
            Ok(progresses) => return Ok(progresses),
            Err(err) => {
                warn!(
                    partition,
                    attempt,
                    attempts,
                    error = %err,
                    "progress store read failed"
                );
                last_err = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no attempts made")))
        .with_context(|| format!("progress store unreachable after {attempts} attempts"))
}

/// Hash-map-backed store for tests and single-process runs.
#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    partitions: Mutex<HashMap<u32, HashMap<TimerKey, Progress>>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, partition: u32, key: TimerKey, progress: Progress) {
        let mut partitions = self.partitions.lock().expect("progress store poisoned");
        partitions
            .entry(partition)
            .or_default()
            .insert(key, progress);
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn progresses(&self, partition: u32) -> Result<HashMap<TimerKey, Progress>> {
        let partitions = self.partitions.lock().expect("progress store poisoned");
        Ok(partitions.get(&partition).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyStore {
        failures: AtomicU32,
        inner: InMemoryProgressStore,
    }

    #[async_trait]
    impl ProgressStore for FlakyStore {
        async fn progresses(&self, partition: u32) -> Result<HashMap<TimerKey, Progress>> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                anyhow::bail!("store unavailable");
            }
            self.inner.progresses(partition).await
        }
    }

    #[tokio::test]
    async fn retries_through_transient_failures() {
        let key = TimerKey::new("acme", uuid::Uuid::new_v4());
        let store = FlakyStore {
            failures: AtomicU32::new(2),
            inner: InMemoryProgressStore::new(),
        };
        store.inner.insert(
            4,
            key.clone(),
            Progress {
                completed_executions: 7,
                last_execution: None,
            },
        );

        let progresses = fetch_with_retry(&store, 4, 5, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(progresses[&key].completed_executions, 7);
    }

    #[tokio::test]
    async fn gives_up_after_exhausting_attempts() {
        let store = FlakyStore {
            failures: AtomicU32::new(100),
            inner: InMemoryProgressStore::new(),
        };
        let err = fetch_with_retry(&store, 0, 3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
