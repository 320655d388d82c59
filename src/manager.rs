//! Per-partition timer registry and the generation-fenced activation
//! protocol.
//!
//! A manager is created in `Syncing` state when its partition is assigned
//! and is destroyed on revocation; it never goes back. While syncing it
//! buffers creates (timers exist in the map but no run-loop starts) and
//! tracks progress records that match no locally known timer as
//! candidate-stale. When the partition's fencing marker echoes back the
//! manager activates: it reads authoritative progress from the durable
//! store, starts every run-loop, and retires whatever candidate-stale
//! progress was never claimed by a live timer.
//!
//! Managers are mutated only by the partition's single reader task, so no
//! internal locking is needed; only the generation cell is shared with the
//! concurrently running timers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::publish::{Publisher, TimerSink};
use crate::record::{ProducerRecord, TimerDocument, TimerKey};
use crate::schedule::Progress;
use crate::store::{ProgressStore, fetch_with_retry};
use crate::task::TaskLimits;
use crate::timer::{Timer, TimerError};

/// Activation state. One-way: `Syncing` to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Syncing,
    Active,
}

/// The authoritative in-memory registry of one partition's timers on this
/// node.
pub struct Manager {
    partition: u32,
    generation: Arc<AtomicU64>,
    state: ManagerState,
    timers: HashMap<TimerKey, Timer>,
    /// Progress seen for ids with no local timer; either claimed by a
    /// late-arriving create, discarded by a tombstone, or retired at
    /// activation.
    candidate_stale: HashMap<TimerKey, Progress>,
    publisher: Publisher,
    limits: TaskLimits,
}

impl Manager {
    pub(crate) fn new(
        partition: u32,
        generation: u64,
        publisher: Publisher,
        limits: TaskLimits,
    ) -> Self {
        Self {
            partition,
            generation: Arc::new(AtomicU64::new(generation)),
            state: ManagerState::Syncing,
            timers: HashMap::new(),
            candidate_stale: HashMap::new(),
            publisher,
            limits,
        }
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Bumps the generation when the partition is retained across a
    /// rebalance. Timers pick the new value up on their next publish.
    pub fn set_generation(&self, generation: u64) {
        self.generation.store(generation, Ordering::SeqCst);
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ManagerState::Active
    }

    pub fn has_timer(&self, key: &TimerKey) -> bool {
        self.timers.contains_key(key)
    }

    pub fn timer(&self, key: &TimerKey) -> Option<&Timer> {
        self.timers.get(key)
    }

    pub fn timer_keys(&self) -> Vec<TimerKey> {
        self.timers.keys().cloned().collect()
    }

    /// Applies a create record. While active the run-loop starts
    /// immediately; while syncing the timer is held for activation. A
    /// create for an id we already hold replaces the old timer after a
    /// synchronous stop.
    pub async fn add_timer(
        &mut self,
        key: TimerKey,
        document: &TimerDocument,
    ) -> Result<(), TimerError> {
        if let Some(mut previous) = self.timers.remove(&key) {
            previous.stop().await;
        }

        let sink = TimerSink::new(
            self.publisher.clone(),
            self.partition,
            Arc::clone(&self.generation),
        );
        let mut timer = Timer::new(key.clone(), document, &self.limits, sink)?;

        // progress that outran its create across topics
        if let Some(progress) = self.candidate_stale.remove(&key) {
            timer.set_progress(progress);
        }

        if self.state == ManagerState::Active {
            timer.start();
        }
        debug!(partition = self.partition, timer = %key, "timer added");
        self.timers.insert(key, timer);
        Ok(())
    }

    /// Applies a delete record. The run-loop is stopped synchronously
    /// before the timer leaves the map, so no fire can be recorded after
    /// the delete is accepted.
    pub async fn remove_timer(&mut self, key: &TimerKey) {
        if let Some(mut timer) = self.timers.remove(key) {
            timer.stop().await;
            debug!(partition = self.partition, timer = %key, "timer removed");
        }
    }

    /// Applies a progress record observed on the log.
    pub fn apply_progress(
        &mut self,
        key: &TimerKey,
        progress: Progress,
        record_generation: Option<u64>,
    ) {
        match self.state {
            ManagerState::Syncing => {
                if let Some(timer) = self.timers.get_mut(key) {
                    timer.set_progress(progress);
                } else {
                    // may belong to a timer deleted by an earlier
                    // generation; decided at activation
                    let entry = self.candidate_stale.entry(key.clone()).or_default();
                    if progress.completed_executions >= entry.completed_executions {
                        *entry = progress;
                    }
                }
            }
            ManagerState::Active => {
                if self.timers.contains_key(key) {
                    // echo of our own execution record
                    return;
                }
                if record_generation == Some(self.generation()) {
                    // we already produced the retiring tombstone
                    return;
                }
                // no live timer and an older generation: its delete never
                // reached this partition, retire the progress now
                self.publisher.send(ProducerRecord::execution_tombstone(
                    key.encode(),
                    self.partition,
                    self.generation(),
                ));
            }
        }
    }

    /// Drops a candidate-stale entry when its retiring tombstone shows up
    /// later in the log.
    pub fn discard_candidate_stale(&mut self, key: &TimerKey) {
        self.candidate_stale.remove(key);
    }

    /// Transitions to `Active`: reads authoritative progress for the held
    /// timers, starts every run-loop, and retires unmatched
    /// candidate-stale progress. An unreachable store is a fatal error -
    /// running with unknown progress risks duplicate or lost fires.
    pub async fn activate(
        &mut self,
        store: &dyn ProgressStore,
        attempts: u32,
        backoff: Duration,
    ) -> Result<()> {
        if self.state == ManagerState::Active {
            return Ok(());
        }

        let progresses = fetch_with_retry(store, self.partition, attempts, backoff).await?;

        self.state = ManagerState::Active;
        for (key, timer) in &mut self.timers {
            if let Some(progress) = progresses.get(key) {
                timer.set_progress(progress.clone());
            }
            timer.start();
        }

        let stale = self.candidate_stale.len();
        for (key, _) in self.candidate_stale.drain() {
            self.publisher.send(ProducerRecord::execution_tombstone(
                key.encode(),
                self.partition,
                self.generation.load(Ordering::SeqCst),
            ));
        }

        info!(
            partition = self.partition,
            generation = self.generation(),
            timers = self.timers.len(),
            stale_retired = stale,
            "manager activated"
        );
        Ok(())
    }

    /// Stops every timer. Called on partition revocation; the manager is
    /// discarded afterwards.
    pub async fn shutdown(&mut self) {
        for (key, mut timer) in self.timers.drain() {
            timer.stop().await;
            debug!(partition = self.partition, timer = %key, "timer stopped for revocation");
        }
        if !self.candidate_stale.is_empty() {
            warn!(
                partition = self.partition,
                pending = self.candidate_stale.len(),
                "revoked while syncing, dropping candidate-stale entries"
            );
            self.candidate_stale.clear();
        }
    }
}
