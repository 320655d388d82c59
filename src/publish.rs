//! Outbound publish hand-off.
//!
//! Timers and managers enqueue records through a clonable [`Publisher`]
//! backed by an unbounded channel, so a slow downstream producer can never
//! stall the partition reader or a timer run-loop. The receiving half is
//! drained by the process's log transport (or by the test harness).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::warn;

use crate::record::{ExecutionRecord, ProducerRecord, TimerKey};
use crate::schedule::Progress;

/// Receiving half of the publish hand-off.
pub type PublisherRx = mpsc::UnboundedReceiver<ProducerRecord>;

/// Creates a connected publisher/receiver pair.
pub fn channel() -> (Publisher, PublisherRx) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Publisher { tx }, rx)
}

/// Fire-and-forget sender of outbound records. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<ProducerRecord>,
}

impl Publisher {
    /// Enqueues a record. Never blocks; a closed receiver (process
    /// shutdown) drops the record with a warning.
    pub fn send(&self, record: ProducerRecord) {
        if self.tx.send(record).is_err() {
            warn!("outbound publisher closed, dropping record");
        }
    }
}

/// Per-timer record sink handed out by a manager. Carries the partition
/// and the manager's generation so every record a timer produces is
/// fenced with the generation current at send time.
#[derive(Debug, Clone)]
pub struct TimerSink {
    publisher: Publisher,
    partition: u32,
    generation: Arc<AtomicU64>,
}

impl TimerSink {
    pub fn new(publisher: Publisher, partition: u32, generation: Arc<AtomicU64>) -> Self {
        Self {
            publisher,
            partition,
            generation,
        }
    }

    /// Publishes the progress update and result payload for one fire.
    pub fn record_execution(&self, key: &TimerKey, progress: Progress, result: Vec<u8>) {
        let record = ExecutionRecord { progress, result };
        let value = match record.encode() {
            Ok(value) => value,
            Err(err) => {
                warn!(timer = %key, error = %err, "failed to encode execution record");
                return;
            }
        };
        self.publisher.send(ProducerRecord::execution(
            key,
            value,
            self.partition,
            self.generation.load(Ordering::SeqCst),
        ));
    }

    /// Publishes the pair of tombstones that retire an exhausted timer:
    /// one on the create/delete topic, one on the progress/execute topic.
    pub fn record_finish(&self, key: &TimerKey) {
        let generation = self.generation.load(Ordering::SeqCst);
        self.publisher.send(ProducerRecord::timer_tombstone(
            key.encode(),
            self.partition,
            generation,
        ));
        self.publisher.send(ProducerRecord::execution_tombstone(
            key.encode(),
            self.partition,
            generation,
        ));
    }
}
