//! Partition log consumer: the single thread of control that mutates
//! coordinator and manager state.
//!
//! The consumer replays/streams each owned partition's records in order
//! and routes them to the right manager. Because it is the sole mutator,
//! managers need no internal locking; timer run-loops interact with it
//! only through cancellation and the outbound publish hand-off.
//!
//! Poison records (undecodable key or value) are logged and skipped -
//! they never wedge a partition. An unreachable progress store during
//! activation is the one fatal error: it propagates out of [`run`] and
//! must bring the process down rather than risk duplicate or lost fires.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::coordinator::{Coordinator, PartitionAssignment};
use crate::publish::Publisher;
use crate::record::{ConsumerRecord, ExecutionRecord, ProducerRecord, RecordKey, TimerDocument, Topic};
use crate::store::ProgressStore;

/// Inputs delivered by the log transport, in per-partition order.
#[derive(Debug)]
pub enum LogEvent {
    /// The node's owned-partition set changed.
    Rebalance(Vec<PartitionAssignment>),
    /// The next record of an owned partition.
    Record(ConsumerRecord),
}

/// Drives the coordinator and managers from the partition log.
pub struct PartitionConsumer {
    coordinator: Coordinator,
    store: Arc<dyn ProgressStore>,
    publisher: Publisher,
    config: Config,
}

impl PartitionConsumer {
    pub fn new(config: Config, store: Arc<dyn ProgressStore>, publisher: Publisher) -> Self {
        let coordinator = Coordinator::new(publisher.clone(), config.task_limits());
        Self {
            coordinator,
            store,
            publisher,
            config,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Applies a rebalance and fences every freshly assigned partition
    /// with a marker. The transport is expected to reset such partitions
    /// to the beginning of their history before delivering records.
    pub async fn handle_rebalance(&mut self, assignments: Vec<PartitionAssignment>) {
        let fresh = self.coordinator.handle_rebalance(&assignments).await;
        for assignment in fresh {
            self.publisher.send(ProducerRecord::marker(
                assignment.partition,
                assignment.generation,
            ));
        }
    }

    /// Applies one log record.
    pub async fn handle_record(&mut self, record: ConsumerRecord) -> Result<()> {
        let store = Arc::clone(&self.store);
        let attempts = self.config.store_retry_attempts;
        let backoff = self.config.store_retry_backoff;

        let Some(manager) = self.coordinator.manager_mut(record.partition) else {
            debug!(partition = record.partition, "record for unowned partition");
            return Ok(());
        };

        let key = match RecordKey::decode(&record.key) {
            Ok(key) => key,
            Err(err) => {
                warn!(partition = record.partition, error = %err, "skipping record with undecodable key");
                return Ok(());
            }
        };

        match key {
            RecordKey::Marker => {
                // only our own marker proves we are caught up; markers from
                // earlier generations are part of the replayed history
                if record.generation == Some(manager.generation()) {
                    manager
                        .activate(store.as_ref(), attempts, backoff)
                        .await
                        .with_context(|| {
                            format!("activating partition {}", record.partition)
                        })?;
                }
            }
            RecordKey::Timer(key) => match record.topic {
                Topic::Timers => match &record.value {
                    None => manager.remove_timer(&key).await,
                    Some(value) => match TimerDocument::decode(value) {
                        Ok(document) => {
                            if let Err(err) = manager.add_timer(key.clone(), &document).await {
                                warn!(timer = %key, error = %err, "skipping invalid timer create");
                            }
                        }
                        Err(err) => {
                            warn!(timer = %key, error = %err, "skipping undecodable create record");
                        }
                    },
                },
                Topic::Executions => match &record.value {
                    None => manager.discard_candidate_stale(&key),
                    Some(value) => match ExecutionRecord::decode(value) {
                        Ok(execution) => {
                            manager.apply_progress(&key, execution.progress, record.generation);
                        }
                        Err(err) => {
                            warn!(timer = %key, error = %err, "skipping undecodable execution record");
                        }
                    },
                },
            },
        }

        Ok(())
    }

    /// Consumes events until the transport closes the channel, then stops
    /// every timer.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<LogEvent>) -> Result<()> {
        while let Some(event) = events.recv().await {
            match event {
                LogEvent::Rebalance(assignments) => self.handle_rebalance(assignments).await,
                LogEvent::Record(record) => self.handle_record(record).await?,
            }
        }
        self.coordinator.shutdown().await;
        Ok(())
    }
}
