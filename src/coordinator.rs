//! Node-level partition ownership: one manager per owned partition.
//!
//! The coordinator reacts to rebalance notifications from the external
//! group-membership protocol. Revoked partitions are torn down
//! synchronously - every timer observed its cancellation before the
//! rebalance is acknowledged - so two nodes can never both fire the same
//! partition.

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::manager::Manager;
use crate::publish::Publisher;
use crate::task::TaskLimits;

/// One entry of a rebalance notification: a partition this node now owns
/// and the membership generation under which it owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionAssignment {
    pub partition: u32,
    pub generation: u64,
}

/// Owns the partition-to-manager map for this node.
pub struct Coordinator {
    managers: HashMap<u32, Manager>,
    publisher: Publisher,
    limits: TaskLimits,
}

impl Coordinator {
    pub fn new(publisher: Publisher, limits: TaskLimits) -> Self {
        Self {
            managers: HashMap::new(),
            publisher,
            limits,
        }
    }

    /// Applies a rebalance: tears down managers for partitions no longer
    /// owned (awaiting every timer's stop), creates syncing managers for
    /// new ones, and bumps the generation on retained ones. Returns the
    /// assignments that got a fresh manager - those partitions need a
    /// full-history replay and a fencing marker.
    pub async fn handle_rebalance(
        &mut self,
        assignments: &[PartitionAssignment],
    ) -> Vec<PartitionAssignment> {
        let owned: HashSet<u32> = assignments.iter().map(|a| a.partition).collect();

        let revoked: Vec<u32> = self
            .managers
            .keys()
            .filter(|partition| !owned.contains(partition))
            .copied()
            .collect();
        for partition in revoked {
            if let Some(mut manager) = self.managers.remove(&partition) {
                manager.shutdown().await;
                info!(partition, "partition revoked");
            }
        }

        let mut fresh = Vec::new();
        for assignment in assignments {
            match self.managers.get(&assignment.partition) {
                Some(manager) => manager.set_generation(assignment.generation),
                None => {
                    self.managers.insert(
                        assignment.partition,
                        Manager::new(
                            assignment.partition,
                            assignment.generation,
                            self.publisher.clone(),
                            self.limits,
                        ),
                    );
                    info!(
                        partition = assignment.partition,
                        generation = assignment.generation,
                        "partition assigned"
                    );
                    fresh.push(*assignment);
                }
            }
        }
        fresh
    }

    pub fn has_partition(&self, partition: u32) -> bool {
        self.managers.contains_key(&partition)
    }

    pub fn manager(&self, partition: u32) -> Option<&Manager> {
        self.managers.get(&partition)
    }

    pub fn manager_mut(&mut self, partition: u32) -> Option<&mut Manager> {
        self.managers.get_mut(&partition)
    }

    /// Stops everything. Used at process shutdown.
    pub async fn shutdown(&mut self) {
        for (_, mut manager) in self.managers.drain() {
            manager.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish;

    fn coordinator() -> Coordinator {
        let (publisher, _rx) = publish::channel();
        Coordinator::new(publisher, TaskLimits::default())
    }

    fn assign(partition: u32, generation: u64) -> PartitionAssignment {
        PartitionAssignment {
            partition,
            generation,
        }
    }

    #[tokio::test]
    async fn creates_managers_for_new_partitions_only() {
        let mut coordinator = coordinator();
        let fresh = coordinator
            .handle_rebalance(&[assign(1, 10), assign(2, 10)])
            .await;
        assert_eq!(fresh.len(), 2);
        assert!(coordinator.has_partition(1));
        assert!(coordinator.has_partition(2));

        // retained partitions keep their manager but adopt the generation
        let fresh = coordinator
            .handle_rebalance(&[assign(1, 11), assign(3, 11)])
            .await;
        assert_eq!(fresh, vec![assign(3, 11)]);
        assert!(!coordinator.has_partition(2));
        assert_eq!(coordinator.manager(1).unwrap().generation(), 11);
    }

    #[tokio::test]
    async fn revocation_drops_the_manager() {
        let mut coordinator = coordinator();
        coordinator.handle_rebalance(&[assign(5, 1)]).await;
        coordinator.handle_rebalance(&[]).await;
        assert!(!coordinator.has_partition(5));
    }
}
