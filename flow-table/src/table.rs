// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The partitioned flow table (spec §4.3).
//!
//! Partitions are independent [`HashMap`]s, one per worker thread (spec
//! §5: each worker owns its partitions outright, so no partition needs
//! internal locking). A flow's partition is chosen from its normalized
//! key's hash, which is itself direction-invariant (spec §4.3), so both
//! directions of a flow always land on the same worker.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};

use tracing::{debug, trace};

use crate::flow_key::{FlowKey, ObservedTuple};
use crate::flow_record::FlowRecord;

/// Tunables for a [`FlowTable`].
#[derive(Debug, Clone)]
pub struct FlowTableConfig {
    /// Number of independent partitions (spec §4.3: typically one per
    /// worker thread).
    pub partition_count: usize,
    /// Maximum live flows per partition. `find_or_create` refuses to
    /// create beyond this (spec §4.3 "refuse-creation eviction").
    pub max_flows_per_partition: usize,
}

impl Default for FlowTableConfig {
    fn default() -> Self {
        FlowTableConfig {
            partition_count: 1,
            max_flows_per_partition: 1 << 20,
        }
    }
}

/// One independent shard of the flow table (spec §4.3, §5: "each worker
/// pinned to a fixed subset of flow-table partitions"). A `Partition`
/// carries no internal synchronization; it is sound for one thread to
/// own a `&mut Partition` for the table's lifetime and never share it.
pub struct Partition {
    flows: HashMap<FlowKey, FlowRecord, ahash::RandomState>,
    max_flows: usize,
}

impl Partition {
    fn new(max_flows: usize) -> Self {
        Partition {
            flows: HashMap::default(),
            max_flows,
        }
    }

    pub(crate) fn get(&self, key: &FlowKey) -> Option<&FlowRecord> {
        self.flows.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &FlowKey) -> Option<&mut FlowRecord> {
        self.flows.get_mut(key)
    }

    /// Find the flow for `observed` within this partition, creating it if
    /// absent (spec §4.3 "refuse-creation eviction" once `max_flows` is
    /// reached).
    pub fn find_or_create(
        &mut self,
        observed: &ObservedTuple,
        initial_candidates: crate::bitset::ProtocolBitset,
        tcp_reordering_enabled: bool,
    ) -> Option<&mut FlowRecord> {
        let key = FlowKey::normalize(observed);
        if !self.flows.contains_key(&key) {
            if self.flows.len() >= self.max_flows {
                trace!("flow table partition full, refusing creation");
                return None;
            }
            debug!(?key, "creating new flow");
            self.flows.insert(
                key,
                FlowRecord::new(key, *observed, initial_candidates, tcp_reordering_enabled),
            );
        }
        self.flows.get_mut(&key)
    }

    /// Remove a flow from this partition.
    pub fn delete(&mut self, key: &FlowKey) -> Option<FlowRecord> {
        let removed = self.flows.remove(key);
        if removed.is_some() {
            trace!(?key, "deleted flow");
        }
        removed
    }

    /// Number of live flows in this partition.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// True if this partition holds no flows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

/// The flow table: a fixed set of independent partitions, each a plain
/// hash map from normalized [`FlowKey`] to [`FlowRecord`].
pub struct FlowTable {
    partitions: Vec<Partition>,
    hasher: ahash::RandomState,
}

impl FlowTable {
    /// Build an empty flow table with `config.partition_count` partitions.
    #[must_use]
    pub fn new(config: &FlowTableConfig) -> Self {
        let partitions = (0..config.partition_count.max(1))
            .map(|_| Partition::new(config.max_flows_per_partition))
            .collect();
        FlowTable {
            partitions,
            hasher: ahash::RandomState::default(),
        }
    }

    /// Number of partitions in this table.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Which partition a key belongs to. Stable for the lifetime of the
    /// table; both directions of a flow hash the same `FlowKey`, so they
    /// always resolve to the same partition.
    #[must_use]
    pub fn partition_index(&self, key: &FlowKey) -> usize {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.partitions.len()
    }

    /// Look up a flow by key, within the partition the caller is
    /// responsible for (spec §5: a worker only ever touches its own
    /// partitions).
    #[must_use]
    pub fn get(&self, partition: usize, key: &FlowKey) -> Option<&FlowRecord> {
        self.partitions[partition].get(key)
    }

    /// Look up a flow by key, mutably.
    pub fn get_mut(&mut self, partition: usize, key: &FlowKey) -> Option<&mut FlowRecord> {
        self.partitions[partition].get_mut(key)
    }

    /// Find the flow for `observed`, creating it if absent.
    ///
    /// Returns `None` if the flow does not exist and the partition is at
    /// `max_flows_per_partition` (spec §4.3 "refuse-creation eviction": the
    /// caller should report [`crate::TCP_PROTO_NUMBER`]-independent
    /// `Status::MaxFlows` upstream rather than silently evicting a live
    /// flow).
    pub fn find_or_create(
        &mut self,
        partition: usize,
        observed: &ObservedTuple,
        initial_candidates: crate::bitset::ProtocolBitset,
        tcp_reordering_enabled: bool,
    ) -> Option<&mut FlowRecord> {
        self.partitions[partition].find_or_create(observed, initial_candidates, tcp_reordering_enabled)
    }

    /// Remove a flow, dropping its tracking/user data and rebuilt-buffer
    /// memory (spec §4.3 `delete`).
    pub fn delete(&mut self, partition: usize, key: &FlowKey) -> Option<FlowRecord> {
        self.partitions[partition].delete(key)
    }

    /// Number of live flows in a partition.
    #[must_use]
    pub fn len(&self, partition: usize) -> usize {
        self.partitions[partition].len()
    }

    /// True if a partition holds no flows.
    #[must_use]
    pub fn is_empty(&self, partition: usize) -> bool {
        self.partitions[partition].is_empty()
    }

    /// Drain every partition (spec §4.3 `shutdown`: used when the engine
    /// is torn down, e.g. to flush per-flow statistics before exit).
    pub fn shutdown(&mut self) -> Vec<FlowRecord> {
        self.partitions
            .iter_mut()
            .flat_map(|p| p.flows.drain().map(|(_, record)| record))
            .collect()
    }

    /// Split the partitions into `worker_count` disjoint, mutable slices
    /// so each worker thread can be handed a fixed subset to own outright
    /// for the duration of a scoped scan (spec §5: "parallel worker
    /// threads, each pinned to a fixed subset of flow-table partitions").
    /// No partition appears in more than one slice, so callers may mutate
    /// their own slice from a distinct thread without any lock.
    pub fn split_for_workers(&mut self, worker_count: usize) -> Vec<&mut [Partition]> {
        let worker_count = worker_count.max(1).min(self.partitions.len().max(1));
        let chunk_size = self.partitions.len().div_ceil(worker_count).max(1);
        self.partitions.chunks_mut(chunk_size).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitset::ProtocolBitset;
    use crate::flow_key::Endpoint;
    use std::net::{IpAddr, Ipv4Addr};

    fn tuple(src_port: u16, dst_port: u16) -> ObservedTuple {
        ObservedTuple {
            src: Endpoint {
                addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                port: src_port,
            },
            dst: Endpoint {
                addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
                port: dst_port,
            },
            ip_version: 4,
            l4_proto: 6,
        }
    }

    #[test]
    fn forward_and_reverse_packets_share_one_flow() {
        let mut table = FlowTable::new(&FlowTableConfig::default());
        let forward = tuple(51234, 80);
        let reverse = ObservedTuple {
            src: forward.dst,
            dst: forward.src,
            ip_version: 4,
            l4_proto: 6,
        };
        let key = FlowKey::normalize(&forward);
        let partition = table.partition_index(&key);

        assert!(table
            .find_or_create(partition, &forward, ProtocolBitset::all_set(4), true)
            .is_some());
        assert!(table
            .find_or_create(partition, &reverse, ProtocolBitset::all_set(4), true)
            .is_some());
        assert_eq!(table.len(partition), 1);
    }

    #[test]
    #[tracing_test::traced_test]
    fn full_partition_refuses_new_flows() {
        let config = FlowTableConfig {
            partition_count: 1,
            max_flows_per_partition: 1,
        };
        let mut table = FlowTable::new(&config);
        let first = tuple(1000, 80);
        let key = FlowKey::normalize(&first);
        let partition = table.partition_index(&key);
        assert!(table
            .find_or_create(partition, &first, ProtocolBitset::all_set(4), true)
            .is_some());

        let second = tuple(1001, 80);
        assert!(table
            .find_or_create(partition, &second, ProtocolBitset::all_set(4), true)
            .is_none());
        assert!(logs_contain("refusing creation"));
    }

    #[test]
    fn delete_removes_flow() {
        let mut table = FlowTable::new(&FlowTableConfig::default());
        let t = tuple(1000, 80);
        let key = FlowKey::normalize(&t);
        let partition = table.partition_index(&key);
        table
            .find_or_create(partition, &t, ProtocolBitset::all_set(4), true)
            .expect("room for flow");
        assert!(table.delete(partition, &key).is_some());
        assert!(table.is_empty(partition));
    }

    #[test]
    fn shutdown_drains_all_partitions() {
        let config = FlowTableConfig {
            partition_count: 4,
            max_flows_per_partition: 16,
        };
        let mut table = FlowTable::new(&config);
        for port in 0..8u16 {
            let t = tuple(1000 + port, 80);
            let key = FlowKey::normalize(&t);
            let partition = table.partition_index(&key);
            table.find_or_create(partition, &t, ProtocolBitset::all_set(4), true);
        }
        let drained = table.shutdown();
        assert_eq!(drained.len(), 8);
        for p in 0..4 {
            assert!(table.is_empty(p));
        }
    }
}

/// Tests exercising partition/eviction behaviour under real concurrent
/// scheduling, in both plain-`std` threads and under the `shuttle` model
/// checker (spec §5: partitions are single-writer under the caller's
/// discipline, so two worker threads driving disjoint partitions must
/// never observe each other's flows).
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod concurrency_tests {
    use super::*;
    use crate::bitset::ProtocolBitset;
    use crate::flow_key::Endpoint;
    use concurrency::concurrency_mode;
    use std::net::{IpAddr, Ipv4Addr};

    fn tuple(worker: u16, seq: u16) -> ObservedTuple {
        ObservedTuple {
            src: Endpoint {
                addr: IpAddr::V4(Ipv4Addr::new(10, 0, worker as u8, 1)),
                port: 1000 + seq,
            },
            dst: Endpoint {
                addr: IpAddr::V4(Ipv4Addr::new(10, 0, worker as u8, 2)),
                port: 80,
            },
            ip_version: 4,
            l4_proto: 6,
        }
    }

    #[concurrency_mode(std)]
    mod std_tests {
        use super::*;

        #[test]
        fn workers_on_disjoint_partitions_never_interfere() {
            const WORKERS: usize = 4;
            const FLOWS_PER_WORKER: u16 = 8;

            let config = FlowTableConfig {
                partition_count: WORKERS,
                max_flows_per_partition: 64,
            };
            let mut table = FlowTable::new(&config);
            let slices = table.split_for_workers(WORKERS);
            assert_eq!(slices.len(), WORKERS);

            std::thread::scope(|scope| {
                for (worker, slice) in slices.into_iter().enumerate() {
                    scope.spawn(move || {
                        assert_eq!(slice.len(), 1, "each worker owns exactly one partition");
                        let partition = &mut slice[0];
                        for seq in 0..FLOWS_PER_WORKER {
                            let observed = tuple(worker as u16, seq);
                            assert!(partition
                                .find_or_create(&observed, ProtocolBitset::all_set(4), true)
                                .is_some());
                        }
                        assert_eq!(partition.len(), usize::from(FLOWS_PER_WORKER));
                    });
                }
            });

            for worker in 0..WORKERS {
                assert_eq!(table.len(worker), usize::from(FLOWS_PER_WORKER));
            }
        }

        #[test]
        fn concurrent_eviction_refuses_beyond_capacity_per_partition() {
            const WORKERS: usize = 2;
            let config = FlowTableConfig {
                partition_count: WORKERS,
                max_flows_per_partition: 4,
            };
            let mut table = FlowTable::new(&config);
            let slices = table.split_for_workers(WORKERS);

            let accepted: Vec<usize> = std::thread::scope(|scope| {
                slices
                    .into_iter()
                    .enumerate()
                    .map(|(worker, slice)| {
                        scope.spawn(move || {
                            let partition = &mut slice[0];
                            let mut accepted = 0;
                            for seq in 0..8u16 {
                                let observed = tuple(worker as u16, seq);
                                if partition
                                    .find_or_create(&observed, ProtocolBitset::all_set(4), true)
                                    .is_some()
                                {
                                    accepted += 1;
                                }
                            }
                            accepted
                        })
                    })
                    .collect::<Vec<_>>()
                    .into_iter()
                    .map(|h| h.join().unwrap())
                    .collect()
            });

            for count in accepted {
                assert_eq!(count, 4, "refuse-creation eviction caps each partition independently");
            }
        }
    }

    #[concurrency_mode(shuttle)]
    mod shuttle_tests {
        use super::*;

        #[test]
        fn workers_on_disjoint_partitions_never_interfere() {
            shuttle::check_random(
                || {
                    const WORKERS: usize = 2;
                    const FLOWS_PER_WORKER: u16 = 3;

                    let config = FlowTableConfig {
                        partition_count: WORKERS,
                        max_flows_per_partition: 16,
                    };
                    let mut table = FlowTable::new(&config);
                    let slices = table.split_for_workers(WORKERS);

                    shuttle::thread::scope(|scope| {
                        for (worker, slice) in slices.into_iter().enumerate() {
                            scope.spawn(move || {
                                let partition = &mut slice[0];
                                for seq in 0..FLOWS_PER_WORKER {
                                    let observed = tuple(worker as u16, seq);
                                    assert!(partition
                                        .find_or_create(&observed, ProtocolBitset::all_set(4), true)
                                        .is_some());
                                }
                            });
                        }
                    });

                    for worker in 0..WORKERS {
                        assert_eq!(table.len(worker), usize::from(FLOWS_PER_WORKER));
                    }
                },
                50,
            );
        }
    }
}
