//! Two-pass first-fit allocator.
//!
//! The allocator runs the same first-fit procedure twice, once with
//! providers and consumers ordered by ascending CPU and once by ascending
//! memory. Providers that already host work sort ahead of idle ones so that
//! partially used instances fill up before idle ones are touched. The pass
//! that ends with more providers wins; on a tie the memory pass wins.
//!
//! When no provider has room, a hypothetical instance of the environment's
//! type is synthesized. A consumer that does not fit even an empty
//! instance is reported as a [`PlacementError`] and skipped.

use std::cmp::Reverse;
use std::fmt;

use fleetgrid_core::ProviderEligibility;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::InstanceSpec;
use crate::resource::{ResourceConsumer, ResourceProvider};

/// Resource dimension a pass orders by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortAxis {
    Cpu,
    Memory,
}

impl SortAxis {
    fn provider_key(self, provider: &ResourceProvider) -> u64 {
        match self {
            SortAxis::Cpu => provider.available_cpu,
            SortAxis::Memory => provider.available_memory,
        }
    }

    fn consumer_key(self, consumer: &ResourceConsumer) -> u64 {
        match self {
            SortAxis::Cpu => consumer.cpu,
            SortAxis::Memory => consumer.memory,
        }
    }
}

impl fmt::Display for SortAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortAxis::Cpu => f.write_str("cpu"),
            SortAxis::Memory => f.write_str("memory"),
        }
    }
}

/// A consumer that cannot fit into an empty instance of the configured type.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error(
    "consumer '{}' (cpu {}, memory {} bytes, ports {:?}) does not fit an empty {} instance \
     (cpu {}, memory {} bytes); use a larger instance type or shrink the workload",
    consumer.id, consumer.cpu, consumer.memory, consumer.ports,
    instance.instance_type, instance.cpu, instance.memory
)]
pub struct PlacementError {
    pub consumer: ResourceConsumer,
    pub instance: InstanceSpec,
}

/// Where one consumer ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Index into the consumer slice passed to [`Allocator::allocate`].
    pub consumer: usize,
    /// Index into [`Allocation::providers`].
    pub provider: usize,
}

/// Result of one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Ordering of the winning pass.
    pub axis: SortAxis,
    /// Existing providers followed by any synthesized ones, after subtraction.
    pub providers: Vec<ResourceProvider>,
    pub placements: Vec<Placement>,
    pub errors: Vec<PlacementError>,
}

impl Allocation {
    pub fn new_instances(&self) -> usize {
        self.providers.iter().filter(|p| p.is_hypothetical()).count()
    }

    /// Consumers that could not be placed anywhere.
    pub fn pending(&self) -> Vec<ResourceConsumer> {
        self.errors.iter().map(|e| e.consumer.clone()).collect()
    }
}

/// First-fit allocator for one environment.
#[derive(Debug, Clone)]
pub struct Allocator {
    new_instance: InstanceSpec,
    eligibility: ProviderEligibility,
}

impl Allocator {
    /// `new_instance` sizes every hypothetical provider.
    pub fn new(new_instance: InstanceSpec) -> Self {
        Self {
            new_instance,
            eligibility: ProviderEligibility::AllActive,
        }
    }

    pub fn with_eligibility(mut self, eligibility: ProviderEligibility) -> Self {
        self.eligibility = eligibility;
        self
    }

    /// Place every consumer, adding hypothetical providers as needed.
    ///
    /// Inputs are not mutated; each pass works on its own copy.
    pub fn allocate(
        &self,
        providers: &[ResourceProvider],
        consumers: &[ResourceConsumer],
    ) -> Allocation {
        let by_cpu = self.allocate_pass(SortAxis::Cpu, providers, consumers);
        let by_memory = self.allocate_pass(SortAxis::Memory, providers, consumers);

        debug!(
            cpu_providers = by_cpu.providers.len(),
            memory_providers = by_memory.providers.len(),
            "allocation passes complete"
        );

        if by_cpu.providers.len() > by_memory.providers.len() {
            by_cpu
        } else {
            by_memory
        }
    }

    fn allocate_pass(
        &self,
        axis: SortAxis,
        providers: &[ResourceProvider],
        consumers: &[ResourceConsumer],
    ) -> Allocation {
        let mut providers = providers.to_vec();

        // In-use first, then ascending capacity. The sort is stable so
        // equal keys keep the substrate's order.
        providers.sort_by_key(|p| (Reverse(p.in_use), axis.provider_key(p)));

        let mut order: Vec<usize> = (0..consumers.len()).collect();
        order.sort_by_key(|&i| axis.consumer_key(&consumers[i]));

        let mut placements = Vec::with_capacity(consumers.len());
        let mut errors = Vec::new();

        for index in order {
            let consumer = &consumers[index];

            let existing = providers
                .iter_mut()
                .enumerate()
                .filter(|(_, p)| self.is_eligible(p))
                .find_map(|(i, p)| p.try_place(consumer).then_some(i));

            if let Some(provider) = existing {
                debug!(%axis, consumer = %consumer.id, provider = %providers[provider].id, "placed consumer");
                placements.push(Placement {
                    consumer: index,
                    provider,
                });
                continue;
            }

            let mut fresh = self.new_instance.new_provider();
            if fresh.try_place(consumer) {
                debug!(%axis, consumer = %consumer.id, "placed consumer on new instance");
                providers.push(fresh);
                placements.push(Placement {
                    consumer: index,
                    provider: providers.len() - 1,
                });
            } else {
                warn!(
                    %axis,
                    consumer = %consumer.id,
                    cpu = consumer.cpu,
                    memory = consumer.memory,
                    instance_type = %self.new_instance.instance_type,
                    "consumer does not fit an empty instance"
                );
                errors.push(PlacementError {
                    consumer: consumer.clone(),
                    instance: self.new_instance.clone(),
                });
            }
        }

        Allocation {
            axis,
            providers,
            placements,
            errors,
        }
    }

    fn is_eligible(&self, provider: &ResourceProvider) -> bool {
        match self.eligibility {
            ProviderEligibility::AllActive => true,
            ProviderEligibility::ConnectedOnly => provider.agent_connected,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use proptest::prelude::*;

    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn spec(cpu: u64, memory: u64) -> InstanceSpec {
        InstanceSpec::new("test.size", cpu, memory)
    }

    #[test]
    fn empty_inputs_need_nothing() {
        let allocation = Allocator::new(spec(4, 8192)).allocate(&[], &[]);
        assert!(allocation.providers.is_empty());
        assert!(allocation.errors.is_empty());
        assert_eq!(allocation.axis, SortAxis::Memory);
    }

    #[test]
    fn port_conflict_forces_second_provider() {
        let providers = vec![ResourceProvider::existing("i-1", 4, 8192)];
        let consumers = vec![
            ResourceConsumer::new("a", 2, 2048, [80]),
            ResourceConsumer::new("b", 2, 2048, [80]),
        ];

        let allocation = Allocator::new(spec(4, 8192)).allocate(&providers, &consumers);

        assert_eq!(allocation.providers.len(), 2);
        assert_eq!(allocation.new_instances(), 1);
        assert!(allocation.errors.is_empty());
        assert!(allocation.providers.iter().all(|p| p.in_use));
    }

    #[test]
    fn oversized_consumer_is_reported_not_dropped() {
        let providers = vec![ResourceProvider::existing("i-1", 4, 8192)];
        let consumers = vec![ResourceConsumer::new("huge", 8, 2048, [])];

        let allocation = Allocator::new(spec(4, 8192)).allocate(&providers, &consumers);

        assert_eq!(allocation.providers.len(), 1);
        assert_eq!(allocation.providers[0].id, "i-1");
        assert!(!allocation.providers[0].in_use);
        assert_eq!(allocation.errors.len(), 1);
        assert_eq!(allocation.errors[0].consumer.id, "huge");
        assert_eq!(allocation.pending(), consumers);
        assert!(allocation.placements.is_empty());
    }

    #[test]
    fn unfittable_consumer_does_not_block_the_rest() {
        let consumers = vec![
            ResourceConsumer::new("huge", 100, 1, []),
            ResourceConsumer::new("small", 1, 1, []),
        ];

        let allocation = Allocator::new(spec(4, 8192)).allocate(&[], &consumers);

        assert_eq!(allocation.errors.len(), 1);
        assert_eq!(allocation.providers.len(), 1);
        assert_eq!(
            allocation.placements,
            vec![Placement {
                consumer: 1,
                provider: 0
            }]
        );
    }

    #[test]
    fn reserved_port_cannot_be_claimed_on_new_instance() {
        let consumers = vec![ResourceConsumer::new("sshd", 1, 1, [22])];
        let allocation = Allocator::new(spec(4, 8192)).allocate(&[], &consumers);
        assert_eq!(allocation.errors.len(), 1);
        assert!(allocation.providers.is_empty());
    }

    #[test]
    fn fragmented_capacity_synthesizes_a_new_provider() {
        // 4 cpu free in total, but no single instance has more than 2.
        let providers = vec![
            ResourceProvider::existing("i-1", 2, 4096),
            ResourceProvider::existing("i-2", 2, 4096),
        ];
        let consumers = vec![ResourceConsumer::new("wide", 3, 1024, [])];

        let allocation = Allocator::new(spec(4, 8192)).allocate(&providers, &consumers);

        assert_eq!(allocation.providers.len(), 3);
        assert_eq!(allocation.new_instances(), 1);
    }

    #[test]
    fn in_use_providers_fill_before_idle_ones() {
        let providers = vec![
            ResourceProvider::existing("idle", 1024, 1024 * MIB),
            ResourceProvider::existing("busy", 2048, 2048 * MIB).in_use(true),
        ];
        let consumers = vec![ResourceConsumer::new("web", 256, 256 * MIB, [])];

        let allocation = Allocator::new(spec(4096, 8192 * MIB)).allocate(&providers, &consumers);

        let placed_on = &allocation.providers[allocation.placements[0].provider];
        assert_eq!(placed_on.id, "busy");
        let idle = allocation.providers.iter().find(|p| p.id == "idle").unwrap();
        assert!(!idle.in_use);
    }

    #[test]
    fn smallest_fitting_provider_is_chosen_within_a_pass() {
        let providers = vec![
            ResourceProvider::existing("big", 4096, 8192 * MIB),
            ResourceProvider::existing("small", 1024, 2048 * MIB),
        ];
        let consumers = vec![ResourceConsumer::new("web", 512, 512 * MIB, [])];

        let allocation = Allocator::new(spec(4096, 8192 * MIB)).allocate(&providers, &consumers);
        let placed_on = &allocation.providers[allocation.placements[0].provider];
        assert_eq!(placed_on.id, "small");
    }

    #[test]
    fn larger_pass_wins() {
        // Ordered by cpu, the small-cpu/large-memory consumer lands on the
        // small-cpu instance first and strands the other consumer; ordered
        // by memory both fit. The cpu pass needs an extra instance and wins.
        let providers = vec![
            ResourceProvider::existing("a", 2, 10),
            ResourceProvider::existing("b", 3, 4),
        ];
        let consumers = vec![
            ResourceConsumer::new("x", 1, 4, []),
            ResourceConsumer::new("y", 2, 10, []),
        ];
        let allocator = Allocator::new(spec(4, 16));

        let by_cpu = allocator.allocate_pass(SortAxis::Cpu, &providers, &consumers);
        let by_memory = allocator.allocate_pass(SortAxis::Memory, &providers, &consumers);
        assert_eq!(by_cpu.providers.len(), 3);
        assert_eq!(by_memory.providers.len(), 2);

        let allocation = allocator.allocate(&providers, &consumers);
        assert_eq!(allocation.axis, SortAxis::Cpu);
        assert_eq!(allocation.providers.len(), 3);
    }

    #[test]
    fn tie_prefers_memory_pass() {
        let providers = vec![ResourceProvider::existing("i-1", 4, 8192)];
        let consumers = vec![ResourceConsumer::new("web", 1, 1, [])];

        let allocation = Allocator::new(spec(4, 8192)).allocate(&providers, &consumers);
        assert_eq!(allocation.axis, SortAxis::Memory);
    }

    #[test]
    fn connected_only_skips_disconnected_agents() {
        let mut disconnected = ResourceProvider::existing("i-1", 4, 8192);
        disconnected.agent_connected = false;
        let consumers = vec![ResourceConsumer::new("web", 1, 1, [])];

        let all = Allocator::new(spec(4, 8192)).allocate(&[disconnected.clone()], &consumers);
        assert_eq!(all.providers.len(), 1);

        let connected = Allocator::new(spec(4, 8192))
            .with_eligibility(ProviderEligibility::ConnectedOnly)
            .allocate(&[disconnected], &consumers);
        assert_eq!(connected.providers.len(), 2);
        assert_eq!(connected.new_instances(), 1);
    }

    #[test]
    fn inputs_are_left_untouched() {
        let providers = vec![ResourceProvider::existing("i-1", 4, 8192)];
        let consumers = vec![ResourceConsumer::new("web", 1, 1, [80])];
        let snapshot = providers.clone();

        let _ = Allocator::new(spec(4, 8192)).allocate(&providers, &consumers);
        assert_eq!(providers, snapshot);
    }

    #[test]
    fn placement_error_message_names_the_consumer() {
        let allocation = Allocator::new(spec(4, 8192))
            .allocate(&[], &[ResourceConsumer::new("task:big", 8, 1, [])]);
        let message = allocation.errors[0].to_string();
        assert!(message.contains("task:big"));
        assert!(message.contains("test.size"));
    }

    // ── Properties ────────────────────────────────────────────────

    fn arb_ports() -> impl Strategy<Value = BTreeSet<u16>> {
        prop::collection::btree_set(prop_oneof![Just(80u16), Just(443), Just(8080), 1000u16..1010], 0..3)
    }

    fn arb_provider() -> impl Strategy<Value = ResourceProvider> {
        (0u64..4096, 0u64..8192, arb_ports(), any::<bool>(), any::<bool>()).prop_map(
            |(cpu, memory, ports, in_use, connected)| {
                let mut provider = ResourceProvider::existing("i", cpu, memory)
                    .with_ports(ports)
                    .in_use(in_use);
                provider.agent_connected = connected;
                provider
            },
        )
    }

    fn arb_consumer() -> impl Strategy<Value = ResourceConsumer> {
        (0u64..6000, 0u64..10000, arb_ports())
            .prop_map(|(cpu, memory, ports)| ResourceConsumer::new("c", cpu, memory, ports))
    }

    fn arb_eligibility() -> impl Strategy<Value = ProviderEligibility> {
        prop_oneof![
            Just(ProviderEligibility::AllActive),
            Just(ProviderEligibility::ConnectedOnly)
        ]
    }

    proptest! {
        #[test]
        fn every_consumer_is_placed_or_reported(
            providers in prop::collection::vec(arb_provider(), 0..6),
            consumers in prop::collection::vec(arb_consumer(), 0..12),
            eligibility in arb_eligibility(),
        ) {
            let allocation = Allocator::new(spec(4096, 8192))
                .with_eligibility(eligibility)
                .allocate(&providers, &consumers);

            prop_assert_eq!(allocation.placements.len() + allocation.errors.len(), consumers.len());
            prop_assert!(allocation.providers.len() >= providers.len());

            let mut seen = BTreeSet::new();
            for placement in &allocation.placements {
                prop_assert!(seen.insert(placement.consumer));
                prop_assert!(placement.provider < allocation.providers.len());
            }
        }

        #[test]
        fn placed_consumers_never_share_a_port_on_one_provider(
            providers in prop::collection::vec(arb_provider(), 0..6),
            consumers in prop::collection::vec(arb_consumer(), 0..12),
        ) {
            let allocation = Allocator::new(spec(4096, 8192)).allocate(&providers, &consumers);

            let mut claimed: BTreeMap<usize, BTreeSet<u16>> = BTreeMap::new();
            for placement in &allocation.placements {
                let ports = claimed.entry(placement.provider).or_default();
                for port in &consumers[placement.consumer].ports {
                    prop_assert!(ports.insert(*port), "port {} claimed twice", port);
                }
            }
        }

        #[test]
        fn placements_never_exceed_starting_capacity(
            providers in prop::collection::vec(arb_provider(), 0..6),
            consumers in prop::collection::vec(arb_consumer(), 0..12),
        ) {
            let allocation = Allocator::new(spec(4096, 8192)).allocate(&providers, &consumers);

            // Remaining capacity plus everything placed equals what the
            // provider started with, so nothing was over-subtracted.
            let mut placed_cpu = vec![0u64; allocation.providers.len()];
            let mut placed_memory = vec![0u64; allocation.providers.len()];
            for placement in &allocation.placements {
                placed_cpu[placement.provider] += consumers[placement.consumer].cpu;
                placed_memory[placement.provider] += consumers[placement.consumer].memory;
            }
            for (i, provider) in allocation.providers.iter().enumerate() {
                if provider.is_hypothetical() {
                    prop_assert_eq!(provider.available_cpu + placed_cpu[i], 4096);
                    prop_assert_eq!(provider.available_memory + placed_memory[i], 8192);
                    prop_assert!(provider.in_use);
                }
            }
        }

        #[test]
        fn oversized_consumers_always_error(
            providers in prop::collection::vec(arb_provider(), 0..6),
            extra_cpu in 1u64..1000,
        ) {
            let consumers = vec![ResourceConsumer::new("too-big", 4096 + extra_cpu, 1, [])];
            let allocation = Allocator::new(spec(4096, 8192)).allocate(&providers, &consumers);

            prop_assert_eq!(allocation.errors.len(), 1);
            prop_assert_eq!(allocation.new_instances(), 0);
        }

        #[test]
        fn allocation_is_deterministic(
            providers in prop::collection::vec(arb_provider(), 0..6),
            consumers in prop::collection::vec(arb_consumer(), 0..12),
        ) {
            let allocator = Allocator::new(spec(4096, 8192));
            let first = allocator.allocate(&providers, &consumers);
            let second = allocator.allocate(&providers, &consumers);

            prop_assert_eq!(first.providers.len(), second.providers.len());
            prop_assert_eq!(first.errors, second.errors);
        }
    }
}
