//! Run-scoped task definition footprints.
//!
//! A task definition never changes once registered, so its footprint is
//! looked up at most once per run. The cache is owned by a single run and
//! dropped with it.

use std::collections::HashMap;

use fleetgrid_core::DefinitionId;
use fleetgrid_placement::ResourceConsumer;
use tracing::debug;

use crate::error::RequestError;
use crate::retry::{RetryPolicy, with_retry};
use crate::substrate::{ClusterSubstrate, TaskDefinition};

const MIB: u64 = 1024 * 1024;

/// Footprint of one copy of a task definition: summed container CPU and
/// memory plus every fixed host port.
pub fn footprint(definition: &TaskDefinition) -> ResourceConsumer {
    let mut consumer = ResourceConsumer::new(&definition.id, 0, 0, []);

    for container in &definition.containers {
        consumer.cpu = consumer.cpu.saturating_add(container.cpu);

        // The hard limit wins over the soft reservation.
        let memory_mib = container
            .memory
            .or(container.memory_reservation)
            .unwrap_or(0);
        consumer.memory = consumer.memory.saturating_add(memory_mib.saturating_mul(MIB));

        consumer.ports.extend(
            container
                .port_mappings
                .iter()
                .map(|m| m.host_port)
                .filter(|&port| port != 0),
        );
    }

    consumer
}

#[derive(Debug, Default)]
pub struct DefinitionCache {
    footprints: HashMap<DefinitionId, ResourceConsumer>,
    lookups: usize,
}

impl DefinitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Footprint for `definition_id`, fetching it from the substrate on
    /// first use.
    pub async fn footprint(
        &mut self,
        substrate: &dyn ClusterSubstrate,
        retry: &RetryPolicy,
        definition_id: &str,
    ) -> Result<ResourceConsumer, RequestError> {
        if let Some(consumer) = self.footprints.get(definition_id) {
            return Ok(consumer.clone());
        }

        let definition = with_retry(retry, "describe_task_definition", move || {
            substrate.describe_task_definition(definition_id)
        })
        .await?;
        self.lookups += 1;

        let consumer = footprint(&definition);
        debug!(
            definition = definition_id,
            cpu = consumer.cpu,
            memory = consumer.memory,
            ports = ?consumer.ports,
            "task definition footprint"
        );
        self.footprints
            .insert(definition_id.to_string(), consumer.clone());
        Ok(consumer)
    }

    /// Substrate lookups performed so far.
    pub fn lookups(&self) -> usize {
        self.lookups
    }

    pub fn len(&self) -> usize {
        self.footprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.footprints.is_empty()
    }
}
