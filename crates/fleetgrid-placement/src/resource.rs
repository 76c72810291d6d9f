//! Resource providers (instances) and consumers (workloads).
//!
//! CPU is measured in substrate CPU units (1024 per vCPU) and memory in
//! bytes. Both are unsigned, so available capacity can never go negative;
//! the fit rule guarantees it never has to.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider id used for instances that do not exist yet.
pub const NEW_INSTANCE_ID: &str = "<new instance>";

/// Spare capacity on one instance for the duration of a scaler run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProvider {
    /// Instance id, or [`NEW_INSTANCE_ID`] for a hypothetical instance.
    pub id: String,
    pub available_cpu: u64,
    pub available_memory: u64,
    /// Host ports already bound on this instance.
    pub used_ports: BTreeSet<u16>,
    /// At least one consumer is placed here (or was, per the substrate).
    pub in_use: bool,
    pub agent_connected: bool,
    /// Free-form substrate status, e.g. `ACTIVE`.
    pub status: String,
}

/// Footprint of one copy of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceConsumer {
    /// Descriptive label; may be empty.
    pub id: String,
    pub cpu: u64,
    pub memory: u64,
    /// Host ports the workload's containers bind.
    pub ports: BTreeSet<u16>,
}

/// Returned when subtracting a consumer from a provider without room for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot subtract resources for consumer '{consumer}' from provider '{provider}'")]
pub struct NoRoom {
    pub consumer: String,
    pub provider: String,
}

impl ResourceProvider {
    /// An existing instance as reported by the substrate.
    pub fn existing(id: &str, available_cpu: u64, available_memory: u64) -> Self {
        Self {
            id: id.to_string(),
            available_cpu,
            available_memory,
            used_ports: BTreeSet::new(),
            in_use: false,
            agent_connected: true,
            status: "ACTIVE".to_string(),
        }
    }

    pub fn with_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.used_ports.extend(ports);
        self
    }

    pub fn in_use(mut self, in_use: bool) -> Self {
        self.in_use = in_use;
        self
    }

    /// True for providers synthesized by the allocator.
    pub fn is_hypothetical(&self) -> bool {
        self.id == NEW_INSTANCE_ID
    }

    /// A provider has room iff no requested port is taken and both CPU and
    /// memory cover the consumer's demand.
    pub fn has_room_for(&self, consumer: &ResourceConsumer) -> bool {
        self.used_ports.is_disjoint(&consumer.ports)
            && consumer.cpu <= self.available_cpu
            && consumer.memory <= self.available_memory
    }

    /// Reserve the consumer's footprint on this provider.
    pub fn subtract_resources_for(&mut self, consumer: &ResourceConsumer) -> Result<(), NoRoom> {
        if !self.has_room_for(consumer) {
            return Err(NoRoom {
                consumer: consumer.id.clone(),
                provider: self.id.clone(),
            });
        }

        self.available_cpu -= consumer.cpu;
        self.available_memory -= consumer.memory;
        self.used_ports.extend(consumer.ports.iter().copied());
        self.in_use = true;
        Ok(())
    }

    /// Place the consumer here if it fits. Returns whether it was placed.
    pub fn try_place(&mut self, consumer: &ResourceConsumer) -> bool {
        self.subtract_resources_for(consumer).is_ok()
    }
}

impl fmt::Display for ResourceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (cpu={}, memory={}MiB, ports={:?}, in_use={}, agent_connected={}, status={})",
            self.id,
            self.available_cpu,
            self.available_memory / MIB,
            self.used_ports,
            self.in_use,
            self.agent_connected,
            self.status,
        )
    }
}

impl ResourceConsumer {
    pub fn new(id: &str, cpu: u64, memory: u64, ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            id: id.to_string(),
            cpu,
            memory,
            ports: ports.into_iter().collect(),
        }
    }

    /// Same footprint under a different label.
    pub fn relabel(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..self.clone()
        }
    }
}

const MIB: u64 = 1024 * 1024;
