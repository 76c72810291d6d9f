//! Instance-type catalog.
//!
//! Maps an instance type name to the capacity a freshly launched instance of
//! that type offers to the substrate. Built-in sizes cover the common EC2
//! families; `[instance_types]` entries in fleetd.toml add to or override
//! them.

use std::collections::{BTreeMap, BTreeSet};

use fleetgrid_core::InstanceTypeConfig;
use serde::{Deserialize, Serialize};

use crate::resource::{NEW_INSTANCE_ID, ResourceProvider};

/// Host ports bound by the base OS and the container agent on every
/// instance (ssh, docker daemon, agent introspection).
pub const RESERVED_PORTS: [u16; 5] = [22, 2375, 2376, 51678, 51679];

/// CPU units the substrate accounts per vCPU.
pub const CPU_UNITS_PER_VCPU: u64 = 1024;

const MIB: u64 = 1024 * 1024;

/// Capacity of an empty instance of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub instance_type: String,
    /// CPU units.
    pub cpu: u64,
    /// Memory in bytes.
    pub memory: u64,
}

impl InstanceSpec {
    pub fn new(instance_type: &str, cpu: u64, memory: u64) -> Self {
        Self {
            instance_type: instance_type.to_string(),
            cpu,
            memory,
        }
    }

    /// A not-yet-created instance of this type: full capacity, reserved
    /// ports already taken.
    pub fn new_provider(&self) -> ResourceProvider {
        ResourceProvider {
            id: NEW_INSTANCE_ID.to_string(),
            available_cpu: self.cpu,
            available_memory: self.memory,
            used_ports: RESERVED_PORTS.iter().copied().collect::<BTreeSet<_>>(),
            in_use: false,
            agent_connected: true,
            status: "PENDING".to_string(),
        }
    }
}

// (name, vCPUs, memory MiB)
const BUILTIN: &[(&str, u64, u64)] = &[
    ("t2.nano", 1, 512),
    ("t2.micro", 1, 1024),
    ("t2.small", 1, 2048),
    ("t2.medium", 2, 4096),
    ("t2.large", 2, 8192),
    ("m3.medium", 1, 3840),
    ("m3.large", 2, 7680),
    ("m3.xlarge", 4, 15360),
    ("m3.2xlarge", 8, 30720),
    ("m4.large", 2, 8192),
    ("m4.xlarge", 4, 16384),
    ("m4.2xlarge", 8, 32768),
    ("m4.4xlarge", 16, 65536),
    ("m4.10xlarge", 40, 163840),
    ("c3.large", 2, 3840),
    ("c3.xlarge", 4, 7680),
    ("c3.2xlarge", 8, 15360),
    ("c3.4xlarge", 16, 30720),
    ("c3.8xlarge", 32, 61440),
    ("c4.large", 2, 3840),
    ("c4.xlarge", 4, 7680),
    ("c4.2xlarge", 8, 15360),
    ("c4.4xlarge", 16, 30720),
    ("c4.8xlarge", 36, 61440),
    ("r3.large", 2, 15616),
    ("r3.xlarge", 4, 31232),
    ("r3.2xlarge", 8, 62464),
    ("r3.4xlarge", 16, 124928),
    ("r3.8xlarge", 32, 249856),
];

/// Lookup table from instance type name to [`InstanceSpec`].
#[derive(Debug, Clone)]
pub struct InstanceCatalog {
    specs: BTreeMap<String, InstanceSpec>,
}

impl Default for InstanceCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl InstanceCatalog {
    pub fn empty() -> Self {
        Self {
            specs: BTreeMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for (name, vcpus, memory_mib) in BUILTIN {
            catalog.insert(InstanceSpec::new(
                name,
                vcpus * CPU_UNITS_PER_VCPU,
                memory_mib * MIB,
            ));
        }
        catalog
    }

    /// Built-in sizes overlaid with the configured ones.
    pub fn with_overrides(overrides: &BTreeMap<String, InstanceTypeConfig>) -> Self {
        let mut catalog = Self::builtin();
        for (name, size) in overrides {
            catalog.insert(InstanceSpec::new(name, size.cpu, size.memory_mib * MIB));
        }
        catalog
    }

    pub fn insert(&mut self, spec: InstanceSpec) {
        self.specs.insert(spec.instance_type.clone(), spec);
    }

    pub fn get(&self, instance_type: &str) -> Option<&InstanceSpec> {
        self.specs.get(instance_type)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
