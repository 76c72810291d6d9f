//! Scale planning — turn an allocation into a target instance count.

use serde::{Deserialize, Serialize};

use crate::allocator::Allocation;
use crate::resource::ResourceConsumer;

/// What the allocation implies for the instance group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalePlan {
    /// Instances needed to host all placeable demand.
    pub desired_scale: usize,
    /// Instances that do not exist yet.
    pub new_instances: usize,
    /// Existing instances left without any placed consumer.
    pub unused: Vec<String>,
    /// Consumers that could not be placed.
    pub pending: Vec<ResourceConsumer>,
}

/// Derive a [`ScalePlan`]. Removal of unused instances is left to the caller.
pub fn plan(allocation: &Allocation) -> ScalePlan {
    let unused = allocation
        .providers
        .iter()
        .filter(|p| !p.is_hypothetical() && !p.in_use)
        .map(|p| p.id.clone())
        .collect();

    ScalePlan {
        desired_scale: allocation.providers.len(),
        new_instances: allocation.new_instances(),
        unused,
        pending: allocation.pending(),
    }
}
