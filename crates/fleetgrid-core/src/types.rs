//! Shared identifiers and naming rules.

/// Identifier of an environment (one cluster + one instance group).
pub type EnvironmentId = String;

/// Identifier of a compute instance registered to a cluster.
pub type InstanceId = String;

/// Identifier of a workload definition (the unit of footprint caching).
pub type DefinitionId = String;

/// Name of the cluster (and of its instance group) backing an environment.
///
/// Both resources are named `{instance_id}-{environment_id}` so that several
/// control planes can share one account without colliding.
pub fn cluster_name(instance_id: &str, environment_id: &str) -> String {
    format!("{instance_id}-{environment_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_name_is_prefixed() {
        assert_eq!(cluster_name("prod", "env-1"), "prod-env-1");
    }
}
