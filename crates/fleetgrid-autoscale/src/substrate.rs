//! Cluster substrate boundary.
//!
//! The substrate is the container orchestrator plus the instance group that
//! feeds a cluster. The scaler only reads inventory from it and issues two
//! mutations: set the group's desired capacity and terminate an instance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SubstrateResult;

/// A compute instance registered to a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInstance {
    pub id: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "default_true")]
    pub agent_connected: bool,
    #[serde(default)]
    pub running_tasks: u32,
    #[serde(default)]
    pub pending_tasks: u32,
    /// Capacity not yet claimed by placed tasks. Claimed host ports only
    /// show up here, never in the registered view.
    #[serde(default)]
    pub remaining_resources: Vec<ReportedResource>,
}

/// One named resource entry as the substrate reports it.
///
/// `CPU` and `MEMORY` (MiB) use `integer_value`; `PORTS` uses
/// `string_set_value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedResource {
    pub name: String,
    #[serde(default)]
    pub integer_value: i64,
    #[serde(default)]
    pub string_set_value: Vec<String>,
}

impl ReportedResource {
    pub fn integer(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            integer_value: value,
            string_set_value: Vec::new(),
        }
    }

    pub fn ports<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self {
            name: "PORTS".to_string(),
            integer_value: 0,
            string_set_value: ports.into_iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// A desired-count-managed service and its deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub deployments: Vec<ServiceDeployment>,
}

/// One rollout of a service onto a task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDeployment {
    pub id: String,
    pub task_definition: String,
    pub desired_count: u32,
    #[serde(default)]
    pub running_count: u32,
    #[serde(default)]
    pub pending_count: u32,
}

impl ServiceDeployment {
    /// Copies the substrate has not started yet.
    pub fn num_pending(&self) -> u32 {
        self.desired_count
            .saturating_sub(self.running_count + self.pending_count)
    }
}

/// Desired status filter for task listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Running,
    /// Tasks told to stop but possibly still holding resources.
    Stopped,
}

/// A task on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_definition: String,
    #[serde(default)]
    pub started_by: String,
    pub desired_status: TaskStatus,
}

/// Immutable description of a workload's containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    #[serde(default)]
    pub containers: Vec<ContainerDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDefinition {
    pub name: String,
    /// CPU units.
    #[serde(default)]
    pub cpu: u64,
    /// Hard memory limit in MiB.
    #[serde(default)]
    pub memory: Option<u64>,
    /// Soft memory reservation in MiB, used when no hard limit is set.
    #[serde(default)]
    pub memory_reservation: Option<u64>,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    /// Zero means a dynamically assigned host port.
    #[serde(default)]
    pub host_port: u16,
}

/// Size bounds and current target of an instance group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceGroup {
    pub name: String,
    pub min_size: usize,
    pub max_size: usize,
    pub desired_capacity: usize,
}

/// Operations the scaler needs from the orchestrator and instance group.
#[async_trait]
pub trait ClusterSubstrate: Send + Sync {
    /// Instances registered to the cluster with status `ACTIVE`.
    async fn list_active_instances(&self, cluster: &str) -> SubstrateResult<Vec<ContainerInstance>>;

    async fn list_services(&self, cluster: &str) -> SubstrateResult<Vec<Service>>;

    /// Tasks with the given desired status that were started by `started_by`.
    async fn list_tasks(
        &self,
        cluster: &str,
        started_by: &str,
        status: TaskStatus,
    ) -> SubstrateResult<Vec<Task>>;

    async fn describe_task_definition(&self, id: &str) -> SubstrateResult<TaskDefinition>;

    async fn describe_instance_group(&self, name: &str) -> SubstrateResult<InstanceGroup>;

    async fn set_desired_capacity(&self, group: &str, desired: usize) -> SubstrateResult<()>;

    /// Terminate one instance. With `decrement_desired` the group's desired
    /// capacity drops by one instead of launching a replacement.
    async fn terminate_instance(&self, instance_id: &str, decrement_desired: bool) -> SubstrateResult<()>;
}

fn default_status() -> String {
    "ACTIVE".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_pending_counts_unstarted_copies() {
        let deployment = |desired, running, pending| ServiceDeployment {
            id: "d".into(),
            task_definition: "web:1".into(),
            desired_count: desired,
            running_count: running,
            pending_count: pending,
        };

        assert_eq!(deployment(3, 1, 1).num_pending(), 1);
        assert_eq!(deployment(2, 2, 0).num_pending(), 0);
        assert_eq!(deployment(1, 2, 1).num_pending(), 0);
    }

    #[test]
    fn instance_json_defaults() {
        let instance: ContainerInstance = serde_json::from_str(r#"{"id": "i-1"}"#).unwrap();
        assert_eq!(instance.status, "ACTIVE");
        assert!(instance.agent_connected);
        assert!(instance.remaining_resources.is_empty());
    }

    #[test]
    fn task_status_uses_substrate_spelling() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Stopped).unwrap(),
            "\"STOPPED\""
        );
    }
}
