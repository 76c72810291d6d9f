//! In-memory cluster substrate.
//!
//! Holds a [`SubstrateSnapshot`] (loadable from JSON), applies mutations to
//! it and records them in order. Failures can be queued per operation to
//! exercise retry and abort paths.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SubstrateError, SubstrateResult};
use crate::substrate::*;

/// Everything the substrate knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstrateSnapshot {
    /// Cluster name → cluster contents.
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterState>,
    /// Task definition id → definition.
    #[serde(default)]
    pub task_definitions: BTreeMap<String, TaskDefinition>,
}

/// One cluster and its instance group (which shares the cluster's name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    #[serde(default)]
    pub instances: Vec<ContainerInstance>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    pub group: GroupBounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBounds {
    pub min_size: usize,
    pub max_size: usize,
    pub desired_capacity: usize,
}

/// A mutation the substrate accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    SetDesiredCapacity { group: String, desired: usize },
    TerminateInstance { instance_id: String, decrement_desired: bool },
}

#[derive(Default)]
pub struct InMemorySubstrate {
    state: Mutex<SubstrateSnapshot>,
    faults: Mutex<HashMap<&'static str, VecDeque<SubstrateError>>>,
    mutations: Mutex<Vec<Mutation>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemorySubstrate {
    pub fn new(snapshot: SubstrateSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content).map_err(std::io::Error::other)
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot()).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn snapshot(&self) -> SubstrateSnapshot {
        lock(&self.state).clone()
    }

    /// Mutations applied so far, oldest first.
    pub fn mutations(&self) -> Vec<Mutation> {
        lock(&self.mutations).clone()
    }

    /// Make the next call to `operation` fail with `error`. Queued failures
    /// are consumed in order.
    pub fn fail_next(&self, operation: &'static str, error: SubstrateError) {
        lock(&self.faults).entry(operation).or_default().push_back(error);
    }

    /// Edit the snapshot in place.
    pub fn update(&self, f: impl FnOnce(&mut SubstrateSnapshot)) {
        f(&mut lock(&self.state));
    }

    fn inject(&self, operation: &'static str) -> SubstrateResult<()> {
        match lock(&self.faults).get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => {
                debug!(operation, error = %err, "injected substrate failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn with_cluster<T>(&self, cluster: &str, f: impl FnOnce(&mut ClusterState) -> SubstrateResult<T>) -> SubstrateResult<T> {
        let mut state = lock(&self.state);
        let cluster_state = state
            .clusters
            .get_mut(cluster)
            .ok_or_else(|| SubstrateError::NotFound(format!("cluster {cluster}")))?;
        f(cluster_state)
    }

    fn record(&self, mutation: Mutation) {
        lock(&self.mutations).push(mutation);
    }
}

#[async_trait]
impl ClusterSubstrate for InMemorySubstrate {
    async fn list_active_instances(&self, cluster: &str) -> SubstrateResult<Vec<ContainerInstance>> {
        self.inject("list_active_instances")?;
        self.with_cluster(cluster, |c| {
            Ok(c.instances
                .iter()
                .filter(|i| i.status == "ACTIVE")
                .cloned()
                .collect())
        })
    }

    async fn list_services(&self, cluster: &str) -> SubstrateResult<Vec<Service>> {
        self.inject("list_services")?;
        self.with_cluster(cluster, |c| Ok(c.services.clone()))
    }

    async fn list_tasks(
        &self,
        cluster: &str,
        started_by: &str,
        status: TaskStatus,
    ) -> SubstrateResult<Vec<Task>> {
        self.inject("list_tasks")?;
        self.with_cluster(cluster, |c| {
            Ok(c.tasks
                .iter()
                .filter(|t| t.started_by == started_by && t.desired_status == status)
                .cloned()
                .collect())
        })
    }

    async fn describe_task_definition(&self, id: &str) -> SubstrateResult<TaskDefinition> {
        self.inject("describe_task_definition")?;
        lock(&self.state)
            .task_definitions
            .get(id)
            .cloned()
            .ok_or_else(|| SubstrateError::NotFound(format!("task definition {id}")))
    }

    async fn describe_instance_group(&self, name: &str) -> SubstrateResult<InstanceGroup> {
        self.inject("describe_instance_group")?;
        self.with_cluster(name, |c| {
            Ok(InstanceGroup {
                name: name.to_string(),
                min_size: c.group.min_size,
                max_size: c.group.max_size,
                desired_capacity: c.group.desired_capacity,
            })
        })
    }

    async fn set_desired_capacity(&self, group: &str, desired: usize) -> SubstrateResult<()> {
        self.inject("set_desired_capacity")?;
        self.with_cluster(group, |c| {
            if desired < c.group.min_size || desired > c.group.max_size {
                return Err(SubstrateError::Validation(format!(
                    "desired capacity {desired} outside [{}, {}]",
                    c.group.min_size, c.group.max_size
                )));
            }
            c.group.desired_capacity = desired;
            Ok(())
        })?;
        self.record(Mutation::SetDesiredCapacity {
            group: group.to_string(),
            desired,
        });
        Ok(())
    }

    async fn terminate_instance(&self, instance_id: &str, decrement_desired: bool) -> SubstrateResult<()> {
        self.inject("terminate_instance")?;
        {
            let mut state = lock(&self.state);
            let cluster = state
                .clusters
                .values_mut()
                .find(|c| c.instances.iter().any(|i| i.id == instance_id))
                .ok_or_else(|| SubstrateError::NotFound(format!("instance {instance_id}")))?;

            if decrement_desired {
                if cluster.group.desired_capacity <= cluster.group.min_size {
                    return Err(SubstrateError::Validation(format!(
                        "terminating {instance_id} would drop below min size {}",
                        cluster.group.min_size
                    )));
                }
                cluster.group.desired_capacity -= 1;
            }
            cluster.instances.retain(|i| i.id != instance_id);
        }
        self.record(Mutation::TerminateInstance {
            instance_id: instance_id.to_string(),
            decrement_desired,
        });
        Ok(())
    }
}
