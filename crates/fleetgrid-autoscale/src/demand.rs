//! Demand collection.
//!
//! Three sources feed the consumer list for one environment:
//!
//! - service deployments with copies the substrate has not started yet
//! - tasks this control plane started that are running or stopping
//! - create-task jobs that are still pending or in progress
//!
//! Queued jobs are counted in full even if some of their copies already
//! run, which over-counts rather than under-provisions. Any failure aborts
//! the whole collection.

use fleetgrid_placement::ResourceConsumer;
use fleetgrid_state::JobType;
use tracing::debug;

use crate::cache::DefinitionCache;
use crate::error::{RequestError, ScalerError, ScalerResult};
use crate::retry::{RetryPolicy, with_retry};
use crate::sources::JobQueue;
use crate::substrate::{ClusterSubstrate, TaskStatus};

/// Collects resource consumers for one run.
pub struct DemandCollector<'a> {
    pub substrate: &'a dyn ClusterSubstrate,
    pub jobs: &'a dyn JobQueue,
    pub retry: &'a RetryPolicy,
    /// Control plane identity stamped on tasks it starts.
    pub started_by: &'a str,
}

fn collection(what: &'static str) -> impl FnOnce(RequestError) -> ScalerError {
    move |source| ScalerError::Collection { what, source }
}

impl DemandCollector<'_> {
    /// All consumers for `environment`, whose cluster is `cluster`.
    pub async fn collect(
        &self,
        environment: &str,
        cluster: &str,
        cache: &mut DefinitionCache,
    ) -> ScalerResult<Vec<ResourceConsumer>> {
        let mut consumers = self.service_consumers(cluster, cache).await?;
        let services = consumers.len();

        consumers.extend(self.task_consumers(cluster, cache).await?);
        let tasks = consumers.len() - services;

        consumers.extend(self.job_consumers(environment, cache).await?);
        let jobs = consumers.len() - services - tasks;

        debug!(
            %cluster,
            services,
            tasks,
            jobs,
            definitions = cache.len(),
            "demand collected"
        );
        Ok(consumers)
    }

    /// One consumer per copy a service deployment still has to start.
    pub async fn service_consumers(
        &self,
        cluster: &str,
        cache: &mut DefinitionCache,
    ) -> ScalerResult<Vec<ResourceConsumer>> {
        let substrate = self.substrate;
        let services = with_retry(self.retry, "list_services", move || {
            substrate.list_services(cluster)
        })
        .await
        .map_err(collection("services"))?;

        let mut consumers = Vec::new();
        for service in &services {
            for deployment in &service.deployments {
                let pending = deployment.num_pending();
                if pending == 0 {
                    continue;
                }

                let footprint = cache
                    .footprint(self.substrate, self.retry, &deployment.task_definition)
                    .await
                    .map_err(collection("task definitions"))?;
                debug!(
                    service = %service.name,
                    deployment = %deployment.id,
                    pending,
                    "pending service copies"
                );

                let label = format!("service:{}", service.name);
                consumers.extend((0..pending).map(|_| footprint.relabel(label.clone())));
            }
        }
        Ok(consumers)
    }

    /// One consumer per running or stopping task started by this control
    /// plane.
    pub async fn task_consumers(
        &self,
        cluster: &str,
        cache: &mut DefinitionCache,
    ) -> ScalerResult<Vec<ResourceConsumer>> {
        let mut consumers = Vec::new();

        for status in [TaskStatus::Running, TaskStatus::Stopped] {
            let substrate = self.substrate;
            let started_by = self.started_by;
            let tasks = with_retry(self.retry, "list_tasks", move || {
                substrate.list_tasks(cluster, started_by, status)
            })
            .await
            .map_err(collection("tasks"))?;

            for task in tasks {
                let footprint = cache
                    .footprint(self.substrate, self.retry, &task.task_definition)
                    .await
                    .map_err(collection("task definitions"))?;
                consumers.push(footprint.relabel(format!("task:{}", task.id)));
            }
        }
        Ok(consumers)
    }

    /// One consumer per requested copy of every unfinished create-task job
    /// targeting `environment`.
    pub async fn job_consumers(
        &self,
        environment: &str,
        cache: &mut DefinitionCache,
    ) -> ScalerResult<Vec<ResourceConsumer>> {
        let jobs = self.jobs.unfinished_jobs(JobType::CreateTask).await?;

        let mut consumers = Vec::new();
        for job in &jobs {
            let request = job
                .create_task_request()
                .map_err(|source| ScalerError::MalformedJob {
                    job_id: job.id.clone(),
                    source,
                })?;
            if request.environment_id != environment {
                continue;
            }

            let footprint = cache
                .footprint(self.substrate, self.retry, &request.deploy_id)
                .await
                .map_err(collection("task definitions"))?;
            debug!(job = %job.id, copies = request.copies, "queued task copies");

            let label = format!("job:{}", job.id);
            consumers.extend((0..request.copies).map(|_| footprint.relabel(label.clone())));
        }
        Ok(consumers)
    }
}

#[cfg(test)]
mod tests {
    use fleetgrid_state::{CreateTaskRequest, JobStatus, StateStore};

    use super::*;
    use crate::error::SubstrateError;
    use crate::memory::{ClusterState, GroupBounds, InMemorySubstrate};
    use crate::substrate::*;

    const CLUSTER: &str = "default-env1";

    fn definition(id: &str, cpu: u64, memory_mib: u64, host_port: u16) -> TaskDefinition {
        TaskDefinition {
            id: id.into(),
            containers: vec![ContainerDefinition {
                name: "app".into(),
                cpu,
                memory: Some(memory_mib),
                memory_reservation: None,
                port_mappings: vec![PortMapping {
                    container_port: 8080,
                    host_port,
                }],
            }],
        }
    }

    fn deployment(id: &str, desired: u32, running: u32, pending: u32) -> ServiceDeployment {
        ServiceDeployment {
            id: id.into(),
            task_definition: "web:1".into(),
            desired_count: desired,
            running_count: running,
            pending_count: pending,
        }
    }

    fn task(id: &str, started_by: &str, status: TaskStatus) -> Task {
        Task {
            id: id.into(),
            task_definition: "batch:1".into(),
            started_by: started_by.into(),
            desired_status: status,
        }
    }

    fn substrate() -> InMemorySubstrate {
        let substrate = InMemorySubstrate::default();
        substrate.update(|s| {
            s.task_definitions
                .insert("web:1".into(), definition("web:1", 256, 512, 80));
            s.task_definitions
                .insert("batch:1".into(), definition("batch:1", 128, 256, 0));
            s.clusters.insert(
                CLUSTER.into(),
                ClusterState {
                    instances: vec![],
                    services: vec![],
                    tasks: vec![],
                    group: GroupBounds {
                        min_size: 0,
                        max_size: 10,
                        desired_capacity: 0,
                    },
                },
            );
        });
        substrate
    }

    fn collector<'a>(substrate: &'a InMemorySubstrate, store: &'a StateStore, retry: &'a RetryPolicy) -> DemandCollector<'a> {
        DemandCollector {
            substrate,
            jobs: store,
            retry,
            started_by: "default",
        }
    }

    #[tokio::test]
    async fn services_contribute_only_unstarted_copies() {
        let substrate = substrate();
        substrate.update(|s| {
            let cluster = s.clusters.get_mut(CLUSTER).unwrap();
            cluster.services = vec![
                Service {
                    name: "api".into(),
                    deployments: vec![deployment("d-1", 3, 1, 1)],
                },
                Service {
                    name: "steady".into(),
                    deployments: vec![deployment("d-2", 2, 2, 0)],
                },
            ];
        });
        let store = StateStore::open_in_memory().unwrap();
        let retry = RetryPolicy::default();
        let mut cache = DefinitionCache::new();

        let consumers = collector(&substrate, &store, &retry)
            .service_consumers(CLUSTER, &mut cache)
            .await
            .unwrap();

        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].id, "service:api");
        assert_eq!(consumers[0].cpu, 256);
    }

    #[tokio::test]
    async fn tasks_by_this_control_plane_running_or_stopping() {
        let substrate = substrate();
        substrate.update(|s| {
            s.clusters.get_mut(CLUSTER).unwrap().tasks = vec![
                task("t-1", "default", TaskStatus::Running),
                task("t-2", "default", TaskStatus::Stopped),
                task("t-3", "ecs-service", TaskStatus::Running),
            ];
        });
        let store = StateStore::open_in_memory().unwrap();
        let retry = RetryPolicy::default();
        let mut cache = DefinitionCache::new();

        let consumers = collector(&substrate, &store, &retry)
            .task_consumers(CLUSTER, &mut cache)
            .await
            .unwrap();

        let ids: Vec<_> = consumers.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["task:t-1", "task:t-2"]);
        assert_eq!(cache.lookups(), 1);
    }

    #[tokio::test]
    async fn in_progress_job_counts_every_requested_copy() {
        let substrate = substrate();
        let store = StateStore::open_in_memory().unwrap();
        let job = store
            .enqueue_job(
                JobType::CreateTask,
                &CreateTaskRequest {
                    environment_id: "env1".into(),
                    deploy_id: "batch:1".into(),
                    task_name: "nightly".into(),
                    copies: 3,
                },
            )
            .unwrap();
        store.set_job_status(&job.id, JobStatus::InProgress).unwrap();

        // Another environment's job and a finished job are ignored.
        store
            .enqueue_job(
                JobType::CreateTask,
                &CreateTaskRequest {
                    environment_id: "env2".into(),
                    deploy_id: "batch:1".into(),
                    task_name: String::new(),
                    copies: 5,
                },
            )
            .unwrap();
        let finished = store
            .enqueue_job(
                JobType::CreateTask,
                &CreateTaskRequest {
                    environment_id: "env1".into(),
                    deploy_id: "batch:1".into(),
                    task_name: String::new(),
                    copies: 4,
                },
            )
            .unwrap();
        store.set_job_status(&finished.id, JobStatus::Completed).unwrap();

        let retry = RetryPolicy::default();
        let mut cache = DefinitionCache::new();
        let consumers = collector(&substrate, &store, &retry)
            .job_consumers("env1", &mut cache)
            .await
            .unwrap();

        assert_eq!(consumers.len(), 3);
        assert!(consumers.iter().all(|c| c.id == format!("job:{}", job.id)));
    }

    #[tokio::test]
    async fn malformed_job_aborts_collection() {
        let substrate = substrate();
        let store = StateStore::open_in_memory().unwrap();
        store.enqueue_job(JobType::CreateTask, &"not a request").unwrap();

        let retry = RetryPolicy::default();
        let mut cache = DefinitionCache::new();
        let err = collector(&substrate, &store, &retry)
            .job_consumers("env1", &mut cache)
            .await
            .unwrap_err();
        assert!(matches!(err, ScalerError::MalformedJob { .. }));
    }

    #[tokio::test]
    async fn substrate_failure_aborts_collection() {
        let substrate = substrate();
        substrate.fail_next("list_tasks", SubstrateError::Other("boom".into()));
        let store = StateStore::open_in_memory().unwrap();
        let retry = RetryPolicy::default();
        let mut cache = DefinitionCache::new();

        let err = collector(&substrate, &store, &retry)
            .collect("env1", CLUSTER, &mut cache)
            .await
            .unwrap_err();
        assert!(matches!(err, ScalerError::Collection { what: "tasks", .. }));
    }
}
