//! Environment scaler — one bin-packing run per call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use fleetgrid_core::{
    FleetConfig, IdGenerator, InstanceId, ProviderEligibility, UlidGenerator, cluster_name,
};
use fleetgrid_placement::{
    Allocator, InstanceCatalog, ResourceConsumer, ResourceProvider, ScalePlan, plan,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as RunLock;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::cache::DefinitionCache;
use crate::demand::DemandCollector;
use crate::error::{RequestError, ScalerError, ScalerResult};
use crate::removal::IdleTracker;
use crate::retry::{RetryPolicy, with_retry};
use crate::sources::{EnvironmentDirectory, JobQueue};
use crate::substrate::{ClusterSubstrate, InstanceGroup};
use crate::supply::collect_supply;

/// Report of one scaler run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalerRunInfo {
    pub run_id: String,
    pub environment_id: String,
    /// Group desired capacity before anything was changed.
    pub scale_before_run: usize,
    /// Providers needed to host all placeable demand.
    pub desired_scale_after_run: usize,
    /// Capacity requested from the group after removals and clamping.
    pub target_capacity: usize,
    /// Group desired capacity read back after the run.
    pub actual_scale_after_run: usize,
    pub unused_resource_providers: usize,
    pub removed_instances: Vec<InstanceId>,
    pub pending_resources: Vec<ResourceConsumer>,
    pub resource_providers: Vec<ResourceProvider>,
}

/// Tunables for [`EnvironmentScaler`].
#[derive(Debug, Clone)]
pub struct ScalerSettings {
    /// Control plane identity: cluster name prefix and task starter.
    pub instance_id: String,
    pub retry: RetryPolicy,
    pub eligibility: ProviderEligibility,
    pub idle_runs_before_removal: u32,
    pub terminate_idle_instances: bool,
}

impl Default for ScalerSettings {
    fn default() -> Self {
        Self::from_config(&FleetConfig::default())
    }
}

impl ScalerSettings {
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            instance_id: config.control_plane.instance_id.clone(),
            retry: RetryPolicy::from(&config.retry),
            eligibility: config.scaler.provider_eligibility,
            idle_runs_before_removal: config.scaler.idle_runs_before_removal,
            terminate_idle_instances: config.scaler.terminate_idle_instances,
        }
    }
}

/// Sizes environment instance groups to their demand.
///
/// Runs for one environment are serialized; a second call while a run is
/// in progress fails with [`ScalerError::AlreadyRunning`]. Runs for
/// different environments proceed in parallel.
pub struct EnvironmentScaler {
    substrate: Arc<dyn ClusterSubstrate>,
    jobs: Arc<dyn JobQueue>,
    environments: Arc<dyn EnvironmentDirectory>,
    catalog: InstanceCatalog,
    settings: ScalerSettings,
    ids: Arc<dyn IdGenerator>,
    idle: IdleTracker,
    /// environment → run token.
    locks: Mutex<HashMap<String, Arc<RunLock<()>>>>,
}

impl EnvironmentScaler {
    pub fn new(
        substrate: Arc<dyn ClusterSubstrate>,
        jobs: Arc<dyn JobQueue>,
        environments: Arc<dyn EnvironmentDirectory>,
        settings: ScalerSettings,
    ) -> Self {
        Self {
            substrate,
            jobs,
            environments,
            catalog: InstanceCatalog::builtin(),
            idle: IdleTracker::new(settings.idle_runs_before_removal),
            settings,
            ids: Arc::new(UlidGenerator),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_catalog(mut self, catalog: InstanceCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Replace the generator used for run ids.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    fn run_lock(&self, environment: &str) -> Arc<RunLock<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(environment.to_string())
            .or_default()
            .clone()
    }

    /// Drop the run token for `environment` unless another caller holds it.
    fn release_lock(&self, environment: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(environment)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(environment);
        }
    }

    /// Run the scaler once for `environment`.
    pub async fn scale(&self, environment: &str) -> ScalerResult<ScalerRunInfo> {
        let guard = self
            .run_lock(environment)
            .try_lock_owned()
            .map_err(|_| ScalerError::AlreadyRunning(environment.to_string()))?;

        let run_id = self.ids.next_id();
        let span = info_span!("scale", run = %run_id, environment = %environment);
        let result = self.run(environment, run_id).instrument(span).await;

        drop(guard);
        self.release_lock(environment);
        result
    }

    async fn run(&self, environment: &str, run_id: String) -> ScalerResult<ScalerRunInfo> {
        let record = self
            .environments
            .environment(environment)
            .await?
            .ok_or_else(|| ScalerError::EnvironmentNotFound(environment.to_string()))?;

        let new_instance = self
            .catalog
            .get(&record.instance_type)
            .cloned()
            .ok_or_else(|| ScalerError::UnknownInstanceType {
                environment: environment.to_string(),
                instance_type: record.instance_type.clone(),
            })?;

        let cluster = cluster_name(&self.settings.instance_id, environment);
        info!(%cluster, instance_type = %record.instance_type, "scaler run started");

        let mut cache = DefinitionCache::new();
        let demand = DemandCollector {
            substrate: self.substrate.as_ref(),
            jobs: self.jobs.as_ref(),
            retry: &self.settings.retry,
            started_by: &self.settings.instance_id,
        };
        let (consumers, providers) = tokio::try_join!(
            demand.collect(environment, &cluster, &mut cache),
            collect_supply(self.substrate.as_ref(), &self.settings.retry, &cluster),
        )?;

        let allocation = Allocator::new(new_instance)
            .with_eligibility(self.settings.eligibility)
            .allocate(&providers, &consumers);
        for error in &allocation.errors {
            warn!(error = %error, "placement failed");
        }
        let plan = plan(&allocation);
        debug!(
            axis = %allocation.axis,
            consumers = consumers.len(),
            providers = providers.len(),
            desired = plan.desired_scale,
            new_instances = plan.new_instances,
            unused = plan.unused.len(),
            pending = plan.pending.len(),
            "allocation planned"
        );

        let applied = self.apply(environment, &cluster, &plan).await?;

        info!(
            from = applied.before,
            to = applied.actual,
            desired = plan.desired_scale,
            removed = applied.removed.len(),
            pending = plan.pending.len(),
            "scaler run finished"
        );

        Ok(ScalerRunInfo {
            run_id,
            environment_id: environment.to_string(),
            scale_before_run: applied.before,
            desired_scale_after_run: plan.desired_scale,
            target_capacity: applied.target,
            actual_scale_after_run: applied.actual,
            unused_resource_providers: plan.unused.len(),
            removed_instances: applied.removed,
            pending_resources: plan.pending,
            resource_providers: allocation.providers,
        })
    }

    async fn describe_group(&self, cluster: &str) -> Result<InstanceGroup, RequestError> {
        let substrate = self.substrate.as_ref();
        with_retry(&self.settings.retry, "describe_instance_group", move || {
            substrate.describe_instance_group(cluster)
        })
        .await
    }

    /// Reconcile the instance group with the plan.
    async fn apply(&self, environment: &str, cluster: &str, plan: &ScalePlan) -> ScalerResult<Applied> {
        let group = self
            .describe_group(cluster)
            .await
            .map_err(|source| ScalerError::Collection {
                what: "instance group",
                source,
            })?;
        let before = group.desired_capacity;

        let removable = self.idle.observe(environment, &plan.unused);
        let removed = if self.settings.terminate_idle_instances {
            // Each removal decrements the current capacity before the resize,
            // so neither the current nor the planned size may drop below min.
            let room = before.min(plan.desired_scale).saturating_sub(group.min_size);
            removable.into_iter().take(room).collect()
        } else {
            Vec::new()
        };

        let wanted = plan.desired_scale - removed.len();
        let target = wanted.clamp(group.min_size, group.max_size.max(group.min_size));
        if target != wanted {
            warn!(
                wanted,
                target,
                min = group.min_size,
                max = group.max_size,
                "desired scale clamped to instance group bounds"
            );
        }

        let substrate = self.substrate.as_ref();
        let retry = &self.settings.retry;

        let mut current = before;
        for instance_id in &removed {
            info!(instance = %instance_id, "terminating idle instance");
            let id = instance_id.as_str();
            with_retry(retry, "terminate_instance", move || {
                substrate.terminate_instance(id, true)
            })
            .await
            .map_err(|source| ScalerError::Apply {
                action: format!("terminate instance {instance_id}"),
                source,
            })?;
            current = current.saturating_sub(1);
        }
        self.idle.forget(environment, &removed);

        if current != target {
            info!(from = current, to = target, "setting desired capacity");
            with_retry(retry, "set_desired_capacity", move || {
                substrate.set_desired_capacity(cluster, target)
            })
            .await
            .map_err(|source| ScalerError::Apply {
                action: format!("set desired capacity of {cluster} to {target}"),
                source,
            })?;
        } else {
            debug!(desired = target, "instance group already at desired scale");
        }

        let actual = self
            .describe_group(cluster)
            .await
            .map_err(|source| ScalerError::Apply {
                action: format!("read back instance group {cluster}"),
                source,
            })?
            .desired_capacity;

        Ok(Applied {
            before,
            target,
            actual,
            removed,
        })
    }
}

struct Applied {
    before: usize,
    target: usize,
    actual: usize,
    removed: Vec<InstanceId>,
}
