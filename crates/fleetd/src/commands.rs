//! One-shot subcommands: single scaler runs and record management.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, bail};
use fleetgrid_autoscale::{EnvironmentScaler, InMemorySubstrate, ScalerSettings};
use fleetgrid_core::FleetConfig;
use fleetgrid_placement::InstanceCatalog;
use fleetgrid_state::{CreateTaskRequest, EnvironmentRecord, JobType, StateStore};
use tracing::{info, warn};

/// Files fleetd reads and writes.
pub struct Paths {
    pub state: PathBuf,
    pub substrate: PathBuf,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<FleetConfig> {
    let config = match path {
        Some(path) => FleetConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => FleetConfig::default(),
    };
    info!(
        instance_id = %config.control_plane.instance_id,
        instance_types = config.instance_types.len(),
        "configuration loaded"
    );
    Ok(config)
}

pub fn open_store(paths: &Paths) -> anyhow::Result<Arc<StateStore>> {
    let store = StateStore::open(&paths.state)
        .with_context(|| format!("opening state store {}", paths.state.display()))?;
    Ok(Arc::new(store))
}

pub fn load_substrate(paths: &Paths) -> anyhow::Result<Arc<InMemorySubstrate>> {
    let substrate = InMemorySubstrate::load(&paths.substrate)
        .with_context(|| format!("loading substrate snapshot {}", paths.substrate.display()))?;
    Ok(Arc::new(substrate))
}

/// Write the substrate back so the next invocation sees the resized groups.
pub fn persist_substrate(paths: &Paths, substrate: &InMemorySubstrate) -> anyhow::Result<()> {
    substrate
        .save(&paths.substrate)
        .with_context(|| format!("writing substrate snapshot {}", paths.substrate.display()))?;
    info!(path = %paths.substrate.display(), "substrate snapshot written");
    Ok(())
}

pub fn build_scaler(
    config: &FleetConfig,
    substrate: Arc<InMemorySubstrate>,
    store: Arc<StateStore>,
) -> EnvironmentScaler {
    EnvironmentScaler::new(substrate, store.clone(), store, ScalerSettings::from_config(config))
        .with_catalog(InstanceCatalog::with_overrides(&config.instance_types))
}

pub async fn scale(
    config: &FleetConfig,
    paths: &Paths,
    environment: &str,
    persist: bool,
) -> anyhow::Result<()> {
    let store = open_store(paths)?;
    let substrate = load_substrate(paths)?;
    let scaler = build_scaler(config, substrate.clone(), store);

    let report = scaler.scale(environment).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if persist {
        persist_substrate(paths, &substrate)?;
    }
    Ok(())
}

pub fn register_environment(
    config: &FleetConfig,
    paths: &Paths,
    id: &str,
    name: Option<&str>,
    instance_type: &str,
) -> anyhow::Result<()> {
    let catalog = InstanceCatalog::with_overrides(&config.instance_types);
    if catalog.get(instance_type).is_none() {
        bail!("instance type '{instance_type}' is not valid");
    }

    let store = open_store(paths)?;
    let created_at = match store.get_environment(id)? {
        Some(existing) => {
            warn!(environment = %id, "environment already registered, updating");
            existing.created_at
        }
        None => epoch_secs(),
    };

    store.put_environment(&EnvironmentRecord {
        id: id.to_string(),
        name: name.unwrap_or(id).to_string(),
        instance_type: instance_type.to_string(),
        created_at,
    })?;
    info!(environment = %id, %instance_type, "environment registered");
    Ok(())
}

pub fn list_environments(paths: &Paths) -> anyhow::Result<()> {
    let store = open_store(paths)?;
    let environments = store.list_environments()?;
    if environments.is_empty() {
        println!("No environments registered.");
        return Ok(());
    }

    println!("{:<24} {:<24} INSTANCE TYPE", "ID", "NAME");
    for env in environments {
        println!("{:<24} {:<24} {}", env.id, env.name, env.instance_type);
    }
    Ok(())
}

pub fn enqueue_create_task(
    paths: &Paths,
    environment: &str,
    deploy: &str,
    copies: u32,
) -> anyhow::Result<()> {
    let store = open_store(paths)?;
    if store.get_environment(environment)?.is_none() {
        bail!("environment not found: {environment}");
    }

    let job = store.enqueue_job(
        JobType::CreateTask,
        &CreateTaskRequest {
            environment_id: environment.to_string(),
            deploy_id: deploy.to_string(),
            task_name: String::new(),
            copies,
        },
    )?;
    println!("{}", job.id);
    Ok(())
}

pub fn list_jobs(paths: &Paths) -> anyhow::Result<()> {
    let store = open_store(paths)?;
    let jobs: Vec<_> = store
        .list_jobs()?
        .into_iter()
        .filter(|job| job.status.is_unfinished())
        .collect();
    if jobs.is_empty() {
        println!("No unfinished jobs.");
        return Ok(());
    }

    println!("{:<28} {:<14} {:<12} REQUEST", "ID", "TYPE", "STATUS");
    for job in jobs {
        println!(
            "{:<28} {:<14} {:<12} {}",
            job.id,
            format!("{:?}", job.job_type),
            format!("{:?}", job.status),
            job.request
        );
    }
    Ok(())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_paths(dir: &tempfile::TempDir) -> Paths {
        Paths {
            state: dir.path().join("fleetd.redb"),
            substrate: dir.path().join("substrate.json"),
        }
    }

    #[test]
    fn register_rejects_unknown_instance_type() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_paths(&dir);
        let err = register_environment(&FleetConfig::default(), &paths, "env1", None, "x9.huge")
            .unwrap_err();
        assert!(err.to_string().contains("x9.huge"));
    }

    #[test]
    fn register_then_update_keeps_creation_time() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_paths(&dir);
        let config = FleetConfig::default();

        register_environment(&config, &paths, "env1", None, "t2.small").unwrap();
        let first = open_store(&paths).unwrap().get_environment("env1").unwrap().unwrap();
        assert_eq!(first.name, "env1");

        register_environment(&config, &paths, "env1", Some("Staging"), "m3.medium").unwrap();
        let second = open_store(&paths).unwrap().get_environment("env1").unwrap().unwrap();
        assert_eq!(second.name, "Staging");
        assert_eq!(second.instance_type, "m3.medium");
        assert_eq!(second.created_at, first.created_at);
    }

    #[test]
    fn jobs_need_a_registered_environment() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_paths(&dir);
        assert!(enqueue_create_task(&paths, "ghost", "api:1", 1).is_err());

        register_environment(&FleetConfig::default(), &paths, "env1", None, "t2.small").unwrap();
        enqueue_create_task(&paths, "env1", "api:1", 2).unwrap();
        let unfinished = open_store(&paths)
            .unwrap()
            .list_unfinished_jobs(JobType::CreateTask)
            .unwrap();
        assert_eq!(unfinished.len(), 1);
    }

    #[tokio::test]
    async fn scale_persists_the_resized_group() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_paths(&dir);
        std::fs::write(
            &paths.substrate,
            r#"{
                "clusters": {"default-env1": {"group": {"min_size": 0, "max_size": 4, "desired_capacity": 0}}},
                "task_definitions": {"api:1": {"id": "api:1", "containers": [{"name": "api", "cpu": 256, "memory": 256}]}}
            }"#,
        )
        .unwrap();

        let config = FleetConfig::default();
        register_environment(&config, &paths, "env1", None, "t2.small").unwrap();
        enqueue_create_task(&paths, "env1", "api:1", 1).unwrap();

        scale(&config, &paths, "env1", true).await.unwrap();

        let snapshot = load_substrate(&paths).unwrap().snapshot();
        assert_eq!(snapshot.clusters["default-env1"].group.desired_capacity, 1);
    }
}
