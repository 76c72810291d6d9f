//! Persisted collaborators the scaler reads: the job queue and the
//! environment directory. Both are implemented by [`StateStore`].

use async_trait::async_trait;
use fleetgrid_state::{EnvironmentId, EnvironmentRecord, Job, JobType, StateResult, StateStore};

/// Read access to queued jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Jobs of `job_type` that are pending or in progress.
    async fn unfinished_jobs(&self, job_type: JobType) -> StateResult<Vec<Job>>;
}

/// Lookup of registered environments.
#[async_trait]
pub trait EnvironmentDirectory: Send + Sync {
    async fn environment(&self, id: &str) -> StateResult<Option<EnvironmentRecord>>;

    async fn environment_ids(&self) -> StateResult<Vec<EnvironmentId>>;
}

#[async_trait]
impl JobQueue for StateStore {
    async fn unfinished_jobs(&self, job_type: JobType) -> StateResult<Vec<Job>> {
        self.list_unfinished_jobs(job_type)
    }
}

#[async_trait]
impl EnvironmentDirectory for StateStore {
    async fn environment(&self, id: &str) -> StateResult<Option<EnvironmentRecord>> {
        self.get_environment(id)
    }

    async fn environment_ids(&self) -> StateResult<Vec<EnvironmentId>> {
        Ok(self
            .list_environments()?
            .into_iter()
            .map(|env| env.id)
            .collect())
    }
}
