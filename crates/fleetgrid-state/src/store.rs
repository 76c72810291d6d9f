//! StateStore — redb-backed state persistence for fleetgrid.
//!
//! Provides typed CRUD operations over environments and jobs. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use fleetgrid_core::{IdGenerator, UlidGenerator};
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    ids: Arc<dyn IdGenerator>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            ids: Arc::new(UlidGenerator),
        };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            ids: Arc::new(UlidGenerator),
        };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Replace the generator used to mint job ids.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put<T: Serialize>(
        &self,
        table_def: JsonTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        table_def: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(
        &self,
        table_def: JsonTable,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let value: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(value);
        }
        Ok(results)
    }

    fn delete(&self, table_def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Environments ───────────────────────────────────────────────

    /// Insert or update an environment record.
    pub fn put_environment(&self, env: &EnvironmentRecord) -> StateResult<()> {
        self.put(ENVIRONMENTS, &env.id, env)?;
        debug!(environment = %env.id, "environment stored");
        Ok(())
    }

    /// Get an environment by id.
    pub fn get_environment(&self, id: &str) -> StateResult<Option<EnvironmentRecord>> {
        self.get(ENVIRONMENTS, id)
    }

    /// List all environments.
    pub fn list_environments(&self) -> StateResult<Vec<EnvironmentRecord>> {
        self.list(ENVIRONMENTS)
    }

    /// Delete an environment by id. Returns true if it existed.
    pub fn delete_environment(&self, id: &str) -> StateResult<bool> {
        self.delete(ENVIRONMENTS, id)
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Enqueue a new pending job and return its id.
    pub fn enqueue_job<R: Serialize>(&self, job_type: JobType, request: &R) -> StateResult<Job> {
        let request = serde_json::to_string(request).map_err(map_err!(Serialize))?;
        let job = Job {
            id: self.ids.next_id(),
            job_type,
            status: JobStatus::Pending,
            request,
            created_at: epoch_secs(),
        };
        self.put_job(&job)?;
        debug!(job = %job.id, ?job_type, "job enqueued");
        Ok(job)
    }

    /// Insert or update a job.
    pub fn put_job(&self, job: &Job) -> StateResult<()> {
        self.put(JOBS, &job.id, job)
    }

    /// Get a job by id.
    pub fn get_job(&self, id: &str) -> StateResult<Option<Job>> {
        self.get(JOBS, id)
    }

    /// List all jobs.
    pub fn list_jobs(&self) -> StateResult<Vec<Job>> {
        self.list(JOBS)
    }

    /// List pending and in-progress jobs of one type.
    pub fn list_unfinished_jobs(&self, job_type: JobType) -> StateResult<Vec<Job>> {
        Ok(self
            .list_jobs()?
            .into_iter()
            .filter(|job| job.job_type == job_type && job.status.is_unfinished())
            .collect())
    }

    /// Move a job to a new status.
    pub fn set_job_status(&self, id: &str, status: JobStatus) -> StateResult<()> {
        let mut job = self
            .get_job(id)?
            .ok_or_else(|| StateError::NotFound(format!("job {id}")))?;
        job.status = status;
        self.put_job(&job)?;
        debug!(job = %id, ?status, "job status updated");
        Ok(())
    }

    /// Delete a job by id. Returns true if it existed.
    pub fn delete_job(&self, id: &str) -> StateResult<bool> {
        self.delete(JOBS, id)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
