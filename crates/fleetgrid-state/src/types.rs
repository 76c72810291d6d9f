//! Domain types for the fleetgrid state store.
//!
//! These types represent the persisted environment records and queued jobs.
//! All types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

pub use fleetgrid_core::EnvironmentId;

/// Unique identifier for a job.
pub type JobId = String;

// ── Environment ───────────────────────────────────────────────────

/// An environment: one cluster plus the instance group that feeds it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentRecord {
    pub id: EnvironmentId,
    /// Human readable name.
    pub name: String,
    /// Instance type every instance in the group is launched with.
    pub instance_type: String,
    /// Unix timestamp (seconds) when this environment was registered.
    pub created_at: u64,
}

// ── Jobs ──────────────────────────────────────────────────────────

/// Kind of long-running mutation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    CreateTask,
    CreateService,
    UpdateService,
    DeleteService,
    CreateEnvironment,
    DeleteEnvironment,
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl JobStatus {
    /// Pending and in-progress jobs still have work left to do.
    pub fn is_unfinished(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::InProgress)
    }
}

/// A queued unit of asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    /// JSON-encoded request payload; its shape depends on `job_type`.
    pub request: String,
    /// Unix timestamp (seconds) when the job was enqueued.
    pub created_at: u64,
}

/// Request payload of a [`JobType::CreateTask`] job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateTaskRequest {
    pub environment_id: EnvironmentId,
    pub deploy_id: String,
    #[serde(default)]
    pub task_name: String,
    /// Number of task copies to start.
    #[serde(default = "default_copies")]
    pub copies: u32,
}

fn default_copies() -> u32 {
    1
}

impl Job {
    /// Decode the request payload of a create-task job.
    pub fn create_task_request(&self) -> Result<CreateTaskRequest, serde_json::Error> {
        serde_json::from_str(&self.request)
    }
}
