//! Scaler error types.

use fleetgrid_state::StateError;
use thiserror::Error;

/// Failure reported by the cluster substrate for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubstrateError {
    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("substrate error: {0}")]
    Other(String),
}

impl SubstrateError {
    /// Transient failures are worth retrying; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SubstrateError::Throttled(_) | SubstrateError::Unavailable(_)
        )
    }
}

pub type SubstrateResult<T> = Result<T, SubstrateError>;

/// Outcome of a substrate call after retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error(transparent)]
    Substrate(#[from] SubstrateError),

    #[error("request timed out: {operation} failed {attempts} times, last error: {last_error}")]
    Timeout {
        operation: String,
        attempts: u32,
        last_error: SubstrateError,
    },
}

/// Coarse classification of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A substrate or job-queue read failed. Nothing was mutated.
    CollectionFailure,
    /// Resizing the group or terminating an instance failed. Mutations
    /// already issued are not rolled back.
    ApplyFailure,
    /// Another run for the same environment is in progress.
    Rejected,
    /// The environment or its instance type is unknown. Nothing was mutated.
    Misconfigured,
}

/// Errors that end a scaler run.
#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("environment not found: {0}")]
    EnvironmentNotFound(String),

    #[error("environment {environment}: instance type '{instance_type}' is not valid")]
    UnknownInstanceType {
        environment: String,
        instance_type: String,
    },

    #[error("a scaler run for environment {0} is already in progress")]
    AlreadyRunning(String),

    #[error("failed to collect {what}: {source}")]
    Collection {
        what: &'static str,
        #[source]
        source: RequestError,
    },

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("malformed request in job {job_id}: {source}")]
    MalformedJob {
        job_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to {action}: {source}")]
    Apply {
        action: String,
        #[source]
        source: RequestError,
    },
}

impl ScalerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScalerError::EnvironmentNotFound(_) | ScalerError::UnknownInstanceType { .. } => {
                ErrorKind::Misconfigured
            }
            ScalerError::AlreadyRunning(_) => ErrorKind::Rejected,
            ScalerError::Collection { .. }
            | ScalerError::State(_)
            | ScalerError::MalformedJob { .. } => ErrorKind::CollectionFailure,
            ScalerError::Apply { .. } => ErrorKind::ApplyFailure,
        }
    }

    /// True when the underlying substrate call ran out of retry budget.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ScalerError::Collection {
                source: RequestError::Timeout { .. },
                ..
            } | ScalerError::Apply {
                source: RequestError::Timeout { .. },
                ..
            }
        )
    }
}

pub type ScalerResult<T> = Result<T, ScalerError>;
