//! fleetgrid-autoscale — sizes each environment's instance group to its work.
//!
//! A scaler run re-reads the world from scratch: demand from service
//! deployments, running tasks and queued task jobs; supply from the
//! cluster's active instances. The two lists go through the bin-packing
//! allocator and the resulting plan is applied to the instance group.
//!
//! # Run
//!
//! ```text
//! lock(environment)            one run per environment at a time
//! ├─ demand ─┐                 collected concurrently
//! ├─ supply ─┘
//! ├─ allocate + plan           pure, see fleetgrid-placement
//! ├─ idle tracking             unused N runs in a row → removable
//! ├─ terminate removable       with desired-capacity decrement
//! ├─ set desired capacity      clamped to [min, max]
//! └─ report                    ScalerRunInfo
//! ```
//!
//! Any collection failure aborts the run before the instance group is
//! touched. Consumers that cannot fit an empty instance are reported in the
//! run info and do not abort the run.

pub mod cache;
pub mod demand;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod removal;
pub mod retry;
pub mod scaler;
pub mod sources;
pub mod substrate;
pub mod supply;

pub use dispatcher::Dispatcher;
pub use error::{ErrorKind, RequestError, ScalerError, ScalerResult, SubstrateError, SubstrateResult};
pub use memory::{InMemorySubstrate, Mutation, SubstrateSnapshot};
pub use removal::IdleTracker;
pub use retry::{RetryPolicy, with_retry};
pub use scaler::{EnvironmentScaler, ScalerRunInfo, ScalerSettings};
pub use sources::{EnvironmentDirectory, JobQueue};
pub use substrate::*;
