//! fleetgrid placement — bin-packing of workloads onto compute instances.
//!
//! This crate is pure and synchronous. It knows nothing about the cluster
//! substrate; callers hand it the current providers and consumers and get
//! back a provider set that covers all placeable demand.
//!
//! # Components
//!
//! - **`resource`** — `ResourceProvider` / `ResourceConsumer` and the fit rule
//! - **`catalog`** — instance-type sizes for hypothetical new instances
//! - **`allocator`** — two-pass first-fit allocation
//! - **`planner`** — converts an allocation into a target instance count

pub mod allocator;
pub mod catalog;
pub mod planner;
pub mod resource;

pub use allocator::{Allocation, Allocator, Placement, PlacementError, SortAxis};
pub use catalog::{InstanceCatalog, InstanceSpec, RESERVED_PORTS};
pub use planner::{ScalePlan, plan};
pub use resource::{NEW_INSTANCE_ID, NoRoom, ResourceConsumer, ResourceProvider};
