//! fleetgrid-core — configuration and shared types.
//!
//! Everything here is synchronous and dependency-light so that every other
//! fleetgrid crate can pull it in without dragging a runtime along.

pub mod config;
pub mod ids;
pub mod types;

pub use config::{
    ConfigError, ConfigResult, ControlPlaneConfig, FleetConfig, InstanceTypeConfig,
    ProviderEligibility, RetryConfig, ScalerConfig, parse_duration,
};
pub use ids::{IdGenerator, SequentialIds, UlidGenerator};
pub use types::*;
