//! fleetd.toml configuration parser.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults documented on each field. Durations are written as strings
//! (`"500ms"`, `"30s"`, `"5m"`, `"1h"`, or bare seconds) and are checked
//! once at load time by [`FleetConfig::validate`].

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid instance type {name}: {reason}")]
    InvalidInstanceType { name: String, reason: String },

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    pub control_plane: ControlPlaneConfig,
    pub scaler: ScalerConfig,
    pub retry: RetryConfig,
    /// Extra or overriding instance sizes, keyed by instance type name.
    pub instance_types: BTreeMap<String, InstanceTypeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Identity of this control plane. Prefixes cluster names and is the
    /// "started by" marker on tasks it launches directly.
    pub instance_id: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            instance_id: "default".to_string(),
        }
    }
}

/// Which existing instances the allocator may place consumers on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderEligibility {
    /// Every active instance, regardless of agent connectivity.
    #[default]
    AllActive,
    /// Only instances whose agent is currently connected.
    ConnectedOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScalerConfig {
    /// Delay applied by `schedule_run` before a scheduled run fires.
    pub grace_period: String,
    /// Period between full reconciliation sweeps in `fleetd run`.
    pub run_interval: String,
    /// Consecutive idle runs before an instance may be terminated.
    pub idle_runs_before_removal: u32,
    /// Whether idle instances are terminated at all.
    pub terminate_idle_instances: bool,
    pub provider_eligibility: ProviderEligibility,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            grace_period: "1s".to_string(),
            run_interval: "5m".to_string(),
            idle_runs_before_removal: 3,
            terminate_idle_instances: true,
            provider_eligibility: ProviderEligibility::AllActive,
        }
    }
}

impl ScalerConfig {
    pub fn grace_period(&self) -> Duration {
        parse_duration(&self.grace_period).unwrap_or(Duration::from_secs(1))
    }

    pub fn run_interval(&self) -> Duration {
        parse_duration(&self.run_interval).unwrap_or(Duration::from_secs(300))
    }
}

/// Retry budget for individual substrate calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub timeout: String,
    pub tick: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: "30s".to_string(),
            tick: "1s".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(30))
    }

    pub fn tick(&self) -> Duration {
        parse_duration(&self.tick).unwrap_or(Duration::from_secs(1))
    }
}

/// Size of one instance type, as the substrate accounts for it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceTypeConfig {
    /// CPU units (1024 per vCPU).
    pub cpu: u64,
    /// Memory in MiB.
    pub memory_mib: u64,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would otherwise be silently replaced by defaults.
    pub fn validate(&self) -> ConfigResult<()> {
        let durations = [
            ("scaler.grace_period", &self.scaler.grace_period),
            ("scaler.run_interval", &self.scaler.run_interval),
            ("retry.timeout", &self.retry.timeout),
            ("retry.tick", &self.retry.tick),
        ];
        for (field, value) in durations {
            if parse_duration(value).is_none() {
                return Err(ConfigError::InvalidDuration {
                    field,
                    value: value.clone(),
                });
            }
        }

        if self.retry.tick().is_zero() {
            return Err(ConfigError::Invalid {
                field: "retry.tick",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.control_plane.instance_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "control_plane.instance_id",
                reason: "must not be empty".to_string(),
            });
        }

        for (name, size) in &self.instance_types {
            if size.cpu == 0 || size.memory_mib == 0 {
                return Err(ConfigError::InvalidInstanceType {
                    name: name.clone(),
                    reason: "cpu and memory_mib must both be non-zero".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "1h" or "10".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
