//! Supply collection: active instances → resource providers.

use fleetgrid_placement::ResourceProvider;
use tracing::{debug, warn};

use crate::error::{ScalerError, ScalerResult};
use crate::retry::{RetryPolicy, with_retry};
use crate::substrate::{ClusterSubstrate, ContainerInstance};

const MIB: u64 = 1024 * 1024;

/// Convert one instance's remaining resources into a provider.
///
/// Negative values are treated as zero and port strings that do not parse
/// are skipped with a warning.
pub fn to_provider(instance: &ContainerInstance) -> ResourceProvider {
    let mut provider = ResourceProvider::existing(&instance.id, 0, 0);
    provider.status = instance.status.clone();
    provider.agent_connected = instance.agent_connected;
    provider.in_use = instance.running_tasks + instance.pending_tasks > 0;

    for resource in &instance.remaining_resources {
        match resource.name.as_str() {
            "CPU" => provider.available_cpu = non_negative(resource.integer_value),
            "MEMORY" => provider.available_memory = non_negative(resource.integer_value).saturating_mul(MIB),
            "PORTS" => {
                for port in &resource.string_set_value {
                    match port.parse::<u16>() {
                        Ok(port) => {
                            provider.used_ports.insert(port);
                        }
                        Err(e) => warn!(
                            instance = %instance.id,
                            port = %port,
                            error = %e,
                            "skipping unparseable port"
                        ),
                    }
                }
            }
            _ => {}
        }
    }

    provider
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Every active instance in `cluster`, regardless of agent health.
pub async fn collect_supply(
    substrate: &dyn ClusterSubstrate,
    retry: &RetryPolicy,
    cluster: &str,
) -> ScalerResult<Vec<ResourceProvider>> {
    let instances = with_retry(retry, "list_active_instances", move || {
        substrate.list_active_instances(cluster)
    })
    .await
    .map_err(|source| ScalerError::Collection {
        what: "instances",
        source,
    })?;

    let providers: Vec<_> = instances.iter().map(to_provider).collect();
    for provider in &providers {
        debug!(%cluster, %provider, "resource provider");
    }
    Ok(providers)
}
