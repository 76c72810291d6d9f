//! Long-running mode: periodic reconciliation of every environment.

use std::sync::Arc;

use fleetgrid_autoscale::Dispatcher;
use fleetgrid_core::FleetConfig;
use tokio::sync::watch;
use tracing::{error, info};

use crate::commands::{self, Paths};

pub async fn run(config: &FleetConfig, paths: &Paths, persist: bool) -> anyhow::Result<()> {
    let store = commands::open_store(paths)?;
    let substrate = commands::load_substrate(paths)?;
    let scaler = Arc::new(commands::build_scaler(config, substrate.clone(), store.clone()));
    let dispatcher = Dispatcher::new(scaler, store, config.scaler.grace_period());

    info!(
        instance_id = %config.control_plane.instance_id,
        interval_secs = config.scaler.run_interval().as_secs(),
        "fleetd starting"
    );

    // First pass right away; the loop below waits a full period.
    if let Err(e) = dispatcher.run_all().await {
        error!(error = %e, "initial scaler pass failed");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_dispatcher = dispatcher.clone();
    let interval = config.scaler.run_interval();
    let handle = tokio::spawn(async move {
        loop_dispatcher.run_every(interval, shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    let _ = shutdown_tx.send(true);
    handle.await?;

    if persist {
        commands::persist_substrate(paths, &substrate)?;
    }
    info!("fleetd stopped");
    Ok(())
}
