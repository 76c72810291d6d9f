//! Scheduled scaler runs.
//!
//! `schedule_run` debounces per environment: scheduling again before the
//! timer fires replaces the pending run. A run that finds its environment
//! busy reschedules itself after the grace period. The latest report per
//! environment is kept for inspection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{ScalerError, ScalerResult};
use crate::scaler::{EnvironmentScaler, ScalerRunInfo};
use crate::sources::EnvironmentDirectory;

struct PendingRun {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    scaler: Arc<EnvironmentScaler>,
    environments: Arc<dyn EnvironmentDirectory>,
    grace_period: Duration,
    timers: Mutex<HashMap<String, PendingRun>>,
    next_generation: Mutex<u64>,
    reports: RwLock<HashMap<String, ScalerRunInfo>>,
}

/// Timer front-end for [`EnvironmentScaler`]. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(
        scaler: Arc<EnvironmentScaler>,
        environments: Arc<dyn EnvironmentDirectory>,
        grace_period: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                scaler,
                environments,
                grace_period,
                timers: Mutex::new(HashMap::new()),
                next_generation: Mutex::new(0),
                reports: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Run the scaler for `environment` after `delay`, replacing any run
    /// already scheduled for it. Must be called within a tokio runtime.
    pub fn schedule_run(&self, environment: &str, delay: Duration) {
        let generation = {
            let mut next = self
                .inner
                .next_generation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };

        let mut timers = self
            .inner
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timers.remove(environment) {
            previous.handle.abort();
            debug!(%environment, "replaced pending scaler run");
        }

        let this = self.clone();
        let env = environment.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.fire(&env, generation).await;
        });

        timers.insert(environment.to_string(), PendingRun { generation, handle });
        debug!(%environment, delay_ms = delay.as_millis() as u64, "scaler run scheduled");
    }

    async fn fire(&self, environment: &str, generation: u64) {
        // Claim the timer so a later schedule cannot abort a run in flight.
        {
            let mut timers = self
                .inner
                .timers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if timers.get(environment).map(|p| p.generation) != Some(generation) {
                return;
            }
            timers.remove(environment);
        }

        match self.inner.scaler.scale(environment).await {
            Ok(report) => {
                info!(
                    %environment,
                    run = %report.run_id,
                    desired = report.desired_scale_after_run,
                    actual = report.actual_scale_after_run,
                    "scheduled scaler run complete"
                );
                self.inner
                    .reports
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(environment.to_string(), report);
            }
            Err(ScalerError::AlreadyRunning(_)) => {
                debug!(%environment, "environment busy, rescheduling");
                self.schedule_run(environment, self.inner.grace_period);
            }
            Err(e) => {
                error!(%environment, kind = ?e.kind(), error = %e, "scheduled scaler run failed");
            }
        }
    }

    /// Schedule a run for every registered environment after the grace
    /// period. Returns the number of environments scheduled.
    pub async fn run_all(&self) -> ScalerResult<usize> {
        let ids = self.inner.environments.environment_ids().await?;
        for id in &ids {
            self.schedule_run(id, self.inner.grace_period);
        }
        info!(environments = ids.len(), "scheduled scaler runs for all environments");
        Ok(ids.len())
    }

    /// Call [`run_all`](Self::run_all) every `period` until `shutdown`
    /// flips. Pending runs are cancelled on shutdown.
    pub async fn run_every(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(period_secs = period.as_secs(), "scaler dispatcher started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    if let Err(e) = self.run_all().await {
                        error!(error = %e, "failed to schedule scaler runs");
                    }
                }
                _ = shutdown.changed() => {
                    info!("scaler dispatcher shutting down");
                    break;
                }
            }
        }

        self.cancel_all();
    }

    /// Abort every run that has not started yet.
    pub fn cancel_all(&self) {
        let mut timers = self
            .inner
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, pending) in timers.drain() {
            pending.handle.abort();
        }
    }

    /// Runs scheduled but not yet started.
    pub fn pending_runs(&self) -> usize {
        self.inner
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Report of the last successful scheduled run for `environment`.
    pub fn last_report(&self, environment: &str) -> Option<ScalerRunInfo> {
        self.inner
            .reports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(environment)
            .cloned()
    }
}
