//! Idle-instance removal policy.
//!
//! An instance becomes removable only after the planner reports it unused
//! in `threshold` consecutive runs of its environment. A run in which the
//! instance is used, or missing, resets its count.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

#[derive(Debug)]
pub struct IdleTracker {
    threshold: u32,
    /// environment → instance → consecutive idle runs.
    streaks: Mutex<HashMap<String, HashMap<String, u32>>>,
}

impl IdleTracker {
    /// A threshold of zero behaves like one.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            streaks: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Record one run's unused instances and return those that reached the
    /// threshold, in the order given.
    pub fn observe(&self, environment: &str, unused: &[String]) -> Vec<String> {
        let mut streaks = self.streaks.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = streaks.remove(environment).unwrap_or_default();

        let mut current = HashMap::with_capacity(unused.len());
        let mut removable = Vec::new();
        for id in unused {
            let runs = previous.get(id).copied().unwrap_or(0) + 1;
            debug!(%environment, instance = %id, runs, threshold = self.threshold, "instance idle");
            if runs >= self.threshold {
                removable.push(id.clone());
            }
            current.insert(id.clone(), runs);
        }

        if !current.is_empty() {
            streaks.insert(environment.to_string(), current);
        }
        removable
    }

    /// Drop the streaks of instances that were terminated.
    pub fn forget(&self, environment: &str, instances: &[String]) {
        let mut streaks = self.streaks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(env) = streaks.get_mut(environment) {
            for id in instances {
                env.remove(id);
            }
        }
    }

    /// Current idle streak of one instance.
    pub fn idle_runs(&self, environment: &str, instance: &str) -> u32 {
        self.streaks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(environment)
            .and_then(|env| env.get(instance))
            .copied()
            .unwrap_or(0)
    }
}
