//! Identifier generation.
//!
//! Components that mint identifiers take an `Arc<dyn IdGenerator>` so tests
//! can swap in [`SequentialIds`] for deterministic output.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of fresh, unique identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Lexicographically sortable ULIDs (the production default).
#[derive(Debug, Default, Clone, Copy)]
pub struct UlidGenerator;

impl IdGenerator for UlidGenerator {
    fn next_id(&self) -> String {
        ulid::Ulid::new().to_string().to_lowercase()
    }
}

/// `{prefix}-{n}` identifiers counting up from 1.
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.prefix)
    }
}
