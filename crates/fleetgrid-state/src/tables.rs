//! redb table definitions for the fleetgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Shape shared by every table: string key, JSON value.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Environment records keyed by `{environment_id}`.
pub const ENVIRONMENTS: JsonTable = TableDefinition::new("environments");

/// Jobs keyed by `{job_id}`.
pub const JOBS: JsonTable = TableDefinition::new("jobs");
