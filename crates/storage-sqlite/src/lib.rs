//! SQLite-backed schedule storage for campusplan.
//!
//! The database itself is ephemeral (in-memory); durability comes from
//! full-image snapshots parked in the platform key-value adapter.

pub mod errors;
pub mod snapshot;
pub mod store;

pub use store::{ScheduleStore, DB_SNAPSHOT_KEY};
