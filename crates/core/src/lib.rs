//! Core domain layer for campusplan: schedule models, sync state and
//! decision logic, the key-value storage contract, and the enhanced cache
//! manager. Storage and transport implementations live in sibling crates.

pub mod cache;
pub mod errors;
pub mod schedule;
pub mod storage;
pub mod sync;

pub use errors::{DatabaseError, Error, Result, StorageError};
pub use storage::{KeyValueStore, MemoryKeyValueStore};
