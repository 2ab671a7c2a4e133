//! Remote schedule synchronization for campusplan: the HTTP client for the
//! schedule API and the pull-and-replace engine that keeps the embedded
//! store current.

pub mod client;
pub mod engine;
pub mod error;

pub use client::ScheduleApiClient;
pub use engine::{RemoteScheduleSource, SyncEngine, SyncOutcome, LAST_SYNC_KEY};
pub use error::RemoteError;
