//! Sync domain models and the dataset replacement decision.

mod state;

pub use state::{SyncStateStore, SyncStatus, SyncStatusSubscription};

/// Decides whether the local dataset must be replaced from the remote
/// source.
///
/// Rule:
/// 1. a forced refresh always replaces
/// 2. an empty local store always replaces
/// 3. otherwise, replace iff the local freshness marker is absent or
///    differs from the remote one (markers are opaque, compared as strings)
pub fn should_replace_dataset(
    force: bool,
    local_row_count: u64,
    local_marker: Option<&str>,
    remote_marker: &str,
) -> bool {
    if force || local_row_count == 0 {
        return true;
    }
    match local_marker {
        Some(local) => local != remote_marker,
        None => true,
    }
}
