//! Sync status state store with observer callbacks.
//!
//! One instance is constructed per application context and injected into
//! the sync engine, so tests can run independent instances instead of
//! sharing process-wide globals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Snapshot of the sync engine state exposed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    /// Epoch millis of the last successful sync. Survives restarts; restored
    /// from persisted storage by the engine on construction.
    pub last_sync: Option<i64>,
    pub error: Option<String>,
    /// 0..=100.
    pub progress: u8,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            is_syncing: false,
            last_sync: None,
            error: None,
            progress: 0,
        }
    }
}

type Listener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

struct Inner {
    status: SyncStatus,
    listeners: HashMap<u64, Listener>,
    next_id: u64,
}

/// Owner of the current [`SyncStatus`] and its registered observers.
///
/// Subscribers receive the current status immediately upon subscribing and
/// every subsequent transition until the subscription guard is dropped.
pub struct SyncStateStore {
    inner: Mutex<Inner>,
}

impl SyncStateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                status: SyncStatus::default(),
                listeners: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Synchronous snapshot of the current status.
    pub fn status(&self) -> SyncStatus {
        self.inner.lock().expect("sync state lock").status.clone()
    }

    /// Register an observer. The callback fires once with the current status
    /// before this returns, then on every transition until the returned
    /// guard is dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> SyncStatusSubscription {
        let listener: Listener = Arc::new(listener);
        let (id, current) = {
            let mut inner = self.inner.lock().expect("sync state lock");
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.insert(id, Arc::clone(&listener));
            (id, inner.status.clone())
        };
        listener(&current);
        SyncStatusSubscription {
            store: Arc::clone(self),
            id,
        }
    }

    /// Apply a mutation and notify all observers with the resulting status.
    pub fn update(&self, mutate: impl FnOnce(&mut SyncStatus)) {
        let (status, listeners) = {
            let mut inner = self.inner.lock().expect("sync state lock");
            mutate(&mut inner.status);
            (
                inner.status.clone(),
                inner.listeners.values().cloned().collect::<Vec<_>>(),
            )
        };
        // Callbacks run outside the lock so they may re-enter `status()`.
        for listener in listeners {
            listener(&status);
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.inner
            .lock()
            .expect("sync state lock")
            .listeners
            .remove(&id);
    }
}

impl Default for SyncStateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard returned by [`SyncStateStore::subscribe`]; dropping it removes the
/// observer.
pub struct SyncStatusSubscription {
    store: Arc<SyncStateStore>,
    id: u64,
}

impl SyncStatusSubscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for SyncStatusSubscription {
    fn drop(&mut self) {
        self.store.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> (Arc<Mutex<Vec<SyncStatus>>>, impl Fn(&SyncStatus) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |status: &SyncStatus| {
            sink.lock().unwrap().push(status.clone());
        })
    }

    #[test]
    fn subscriber_receives_current_status_immediately() {
        let store = Arc::new(SyncStateStore::new());
        let (seen, listener) = collector();
        let _sub = store.subscribe(listener);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(seen.lock().unwrap()[0], SyncStatus::default());
    }

    #[test]
    fn subscriber_receives_every_transition() {
        let store = Arc::new(SyncStateStore::new());
        let (seen, listener) = collector();
        let _sub = store.subscribe(listener);

        store.update(|s| {
            s.is_syncing = true;
            s.progress = 30;
        });
        store.update(|s| {
            s.is_syncing = false;
            s.progress = 100;
            s.last_sync = Some(1_726_000_000_000);
        });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[1].is_syncing);
        assert_eq!(seen[2].progress, 100);
        assert_eq!(seen[2].last_sync, Some(1_726_000_000_000));
    }

    #[test]
    fn dropped_subscription_stops_notifications() {
        let store = Arc::new(SyncStateStore::new());
        let (seen, listener) = collector();
        let sub = store.subscribe(listener);
        sub.unsubscribe();
        store.update(|s| s.progress = 50);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn independent_instances_do_not_share_state() {
        let a = Arc::new(SyncStateStore::new());
        let b = Arc::new(SyncStateStore::new());
        a.update(|s| s.progress = 80);
        assert_eq!(b.status().progress, 0);
    }

    #[test]
    fn status_serializes_camel_case() {
        let json = serde_json::to_value(SyncStatus::default()).unwrap();
        assert!(json.get("isSyncing").is_some());
        assert!(json.get("lastSync").is_some());
    }
}
