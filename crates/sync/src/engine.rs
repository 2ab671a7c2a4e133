//! Pull-and-replace sync engine.
//!
//! One remote, one local store, full snapshot semantics: when the remote
//! freshness marker differs from the local one, the entire local dataset is
//! deleted and rebuilt from the remote dump inside a single transaction.
//! There is no diffing, no merging, and no partial state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use campusplan_core::errors::Result;
use campusplan_core::schedule::{ScheduleOwner, SemesterInfo};
use campusplan_core::storage::KeyValueStore;
use campusplan_core::sync::{should_replace_dataset, SyncStateStore};
use campusplan_storage_sqlite::ScheduleStore;

/// Key-value slot persisting the last successful sync time across runs.
pub const LAST_SYNC_KEY: &str = "schedule_last_sync";

/// Abstraction over the remote schedule source so the engine can be driven
/// by a scripted double in tests.
#[async_trait]
pub trait RemoteScheduleSource: Send + Sync {
    async fn fetch_semester_info(&self) -> Result<SemesterInfo>;
    async fn fetch_unified_schedules(&self) -> Result<Vec<ScheduleOwner>>;
}

/// How a sync run concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another run holds the in-flight guard; nothing was done.
    AlreadyInProgress,
    /// Freshness markers matched; the local dataset was kept.
    UpToDate,
    /// The remote was unreachable but local data from an earlier sync
    /// exists, so the run degraded to offline mode instead of failing.
    SkippedOffline,
    /// The dataset was replaced wholesale.
    Replaced { rows: u64 },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastSyncRecord {
    last_sync: i64,
}

/// Orchestrates the pull-and-replace flow against the embedded store.
///
/// At most one run is active at a time; a second caller gets
/// [`SyncOutcome::AlreadyInProgress`] instead of queueing.
pub struct SyncEngine {
    store: Arc<ScheduleStore>,
    remote: Arc<dyn RemoteScheduleSource>,
    kv: Arc<dyn KeyValueStore>,
    state: Arc<SyncStateStore>,
    in_flight: AtomicBool,
}

impl SyncEngine {
    /// Build the engine, restoring the persisted last-sync time into the
    /// status store so subscribers see it before the first run.
    pub async fn new(
        store: Arc<ScheduleStore>,
        remote: Arc<dyn RemoteScheduleSource>,
        kv: Arc<dyn KeyValueStore>,
        state: Arc<SyncStateStore>,
    ) -> Self {
        let engine = Self {
            store,
            remote,
            kv,
            state,
            in_flight: AtomicBool::new(false),
        };
        if let Some(last_sync) = engine.load_last_sync().await {
            engine.state.update(|s| s.last_sync = Some(last_sync));
        }
        engine
    }

    pub fn state(&self) -> Arc<SyncStateStore> {
        Arc::clone(&self.state)
    }

    /// Run one sync pass. `force` bypasses the freshness-marker comparison
    /// and always replaces the dataset.
    pub async fn sync_database(&self, force: bool) -> Result<SyncOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync already in progress, skipping");
            return Ok(SyncOutcome::AlreadyInProgress);
        }

        let result = self.run_sync(force).await;
        self.in_flight.store(false, Ordering::SeqCst);

        if let Err(e) = &result {
            let message = e.to_string();
            warn!("sync failed: {message}");
            self.state.update(|s| {
                s.is_syncing = false;
                s.error = Some(message.clone());
                s.progress = 0;
            });
        }
        result
    }

    async fn run_sync(&self, force: bool) -> Result<SyncOutcome> {
        self.store.init().await?;

        // One small record's marker stands in for the whole dataset version.
        // When the probe fails and an earlier sync left usable local data,
        // the run degrades silently instead of failing.
        let remote_semester = match self.remote.fetch_semester_info().await {
            Ok(info) => info,
            Err(e) => {
                if self.state.status().last_sync.is_some() {
                    warn!("remote unavailable, keeping local dataset: {e}");
                    return Ok(SyncOutcome::SkippedOffline);
                }
                return Err(e);
            }
        };

        let local_marker = self.store.semester_info().await?.map(|i| i.updated_at);
        let local_rows = self.store.count_owners().await?;
        if !should_replace_dataset(
            force,
            local_rows,
            local_marker.as_deref(),
            &remote_semester.updated_at,
        ) {
            // Current data: return without touching status, so subscribers
            // see no spurious progress events.
            debug!(
                "local dataset is current (marker {}), skipping replacement",
                remote_semester.updated_at
            );
            return Ok(SyncOutcome::UpToDate);
        }

        self.state.update(|s| {
            s.is_syncing = true;
            s.error = None;
            s.progress = 0;
        });

        self.store.replace_semester_info(&remote_semester).await?;
        let owners = self.remote.fetch_unified_schedules().await?;
        let rows = self
            .store
            .replace_owners(&owners, |pct| self.state.update(|s| s.progress = pct))
            .await?;
        self.store.persist().await?;

        let now = self.record_last_sync().await?;
        self.state.update(|s| {
            s.is_syncing = false;
            s.progress = 100;
            s.error = None;
            s.last_sync = Some(now);
        });
        info!(
            "schedule dataset replaced: {rows} owners, marker {}",
            remote_semester.updated_at
        );
        Ok(SyncOutcome::Replaced { rows })
    }

    async fn record_last_sync(&self) -> Result<i64> {
        let now = Utc::now().timestamp_millis();
        let record = serde_json::to_string(&LastSyncRecord { last_sync: now })?;
        self.kv.set_item(LAST_SYNC_KEY, &record).await?;
        Ok(now)
    }

    async fn load_last_sync(&self) -> Option<i64> {
        let raw = self.kv.get_item(LAST_SYNC_KEY).await.ok()??;
        serde_json::from_str::<LastSyncRecord>(&raw)
            .ok()
            .map(|r| r.last_sync)
    }
}
