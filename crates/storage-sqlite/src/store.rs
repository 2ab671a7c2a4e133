//! The embedded schedule store.
//!
//! An in-memory SQLite database holding the unified schedule dataset. The
//! whole database is replaced on every sync, snapshotted into the key-value
//! adapter for durability, and restored from that snapshot on startup.

use std::sync::Arc;

use log::{debug, warn};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tokio::sync::Mutex;

use campusplan_core::errors::{DatabaseError, Error, Result};
use campusplan_core::schedule::{OwnerKind, ScheduleOwner, SemesterInfo};
use campusplan_core::storage::KeyValueStore;

use crate::errors::StoreError;
use crate::snapshot;

/// Key-value slot holding the base64 SQLite image between runs.
pub const DB_SNAPSHOT_KEY: &str = "schedule_db_snapshot";

/// Bulk-insert progress is reported once per this many rows.
const PROGRESS_CHUNK: usize = 50;
/// Bulk replacement maps its row progress into this closed range; the sync
/// engine owns the values outside it.
const PROGRESS_FLOOR: u64 = 30;
const PROGRESS_CEIL: u64 = 90;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS unified_schedules (
    id INTEGER NOT NULL,
    owner_type TEXT NOT NULL CHECK (owner_type IN ('group', 'teacher', 'room')),
    name TEXT NOT NULL,
    faculty TEXT,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    weeks_count INTEGER NOT NULL DEFAULT 0,
    major TEXT,
    study_type TEXT,
    email TEXT,
    phone TEXT,
    office TEXT,
    PRIMARY KEY (id, owner_type)
);
CREATE INDEX IF NOT EXISTS idx_unified_schedules_owner_type
    ON unified_schedules (owner_type);
CREATE INDEX IF NOT EXISTS idx_unified_schedules_faculty
    ON unified_schedules (faculty);
CREATE TABLE IF NOT EXISTS semester_info (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    semester TEXT NOT NULL,
    academic_year TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Embedded relational store for the unified schedule dataset.
///
/// All operations before [`init`](Self::init) fail with
/// [`DatabaseError::NotInitialized`]; `init` is idempotent and may be
/// retried after a failure.
pub struct ScheduleStore {
    kv: Arc<dyn KeyValueStore>,
    conn: Mutex<Option<Connection>>,
}

impl ScheduleStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            conn: Mutex::new(None),
        }
    }

    /// Open the database, restoring from the persisted snapshot when one
    /// exists. An unreadable or corrupt snapshot is discarded with a warning
    /// and the store starts empty; the next sync rebuilds it.
    pub async fn init(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let mut conn = Connection::open_in_memory().map_err(StoreError::from)?;
        match self.kv.get_item(DB_SNAPSHOT_KEY).await {
            Ok(Some(encoded)) => {
                let restored = snapshot::decode_image(&encoded)
                    .and_then(|image| snapshot::load_from_bytes(&mut conn, &image));
                match restored {
                    Ok(()) => debug!("schedule database restored from persisted snapshot"),
                    Err(e) => {
                        warn!("persisted schedule snapshot unusable, starting empty: {e}");
                        conn = Connection::open_in_memory().map_err(StoreError::from)?;
                    }
                }
            }
            Ok(None) => debug!("no persisted schedule snapshot, starting empty"),
            Err(e) => warn!("could not read persisted schedule snapshot: {e}"),
        }
        conn.execute_batch(SCHEMA_SQL).map_err(StoreError::from)?;
        *guard = Some(conn);
        Ok(())
    }

    /// Snapshot the current database into the key-value adapter. Callers
    /// invoke this after every committed dataset replacement.
    pub async fn persist(&self) -> Result<()> {
        let encoded = {
            let guard = self.conn.lock().await;
            let conn = guard
                .as_ref()
                .ok_or(Error::Database(DatabaseError::NotInitialized))?;
            snapshot::encode_image(&snapshot::dump_to_bytes(conn)?)
        };
        self.kv.set_item(DB_SNAPSHOT_KEY, &encoded).await?;
        Ok(())
    }

    /// Delete the persisted snapshot and reinitialize to an empty schema.
    /// The store stays usable; no separate [`init`](Self::init) is needed.
    pub async fn reset(&self) -> Result<()> {
        {
            let mut guard = self.conn.lock().await;
            let conn = Connection::open_in_memory().map_err(StoreError::from)?;
            conn.execute_batch(SCHEMA_SQL).map_err(StoreError::from)?;
            *guard = Some(conn);
        }
        self.kv.remove_item(DB_SNAPSHOT_KEY).await?;
        Ok(())
    }

    /// Run an arbitrary read-only query; rows come back as JSON objects
    /// keyed by column name. Parameters bind positionally.
    pub async fn query(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        let bound = params.iter().map(json_to_sql).collect::<Vec<_>>();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let column_names = stmt
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>();
            let mut rows = stmt.query(params_from_iter(bound.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut object = serde_json::Map::with_capacity(column_names.len());
                for (i, name) in column_names.iter().enumerate() {
                    object.insert(name.clone(), sql_to_json(row.get_ref(i)?));
                }
                out.push(object);
            }
            Ok(out)
        })
        .await
    }

    /// Like [`query`](Self::query), returning only the first row.
    pub async fn query_single(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<Option<serde_json::Map<String, serde_json::Value>>> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Replace the entire owner dataset in one transaction: delete
    /// everything, bulk-insert the new rows. `progress` receives percentages
    /// in `30..=90` as the insert advances; nothing partial is ever visible.
    pub async fn replace_owners<F>(&self, owners: &[ScheduleOwner], mut progress: F) -> Result<u64>
    where
        F: FnMut(u8),
    {
        // Serialize payloads up front so the transaction below is SQL-only.
        let mut payloads = Vec::with_capacity(owners.len());
        for owner in owners {
            payloads.push(serde_json::to_string(&owner.data)?);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM unified_schedules", [])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO unified_schedules
                        (id, owner_type, name, faculty, data, updated_at,
                         weeks_count, major, study_type, email, phone, office)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                )?;
                let total = owners.len();
                for (i, owner) in owners.iter().enumerate() {
                    stmt.execute(params![
                        owner.id,
                        owner.kind.as_str(),
                        owner.name,
                        owner.faculty,
                        payloads[i],
                        owner.updated_at,
                        owner.weeks_count,
                        owner.major,
                        owner.study_type,
                        owner.email,
                        owner.phone,
                        owner.office,
                    ])?;
                    let done = i + 1;
                    if done % PROGRESS_CHUNK == 0 || done == total {
                        let pct = PROGRESS_FLOOR
                            + (done as u64 * (PROGRESS_CEIL - PROGRESS_FLOOR)) / total as u64;
                        progress(pct as u8);
                    }
                }
            }
            tx.commit()?;
            Ok(owners.len() as u64)
        })
        .await
    }

    /// Upsert the singleton semester record.
    pub async fn replace_semester_info(&self, info: &SemesterInfo) -> Result<()> {
        let info = info.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO semester_info (id, semester, academic_year, updated_at)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT (id) DO UPDATE SET
                    semester = excluded.semester,
                    academic_year = excluded.academic_year,
                    updated_at = excluded.updated_at",
                params![info.semester, info.academic_year, info.updated_at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn semester_info(&self) -> Result<Option<SemesterInfo>> {
        self.with_conn(|conn| {
            let info = conn
                .query_row(
                    "SELECT semester, academic_year, updated_at FROM semester_info WHERE id = 1",
                    [],
                    |row| {
                        Ok(SemesterInfo {
                            semester: row.get(0)?,
                            academic_year: row.get(1)?,
                            updated_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(info)
        })
        .await
    }

    pub async fn count_owners(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM unified_schedules", [], |row| {
                    row.get(0)
                })?;
            Ok(count as u64)
        })
        .await
    }

    /// Typed owner listing with optional kind/faculty filters.
    pub async fn list_owners(
        &self,
        kind: Option<OwnerKind>,
        faculty: Option<&str>,
    ) -> Result<Vec<ScheduleOwner>> {
        let mut sql = String::from(
            "SELECT id, owner_type, name, faculty, data, updated_at,
                    weeks_count, major, study_type, email, phone, office
             FROM unified_schedules WHERE 1 = 1",
        );
        let mut bound: Vec<String> = Vec::new();
        if let Some(kind) = kind {
            sql.push_str(" AND owner_type = ?");
            bound.push(kind.as_str().to_string());
        }
        if let Some(faculty) = faculty {
            sql.push_str(" AND faculty = ?");
            bound.push(faculty.to_string());
        }
        sql.push_str(" ORDER BY owner_type, name");

        let raw_rows = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params_from_iter(bound.iter()))?;
                let mut out: Vec<(i64, String, String, Option<String>, String, String, i64,
                    Option<String>, Option<String>, Option<String>, Option<String>, Option<String>)> =
                    Vec::new();
                while let Some(row) = rows.next()? {
                    out.push((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                        row.get(10)?,
                        row.get(11)?,
                    ));
                }
                Ok(out)
            })
            .await?;

        let mut owners = Vec::with_capacity(raw_rows.len());
        for (id, owner_type, name, faculty, data, updated_at, weeks_count, major, study_type,
            email, phone, office) in raw_rows
        {
            let kind = OwnerKind::parse(&owner_type).ok_or_else(|| {
                Error::database(format!("unexpected owner_type '{owner_type}' in store"))
            })?;
            owners.push(ScheduleOwner {
                id,
                kind,
                name,
                faculty,
                data: serde_json::from_str(&data)?,
                updated_at,
                weeks_count,
                major,
                study_type,
                email,
                phone,
                office,
            });
        }
        Ok(owners)
    }

    async fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> std::result::Result<T, rusqlite::Error>,
    ) -> Result<T> {
        let guard = self.conn.lock().await;
        let conn = guard
            .as_ref()
            .ok_or(Error::Database(DatabaseError::NotInitialized))?;
        f(conn).map_err(|e| StoreError::from(e).into())
    }

    async fn with_conn_mut<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> std::result::Result<T, rusqlite::Error>,
    ) -> Result<T> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or(Error::Database(DatabaseError::NotInitialized))?;
        f(conn).map_err(|e| StoreError::from(e).into())
    }
}

fn json_to_sql(value: &serde_json::Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        serde_json::Value::Null => Sql::Null,
        serde_json::Value::Bool(v) => Sql::Integer(i64::from(*v)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else {
                Sql::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

fn sql_to_json(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => {
            use base64::engine::general_purpose::STANDARD;
            use base64::Engine;
            serde_json::Value::from(STANDARD.encode(b))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use campusplan_core::schedule::{SchedulePayload, WeekSchedule};
    use campusplan_core::storage::MemoryKeyValueStore;

    use super::*;

    fn owner(id: i64, kind: OwnerKind, name: &str, faculty: Option<&str>) -> ScheduleOwner {
        let mut schedule = BTreeMap::new();
        schedule.insert(
            "Montag".to_string(),
            vec![serde_json::json!({ "subject": "DB2", "room": "B-201" })],
        );
        let mut weeks = BTreeMap::new();
        weeks.insert("1".to_string(), WeekSchedule { schedule });
        ScheduleOwner {
            id,
            kind,
            name: name.to_string(),
            faculty: faculty.map(str::to_string),
            data: SchedulePayload { weeks },
            updated_at: "1726000000000".to_string(),
            weeks_count: 1,
            major: None,
            study_type: None,
            email: None,
            phone: None,
            office: None,
        }
    }

    fn semester() -> SemesterInfo {
        SemesterInfo {
            semester: "WS".to_string(),
            academic_year: "2026/27".to_string(),
            updated_at: "1726000000000".to_string(),
        }
    }

    async fn initialized_store() -> (ScheduleStore, Arc<MemoryKeyValueStore>) {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = ScheduleStore::new(kv.clone());
        store.init().await.expect("init store");
        (store, kv)
    }

    #[tokio::test]
    async fn operations_before_init_fail_cleanly() {
        let store = ScheduleStore::new(Arc::new(MemoryKeyValueStore::new()));
        let err = store.count_owners().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Database(DatabaseError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn init_is_idempotent_and_starts_empty() {
        let (store, _) = initialized_store().await;
        store.init().await.expect("second init");
        assert_eq!(store.count_owners().await.unwrap(), 0);
        assert_eq!(store.semester_info().await.unwrap(), None);
    }

    #[tokio::test]
    async fn replace_owners_swaps_the_whole_dataset() {
        let (store, _) = initialized_store().await;
        let first = vec![
            owner(1, OwnerKind::Group, "3A", Some("Informatik")),
            owner(2, OwnerKind::Teacher, "Dr. Weber", Some("Informatik")),
        ];
        store.replace_owners(&first, |_| {}).await.expect("first load");
        assert_eq!(store.count_owners().await.unwrap(), 2);

        // A second replacement leaves no trace of the first dataset.
        let second = vec![owner(9, OwnerKind::Room, "B-201", None)];
        let inserted = store.replace_owners(&second, |_| {}).await.expect("second load");
        assert_eq!(inserted, 1);
        let owners = store.list_owners(None, None).await.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].id, 9);
        assert_eq!(owners[0].kind, OwnerKind::Room);
    }

    #[tokio::test]
    async fn replace_owners_reports_monotonic_progress() {
        let (store, _) = initialized_store().await;
        let owners = (0..120)
            .map(|i| owner(i, OwnerKind::Group, &format!("G{i}"), None))
            .collect::<Vec<_>>();
        let mut seen = Vec::new();
        store
            .replace_owners(&owners, |pct| seen.push(pct))
            .await
            .expect("bulk load");
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress regressed: {seen:?}");
        assert!(seen.iter().all(|&p| (30..=90).contains(&p)));
        assert_eq!(*seen.last().unwrap(), 90);
    }

    #[tokio::test]
    async fn failed_replacement_rolls_back_to_the_prior_dataset() {
        let (store, _) = initialized_store().await;
        store
            .replace_owners(&[owner(1, OwnerKind::Group, "3A", None)], |_| {})
            .await
            .expect("initial load");

        // Duplicate composite key violates the primary key mid-insert; the
        // dropped transaction must leave the prior rows untouched.
        let conflicting = vec![
            owner(7, OwnerKind::Teacher, "Dr. Weber", None),
            owner(7, OwnerKind::Teacher, "Dr. Weber (dup)", None),
        ];
        let err = store.replace_owners(&conflicting, |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Database(DatabaseError::Internal(_))));

        let owners = store.list_owners(None, None).await.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].id, 1);
    }

    #[tokio::test]
    async fn list_owners_filters_by_kind_and_faculty() {
        let (store, _) = initialized_store().await;
        store
            .replace_owners(
                &[
                    owner(1, OwnerKind::Group, "3A", Some("Informatik")),
                    owner(2, OwnerKind::Group, "M1", Some("Medien")),
                    owner(3, OwnerKind::Teacher, "Dr. Weber", Some("Informatik")),
                ],
                |_| {},
            )
            .await
            .expect("load");

        let groups = store.list_owners(Some(OwnerKind::Group), None).await.unwrap();
        assert_eq!(groups.len(), 2);

        let informatik_groups = store
            .list_owners(Some(OwnerKind::Group), Some("Informatik"))
            .await
            .unwrap();
        assert_eq!(informatik_groups.len(), 1);
        assert_eq!(informatik_groups[0].name, "3A");
        assert_eq!(
            informatik_groups[0].data.weeks["1"].schedule["Montag"][0]["subject"],
            "DB2"
        );
    }

    #[tokio::test]
    async fn semester_info_upserts_the_singleton() {
        let (store, _) = initialized_store().await;
        store.replace_semester_info(&semester()).await.unwrap();
        let mut newer = semester();
        newer.updated_at = "1727000000000".to_string();
        store.replace_semester_info(&newer).await.unwrap();

        let info = store.semester_info().await.unwrap().expect("semester row");
        assert_eq!(info.updated_at, "1727000000000");

        let rows = store
            .query("SELECT COUNT(*) AS n FROM semester_info", &[])
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn query_binds_json_parameters() {
        let (store, _) = initialized_store().await;
        store
            .replace_owners(
                &[
                    owner(1, OwnerKind::Group, "3A", Some("Informatik")),
                    owner(2, OwnerKind::Teacher, "Dr. Weber", None),
                ],
                |_| {},
            )
            .await
            .expect("load");

        let row = store
            .query_single(
                "SELECT name, weeks_count FROM unified_schedules WHERE owner_type = ? AND id = ?",
                &[serde_json::json!("group"), serde_json::json!(1)],
            )
            .await
            .unwrap()
            .expect("matching row");
        assert_eq!(row["name"], serde_json::json!("3A"));
        assert_eq!(row["weeks_count"], serde_json::json!(1));

        let missing = store
            .query_single(
                "SELECT name FROM unified_schedules WHERE id = ?",
                &[serde_json::json!(999)],
            )
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn persist_and_reinit_round_trips_through_the_snapshot() {
        let (store, kv) = initialized_store().await;
        store
            .replace_owners(&[owner(1, OwnerKind::Group, "3A", None)], |_| {})
            .await
            .expect("load");
        store.replace_semester_info(&semester()).await.unwrap();
        store.persist().await.expect("persist snapshot");
        assert!(kv.get_item(DB_SNAPSHOT_KEY).await.unwrap().is_some());

        // A fresh store over the same adapter sees the persisted dataset.
        let revived = ScheduleStore::new(kv.clone());
        revived.init().await.expect("init from snapshot");
        assert_eq!(revived.count_owners().await.unwrap(), 1);
        assert_eq!(
            revived.semester_info().await.unwrap().map(|i| i.semester),
            Some("WS".to_string())
        );
    }

    #[tokio::test]
    async fn corrupt_snapshot_falls_back_to_an_empty_schema() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set_item(DB_SNAPSHOT_KEY, "definitely not a database image")
            .await
            .unwrap();
        let store = ScheduleStore::new(kv);
        store.init().await.expect("init despite corrupt snapshot");
        assert_eq!(store.count_owners().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reset_leaves_a_usable_empty_store() {
        let (store, kv) = initialized_store().await;
        store
            .replace_owners(&[owner(1, OwnerKind::Group, "3A", None)], |_| {})
            .await
            .expect("load");
        store.replace_semester_info(&semester()).await.unwrap();
        store.persist().await.expect("persist");

        store.reset().await.expect("reset");
        assert_eq!(kv.get_item(DB_SNAPSHOT_KEY).await.unwrap(), None);

        // No re-init required: the store answers immediately, empty.
        assert_eq!(store.count_owners().await.unwrap(), 0);
        assert_eq!(store.semester_info().await.unwrap(), None);
        store
            .replace_owners(&[owner(2, OwnerKind::Room, "B-201", None)], |_| {})
            .await
            .expect("store is writable after reset");
        assert_eq!(store.count_owners().await.unwrap(), 1);
    }
}
