//! SQLite image snapshotting over the online backup API.
//!
//! The store's database lives in memory; durability comes from serializing
//! the whole database into a byte image and parking it, base64-encoded, in
//! the string-only key-value adapter. The backup API only speaks to files,
//! so each direction goes through a uniquely named temp file that is removed
//! regardless of outcome.

use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rusqlite::backup::Backup;
use rusqlite::Connection;
use uuid::Uuid;

use crate::errors::StoreError;

const BACKUP_PAGES_PER_STEP: std::os::raw::c_int = 64;

fn temp_snapshot_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("campusplan_{tag}_{}.db", Uuid::new_v4().simple()))
}

/// Serialize the full database behind `conn` into a SQLite file image.
pub fn dump_to_bytes(conn: &Connection) -> Result<Vec<u8>, StoreError> {
    let path = temp_snapshot_path("export");
    let result = (|| -> Result<Vec<u8>, StoreError> {
        let mut dst = Connection::open(&path)?;
        {
            let backup = Backup::new(conn, &mut dst)?;
            backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::from_millis(0), None)?;
        }
        drop(dst);
        Ok(std::fs::read(&path)?)
    })();
    let _ = std::fs::remove_file(&path);
    result
}

/// Replace the database behind `conn` with the given SQLite file image.
pub fn load_from_bytes(conn: &mut Connection, image: &[u8]) -> Result<(), StoreError> {
    let path = temp_snapshot_path("import");
    std::fs::write(&path, image)?;
    let result = (|| -> Result<(), StoreError> {
        let src = Connection::open(&path)?;
        let backup = Backup::new(&src, conn)?;
        backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::from_millis(0), None)?;
        Ok(())
    })();
    let _ = std::fs::remove_file(&path);
    result
}

pub fn encode_image(image: &[u8]) -> String {
    BASE64.encode(image)
}

pub fn decode_image(encoded: &str) -> Result<Vec<u8>, StoreError> {
    Ok(BASE64.decode(encoded)?)
}
