//! Shared SQLite setup: connection opening, PRAGMAs and embedded schema

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Schema files, applied in order; every statement uses IF NOT EXISTS
const MIGRATIONS: [(&str, &str); 2] = [
    ("01_records.sql", include_str!("../sql/01_records.sql")),
    ("02_buckets.sql", include_str!("../sql/02_buckets.sql")),
];

/// WAL journal, relaxed fsync and a bounded autocheckpoint
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

pub fn run_schema_migrations(conn: &Connection) -> rusqlite::Result<()> {
    for (name, sql) in MIGRATIONS {
        log::debug!("   ├─ Executing: {}", name);
        conn.execute_batch(sql)?;
    }
    log::debug!("✅ Schema migrations applied");
    Ok(())
}

/// Open (creating parent directories), tune and migrate a database file
pub fn open_database(db_path: impl AsRef<Path>) -> rusqlite::Result<Connection> {
    let db_path = db_path.as_ref();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create database directory {}: {}", parent.display(), e);
                return Err(rusqlite::Error::InvalidPath(parent.to_path_buf()));
            }
        }
    }

    let conn = Connection::open(db_path)?;
    apply_optimized_pragmas(&conn)?;
    run_schema_migrations(&conn)?;
    Ok(conn)
}
