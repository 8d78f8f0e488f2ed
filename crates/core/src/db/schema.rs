//! Schema creation and pragma setup for the embedded store.

use crate::error::Result;
use rusqlite::Connection;

/// Open (creating if absent) the connection at `path`, apply the pragmas
/// named explicitly, and create the three relations plus their indices.
pub fn open_and_initialize(path: &std::path::Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    apply_pragmas(&conn)?;
    create_tables(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", 10_000)?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS scanned_files (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path       TEXT NOT NULL UNIQUE,
            file_name       TEXT NOT NULL,
            content_hash    TEXT,
            flag_fast       INTEGER NOT NULL DEFAULT 0,
            flag_balanced   INTEGER NOT NULL DEFAULT 0,
            flag_quality    INTEGER NOT NULL DEFAULT 0,
            links_fast      TEXT NOT NULL DEFAULT '[]',
            links_balanced  TEXT NOT NULL DEFAULT '[]',
            links_quality   TEXT NOT NULL DEFAULT '[]',
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS processing_results (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path           TEXT NOT NULL,
            mode                TEXT NOT NULL,
            success             INTEGER NOT NULL,
            error_message       TEXT,
            artifact_format     TEXT,
            artifact_data       BLOB,
            artifact_hash       TEXT,
            artifact_confidence REAL,
            artifact_metadata   TEXT,
            created_at          INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_processing_results_mode_id
            ON processing_results (mode, id);
        CREATE INDEX IF NOT EXISTS idx_processing_results_hash
            ON processing_results (mode, artifact_hash);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_processing_results_unique
            ON processing_results (file_path, mode);

        CREATE TABLE IF NOT EXISTS transcode_map (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            source_path  TEXT NOT NULL UNIQUE,
            output_path  TEXT,
            status       INTEGER NOT NULL DEFAULT 0,
            worker_id    TEXT,
            created_at   INTEGER NOT NULL,
            updated_at   INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transcode_map_status_created
            ON transcode_map (status, created_at);
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_and_initialize_creates_all_three_relations_and_indices() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_and_initialize(&dir.path().join("db.sqlite3")).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN \
                 ('scanned_files','processing_results','transcode_map')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");
    }
}
