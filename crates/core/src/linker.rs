//! Duplicate Linker — groups successful results by artifact hash and
//! maintains symmetric `links_<mode>` sets for every cluster member.

use crate::config::ConfigStore;
use crate::db::{DbQueue, WriteOutcome};
use crate::shutdown::ShutdownCoordinator;
use crate::types::Mode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TICK_SECONDS: u64 = 30;

pub struct DuplicateLinker {
    db: Arc<DbQueue>,
    config: Arc<ConfigStore>,
    shutdown: Arc<ShutdownCoordinator>,
    last_seen_result_id: AtomicI64,
    full_rescan: AtomicBool,
    tick_seconds: AtomicI64,
}

impl DuplicateLinker {
    pub fn new(db: Arc<DbQueue>, config: Arc<ConfigStore>, shutdown: Arc<ShutdownCoordinator>) -> Self {
        Self {
            db,
            config: config.clone(),
            shutdown,
            last_seen_result_id: AtomicI64::new(0),
            full_rescan: AtomicBool::new(true),
            tick_seconds: AtomicI64::new(
                config.get_i64("duplicate_linker.tick_seconds").unwrap_or(DEFAULT_TICK_SECONDS as i64),
            ),
        }
    }

    /// Subscribes to the config bus so a `dedup_mode` change forces a
    /// full rescan under the new mode without discarding the prior
    /// mode's links.
    pub fn subscribe_to_config(self: &Arc<Self>) {
        let this = self.clone();
        self.config.bus().subscribe(Box::new(move |event| {
            if event.changed_keys.iter().any(|k| k == "dedup_mode" || k == "configuration") {
                this.full_rescan.store(true, Ordering::SeqCst);
            }
        }));
    }

    pub fn run_loop(&self) {
        while !self.shutdown.is_shutdown_requested() {
            self.run_tick();
            let interval = Duration::from_secs(self.tick_seconds.load(Ordering::Relaxed).max(0) as u64);
            self.sleep_cancellable(interval);
        }
    }

    fn sleep_cancellable(&self, total: Duration) {
        const STEP: Duration = Duration::from_millis(100);
        let mut waited = Duration::ZERO;
        while waited < total {
            if self.shutdown.is_shutdown_requested() {
                return;
            }
            std::thread::sleep(STEP.min(total - waited));
            waited += STEP;
        }
    }

    /// One pass: fetch new (or all, on rescan) successful results for the
    /// active mode, cluster by artifact hash, and rewrite `links_<mode>`
    /// for every cluster member. Returns the number of clusters linked.
    pub fn run_tick(&self) -> usize {
        let mode = self.config.dedup_mode();
        let rescan = self.full_rescan.swap(false, Ordering::SeqCst);
        let since_id = if rescan { 0 } else { self.last_seen_result_id.load(Ordering::Relaxed) };

        let rows = self.fetch_results_since(mode, since_id);
        if rows.is_empty() {
            return 0;
        }

        let max_id = rows.iter().map(|r| r.id).max().unwrap_or(since_id);

        let mut clusters: HashMap<String, Vec<String>> = HashMap::new();
        for row in &rows {
            clusters.entry(row.artifact_hash.clone()).or_default().push(row.file_path.clone());
        }

        let mut linked = 0;
        for (_, paths) in clusters.into_iter().filter(|(_, paths)| paths.len() >= 2) {
            self.link_cluster(mode, paths);
            linked += 1;
        }

        self.last_seen_result_id.store(max_id, Ordering::Relaxed);
        linked
    }

    fn fetch_results_since(&self, mode: Mode, since_id: i64) -> Vec<ResultRow> {
        let mode_str = mode.as_str().to_string();
        self.db
            .enqueue_read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, file_path, artifact_hash FROM processing_results \
                     WHERE mode = ?1 AND success = 1 AND id > ?2 AND artifact_hash IS NOT NULL \
                     ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![mode_str, since_id], |row| {
                        Ok(ResultRow {
                            id: row.get(0)?,
                            file_path: row.get(1)?,
                            artifact_hash: row.get(2)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .wait()
            .unwrap_or_default()
    }

    fn link_cluster(&self, mode: Mode, paths: Vec<String>) {
        let column = mode.links_column().to_string();
        self.db.enqueue_write(move |conn| {
            let ids: Vec<(i64, String)> = {
                let mut stmt = conn.prepare("SELECT id, file_path FROM scanned_files WHERE file_path = ?1")?;
                let mut found = Vec::with_capacity(paths.len());
                for path in &paths {
                    if let Ok(id) = stmt.query_row(rusqlite::params![path], |row| row.get::<_, i64>(0)) {
                        found.push((id, path.clone()));
                    }
                }
                found
            };

            for (id, _) in &ids {
                let peers: Vec<i64> = ids.iter().filter(|(other_id, _)| other_id != id).map(|(o, _)| *o).collect();
                let peers_json = serde_json::to_string(&peers).unwrap_or_else(|_| "[]".to_string());
                conn.execute(
                    &format!("UPDATE scanned_files SET {column} = ?1 WHERE id = ?2"),
                    rusqlite::params![peers_json, id],
                )?;
            }
            Ok(WriteOutcome::ok())
        });
    }
}

struct ResultRow {
    id: i64,
    file_path: String,
    artifact_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::WriteOutcome;

    fn setup() -> (Arc<DbQueue>, Arc<ConfigStore>, Arc<ShutdownCoordinator>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = DbQueue::open(&dir.path().join("db.sqlite3")).unwrap();
        let config = Arc::new(ConfigStore::load_or_default(&[dir.path().join("config.json")]).unwrap());
        let shutdown = Arc::new(ShutdownCoordinator::new());
        (db, config, shutdown, dir)
    }

    fn insert_scanned_file(db: &DbQueue, path: &str) -> i64 {
        let path = path.to_string();
        db.enqueue_read(move |conn| {
            conn.execute(
                "INSERT INTO scanned_files (file_path, file_name, content_hash, created_at) \
                 VALUES (?1, ?1, 'h', strftime('%s','now'))",
                rusqlite::params![path],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .wait()
        .unwrap()
    }

    fn insert_result(db: &DbQueue, path: &str, mode: Mode, hash: &str) {
        let path = path.to_string();
        let mode_str = mode.as_str().to_string();
        let hash = hash.to_string();
        db.enqueue_write(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO processing_results \
                 (file_path, mode, success, artifact_hash, created_at) VALUES (?1, ?2, 1, ?3, strftime('%s','now'))",
                rusqlite::params![path, mode_str, hash],
            )?;
            Ok(WriteOutcome::ok())
        });
        db.wait_for_completion();
    }

    #[test]
    fn cluster_of_two_gets_symmetric_links() {
        let (db, config, shutdown, _dir) = setup();
        insert_scanned_file(&db, "/a.jpg");
        insert_scanned_file(&db, "/b.jpg");
        insert_result(&db, "/a.jpg", Mode::Fast, "same-hash");
        insert_result(&db, "/b.jpg", Mode::Fast, "same-hash");

        let linker = DuplicateLinker::new(db.clone(), config, shutdown);
        let clusters = linker.run_tick();
        assert_eq!(clusters, 1);

        let links_a: String = db
            .enqueue_read(|conn| {
                Ok(conn.query_row(
                    "SELECT links_fast FROM scanned_files WHERE file_path = '/a.jpg'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .wait()
            .unwrap();
        assert!(links_a.contains("2") || links_a != "[]");
    }

    #[test]
    fn unique_hash_is_not_linked() {
        let (db, config, shutdown, _dir) = setup();
        insert_scanned_file(&db, "/a.jpg");
        insert_result(&db, "/a.jpg", Mode::Fast, "unique-hash");

        let linker = DuplicateLinker::new(db, config, shutdown);
        let clusters = linker.run_tick();
        assert_eq!(clusters, 0);
    }

    #[test]
    fn second_tick_only_sees_new_results() {
        let (db, config, shutdown, _dir) = setup();
        insert_scanned_file(&db, "/a.jpg");
        insert_result(&db, "/a.jpg", Mode::Fast, "hash-1");

        let linker = DuplicateLinker::new(db.clone(), config, shutdown);
        linker.run_tick();

        insert_scanned_file(&db, "/b.jpg");
        insert_result(&db, "/b.jpg", Mode::Fast, "hash-2");
        let clusters = linker.run_tick();
        assert_eq!(clusters, 0);
    }

    #[test]
    fn mode_change_triggers_full_rescan() {
        let (db, config, shutdown, _dir) = setup();
        insert_scanned_file(&db, "/a.jpg");
        insert_scanned_file(&db, "/b.jpg");
        insert_result(&db, "/a.jpg", Mode::Fast, "same-hash");
        insert_result(&db, "/b.jpg", Mode::Fast, "same-hash");

        let linker = Arc::new(DuplicateLinker::new(db, config, shutdown));
        linker.run_tick();
        linker.full_rescan.store(true, Ordering::SeqCst);
        let clusters = linker.run_tick();
        assert_eq!(clusters, 1);
    }
}
