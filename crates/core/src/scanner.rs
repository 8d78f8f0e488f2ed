//! File Scanner — recursive directory traversal with permission-error
//! tolerance, per-file enabled-extension filtering, and insert-or-refresh
//! of the `scanned_files` table via the DB access queue.

use crate::config::ConfigStore;
use crate::db::{DbQueue, WriteOutcome};
use crate::error::Result;
use crate::hash;
use crate::types::{MediaType, ScanStats};
use ignore::WalkBuilder;
use rusqlite::OptionalExtension;
use std::path::Path;
use std::sync::Arc;

/// Callback invoked once per newly-inserted or newly-changed file. The
/// scheduler or CLI binds this to the processing pipeline's wake
/// primitive.
pub type NeedsProcessingHook = Arc<dyn Fn(&str) + Send + Sync>;

pub struct FileScanner {
    db: Arc<DbQueue>,
    config: Arc<ConfigStore>,
    on_needs_processing: Option<NeedsProcessingHook>,
}

impl FileScanner {
    pub fn new(db: Arc<DbQueue>, config: Arc<ConfigStore>) -> Self {
        Self { db, config, on_needs_processing: None }
    }

    pub fn with_hook(mut self, hook: NeedsProcessingHook) -> Self {
        self.on_needs_processing = Some(hook);
        self
    }

    /// Walks `root` (recursively if `recursive`), classifies each entry,
    /// and inserts-or-refreshes it into `scanned_files`. Permission errors
    /// and unreadable subtrees are logged and skipped — the scan itself
    /// never fails.
    pub fn scan(&self, root: &Path, recursive: bool) -> ScanStats {
        let mut stats = ScanStats::default();

        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .max_depth(if recursive { None } else { Some(1) });

        for entry in builder.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("scan: skipping unreadable entry: {e}");
                    stats.skipped += 1;
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let path = entry.path();
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();

            stats.discovered += 1;
            let Some(_media_type) = self.classify(&extension) else {
                stats.skipped += 1;
                continue;
            };

            let needs_transcode = self.config.needs_transcoding(&extension);

            match self.insert_or_refresh(path, needs_transcode) {
                Ok(Refresh::Unchanged) => stats.unchanged += 1,
                Ok(Refresh::New) | Ok(Refresh::Changed) => {
                    stats.changed += 1;
                    if let Some(hook) = &self.on_needs_processing {
                        hook(&path.to_string_lossy());
                    }
                }
                Err(e) => {
                    tracing::warn!("scan: failed to index {}: {e}", path.display());
                    stats.skipped += 1;
                }
            }
        }

        stats
    }

    /// Maps an extension to a `MediaType` via the configured category
    /// tables; `None` if the extension is not enabled in any category
    /// (counted as skipped, never inserted).
    fn classify(&self, extension: &str) -> Option<MediaType> {
        if self.config.category_enabled("images_raw", extension) {
            Some(MediaType::ImageRaw)
        } else if self.config.category_enabled("images", extension) {
            Some(MediaType::Image)
        } else if self.config.category_enabled("video", extension) {
            Some(MediaType::Video)
        } else if self.config.category_enabled("audio", extension) {
            Some(MediaType::Audio)
        } else {
            None
        }
    }

    /// Computes the content hash (I/O bound) before enqueueing, then
    /// performs the insert-or-refresh write closure through the DB queue;
    /// hashing happens outside the DB worker so it never blocks it.
    fn insert_or_refresh(&self, path: &Path, needs_transcode: bool) -> Result<Refresh> {
        let new_hash = hash::content_hash(path)?;
        let file_path = path.to_string_lossy().to_string();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let (tx, rx) = std::sync::mpsc::channel::<Refresh>();
        let result_path = file_path.clone();
        self.db.enqueue_write(move |conn| {
            let existing: Option<(i64, Option<String>)> = conn
                .query_row(
                    "SELECT id, content_hash FROM scanned_files WHERE file_path = ?1",
                    rusqlite::params![result_path],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let outcome = match existing {
                None => {
                    conn.execute(
                        "INSERT INTO scanned_files (file_path, file_name, created_at) \
                         VALUES (?1, ?2, strftime('%s','now'))",
                        rusqlite::params![result_path, file_name],
                    )?;
                    Refresh::New
                }
                Some((_, None)) => Refresh::New,
                Some((id, Some(stored_hash))) if stored_hash == new_hash => {
                    let _ = id;
                    Refresh::Unchanged
                }
                Some((id, Some(_))) => {
                    conn.execute(
                        "UPDATE scanned_files SET content_hash = NULL, created_at = strftime('%s','now') \
                         WHERE id = ?1",
                        rusqlite::params![id],
                    )?;
                    Refresh::Changed
                }
            };
            let _ = tx.send(outcome);
            Ok(WriteOutcome::ok())
        });

        if needs_transcode {
            let transcode_path = file_path.clone();
            self.db.enqueue_write(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO transcode_map (source_path, status, created_at, updated_at) \
                     VALUES (?1, 0, strftime('%s','now'), strftime('%s','now'))",
                    rusqlite::params![transcode_path],
                )?;
                Ok(WriteOutcome::ok())
            });
        }

        self.db.wait_for_completion();
        rx.recv()
            .map_err(|_| crate::error::DedupError::DbFatal("scan write never completed".into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refresh {
    New,
    Unchanged,
    Changed,
}

impl std::ops::AddAssign for ScanStats {
    fn add_assign(&mut self, other: Self) {
        self.discovered += other.discovered;
        self.skipped += other.skipped;
        self.unchanged += other.unchanged;
        self.changed += other.changed;
    }
}

/// Entry point for the scheduled-scan trigger: scans every directory in
/// `dirs` (recursively) and returns the combined `ScanStats`. The trigger
/// itself (timer, `scan_interval_seconds`) lives outside this crate; this
/// function is what it calls on each tick.
pub fn scan_once(dirs: &[std::path::PathBuf], config: Arc<ConfigStore>, db: Arc<DbQueue>) -> ScanStats {
    let scanner = FileScanner::new(db, config);
    let mut total = ScanStats::default();
    for dir in dirs {
        total += scanner.scan(dir, true);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;

    fn setup() -> (Arc<DbQueue>, Arc<ConfigStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = DbQueue::open(&dir.path().join("db.sqlite3")).unwrap();
        let config = Arc::new(ConfigStore::load_or_default(&[dir.path().join("config.json")]).unwrap());
        (db, config, dir)
    }

    #[test]
    fn scan_inserts_enabled_extensions_and_skips_others() {
        let (db, config, dir) = setup();
        std::fs::write(dir.path().join("photo.jpg"), b"fake-jpeg").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"irrelevant").unwrap();

        let scanner = FileScanner::new(db.clone(), config);
        let stats = scanner.scan(dir.path(), true);

        assert_eq!(stats.discovered, 2);
        assert_eq!(stats.changed, 1);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn rescanning_unchanged_file_is_a_noop() {
        let (db, config, dir) = setup();
        std::fs::write(dir.path().join("photo.jpg"), b"fake-jpeg").unwrap();
        let scanner = FileScanner::new(db.clone(), config.clone());

        let first = scanner.scan(dir.path(), true);
        assert_eq!(first.changed, 1);

        let second = scanner.scan(dir.path(), true);
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.changed, 0);
    }

    #[test]
    fn changed_content_resets_hash_and_is_reported_as_changed() {
        let (db, config, dir) = setup();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, b"version-one").unwrap();
        let scanner = FileScanner::new(db.clone(), config.clone());
        scanner.scan(dir.path(), true);

        std::fs::write(&path, b"version-two-different-length").unwrap();
        let stats = scanner.scan(dir.path(), true);
        assert_eq!(stats.changed, 1);
    }

    #[test]
    fn raw_extension_is_additionally_enqueued_into_transcode_map() {
        let (db, config, dir) = setup();
        std::fs::write(dir.path().join("shot.cr2"), b"raw-bytes").unwrap();
        let scanner = FileScanner::new(db.clone(), config);
        scanner.scan(dir.path(), true);

        let count: i64 = db
            .enqueue_read(|conn| Ok(conn.query_row("SELECT count(*) FROM transcode_map", [], |r| r.get(0))?))
            .wait()
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn needs_processing_hook_fires_for_new_and_changed_files() {
        let (db, config, dir) = setup();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let scanner = FileScanner::new(db.clone(), config)
            .with_hook(Arc::new(move |path| seen2.lock().unwrap().push(path.to_string())));

        std::fs::write(dir.path().join("a.jpg"), b"data").unwrap();
        scanner.scan(dir.path(), true);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
