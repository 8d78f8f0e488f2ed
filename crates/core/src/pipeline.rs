//! Processing Pipeline — the single long-lived worker that claims
//! batches of pending (file, mode) pairs, fingerprints them, and
//! persists results.

use crate::config::ConfigStore;
use crate::db::{DbQueue, WriteOutcome};
use crate::error::Result;
use crate::fingerprint::FingerprintEngine;
use crate::shutdown::ShutdownCoordinator;
use crate::types::{Mode, ProcessingFlag, TranscodeStatus};
use rusqlite::OptionalExtension;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lock-free mirror of the config keys the worker reads on every
/// iteration, so the hot loop never touches the config mutex directly.
struct MirroredConfig {
    batch_size: AtomicI64,
    interval_seconds: AtomicI64,
    pre_process_quality_stack: AtomicBool,
    dedup_mode: AtomicU8,
    mode_change_observations: AtomicI64,
}

impl MirroredConfig {
    fn snapshot_from(config: &ConfigStore) -> Self {
        Self {
            batch_size: AtomicI64::new(config.processing_batch_size()),
            interval_seconds: AtomicI64::new(config.processing_interval_seconds()),
            pre_process_quality_stack: AtomicBool::new(config.pre_process_quality_stack()),
            dedup_mode: AtomicU8::new(mode_to_u8(config.dedup_mode())),
            mode_change_observations: AtomicI64::new(0),
        }
    }

    fn dedup_mode(&self) -> Mode {
        u8_to_mode(self.dedup_mode.load(Ordering::Relaxed))
    }
}

fn mode_to_u8(mode: Mode) -> u8 {
    match mode {
        Mode::Fast => 0,
        Mode::Balanced => 1,
        Mode::Quality => 2,
    }
}

fn u8_to_mode(value: u8) -> Mode {
    match value {
        0 => Mode::Fast,
        1 => Mode::Balanced,
        _ => Mode::Quality,
    }
}

struct ClaimedFile {
    id: i64,
    file_path: String,
    modes: Vec<Mode>,
}

enum EffectivePath {
    Direct(String),
    /// Raw file with no completed transcode yet; re-queued to the
    /// transcoder.
    Pending,
    /// Raw file whose transcode failed permanently.
    TranscodeFailedPermanently,
}

pub struct ProcessingPipeline {
    db: Arc<DbQueue>,
    config: Arc<ConfigStore>,
    fingerprint: FingerprintEngine,
    shutdown: Arc<ShutdownCoordinator>,
    mirrored: MirroredConfig,
    on_success: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl ProcessingPipeline {
    pub fn new(
        db: Arc<DbQueue>,
        config: Arc<ConfigStore>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        let mirrored = MirroredConfig::snapshot_from(&config);
        let fingerprint = FingerprintEngine::new(config.clone());
        Self { db, config, fingerprint, shutdown, mirrored, on_success: None }
    }

    pub fn with_success_hook(mut self, hook: Arc<dyn Fn() + Send + Sync>) -> Self {
        self.on_success = Some(hook);
        self
    }

    /// Subscribes to config changes so the mirrored atomics stay current
    /// without the hot loop ever locking the config document.
    pub fn subscribe_to_config(self: &Arc<Self>) {
        let this = self.clone();
        self.config.bus().subscribe(Box::new(move |event| {
            for key in &event.changed_keys {
                match key.as_str() {
                    "processing_batch_size" => this
                        .mirrored
                        .batch_size
                        .store(this.config.processing_batch_size(), Ordering::Relaxed),
                    "processing_interval_seconds" => this
                        .mirrored
                        .interval_seconds
                        .store(this.config.processing_interval_seconds(), Ordering::Relaxed),
                    "pre_process_quality_stack" => this
                        .mirrored
                        .pre_process_quality_stack
                        .store(this.config.pre_process_quality_stack(), Ordering::Relaxed),
                    "dedup_mode" | "configuration" => {
                        let new_mode = mode_to_u8(this.config.dedup_mode());
                        if this.mirrored.dedup_mode.swap(new_mode, Ordering::Relaxed) != new_mode {
                            this.mirrored
                                .mode_change_observations
                                .fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    _ => {}
                }
            }
        }));
    }

    pub fn mode_change_observations(&self) -> i64 {
        self.mirrored.mode_change_observations.load(Ordering::Relaxed)
    }

    /// Runs the worker loop until shutdown is requested. Every sleep and
    /// every batch boundary checks the shutdown flag.
    pub fn run_loop(&self) {
        while !self.shutdown.is_shutdown_requested() {
            let did_work = self.run_iteration();
            if !did_work {
                let interval = Duration::from_secs(self.mirrored.interval_seconds.load(Ordering::Relaxed).max(0) as u64);
                self.sleep_cancellable(interval);
            }
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

    /// One iteration: claim a batch, process every claimed file. Returns
    /// whether any work was found.
    pub fn run_iteration(&self) -> bool {
        let stacking = self.mirrored.pre_process_quality_stack.load(Ordering::Relaxed);
        let batch_size = self.mirrored.batch_size.load(Ordering::Relaxed).max(0);
        let active_mode = self.mirrored.dedup_mode();

        let batch = if stacking {
            self.claim_files_any_mode(batch_size)
        } else {
            self.claim_files_for_mode(active_mode, batch_size)
        };

        if batch.is_empty() {
            return false;
        }

        for file in batch {
            if self.shutdown.is_shutdown_requested() {
                break;
            }
            self.process_claimed_file(file);
        }
        true
    }

    fn claim_files_for_mode(&self, mode: Mode, batch_size: i64) -> Vec<ClaimedFile> {
        let column = mode.flag_column().to_string();
        self.db
            .enqueue_read(move |conn| {
                let select_sql = format!(
                    "SELECT id, file_path FROM scanned_files WHERE {column} = ?1 \
                     ORDER BY created_at ASC LIMIT ?2"
                );
                let ids: Vec<(i64, String)> = {
                    let mut stmt = conn.prepare(&select_sql)?;
                    stmt.query_map(
                        rusqlite::params![ProcessingFlag::Unprocessed.as_i32(), batch_size],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?
                };

                let update_sql = format!("UPDATE scanned_files SET {column} = ?1 WHERE id = ?2");
                for (id, _) in &ids {
                    conn.execute(&update_sql, rusqlite::params![ProcessingFlag::InProgress.as_i32(), id])?;
                }

                Ok(ids
                    .into_iter()
                    .map(|(id, file_path)| ClaimedFile { id, file_path, modes: vec![mode] })
                    .collect())
            })
            .wait()
            .unwrap_or_default()
    }

    fn claim_files_any_mode(&self, batch_size: i64) -> Vec<ClaimedFile> {
        self.db
            .enqueue_read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, file_path, flag_fast, flag_balanced, flag_quality FROM scanned_files \
                     WHERE flag_fast = ?1 OR flag_balanced = ?1 OR flag_quality = ?1 \
                     ORDER BY created_at ASC LIMIT ?2",
                )?;
                let rows: Vec<(i64, String, i64, i64, i64)> = stmt
                    .query_map(
                        rusqlite::params![ProcessingFlag::Unprocessed.as_i32(), batch_size],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let mut claimed = Vec::new();
                for (id, file_path, flag_fast, flag_balanced, flag_quality) in rows {
                    let mut modes = Vec::new();
                    for (mode, flag) in
                        [(Mode::Fast, flag_fast), (Mode::Balanced, flag_balanced), (Mode::Quality, flag_quality)]
                    {
                        if flag == ProcessingFlag::Unprocessed.as_i32() as i64 {
                            modes.push(mode);
                        }
                    }
                    for mode in &modes {
                        let column = mode.flag_column().to_string();
                        conn.execute(
                            &format!("UPDATE scanned_files SET {column} = ?1 WHERE id = ?2"),
                            rusqlite::params![ProcessingFlag::InProgress.as_i32(), id],
                        )?;
                    }
                    claimed.push(ClaimedFile { id, file_path, modes });
                }
                Ok(claimed)
            })
            .wait()
            .unwrap_or_default()
    }

    fn process_claimed_file(&self, file: ClaimedFile) {
        let extension = std::path::Path::new(&file.file_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let effective = if self.config.needs_transcoding(&extension) {
            self.resolve_transcoded_path(&file.file_path)
        } else {
            EffectivePath::Direct(file.file_path.clone())
        };

        let path = match effective {
            EffectivePath::Direct(path) => path,
            EffectivePath::Pending => {
                self.ensure_transcode_queued(&file.file_path);
                self.reset_flags(file.id, &file.modes, ProcessingFlag::Unprocessed);
                return;
            }
            EffectivePath::TranscodeFailedPermanently => {
                self.reset_flags(file.id, &file.modes, ProcessingFlag::TranscodeError);
                return;
            }
        };

        let mut any_success = false;
        for mode in file.modes {
            match self.fingerprint.process_file(std::path::Path::new(&path), mode) {
                Ok(artifact) => {
                    self.persist_success(&file.file_path, mode, &artifact);
                    self.set_flag(file.id, mode, ProcessingFlag::Done);
                    any_success = true;
                }
                Err(e) => {
                    self.persist_failure(&file.file_path, mode, &e.to_string());
                    self.set_flag(file.id, mode, ProcessingFlag::Unprocessed);
                }
            }
        }

        if any_success {
            if let Some(hook) = &self.on_success {
                hook();
            }
        }
    }

    fn resolve_transcoded_path(&self, source_path: &str) -> EffectivePath {
        let source_path = source_path.to_string();
        let status_and_output: Option<(i64, Option<String>)> = self
            .db
            .enqueue_read(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT status, output_path FROM transcode_map WHERE source_path = ?1",
                        rusqlite::params![source_path],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?)
            })
            .wait()
            .unwrap_or(None);

        match status_and_output {
            Some((status, Some(output_path))) if status == TranscodeStatus::Completed as i64 => {
                EffectivePath::Direct(output_path)
            }
            Some((status, _)) if status == TranscodeStatus::Failed as i64 => {
                EffectivePath::TranscodeFailedPermanently
            }
            _ => EffectivePath::Pending,
        }
    }

    /// A raw file can reach `EffectivePath::Pending` with no `transcode_map`
    /// row at all — e.g. its completed cache entry was evicted under size
    /// pressure after the row itself was cleaned up. Re-seed the row here
    /// (mirroring the scanner's own insert) so the transcoder actually has
    /// a job to pick up; otherwise the flag reset below would just put the
    /// file back in line for the same no-progress `Pending` outcome.
    fn ensure_transcode_queued(&self, source_path: &str) {
        let source_path = source_path.to_string();
        self.db.enqueue_write(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO transcode_map (source_path, status, created_at, updated_at) \
                 VALUES (?1, ?2, strftime('%s','now'), strftime('%s','now'))",
                rusqlite::params![source_path, TranscodeStatus::Queued as i32],
            )?;
            Ok(WriteOutcome::ok())
        });
    }

    fn reset_flags(&self, scanned_file_id: i64, modes: &[Mode], flag: ProcessingFlag) {
        for mode in modes {
            self.set_flag(scanned_file_id, *mode, flag);
        }
    }

    fn set_flag(&self, scanned_file_id: i64, mode: Mode, flag: ProcessingFlag) {
        let column = mode.flag_column().to_string();
        self.db.enqueue_write(move |conn| {
            conn.execute(
                &format!("UPDATE scanned_files SET {column} = ?1 WHERE id = ?2"),
                rusqlite::params![flag.as_i32(), scanned_file_id],
            )?;
            Ok(WriteOutcome::ok())
        });
    }

    fn persist_success(&self, file_path: &str, mode: Mode, artifact: &crate::types::Artifact) {
        let file_path = file_path.to_string();
        let mode_str = mode.as_str().to_string();
        let format = artifact.format.to_string();
        let data = artifact.data.clone();
        let hash = artifact.hash.clone();
        let confidence = artifact.confidence;
        let metadata = artifact.metadata.to_string();
        self.db.enqueue_write(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO processing_results \
                 (file_path, mode, success, error_message, artifact_format, artifact_data, \
                  artifact_hash, artifact_confidence, artifact_metadata, created_at) \
                 VALUES (?1, ?2, 1, NULL, ?3, ?4, ?5, ?6, ?7, strftime('%s','now'))",
                rusqlite::params![file_path, mode_str, format, data, hash, confidence, metadata],
            )?;
            Ok(WriteOutcome::ok())
        });
    }

    fn persist_failure(&self, file_path: &str, mode: Mode, message: &str) {
        let file_path = file_path.to_string();
        let mode_str = mode.as_str().to_string();
        let message = message.to_string();
        self.db.enqueue_write(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO processing_results \
                 (file_path, mode, success, error_message, created_at) \
                 VALUES (?1, ?2, 0, ?3, strftime('%s','now'))",
                rusqlite::params![file_path, mode_str, message],
            )?;
            Ok(WriteOutcome::ok())
        });
    }
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

    #[test]
    fn run_iteration_processes_claimed_image_and_marks_done() {
        let (db, config, shutdown, dir) = setup();
        let path = dir.path().join("a.jpg");
        image::ImageBuffer::from_fn(8, 8, |x, y| image::Rgb([x as u8, y as u8, 0]))
            .save(&path)
            .unwrap();
        insert_scanned_file(&db, &path.to_string_lossy());

        let pipeline = ProcessingPipeline::new(db.clone(), config, shutdown);
        let did_work = pipeline.run_iteration();
        assert!(did_work);

        let flag: i64 = db
            .enqueue_read(|conn| Ok(conn.query_row("SELECT flag_fast FROM scanned_files", [], |r| r.get(0))?))
            .wait()
            .unwrap();
        assert_eq!(flag, ProcessingFlag::Done.as_i32() as i64);

        let success: i64 = db
            .enqueue_read(|conn| Ok(conn.query_row("SELECT success FROM processing_results", [], |r| r.get(0))?))
            .wait()
            .unwrap();
        assert_eq!(success, 1);
    }

    #[test]
    fn raw_file_pending_transcode_is_requeued_and_flag_reset() {
        let (db, config, shutdown, dir) = setup();
        let path = dir.path().join("shot.cr2");
        std::fs::write(&path, b"raw-bytes").unwrap();
        insert_scanned_file(&db, &path.to_string_lossy());
        db.enqueue_write({
            let path = path.to_string_lossy().to_string();
            move |conn| {
                conn.execute(
                    "INSERT INTO transcode_map (source_path, status, created_at, updated_at) \
                     VALUES (?1, 0, 0, 0)",
                    rusqlite::params![path],
                )?;
                Ok(WriteOutcome::ok())
            }
        });
        db.wait_for_completion();

        let pipeline = ProcessingPipeline::new(db.clone(), config, shutdown);
        pipeline.run_iteration();

        let flag: i64 = db
            .enqueue_read(|conn| Ok(conn.query_row("SELECT flag_fast FROM scanned_files", [], |r| r.get(0))?))
            .wait()
            .unwrap();
        assert_eq!(flag, ProcessingFlag::Unprocessed.as_i32() as i64);
    }

    #[test]
    fn raw_file_with_no_transcode_map_row_gets_one_queued() {
        let (db, config, shutdown, dir) = setup();
        let path = dir.path().join("shot.cr2");
        std::fs::write(&path, b"raw-bytes").unwrap();
        insert_scanned_file(&db, &path.to_string_lossy());

        let pipeline = ProcessingPipeline::new(db.clone(), config, shutdown);
        pipeline.run_iteration();

        let (status, source_path): (i64, String) = db
            .enqueue_read(|conn| {
                Ok(conn.query_row(
                    "SELECT status, source_path FROM transcode_map",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?)
            })
            .wait()
            .unwrap();
        assert_eq!(status, TranscodeStatus::Queued as i64);
        assert_eq!(source_path, path.to_string_lossy());

        let flag: i64 = db
            .enqueue_read(|conn| Ok(conn.query_row("SELECT flag_fast FROM scanned_files", [], |r| r.get(0))?))
            .wait()
            .unwrap();
        assert_eq!(flag, ProcessingFlag::Unprocessed.as_i32() as i64);
    }

    #[test]
    fn success_hook_fires_on_at_least_one_successful_mode() {
        let (db, config, shutdown, dir) = setup();
        let path = dir.path().join("a.png");
        image::ImageBuffer::from_fn(8, 8, |x, y| image::Rgb([x as u8, y as u8, 2]))
            .save(&path)
            .unwrap();
        insert_scanned_file(&db, &path.to_string_lossy());

        let notified = Arc::new(AtomicBool::new(false));
        let notified2 = notified.clone();
        let pipeline = ProcessingPipeline::new(db, config, shutdown)
            .with_success_hook(Arc::new(move || notified2.store(true, Ordering::SeqCst)));
        pipeline.run_iteration();
        assert!(notified.load(Ordering::SeqCst));
    }
}
