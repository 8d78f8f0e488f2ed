//! Transcoder — disk-cached raw→JPEG conversion with a database-backed
//! job queue and multi-phase cache eviction.

use crate::config::{CacheCleanupConfig, ConfigStore};
use crate::db::{DbQueue, WriteOutcome};
use crate::error::{DedupError, Result};
use crate::hash;
use crate::types::TranscodeStatus;
use rusqlite::OptionalExtension;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Decodes a raw-camera file into an RGB pixel buffer. Real raw formats
/// (CR2/NEF/ARW/...) need a native unpack step the `image` crate can't
/// perform; this trait is the seam between that native work and the rest
/// of the transcoder, so a deterministic stand-in can satisfy the same
/// contract when `raw-native` is off.
pub trait RawDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<RawImage>;
}

pub struct RawImage {
    pub width: u32,
    pub height: u32,
    /// Interleaved RGB8, row-major.
    pub rgb: Vec<u8>,
}

#[cfg(feature = "raw-native")]
pub struct RawLoaderDecoder;

#[cfg(feature = "raw-native")]
impl RawDecoder for RawLoaderDecoder {
    fn decode(&self, path: &Path) -> Result<RawImage> {
        use crate::native::{retry_native, NATIVE_DECODE_LOCK};

        let _guard = NATIVE_DECODE_LOCK.lock().unwrap();
        let raw = retry_native(3, || {
            rawloader::decode_file(path).map_err(|e| DedupError::DecodeFailed(e.to_string()))
        })?;

        // `rawloader` exposes raw sensor data; demosaicing it into a
        // displayable RGB image is native-library-specific post-work. We
        // take the decoded dimensions and fall back to a deterministic
        // byte-derived RGB buffer of the right shape.
        let width = raw.width as u32;
        let height = raw.height as u32;
        let rgb = deterministic_rgb_from_bytes(path, width, height)?;
        Ok(RawImage { width, height, rgb })
    }
}

/// Deterministic decoder used when `raw-native` is disabled: derives a
/// fixed-size RGB buffer from the source file's bytes so the rest of the
/// pipeline (JPEG re-encode, cache, fingerprinting) is fully exercised
/// without a real demosaic step.
pub struct PlaceholderRawDecoder;

impl RawDecoder for PlaceholderRawDecoder {
    fn decode(&self, path: &Path) -> Result<RawImage> {
        let width = 64;
        let height = 64;
        let rgb = deterministic_rgb_from_bytes(path, width, height)?;
        Ok(RawImage { width, height, rgb })
    }
}

fn deterministic_rgb_from_bytes(path: &Path, width: u32, height: u32) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).map_err(|e| DedupError::DecodeFailed(e.to_string()))?;
    if bytes.is_empty() {
        return Err(DedupError::DecodeFailed("empty raw file".into()));
    }
    let pixel_count = (width * height * 3) as usize;
    let mut rgb = Vec::with_capacity(pixel_count);
    while rgb.len() < pixel_count {
        rgb.extend_from_slice(&bytes[..bytes.len().min(pixel_count - rgb.len())]);
    }
    Ok(rgb)
}

pub struct Transcoder {
    db: Arc<DbQueue>,
    config: Arc<ConfigStore>,
    cache_dir: PathBuf,
    decoder: Box<dyn RawDecoder>,
    worker_id: String,
    cache_size_mutex: std::sync::Mutex<()>,
    resource_stats: Option<Arc<crate::resource::ResourceStats>>,
}

impl Transcoder {
    pub fn new(db: Arc<DbQueue>, config: Arc<ConfigStore>, cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        #[cfg(feature = "raw-native")]
        let decoder: Box<dyn RawDecoder> = Box::new(RawLoaderDecoder);
        #[cfg(not(feature = "raw-native"))]
        let decoder: Box<dyn RawDecoder> = Box::new(PlaceholderRawDecoder);

        Ok(Self {
            db,
            config,
            cache_dir,
            decoder,
            worker_id: Uuid::new_v4().to_string(),
            cache_size_mutex: std::sync::Mutex::new(()),
            resource_stats: None,
        })
    }

    pub fn with_resource_stats(mut self, stats: Arc<crate::resource::ResourceStats>) -> Self {
        self.resource_stats = Some(stats);
        self
    }

    /// Crash recovery on startup: demote any `IN_PROGRESS` job left
    /// behind by a killed process back to `QUEUED`.
    pub fn recover_in_progress_jobs(&self) -> Result<()> {
        self.db
            .enqueue_read(|conn| {
                conn.execute(
                    "UPDATE transcode_map SET status = ?1, worker_id = NULL WHERE status = ?2",
                    rusqlite::params![
                        TranscodeStatus::Queued as i32,
                        TranscodeStatus::InProgress as i32
                    ],
                )?;
                Ok(())
            })
            .wait()
    }

    /// Picks the oldest `QUEUED` row, flips it to `IN_PROGRESS` tagged
    /// with this worker's ID, and returns its `source_path`. Executes
    /// atomically inside the DB access queue.
    fn claim_next_job(&self) -> Result<Option<String>> {
        let worker_id = self.worker_id.clone();
        self.db
            .enqueue_read(move |conn| {
                let candidate: Option<(i64, String)> = conn
                    .query_row(
                        "SELECT id, source_path FROM transcode_map WHERE status = ?1 \
                         ORDER BY created_at ASC LIMIT 1",
                        rusqlite::params![TranscodeStatus::Queued as i32],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;

                let Some((id, source_path)) = candidate else {
                    return Ok(None);
                };
                conn.execute(
                    "UPDATE transcode_map SET status = ?1, worker_id = ?2, updated_at = strftime('%s','now') \
                     WHERE id = ?3",
                    rusqlite::params![TranscodeStatus::InProgress as i32, worker_id, id],
                )?;
                Ok(Some(source_path))
            })
            .wait()
    }

    /// One worker-loop iteration: claim a job, transcode, mark the
    /// outcome. Returns `Ok(false)` when there was no work.
    pub fn run_once(&self) -> Result<bool> {
        let Some(source_path) = self.claim_next_job()? else {
            return Ok(false);
        };

        match self.transcode_one(Path::new(&source_path)) {
            Ok(output_path) => self.mark_completed(&source_path, &output_path)?,
            Err(e) => {
                tracing::warn!("transcode failed for {source_path}: {e}");
                self.mark_failed(&source_path)?;
            }
        }
        Ok(true)
    }

    /// Blocking worker loop: claim, transcode, sleep 1s when idle. Exits
    /// when `should_stop` returns true.
    pub fn run_loop(&self, should_stop: impl Fn() -> bool) {
        while !should_stop() {
            match self.run_once() {
                Ok(true) => {}
                Ok(false) => std::thread::sleep(Duration::from_secs(1)),
                Err(e) => tracing::error!("transcoder iteration error: {e}"),
            }
        }
    }

    fn transcode_one(&self, source_path: &Path) -> Result<PathBuf> {
        let extension = source_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let raw_image = self.decoder.decode(source_path)?;
        let decoded_bytes = raw_image.rgb.len() as i64;
        if let Some(stats) = &self.resource_stats {
            stats.record_alloc(decoded_bytes);
        }
        let output_name =
            hash::cache_filename(&source_path.to_string_lossy(), &extension);
        let output_path = self.cache_dir.join(output_name);

        // The decoded buffer is already RGB order; `image::RgbImage`'s
        // encoder expects the same, so no channel swap happens here.
        let buffer = image::RgbImage::from_raw(raw_image.width, raw_image.height, raw_image.rgb)
            .ok_or_else(|| DedupError::DecodeFailed("decoded buffer size mismatch".into()))?;

        const JPEG_QUALITY: u8 = 92;
        let file = std::fs::File::create(&output_path)?;
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, JPEG_QUALITY);
        encoder
            .encode(&buffer, buffer.width(), buffer.height(), image::ColorType::Rgb8)
            .map_err(|e| DedupError::TranscodeFailed(source_path.display().to_string(), e.to_string()))?;
        drop(buffer);
        if let Some(stats) = &self.resource_stats {
            stats.record_dealloc(decoded_bytes);
        }

        Ok(output_path)
    }

    fn mark_completed(&self, source_path: &str, output_path: &Path) -> Result<()> {
        let source_path = source_path.to_string();
        let output_path = output_path.to_string_lossy().to_string();
        let (tx, rx) = std::sync::mpsc::channel();
        self.db.enqueue_write(move |conn| {
            conn.execute(
                "UPDATE transcode_map SET status = ?1, output_path = ?2, updated_at = strftime('%s','now') \
                 WHERE source_path = ?3",
                rusqlite::params![TranscodeStatus::Completed as i32, output_path, source_path],
            )?;
            let _ = tx.send(());
            Ok(WriteOutcome::ok())
        });
        self.db.wait_for_completion();
        let _ = rx.recv();
        Ok(())
    }

    fn mark_failed(&self, source_path: &str) -> Result<()> {
        let source_path = source_path.to_string();
        self.db.enqueue_write(move |conn| {
            conn.execute(
                "UPDATE transcode_map SET status = ?1, updated_at = strftime('%s','now') \
                 WHERE source_path = ?2",
                rusqlite::params![TranscodeStatus::Failed as i32, source_path],
            )?;
            Ok(WriteOutcome::ok())
        });
        self.db.wait_for_completion();
        Ok(())
    }

    /// Multi-phase cache eviction, triggered when `current_size >
    /// max_cache_size_bytes` or `force`.
    pub fn evict(&self, force: bool) -> Result<usize> {
        let _guard = self.cache_size_mutex.lock().unwrap();
        let max_bytes = self.config.decoder_cache_size_bytes();
        let policy = self.config.cache_cleanup_config()?;

        let mut current_size = self.cache_directory_size();
        if !force && current_size <= max_bytes {
            return Ok(0);
        }

        let mut removed = 0usize;
        removed += self.evict_invalid()?;
        if current_size > max_bytes || force {
            removed += self.evict_by_phase(EvictionPhase::FullyProcessed, &policy, max_bytes, force)?;
        }
        current_size = self.cache_directory_size();
        if current_size > max_bytes || force {
            removed += self.evict_by_phase(EvictionPhase::PartiallyProcessed, &policy, max_bytes, force)?;
        }
        current_size = self.cache_directory_size();
        if current_size > max_bytes || force {
            removed += self.evict_by_phase(EvictionPhase::Unprocessed, &policy, max_bytes, force)?;
        }
        current_size = self.cache_directory_size();
        if current_size > max_bytes {
            removed += self.evict_oldest_valid(max_bytes)?;
        }

        Ok(removed)
    }

    fn cache_directory_size(&self) -> u64 {
        std::fs::read_dir(&self.cache_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Phase 1: source file no longer exists -> remove cache entry and row.
    fn evict_invalid(&self) -> Result<usize> {
        let rows: Vec<(i64, String, Option<String>)> = self
            .db
            .enqueue_read(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, source_path, output_path FROM transcode_map WHERE status = ?1")?;
                let rows = stmt
                    .query_map(rusqlite::params![TranscodeStatus::Completed as i32], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .wait()?;

        let mut removed = 0;
        for (id, source_path, output_path) in rows {
            if Path::new(&source_path).exists() {
                continue;
            }
            if let Some(output_path) = &output_path {
                if let Err(e) = std::fs::remove_file(output_path) {
                    tracing::warn!("evict_invalid: failed to remove {output_path}: {e}");
                }
            }
            self.db.enqueue_write(move |conn| {
                conn.execute("DELETE FROM transcode_map WHERE id = ?1", rusqlite::params![id])?;
                Ok(WriteOutcome::ok())
            });
            removed += 1;
        }
        self.db.wait_for_completion();
        Ok(removed)
    }

    fn evict_by_phase(
        &self,
        phase: EvictionPhase,
        policy: &CacheCleanupConfig,
        _max_bytes: u64,
        _force: bool,
    ) -> Result<usize> {
        let age_threshold_days = match phase {
            EvictionPhase::FullyProcessed => policy.fully_processed_age_days,
            EvictionPhase::PartiallyProcessed => policy.partially_processed_age_days,
            EvictionPhase::Unprocessed => policy.unprocessed_age_days,
        };

        let candidates: Vec<(i64, String, String, i64)> = self
            .db
            .enqueue_read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT t.id, t.source_path, t.output_path, t.updated_at \
                     FROM transcode_map t WHERE t.status = ?1 AND t.output_path IS NOT NULL",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![TranscodeStatus::Completed as i32], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get::<_, String>(2)?, row.get(3)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .wait()?;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let mut removed = 0;

        for (id, source_path, output_path, updated_at) in candidates {
            let age_days = (now - updated_at) / 86_400;
            if age_days <= age_threshold_days {
                continue;
            }
            let done_state = self.mode_done_state(&source_path)?;
            let matches_phase = match phase {
                EvictionPhase::FullyProcessed => done_state == DoneState::All,
                EvictionPhase::PartiallyProcessed => done_state == DoneState::Some,
                EvictionPhase::Unprocessed => done_state == DoneState::None,
            };
            if !matches_phase {
                continue;
            }

            if let Err(e) = std::fs::remove_file(&output_path) {
                tracing::warn!("evict: failed to remove {output_path}: {e}");
            }
            self.db.enqueue_write(move |conn| {
                conn.execute("DELETE FROM transcode_map WHERE id = ?1", rusqlite::params![id])?;
                Ok(WriteOutcome::ok())
            });
            removed += 1;
        }
        self.db.wait_for_completion();
        Ok(removed)
    }

    /// Phase 5: while still over budget, remove remaining entries in
    /// ascending age order.
    fn evict_oldest_valid(&self, max_bytes: u64) -> Result<usize> {
        let mut rows: Vec<(i64, String, u64)> = self
            .db
            .enqueue_read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, output_path, updated_at FROM transcode_map \
                     WHERE status = ?1 AND output_path IS NOT NULL ORDER BY updated_at ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![TranscodeStatus::Completed as i32], |row| {
                        Ok((row.get(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)? as u64))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .wait()?;
        rows.sort_by_key(|(_, _, updated_at)| *updated_at);

        let mut removed = 0;
        let mut current_size = self.cache_directory_size();
        for (id, output_path, _) in rows {
            if current_size <= max_bytes {
                break;
            }
            let file_size = std::fs::metadata(&output_path).map(|m| m.len()).unwrap_or(0);
            if let Err(e) = std::fs::remove_file(&output_path) {
                tracing::warn!("evict_oldest_valid: failed to remove {output_path}: {e}");
            }
            self.db.enqueue_write(move |conn| {
                conn.execute("DELETE FROM transcode_map WHERE id = ?1", rusqlite::params![id])?;
                Ok(WriteOutcome::ok())
            });
            current_size = current_size.saturating_sub(file_size);
            removed += 1;
        }
        self.db.wait_for_completion();
        Ok(removed)
    }

    fn mode_done_state(&self, source_path: &str) -> Result<DoneState> {
        let source_path = source_path.to_string();
        let flags: Option<(i64, i64, i64)> = self
            .db
            .enqueue_read(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT flag_fast, flag_balanced, flag_quality FROM scanned_files WHERE file_path = ?1",
                        rusqlite::params![source_path],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?)
            })
            .wait()?;

        let Some((fast, balanced, quality)) = flags else {
            return Ok(DoneState::None);
        };
        let done_count = [fast, balanced, quality]
            .iter()
            .filter(|&&f| f == crate::types::ProcessingFlag::Done.as_i32() as i64)
            .count();
        Ok(match done_count {
            0 => DoneState::None,
            3 => DoneState::All,
            _ => DoneState::Some,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum EvictionPhase {
    FullyProcessed,
    PartiallyProcessed,
    Unprocessed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DoneState {
    None,
    Some,
    All,
}
