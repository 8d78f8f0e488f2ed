//! Config Store and Observer Bus.

mod defaults;
pub mod document;
mod observer;
mod watcher;

pub use document::{CacheCleanupConfig, RetryConfig, TimeoutConfig, VideoSamplingParams};
pub use observer::{ConfigUpdateEvent, Handler, ObserverBus, SubscriptionId};
pub use watcher::ConfigWatcher;

use crate::error::Result;
use crate::types::Mode;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Typed, thread-safe key/value store over a nested JSON document.
pub struct ConfigStore {
    document: Mutex<Value>,
    bus: ObserverBus,
}

impl ConfigStore {
    /// Search `candidate_paths` in order; load the first that exists. A
    /// `.yaml`/`.yml` candidate is read read-only and migrated to JSON at
    /// the *first* JSON candidate path. If none exist, the built-in
    /// default document (`defaults::DEFAULT_CONFIG_JSON`) is materialized
    /// to the first candidate path.
    pub fn load_or_default(candidate_paths: &[PathBuf]) -> Result<Self> {
        for path in candidate_paths {
            if is_yaml(path) && path.exists() {
                let migrated = document::migrate_yaml(path)?;
                let json_path = candidate_paths
                    .iter()
                    .find(|p| !is_yaml(p))
                    .cloned()
                    .unwrap_or_else(|| path.with_extension("json"));
                document::save_atomic(&json_path, &migrated)?;
                return Ok(Self {
                    document: Mutex::new(migrated),
                    bus: ObserverBus::new(),
                });
            }
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                let value: Value = serde_json::from_str(&text)?;
                return Ok(Self { document: Mutex::new(value), bus: ObserverBus::new() });
            }
        }

        let default_value: Value = serde_json::from_str(defaults::DEFAULT_CONFIG_JSON)?;
        if let Some(primary) = candidate_paths.first() {
            document::save_atomic(primary, &default_value)?;
        }
        Ok(Self { document: Mutex::new(default_value), bus: ObserverBus::new() })
    }

    pub fn bus(&self) -> &ObserverBus {
        &self.bus
    }

    // -- getters --------------------------------------------------------

    pub fn get_string(&self, key_path: &str) -> Option<String> {
        document::get_string(&self.document.lock().unwrap(), key_path)
    }

    pub fn get_bool(&self, key_path: &str) -> Option<bool> {
        document::get_bool(&self.document.lock().unwrap(), key_path)
    }

    pub fn get_i64(&self, key_path: &str) -> Option<i64> {
        document::get_i64(&self.document.lock().unwrap(), key_path)
    }

    pub fn get_f64(&self, key_path: &str) -> Option<f64> {
        document::get_f64(&self.document.lock().unwrap(), key_path)
    }

    pub fn dedup_mode(&self) -> Mode {
        self.get_string("dedup_mode")
            .and_then(|s| s.parse().ok())
            .unwrap_or(Mode::Fast)
    }

    pub fn pre_process_quality_stack(&self) -> bool {
        self.get_bool("pre_process_quality_stack").unwrap_or(false)
    }

    pub fn processing_batch_size(&self) -> i64 {
        self.get_i64("processing_batch_size").unwrap_or(50)
    }

    pub fn processing_interval_seconds(&self) -> i64 {
        self.get_i64("processing_interval_seconds").unwrap_or(5)
    }

    pub fn decoder_cache_size_bytes(&self) -> u64 {
        let mb = self.get_i64("decoder_cache_size_mb").unwrap_or(512).max(0) as u64;
        mb * 1024 * 1024
    }

    pub fn retry_config(&self) -> Result<RetryConfig> {
        let doc = self.document.lock().unwrap();
        Ok(document::get_typed(&doc, "database.retry")?.unwrap_or(RetryConfig {
            max_attempts: 5,
            backoff_base_ms: 100,
            max_backoff_ms: 5000,
        }))
    }

    pub fn timeout_config(&self) -> Result<TimeoutConfig> {
        let doc = self.document.lock().unwrap();
        Ok(document::get_typed(&doc, "database.timeout")?.unwrap_or(TimeoutConfig {
            busy_timeout_ms: 5000,
            operation_timeout_ms: 30000,
        }))
    }

    pub fn cache_cleanup_config(&self) -> Result<CacheCleanupConfig> {
        let doc = self.document.lock().unwrap();
        Ok(document::get_typed(&doc, "cache_cleanup")?.unwrap_or(CacheCleanupConfig {
            fully_processed_age_days: 7,
            partially_processed_age_days: 14,
            unprocessed_age_days: 30,
            require_all_modes: true,
            cleanup_threshold_percent: 90,
        }))
    }

    pub fn video_sampling_params(&self, mode: Mode) -> Result<VideoSamplingParams> {
        let key = format!("video_processing.{}", mode.as_str());
        let doc = self.document.lock().unwrap();
        Ok(document::get_typed(&doc, &key)?.unwrap_or(VideoSamplingParams {
            skip_duration_seconds: 10,
            frames_per_skip: 1,
            skip_count: 5,
        }))
    }

    /// Is `ext` enabled under `categories.<category>.<ext>`?
    pub fn category_enabled(&self, category: &str, ext: &str) -> bool {
        let key = format!("categories.{category}.{}", ext.to_ascii_lowercase());
        self.get_bool(&key).unwrap_or(false)
    }

    /// Does `ext` require the raw->JPEG transcode step?
    pub fn needs_transcoding(&self, ext: &str) -> bool {
        let key = format!("transcoding.{}", ext.to_ascii_lowercase());
        self.get_bool(&key).unwrap_or(false)
    }

    // -- mutation ---------------------------------------------------------

    /// Deep-merge `patch` into the document. Does not persist or publish;
    /// callers that want the full "setter" semantics should use `set`.
    pub fn update(&self, patch: &Value) {
        let mut doc = self.document.lock().unwrap();
        document::deep_merge(&mut doc, patch);
    }

    /// Persist the current document to `path` atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let doc = self.document.lock().unwrap();
        document::save_atomic(path, &doc)
    }

    /// Replace the document wholesale by reloading `path` (used by the
    /// watcher on external change).
    pub fn load(&self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&text)?;
        *self.document.lock().unwrap() = value;
        Ok(())
    }

    /// A setter is `update` + synchronous `save` + event publication.
    pub fn set(&self, path: &Path, patch: Value, changed_keys: Vec<String>) -> Result<()> {
        self.update(&patch);
        self.save(path)?;
        self.bus.publish(changed_keys, "setter");
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Fixed ordered list of candidate config paths.
pub fn default_candidate_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("config/config.json"),
        PathBuf::from("../config/config.json"),
        PathBuf::from("config.json"),
        PathBuf::from("config.yaml"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_default_materializes_builtin_document_when_nothing_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load_or_default(&[path.clone()]).unwrap();
        assert!(path.exists());
        assert_eq!(store.dedup_mode(), Mode::Fast);
    }

    #[test]
    fn set_persists_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load_or_default(&[path.clone()]).unwrap();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        store.bus().subscribe(Box::new(move |event| {
            seen2.lock().unwrap().push(event.changed_keys.clone());
        }));

        store
            .set(&path, serde_json::json!({"dedup_mode": "quality"}), vec!["dedup_mode".to_string()])
            .unwrap();

        assert_eq!(store.dedup_mode(), Mode::Quality);
        assert_eq!(seen.lock().unwrap().len(), 1);

        let reloaded = ConfigStore::load_or_default(&[path]).unwrap();
        assert_eq!(reloaded.dedup_mode(), Mode::Quality);
    }

    #[test]
    fn category_and_transcoding_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load_or_default(&[path]).unwrap();
        assert!(store.category_enabled("images", "jpg"));
        assert!(!store.category_enabled("images", "doc"));
        assert!(store.needs_transcoding("cr2"));
        assert!(!store.needs_transcoding("jpg"));
    }
}
