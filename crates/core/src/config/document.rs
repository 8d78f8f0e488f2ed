//! Nested JSON config document: deep merge, atomic save, typed getters.

use crate::error::{DedupError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Deep-merge `patch` into `base`. Objects merge key-by-key recursively;
/// any other value (array, scalar) in `patch` replaces the corresponding
/// value in `base` wholesale.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                deep_merge(base_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value.clone();
        }
    }
}

/// Write `value` to `path` atomically: serialize to a sibling temp file,
/// then rename over the destination. Rename is atomic on the same
/// filesystem, so a reader never observes a half-written file.
pub fn save_atomic(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Navigate a dot-separated key path, e.g. `"database.retry.max_attempts"`.
pub fn get_path<'a>(doc: &'a Value, key_path: &str) -> Option<&'a Value> {
    let mut cursor = doc;
    for segment in key_path.split('.') {
        cursor = cursor.get(segment)?;
    }
    Some(cursor)
}

pub fn get_string(doc: &Value, key_path: &str) -> Option<String> {
    get_path(doc, key_path).and_then(|v| v.as_str()).map(|s| s.to_string())
}

pub fn get_bool(doc: &Value, key_path: &str) -> Option<bool> {
    get_path(doc, key_path).and_then(|v| v.as_bool())
}

pub fn get_i64(doc: &Value, key_path: &str) -> Option<i64> {
    get_path(doc, key_path).and_then(|v| v.as_i64())
}

pub fn get_f64(doc: &Value, key_path: &str) -> Option<f64> {
    get_path(doc, key_path).and_then(|v| v.as_f64())
}

pub fn get_typed<T: for<'de> Deserialize<'de>>(doc: &Value, key_path: &str) -> Result<Option<T>> {
    match get_path(doc, key_path) {
        Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
        None => Ok(None),
    }
}

/// Load a legacy YAML document and re-serialize it as a `serde_json::Value`.
/// The YAML file itself is never written back — accepted as read-only
/// input with one-time migration to JSON.
pub fn migrate_yaml(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&text)
        .map_err(|e| DedupError::ConfigInvalid(format!("invalid legacy YAML config: {e}")))?;
    serde_json::to_value(yaml).map_err(DedupError::from)
}

/// A few typed sub-document shapes read often enough to deserialize as a
/// whole rather than key-by-key.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    pub busy_timeout_ms: u64,
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheCleanupConfig {
    pub fully_processed_age_days: i64,
    pub partially_processed_age_days: i64,
    pub unprocessed_age_days: i64,
    pub require_all_modes: bool,
    pub cleanup_threshold_percent: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoSamplingParams {
    pub skip_duration_seconds: u32,
    pub frames_per_skip: u32,
    pub skip_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_preserves_untouched_siblings() {
        let mut base = json!({ "a": { "x": 1, "y": 2 }, "b": 3 });
        let patch = json!({ "a": { "x": 10 } });
        deep_merge(&mut base, &patch);
        assert_eq!(base, json!({ "a": { "x": 10, "y": 2 }, "b": 3 }));
    }

    #[test]
    fn deep_merge_replaces_arrays_wholesale() {
        let mut base = json!({ "a": [1, 2, 3] });
        let patch = json!({ "a": [9] });
        deep_merge(&mut base, &patch);
        assert_eq!(base, json!({ "a": [9] }));
    }

    #[test]
    fn get_path_navigates_dotted_keys() {
        let doc = json!({ "database": { "retry": { "max_attempts": 5 } } });
        assert_eq!(get_i64(&doc, "database.retry.max_attempts"), Some(5));
        assert_eq!(get_i64(&doc, "database.retry.missing"), None);
    }

    #[test]
    fn migrate_yaml_converts_to_equivalent_json_value() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("config.yaml");
        fs::write(&yaml_path, "dedup_mode: BALANCED\nprocessing_batch_size: 20\n").unwrap();
        let value = migrate_yaml(&yaml_path).unwrap();
        assert_eq!(value["dedup_mode"], json!("BALANCED"));
        assert_eq!(value["processing_batch_size"], json!(20));
    }
}
