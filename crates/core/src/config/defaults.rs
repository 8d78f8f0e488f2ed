//! Built-in default configuration document.
//!
//! The default document materialized when no config file exists is a
//! literal JSON blob, not something assembled key-by-key at startup.

pub const DEFAULT_CONFIG_JSON: &str = r#"
{
  "dedup_mode": "FAST",
  "pre_process_quality_stack": false,
  "log_level": "info",
  "server_port": 8080,
  "server_host": "127.0.0.1",
  "auth_secret": "",
  "scan_interval_seconds": 300,
  "processing_interval_seconds": 5,
  "processing_batch_size": 50,
  "max_processing_threads": 1,
  "max_scan_threads": 4,
  "database_threads": 1,
  "max_decoder_threads": 1,
  "database": {
    "retry": {
      "max_attempts": 5,
      "backoff_base_ms": 100,
      "max_backoff_ms": 5000
    },
    "timeout": {
      "busy_timeout_ms": 5000,
      "operation_timeout_ms": 30000
    }
  },
  "decoder_cache_size_mb": 512,
  "cache_cleanup": {
    "fully_processed_age_days": 7,
    "partially_processed_age_days": 14,
    "unprocessed_age_days": 30,
    "require_all_modes": true,
    "cleanup_threshold_percent": 90
  },
  "categories": {
    "images": { "jpg": true, "jpeg": true, "png": true, "gif": true, "bmp": true, "webp": true },
    "video": { "mp4": true, "mov": true, "mkv": true, "avi": true, "webm": true },
    "audio": { "mp3": true, "flac": true, "wav": true, "ogg": true, "m4a": true },
    "images_raw": { "cr2": true, "nef": true, "arw": true, "dng": true, "raf": true }
  },
  "transcoding": {
    "cr2": true,
    "nef": true,
    "arw": true,
    "dng": true,
    "raf": true
  },
  "video_processing": {
    "FAST": { "skip_duration_seconds": 10, "frames_per_skip": 1, "skip_count": 5 },
    "BALANCED": { "skip_duration_seconds": 5, "frames_per_skip": 2, "skip_count": 8 },
    "QUALITY": { "skip_duration_seconds": 2, "frames_per_skip": 3, "skip_count": 12 }
  }
}
"#;
