//! Shared data-model types for the scanned-files / processing-results /
//! transcode-map relations plus the small value types threaded through
//! every component.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Mode and media type
// ---------------------------------------------------------------------------

/// Fingerprint quality/speed setting. Ordered FAST < BALANCED < QUALITY only
/// by convention; no ordering is implied by the data model itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Fast,
    Balanced,
    Quality,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Fast, Mode::Balanced, Mode::Quality];

    /// Name of the `links_<mode>` column / JSON key for this mode.
    pub fn links_column(self) -> &'static str {
        match self {
            Mode::Fast => "links_fast",
            Mode::Balanced => "links_balanced",
            Mode::Quality => "links_quality",
        }
    }

    /// Name of the `flag_<mode>` column for this mode.
    pub fn flag_column(self) -> &'static str {
        match self {
            Mode::Fast => "flag_fast",
            Mode::Balanced => "flag_balanced",
            Mode::Quality => "flag_quality",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Fast => "FAST",
            Mode::Balanced => "BALANCED",
            Mode::Quality => "QUALITY",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = crate::error::DedupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FAST" => Ok(Mode::Fast),
            "BALANCED" => Ok(Mode::Balanced),
            "QUALITY" => Ok(Mode::Quality),
            other => Err(crate::error::DedupError::ConfigInvalid(format!(
                "unrecognized dedup_mode: {other}"
            ))),
        }
    }
}

/// Coarse media kind, derived from the configured per-extension category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Image,
    Video,
    Audio,
    /// A raw-camera file. Never fingerprinted directly; always resolved to
    /// its transcoded JPEG's `MediaType::Image` first.
    ImageRaw,
}

// ---------------------------------------------------------------------------
// Per-mode processing flag
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingFlag {
    Unprocessed = 0,
    InProgress = -1,
    Done = 1,
    TranscodeError = 3,
}

impl ProcessingFlag {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for ProcessingFlag {
    type Error = crate::error::DedupError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProcessingFlag::Unprocessed),
            -1 => Ok(ProcessingFlag::InProgress),
            1 => Ok(ProcessingFlag::Done),
            3 => Ok(ProcessingFlag::TranscodeError),
            // Flag value 2 has no documented meaning; treated as corruption
            // detected at read time rather than silently coerced.
            other => Err(crate::error::DedupError::CorruptProcessingFlag(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Scanned File
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub content_hash: Option<String>,
    pub flag_fast: ProcessingFlag,
    pub flag_balanced: ProcessingFlag,
    pub flag_quality: ProcessingFlag,
    pub links_fast: Vec<i64>,
    pub links_balanced: Vec<i64>,
    pub links_quality: Vec<i64>,
    pub created_at: i64,
}

impl ScannedFile {
    pub fn flag(&self, mode: Mode) -> ProcessingFlag {
        match mode {
            Mode::Fast => self.flag_fast,
            Mode::Balanced => self.flag_balanced,
            Mode::Quality => self.flag_quality,
        }
    }

    pub fn links(&self, mode: Mode) -> &[i64] {
        match mode {
            Mode::Fast => &self.links_fast,
            Mode::Balanced => &self.links_balanced,
            Mode::Quality => &self.links_quality,
        }
    }
}

// ---------------------------------------------------------------------------
// Processing Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Artifact {
    pub format: &'static str,
    pub data: Vec<u8>,
    pub hash: String,
    pub confidence: f64,
    /// Opaque JSON metadata (e.g. frame count, sample points). Stored
    /// verbatim in `artifact_metadata`.
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub file_path: String,
    pub mode: Mode,
    pub success: bool,
    pub error_message: Option<String>,
    pub artifact: Option<Artifact>,
    pub created_at: i64,
}

impl ProcessingResult {
    pub fn success(file_path: impl Into<String>, mode: Mode, artifact: Artifact, now: i64) -> Self {
        Self {
            file_path: file_path.into(),
            mode,
            success: true,
            error_message: None,
            artifact: Some(artifact),
            created_at: now,
        }
    }

    pub fn failure(file_path: impl Into<String>, mode: Mode, message: impl Into<String>, now: i64) -> Self {
        Self {
            file_path: file_path.into(),
            mode,
            success: false,
            error_message: Some(message.into()),
            artifact: None,
            created_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Transcode Map
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeStatus {
    Queued = 0,
    InProgress = 1,
    Completed = 2,
    Failed = 3,
}

impl TryFrom<i32> for TranscodeStatus {
    type Error = crate::error::DedupError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TranscodeStatus::Queued),
            1 => Ok(TranscodeStatus::InProgress),
            2 => Ok(TranscodeStatus::Completed),
            3 => Ok(TranscodeStatus::Failed),
            other => Err(crate::error::DedupError::ConfigInvalid(format!(
                "unrecognized transcode status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub source_path: String,
    pub output_path: Option<PathBuf>,
    pub status: TranscodeStatus,
    pub worker_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ---------------------------------------------------------------------------
// Scan stats — the scanner's return contract for the scheduled trigger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScanStats {
    pub discovered: usize,
    pub skipped: usize,
    pub unchanged: usize,
    pub changed: usize,
}

// ---------------------------------------------------------------------------
// Processing event surface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FileProcessingEvent {
    pub file_path: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub processing_time_ms: u64,
    pub artifact_format: Option<String>,
    pub artifact_hash: Option<String>,
    pub artifact_confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_flag_rejects_undocumented_value() {
        assert!(ProcessingFlag::try_from(2).is_err());
        assert!(ProcessingFlag::try_from(0).is_ok());
        assert!(ProcessingFlag::try_from(-1).is_ok());
    }

    #[test]
    fn mode_round_trips_through_display_and_from_str() {
        for mode in Mode::ALL {
            let parsed: Mode = mode.as_str().parse().unwrap();
            assert_eq!(parsed, mode);
        }
    }

    #[test]
    fn mode_links_column_matches_three_column_resolution() {
        assert_eq!(Mode::Fast.links_column(), "links_fast");
        assert_eq!(Mode::Balanced.links_column(), "links_balanced");
        assert_eq!(Mode::Quality.links_column(), "links_quality");
    }
}
