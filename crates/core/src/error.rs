//! Crate-wide error kinds. Every component boundary returns
//! `Result<T, DedupError>`; no component throws past its own boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("database operation failed after retries: {0}")]
    IoTransient(String),

    #[error("database fatal error: {0}")]
    DbFatal(String),

    #[error("unsupported file: {0}")]
    UnsupportedFile(String),

    #[error("decode failed: {0}")]
    DecodeFailed(String),

    #[error("transcode pending for {0}")]
    TranscodePending(String),

    #[error("transcode failed permanently for {0}: {1}")]
    TranscodeFailed(String, String),

    #[error("no valid video frame could be extracted")]
    EmptyVideo,

    #[error("observer handler failed: {0}")]
    ObserverHandler(String),

    #[error("shutdown requested: {0}")]
    ShutdownRequested(String),

    /// Flag value 2 is corruption, not a silently-coerced documented value.
    #[error("processing flag {0} has no documented meaning")]
    CorruptProcessingFlag(i32),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DedupError>;
