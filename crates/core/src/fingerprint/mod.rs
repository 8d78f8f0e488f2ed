//! Fingerprint Engine — pure orchestrator dispatching by media type to
//! the per-mode algorithm stand-ins, and owning the native decoder
//! resource lifetime for the duration of a single call.

mod audio_hash;
mod image_hash;
mod table;
mod video_hash;

pub use table::{contract_for, AlgorithmContract};
pub use video_hash::FrameBufferPool;

use crate::config::ConfigStore;
use crate::error::{DedupError, Result};
use crate::types::{Artifact, MediaType, Mode};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

pub struct FingerprintEngine {
    config: Arc<ConfigStore>,
}

impl FingerprintEngine {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }

    /// Derives the media type for `path` from the configured
    /// enabled-extension lists. Returns `UnsupportedFile` for anything
    /// not enabled.
    pub fn media_type_for(&self, path: &Path) -> Result<MediaType> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        if self.config.category_enabled("images_raw", &extension) {
            Ok(MediaType::ImageRaw)
        } else if self.config.category_enabled("images", &extension) {
            Ok(MediaType::Image)
        } else if self.config.category_enabled("video", &extension) {
            Ok(MediaType::Video)
        } else if self.config.category_enabled("audio", &extension) {
            Ok(MediaType::Audio)
        } else {
            Err(DedupError::UnsupportedFile(extension))
        }
    }

    /// Never panics and never propagates a native-library exception; all
    /// failure modes are returned as `Err(DedupError)` for the caller to
    /// fold into a failed `ProcessingResult`.
    pub fn process_file(&self, path: &Path, mode: Mode) -> Result<Artifact> {
        let media_type = self.media_type_for(path)?;
        let contract = contract_for(media_type, mode);

        let data = match media_type {
            MediaType::Image | MediaType::ImageRaw => self.compute_image(path, mode)?,
            MediaType::Video => self.compute_video(path, mode, contract.data_len)?,
            MediaType::Audio => audio_hash::fingerprint(path, contract.data_len)?,
        };

        debug_assert_eq!(data.len(), contract.data_len, "algorithm contract violated");

        let hash = {
            let mut hasher = Sha256::new();
            hasher.update(&data);
            hex::encode(hasher.finalize())
        };

        Ok(Artifact {
            format: contract.format,
            data,
            hash,
            confidence: contract.confidence,
            metadata: serde_json::json!({ "media_type": media_type_label(media_type) }),
        })
    }

    fn compute_image(&self, path: &Path, mode: Mode) -> Result<Vec<u8>> {
        let _guard = crate::native::NATIVE_DECODE_LOCK.lock().unwrap();
        let image = image_hash::decode(path)?;
        Ok(match mode {
            Mode::Fast => image_hash::dhash(&image).to_vec(),
            Mode::Balanced => image_hash::phash(&image).to_vec(),
            Mode::Quality => image_hash::cnn_embedding(&image).to_vec(),
        })
    }

    fn compute_video(&self, path: &Path, mode: Mode, output_len: usize) -> Result<Vec<u8>> {
        let params = self.config.video_sampling_params(mode)?;
        video_hash::sample_and_combine(path, &params, output_len)
    }
}

fn media_type_label(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Image => "image",
        MediaType::Video => "video",
        MediaType::Audio => "audio",
        MediaType::ImageRaw => "image_raw",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use image::{ImageBuffer, Rgb};

    fn engine() -> (FingerprintEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config =
            Arc::new(ConfigStore::load_or_default(&[dir.path().join("config.json")]).unwrap());
        (FingerprintEngine::new(config), dir)
    }

    #[test]
    fn process_file_is_deterministic_for_identical_image_bytes() {
        let (engine, dir) = engine();
        let path = dir.path().join("a.jpg");
        ImageBuffer::from_fn(16, 16, |x, y| Rgb([x as u8, y as u8, 0]))
            .save(&path)
            .unwrap();

        let a = engine.process_file(&path, Mode::Fast).unwrap();
        let b = engine.process_file(&path, Mode::Fast).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.data, b.data);
        assert_eq!(a.format, "dhash");
        assert_eq!(a.data.len(), 8);
    }

    #[test]
    fn unsupported_extension_is_rejected_before_decode() {
        let (engine, dir) = engine();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();
        let result = engine.process_file(&path, Mode::Fast);
        assert!(matches!(result, Err(DedupError::UnsupportedFile(_))));
    }

    #[test]
    fn each_mode_satisfies_its_algorithm_contract_byte_length() {
        let (engine, dir) = engine();
        let path = dir.path().join("a.png");
        ImageBuffer::from_fn(16, 16, |x, y| Rgb([x as u8, y as u8, 1])).save(&path).unwrap();

        for (mode, expected_len) in [(Mode::Fast, 8), (Mode::Balanced, 8), (Mode::Quality, 512)] {
            let artifact = engine.process_file(&path, mode).unwrap();
            assert_eq!(artifact.data.len(), expected_len);
        }
    }
}
