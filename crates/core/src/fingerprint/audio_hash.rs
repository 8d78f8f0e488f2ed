//! Audio fingerprint implementation.
//!
//! The pack carries no DSP/chroma-extraction crate, so the actual
//! chromaprint/MFCC/embedding math is an external collaborator,
//! specified only by input/output/size/confidence contract. This
//! produces deterministic, contract-sized bytes from the decoded byte
//! stream rather than real spectral features.

use crate::error::{DedupError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

pub fn fingerprint(path: &Path, output_len: usize) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).map_err(|e| DedupError::DecodeFailed(e.to_string()))?;
    if bytes.is_empty() {
        return Err(DedupError::DecodeFailed("empty audio file".into()));
    }

    let mut out = vec![0u8; output_len];
    let mut offset = 0;
    let mut counter: u32 = 0;
    while offset < out.len() {
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hasher.update(counter.to_be_bytes());
        let digest = hasher.finalize();
        let take = (out.len() - offset).min(digest.len());
        out[offset..offset + take].copy_from_slice(&digest[..take]);
        offset += take;
        counter += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_and_contract_sized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.mp3");
        std::fs::write(&path, vec![3u8; 2048]).unwrap();

        let a = fingerprint(&path, 64).unwrap();
        let b = fingerprint(&path, 64).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn empty_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.mp3");
        std::fs::write(&path, b"").unwrap();
        assert!(fingerprint(&path, 32).is_err());
    }
}
