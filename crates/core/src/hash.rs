//! Content hashing shared by the scanner, fingerprinter, and
//! transcoder.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// The scanner's content hash streams in 8 KiB blocks.
const STREAM_BUF_SIZE: usize = 8 * 1024;

/// Streams `path` through SHA-256 and returns the full lowercase hex digest.
/// Used for change detection: a file is unchanged iff this hash is
/// identical to the stored `content_hash`.
pub fn content_hash(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// The first 16 hex characters of a SHA-256 digest of `source_path`'s
/// string form, used to name cache entries (`hash16`).
pub fn hash16(source_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

/// Builds the cache filename for a source path:
/// `hash16(source_path) + "_" + lowercase(extension) + ".jpg"`.
pub fn cache_filename(source_path: &str, extension: &str) -> String {
    format!("{}_{}.jpg", hash16(source_path), extension.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn content_hash_is_stable_across_reads_of_the_same_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"hello world").unwrap();
        let h1 = content_hash(&path).unwrap();
        let h2 = content_hash(&path).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn content_hash_changes_when_bytes_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"one").unwrap();
        drop(f);
        let h1 = content_hash(&path).unwrap();

        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"two").unwrap();
        drop(f);
        let h2 = content_hash(&path).unwrap();

        assert_ne!(h1, h2);
    }

    #[test]
    fn cache_filename_matches_hash16_extension_contract() {
        let name = cache_filename("/library/photo.CR2", "CR2");
        assert!(name.ends_with("_cr2.jpg"));
        assert_eq!(name.len(), 16 + 1 + 3 + 4);
    }
}
