//! Image fingerprint implementations.
//!
//! `dhash` (FAST) is the standard gradient hash: a true, cheap, real
//! algorithm. `phash` (BALANCED) here is a simplified block-average
//! perceptual hash, not DCT-based. `cnn_embedding` (QUALITY) is a
//! deterministic stand-in satisfying the format/size/confidence contract
//! only; the actual CNN math is an external collaborator, not
//! implemented here.

use crate::error::{DedupError, Result};
use image::{DynamicImage, GenericImageView};
use sha2::{Digest, Sha256};
use std::path::Path;

pub fn decode(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|e| DedupError::DecodeFailed(format!("{}: {e}", path.display())))
}

/// 8x8 adjacent-pixel gradient hash — 64 bits packed into 8 bytes.
pub fn dhash(image: &DynamicImage) -> [u8; 8] {
    let small = image.resize_exact(9, 8, image::imageops::FilterType::Triangle).to_luma8();
    let mut bits = 0u64;
    let mut bit_index = 0;
    for y in 0..8 {
        for x in 0..8 {
            let left = small.get_pixel(x, y)[0];
            let right = small.get_pixel(x + 1, y)[0];
            if left > right {
                bits |= 1 << bit_index;
            }
            bit_index += 1;
        }
    }
    bits.to_be_bytes()
}

/// Simplified block-average perceptual hash: downsample to 8x8, compare
/// each cell to the grid mean. Distinct resize/compare shape from `dhash`
/// so the two modes diverge on near-duplicate edits, while remaining
/// deterministic and cheap.
pub fn phash(image: &DynamicImage) -> [u8; 8] {
    let small = image.resize_exact(8, 8, image::imageops::FilterType::Lanczos3).to_luma8();
    let pixels: Vec<u32> = small.pixels().map(|p| p[0] as u32).collect();
    let mean = pixels.iter().sum::<u32>() / pixels.len() as u32;

    let mut bits = 0u64;
    for (i, &p) in pixels.iter().enumerate() {
        if p >= mean {
            bits |= 1 << i;
        }
    }
    bits.to_be_bytes()
}

/// Deterministic 512-byte embedding stand-in: chunks the resized pixel
/// buffer, hashes each chunk with a running counter, and concatenates
/// digests until the contractual length is reached.
pub fn cnn_embedding(image: &DynamicImage) -> [u8; 512] {
    let small = image
        .resize_exact(32, 32, image::imageops::FilterType::Lanczos3)
        .to_rgb8();
    let pixel_bytes = small.into_raw();

    let mut out = [0u8; 512];
    let mut offset = 0;
    let mut counter: u32 = 0;
    while offset < out.len() {
        let mut hasher = Sha256::new();
        hasher.update(&pixel_bytes);
        hasher.update(counter.to_be_bytes());
        let digest = hasher.finalize();
        let take = (out.len() - offset).min(digest.len());
        out[offset..offset + take].copy_from_slice(&digest[..take]);
        offset += take;
        counter += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn solid(color: [u8; 3]) -> DynamicImage {
        let buf = ImageBuffer::from_fn(32, 32, |_, _| Rgb(color));
        DynamicImage::ImageRgb8(buf)
    }

    #[test]
    fn dhash_is_deterministic_for_identical_images() {
        let a = solid([10, 20, 30]);
        let b = solid([10, 20, 30]);
        assert_eq!(dhash(&a), dhash(&b));
    }

    #[test]
    fn phash_differs_for_visually_distinct_images() {
        let checkerboard = DynamicImage::ImageRgb8(ImageBuffer::from_fn(32, 32, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        }));
        let gradient =
            DynamicImage::ImageRgb8(ImageBuffer::from_fn(32, 32, |x, _y| Rgb([(x * 8) as u8; 3])));
        assert_ne!(phash(&checkerboard), phash(&gradient));
    }

    #[test]
    fn cnn_embedding_has_contractual_length_and_is_deterministic() {
        let a = solid([5, 5, 5]);
        let e1 = cnn_embedding(&a);
        let e2 = cnn_embedding(&a);
        assert_eq!(e1.len(), 512);
        assert_eq!(e1, e2);
    }
}
