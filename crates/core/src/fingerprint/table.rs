//! The static algorithm-metadata table : fixes, per
//! `(media, mode)`, the contractual format tag, output byte length, and
//! typical confidence. The actual algorithm math is an external
//! collaborator here — this table is what C5 is contractually
//! bound to produce, not an implementation of the math itself.

use crate::types::{MediaType, Mode};

#[derive(Debug, Clone, Copy)]
pub struct AlgorithmContract {
    pub format: &'static str,
    pub data_len: usize,
    pub confidence: f64,
}

pub fn contract_for(media_type: MediaType, mode: Mode) -> AlgorithmContract {
    use MediaType::*;
    use Mode::*;
    match (media_type, mode) {
        (Image | ImageRaw, Fast) => AlgorithmContract { format: "dhash", data_len: 8, confidence: 0.85 },
        (Image | ImageRaw, Balanced) => AlgorithmContract { format: "phash", data_len: 8, confidence: 0.92 },
        (Image | ImageRaw, Quality) => {
            AlgorithmContract { format: "cnn_embedding", data_len: 512, confidence: 0.98 }
        }
        (Video, Fast) => AlgorithmContract { format: "video_dhash", data_len: 32, confidence: 0.80 },
        (Video, Balanced) => AlgorithmContract { format: "video_phash", data_len: 32, confidence: 0.88 },
        (Video, Quality) => {
            AlgorithmContract { format: "video_cnn_embedding", data_len: 1024, confidence: 0.95 }
        }
        (Audio, Fast) => AlgorithmContract { format: "chromaprint", data_len: 32, confidence: 0.80 },
        (Audio, Balanced) => AlgorithmContract { format: "mfcc", data_len: 64, confidence: 0.90 },
        (Audio, Quality) => AlgorithmContract { format: "audio_embedding", data_len: 128, confidence: 0.97 },
    }
}
