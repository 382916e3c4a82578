use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::audio_models::BranchKind;
use crate::processing::wav_format;

/// A completed capture: every recorder chunk concatenated in receipt order.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedAudio {
    /// Interleaved f32 samples.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Number of recorder chunks the capture was assembled from.
    pub chunk_count: usize,
}

impl FinalizedAudio {
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Encode as a PCM WAV file image.
    pub fn to_wav_bytes(&self, bit_depth: u16) -> Vec<u8> {
        wav_format::encode_wav(&self.samples, self.sample_rate, self.channels, bit_depth)
    }
}

/// A finalized recording persisted to disk, ready for the analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub duration_secs: f64,
    pub metadata: RecordingMetadata,
    pub checksum: String,
}

/// Metadata written as a JSON sidecar next to a saved recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub duration_secs: f64,
    /// Wall-clock seconds counted by the controller's 1-second tick.
    pub elapsed_secs: u64,
    pub file_path: String,
    pub checksum: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub created_at: String,
    /// Branches that were open during the session.
    pub sources: Vec<BranchKind>,
}

impl RecordingMetadata {
    pub fn new(
        audio: &FinalizedAudio,
        elapsed_secs: u64,
        file_path: &str,
        checksum: &str,
        sources: Vec<BranchKind>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            duration_secs: audio.duration_secs(),
            elapsed_secs,
            file_path: file_path.to_string(),
            checksum: checksum.to_string(),
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            created_at: chrono::Utc::now().to_rfc3339(),
            sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_counts_frames_not_samples() {
        let audio = FinalizedAudio {
            samples: vec![0.0; 48000 * 2 * 3],
            sample_rate: 48000,
            channels: 2,
            chunk_count: 3,
        };
        assert_eq!(audio.frame_count(), 144000);
        assert!((audio.duration_secs() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn zero_channels_has_no_duration() {
        let audio = FinalizedAudio {
            samples: vec![0.0; 10],
            sample_rate: 48000,
            channels: 0,
            chunk_count: 1,
        };
        assert_eq!(audio.duration_secs(), 0.0);
    }
}
