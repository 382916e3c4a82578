use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::audio_models::BranchKind;
use crate::models::error::CaptureError;
use crate::models::recording_result::{FinalizedAudio, RecordingMetadata, RecordingResult};
use crate::storage::metadata;

/// Writes finalized captures as PCM WAV files with a JSON metadata sidecar.
///
/// ## File layout
///
/// ```text
/// <output_directory>/audio_<unix-millis>.wav
/// <output_directory>/audio_<unix-millis>.metadata.json
/// ```
pub struct AudioFileWriter {
    output_directory: PathBuf,
    bit_depth: u16,
}

impl AudioFileWriter {
    pub fn new(output_directory: impl Into<PathBuf>, bit_depth: u16) -> Self {
        Self {
            output_directory: output_directory.into(),
            bit_depth,
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn file_name_for(timestamp_millis: i64) -> String {
        format!("audio_{}.wav", timestamp_millis)
    }

    /// Persist `audio`. Empty captures are rejected.
    pub fn write(
        &self,
        audio: &FinalizedAudio,
        elapsed_secs: u64,
        sources: Vec<BranchKind>,
    ) -> Result<RecordingResult, CaptureError> {
        if audio.is_empty() {
            return Err(CaptureError::StorageError("audio data is empty".into()));
        }

        fs::create_dir_all(&self.output_directory)
            .map_err(|e| CaptureError::StorageError(format!("failed to create directory: {}", e)))?;

        let file_path = self
            .output_directory
            .join(Self::file_name_for(chrono::Utc::now().timestamp_millis()));

        let mut file = File::create(&file_path)
            .map_err(|e| CaptureError::StorageError(format!("failed to create file: {}", e)))?;
        file.write_all(&audio.to_wav_bytes(self.bit_depth))
            .map_err(|e| CaptureError::StorageError(format!("write failed: {}", e)))?;
        file.flush().map_err(|e| CaptureError::StorageError(e.to_string()))?;
        drop(file);

        let checksum = sha256_file(&file_path)?;
        let metadata = RecordingMetadata::new(audio, elapsed_secs, &file_path.to_string_lossy(), &checksum, sources);
        metadata::write_metadata(&metadata, &file_path)?;

        log::info!("Saved recording to {} ({:.2}s)", file_path.display(), audio.duration_secs());
        Ok(RecordingResult {
            file_path,
            duration_secs: audio.duration_secs(),
            metadata,
            checksum,
        })
    }
}

/// SHA-256 hex digest of a file.
pub fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let data =
        fs::read(path).map_err(|e| CaptureError::StorageError(format!("failed to read file for checksum: {}", e)))?;
    Ok(hex_encode(&Sha256::digest(&data)))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
