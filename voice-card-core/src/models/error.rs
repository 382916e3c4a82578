use thiserror::Error;

/// Errors raised by the capture pipeline.
///
/// The first five variants are the user-facing taxonomy; the rest are
/// operational failures surfaced by backends and storage.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CaptureError {
    /// The host refused to list audio devices (usually a permission denial).
    #[error("device enumeration failed: {0}")]
    DeviceEnumeration(String),

    /// Neither the loopback nor the microphone branch could be opened.
    #[error("audio graph build failed: {reason}")]
    GraphBuild { reason: String },

    /// The chunked recorder could not be attached to the mixed stream.
    #[error("recorder initialization failed: {0}")]
    RecorderInit(String),

    /// `end()` was called before the minimum duration elapsed. Non-fatal.
    #[error("recording too short: {elapsed_secs}s elapsed, at least {minimum_secs}s required")]
    RecordingTooShort { elapsed_secs: u64, minimum_secs: u64 },

    /// Both the dual-source graph and the plain microphone fallback failed.
    #[error("no audio input device could be opened")]
    NoAudioDevice,

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("failed to open audio stream: {0}")]
    StreamOpen(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl CaptureError {
    /// Whether the session survives this error and the user may carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RecordingTooShort { .. } | Self::DeviceNotAvailable)
    }
}
