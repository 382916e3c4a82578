use std::sync::Arc;

use crate::models::audio_models::{AudioDevice, StreamPreprocessing};
use crate::models::error::CaptureError;

/// Callback invoked when an audio buffer is available.
///
/// Parameters:
/// - `samples`: Interleaved f32 samples.
/// - `sample_rate`: The actual sample rate of the delivered audio.
/// - `channels`: Number of channels (1 = mono, 2 = stereo interleaved).
pub type AudioBufferCallback = Arc<dyn Fn(&[f32], f64, u16) + Send + Sync + 'static>;

/// A live hardware input stream.
///
/// Implemented by platform backends (e.g. `WasapiInputCapture`).
pub trait CaptureProvider: Send {
    /// Start delivering buffers via `callback`.
    ///
    /// The callback fires on a backend audio thread. Keep processing minimal.
    fn start(&mut self, callback: AudioBufferCallback) -> Result<(), CaptureError>;

    /// Stop capturing and release the hardware stream. Safe to call twice.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// The device backing this stream.
    fn device_info(&self) -> AudioDevice;
}

/// Host audio system: device listing and stream opening.
pub trait AudioHost: Send + Sync {
    /// Enumerate input and output endpoints, freshly, with role `Unknown`.
    fn enumerate_devices(&self) -> Result<Vec<AudioDevice>, CaptureError>;

    /// Open an input stream with the requested processing.
    ///
    /// `None` opens the host's default microphone. The returned provider is
    /// not started yet.
    fn open_stream(
        &self,
        device: Option<&AudioDevice>,
        preprocessing: StreamPreprocessing,
    ) -> Result<Box<dyn CaptureProvider>, CaptureError>;
}
