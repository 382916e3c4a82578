//! # voice-card-core
//!
//! Platform-agnostic dual-source voice capture.
//!
//! Records what the user hears (a loopback "stereo mix" input) and falls
//! back to the microphone while the loopback is silent, crossfading between
//! the two. Platform backends implement `AudioHost` and `CaptureProvider`
//! and plug into the generic `RecordingController`.
//!
//! ## Architecture
//!
//! ```text
//! voice-card-core (this crate)
//! ├── traits/       ← AudioHost, CaptureProvider, CaptureDelegate
//! ├── models/       ← CaptureError, RecordingState, CaptureConfiguration, AudioDevice, etc.
//! ├── processing/   ← RingBuffer, GainParam, Analyser, BranchMixer, WAV encoding
//! ├── inventory/    ← DeviceInventory (label classification, source selection)
//! ├── graph/        ← AudioGraph, ContextClock, MixedStream
//! ├── arbiter/      ← SourceArbiter (silence-gated source switching)
//! ├── capture/      ← CaptureSession (chunked recorder)
//! ├── meter/        ← VolumeMeter
//! ├── controller/   ← RecordingController (Idle → Recording → Stopped)
//! ├── storage/      ← AudioFileWriter, metadata sidecar
//! └── analyzer/     ← VoiceAnalyzer (external classifier process)
//! ```

pub mod analyzer;
pub mod arbiter;
pub mod capture;
pub mod controller;
pub mod graph;
pub mod inventory;
pub mod meter;
pub mod models;
pub mod processing;
pub mod storage;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export key types at crate root for convenience.
pub use analyzer::summary::AnalysisSummary;
pub use analyzer::voice_analyzer::{AnalyzerError, GenderHint, VoiceAnalyzer, VoiceProfile};
pub use arbiter::source_arbiter::{ArbiterEvent, ArbiterHandle, ArbiterState, SourceArbiter};
pub use capture::capture_session::{CaptureSession, StopOutcome};
pub use controller::recording_controller::{RecordingController, SessionOutcome};
pub use graph::audio_graph::{AudioGraph, AudioGraphState, BranchGains};
pub use graph::destination::MixedStream;
pub use inventory::device_inventory::{DeviceInventory, SelectedSources};
pub use meter::volume_meter::{MeterHandle, VolumeMeter};
pub use models::audio_models::{
    AudioDevice, AudioLevels, BranchKind, DeviceKind, DeviceRole, MeterReading, StreamPreprocessing,
};
pub use models::config::{ArbiterConfig, CaptureConfiguration};
pub use models::error::CaptureError;
pub use models::recording_result::{FinalizedAudio, RecordingMetadata, RecordingResult};
pub use models::state::{ArbiterPhase, RecordingState};
pub use storage::audio_writer::AudioFileWriter;
pub use traits::capture_delegate::CaptureDelegate;
pub use traits::capture_provider::{AudioBufferCallback, AudioHost, CaptureProvider};
