use crate::models::audio_models::{BranchKind, MeterReading};
use crate::models::error::CaptureError;
use crate::models::recording_result::FinalizedAudio;
use crate::models::state::RecordingState;

/// Event sink for recording notifications.
///
/// Methods are called from worker threads (arbiter, meter) as well as the
/// caller's thread. Implementations should marshal to the UI thread if needed.
pub trait CaptureDelegate: Send + Sync {
    /// Called when the controller changes state.
    fn on_state_changed(&self, _state: &RecordingState) {}

    /// Called when the arbiter hands the recording over to another branch.
    fn on_source_switched(&self, _active: BranchKind) {}

    /// Called once per meter frame.
    fn on_meter(&self, _reading: &MeterReading) {}

    /// Called for errors that do not abort the call that produced them.
    fn on_error(&self, _error: &CaptureError) {}

    /// Called once when a capture is finalized.
    fn on_capture_finished(&self, _audio: &FinalizedAudio) {}
}
