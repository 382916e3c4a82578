/// Recording controller state machine.
///
/// State transitions:
/// ```text
/// idle ──begin──→ recording ──end (≥ min duration)──→ stopped
///  ↑                 │  ↺ end (too short)               │
///  └──── cancel / begin failure      stopped ──begin──→ recording
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording { elapsed_secs: u64 },
    Stopped { has_audio: bool },
}

impl RecordingState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped { .. })
    }

    /// Elapsed seconds while recording.
    pub fn elapsed_secs(&self) -> Option<u64> {
        match self {
            Self::Recording { elapsed_secs } => Some(*elapsed_secs),
            _ => None,
        }
    }
}

/// Which input the arbiter currently treats as authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterPhase {
    LoopbackActive,
    MicActive,
}
