use serde::{Deserialize, Serialize};

/// Direction of an audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Input,
    Output,
}

/// What an input device is believed to carry, inferred from its label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    #[default]
    Unknown,
    Loopback,
    Microphone,
}

/// An audio endpoint reported by the host.
///
/// `role` is assigned once by the inventory and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub id: String,
    pub kind: DeviceKind,
    pub label: String,
    pub role: DeviceRole,
}

impl AudioDevice {
    /// A device as the host reports it, before classification.
    pub fn new(id: impl Into<String>, kind: DeviceKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            role: DeviceRole::Unknown,
        }
    }

    pub fn is_input(&self) -> bool {
        self.kind == DeviceKind::Input
    }
}

/// One of the two input paths of the audio graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchKind {
    Loopback,
    Microphone,
}

impl BranchKind {
    pub fn other(self) -> Self {
        match self {
            Self::Loopback => Self::Microphone,
            Self::Microphone => Self::Loopback,
        }
    }

    /// Stream processing appropriate for this branch's device.
    pub fn preprocessing(self) -> StreamPreprocessing {
        match self {
            Self::Loopback => StreamPreprocessing::passthrough(),
            Self::Microphone => StreamPreprocessing::voice(),
        }
    }
}

/// Capture-side signal processing requested when a stream is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamPreprocessing {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl StreamPreprocessing {
    /// Raw signal. Loopback audio is corrupted by voice processing.
    pub fn passthrough() -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
        }
    }

    /// Full voice processing for microphones.
    pub fn voice() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        !self.echo_cancellation && !self.noise_suppression && !self.auto_gain_control
    }
}

/// Post-mix level metering (RMS and peak, 0.0–1.0).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioLevels {
    pub rms_level: f32,
    pub peak_level: f32,
}

/// Number of bars drawn by the volume visualisation.
pub const METER_BAR_COUNT: usize = 7;

/// One frame of volume-meter output for the UI.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterReading {
    /// Average byte-scale magnitude (0–255) of the mixed stream.
    pub amplitude: f32,
    /// Whether the amplitude is above the "someone is making sound" threshold.
    pub is_active: bool,
    /// Bar heights in pixels, symmetric and center-peaked.
    pub bars: [f32; METER_BAR_COUNT],
}
