use crate::models::audio_models::{AudioDevice, DeviceKind, DeviceRole};
use crate::models::error::CaptureError;
use crate::traits::capture_provider::AudioHost;

/// Label fragments that identify a loopback ("what you hear") input.
const LOOPBACK_PATTERNS: &[&str] = &["stereo mix", "立体声混音", "voicemeeter", "what u hear"];

/// Label fragments that identify a microphone input.
const MICROPHONE_PATTERNS: &[&str] = &["microphone", "mic", "麦克风"];

/// The inputs a session should capture from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedSources {
    pub loopback: Option<AudioDevice>,
    pub microphone: Option<AudioDevice>,
}

/// Lists host devices and classifies input devices by label.
pub struct DeviceInventory<'a> {
    host: &'a dyn AudioHost,
}

impl<'a> DeviceInventory<'a> {
    pub fn new(host: &'a dyn AudioHost) -> Self {
        Self { host }
    }

    /// Enumerate afresh, assigning every input device a role.
    ///
    /// Output devices keep `DeviceRole::Unknown`. A permission denial from the
    /// host surfaces as `DeviceEnumeration`.
    pub fn list_devices(&self) -> Result<Vec<AudioDevice>, CaptureError> {
        let devices = self.host.enumerate_devices()?;
        let classified: Vec<AudioDevice> = devices
            .into_iter()
            .map(|mut device| {
                device.role = match device.kind {
                    DeviceKind::Input => Self::classify_label(&device.label),
                    DeviceKind::Output => DeviceRole::Unknown,
                };
                device
            })
            .collect();

        log::debug!(
            "Enumerated {} devices ({} inputs)",
            classified.len(),
            classified.iter().filter(|d| d.is_input()).count()
        );
        Ok(classified)
    }

    /// Case-insensitive substring match against the known label fragments.
    /// Loopback patterns win over microphone patterns.
    pub fn classify_label(label: &str) -> DeviceRole {
        let lower = label.to_lowercase();
        if LOOPBACK_PATTERNS.iter().any(|p| lower.contains(p)) {
            DeviceRole::Loopback
        } else if MICROPHONE_PATTERNS.iter().any(|p| lower.contains(p)) {
            DeviceRole::Microphone
        } else {
            DeviceRole::Unknown
        }
    }

    /// First input of each role, in enumeration order.
    pub fn select_sources(devices: &[AudioDevice]) -> SelectedSources {
        let first = |role: DeviceRole| {
            devices
                .iter()
                .find(|d| d.is_input() && d.role == role)
                .cloned()
        };
        SelectedSources {
            loopback: first(DeviceRole::Loopback),
            microphone: first(DeviceRole::Microphone),
        }
    }

    /// Look up a device by id, or describe an unlisted id as a bare input
    /// so it can still be handed to the host.
    pub fn resolve(devices: &[AudioDevice], id: &str, role: DeviceRole) -> AudioDevice {
        devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .map(|mut d| {
                d.role = role;
                d
            })
            .unwrap_or_else(|| {
                let mut device = AudioDevice::new(id, DeviceKind::Input, id);
                device.role = role;
                device
            })
    }
}
