//! `AudioHost` over WASAPI.

use voice_card_core::models::audio_models::{AudioDevice, DeviceKind, StreamPreprocessing};
use voice_card_core::models::error::CaptureError;
use voice_card_core::traits::capture_provider::{AudioHost, CaptureProvider};

use crate::com::ComApartment;
use crate::device_enumerator::DeviceEnumerator;
use crate::permissions;
use crate::wasapi_input::WasapiInputCapture;

/// The Windows audio system as seen by the recording controller.
///
/// Holds no COM state; every call enters the apartment it needs, so the
/// host can be shared across threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasapiHost;

impl WasapiHost {
    pub fn new() -> Self {
        Self
    }
}

impl AudioHost for WasapiHost {
    fn enumerate_devices(&self) -> Result<Vec<AudioDevice>, CaptureError> {
        permissions::ensure_capture_access()?;
        let _com = ComApartment::enter()?;
        DeviceEnumerator::new()?.list_all()
    }

    fn open_stream(
        &self,
        device: Option<&AudioDevice>,
        preprocessing: StreamPreprocessing,
    ) -> Result<Box<dyn CaptureProvider>, CaptureError> {
        let device = match device {
            Some(device) if device.kind == DeviceKind::Input => device.clone(),
            Some(device) => {
                return Err(CaptureError::StreamOpen(format!(
                    "{} is not a capture endpoint",
                    device.label
                )))
            }
            None => default_capture_device()?,
        };
        log::debug!("Opening {} ({})", device.label, device.id);
        Ok(Box::new(WasapiInputCapture::new(device, preprocessing)))
    }
}

fn default_capture_device() -> Result<AudioDevice, CaptureError> {
    let _com = ComApartment::enter()?;
    let endpoint = DeviceEnumerator::new()?.capture_endpoint(None)?;
    let id = unsafe {
        let raw = endpoint
            .GetId()
            .map_err(|e| CaptureError::StreamOpen(format!("GetId failed: {}", e)))?;
        raw.to_string()
            .map_err(|e| CaptureError::StreamOpen(format!("malformed endpoint id: {}", e)))?
    };
    Ok(AudioDevice::new(id, DeviceKind::Input, DeviceEnumerator::label_of(&endpoint)))
}
