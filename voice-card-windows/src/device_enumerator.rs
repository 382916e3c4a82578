//! Windows audio endpoint enumeration via the MMDevice API.
//!
//! Lists active capture and render endpoints with their friendly names.
//! A "Stereo Mix" loopback shows up here as an ordinary capture endpoint.

use windows::core::*;
use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use voice_card_core::models::audio_models::{AudioDevice, DeviceKind};
use voice_card_core::models::error::CaptureError;

/// Audio endpoint enumerator using the Windows MMDevice API.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    /// Requires COM to be initialized on the calling thread.
    pub fn new() -> Result<Self, CaptureError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| CaptureError::DeviceEnumeration(format!("failed to create enumerator: {}", e)))?;
            Ok(Self { enumerator })
        }
    }

    /// Active capture endpoints, microphones and loopback inputs alike.
    pub fn list_capture_devices(&self) -> Result<Vec<AudioDevice>, CaptureError> {
        self.list_devices(eCapture, DeviceKind::Input)
    }

    /// Active render endpoints.
    pub fn list_render_devices(&self) -> Result<Vec<AudioDevice>, CaptureError> {
        self.list_devices(eRender, DeviceKind::Output)
    }

    /// Every active endpoint, inputs first.
    pub fn list_all(&self) -> Result<Vec<AudioDevice>, CaptureError> {
        let mut devices = self.list_capture_devices()?;
        devices.extend(self.list_render_devices()?);
        Ok(devices)
    }

    /// Look up a capture endpoint by id, or the default one for `None`.
    pub(crate) fn capture_endpoint(&self, device_id: Option<&str>) -> Result<IMMDevice, CaptureError> {
        unsafe {
            match device_id {
                Some(id) => {
                    let wide_id: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
                    self.enumerator
                        .GetDevice(PCWSTR(wide_id.as_ptr()))
                        .map_err(|_| CaptureError::DeviceNotAvailable)
                }
                None => self
                    .enumerator
                    .GetDefaultAudioEndpoint(eCapture, eConsole)
                    .map_err(|_| CaptureError::DeviceNotAvailable),
            }
        }
    }

    /// Friendly name of an endpoint, falling back to its id.
    pub(crate) fn label_of(device: &IMMDevice) -> String {
        Self::get_device_friendly_name(device)
            .or_else(|| unsafe { device.GetId().ok().and_then(|id| id.to_string().ok()) })
            .unwrap_or_else(|| "Unknown Device".into())
    }

    fn list_devices(&self, data_flow: EDataFlow, kind: DeviceKind) -> Result<Vec<AudioDevice>, CaptureError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(data_flow, DEVICE_STATE_ACTIVE)
                .map_err(|e| {
                    if e.code() == E_ACCESSDENIED {
                        CaptureError::DeviceEnumeration("access to audio devices was denied".into())
                    } else {
                        CaptureError::DeviceEnumeration(format!("EnumAudioEndpoints failed: {}", e))
                    }
                })?;

            let count = collection
                .GetCount()
                .map_err(|e| CaptureError::DeviceEnumeration(format!("GetCount failed: {}", e)))?;

            let mut devices = Vec::with_capacity(count as usize);
            for i in 0..count {
                let device = match collection.Item(i) {
                    Ok(d) => d,
                    Err(_) => continue,
                };
                let id = match device.GetId() {
                    Ok(id) => id.to_string().unwrap_or_default(),
                    Err(_) => continue,
                };
                let label = Self::get_device_friendly_name(&device).unwrap_or_else(|| format!("Device {}", i));
                devices.push(AudioDevice::new(id, kind, label));
            }

            log::debug!("Found {} {:?} endpoints", devices.len(), kind);
            Ok(devices)
        }
    }

    /// Read PKEY_Device_FriendlyName from a device's property store.
    fn get_device_friendly_name(device: &IMMDevice) -> Option<String> {
        unsafe {
            let store = device.OpenPropertyStore(STGM_READ).ok()?;
            let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
            Some(value.to_string()).filter(|name| !name.is_empty())
        }
    }
}
