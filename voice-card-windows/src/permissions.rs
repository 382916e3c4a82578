//! Windows microphone privacy check.
//!
//! On Windows 10 1803+, capture endpoint access is controlled by
//! Settings > Privacy > Microphone. The toggle covers every capture
//! endpoint, so a denied microphone also hides a "Stereo Mix" input.
//! Unpackaged desktop apps get no consent prompt.

use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use voice_card_core::models::error::CaptureError;

use crate::com::ComApartment;

/// Whether capture endpoints may be opened.
///
/// Tries to activate the default capture endpoint. `Ok(false)` means access
/// is denied by privacy settings; a machine without any capture endpoint
/// counts as allowed.
pub fn check_microphone_permission() -> Result<bool, CaptureError> {
    let _com = ComApartment::enter()?;
    unsafe {
        let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
            .map_err(|e| CaptureError::DeviceEnumeration(format!("failed to create enumerator: {}", e)))?;

        let device = match enumerator.GetDefaultAudioEndpoint(eCapture, eConsole) {
            Ok(d) => d,
            Err(_) => return Ok(true),
        };

        match device.Activate::<IAudioClient>(CLSCTX_ALL, None) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == E_ACCESSDENIED => Ok(false),
            Err(e) => {
                log::warn!("Unexpected error checking microphone permission: {}", e);
                Ok(true)
            }
        }
    }
}

/// Fail with `DeviceEnumeration` when capture access is denied.
pub fn ensure_capture_access() -> Result<(), CaptureError> {
    if check_microphone_permission()? {
        Ok(())
    } else {
        Err(CaptureError::DeviceEnumeration(
            "microphone access is disabled in Windows privacy settings".into(),
        ))
    }
}
