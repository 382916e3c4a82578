//! Per-thread COM apartment handling.

use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

use voice_card_core::models::error::CaptureError;

/// Keeps COM initialized on the current thread until dropped.
///
/// A thread already in a different apartment is accepted as-is and left
/// alone on drop.
pub(crate) struct ComApartment {
    owned: bool,
}

impl ComApartment {
    pub(crate) fn enter() -> Result<Self, CaptureError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self { owned: false });
        }
        hr.ok()
            .map_err(|e| CaptureError::Unknown(format!("CoInitializeEx failed: {}", e)))?;
        Ok(Self { owned: true })
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        if self.owned {
            unsafe { CoUninitialize() };
        }
    }
}
