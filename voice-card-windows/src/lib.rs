//! # voice-card-windows
//!
//! Windows WASAPI backend for voice-card-core.
//!
//! Provides:
//! - `WasapiHost`: `AudioHost` implementation over the MMDevice API
//! - `WasapiInputCapture`: shared-mode capture of any input endpoint, raw for loopback inputs
//! - `DeviceEnumerator`: endpoint listing with friendly names
//! - `permissions`: Windows microphone privacy check
//!
//! Loopback capture relies on an enabled "Stereo Mix" (or a virtual cable
//! such as VoiceMeeter) appearing as a capture endpoint.
//!
//! ## Usage
//! ```ignore
//! use voice_card_core::{CaptureConfiguration, RecordingController};
//! use voice_card_windows::WasapiHost;
//!
//! let mut controller = RecordingController::new(WasapiHost::new(), CaptureConfiguration::default());
//! controller.begin()?;
//! ```

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod host;
#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod wasapi_input;

#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use host::WasapiHost;
#[cfg(target_os = "windows")]
pub use wasapi_input::WasapiInputCapture;
