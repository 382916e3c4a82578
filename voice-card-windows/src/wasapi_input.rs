//! WASAPI input capture provider.
//!
//! Captures a WASAPI capture endpoint in shared mode: a microphone, or a
//! loopback input such as "Stereo Mix". Delivers Float32 samples via the
//! `AudioBufferCallback`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use windows::core::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use voice_card_core::models::audio_models::{AudioDevice, StreamPreprocessing};
use voice_card_core::models::error::CaptureError;
use voice_card_core::traits::capture_provider::{AudioBufferCallback, CaptureProvider};

use crate::com::ComApartment;
use crate::device_enumerator::DeviceEnumerator;

/// Shared-mode buffer duration in 100 ns units (100 ms).
const BUFFER_DURATION: i64 = 1_000_000;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// WASAPI capture of one input endpoint.
///
/// The endpoint is opened on a dedicated thread registered with MMCSS;
/// `start` returns once the stream is running or has failed to open.
pub struct WasapiInputCapture {
    device: AudioDevice,
    preprocessing: StreamPreprocessing,
    running: Arc<AtomicBool>,
    capture_handle: Option<thread::JoinHandle<()>>,
}

impl WasapiInputCapture {
    pub fn new(device: AudioDevice, preprocessing: StreamPreprocessing) -> Self {
        Self {
            device,
            preprocessing,
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: None,
        }
    }

    pub fn preprocessing(&self) -> StreamPreprocessing {
        self.preprocessing
    }
}

impl CaptureProvider for WasapiInputCapture {
    fn start(&mut self, callback: AudioBufferCallback) -> std::result::Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::InvalidState(format!(
                "capture of {} already running",
                self.device.label
            )));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let device_id = self.device.id.clone();
        let preprocessing = self.preprocessing;
        let (ready_tx, ready_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("wasapi-input-capture".into())
            .spawn(move || {
                run_capture_thread(&running, &device_id, preprocessing, &callback, ready_tx);
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CaptureError::StreamOpen(format!("failed to spawn capture thread: {}", e))
            })?;

        let opened = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(CaptureError::StreamOpen("capture thread exited early".into())));
        match opened {
            Ok(()) => {
                log::info!("Capturing {} ({:?})", self.device.label, self.preprocessing);
                self.capture_handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn stop(&mut self) -> std::result::Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_handle.take() {
            if handle.join().is_err() {
                log::error!("Capture thread for {} panicked", self.device.label);
            }
            log::debug!("Stopped capture of {}", self.device.label);
        }
        Ok(())
    }

    fn device_info(&self) -> AudioDevice {
        self.device.clone()
    }
}

impl Drop for WasapiInputCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Body of the capture thread. Reports the open result through `ready`
/// before pumping buffers.
fn run_capture_thread(
    running: &AtomicBool,
    device_id: &str,
    preprocessing: StreamPreprocessing,
    callback: &AudioBufferCallback,
    ready: mpsc::Sender<std::result::Result<(), CaptureError>>,
) {
    let _com = match ComApartment::enter() {
        Ok(com) => com,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let stream = match OpenStream::open(device_id, preprocessing) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    if let Err(e) = stream.pump(running, callback) {
        log::error!("Input capture error on {}: {}", device_id, e);
    }
}

/// A started shared-mode capture stream.
struct OpenStream {
    audio_client: IAudioClient,
    capture_client: IAudioCaptureClient,
    sample_rate: f64,
    channels: u16,
    _mmcss: Option<MmcssRegistration>,
}

impl OpenStream {
    /// Sequence:
    /// 1. Get the capture endpoint by id
    /// 2. Activate IAudioClient and request raw or voice processing
    /// 3. Initialize in shared mode with the endpoint's mix format
    /// 4. Get the IAudioCaptureClient service
    /// 5. Register with MMCSS and start
    fn open(device_id: &str, preprocessing: StreamPreprocessing) -> std::result::Result<Self, CaptureError> {
        unsafe {
            let device = DeviceEnumerator::new()?.capture_endpoint(Some(device_id))?;

            let audio_client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| CaptureError::StreamOpen(format!("Activate failed: {}", e)))?;

            apply_preprocessing(&audio_client, preprocessing);

            let mix_format_ptr = audio_client
                .GetMixFormat()
                .map_err(|e| CaptureError::StreamOpen(format!("GetMixFormat failed: {}", e)))?;
            let mix_format = &*mix_format_ptr;
            let sample_rate = mix_format.nSamplesPerSec as f64;
            let channels = mix_format.nChannels;
            let bits = mix_format.wBitsPerSample;

            let initialized = if bits == 32 {
                audio_client
                    .Initialize(
                        AUDCLNT_SHAREMODE_SHARED,
                        AUDCLNT_STREAMFLAGS_NOPERSIST,
                        BUFFER_DURATION,
                        0,
                        mix_format_ptr,
                        None,
                    )
                    .map_err(|e| CaptureError::StreamOpen(format!("IAudioClient::Initialize failed: {}", e)))
            } else {
                Err(CaptureError::ConfigurationFailed(format!(
                    "unsupported mix format: {} bits per sample",
                    bits
                )))
            };
            CoTaskMemFree(Some(mix_format_ptr as *const _));
            initialized?;

            let capture_client: IAudioCaptureClient = audio_client
                .GetService()
                .map_err(|e| CaptureError::StreamOpen(format!("GetService failed: {}", e)))?;

            let mmcss = MmcssRegistration::register();

            audio_client
                .Start()
                .map_err(|e| CaptureError::StreamOpen(format!("IAudioClient::Start failed: {}", e)))?;

            log::debug!(
                "Opened {} at {} Hz, {} channels",
                DeviceEnumerator::label_of(&device),
                sample_rate,
                channels
            );

            Ok(Self {
                audio_client,
                capture_client,
                sample_rate,
                channels,
                _mmcss: mmcss,
            })
        }
    }

    /// Poll for packets until `running` clears.
    fn pump(&self, running: &AtomicBool, callback: &AudioBufferCallback) -> std::result::Result<(), CaptureError> {
        let channels = self.channels as usize;
        while running.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);

            unsafe {
                let mut packet_length = self
                    .capture_client
                    .GetNextPacketSize()
                    .map_err(|e| CaptureError::Unknown(format!("GetNextPacketSize failed: {}", e)))?;

                while packet_length > 0 {
                    let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                    let mut num_frames: u32 = 0;
                    let mut flags: u32 = 0;

                    self.capture_client
                        .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                        .map_err(|e| CaptureError::Unknown(format!("GetBuffer failed: {}", e)))?;

                    if num_frames > 0 && !buffer_ptr.is_null() {
                        let total_samples = num_frames as usize * channels;
                        if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                            let silence = vec![0.0f32; total_samples];
                            callback(&silence, self.sample_rate, self.channels);
                        } else {
                            let samples = std::slice::from_raw_parts(buffer_ptr as *const f32, total_samples);
                            callback(samples, self.sample_rate, self.channels);
                        }
                    }

                    self.capture_client
                        .ReleaseBuffer(num_frames)
                        .map_err(|e| CaptureError::Unknown(format!("ReleaseBuffer failed: {}", e)))?;

                    packet_length = self
                        .capture_client
                        .GetNextPacketSize()
                        .map_err(|e| CaptureError::Unknown(format!("GetNextPacketSize failed: {}", e)))?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        unsafe {
            let _ = self.audio_client.Stop();
        }
    }
}

/// Ask the endpoint for raw audio or for communications processing.
///
/// Raw mode bypasses the endpoint's effects so loopback audio reaches the
/// mix untouched. Endpoints without IAudioClient2 or raw support keep their
/// default processing.
unsafe fn apply_preprocessing(audio_client: &IAudioClient, preprocessing: StreamPreprocessing) {
    let client2: IAudioClient2 = match audio_client.cast() {
        Ok(client) => client,
        Err(_) => {
            log::debug!("IAudioClient2 unavailable, using default stream processing");
            return;
        }
    };

    let (category, options) = if preprocessing.is_passthrough() {
        (AudioCategory_Other, AUDCLNT_STREAMOPTIONS_RAW)
    } else {
        (AudioCategory_Communications, AUDCLNT_STREAMOPTIONS_NONE)
    };
    let properties = AudioClientProperties {
        cbSize: std::mem::size_of::<AudioClientProperties>() as u32,
        bIsOffload: false.into(),
        eCategory: category,
        Options: options,
    };
    if let Err(e) = client2.SetClientProperties(&properties) {
        log::warn!("Endpoint rejected stream properties {:?}: {}", preprocessing, e);
    }
}

/// MMCSS "Audio" task registration for the current thread.
struct MmcssRegistration(windows::Win32::Foundation::HANDLE);

impl MmcssRegistration {
    fn register() -> Option<Self> {
        let mut task_index: u32 = 0;
        unsafe { AvSetMmThreadCharacteristicsW(w!("Audio"), &mut task_index) }
            .map(Self)
            .map_err(|e| log::debug!("MMCSS registration failed: {}", e))
            .ok()
    }
}

impl Drop for MmcssRegistration {
    fn drop(&mut self) {
        unsafe {
            let _ = AvRevertMmThreadCharacteristics(self.0);
        }
    }
}
