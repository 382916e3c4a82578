//! Scripted host for unit tests: fixed device list, controllable failures,
//! and a way to push samples through a started stream's callback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::audio_models::{AudioDevice, DeviceKind, StreamPreprocessing};
use crate::models::config::CaptureConfiguration;
use crate::models::error::CaptureError;
use crate::traits::capture_provider::{AudioBufferCallback, AudioHost, CaptureProvider};

pub(crate) const LOOPBACK_ID: &str = "stereo-mix";
pub(crate) const MIC_ID: &str = "mic-array";
pub(crate) const OUTPUT_ID: &str = "hdmi";
/// Feed key of the stream opened with no explicit device.
pub(crate) const DEFAULT_ID: &str = "default";

pub(crate) fn standard_devices() -> Vec<AudioDevice> {
    vec![
        AudioDevice::new(OUTPUT_ID, DeviceKind::Output, "HDMI Output"),
        AudioDevice::new(LOOPBACK_ID, DeviceKind::Input, "Stereo Mix (Realtek Audio)"),
        AudioDevice::new(MIC_ID, DeviceKind::Input, "Microphone Array (Realtek Audio)"),
    ]
}

/// 8 kHz mono keeps test buffers small.
pub(crate) fn test_config() -> CaptureConfiguration {
    CaptureConfiguration {
        sample_rate: 8000.0,
        channels: 1,
        output_directory: std::env::temp_dir().join(format!("voice-card-test-{}", uuid::Uuid::new_v4())),
        render_interval: Duration::from_millis(5),
        meter_interval: Duration::from_millis(5),
        buffer_secs: 10.0,
        ..CaptureConfiguration::default()
    }
}

type Feeds = Arc<Mutex<HashMap<String, AudioBufferCallback>>>;
type Prerolls = Arc<Mutex<HashMap<String, Vec<f32>>>>;

#[derive(Clone)]
pub(crate) struct ScriptedHost {
    devices: Result<Vec<AudioDevice>, CaptureError>,
    failing: Arc<Mutex<Vec<String>>>,
    feeds: Feeds,
    prerolls: Prerolls,
    opened: Arc<Mutex<Vec<(Option<String>, StreamPreprocessing)>>>,
    stopped: Arc<Mutex<Vec<String>>>,
}

impl ScriptedHost {
    pub(crate) fn new(devices: Vec<AudioDevice>) -> Self {
        Self {
            devices: Ok(devices),
            failing: Arc::new(Mutex::new(Vec::new())),
            feeds: Arc::new(Mutex::new(HashMap::new())),
            prerolls: Arc::new(Mutex::new(HashMap::new())),
            opened: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn denying_enumeration() -> Self {
        let mut host = Self::new(Vec::new());
        host.devices = Err(CaptureError::DeviceEnumeration("permission denied".into()));
        host
    }

    /// Make opening `id` (or [`DEFAULT_ID`]) fail.
    pub(crate) fn fail_open(self, id: &str) -> Self {
        self.failing.lock().push(id.to_string());
        self
    }

    /// Samples (8 kHz mono) the stream `id` delivers from inside `start`,
    /// before `start` returns.
    pub(crate) fn preroll(self, id: &str, samples: Vec<f32>) -> Self {
        self.prerolls.lock().insert(id.to_string(), samples);
        self
    }

    /// Deliver samples through the callback of the started stream `id`.
    /// Returns false if no such stream is running.
    pub(crate) fn feed(&self, id: &str, samples: &[f32], sample_rate: f64, channels: u16) -> bool {
        let callback = self.feeds.lock().get(id).cloned();
        match callback {
            Some(callback) => {
                callback(samples, sample_rate, channels);
                true
            }
            None => false,
        }
    }

    pub(crate) fn opened(&self) -> Vec<(Option<String>, StreamPreprocessing)> {
        self.opened.lock().clone()
    }

    pub(crate) fn stopped(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }
}

impl AudioHost for ScriptedHost {
    fn enumerate_devices(&self) -> Result<Vec<AudioDevice>, CaptureError> {
        self.devices.clone()
    }

    fn open_stream(
        &self,
        device: Option<&AudioDevice>,
        preprocessing: StreamPreprocessing,
    ) -> Result<Box<dyn CaptureProvider>, CaptureError> {
        self.opened.lock().push((device.map(|d| d.id.clone()), preprocessing));
        let device = device
            .cloned()
            .unwrap_or_else(|| AudioDevice::new(DEFAULT_ID, DeviceKind::Input, "Default Microphone"));
        if self.failing.lock().contains(&device.id) {
            return Err(CaptureError::StreamOpen(format!("{} is unavailable", device.label)));
        }
        let preroll = self.prerolls.lock().remove(&device.id);
        Ok(Box::new(ScriptedProvider {
            device,
            feeds: Arc::clone(&self.feeds),
            preroll,
            stopped: Arc::clone(&self.stopped),
            running: false,
        }))
    }
}

struct ScriptedProvider {
    device: AudioDevice,
    feeds: Feeds,
    preroll: Option<Vec<f32>>,
    stopped: Arc<Mutex<Vec<String>>>,
    running: bool,
}

impl CaptureProvider for ScriptedProvider {
    fn start(&mut self, callback: AudioBufferCallback) -> Result<(), CaptureError> {
        self.feeds.lock().insert(self.device.id.clone(), Arc::clone(&callback));
        self.running = true;
        if let Some(samples) = self.preroll.take() {
            callback(&samples, 8000.0, 1);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if self.running {
            self.running = false;
            self.feeds.lock().remove(&self.device.id);
            self.stopped.lock().push(self.device.id.clone());
        }
        Ok(())
    }

    fn device_info(&self) -> AudioDevice {
        self.device.clone()
    }
}
