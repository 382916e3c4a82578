use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::graph::destination::{MixedStream, SinkId};
use crate::models::audio_models::{MeterReading, METER_BAR_COUNT};
use crate::models::error::CaptureError;
use crate::processing::analyser::Analyser;
use crate::traits::capture_delegate::CaptureDelegate;

pub const MIN_BAR_HEIGHT: f32 = 15.0;
pub const MAX_BAR_HEIGHT: f32 = 55.0;

/// Relative bar weights, symmetric and center-peaked.
pub const BAR_WEIGHTS: [f32; METER_BAR_COUNT] = [0.5, 0.7, 0.9, 1.0, 0.9, 0.7, 0.5];

/// Resting shape drawn while nothing is audible.
pub const IDLE_BARS: [f32; METER_BAR_COUNT] = [15.0, 25.0, 35.0, 45.0, 35.0, 25.0, 15.0];

/// Amplitudes above this count as someone making sound.
pub const ACTIVITY_THRESHOLD: f32 = 10.0;

/// Bar heights for a byte-scale amplitude.
pub fn bar_heights(amplitude: f32) -> [f32; METER_BAR_COUNT] {
    let scale = (MAX_BAR_HEIGHT - MIN_BAR_HEIGHT) / 255.0;
    let amplitude = amplitude.clamp(0.0, 255.0);
    BAR_WEIGHTS.map(|weight| MIN_BAR_HEIGHT + amplitude * scale * weight)
}

pub fn reading_for(amplitude: f32) -> MeterReading {
    let is_active = amplitude > ACTIVITY_THRESHOLD;
    MeterReading {
        amplitude,
        is_active,
        bars: if is_active { bar_heights(amplitude) } else { IDLE_BARS },
    }
}

impl Default for MeterReading {
    fn default() -> Self {
        reading_for(0.0)
    }
}

/// Post-mix volume visualisation.
pub struct VolumeMeter;

impl VolumeMeter {
    /// Tap `stream` with a private analyser and sample it every `interval`.
    pub fn attach(
        stream: &MixedStream,
        fft_size: usize,
        interval: Duration,
        delegate: Option<Arc<dyn CaptureDelegate>>,
    ) -> Result<MeterHandle, CaptureError> {
        let analyser = Arc::new(Mutex::new(Analyser::new(fft_size)?));
        let channels = stream.channels();

        let tap = Arc::clone(&analyser);
        let sink = stream.subscribe(Box::new(move |samples| tap.lock().push(samples, channels)))?;

        let latest = Arc::new(Mutex::new(MeterReading::default()));
        let running = Arc::new(AtomicBool::new(true));

        let frame_running = Arc::clone(&running);
        let frame_latest = Arc::clone(&latest);
        let spawned = thread::Builder::new()
            .name("volume-meter".into())
            .spawn(move || {
                while frame_running.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    let reading = reading_for(analyser.lock().average_magnitude());
                    *frame_latest.lock() = reading;
                    if let Some(ref d) = delegate {
                        d.on_meter(&reading);
                    }
                }
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                stream.unsubscribe(sink);
                return Err(CaptureError::Unknown(format!("failed to spawn meter thread: {}", e)));
            }
        };

        Ok(MeterHandle {
            stream: stream.clone(),
            sink: Some(sink),
            running,
            handle: Some(handle),
            latest,
        })
    }

    pub fn detach(handle: &mut MeterHandle) {
        handle.detach();
    }
}

/// A running meter loop.
pub struct MeterHandle {
    stream: MixedStream,
    sink: Option<SinkId>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    latest: Arc<Mutex<MeterReading>>,
}

impl MeterHandle {
    pub fn latest(&self) -> MeterReading {
        *self.latest.lock()
    }

    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    /// Stop the loop and release the tap. Safe to call more than once.
    pub fn detach(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Volume meter thread panicked");
            }
        }
        if let Some(sink) = self.sink.take() {
            self.stream.unsubscribe(sink);
        }
        *self.latest.lock() = MeterReading::default();
    }
}

impl Drop for MeterHandle {
    fn drop(&mut self) {
        self.detach();
    }
}
