use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::graph::clock::ContextClock;
use crate::graph::destination::MixedStream;
use crate::models::audio_models::{AudioDevice, AudioLevels, BranchKind, StreamPreprocessing};
use crate::models::config::CaptureConfiguration;
use crate::models::error::CaptureError;
use crate::processing::analyser::Analyser;
use crate::processing::gain::GainParam;
use crate::processing::mixer::BranchMixer;
use crate::processing::ring_buffer::RingBuffer;
use crate::traits::capture_provider::{AudioHost, CaptureProvider};

/// Longest stretch of audio mixed in one render pass.
const MAX_RENDER_QUANTUM: Duration = Duration::from_millis(100);

/// How long the loopback may deliver nothing before the microphone paces the mix.
const LOOPBACK_STALL: Duration = Duration::from_millis(200);

/// Gain nodes of the two branches. A branch that was never opened has no gain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BranchGains {
    pub loopback: Option<GainParam>,
    pub microphone: Option<GainParam>,
}

impl BranchGains {
    pub fn get(&self, kind: BranchKind) -> Option<&GainParam> {
        match kind {
            BranchKind::Loopback => self.loopback.as_ref(),
            BranchKind::Microphone => self.microphone.as_ref(),
        }
    }

    pub fn get_mut(&mut self, kind: BranchKind) -> Option<&mut GainParam> {
        match kind {
            BranchKind::Loopback => self.loopback.as_mut(),
            BranchKind::Microphone => self.microphone.as_mut(),
        }
    }

    pub fn has(&self, kind: BranchKind) -> bool {
        self.get(kind).is_some()
    }

    /// Gain of `kind` at context time `time`; 0.0 for a missing branch.
    pub fn value_at(&self, kind: BranchKind, time: f64) -> f32 {
        self.get(kind).map(|g| g.value_at(time)).unwrap_or(0.0)
    }

    fn settle(&mut self, time: f64) {
        if let Some(g) = self.loopback.as_mut() {
            g.settle(time);
        }
        if let Some(g) = self.microphone.as_mut() {
            g.settle(time);
        }
    }
}

/// One opened input path: hardware stream, its ring buffer and requested processing.
pub struct AudioBranch {
    kind: BranchKind,
    device: AudioDevice,
    preprocessing: StreamPreprocessing,
    provider: Option<Box<dyn CaptureProvider>>,
    buffer: Arc<Mutex<RingBuffer>>,
}

impl AudioBranch {
    pub fn kind(&self) -> BranchKind {
        self.kind
    }

    pub fn device(&self) -> &AudioDevice {
        &self.device
    }

    pub fn preprocessing(&self) -> StreamPreprocessing {
        self.preprocessing
    }

    /// Stop the hardware stream. Errors are logged; the branch is released either way.
    fn release(&mut self) {
        if let Some(mut provider) = self.provider.take() {
            if let Err(e) = provider.stop() {
                log::warn!("Failed to stop {:?} stream on {}: {}", self.kind, self.device.label, e);
            }
        }
    }
}

impl std::fmt::Debug for AudioBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBranch")
            .field("kind", &self.kind)
            .field("device", &self.device)
            .field("preprocessing", &self.preprocessing)
            .field("live", &self.provider.is_some())
            .finish()
    }
}

/// Tracks how long the loopback buffer has been empty.
#[derive(Debug, Default)]
struct LoopbackWatch {
    idle_since: Option<Instant>,
    stalled: bool,
}

/// State shared between the graph owner and the render thread.
struct RenderCore {
    mixer: BranchMixer,
    clock: ContextClock,
    loopback_buffer: Option<Arc<Mutex<RingBuffer>>>,
    mic_buffer: Option<Arc<Mutex<RingBuffer>>>,
    gains: Arc<Mutex<BranchGains>>,
    loopback_analyser: Option<Arc<Mutex<Analyser>>>,
    levels: Arc<Mutex<AudioLevels>>,
    destination: MixedStream,
    max_quantum_frames: usize,
    loopback_watch: Mutex<LoopbackWatch>,
}

impl RenderCore {
    /// Mix one quantum from the branch buffers into the destination.
    ///
    /// The loopback branch drives timing when present: the quantum is however
    /// many loopback frames are buffered, and the microphone is padded with
    /// silence to match. A loopback that stays empty for `LOOPBACK_STALL`
    /// while the microphone has audio hands pacing to the microphone and is
    /// rendered (and analysed) as silence. Returns the number of frames rendered.
    fn render_once(&self) -> usize {
        let channels = self.mixer.channels as usize;
        let available = |buffer: &Option<Arc<Mutex<RingBuffer>>>| buffer.as_ref().map(|b| b.lock().count() / channels);
        let frames = match (available(&self.loopback_buffer), available(&self.mic_buffer)) {
            (Some(loopback), mic) => self.loopback_paced_frames(loopback, mic.unwrap_or(0)),
            (None, Some(mic)) => mic,
            (None, None) => return 0,
        }
        .min(self.max_quantum_frames);
        if frames == 0 {
            return 0;
        }

        let sample_count = frames * channels;
        let loopback = self.loopback_buffer.as_ref().map(|b| b.lock().read_padded(sample_count));
        let microphone = self.mic_buffer.as_ref().map(|b| b.lock().read_padded(sample_count));

        if let (Some(analyser), Some(samples)) = (&self.loopback_analyser, &loopback) {
            analyser.lock().push(samples, self.mixer.channels);
        }

        let start = self.clock.current_time();
        let rate = self.mixer.target_sample_rate;
        let mixed = {
            let mut gains = self.gains.lock();
            let mixed = {
                let snapshot = &*gains;
                let curve = |kind: BranchKind| {
                    move |frame: usize| snapshot.value_at(kind, start + frame as f64 / rate)
                };
                let mut branches = Vec::with_capacity(2);
                if let Some(samples) = &loopback {
                    branches.push((samples.as_slice(), curve(BranchKind::Loopback)));
                }
                if let Some(samples) = &microphone {
                    branches.push((samples.as_slice(), curve(BranchKind::Microphone)));
                }
                self.mixer.mix_gained(&mut branches, frames)
            };
            gains.settle(start + frames as f64 / rate);
            mixed
        };

        *self.levels.lock() = AudioLevels {
            rms_level: BranchMixer::rms_level(&mixed),
            peak_level: BranchMixer::peak_level(&mixed),
        };

        self.destination.push(&mixed);
        self.clock.advance(frames);
        frames
    }

    fn loopback_paced_frames(&self, loopback: usize, mic: usize) -> usize {
        let mut watch = self.loopback_watch.lock();
        if loopback > 0 {
            if watch.stalled {
                log::info!("Loopback stream resumed");
            }
            *watch = LoopbackWatch::default();
            return loopback;
        }

        let idle_since = *watch.idle_since.get_or_insert_with(Instant::now);
        if mic == 0 || idle_since.elapsed() < LOOPBACK_STALL {
            return 0;
        }
        if !watch.stalled {
            watch.stalled = true;
            log::warn!("Loopback stream stalled, pacing the mix from the microphone");
        }
        mic
    }

    fn render_pending(&self) -> usize {
        let mut total = 0;
        loop {
            let frames = self.render_once();
            if frames == 0 {
                return total;
            }
            total += frames;
        }
    }
}

/// Builds the two-branch capture graph.
pub struct AudioGraph;

impl AudioGraph {
    /// Open the selected devices and wire them into a gained mix.
    ///
    /// Each branch is optional and opened independently; a branch that fails
    /// to open is logged and skipped. Fails only when no branch could be
    /// opened. Loopback streams are opened raw, microphone streams with voice
    /// processing. With both branches the loopback starts at full gain and
    /// the microphone muted; a lone branch plays at full gain.
    ///
    /// The returned graph is not rendering yet; see
    /// [`AudioGraphState::start_rendering`].
    pub fn build(
        host: &dyn AudioHost,
        loopback: Option<&AudioDevice>,
        microphone: Option<&AudioDevice>,
        config: &CaptureConfiguration,
    ) -> Result<AudioGraphState, CaptureError> {
        let mixer = BranchMixer::new(config.sample_rate, config.channels);
        let capacity = (config.sample_rate * config.buffer_secs) as usize * config.channels.max(1) as usize;

        let mut failures = Vec::new();
        let mut open = |kind: BranchKind, device: Option<&AudioDevice>| -> Option<AudioBranch> {
            let device = device?;
            match Self::open_branch(host, kind, device, &mixer, capacity) {
                Ok(branch) => Some(branch),
                Err(e) => {
                    log::warn!("Could not open {:?} branch on {}: {}", kind, device.label, e);
                    failures.push(format!("{:?}: {}", kind, e));
                    None
                }
            }
        };
        let loopback = open(BranchKind::Loopback, loopback);
        let microphone = open(BranchKind::Microphone, microphone);

        if loopback.is_none() && microphone.is_none() {
            let reason = if failures.is_empty() {
                "no loopback or microphone device selected".to_string()
            } else {
                failures.join("; ")
            };
            return Err(CaptureError::GraphBuild { reason });
        }

        let gains = match (&loopback, &microphone) {
            (Some(_), Some(_)) => BranchGains {
                loopback: Some(GainParam::new(1.0)),
                microphone: Some(GainParam::new(0.0)),
            },
            (Some(_), None) => BranchGains {
                loopback: Some(GainParam::new(1.0)),
                microphone: None,
            },
            _ => BranchGains {
                loopback: None,
                microphone: Some(GainParam::new(1.0)),
            },
        };

        let loopback_analyser = match &loopback {
            Some(_) => match Analyser::new(config.arbiter.fft_size) {
                Ok(analyser) => Some(Arc::new(Mutex::new(analyser))),
                Err(e) => {
                    log::warn!("Loopback analyser unavailable, automatic switching disabled: {}", e);
                    None
                }
            },
            None => None,
        };

        let core = RenderCore {
            mixer: mixer.clone(),
            clock: ContextClock::new(config.sample_rate),
            loopback_buffer: loopback.as_ref().map(|b| Arc::clone(&b.buffer)),
            mic_buffer: microphone.as_ref().map(|b| Arc::clone(&b.buffer)),
            gains: Arc::new(Mutex::new(gains)),
            loopback_analyser,
            levels: Arc::new(Mutex::new(AudioLevels::default())),
            destination: MixedStream::new(config.sample_rate, mixer.channels),
            max_quantum_frames: ((config.sample_rate * MAX_RENDER_QUANTUM.as_secs_f64()) as usize).max(1),
            loopback_watch: Mutex::new(LoopbackWatch::default()),
        };

        log::info!(
            "Audio graph built: loopback={}, microphone={}",
            loopback.as_ref().map(|b| b.device.label.as_str()).unwrap_or("none"),
            microphone.as_ref().map(|b| b.device.label.as_str()).unwrap_or("none"),
        );

        Ok(AudioGraphState {
            core: Arc::new(core),
            loopback,
            microphone,
            render_interval: config.render_interval,
            render_running: Arc::new(AtomicBool::new(false)),
            render_handle: None,
            torn_down: false,
        })
    }

    fn open_branch(
        host: &dyn AudioHost,
        kind: BranchKind,
        device: &AudioDevice,
        mixer: &BranchMixer,
        capacity: usize,
    ) -> Result<AudioBranch, CaptureError> {
        let preprocessing = kind.preprocessing();
        let mut provider = host.open_stream(Some(device), preprocessing)?;
        let buffer = Arc::new(Mutex::new(RingBuffer::new(capacity)));

        let sink = Arc::clone(&buffer);
        let conformer = Mutex::new(mixer.conformer());
        let callback = Arc::new(move |samples: &[f32], sample_rate: f64, channels: u16| {
            let conformed = conformer.lock().conform(samples, sample_rate, channels);
            sink.lock().write(&conformed);
        });

        if let Err(e) = provider.start(callback) {
            let _ = provider.stop();
            return Err(e);
        }

        log::debug!("{:?} branch live on {} ({:?})", kind, device.label, preprocessing);
        Ok(AudioBranch {
            kind,
            device: device.clone(),
            preprocessing,
            provider: Some(provider),
            buffer,
        })
    }
}

/// A built graph: its branches, gain nodes, loopback analyser and destination.
pub struct AudioGraphState {
    core: Arc<RenderCore>,
    loopback: Option<AudioBranch>,
    microphone: Option<AudioBranch>,
    render_interval: Duration,
    render_running: Arc<AtomicBool>,
    render_handle: Option<thread::JoinHandle<()>>,
    torn_down: bool,
}

impl AudioGraphState {
    /// The mix-out stream.
    pub fn destination(&self) -> MixedStream {
        self.core.destination.clone()
    }

    pub fn clock(&self) -> ContextClock {
        self.core.clock.clone()
    }

    pub fn context_time(&self) -> f64 {
        self.core.clock.current_time()
    }

    /// Gain nodes, shared with the render thread and the arbiter.
    pub fn gains(&self) -> Arc<Mutex<BranchGains>> {
        Arc::clone(&self.core.gains)
    }

    /// Current gain of `kind`, or `None` if that branch was never opened.
    pub fn gain(&self, kind: BranchKind) -> Option<f32> {
        let now = self.context_time();
        self.core.gains.lock().get(kind).map(|g| g.value_at(now))
    }

    pub fn loopback_analyser(&self) -> Option<Arc<Mutex<Analyser>>> {
        self.core.loopback_analyser.clone()
    }

    pub fn branch(&self, kind: BranchKind) -> Option<&AudioBranch> {
        match kind {
            BranchKind::Loopback => self.loopback.as_ref(),
            BranchKind::Microphone => self.microphone.as_ref(),
        }
    }

    pub fn has_branch(&self, kind: BranchKind) -> bool {
        self.branch(kind).is_some()
    }

    pub fn active_branches(&self) -> Vec<BranchKind> {
        [BranchKind::Loopback, BranchKind::Microphone]
            .into_iter()
            .filter(|&k| self.has_branch(k))
            .collect()
    }

    /// Post-mix RMS and peak of the last rendered quantum.
    pub fn current_levels(&self) -> AudioLevels {
        *self.core.levels.lock()
    }

    /// Render one quantum on the caller's thread.
    pub fn render_once(&self) -> usize {
        if self.torn_down {
            return 0;
        }
        self.core.render_once()
    }

    /// Render until the branch buffers are drained. Returns frames rendered.
    pub fn render_pending(&self) -> usize {
        if self.torn_down {
            return 0;
        }
        self.core.render_pending()
    }

    pub fn is_rendering(&self) -> bool {
        self.render_handle.is_some()
    }

    /// Spawn the render thread. No-op if it is already running.
    pub fn start_rendering(&mut self) -> Result<(), CaptureError> {
        if self.torn_down {
            return Err(CaptureError::InvalidState("audio graph has been torn down".into()));
        }
        if self.render_handle.is_some() {
            return Ok(());
        }
        self.render_running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.render_running);
        let core = Arc::clone(&self.core);
        let interval = self.render_interval;

        let handle = thread::Builder::new()
            .name("audio-graph-render".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    core.render_pending();
                }
            })
            .map_err(|e| {
                self.render_running.store(false, Ordering::SeqCst);
                CaptureError::GraphBuild {
                    reason: format!("failed to spawn render thread: {}", e),
                }
            })?;

        self.render_handle = Some(handle);
        Ok(())
    }

    fn stop_rendering(&mut self) {
        self.render_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.render_handle.take() {
            if handle.join().is_err() {
                log::error!("Audio graph render thread panicked");
            }
        }
    }

    /// Stop rendering, flush what is buffered, release both hardware
    /// streams and close the destination. Safe to call more than once.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.stop_rendering();
        self.core.render_pending();

        for branch in [self.loopback.as_mut(), self.microphone.as_mut()].into_iter().flatten() {
            branch.release();
        }
        self.core.destination.close();
        self.torn_down = true;
        log::debug!("Audio graph torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl Drop for AudioGraphState {
    fn drop(&mut self) {
        self.teardown();
    }
}
