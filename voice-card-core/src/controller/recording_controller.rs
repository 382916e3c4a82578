use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::arbiter::source_arbiter::ArbiterHandle;
use crate::capture::capture_session::{CaptureSession, StopOutcome};
use crate::graph::audio_graph::{AudioGraph, AudioGraphState};
use crate::graph::destination::MixedStream;
use crate::inventory::device_inventory::DeviceInventory;
use crate::meter::volume_meter::{MeterHandle, VolumeMeter};
use crate::models::audio_models::{AudioDevice, AudioLevels, BranchKind, DeviceRole, MeterReading, StreamPreprocessing};
use crate::models::config::CaptureConfiguration;
use crate::models::error::CaptureError;
use crate::models::recording_result::{FinalizedAudio, RecordingResult};
use crate::models::state::RecordingState;
use crate::processing::mixer::BranchMixer;
use crate::storage::audio_writer::AudioFileWriter;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::capture_provider::{AudioHost, CaptureProvider};

/// What a finished session produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub audio: FinalizedAudio,
    pub elapsed_secs: u64,
    pub started_at: DateTime<Utc>,
    pub sources: Vec<BranchKind>,
}

/// Where the mixed stream of a session comes from.
enum SessionSource {
    Graph(AudioGraphState),
    /// Plain default-microphone stream, used when no graph could be built.
    Direct {
        provider: Option<Box<dyn CaptureProvider>>,
        stream: MixedStream,
    },
}

impl SessionSource {
    /// Begin delivering audio to the mixed stream. Called once the recorder
    /// is subscribed.
    fn start(&mut self) -> Result<(), CaptureError> {
        match self {
            Self::Graph(graph) => graph.start_rendering(),
            Self::Direct { provider, stream } => {
                let Some(provider) = provider.as_mut() else {
                    return Err(CaptureError::NoAudioDevice);
                };
                let conformer = Mutex::new(BranchMixer::new(stream.sample_rate(), stream.channels()).conformer());
                let sink = stream.clone();
                let callback = Arc::new(move |samples: &[f32], sample_rate: f64, channels: u16| {
                    let conformed = conformer.lock().conform(samples, sample_rate, channels);
                    sink.push(&conformed);
                });
                provider.start(callback).map_err(|e| {
                    log::error!("Default microphone failed to start: {}", e);
                    CaptureError::NoAudioDevice
                })?;
                log::info!("Recording from default microphone without loopback");
                Ok(())
            }
        }
    }

    fn stream(&self) -> MixedStream {
        match self {
            Self::Graph(graph) => graph.destination(),
            Self::Direct { stream, .. } => stream.clone(),
        }
    }

    fn sources(&self) -> Vec<BranchKind> {
        match self {
            Self::Graph(graph) => graph.active_branches(),
            Self::Direct { .. } => vec![BranchKind::Microphone],
        }
    }

    fn has_loopback(&self) -> bool {
        matches!(self, Self::Graph(graph) if graph.has_branch(BranchKind::Loopback))
    }

    fn teardown(&mut self) {
        match self {
            Self::Graph(graph) => graph.teardown(),
            Self::Direct { provider, stream } => {
                if let Some(mut provider) = provider.take() {
                    if let Err(e) = provider.stop() {
                        log::warn!("Failed to stop fallback microphone: {}", e);
                    }
                }
                stream.close();
            }
        }
    }
}

struct ActiveSession {
    source: SessionSource,
    arbiter: Option<ArbiterHandle>,
    meter: Option<MeterHandle>,
    capture: CaptureSession,
    started_at: DateTime<Utc>,
}

impl ActiveSession {
    /// Meter, then arbiter, then graph and hardware streams.
    fn release(&mut self) {
        if let Some(mut meter) = self.meter.take() {
            meter.detach();
        }
        if let Some(mut arbiter) = self.arbiter.take() {
            arbiter.stop();
        }
        self.source.teardown();
    }

    fn finish(&mut self) -> Option<FinalizedAudio> {
        self.release();
        match self.capture.stop() {
            StopOutcome::Finalized(audio) => Some(audio),
            StopOutcome::AlreadyStopped => None,
        }
    }

    fn abort(&mut self) {
        self.release();
        self.capture.discard();
    }
}

/// Drives one recording at a time: Idle → Recording → Stopped.
///
/// ```text
/// begin ─→ inventory ─→ AudioGraph::build ─┬─→ arbiter (both branches)
///                         │ fails          ├─→ volume meter
///                         ↓                └─→ capture session
///                default mic, no graph
/// ```
pub struct RecordingController<H: AudioHost> {
    host: H,
    config: CaptureConfiguration,
    delegate: Option<Arc<dyn CaptureDelegate>>,
    state: RecordingState,
    session: Option<ActiveSession>,
    outcome: Option<SessionOutcome>,
}

impl<H: AudioHost> RecordingController<H> {
    pub fn new(host: H, config: CaptureConfiguration) -> Self {
        Self {
            host,
            config,
            delegate: None,
            state: RecordingState::Idle,
            session: None,
            outcome: None,
        }
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn CaptureDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn config(&self) -> &CaptureConfiguration {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Start recording. Valid from Idle and Stopped; a previous outcome is discarded.
    ///
    /// Builds the dual-source graph from the inventory's picks (or the
    /// configured device ids). If no graph can be built, falls back to the
    /// host's default microphone. Fails with `NoAudioDevice` when that fails
    /// too, and with `RecorderInit` when the recorder cannot attach; the
    /// controller is Idle after either.
    pub fn begin(&mut self) -> Result<(), CaptureError> {
        if self.state.is_recording() {
            return Err(CaptureError::InvalidState("already recording".into()));
        }
        self.config.validate().map_err(CaptureError::ConfigurationFailed)?;
        self.outcome = None;
        if self.state.is_stopped() {
            self.set_state(RecordingState::Idle);
        }

        let (loopback, microphone) = self.select_devices();
        let mut source = match self.build_graph(loopback.as_ref(), microphone.as_ref()) {
            Ok(graph) => SessionSource::Graph(graph),
            Err(e) => {
                log::warn!("Dual-source capture unavailable ({}), falling back to default microphone", e);
                self.open_fallback()?
            }
        };

        let mut capture = CaptureSession::new(self.config.chunk_duration);
        if let Some(ref d) = self.delegate {
            let d = Arc::clone(d);
            capture.set_on_finalized(move |audio| d.on_capture_finished(audio));
        }
        let stream = source.stream();
        if let Err(e) = capture.start(&stream) {
            log::error!("Recorder could not start: {}", e);
            source.teardown();
            self.notify_error(&e);
            return Err(e);
        }
        if let Err(e) = source.start() {
            log::error!("Audio source could not start: {}", e);
            capture.discard();
            source.teardown();
            self.notify_error(&e);
            return Err(e);
        }

        let arbiter = match &source {
            SessionSource::Graph(graph) => {
                match ArbiterHandle::start(graph, self.config.arbiter.clone(), self.delegate.clone()) {
                    Ok(handle) => handle,
                    Err(e) => {
                        log::warn!("Arbiter unavailable, automatic switching disabled: {}", e);
                        None
                    }
                }
            }
            SessionSource::Direct { .. } => None,
        };

        if !source.has_loopback() {
            log::warn!("No loopback device: playback audio will not be recorded");
            self.notify_error(&CaptureError::DeviceNotAvailable);
        }

        let meter = match VolumeMeter::attach(
            &stream,
            self.config.arbiter.fft_size,
            self.config.meter_interval,
            self.delegate.clone(),
        ) {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("Volume meter unavailable: {}", e);
                None
            }
        };

        self.session = Some(ActiveSession {
            source,
            arbiter,
            meter,
            capture,
            started_at: Utc::now(),
        });
        self.set_state(RecordingState::Recording { elapsed_secs: 0 });
        log::info!("Recording started");
        Ok(())
    }

    /// The external 1-second tick. Returns the new elapsed time while recording.
    pub fn tick(&mut self) -> Option<u64> {
        let elapsed = self.state.elapsed_secs()? + 1;
        self.set_state(RecordingState::Recording { elapsed_secs: elapsed });
        Some(elapsed)
    }

    /// Stop and finalize. Before the minimum duration this fails with
    /// `RecordingTooShort` and recording simply continues.
    pub fn end(&mut self) -> Result<&SessionOutcome, CaptureError> {
        let Some(elapsed_secs) = self.state.elapsed_secs() else {
            return Err(CaptureError::InvalidState("not recording".into()));
        };
        if elapsed_secs < self.config.min_duration_secs {
            let err = CaptureError::RecordingTooShort {
                elapsed_secs,
                minimum_secs: self.config.min_duration_secs,
            };
            log::info!("{}", err);
            self.notify_error(&err);
            return Err(err);
        }

        let mut session = self
            .session
            .take()
            .ok_or_else(|| CaptureError::InvalidState("no active session".into()))?;
        let sources = session.source.sources();
        let audio = session.finish().unwrap_or_else(|| FinalizedAudio {
            samples: Vec::new(),
            sample_rate: self.config.sample_rate.round() as u32,
            channels: self.config.channels,
            chunk_count: 0,
        });

        self.set_state(RecordingState::Stopped {
            has_audio: !audio.is_empty(),
        });
        log::info!("Recording stopped after {}s", elapsed_secs);
        Ok(self.outcome.insert(SessionOutcome {
            audio,
            elapsed_secs,
            started_at: session.started_at,
            sources,
        }))
    }

    /// Tear down a running session without producing audio.
    pub fn cancel(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.abort();
            log::info!("Recording cancelled");
        }
        if !self.state.is_idle() {
            self.set_state(RecordingState::Idle);
        }
    }

    /// The finalized audio and elapsed duration, once Stopped.
    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    /// Write the finalized audio to the output directory.
    pub fn save_recording(&self) -> Result<RecordingResult, CaptureError> {
        let outcome = self
            .outcome
            .as_ref()
            .ok_or_else(|| CaptureError::InvalidState("no finished recording".into()))?;
        AudioFileWriter::new(&self.config.output_directory, self.config.bit_depth).write(
            &outcome.audio,
            outcome.elapsed_secs,
            outcome.sources.clone(),
        )
    }

    /// Post-mix levels of the running graph.
    pub fn current_levels(&self) -> AudioLevels {
        match self.session.as_ref().map(|s| &s.source) {
            Some(SessionSource::Graph(graph)) => graph.current_levels(),
            _ => AudioLevels::default(),
        }
    }

    pub fn latest_meter(&self) -> MeterReading {
        self.session
            .as_ref()
            .and_then(|s| s.meter.as_ref())
            .map(|m| m.latest())
            .unwrap_or_default()
    }

    /// The branch currently treated as authoritative.
    pub fn active_branch(&self) -> Option<BranchKind> {
        let session = self.session.as_ref()?;
        if let Some(arbiter) = &session.arbiter {
            return Some(arbiter.state().active_branch);
        }
        session.source.sources().first().copied()
    }

    /// Current gain of a branch in the running graph.
    pub fn gain(&self, kind: BranchKind) -> Option<f32> {
        match &self.session.as_ref()?.source {
            SessionSource::Graph(graph) => graph.gain(kind),
            SessionSource::Direct { .. } => None,
        }
    }

    pub fn is_arbitrating(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.arbiter.is_some())
    }

    // --- Internal helpers ---

    fn set_state(&mut self, state: RecordingState) {
        self.state = state;
        if let Some(ref d) = self.delegate {
            d.on_state_changed(&state);
        }
    }

    fn notify_error(&self, error: &CaptureError) {
        if let Some(ref d) = self.delegate {
            d.on_error(error);
        }
    }

    /// Configured ids win over the inventory's picks. An enumeration failure
    /// is reported and leaves only the configured ids.
    fn select_devices(&self) -> (Option<AudioDevice>, Option<AudioDevice>) {
        let devices = match DeviceInventory::new(&self.host).list_devices() {
            Ok(devices) => devices,
            Err(e) => {
                log::warn!("Device enumeration failed: {}", e);
                self.notify_error(&e);
                Vec::new()
            }
        };
        let picked = DeviceInventory::select_sources(&devices);

        let choose = |configured: &Option<String>, role: DeviceRole, picked: Option<AudioDevice>| {
            configured
                .as_deref()
                .map(|id| DeviceInventory::resolve(&devices, id, role))
                .or(picked)
        };
        (
            choose(&self.config.loopback_device_id, DeviceRole::Loopback, picked.loopback),
            choose(&self.config.mic_device_id, DeviceRole::Microphone, picked.microphone),
        )
    }

    fn build_graph(
        &self,
        loopback: Option<&AudioDevice>,
        microphone: Option<&AudioDevice>,
    ) -> Result<AudioGraphState, CaptureError> {
        AudioGraph::build(&self.host, loopback, microphone, &self.config)
    }

    /// Open the default microphone. It starts with the session.
    fn open_fallback(&self) -> Result<SessionSource, CaptureError> {
        let provider = self
            .host
            .open_stream(None, StreamPreprocessing::voice())
            .map_err(|e| {
                log::error!("Default microphone unavailable: {}", e);
                CaptureError::NoAudioDevice
            })?;

        let stream = MixedStream::new(self.config.sample_rate, self.config.channels);
        Ok(SessionSource::Direct {
            provider: Some(provider),
            stream,
        })
    }
}

impl<H: AudioHost> Drop for RecordingController<H> {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.abort();
        }
    }
}
