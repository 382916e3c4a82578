use std::path::PathBuf;
use std::time::Duration;

/// Timing and threshold constants for the loopback/microphone arbiter.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbiterConfig {
    /// Interval between loudness evaluations (default: 200 ms).
    pub tick_interval: Duration,

    /// Average byte-scale magnitude below which the loopback counts as silent (default: 5.0).
    pub silence_threshold: f32,

    /// Silence streak after which the microphone is pre-warmed (default: 200 ms).
    pub prewarm_after: Duration,

    /// Silence streak after which the microphone takes over (default: 400 ms).
    pub switch_after: Duration,

    /// Microphone gain floor applied by the pre-warm step (default: 0.3).
    pub prewarm_gain: f32,

    /// Length of the linear gain crossfade (default: 1 s).
    pub crossfade: Duration,

    /// FFT size of the loopback loudness analyser (default: 256).
    pub fft_size: usize,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(200),
            silence_threshold: 5.0,
            prewarm_after: Duration::from_millis(200),
            switch_after: Duration::from_millis(400),
            prewarm_gain: 0.3,
            crossfade: Duration::from_secs(1),
            fft_size: 256,
        }
    }
}

/// Configuration for a recording session.
#[derive(Debug, Clone)]
pub struct CaptureConfiguration {
    /// Processing-context sample rate in Hz (default: 48000).
    pub sample_rate: f64,

    /// Channels of the mixed stream (default: 2).
    pub channels: u16,

    /// Bit depth of saved PCM (default: 16). Valid values: 16, 24, 32.
    pub bit_depth: u16,

    /// Where finalized recordings are written.
    pub output_directory: PathBuf,

    /// Loopback device to use instead of the one the inventory picks.
    pub loopback_device_id: Option<String>,

    /// Microphone device to use instead of the one the inventory picks.
    pub mic_device_id: Option<String>,

    /// Recorder chunk boundary (default: 1 s).
    pub chunk_duration: Duration,

    /// Shortest recording `end()` accepts, in elapsed seconds (default: 5).
    pub min_duration_secs: u64,

    /// Graph render quantum interval (default: 20 ms).
    pub render_interval: Duration,

    /// Volume meter frame interval (default: 16 ms).
    pub meter_interval: Duration,

    /// Seconds of headroom in each branch ring buffer (default: 5).
    pub buffer_secs: f64,

    pub arbiter: ArbiterConfig,
}

impl CaptureConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate <= 0.0 {
            return Err("sample rate must be positive".into());
        }
        if ![16, 24, 32].contains(&self.bit_depth) {
            return Err(format!("unsupported bit depth: {}", self.bit_depth));
        }
        if ![1, 2].contains(&self.channels) {
            return Err(format!("unsupported channel count: {}", self.channels));
        }
        if self.chunk_duration.is_zero() || self.render_interval.is_zero() || self.meter_interval.is_zero() {
            return Err("intervals must be non-zero".into());
        }
        if self.buffer_secs <= 0.0 {
            return Err("buffer headroom must be positive".into());
        }

        let arbiter = &self.arbiter;
        if arbiter.tick_interval.is_zero() {
            return Err("arbiter tick interval must be non-zero".into());
        }
        if arbiter.switch_after < arbiter.prewarm_after {
            return Err("switch hold time must not be shorter than the pre-warm hold time".into());
        }
        if !(arbiter.prewarm_gain > 0.0 && arbiter.prewarm_gain < 1.0) {
            return Err(format!("pre-warm gain out of range: {}", arbiter.prewarm_gain));
        }
        Ok(())
    }

    /// Interleaved samples in one recorder chunk.
    pub fn chunk_samples(&self) -> usize {
        (self.sample_rate * self.chunk_duration.as_secs_f64()) as usize * self.channels as usize
    }
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            channels: 2,
            bit_depth: 16,
            output_directory: std::env::temp_dir().join("voice-card"),
            loopback_device_id: None,
            mic_device_id: None,
            chunk_duration: Duration::from_secs(1),
            min_duration_secs: 5,
            render_interval: Duration::from_millis(20),
            meter_interval: Duration::from_millis(16),
            buffer_secs: 5.0,
            arbiter: ArbiterConfig::default(),
        }
    }
}
