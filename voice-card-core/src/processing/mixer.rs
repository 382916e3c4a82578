use std::borrow::Cow;

use crate::processing::wav_format;

/// Pure-math branch mixer for the audio graph.
///
/// All operations work on interleaved `&[f32]` buffers in the graph's
/// output format (`target_sample_rate`, `channels`).
#[derive(Debug, Clone)]
pub struct BranchMixer {
    pub target_sample_rate: f64,
    pub channels: u16,
}

impl BranchMixer {
    pub fn new(target_sample_rate: f64, channels: u16) -> Self {
        Self {
            target_sample_rate,
            channels: channels.max(1),
        }
    }

    /// Format converter for one provider stream. Keep one per stream.
    pub fn conformer(&self) -> StreamConformer {
        StreamConformer {
            channels: self.channels,
            resampler: StreamResampler::new(self.target_sample_rate, self.channels),
        }
    }

    /// Sum branch buffers with a per-frame gain for each.
    ///
    /// `branches` pairs an interleaved buffer with a function mapping a frame
    /// index to that frame's gain. Shorter buffers are treated as silence past
    /// their end.
    pub fn mix_gained<F>(&self, branches: &mut [(&[f32], F)], frame_count: usize) -> Vec<f32>
    where
        F: FnMut(usize) -> f32,
    {
        let channels = self.channels as usize;
        let mut mixed = vec![0.0f32; frame_count * channels];
        for (samples, gain_at) in branches.iter_mut() {
            for frame in 0..frame_count {
                let base = frame * channels;
                if base >= samples.len() {
                    break;
                }
                let gain = gain_at(frame);
                if gain == 0.0 {
                    continue;
                }
                for ch in 0..channels {
                    if let Some(&s) = samples.get(base + ch) {
                        mixed[base + ch] += s * gain;
                    }
                }
            }
        }
        mixed
    }

    /// RMS level of samples (0.0–1.0 range for normalized audio).
    pub fn rms_level(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    /// Peak absolute level of samples.
    pub fn peak_level(samples: &[f32]) -> f32 {
        samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
    }
}

/// Brings one provider's packets into the graph format.
///
/// Matching channel layouts pass through; anything else is downmixed to
/// mono and copied to every output channel. Resampling state carries over
/// between packets.
#[derive(Debug, Clone)]
pub struct StreamConformer {
    channels: u16,
    resampler: StreamResampler,
}

impl StreamConformer {
    pub fn conform(&mut self, samples: &[f32], source_rate: f64, source_channels: u16) -> Vec<f32> {
        let source_channels = source_channels.max(1);
        let laid_out: Cow<'_, [f32]> = if source_channels == self.channels {
            Cow::Borrowed(samples)
        } else {
            let mono = wav_format::downmix_to_mono(samples, source_channels as usize);
            if self.channels == 1 {
                Cow::Owned(mono)
            } else {
                Cow::Owned(
                    mono.iter()
                        .flat_map(|&s| std::iter::repeat(s).take(self.channels as usize))
                        .collect(),
                )
            }
        };
        self.resampler.process(&laid_out, source_rate)
    }
}

/// Linear-interpolation resampler for a continuous interleaved stream.
///
/// The fractional read position and the last input frame carry over from
/// one packet to the next.
#[derive(Debug, Clone)]
pub struct StreamResampler {
    target_rate: f64,
    channels: usize,
    source_rate: Option<f64>,
    /// Read position in source frames, relative to the next packet's first
    /// frame. Negative positions interpolate from `previous`.
    position: f64,
    previous: Vec<f32>,
}

impl StreamResampler {
    pub fn new(target_rate: f64, channels: u16) -> Self {
        Self {
            target_rate,
            channels: channels.max(1) as usize,
            source_rate: None,
            position: 0.0,
            previous: Vec::new(),
        }
    }

    /// Resample one packet. A change of source rate restarts the stream.
    pub fn process(&mut self, samples: &[f32], source_rate: f64) -> Vec<f32> {
        let channels = self.channels;
        let frames = samples.len() / channels;
        if frames == 0 || source_rate <= 0.0 {
            return Vec::new();
        }
        let samples = &samples[..frames * channels];

        if self.source_rate.map_or(true, |rate| (rate - source_rate).abs() >= 0.01) {
            self.source_rate = Some(source_rate);
            self.position = 0.0;
            self.previous.clear();
        }
        if (source_rate - self.target_rate).abs() < 0.01 {
            return samples.to_vec();
        }

        let step = source_rate / self.target_rate;
        let last = (frames - 1) as f64;
        let previous = std::mem::take(&mut self.previous);
        let sample_at = |frame: isize, ch: usize| -> f32 {
            if frame < 0 {
                previous.get(ch).copied().unwrap_or(0.0)
            } else {
                samples[frame as usize * channels + ch]
            }
        };

        let mut output = Vec::with_capacity((frames as f64 / step) as usize * channels + channels);
        while self.position < last {
            let index = self.position.floor();
            let fraction = (self.position - index) as f32;
            let frame = index as isize;
            for ch in 0..channels {
                let a = sample_at(frame, ch);
                let b = sample_at(frame + 1, ch);
                output.push(a + (b - a) * fraction);
            }
            self.position += step;
        }

        self.position -= frames as f64;
        self.previous = samples[(frames - 1) * channels..].to_vec();
        output
    }
}
