use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::models::error::CaptureError;
use crate::processing::ring_buffer::RingBuffer;
use crate::processing::wav_format;

const MIN_FFT_SIZE: usize = 32;
const MAX_FFT_SIZE: usize = 32768;

/// Frequency-domain loudness analyser.
///
/// Behaves like a browser analyser node: Blackman-windowed FFT over the
/// newest `fft_size` samples, magnitudes smoothed over time and mapped from
/// the `[min_decibels, max_decibels]` range onto bytes 0–255. Thresholds in
/// this crate (silence at 5, meter activity at 10) are on that byte scale.
pub struct Analyser {
    fft_size: usize,
    window: Vec<f32>,
    history: RingBuffer,
    smoothed: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Analyser {
    /// Fails for FFT sizes that are not a power of two in 32..=32768.
    pub fn new(fft_size: usize) -> Result<Self, CaptureError> {
        if !fft_size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size) {
            return Err(CaptureError::ConfigurationFailed(format!(
                "invalid analyser fft size: {}",
                fft_size
            )));
        }

        // Blackman window, alpha = 0.16
        let alpha = 0.16f32;
        let a0 = (1.0 - alpha) / 2.0;
        let a1 = 0.5;
        let a2 = alpha / 2.0;
        let window = (0..fft_size)
            .map(|i| {
                let phase = 2.0 * PI * i as f32 / fft_size as f32;
                a0 - a1 * phase.cos() + a2 * (2.0 * phase).cos()
            })
            .collect();

        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        Ok(Self {
            fft_size,
            window,
            history: RingBuffer::new(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            fft,
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Feed interleaved samples; multi-channel input is downmixed first.
    pub fn push(&mut self, samples: &[f32], channels: u16) {
        if channels > 1 {
            self.history.write(&wav_format::downmix_to_mono(samples, channels as usize));
        } else {
            self.history.write(samples);
        }
    }

    /// Current spectrum as bytes, advancing the smoothing state.
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        let input = self.history.peek_latest(self.fft_size);
        for (slot, (sample, w)) in self.scratch.iter_mut().zip(input.iter().zip(&self.window)) {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let tau = self.smoothing_time_constant;
        let range = self.max_decibels - self.min_decibels;
        let n = self.fft_size as f32;

        self.smoothed
            .iter_mut()
            .zip(&self.scratch)
            .map(|(previous, bin)| {
                let magnitude = bin.norm() / n;
                *previous = tau * *previous + (1.0 - tau) * magnitude;
                if *previous <= 0.0 {
                    return 0;
                }
                let db = 20.0 * previous.log10();
                let scaled = 255.0 * (db - self.min_decibels) / range;
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Mean of the byte spectrum. This is the loudness figure used for
    /// switching and metering.
    pub fn average_magnitude(&mut self) -> f32 {
        let data = self.byte_frequency_data();
        if data.is_empty() {
            return 0.0;
        }
        data.iter().map(|&b| b as f32).sum::<f32>() / data.len() as f32
    }

    /// Forget buffered audio and smoothing history.
    pub fn reset(&mut self) {
        self.history.reset();
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
    }
}

impl std::fmt::Debug for Analyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyser")
            .field("fft_size", &self.fft_size)
            .field("buffered", &self.history.count())
            .field("smoothing_time_constant", &self.smoothing_time_constant)
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn noise(len: usize, amplitude: f32, seed: u32) -> Vec<f32> {
    let mut state = seed.max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state as f32 / u32::MAX as f32 * 2.0 - 1.0) * amplitude
        })
        .collect()
}
