//! WAV file format utilities.
//!
//! Builds the standard 44-byte RIFF header, encodes finalized captures as
//! integer PCM, and reads the duration back out of a header.

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Generate a 44-byte WAV RIFF header.
///
/// Format: PCM (format code 1), little-endian.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (PCM format chunk size)
/// [20-21]  1 (PCM format code)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * channels * bit_depth / 8
/// [32-33]  block_align = channels * bit_depth / 8
/// [34-35]  bit_depth
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(sample_rate: u32, bit_depth: u16, channels: u16, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let byte_rate = sample_rate * channels as u32 * bit_depth as u32 / 8;
    let block_align = channels * bit_depth / 8;
    let chunk_size = 36 + data_size;

    let mut header = [0u8; WAV_HEADER_SIZE];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bit_depth.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Encode interleaved f32 samples as a complete PCM WAV image.
///
/// `bit_depth` of 24 or 32 writes wider integer PCM; anything else writes 16-bit.
pub fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16, bit_depth: u16) -> Vec<u8> {
    let bit_depth = match bit_depth {
        24 | 32 => bit_depth,
        _ => 16,
    };
    let bytes_per_sample = bit_depth as usize / 8;
    let data_size = samples.len() * bytes_per_sample;

    let mut out = Vec::with_capacity(WAV_HEADER_SIZE + data_size);
    out.extend_from_slice(&generate_wav_header(sample_rate, bit_depth, channels, data_size as u32));

    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0) as f64;
        match bit_depth {
            24 => {
                let v = (clamped * 8_388_607.0) as i32;
                out.extend_from_slice(&v.to_le_bytes()[0..3]);
            }
            32 => {
                let v = (clamped * i32::MAX as f64) as i32;
                out.extend_from_slice(&v.to_le_bytes());
            }
            _ => {
                let v = (clamped * i16::MAX as f64) as i16;
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
    out
}

/// Duration in seconds described by a WAV header, if it is a PCM RIFF header.
pub fn header_duration_secs(header: &[u8]) -> Option<f64> {
    if header.len() < WAV_HEADER_SIZE || &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return None;
    }
    let byte_rate = u32::from_le_bytes([header[28], header[29], header[30], header[31]]);
    let data_size = u32::from_le_bytes([header[40], header[41], header[42], header[43]]);
    if byte_rate == 0 {
        return None;
    }
    Some(data_size as f64 / byte_rate as f64)
}

/// Downmix interleaved multi-channel audio to mono by averaging channels per frame.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let scale = 1.0 / channels as f32;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}
