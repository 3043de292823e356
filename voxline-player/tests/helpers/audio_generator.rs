//! PCM payload and WAV fixture generators
//!
//! Provider payloads are mono 16-bit little-endian PCM; the WAV writers
//! produce the multi-channel, differently-sampled files the file provider
//! has to transcode.

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Frequency used by the tone generators
pub const TONE_HZ: f32 = 440.0;

/// Frame count of `seconds` at `sample_rate`
pub fn frames_for(seconds: f64, sample_rate: u32) -> usize {
    (seconds * sample_rate as f64).round() as usize
}

/// Encode i16 samples as little-endian bytes.
pub fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// `seconds` of a 440 Hz tone at half amplitude, as provider PCM.
pub fn tone_pcm(seconds: f64, sample_rate: u32) -> Vec<u8> {
    let frames = frames_for(seconds, sample_rate);
    let amplitude = i16::MAX as f32 * 0.5;
    let samples: Vec<i16> = (0..frames)
        .map(|n| {
            let t = n as f32 / sample_rate as f32;
            ((2.0 * PI * TONE_HZ * t).sin() * amplitude) as i16
        })
        .collect();
    pcm_bytes(&samples)
}

/// `frames` of digital silence, as provider PCM.
pub fn silence_pcm(frames: usize) -> Vec<u8> {
    vec![0u8; frames * 2]
}

/// Deterministic pseudo-random bytes (LCG), for decoder split tests.
pub fn noise_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 56) as u8
        })
        .collect()
}

/// Write a 16-bit sine WAV file.
///
/// # Arguments
/// * `path` - Output file path
/// * `sample_rate` - File sample rate in Hz
/// * `channels` - Channel count; every channel carries the same signal
/// * `duration_ms` - Duration in milliseconds
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;

    let total_frames = (sample_rate as u64 * duration_ms) / 1000;
    let amplitude = i16::MAX as f32 * 0.5;

    for frame_idx in 0..total_frames {
        let t = frame_idx as f32 / sample_rate as f32;
        let sample = ((2.0 * PI * TONE_HZ * t).sin() * amplitude) as i16;
        for _ in 0..channels {
            writer.write_sample(sample)?;
        }
    }

    writer.finalize()?;
    Ok(())
}
