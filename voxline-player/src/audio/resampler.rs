//! Audio resampling using rubato
//!
//! Brings file-backed audio to the PCM rate the engine expects from every
//! provider. Live providers already deliver that rate and never pass through
//! here.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Mono resampler using rubato for sample rate conversion.
pub struct Resampler;

impl Resampler {
    /// Resample mono audio from `input_rate` to `output_rate`.
    ///
    /// Returns a copy when the rates already match.
    pub fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
        if input_rate == 0 || output_rate == 0 {
            return Err(Error::Decode(format!(
                "Cannot resample {}Hz -> {}Hz",
                input_rate, output_rate
            )));
        }

        if input_rate == output_rate || input.is_empty() {
            return Ok(input.to_vec());
        }

        debug!("Resampling {} frames from {}Hz to {}Hz", input.len(), input_rate, output_rate);

        let mut resampler = FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            input.len(),
            1,
        )
        .map_err(|e| Error::Decode(format!("Failed to create resampler: {}", e)))?;

        let planar_input = vec![input.to_vec()];
        let mut planar_output = resampler
            .process(&planar_input, None)
            .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;

        let output = planar_output.pop().unwrap_or_default();
        debug!("Resampled to {} frames", output.len());
        Ok(output)
    }

    /// Average interleaved channels down to mono.
    pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
        let channels = channels.max(1) as usize;
        if channels == 1 {
            return interleaved.to_vec();
        }

        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}
