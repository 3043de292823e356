//! Core audio data types and the output facility seam
//!
//! The engine never talks to a device directly. It talks to an `AudioOutput`:
//! a monotonic clock plus the ability to schedule a buffer at an exact future
//! time, hard-stop it, and learn when it ended naturally.

use crate::error::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifier of a scheduled buffer, unique within one opened output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// Channel on which an output reports buffers that finished playing.
pub type EndedSender = mpsc::UnboundedSender<SourceId>;

/// Mono PCM samples ready for scheduling.
///
/// **Format:**
/// - Samples are f32 in [-1.0, 1.0]
/// - Single channel
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of sample frames
    pub fn frames(&self) -> usize {
        self.samples.len()
    }

    /// Playback duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// An opened audio output context.
///
/// Implementations must be callable from any thread; the engine shares one
/// instance between the queue loop, segment tasks and teardown.
pub trait AudioOutput: Send + Sync {
    /// Monotonic output clock in seconds since the output was opened.
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to start exactly at `start_time` on the output clock.
    ///
    /// # Errors
    /// `Error::Device` if the output has been closed or lost.
    fn schedule(&self, buffer: PcmBuffer, start_time: f64) -> Result<SourceId>;

    /// Stop a scheduled buffer immediately. Unknown ids are ignored.
    ///
    /// A stopped buffer never reports a natural end.
    fn stop_source(&self, id: SourceId);

    /// Release the output. Every scheduled buffer is silenced.
    fn close(&self);

    /// Whether the output was closed or lost.
    fn is_closed(&self) -> bool;
}

/// Opens output contexts, one per session.
pub trait OutputFactory: Send + Sync {
    /// Open a fresh output that reports natural buffer ends on `ended`.
    ///
    /// # Errors
    /// `Error::Device` if no usable output could be initialized.
    fn open(&self, ended: EndedSender) -> Result<Arc<dyn AudioOutput>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_buffer_duration() {
        let buffer = PcmBuffer::new(vec![0.0; 24_000 * 3], 24_000);
        assert_eq!(buffer.frames(), 72_000);
        assert!((buffer.duration() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_pcm_buffer_zero_rate() {
        let buffer = PcmBuffer::new(vec![0.5; 10], 0);
        assert_eq!(buffer.duration(), 0.0);
    }

    #[test]
    fn test_source_id_display() {
        assert_eq!(SourceId(7).to_string(), "src-7");
    }
}
