//! Audio output facility
//!
//! - `types`: PCM buffers and the `AudioOutput`/`OutputFactory` seam
//! - `output`: cpal device output
//! - `virtual_output`: clock-driven output for dry runs and tests
//! - `resampler`: rubato rate conversion for file-backed audio

pub mod output;
pub mod resampler;
pub mod types;
pub mod virtual_output;

pub use output::{CpalOutput, CpalOutputFactory};
pub use resampler::Resampler;
pub use types::{AudioOutput, EndedSender, OutputFactory, PcmBuffer, SourceId};
pub use virtual_output::{ScheduledRecord, VirtualOutput, VirtualOutputFactory};
