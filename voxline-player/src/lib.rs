//! # Voxline Player Library (voxline-player)
//!
//! Streaming speech playback engine.
//!
//! **Purpose:** Accept text segments, pull raw PCM from a speech provider as
//! it is generated, decode it incrementally and schedule it gaplessly on an
//! audio output, with mid-stream cancellation and completion signaling.
//!
//! **Architecture:** session-scoped `PlaybackEngine` over a pluggable
//! `AudioOutput` (cpal device or virtual clock) and `SpeechProvider`s.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod provider;
pub mod text;

pub use config::{BootstrapConfig, EngineConfig};
pub use error::{Error, Result, TransportError};
pub use playback::{Completion, EngineStatus, PlaybackEngine, SegmentId, SessionId, StateSnapshot};
pub use provider::{ByteStream, SpeechProvider, StreamFactory};
pub use text::TextChunker;
