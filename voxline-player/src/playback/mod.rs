//! Streaming playback engine
//!
//! - `session`: current session identity, lifecycle state machine
//! - `queue`: serial segment queue
//! - `decoder`: incremental 16-bit PCM decoding of provider streams
//! - `scheduler`: gapless placement of decoded buffers on the output clock
//! - `completion`: shared drain signal
//! - `engine`: the caller-facing `PlaybackEngine`

pub mod completion;
pub mod decoder;
pub mod engine;
pub mod queue;
pub mod scheduler;
pub mod session;

pub use completion::Completion;
pub use decoder::StreamDecoder;
pub use engine::{EngineStatus, PlaybackEngine, SegmentId, SessionId, StateSnapshot};
pub use queue::SegmentQueue;
pub use scheduler::{ActiveSource, AudioScheduler, ScheduledBuffer};
pub use session::SessionController;
