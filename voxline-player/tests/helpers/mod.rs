//! Test helpers for voxline-player integration tests
//!
//! - `audio_generator`: PCM payloads and WAV fixtures
//! - `stream_builder`: scripted provider streams (paced, failing, hanging)
//!
//! Engines built here use `VirtualOutputFactory`, so every test runs against
//! the tokio clock. Pair them with `#[tokio::test(start_paused = true)]`.

#![allow(dead_code)]

pub mod audio_generator;
pub mod stream_builder;

pub use audio_generator::*;
pub use stream_builder::*;

use std::sync::Arc;
use tokio::sync::broadcast;
use voxline_common::events::VoxEvent;
use voxline_player::audio::{ScheduledRecord, VirtualOutput, VirtualOutputFactory};
use voxline_player::{EngineConfig, PlaybackEngine};

/// Provider rate used throughout the tests (matches the engine default)
pub const TEST_SAMPLE_RATE: u32 = 24_000;

/// Engine on a virtual output with default settings
pub fn test_engine() -> (PlaybackEngine, Arc<VirtualOutputFactory>) {
    test_engine_with(EngineConfig::default())
}

/// Engine on a virtual output with custom settings
pub fn test_engine_with(config: EngineConfig) -> (PlaybackEngine, Arc<VirtualOutputFactory>) {
    let factory = Arc::new(VirtualOutputFactory::new());
    let engine = PlaybackEngine::new(config, factory.clone()).expect("valid test config");
    (engine, factory)
}

/// Output opened for the most recent session
pub fn current_output(factory: &VirtualOutputFactory) -> Arc<VirtualOutput> {
    factory.last_output().expect("no output opened yet")
}

/// Every event already buffered in `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<VoxEvent>) -> Vec<VoxEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

/// Total frames across `records`
pub fn total_frames(records: &[ScheduledRecord]) -> usize {
    records.iter().map(|r| r.frames).sum()
}

/// Panic unless each record starts exactly where the previous one ended.
pub fn assert_gapless(records: &[ScheduledRecord]) {
    for pair in records.windows(2) {
        let gap = pair[1].start - pair[0].end;
        assert!(
            gap.abs() < 1e-9,
            "{} starts {:.9}s after {} ends",
            pair[1].id,
            gap,
            pair[0].id
        );
    }
}
