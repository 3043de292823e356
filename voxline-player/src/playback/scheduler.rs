//! Gapless buffer scheduling
//!
//! Every decoded batch starts exactly where the previous one ends on the
//! output clock: `start = max(now + lead, scheduled_end)`. Chunks that arrive
//! separately from the network therefore play back as one continuous signal.
//!
//! The scheduler owns the session's timeline watermark and the list of
//! active sources. Only `reset` (called from session teardown) clears them
//! outside the normal scheduling path.

use crate::audio::{AudioOutput, PcmBuffer, SourceId};
use crate::error::{Error, Result};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// A scheduled or playing buffer
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSource {
    pub id: SourceId,
    pub session_id: Uuid,
    pub start_time: f64,
    pub end_time: f64,
    pub stopped: bool,
}

/// Placement of one scheduled buffer on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: SourceId,
    pub start_time: f64,
    pub end_time: f64,
    pub frames: usize,
}

#[derive(Debug, Default)]
struct Timeline {
    session: Option<Uuid>,
    scheduled_end: f64,
    active: Vec<ActiveSource>,
}

/// Session-scoped playback timeline
#[derive(Debug)]
pub struct AudioScheduler {
    lead: f64,
    timeline: Mutex<Timeline>,
}

impl AudioScheduler {
    /// `lead` is the ε (seconds) added to the clock when nothing is queued ahead.
    pub fn new(lead: f64) -> Self {
        Self {
            lead: lead.max(0.0),
            timeline: Mutex::new(Timeline::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Timeline> {
        self.timeline.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind the timeline to a fresh session.
    pub fn begin(&self, session_id: Uuid) {
        let mut timeline = self.lock();
        timeline.session = Some(session_id);
        timeline.scheduled_end = 0.0;
        timeline.active.clear();
    }

    /// Schedule `buffer` back-to-back with everything before it.
    ///
    /// The session check and the watermark update happen under one lock, so
    /// a buffer from a session that `reset` has already cleared is never
    /// placed on the output.
    pub fn schedule(
        &self,
        session_id: Uuid,
        output: &dyn AudioOutput,
        buffer: PcmBuffer,
    ) -> Result<ScheduledBuffer> {
        let mut timeline = self.lock();
        if timeline.session != Some(session_id) {
            return Err(Error::Cancelled);
        }

        let frames = buffer.frames();
        let duration = buffer.duration();
        let start_time = (output.current_time() + self.lead).max(timeline.scheduled_end);
        let end_time = start_time + duration;

        let id = output.schedule(buffer, start_time)?;

        timeline.scheduled_end = timeline.scheduled_end.max(end_time);
        timeline.active.push(ActiveSource {
            id,
            session_id,
            start_time,
            end_time,
            stopped: false,
        });

        debug!(
            session_id = %session_id,
            "Scheduled {} ({} frames) at {:.4}s..{:.4}s",
            id,
            frames,
            start_time,
            end_time
        );

        Ok(ScheduledBuffer {
            id,
            start_time,
            end_time,
            frames,
        })
    }

    /// Natural end of playback for `id`. Ids from other sessions are ignored.
    pub fn source_ended(&self, session_id: Uuid, id: SourceId) {
        let mut timeline = self.lock();
        if timeline.session != Some(session_id) {
            return;
        }
        timeline.active.retain(|source| source.id != id);
    }

    /// Hard-stop every active source and rewind the watermark to 0.
    ///
    /// The timeline is unbound from its session, so any later `schedule`
    /// call from that session fails with `Error::Cancelled`.
    pub fn reset(&self, output: Option<&dyn AudioOutput>) {
        let mut timeline = self.lock();
        let stopped = timeline.active.len();

        for source in timeline.active.iter_mut() {
            source.stopped = true;
            if let Some(output) = output {
                output.stop_source(source.id);
            }
        }

        timeline.active.clear();
        timeline.scheduled_end = 0.0;
        timeline.session = None;

        if stopped > 0 {
            debug!("Stopped {} active sources", stopped);
        }
    }

    /// Seconds until the last scheduled buffer finishes, as seen at `now`.
    pub fn remaining(&self, session_id: Uuid, now: f64) -> f64 {
        let timeline = self.lock();
        if timeline.session != Some(session_id) {
            return 0.0;
        }
        (timeline.scheduled_end - now).max(0.0)
    }

    pub fn scheduled_end_time(&self) -> f64 {
        self.lock().scheduled_end
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    pub fn active_sources(&self) -> Vec<ActiveSource> {
        self.lock().active.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::VirtualOutput;
    use tokio::sync::mpsc;

    fn buffer(seconds: f64) -> PcmBuffer {
        PcmBuffer::new(vec![0.0; (seconds * 1000.0) as usize], 1000)
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffers_are_back_to_back() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let output = VirtualOutput::new(tx);
        let scheduler = AudioScheduler::new(0.01);
        let session = Uuid::new_v4();
        scheduler.begin(session);

        let a = scheduler.schedule(session, &output, buffer(0.5)).unwrap();
        let b = scheduler.schedule(session, &output, buffer(0.25)).unwrap();

        assert!((a.start_time - 0.01).abs() < 1e-9);
        assert!((b.start_time - a.end_time).abs() < 1e-9);
        assert!((scheduler.scheduled_end_time() - 0.76).abs() < 1e-9);
        assert_eq!(scheduler.active_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_buffer_starts_after_clock() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let output = VirtualOutput::new(tx);
        let scheduler = AudioScheduler::new(0.01);
        let session = Uuid::new_v4();
        scheduler.begin(session);

        scheduler.schedule(session, &output, buffer(0.1)).unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        let late = scheduler.schedule(session, &output, buffer(0.1)).unwrap();

        assert!(late.start_time >= 1.0);
    }

    #[tokio::test]
    async fn test_stale_session_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let output = VirtualOutput::new(tx);
        let scheduler = AudioScheduler::new(0.01);
        scheduler.begin(Uuid::new_v4());

        let result = scheduler.schedule(Uuid::new_v4(), &output, buffer(0.1));
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(output.records().is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_and_unbinds() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let output = VirtualOutput::new(tx);
        let scheduler = AudioScheduler::new(0.01);
        let session = Uuid::new_v4();
        scheduler.begin(session);
        scheduler.schedule(session, &output, buffer(1.0)).unwrap();

        scheduler.reset(Some(&output));

        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.scheduled_end_time(), 0.0);
        assert!(output.records()[0].stopped_at.is_some());
        assert!(matches!(
            scheduler.schedule(session, &output, buffer(0.1)),
            Err(Error::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_source_ended_removes_entry() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let output = VirtualOutput::new(tx);
        let scheduler = AudioScheduler::new(0.0);
        let session = Uuid::new_v4();
        scheduler.begin(session);
        let scheduled = scheduler.schedule(session, &output, buffer(0.1)).unwrap();

        scheduler.source_ended(Uuid::new_v4(), scheduled.id);
        assert_eq!(scheduler.active_count(), 1);

        scheduler.source_ended(session, scheduled.id);
        assert_eq!(scheduler.active_count(), 0);
    }
}
