//! Headless audio output driven by the tokio clock
//!
//! `VirtualOutput` behaves like a device that plays every buffer exactly on
//! time: its clock is `tokio::time::Instant` elapsed since open, and a timer
//! per buffer reports the natural end. Under a paused tokio clock the whole
//! timeline is deterministic, which makes it the output for `--dry-run` and
//! for timeline tests.

use crate::audio::types::{AudioOutput, EndedSender, OutputFactory, PcmBuffer, SourceId};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use voxline_common::time::secs_to_duration;

/// One buffer as seen by the virtual device
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledRecord {
    pub id: SourceId,
    pub start: f64,
    pub end: f64,
    pub frames: usize,
    /// Clock time at which the buffer was hard-stopped
    pub stopped_at: Option<f64>,
}

impl ScheduledRecord {
    /// Whether any part of the buffer was (or will be) audible after `time`.
    pub fn audible_after(&self, time: f64) -> bool {
        let cut = self.stopped_at.unwrap_or(f64::INFINITY).min(self.end);
        cut > time && self.start < cut
    }
}

struct VirtualState {
    records: Vec<ScheduledRecord>,
    timers: HashMap<SourceId, JoinHandle<()>>,
}

/// Deterministic output for tests and dry runs
pub struct VirtualOutput {
    origin: Instant,
    next_id: AtomicU64,
    closed: AtomicBool,
    ended_tx: EndedSender,
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualOutput {
    pub fn new(ended_tx: EndedSender) -> Self {
        Self {
            origin: Instant::now(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            ended_tx,
            state: Arc::new(Mutex::new(VirtualState {
                records: Vec::new(),
                timers: HashMap::new(),
            })),
        }
    }

    /// Every buffer scheduled so far, in scheduling order
    pub fn records(&self) -> Vec<ScheduledRecord> {
        self.lock().records.clone()
    }

    /// Buffers neither stopped nor finished at the current clock time
    pub fn playing_count(&self) -> usize {
        let now = self.current_time();
        self.lock()
            .records
            .iter()
            .filter(|r| r.stopped_at.is_none() && r.end > now)
            .count()
    }

    /// Timers for buffers that have neither ended nor been stopped
    pub fn pending_timers(&self) -> usize {
        self.lock().timers.len()
    }

    fn lock(&self) -> MutexGuard<'_, VirtualState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<VirtualState>) -> MutexGuard<'_, VirtualState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl AudioOutput for VirtualOutput {
    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn schedule(&self, buffer: PcmBuffer, start_time: f64) -> Result<SourceId> {
        if self.is_closed() {
            return Err(Error::Device("virtual output is closed".to_string()));
        }

        let id = SourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let end = start_time + buffer.duration();
        let deadline = self.origin + secs_to_duration(end);
        let ended_tx = self.ended_tx.clone();
        let timer_state = Arc::clone(&self.state);

        // Held across the spawn so the timer cannot remove itself before it is inserted
        let mut state = self.lock();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            lock_state(&timer_state).timers.remove(&id);
            let _ = ended_tx.send(id);
        });

        state.records.push(ScheduledRecord {
            id,
            start: start_time,
            end,
            frames: buffer.frames(),
            stopped_at: None,
        });
        state.timers.insert(id, timer);

        debug!("Virtual output scheduled {} at {:.4}s..{:.4}s", id, start_time, end);
        Ok(id)
    }

    fn stop_source(&self, id: SourceId) {
        let now = self.current_time();
        let mut state = self.lock();
        if let Some(timer) = state.timers.remove(&id) {
            timer.abort();
        }
        if let Some(record) = state.records.iter_mut().find(|r| r.id == id) {
            if record.stopped_at.is_none() && record.end > now {
                record.stopped_at = Some(now);
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let now = self.current_time();
        let mut state = self.lock();
        for (_, timer) in state.timers.drain() {
            timer.abort();
        }
        for record in state.records.iter_mut() {
            if record.stopped_at.is_none() && record.end > now {
                record.stopped_at = Some(now);
            }
        }
        debug!("Virtual output closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Factory for `VirtualOutput`, remembering every output it opened.
#[derive(Default)]
pub struct VirtualOutputFactory {
    fail_next_open: AtomicBool,
    opened: Mutex<Vec<Arc<VirtualOutput>>>,
}

impl VirtualOutputFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail with a device error.
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Most recently opened output
    pub fn last_output(&self) -> Option<Arc<VirtualOutput>> {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl OutputFactory for VirtualOutputFactory {
    fn open(&self, ended: EndedSender) -> Result<Arc<dyn AudioOutput>> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(Error::Device("simulated output failure".to_string()));
        }

        let output = Arc::new(VirtualOutput::new(ended));
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&output));
        Ok(output)
    }
}
