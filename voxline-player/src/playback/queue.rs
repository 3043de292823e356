//! Segment queue
//!
//! FIFO of segments awaiting generation. Segments generate strictly one at a
//! time and in enqueue order; the queue records which segment is in flight
//! and which session currently owns the processing loop.
//!
//! Lock order: queue, then session slot, then completion signal. Both `push`
//! and `try_finish` update the processing flag and the completion signal
//! while holding the queue lock, so a segment queued during a drain either
//! lands in the running loop or starts a new one, never neither.

use crate::error::{Error, Result};
use crate::playback::completion::{Completion, CompletionSignal};
use crate::provider::StreamFactory;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// A queued segment, tagged with the session that was current at enqueue time
pub struct QueueItem {
    pub segment_id: Uuid,
    pub session_id: Uuid,
    pub factory: StreamFactory,
}

impl std::fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueItem")
            .field("segment_id", &self.segment_id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// What the processing loop should do next
#[derive(Debug)]
pub enum Step {
    /// Begin generating this segment
    Start(QueueItem),
    /// A segment is still generating
    Busy,
    /// Nothing queued and nothing generating
    Idle,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    /// (session, segment) currently generating
    in_flight: Option<(Uuid, Uuid)>,
    /// Session whose processing loop is running
    loop_owner: Option<Uuid>,
}

#[derive(Debug, Default)]
pub struct SegmentQueue {
    state: Mutex<QueueState>,
}

impl SegmentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `item` and arm the completion signal.
    ///
    /// `is_current` is checked under the queue lock; an item whose session
    /// was superseded after the caller looked it up is rejected with
    /// `Error::NoActiveSession` and never touches loop ownership.
    ///
    /// Returns true when no loop runs for the item's session and the caller
    /// must start one. `on_start` runs under the queue lock in that case.
    pub fn push<P, F>(
        &self,
        item: QueueItem,
        completion: &CompletionSignal,
        is_current: P,
        on_start: F,
    ) -> Result<bool>
    where
        P: FnOnce(Uuid) -> bool,
        F: FnOnce(),
    {
        let mut state = self.lock();
        let session_id = item.session_id;
        if !is_current(session_id) {
            return Err(Error::NoActiveSession);
        }

        completion.arm(session_id);
        state.items.push_back(item);

        if state.loop_owner == Some(session_id) {
            return Ok(false);
        }
        state.loop_owner = Some(session_id);
        on_start();
        Ok(true)
    }

    /// Decide the loop's next step for `session_id`.
    ///
    /// Heads from other sessions are dead and are dropped here.
    pub fn next_step(&self, session_id: Uuid) -> Step {
        let mut state = self.lock();

        while let Some(head) = state.items.front() {
            if head.session_id == session_id {
                break;
            }
            state.items.pop_front();
        }

        if state.in_flight.is_some() {
            return Step::Busy;
        }

        match state.items.pop_front() {
            Some(item) => {
                state.in_flight = Some((session_id, item.segment_id));
                Step::Start(item)
            }
            None => Step::Idle,
        }
    }

    /// Mark `segment_id` as no longer generating.
    pub fn finish_generation(&self, segment_id: Uuid) {
        let mut state = self.lock();
        if matches!(state.in_flight, Some((_, id)) if id == segment_id) {
            state.in_flight = None;
        }
    }

    /// End the loop for `session_id` if the queue is still drained.
    ///
    /// Releases loop ownership, runs `on_finish` and resolves the completion
    /// signal as `Drained`, all under the queue lock. Returns false when new
    /// work arrived and the loop must keep going.
    pub fn try_finish<F>(&self, session_id: Uuid, completion: &CompletionSignal, on_finish: F) -> bool
    where
        F: FnOnce(),
    {
        let mut state = self.lock();
        let drained = state.in_flight.is_none()
            && !state.items.iter().any(|item| item.session_id == session_id);
        if !drained {
            return false;
        }

        if state.loop_owner == Some(session_id) {
            state.loop_owner = None;
        }
        on_finish();
        completion.resolve(Some(session_id), Completion::Drained);
        true
    }

    /// Release loop ownership without resolving completion.
    ///
    /// Used when the loop exits because its session is gone.
    pub fn abandon(&self, session_id: Uuid) {
        let mut state = self.lock();
        if state.loop_owner == Some(session_id) {
            state.loop_owner = None;
        }
        state.items.retain(|item| item.session_id != session_id);
        if matches!(state.in_flight, Some((sid, _)) if sid == session_id) {
            state.in_flight = None;
        }
    }

    /// Drop everything. Returns the number of discarded items.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let discarded = state.items.len();
        state.items.clear();
        state.in_flight = None;
        state.loop_owner = None;
        discarded
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn in_flight(&self) -> Option<Uuid> {
        self.lock().in_flight.map(|(_, segment)| segment)
    }
}
