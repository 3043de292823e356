//! Session controller
//!
//! Owns the identity of the current session, its lifecycle state, the
//! cancellation token shared by everything the session spawns, and the
//! output context opened for it.
//!
//! ```text
//! idle --start--> loading --first buffer--> playing --stop--> stopping --> idle
//!                    \---------------------stop--------------/
//! ```
//!
//! Every state change goes through `transition`, which validates the edge
//! and broadcasts a `StateChanged` event.

use crate::audio::AudioOutput;
use crate::error::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;
use voxline_common::events::{EventBus, SessionState, VoxEvent};

/// Everything `stop()` needs to tear a session down
pub struct Teardown {
    pub session_id: Uuid,
    pub cancel: CancellationToken,
    pub output: Option<Arc<dyn AudioOutput>>,
}

#[derive(Default)]
struct Slot {
    /// Current session; None once invalidated
    current: Option<Uuid>,
    /// Session the state below belongs to (survives invalidation for events)
    last: Option<Uuid>,
    state: SessionState,
    is_processing: bool,
    cancel: Option<CancellationToken>,
    output: Option<Arc<dyn AudioOutput>>,
}

pub struct SessionController {
    slot: Mutex<Slot>,
    events: EventBus,
}

impl SessionController {
    pub fn new(events: EventBus) -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current(&self) -> Option<Uuid> {
        self.lock().current
    }

    pub fn is_current(&self, session_id: Uuid) -> bool {
        self.lock().current == Some(session_id)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_processing(&self) -> bool {
        self.lock().is_processing
    }

    /// Update the queue-loop flag for `session_id` and broadcast the change.
    ///
    /// Ignored once the session is no longer the one tracked here.
    pub fn set_processing(&self, session_id: Uuid, is_processing: bool) {
        let mut slot = self.lock();
        if slot.last != Some(session_id) || slot.is_processing == is_processing {
            return;
        }
        slot.is_processing = is_processing;
        let state = slot.state;
        drop(slot);

        debug!(session_id = %session_id, "Processing: {}", is_processing);
        self.events.emit_lossy(VoxEvent::ProcessingChanged {
            session_id,
            state,
            is_processing,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Make `session_id` current and enter `loading`.
    ///
    /// The previous session must already have been torn down. `output` is
    /// None when the output context failed to open; the caller then tears
    /// the session straight back down.
    pub fn begin(
        &self,
        session_id: Uuid,
        cancel: CancellationToken,
        output: Option<Arc<dyn AudioOutput>>,
    ) -> Result<()> {
        let mut slot = self.lock();
        if slot.current.is_some() || slot.state != SessionState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot start a session while {}",
                slot.state
            )));
        }

        slot.current = Some(session_id);
        slot.last = Some(session_id);
        slot.is_processing = false;
        slot.cancel = Some(cancel);
        slot.output = output;
        self.transition_locked(&mut slot, session_id, SessionState::Loading)?;

        info!(session_id = %session_id, "Session started");
        Ok(())
    }

    /// Output of `session_id` while it is current
    pub fn output(&self, session_id: Uuid) -> Result<Arc<dyn AudioOutput>> {
        let slot = self.lock();
        if slot.current != Some(session_id) {
            return Err(Error::Cancelled);
        }
        slot.output
            .clone()
            .ok_or_else(|| Error::Device("session has no audio output".to_string()))
    }

    /// Child token of the session's cancellation token
    pub fn cancel_token(&self, session_id: Uuid) -> Result<CancellationToken> {
        let slot = self.lock();
        match (&slot.current, &slot.cancel) {
            (Some(current), Some(cancel)) if *current == session_id => Ok(cancel.child_token()),
            _ => Err(Error::Cancelled),
        }
    }

    /// `loading -> playing` on the first scheduled buffer. No-op afterwards.
    pub fn promote_to_playing(&self, session_id: Uuid) -> Result<()> {
        let mut slot = self.lock();
        if slot.current != Some(session_id) {
            return Err(Error::Cancelled);
        }
        if slot.state != SessionState::Loading {
            return Ok(());
        }
        self.transition_locked(&mut slot, session_id, SessionState::Playing)?;
        info!(session_id = %session_id, "First audio scheduled");
        Ok(())
    }

    /// Enter `stopping` and invalidate the current session in one step.
    ///
    /// With `expected`, only that session is stopped. Returns None when there
    /// is nothing to stop.
    pub fn begin_stop(&self, expected: Option<Uuid>) -> Option<Teardown> {
        let mut slot = self.lock();
        let session_id = slot.current?;
        if expected.is_some_and(|id| id != session_id) {
            return None;
        }

        slot.current = None;
        if let Err(e) = self.transition_locked(&mut slot, session_id, SessionState::Stopping) {
            debug!(session_id = %session_id, "Stop from unexpected state: {}", e);
            slot.state = SessionState::Stopping;
        }

        Some(Teardown {
            session_id,
            cancel: slot.cancel.take().unwrap_or_default(),
            output: slot.output.take(),
        })
    }

    /// `stopping -> idle` once teardown has completed.
    pub fn finish_stop(&self, session_id: Uuid) -> Result<()> {
        let mut slot = self.lock();
        if slot.last != Some(session_id) {
            return Ok(());
        }
        self.transition_locked(&mut slot, session_id, SessionState::Idle)?;
        info!(session_id = %session_id, "Session stopped");
        Ok(())
    }

    /// Validate and apply a state change, broadcasting it.
    pub fn transition(&self, session_id: Uuid, next: SessionState) -> Result<()> {
        let mut slot = self.lock();
        self.transition_locked(&mut slot, session_id, next)
    }

    fn transition_locked(&self, slot: &mut Slot, session_id: Uuid, next: SessionState) -> Result<()> {
        let old_state = slot.state;
        if !old_state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: old_state,
                to: next,
            });
        }
        slot.state = next;

        debug!(session_id = %session_id, "State {} -> {}", old_state, next);
        self.events.emit_lossy(VoxEvent::StateChanged {
            session_id,
            old_state,
            new_state: next,
            is_processing: slot.is_processing,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> SessionController {
        SessionController::new(EventBus::new(16))
    }

    #[test]
    fn test_begin_enters_loading() {
        let sessions = controller();
        let id = Uuid::new_v4();
        sessions.begin(id, CancellationToken::new(), None).unwrap();

        assert_eq!(sessions.state(), SessionState::Loading);
        assert!(sessions.is_current(id));
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let sessions = controller();
        sessions.begin(Uuid::new_v4(), CancellationToken::new(), None).unwrap();
        assert!(sessions.begin(Uuid::new_v4(), CancellationToken::new(), None).is_err());
    }

    #[test]
    fn test_stop_invalidates_before_idle() {
        let sessions = controller();
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        sessions.begin(id, cancel.clone(), None).unwrap();

        let teardown = sessions.begin_stop(None).unwrap();
        assert_eq!(teardown.session_id, id);
        assert!(!sessions.is_current(id));
        assert_eq!(sessions.state(), SessionState::Stopping);
        assert!(matches!(sessions.cancel_token(id), Err(Error::Cancelled)));

        sessions.finish_stop(id).unwrap();
        assert_eq!(sessions.state(), SessionState::Idle);
        assert!(sessions.begin_stop(None).is_none());
    }

    #[test]
    fn test_begin_stop_for_other_session_is_ignored() {
        let sessions = controller();
        let id = Uuid::new_v4();
        sessions.begin(id, CancellationToken::new(), None).unwrap();

        assert!(sessions.begin_stop(Some(Uuid::new_v4())).is_none());
        assert!(sessions.is_current(id));
    }

    #[test]
    fn test_promote_only_from_loading() {
        let sessions = controller();
        let id = Uuid::new_v4();
        sessions.begin(id, CancellationToken::new(), None).unwrap();

        sessions.promote_to_playing(id).unwrap();
        sessions.promote_to_playing(id).unwrap();
        assert_eq!(sessions.state(), SessionState::Playing);
        assert!(sessions.transition(id, SessionState::Loading).is_err());
    }

    #[tokio::test]
    async fn test_transitions_are_broadcast() {
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let sessions = SessionController::new(events);
        let id = Uuid::new_v4();

        sessions.begin(id, CancellationToken::new(), None).unwrap();
        sessions.set_processing(id, true);

        match rx.recv().await.unwrap() {
            VoxEvent::StateChanged { new_state, .. } => assert_eq!(new_state, SessionState::Loading),
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            VoxEvent::ProcessingChanged { is_processing, .. } => assert!(is_processing),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
