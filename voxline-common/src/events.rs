//! Event types and EventBus
//!
//! Provides the shared event definitions broadcast by the playback engine and
//! the `EventBus` that distributes them.
//!
//! # Architecture
//!
//! - **EventBus** (tokio::broadcast): one-to-many event broadcasting
//! - **Shared state** (`Mutex<T>` inside the engine): synchronous teardown
//!
//! Observers (UI reflection, logging, tests) subscribe to the bus instead of
//! registering callbacks.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Session lifecycle state
///
/// ```text
/// idle --start--> loading --first frame--> playing --stop--> stopping --teardown--> idle
///                    \-------------------stop-------------------/
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session, or a session that has been torn down
    Idle,
    /// Session started, no audio decoded yet
    Loading,
    /// At least one buffer has been decoded and scheduled
    Playing,
    /// Teardown in progress
    Stopping,
}

impl SessionState {
    /// Whether `self -> next` is an edge of the session state machine.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Loading)
                | (Loading, Playing)
                | (Loading, Stopping)
                | (Playing, Stopping)
                | (Stopping, Idle)
        )
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Loading => write!(f, "loading"),
            SessionState::Playing => write!(f, "playing"),
            SessionState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Voxline event types
///
/// Events are broadcast via EventBus and can be serialized for transmission
/// to out-of-process observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VoxEvent {
    /// Session state changed
    StateChanged {
        /// Session the transition belongs to
        session_id: Uuid,
        /// State before the change
        old_state: SessionState,
        /// State after the change
        new_state: SessionState,
        /// Whether the queue loop is running at the time of the change
        is_processing: bool,
        /// When the state changed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue loop started or finished
    ///
    /// Covers the gaps between segments where the state is not yet `playing`.
    ProcessingChanged {
        session_id: Uuid,
        /// Session state at the time of the change
        state: SessionState,
        is_processing: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A segment was dequeued and its stream is being opened
    SegmentStarted {
        session_id: Uuid,
        segment_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A segment's stream was fully decoded and scheduled
    SegmentFinished {
        session_id: Uuid,
        segment_id: Uuid,
        /// Number of sample frames scheduled for this segment
        frames: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A segment was aborted by a transport or decode error
    ///
    /// Cancellation is not a failure and never produces this event.
    SegmentFailed {
        session_id: Uuid,
        segment_id: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue drained and all scheduled audio has finished playing
    PlaybackDrained {
        session_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session aborted by an audio device failure
    SessionFailed {
        session_id: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl VoxEvent {
    /// Session the event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            VoxEvent::StateChanged { session_id, .. }
            | VoxEvent::ProcessingChanged { session_id, .. }
            | VoxEvent::SegmentStarted { session_id, .. }
            | VoxEvent::SegmentFinished { session_id, .. }
            | VoxEvent::SegmentFailed { session_id, .. }
            | VoxEvent::PlaybackDrained { session_id, .. }
            | VoxEvent::SessionFailed { session_id, .. } => *session_id,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use voxline_common::events::{EventBus, VoxEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(VoxEvent::PlaybackDrained {
///     session_id: uuid::Uuid::new_v4(),
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VoxEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<VoxEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: VoxEvent) -> Result<usize, broadcast::error::SendError<VoxEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: VoxEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_zero_capacity_is_clamped() {
        let bus = EventBus::new(0);
        assert_eq!(bus.capacity(), 1);
    }

    #[test]
    fn test_eventbus_emit_no_subscribers() {
        let bus = EventBus::new(10);
        let event = VoxEvent::PlaybackDrained {
            session_id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
        };
        assert!(bus.emit(event).is_err());
    }

    #[tokio::test]
    async fn test_eventbus_emit_with_subscriber() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let session_id = Uuid::new_v4();

        bus.emit(VoxEvent::StateChanged {
            session_id,
            old_state: SessionState::Idle,
            new_state: SessionState::Loading,
            is_processing: false,
            timestamp: chrono::Utc::now(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            VoxEvent::StateChanged {
                old_state,
                new_state,
                ..
            } => {
                assert_eq!(old_state, SessionState::Idle);
                assert_eq!(new_state, SessionState::Loading);
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[test]
    fn test_state_transition_table() {
        use SessionState::*;
        assert!(Idle.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Playing));
        assert!(Loading.can_transition_to(Stopping));
        assert!(Playing.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Idle));

        assert!(!Idle.can_transition_to(Playing));
        assert!(!Playing.can_transition_to(Loading));
        assert!(!Stopping.can_transition_to(Playing));
        assert!(!Idle.can_transition_to(Idle));
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let session_id = Uuid::new_v4();
        let event = VoxEvent::SegmentFailed {
            session_id,
            segment_id: Uuid::new_v4(),
            reason: "connection reset".to_string(),
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SegmentFailed");
        assert_eq!(json["reason"], "connection reset");
        assert_eq!(event.session_id(), session_id);
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Playing.to_string(), "playing");
        assert_eq!(
            serde_json::to_string(&SessionState::Stopping).unwrap(),
            "\"stopping\""
        );
    }
}
