//! Completion signal
//!
//! One shared future covers every `queue()` call issued since the session's
//! queue last went idle. It is armed lazily by the first such call and
//! resolved exactly once: by a natural drain, by `stop()`, or by a session
//! failure.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// How a wait for completion ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Queue emptied and every scheduled buffer finished playing
    Drained,
    /// The session was stopped or superseded
    Stopped,
    /// The session was aborted by a device error
    Failed(String),
}

/// Future handed to waiters; cloneable and awaitable by many callers
pub type CompletionFuture = Shared<BoxFuture<'static, Completion>>;

struct Pending {
    session_id: Uuid,
    tx: oneshot::Sender<Completion>,
    future: CompletionFuture,
}

#[derive(Default)]
pub struct CompletionSignal {
    pending: Mutex<Option<Pending>>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm a signal for `session_id` unless one is already pending.
    pub fn arm(&self, session_id: Uuid) {
        let mut pending = self.lock();
        if pending.is_some() {
            return;
        }

        let (tx, rx) = oneshot::channel();
        // A dropped sender only happens if the engine itself is dropped.
        let future = rx.map(|outcome| outcome.unwrap_or(Completion::Stopped)).boxed().shared();
        *pending = Some(Pending {
            session_id,
            tx,
            future,
        });
        debug!(session_id = %session_id, "Completion signal armed");
    }

    /// Future for the pending signal, or an already-resolved `Drained`.
    pub fn wait(&self) -> CompletionFuture {
        match self.lock().as_ref() {
            Some(pending) => pending.future.clone(),
            None => futures::future::ready(Completion::Drained).boxed().shared(),
        }
    }

    /// Resolve the pending signal with `outcome`.
    ///
    /// With `Some(session)`, only a signal armed for that session resolves.
    /// Returns whether a signal was resolved.
    pub fn resolve(&self, session_id: Option<Uuid>, outcome: Completion) -> bool {
        let mut pending = self.lock();
        let matches = match (pending.as_ref(), session_id) {
            (Some(p), Some(id)) => p.session_id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return false;
        }

        match pending.take() {
            Some(p) => {
                debug!(session_id = %p.session_id, "Completion signal resolved: {:?}", outcome);
                let _ = p.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_without_pending_is_drained() {
        let signal = CompletionSignal::new();
        assert_eq!(signal.wait().await, Completion::Drained);
    }

    #[tokio::test]
    async fn test_all_waiters_see_outcome() {
        let signal = CompletionSignal::new();
        let session = Uuid::new_v4();
        signal.arm(session);

        let first = signal.wait();
        let second = signal.wait();
        assert!(signal.resolve(Some(session), Completion::Stopped));

        assert_eq!(first.await, Completion::Stopped);
        assert_eq!(second.await, Completion::Stopped);
        assert!(!signal.is_pending());
    }

    #[test]
    fn test_arm_is_idempotent() {
        let signal = CompletionSignal::new();
        let session = Uuid::new_v4();
        signal.arm(session);
        signal.arm(Uuid::new_v4());

        assert!(!signal.resolve(Some(Uuid::new_v4()), Completion::Drained));
        assert!(signal.resolve(Some(session), Completion::Drained));
        assert!(!signal.resolve(None, Completion::Drained));
    }
}
