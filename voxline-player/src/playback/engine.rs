//! Playback engine orchestration
//!
//! `PlaybackEngine` is the caller-facing handle. It ties together the
//! session controller, the segment queue, the gapless scheduler and the
//! completion signal, and runs one processing loop per session:
//!
//! 1. `queue()` appends a segment and starts the loop if none is running
//! 2. the loop dequeues the head segment when nothing is generating and
//!    spawns its generation (stream, decode, schedule)
//! 3. once the queue is empty and nothing is generating, the loop waits for
//!    the scheduled audio to finish and resolves the completion signal
//!
//! Generation is strictly serial but runs ahead of the output clock, so the
//! next segment streams while the previous one is still audible.
//!
//! Session lifecycle calls (`start_session`, `stop`, device failures) are
//! serialized by an async mutex; everything else is lock-free from the
//! caller's point of view.

use crate::audio::{OutputFactory, PcmBuffer};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::playback::completion::{Completion, CompletionSignal};
use crate::playback::decoder::pump;
use crate::playback::queue::{QueueItem, SegmentQueue, Step};
use crate::playback::scheduler::AudioScheduler;
use crate::playback::session::SessionController;
use crate::provider::{provider_factory, SpeechProvider, StreamFactory};
use crate::text::TextChunker;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use voxline_common::events::{EventBus, SessionState, VoxEvent};
use voxline_common::time::secs_to_duration;

/// Identifier returned by `start_session`
pub type SessionId = Uuid;

/// Identifier returned by `queue`
pub type SegmentId = Uuid;

/// Scheduled audio closer to its end than this counts as finished
const DRAIN_TOLERANCE_SECS: f64 = 1e-6;

/// `{state, is_processing}` pair delivered by `state_changes()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub state: SessionState,
    pub is_processing: bool,
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub session_id: Option<SessionId>,
    pub state: SessionState,
    pub is_processing: bool,
    /// Segments waiting to generate
    pub queued: usize,
    pub active_sources: usize,
    pub scheduled_end_time: f64,
}

/// Streaming playback engine
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    factory: Arc<dyn OutputFactory>,
    events: EventBus,
    sessions: SessionController,
    queue: SegmentQueue,
    scheduler: AudioScheduler,
    completion: CompletionSignal,
    /// Serializes start/stop/failure teardown
    lifecycle: tokio::sync::Mutex<()>,
}

impl PlaybackEngine {
    /// Create an engine that opens its output contexts through `factory`.
    pub fn new(config: EngineConfig, factory: Arc<dyn OutputFactory>) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_capacity);
        let scheduler = AudioScheduler::new(config.schedule_lead_secs());

        info!(
            "Creating playback engine ({}Hz, poll {}ms)",
            config.sample_rate, config.poll_interval_ms
        );

        Ok(Self {
            inner: Arc::new(Inner {
                sessions: SessionController::new(events.clone()),
                events,
                factory,
                queue: SegmentQueue::new(),
                scheduler,
                completion: CompletionSignal::new(),
                lifecycle: tokio::sync::Mutex::new(()),
                config,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Stop any current session, then start a fresh one in `loading`.
    ///
    /// # Errors
    /// `Error::Device` if the output context cannot be opened. The new
    /// session is torn down again and the engine is back in `idle`.
    pub async fn start_session(&self) -> Result<SessionId> {
        let inner = &self.inner;
        let _guard = inner.lifecycle.lock().await;

        inner.teardown(None, Completion::Stopped);

        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();

        let output = match inner.factory.open(ended_tx) {
            Ok(output) => output,
            Err(e) => {
                inner.sessions.begin(session_id, cancel, None)?;
                error!(session_id = %session_id, "Failed to open audio output: {}", e);
                inner.events.emit_lossy(VoxEvent::SessionFailed {
                    session_id,
                    reason: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                inner.teardown(Some(session_id), Completion::Failed(e.to_string()));
                return Err(match e {
                    Error::Device(_) => e,
                    other => Error::Device(other.to_string()),
                });
            }
        };

        inner.scheduler.begin(session_id);
        inner.sessions.begin(session_id, cancel.clone(), Some(output))?;

        tokio::spawn(listen_for_ended(
            Arc::downgrade(&self.inner),
            session_id,
            cancel,
            ended_rx,
        ));

        Ok(session_id)
    }

    /// Tear down the current session. Returns once teardown is complete.
    ///
    /// In-flight reads are cancelled, every active source is hard-stopped,
    /// the queue is cleared and a pending completion resolves as `Stopped`.
    pub async fn stop(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        if !self.inner.teardown(None, Completion::Stopped) {
            debug!("Stop requested with no active session");
        }
    }

    /// Queue one segment on the current session.
    pub fn queue(&self, factory: StreamFactory) -> Result<SegmentId> {
        let inner = &self.inner;
        let session_id = inner.sessions.current().ok_or(Error::NoActiveSession)?;
        let segment_id = Uuid::new_v4();

        let start_loop = inner.queue.push(
            QueueItem {
                segment_id,
                session_id,
                factory,
            },
            &inner.completion,
            |id| inner.sessions.is_current(id),
            || inner.sessions.set_processing(session_id, true),
        )?;
        debug!(session_id = %session_id, segment_id = %segment_id, "Segment queued");

        if start_loop {
            tokio::spawn(Arc::clone(inner).run_loop(session_id));
        }

        Ok(segment_id)
    }

    /// Chunk `text` and queue one segment per chunk on `provider`.
    pub fn queue_text(&self, provider: Arc<dyn SpeechProvider>, text: &str) -> Result<Vec<SegmentId>> {
        if self.inner.sessions.current().is_none() {
            return Err(Error::NoActiveSession);
        }

        let chunker = TextChunker::new(self.inner.config.max_chunk_length);
        let mut segments = Vec::new();
        for chunk in chunker.chunk(text) {
            if chunk.trim().is_empty() {
                continue;
            }
            let factory = provider_factory(Arc::clone(&provider), chunk.to_string());
            segments.push(self.queue(factory)?);
        }

        debug!("Queued {} text segments", segments.len());
        Ok(segments)
    }

    /// Resolves once everything queued so far has finished playing.
    ///
    /// Returns `Drained` immediately when nothing is pending.
    pub async fn wait_for_completion(&self) -> Completion {
        let pending = self.inner.completion.wait();
        pending.await
    }

    /// Whether a session is generating or still has audio ahead of the clock.
    pub fn is_active(&self) -> bool {
        let inner = &self.inner;
        let Some(session_id) = inner.sessions.current() else {
            return false;
        };
        if inner.sessions.is_processing() {
            return true;
        }
        match inner.sessions.output(session_id) {
            Ok(output) => inner.scheduler.remaining(session_id, output.current_time()) > DRAIN_TOLERANCE_SECS,
            Err(_) => false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.sessions.state()
    }

    pub fn status(&self) -> EngineStatus {
        let inner = &self.inner;
        EngineStatus {
            session_id: inner.sessions.current(),
            state: inner.sessions.state(),
            is_processing: inner.sessions.is_processing(),
            queued: inner.queue.len(),
            active_sources: inner.scheduler.active_count(),
            scheduled_end_time: inner.scheduler.scheduled_end_time(),
        }
    }

    /// Subscribe to every engine event
    pub fn subscribe(&self) -> broadcast::Receiver<VoxEvent> {
        self.inner.events.subscribe()
    }

    /// Stream of `{state, is_processing}` changes.
    ///
    /// Lagged receivers skip the events they missed.
    pub fn state_changes(&self) -> impl Stream<Item = StateSnapshot> + Send + 'static {
        BroadcastStream::new(self.inner.events.subscribe()).filter_map(|event| match event {
            Ok(VoxEvent::StateChanged {
                new_state,
                is_processing,
                ..
            }) => Some(StateSnapshot {
                state: new_state,
                is_processing,
            }),
            Ok(VoxEvent::ProcessingChanged {
                state,
                is_processing,
                ..
            }) => Some(StateSnapshot {
                state,
                is_processing,
            }),
            _ => None,
        })
    }

    /// Scheduler view, for inspection
    pub fn scheduler(&self) -> &AudioScheduler {
        &self.inner.scheduler
    }
}

impl Inner {
    /// Stop the current session (or only `expected`) and return to idle.
    ///
    /// Must run under the lifecycle lock. The session is invalidated before
    /// anything else is released. Returns false if nothing was stopped.
    fn teardown(&self, expected: Option<Uuid>, outcome: Completion) -> bool {
        let Some(teardown) = self.sessions.begin_stop(expected) else {
            return false;
        };
        let session_id = teardown.session_id;

        teardown.cancel.cancel();
        self.scheduler.reset(teardown.output.as_deref());
        let discarded = self.queue.clear();
        self.completion.resolve(None, outcome);
        self.sessions.set_processing(session_id, false);

        if let Some(output) = &teardown.output {
            output.close();
        }

        if let Err(e) = self.sessions.finish_stop(session_id) {
            warn!(session_id = %session_id, "Teardown ended in unexpected state: {}", e);
        }

        info!(session_id = %session_id, "Session torn down ({} queued segments discarded)", discarded);
        true
    }

    /// Abort `session_id` after a device failure.
    async fn fail_session(&self, session_id: Uuid, reason: String) {
        let _guard = self.lifecycle.lock().await;
        if !self.sessions.is_current(session_id) {
            return;
        }

        error!(session_id = %session_id, "Session failed: {}", reason);
        self.events.emit_lossy(VoxEvent::SessionFailed {
            session_id,
            reason: reason.clone(),
            timestamp: chrono::Utc::now(),
        });
        self.teardown(Some(session_id), Completion::Failed(reason));
    }

    /// Processing loop for one session.
    async fn run_loop(self: Arc<Self>, session_id: Uuid) {
        let poll = self.config.poll_interval();
        let cancel = match self.sessions.cancel_token(session_id) {
            Ok(cancel) => cancel,
            Err(_) => return self.abandon_loop(session_id),
        };

        debug!(session_id = %session_id, "Queue processing started");

        loop {
            if !self.sessions.is_current(session_id) {
                return self.abandon_loop(session_id);
            }

            match self.queue.next_step(session_id) {
                Step::Start(item) => {
                    tokio::spawn(Arc::clone(&self).run_generation(item));
                }
                Step::Busy => {}
                Step::Idle => {
                    let remaining = match self.sessions.output(session_id) {
                        Ok(output) => self.scheduler.remaining(session_id, output.current_time()),
                        Err(_) => return self.abandon_loop(session_id),
                    };

                    if remaining > DRAIN_TOLERANCE_SECS {
                        let wait = poll.min(secs_to_duration(remaining));
                        if !sleep_or_cancel(&cancel, wait).await {
                            return self.abandon_loop(session_id);
                        }
                        continue;
                    }

                    let finished = self.queue.try_finish(session_id, &self.completion, || {
                        self.sessions.set_processing(session_id, false)
                    });
                    if finished {
                        self.events.emit_lossy(VoxEvent::PlaybackDrained {
                            session_id,
                            timestamp: chrono::Utc::now(),
                        });
                        info!(session_id = %session_id, "Playback drained");
                        return;
                    }
                    continue;
                }
            }

            if !sleep_or_cancel(&cancel, poll).await {
                return self.abandon_loop(session_id);
            }
        }
    }

    fn abandon_loop(&self, session_id: Uuid) {
        debug!(session_id = %session_id, "Queue processing abandoned");
        self.queue.abandon(session_id);
        self.completion.resolve(Some(session_id), Completion::Stopped);
        self.sessions.set_processing(session_id, false);
    }

    /// Generate, decode and schedule one segment, then free the queue.
    async fn run_generation(self: Arc<Self>, item: QueueItem) {
        let QueueItem {
            segment_id,
            session_id,
            factory,
        } = item;

        let cancel = match self.sessions.cancel_token(session_id) {
            Ok(cancel) => cancel,
            Err(_) => {
                self.queue.finish_generation(segment_id);
                return;
            }
        };

        info!(session_id = %session_id, segment_id = %segment_id, "Segment started");
        self.events.emit_lossy(VoxEvent::SegmentStarted {
            session_id,
            segment_id,
            timestamp: chrono::Utc::now(),
        });

        match self.generate(session_id, factory, &cancel).await {
            Ok(frames) => {
                info!(
                    session_id = %session_id,
                    segment_id = %segment_id,
                    "Segment finished ({} frames)",
                    frames
                );
                self.events.emit_lossy(VoxEvent::SegmentFinished {
                    session_id,
                    segment_id,
                    frames,
                    timestamp: chrono::Utc::now(),
                });
            }
            Err(e) if e.is_cancellation() || cancel.is_cancelled() => {
                debug!(session_id = %session_id, segment_id = %segment_id, "Segment cancelled");
            }
            Err(e) if e.is_session_fatal() => {
                self.fail_session(session_id, e.to_string()).await;
            }
            Err(e) => {
                warn!(session_id = %session_id, segment_id = %segment_id, "Segment failed: {}", e);
                self.events.emit_lossy(VoxEvent::SegmentFailed {
                    session_id,
                    segment_id,
                    reason: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }

        self.queue.finish_generation(segment_id);
    }

    async fn generate(
        &self,
        session_id: Uuid,
        factory: StreamFactory,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let output = self.sessions.output(session_id)?;

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            stream = factory(cancel.clone()) => stream?,
        };

        let sample_rate = self.config.sample_rate;
        pump(
            stream,
            cancel,
            || self.sessions.is_current(session_id),
            |samples| {
                self.scheduler
                    .schedule(session_id, output.as_ref(), PcmBuffer::new(samples, sample_rate))?;
                self.sessions.promote_to_playing(session_id)
            },
        )
        .await
    }
}

/// Forward natural buffer ends to the scheduler until the session ends.
async fn listen_for_ended(
    inner: Weak<Inner>,
    session_id: Uuid,
    cancel: CancellationToken,
    mut ended_rx: mpsc::UnboundedReceiver<crate::audio::SourceId>,
) {
    loop {
        let ended = tokio::select! {
            _ = cancel.cancelled() => break,
            ended = ended_rx.recv() => ended,
        };

        let (Some(id), Some(engine)) = (ended, inner.upgrade()) else {
            break;
        };
        engine.scheduler.source_ended(session_id, id);
    }
    debug!(session_id = %session_id, "Ended-source listener stopped");
}

/// Sleep for `duration`; false if `cancel` fired first.
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
