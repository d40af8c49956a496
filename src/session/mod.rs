//! One client-side request/response exchange correlated with a single stream.
//!
//! A [`StreamSession`] is created when a send is requested, mutated only by
//! frame application, and settles exactly once: with the server's terminal
//! frame, or with a synthesized failure when the transport dies or the stream
//! closes early. Settling is idempotent; frames arriving after the terminal
//! one are ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::frame::Frame;

/// User-facing text for a failure the server never explained.
///
/// The technical detail is kept on the outcome for diagnostics but is not
/// what the user sees.
pub const TRANSPORT_FAILURE_MESSAGE: &str =
    "The connection to the GEM service was interrupted. Please try again.";

// ============================================================================
// Session State
// ============================================================================

/// Identity of whoever is answering the current exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Responder {
    /// Persona name, when a GEM is answering.
    pub name: Option<String>,
    /// True when the system orchestrator answered instead of a persona.
    pub is_orchestrator: bool,
}

/// Terminal result of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The stream finished with a `done` frame.
    Success {
        answer: String,
        responder: Responder,
        /// Error text the server attached to an otherwise finalized answer.
        error: Option<String>,
    },
    /// The stream finished with an `error` frame or a transport failure.
    Failure {
        /// What the user is shown.
        message: String,
        /// Technical detail, kept for diagnostics only.
        detail: Option<String>,
    },
}

/// Where the session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Stream opened, nothing received yet.
    Waiting,
    /// At least one chunk has arrived.
    Streaming,
    /// A terminal outcome has been produced.
    Settled,
}

/// One in-flight exchange with the GEM service.
#[derive(Debug)]
pub struct StreamSession {
    id: String,
    /// Prompt to render above the answer. `None` marks a silent command
    /// whose exchange must leave no visible message block behind.
    prompt: Option<String>,
    accumulated: String,
    responder: Responder,
    phase: Phase,
    outcome: Option<Outcome>,
    cancelled: bool,
}

impl StreamSession {
    /// Create a session for a user-visible prompt, or a silent one for `None`.
    ///
    /// The id is derived client-side; the server never assigns one.
    #[must_use]
    pub fn new(prompt: Option<String>) -> Self {
        Self {
            id: format!("session_{}", Uuid::new_v4().simple()),
            prompt,
            accumulated: String::new(),
            responder: Responder::default(),
            phase: Phase::Waiting,
            outcome: None,
            cancelled: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Mark the session cancelled.
    ///
    /// Cancellation is cooperative: the session keeps consuming its stream so
    /// the in-flight request is not leaked, but its result must no longer be
    /// projected or persisted.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Apply one frame, strictly in arrival order.
    ///
    /// Frames after the terminal one are ignored.
    pub fn apply(&mut self, frame: Frame) {
        if self.is_settled() {
            tracing::warn!(session_id = %self.id, "ignoring frame after terminal outcome");
            return;
        }

        match frame {
            Frame::Start => {
                self.phase = Phase::Waiting;
            }
            Frame::Chunk {
                accumulated,
                gem_name,
                is_orchestrator,
            } => {
                // The server sends the running total, so overwriting (rather
                // than appending) is correct and idempotent against duplicate
                // delivery.
                self.accumulated = accumulated;
                self.responder = Responder {
                    name: gem_name,
                    is_orchestrator,
                };
                self.phase = Phase::Streaming;
            }
            Frame::Done {
                answer,
                gem_name,
                is_orchestrator,
                error,
            } => {
                self.responder = Responder {
                    name: gem_name,
                    is_orchestrator,
                };
                self.accumulated.clone_from(&answer);
                self.settle(Outcome::Success {
                    answer,
                    responder: self.responder.clone(),
                    error,
                });
            }
            Frame::Error { error } => {
                self.settle(Outcome::Failure {
                    message: error,
                    detail: None,
                });
            }
        }
    }

    /// Synthesize a failure outcome for a stream that died without one.
    ///
    /// No-op when the session already settled.
    pub fn settle_failure(&mut self, message: impl Into<String>, detail: Option<String>) {
        self.settle(Outcome::Failure {
            message: message.into(),
            detail,
        });
    }

    fn settle(&mut self, outcome: Outcome) {
        if self.is_settled() {
            return;
        }
        self.outcome = Some(outcome);
        self.phase = Phase::Settled;
    }

    /// Borrowed snapshot for the render projector.
    #[must_use]
    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            prompt: self.prompt.as_deref(),
            accumulated: &self.accumulated,
            responder: &self.responder,
            phase: self.phase,
            outcome: self.outcome.as_ref(),
            cancelled: self.cancelled,
        }
    }
}

/// Immutable snapshot of a session, consumed by the render projector.
#[derive(Debug, Clone, Copy)]
pub struct SessionView<'a> {
    pub prompt: Option<&'a str>,
    pub accumulated: &'a str,
    pub responder: &'a Responder,
    pub phase: Phase,
    pub outcome: Option<&'a Outcome>,
    pub cancelled: bool,
}

// ============================================================================
// Cancellation
// ============================================================================

/// Shared flag for cooperatively cancelling an in-flight session.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm the token for the next session.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// Drive Loop
// ============================================================================

/// Timing knobs for [`drive`].
#[derive(Debug, Clone)]
pub struct DriveOptions {
    /// Upper bound on waiting for the next frame. On expiry the session
    /// settles exactly like a transport failure.
    pub stall_timeout: Duration,
    /// Cadence of busy-indicator updates while nothing has arrived.
    pub busy_tick: Duration,
}

impl Default for DriveOptions {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(120),
            busy_tick: Duration::from_millis(500),
        }
    }
}

/// Consume a frame stream to completion, applying frames in arrival order.
///
/// `on_update` is called with a fresh snapshot after every state change and
/// on each busy tick; the tick counter rotates the busy-indicator phrase.
/// Updates are suppressed once `cancel` fires, but the stream is still read
/// until it settles so the request is not leaked. The ticker is scoped to
/// this function and released on every exit path.
pub async fn drive<S, E, F>(
    session: &mut StreamSession,
    mut frames: S,
    options: &DriveOptions,
    cancel: &CancelToken,
    mut on_update: F,
) where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: std::fmt::Display,
    F: FnMut(SessionView<'_>, u64),
{
    let mut ticker = tokio::time::interval(options.busy_tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    // Absolute deadline so busy ticks do not restart the stall timer.
    let mut stall_deadline = tokio::time::Instant::now() + options.stall_timeout;

    if cancel.is_cancelled() {
        session.cancel();
    }
    if !session.is_cancelled() {
        on_update(session.view(), tick);
    }

    loop {
        if cancel.is_cancelled() {
            session.cancel();
        }

        tokio::select! {
            next = frames.next() => {
                match next {
                    None => {
                        // A stream that ends silently is treated identically
                        // to an explicit error frame.
                        session.settle_failure(
                            TRANSPORT_FAILURE_MESSAGE,
                            Some("stream closed before a terminal frame".to_string()),
                        );
                        break;
                    }
                    Some(Err(e)) => {
                        session.settle_failure(TRANSPORT_FAILURE_MESSAGE, Some(e.to_string()));
                        break;
                    }
                    Some(Ok(frame)) => {
                        stall_deadline = tokio::time::Instant::now() + options.stall_timeout;
                        let terminal = frame.is_terminal();
                        session.apply(frame);
                        if terminal || session.is_settled() {
                            break;
                        }
                        if !session.is_cancelled() {
                            on_update(session.view(), tick);
                        }
                    }
                }
            }
            () = tokio::time::sleep_until(stall_deadline) => {
                session.settle_failure(
                    TRANSPORT_FAILURE_MESSAGE,
                    Some("stream stalled past the configured timeout".to_string()),
                );
                break;
            }
            _ = ticker.tick() => {
                tick += 1;
                if !session.is_cancelled() {
                    on_update(session.view(), tick);
                }
            }
        }
    }

    if cancel.is_cancelled() {
        session.cancel();
    }
    if !session.is_cancelled() {
        on_update(session.view(), tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(accumulated: &str) -> Frame {
        Frame::Chunk {
            accumulated: accumulated.to_string(),
            gem_name: Some("Mapper".to_string()),
            is_orchestrator: false,
        }
    }

    #[test]
    fn chunk_overwrites_accumulated_text() {
        let mut session = StreamSession::new(Some("hi".to_string()));
        session.apply(chunk("H"));
        session.apply(chunk("He"));
        session.apply(chunk("Hel"));

        assert_eq!(session.view().accumulated, "Hel");
        assert_eq!(session.view().phase, Phase::Streaming);
    }

    #[test]
    fn done_settles_with_finalized_answer() {
        let mut session = StreamSession::new(Some("hi".to_string()));
        session.apply(chunk("Hel"));
        session.apply(Frame::Done {
            answer: "Hello".to_string(),
            gem_name: Some("Mapper".to_string()),
            is_orchestrator: false,
            error: None,
        });

        assert!(session.is_settled());
        match session.outcome().unwrap() {
            Outcome::Success { answer, .. } => assert_eq!(answer, "Hello"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn frames_after_terminal_are_ignored() {
        let mut session = StreamSession::new(None);
        session.apply(Frame::Error {
            error: "boom".to_string(),
        });
        session.apply(chunk("late"));

        assert_eq!(session.view().accumulated, "");
        match session.outcome().unwrap() {
            Outcome::Failure { message, .. } => assert_eq!(message, "boom"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn settle_failure_is_idempotent() {
        let mut session = StreamSession::new(None);
        session.settle_failure("first", None);
        session.settle_failure("second", None);

        match session.outcome().unwrap() {
            Outcome::Failure { message, .. } => assert_eq!(message, "first"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn success_does_not_downgrade_to_failure() {
        let mut session = StreamSession::new(None);
        session.apply(Frame::Done {
            answer: "fine".to_string(),
            gem_name: None,
            is_orchestrator: true,
            error: None,
        });
        session.settle_failure("too late", None);

        assert!(matches!(
            session.outcome().unwrap(),
            Outcome::Success { .. }
        ));
    }

    #[test]
    fn session_ids_are_unique_and_derived() {
        let a = StreamSession::new(None);
        let b = StreamSession::new(None);
        assert!(a.id().starts_with("session_"));
        assert_ne!(a.id(), b.id());
    }
}
