//! Coordinates sends, journey state, and persistence.
//!
//! The [`Orchestrator`] owns the busy gate: at most one streaming exchange is
//! in flight at a time, and a send attempted while one is active is rejected
//! up front, before any network traffic. Everything else is glue between the
//! backend, the stream-session drive loop, the render projector, and the
//! conversation bridge.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use uuid::Uuid;

use crate::api::Turn;
use crate::client::{ChatBackend, ClientError, RemoteConversations};
use crate::gems::{GemDescriptor, GemProgress, ProgressError};
use crate::render::{self, MessageView};
use crate::session::{
    drive, CancelToken, DriveOptions, Outcome, StreamSession, TRANSPORT_FAILURE_MESSAGE,
};
use crate::store::{ConversationBridge, StorageError, SyncStatus};

/// Errors surfaced by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A streaming exchange is already in flight.
    #[error("a message is already being processed")]
    Busy,

    /// The requested persona is not part of the journey.
    #[error("unknown gem: {0}")]
    UnknownGem(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Progress(#[from] ProgressError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Per-send knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Silent sends carry no visible prompt and leave no message block when
    /// they settle. Used for journey commands issued on the chat channel.
    pub silent: bool,
}

/// How a driven send ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Completed {
        outcome: Outcome,
        /// Whether the exchange reached the server-side store.
        sync: SyncStatus,
    },
    /// Cancelled mid-stream; nothing was persisted.
    Cancelled,
}

/// What the user chose when a saved journey was found at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryChoice {
    /// Keep the saved journey and replay its transcript.
    Continue,
    /// Discard it and start over.
    Reset,
}

/// Result of the one-time history restore.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoredHistory {
    /// No saved journey, or the user chose to start over.
    Fresh,
    /// The saved journey continues where it left off.
    Continued {
        current_gem: Option<String>,
        messages: Vec<MessageView>,
    },
    /// Restore already ran earlier in this process.
    AlreadyRestored,
}

/// Releases the busy flag on every exit path.
struct BusyGate<'a>(&'a AtomicBool);

impl<'a> BusyGate<'a> {
    /// Claim the flag, failing without side effects if it is already held.
    fn claim(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| OrchestratorError::Busy)?;
        Ok(Self(flag))
    }
}

impl Drop for BusyGate<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Client-side controller for one GEM journey.
pub struct Orchestrator<B: ChatBackend, R: RemoteConversations> {
    backend: B,
    bridge: ConversationBridge<R>,
    options: DriveOptions,
    busy: AtomicBool,
    history_restored: AtomicBool,
    cancel: CancelToken,
    conversation: tokio::sync::Mutex<Option<String>>,
}

impl<B: ChatBackend, R: RemoteConversations> Orchestrator<B, R> {
    pub fn new(backend: B, bridge: ConversationBridge<R>, options: DriveOptions) -> Self {
        Self {
            backend,
            bridge,
            options,
            busy: AtomicBool::new(false),
            history_restored: AtomicBool::new(false),
            cancel: CancelToken::new(),
            conversation: tokio::sync::Mutex::new(None),
        }
    }

    /// Whether a streaming exchange is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Token for cancelling the in-flight exchange from another task.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Conversation persistence surface.
    pub fn conversations(&self) -> &ConversationBridge<R> {
        &self.bridge
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send one message and drive its stream to completion.
    ///
    /// `on_render` receives the projected view after every state change and
    /// busy tick. Rejects immediately with [`OrchestratorError::Busy`] while
    /// another exchange is in flight; no request is issued in that case.
    pub async fn send<F>(
        &self,
        message: &str,
        options: SendOptions,
        mut on_render: F,
    ) -> Result<SendOutcome>
    where
        F: FnMut(&MessageView),
    {
        let _gate = BusyGate::claim(&self.busy)?;
        self.cancel.reset();

        let prompt = (!options.silent).then(|| message.to_string());
        let mut session = StreamSession::new(prompt);
        tracing::debug!(session_id = %session.id(), silent = options.silent, "opening stream");

        match self.backend.stream_chat(message).await {
            Ok(frames) => {
                drive(&mut session, frames, &self.options, &self.cancel, |view, tick| {
                    on_render(&render::project(&view, tick));
                })
                .await;
            }
            // A request that never opens a stream settles the same way a
            // stream that dies mid-flight does: a terminal failure that is
            // projected and recorded.
            Err(e) => {
                tracing::warn!(session_id = %session.id(), error = %e, "stream request failed");
                session.settle_failure(TRANSPORT_FAILURE_MESSAGE, Some(e.to_string()));
                on_render(&render::project(&session.view(), 0));
            }
        }

        if session.is_cancelled() {
            tracing::debug!(session_id = %session.id(), "send cancelled");
            return Ok(SendOutcome::Cancelled);
        }

        // Every non-cancelled path above settles the session.
        let outcome = session.outcome().cloned().unwrap_or_else(|| Outcome::Failure {
            message: TRANSPORT_FAILURE_MESSAGE.to_string(),
            detail: None,
        });

        let conversation_id = self.conversation_id().await;
        let sync = self.bridge.persist(&session, &conversation_id).await?;

        Ok(SendOutcome::Completed { outcome, sync })
    }

    /// Cancel the in-flight exchange, if any.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn conversation_id(&self) -> String {
        let mut guard = self.conversation.lock().await;
        guard
            .get_or_insert_with(|| format!("conv_{}", Uuid::new_v4().simple()))
            .clone()
    }

    // ========================================================================
    // Journey
    // ========================================================================

    /// Restore the saved journey, at most once per process.
    ///
    /// When a saved transcript exists, `choose` decides whether to continue
    /// it or reset. The choice is offered exactly once; later calls return
    /// [`RestoredHistory::AlreadyRestored`] without touching the server.
    pub async fn restore_history<F>(&self, choose: F) -> Result<RestoredHistory>
    where
        F: FnOnce(&[Turn]) -> HistoryChoice,
    {
        if self.history_restored.load(Ordering::SeqCst) {
            return Ok(RestoredHistory::AlreadyRestored);
        }

        // Latch only once the fetch succeeds, so a transient startup
        // failure does not suppress the choice for the whole process.
        let history = self.backend.history().await?;
        self.history_restored.store(true, Ordering::SeqCst);
        if history.active_history.is_empty() {
            return Ok(RestoredHistory::Fresh);
        }

        match choose(&history.active_history) {
            HistoryChoice::Continue => Ok(RestoredHistory::Continued {
                current_gem: history.current_gem,
                messages: materialize_history(&history.active_history),
            }),
            HistoryChoice::Reset => {
                self.backend.reset().await?;
                self.drop_active_conversation().await?;
                Ok(RestoredHistory::Fresh)
            }
        }
    }

    /// Reset the journey on the server and drop the active conversation's
    /// cached record. Archived conversations are untouched on both sides.
    pub async fn reset_journey(&self) -> Result<String> {
        let response = self.backend.reset().await?;
        self.drop_active_conversation().await?;
        tracing::info!("journey reset");
        Ok(response.message)
    }

    /// Forget the active conversation and remove its cached record, leaving
    /// every other cached conversation alone.
    async fn drop_active_conversation(&self) -> Result<()> {
        let mut guard = self.conversation.lock().await;
        if let Some(id) = guard.take() {
            self.bridge.drop_local(&id).await?;
        }
        Ok(())
    }

    /// Personas in journey order.
    pub async fn list_gems(&self) -> Result<Vec<GemDescriptor>> {
        Ok(self.backend.list_gems().await?.gems)
    }

    /// Switch to the given persona and replay its saved transcript.
    ///
    /// Unknown identifiers fail before any activation request is sent.
    pub async fn activate(&self, gem_id: &str) -> Result<(String, Vec<MessageView>)> {
        let gems = self.backend.list_gems().await?;
        if !gems.gems.iter().any(|g| g.id == gem_id) {
            return Err(OrchestratorError::UnknownGem(gem_id.to_string()));
        }

        let response = self.backend.activate_gem(gem_id).await?;
        *self.conversation.lock().await = None;

        let history = self.backend.history().await?;
        let messages = history
            .conversations
            .get(gem_id)
            .map(|turns| materialize_history(turns))
            .unwrap_or_default();

        Ok((response.message, messages))
    }

    /// Current journey progress.
    pub async fn progress(&self) -> Result<GemProgress> {
        let gems = self.backend.list_gems().await?;
        let history = self.backend.history().await?;

        let sequence = gems.gems.into_iter().map(|g| g.id).collect();
        let current = gems.current_gem.or(history.current_gem);
        Ok(GemProgress::new(
            sequence,
            current,
            history.completed_gems,
        )?)
    }

    /// Push pending local turns to the server.
    pub async fn reconcile(&self) -> Result<usize> {
        Ok(self.bridge.reconcile().await?)
    }
}

/// Replay a stored transcript as finalized message views.
///
/// User turns pair with the assistant turn that follows them; a trailing
/// user turn without an answer still gets its own block.
fn materialize_history(turns: &[Turn]) -> Vec<MessageView> {
    use crate::api::Role;

    let mut messages = Vec::new();
    let mut pending_prompt: Option<&str> = None;

    for turn in turns {
        match turn.role {
            Role::User => {
                if let Some(prompt) = pending_prompt.take() {
                    messages.push(unanswered(prompt));
                }
                pending_prompt = Some(&turn.content);
            }
            Role::Assistant => {
                messages.push(MessageView::Final {
                    prompt: pending_prompt.take().map(str::to_string),
                    label: "GEM".to_string(),
                    system: false,
                    spans: render::format_spans(&turn.content),
                    error: None,
                });
            }
        }
    }
    if let Some(prompt) = pending_prompt {
        messages.push(unanswered(prompt));
    }

    messages
}

fn unanswered(prompt: &str) -> MessageView {
    MessageView::Final {
        prompt: Some(prompt.to_string()),
        label: "GEM".to_string(),
        system: false,
        spans: Vec::new(),
        error: None,
    }
}
