//! Remote-first conversation persistence with a local fallback.
//!
//! The server owns conversation data; the local cache keeps a write-through
//! copy. Writes go to both sides, and turns that miss the server (offline,
//! error) stay marked pending until [`ConversationBridge::reconcile`] pushes
//! them through.

use crate::api::{Role, Turn};
use crate::client::RemoteConversations;
use crate::session::{Outcome, StreamSession};
use crate::store::error::StorageResult;
use crate::store::local::FileConversationCache;
use crate::store::ConversationRecord;

/// How far a persisted exchange made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Written locally and acknowledged by the server.
    Synced,
    /// Written locally; the server write failed and is pending reconcile.
    LocalOnly,
    /// Nothing to persist (unsettled or cancelled session).
    Skipped,
}

/// Result of a delete that must succeed remotely to count as complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The local copy is gone but the server still has the conversation.
    LocalOnly { reason: String },
}

/// Result of a rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed,
    /// The local copy carries the new title but the server kept the old one.
    LocalOnly { reason: String },
}

/// Coordinates the remote conversation store and the local file cache.
pub struct ConversationBridge<R: RemoteConversations> {
    remote: R,
    cache: FileConversationCache,
}

impl<R: RemoteConversations> ConversationBridge<R> {
    pub fn new(remote: R, cache: FileConversationCache) -> Self {
        Self { remote, cache }
    }

    /// Persist a settled session's exchange into `conversation_id`.
    ///
    /// Unsettled and cancelled sessions are skipped. A visible prompt becomes
    /// a user turn; the outcome becomes the assistant turn, using the failure
    /// message when the stream failed. The local write always happens first;
    /// a failed server write downgrades the status rather than erroring.
    pub async fn persist(
        &self,
        session: &StreamSession,
        conversation_id: &str,
    ) -> StorageResult<SyncStatus> {
        if !session.is_settled() || session.is_cancelled() {
            return Ok(SyncStatus::Skipped);
        }

        let view = session.view();
        let mut record = match self.cache.load(conversation_id).await? {
            Some(record) => record,
            None => ConversationRecord::new(conversation_id),
        };

        if let Some(prompt) = view.prompt {
            record.push_turn(Turn::new(Role::User, prompt));
        }
        match view.outcome {
            Some(Outcome::Success { answer, .. }) => {
                record.push_turn(Turn::new(Role::Assistant, answer.clone()));
            }
            Some(Outcome::Failure { message, .. }) => {
                record.push_turn(Turn::new(Role::Assistant, message.clone()));
            }
            None => {}
        }

        let status = match self.remote.append_turns(conversation_id, record.unsynced()).await {
            Ok(()) => {
                record.mark_synced();
                SyncStatus::Synced
            }
            Err(e) => {
                tracing::warn!(
                    conversation_id,
                    error = %e,
                    "server write failed, keeping turns pending locally"
                );
                SyncStatus::LocalOnly
            }
        };

        self.cache.save(&record).await?;
        Ok(status)
    }

    /// Push every pending turn to the server. Returns how many conversations
    /// were brought fully in sync.
    pub async fn reconcile(&self) -> StorageResult<usize> {
        let mut reconciled = 0;

        for mut record in self.cache.list_pending().await? {
            match self.remote.append_turns(&record.id, record.unsynced()).await {
                Ok(()) => {
                    record.mark_synced();
                    self.cache.save(&record).await?;
                    reconciled += 1;
                }
                Err(e) => {
                    tracing::debug!(
                        conversation_id = %record.id,
                        error = %e,
                        "conversation still pending after reconcile attempt"
                    );
                }
            }
        }

        if reconciled > 0 {
            tracing::info!(reconciled, "pushed pending conversations to the server");
        }
        Ok(reconciled)
    }

    /// Delete a conversation on both sides, remote first.
    ///
    /// The local copy is removed even when the server delete fails, and the
    /// discrepancy is surfaced in the outcome instead of being swallowed.
    pub async fn delete(&self, id: &str) -> StorageResult<DeleteOutcome> {
        let remote_result = self.remote.delete_conversation(id).await;
        self.cache.delete(id).await?;

        match remote_result {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) => Ok(DeleteOutcome::LocalOnly {
                reason: e.to_string(),
            }),
        }
    }

    /// Rename a conversation on both sides, remote first.
    pub async fn rename(&self, id: &str, title: &str) -> StorageResult<RenameOutcome> {
        let remote_result = self.remote.rename_conversation(id, title).await;

        if let Some(mut record) = self.cache.load(id).await? {
            record.title = Some(title.to_string());
            self.cache.save(&record).await?;
        }

        match remote_result {
            Ok(()) => Ok(RenameOutcome::Renamed),
            Err(e) => Ok(RenameOutcome::LocalOnly {
                reason: e.to_string(),
            }),
        }
    }

    /// Cached conversations, newest first.
    pub async fn list_local(&self) -> StorageResult<Vec<ConversationRecord>> {
        self.cache.list().await
    }

    /// One cached conversation, if present.
    pub async fn load_local(&self, id: &str) -> StorageResult<Option<ConversationRecord>> {
        self.cache.load(id).await
    }

    /// Remove one conversation from the cache only. The server copy, and
    /// every other cached conversation, are untouched.
    pub async fn drop_local(&self, id: &str) -> StorageResult<()> {
        self.cache.delete(id).await
    }

    /// Conversation summaries straight from the server.
    pub async fn list_remote(&self) -> crate::client::Result<Vec<crate::api::ConversationSummary>> {
        self.remote.list_conversations().await
    }

    /// One conversation straight from the server.
    pub async fn fetch_remote(
        &self,
        id: &str,
    ) -> crate::client::Result<crate::api::GetConversationResponse> {
        self.remote.fetch_conversation(id).await
    }
}
