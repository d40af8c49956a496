//! Conversation persistence.
//!
//! Conversations live on the server; a local file cache keeps a copy so past
//! journeys stay readable offline and survive server hiccups. The
//! [`bridge::ConversationBridge`] coordinates the two, tracking which turns
//! have reached the remote side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{Role, Turn};

pub mod bridge;
pub mod error;
pub mod local;

pub use bridge::{ConversationBridge, DeleteOutcome, RenameOutcome, SyncStatus};
pub use error::{StorageError, StorageResult};
pub use local::FileConversationCache;

/// Maximum length of a derived conversation title, in characters.
const TITLE_MAX_CHARS: usize = 50;

/// A stored conversation: an ordered transcript plus sync bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    /// Derived from the first user turn and never recomputed afterwards.
    pub title: Option<String>,
    pub turns: Vec<Turn>,
    pub updated_at: DateTime<Utc>,
    /// Number of leading turns known to exist on the server.
    #[serde(default)]
    pub synced_turns: usize,
}

impl ConversationRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            turns: Vec::new(),
            updated_at: Utc::now(),
            synced_turns: 0,
        }
    }

    /// Append a turn, bumping the timestamp and deriving the title from the
    /// first user turn if none exists yet.
    pub fn push_turn(&mut self, turn: Turn) {
        if self.title.is_none() && turn.role == Role::User {
            self.title = Some(derive_title(&turn.content));
        }
        self.turns.push(turn);
        self.updated_at = Utc::now();
    }

    /// Turns not yet acknowledged by the server.
    pub fn unsynced(&self) -> &[Turn] {
        &self.turns[self.synced_turns.min(self.turns.len())..]
    }

    /// Whether any turns are still waiting to reach the server.
    pub fn pending(&self) -> bool {
        self.synced_turns < self.turns.len()
    }

    /// Mark every current turn as present on the server.
    pub fn mark_synced(&mut self) {
        self.synced_turns = self.turns.len();
    }
}

/// Truncate a prompt into a display title.
fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_derived_from_first_user_turn_only() {
        let mut record = ConversationRecord::new("conv1");
        record.push_turn(Turn::new(Role::User, "What is photosynthesis?"));
        record.push_turn(Turn::new(Role::Assistant, "A process plants use."));
        record.push_turn(Turn::new(Role::User, "Tell me more"));

        assert_eq!(record.title.as_deref(), Some("What is photosynthesis?"));
    }

    #[test]
    fn title_not_derived_from_assistant_turn() {
        let mut record = ConversationRecord::new("conv1");
        record.push_turn(Turn::new(Role::Assistant, "Welcome!"));
        assert!(record.title.is_none());

        record.push_turn(Turn::new(Role::User, "Hi"));
        assert_eq!(record.title.as_deref(), Some("Hi"));
    }

    #[test]
    fn long_title_truncated_on_char_boundary() {
        let mut record = ConversationRecord::new("conv1");
        let prompt = "é".repeat(80);
        record.push_turn(Turn::new(Role::User, prompt));

        let title = record.title.unwrap();
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
    }

    #[test]
    fn pending_tracks_synced_prefix() {
        let mut record = ConversationRecord::new("conv1");
        assert!(!record.pending());

        record.push_turn(Turn::new(Role::User, "Hello"));
        record.push_turn(Turn::new(Role::Assistant, "Hi there"));
        assert!(record.pending());
        assert_eq!(record.unsynced().len(), 2);

        record.mark_synced();
        assert!(!record.pending());
        assert!(record.unsynced().is_empty());
    }
}
