//! Wire types shared with the GEM service.
//!
//! Request and response bodies for the HTTP endpoints. The streaming frame
//! format itself lives in [`crate::frame`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gems::GemDescriptor;

// ============================================================================
// Turns
// ============================================================================

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a conversation, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Body for `POST /api/chat/stream`.
#[derive(Debug, Serialize)]
pub struct ChatStreamRequest {
    pub message: String,
}

// ============================================================================
// History
// ============================================================================

/// Response from `GET /api/history`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryResponse {
    /// Turn history per persona, for personas that have one saved.
    #[serde(default)]
    pub conversations: HashMap<String, Vec<Turn>>,
    /// Currently active persona, if any.
    #[serde(default)]
    pub current_gem: Option<String>,
    /// Turn history of the active persona.
    #[serde(default)]
    pub active_history: Vec<Turn>,
    /// Personas completed so far, in journey order.
    #[serde(default)]
    pub completed_gems: Vec<String>,
}

// ============================================================================
// Gems
// ============================================================================

/// Response from `GET /api/gems`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GemsResponse {
    #[serde(default)]
    pub gems: Vec<GemDescriptor>,
    #[serde(default)]
    pub current_gem: Option<String>,
}

/// Response from `POST /api/gems/{id}/activate`.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivateResponse {
    pub message: String,
}

/// Response from `POST /api/reset`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResetResponse {
    pub message: String,
}

// ============================================================================
// Conversations
// ============================================================================

/// One conversation summary from `GET /api/conversations`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Response from `GET /api/conversations`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListConversationsResponse {
    #[serde(default)]
    pub conversations: Vec<ConversationSummary>,
}

/// Response from `GET /api/conversations/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GetConversationResponse {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Turn>,
}

/// Body for `POST /api/conversations/{id}/messages`.
#[derive(Debug, Serialize)]
pub struct SaveMessageRequest {
    pub role: Role,
    pub content: String,
}

/// Body for `PUT /api/conversations/{id}`.
#[derive(Debug, Serialize)]
pub struct RenameConversationRequest {
    pub title: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Error body the service attaches to non-success responses.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}
