//! HTTP client for the GEM service.
//!
//! Provides [`GemClient`] plus the [`ChatBackend`] and
//! [`RemoteConversations`] seams the orchestrator and store bridge are
//! written against, so both can be exercised without a live server.

mod error;

pub use error::{ClientError, Result};

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::Client;

use crate::api::{
    ActivateResponse, ChatStreamRequest, ConversationSummary, ErrorBody, GetConversationResponse,
    GemsResponse, HistoryResponse, ListConversationsResponse, RenameConversationRequest,
    ResetResponse, SaveMessageRequest, Turn,
};
use crate::frame::{Frame, FrameStream};

/// Decoded frames from one streaming exchange.
pub type ChatFrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

// ============================================================================
// Seams
// ============================================================================

/// Chat-facing surface of the service, as seen by the orchestrator.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open the streaming exchange for one message.
    async fn stream_chat(&self, message: &str) -> Result<ChatFrameStream>;

    /// Fetch the persisted journey state.
    async fn history(&self) -> Result<HistoryResponse>;

    /// List personas in journey order.
    async fn list_gems(&self) -> Result<GemsResponse>;

    /// Switch the active persona.
    async fn activate_gem(&self, gem_id: &str) -> Result<ActivateResponse>;

    /// Clear the active journey state server-side.
    async fn reset(&self) -> Result<ResetResponse>;
}

/// Remote side of the conversation store.
#[async_trait]
pub trait RemoteConversations: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;

    async fn fetch_conversation(&self, id: &str) -> Result<GetConversationResponse>;

    /// Append turns to a conversation, in order.
    async fn append_turns(&self, id: &str, turns: &[Turn]) -> Result<()>;

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<()>;

    async fn delete_conversation(&self, id: &str) -> Result<()>;
}

// ============================================================================
// Client
// ============================================================================

/// HTTP client for the GEM service.
#[derive(Debug, Clone)]
pub struct GemClient {
    base_url: String,
    http: Client,
}

impl GemClient {
    /// Create a new client pointing to the given base URL.
    ///
    /// Example: `GemClient::new("http://localhost:8000")`
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------------

    /// Send a message and stream the response frames.
    pub async fn stream_chat(&self, message: &str) -> Result<ChatFrameStream> {
        let url = format!("{}/api/chat/stream", self.base_url);
        let body = ChatStreamRequest {
            message: message.to_string(),
        };

        let response = self.http.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(self.parse_error(response).await);
        }

        let bytes = response.bytes_stream().boxed();
        let frames = FrameStream::new(bytes).map_err(ClientError::Http);
        Ok(Box::pin(frames))
    }

    // ------------------------------------------------------------------------
    // Journey
    // ------------------------------------------------------------------------

    /// Fetch persisted journey state.
    pub async fn history(&self) -> Result<HistoryResponse> {
        let url = format!("{}/api/history", self.base_url);
        let response = self.http.get(&url).send().await?;
        self.json_response(response).await
    }

    /// List personas in journey order together with the current one.
    pub async fn list_gems(&self) -> Result<GemsResponse> {
        let url = format!("{}/api/gems", self.base_url);
        let response = self.http.get(&url).send().await?;
        self.json_response(response).await
    }

    /// Activate a persona.
    pub async fn activate_gem(&self, gem_id: &str) -> Result<ActivateResponse> {
        let url = format!("{}/api/gems/{}/activate", self.base_url, gem_id);
        let response = self.http.post(&url).send().await?;
        self.json_response(response).await
    }

    /// Clear active journey state server-side.
    pub async fn reset(&self) -> Result<ResetResponse> {
        let url = format!("{}/api/reset", self.base_url);
        let response = self.http.post(&url).send().await?;
        self.json_response(response).await
    }

    // ------------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------------

    /// List stored conversations.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let url = format!("{}/api/conversations", self.base_url);
        let response = self.http.get(&url).send().await?;
        let body: ListConversationsResponse = self.json_response(response).await?;
        Ok(body.conversations)
    }

    /// Fetch one conversation with its messages.
    pub async fn fetch_conversation(&self, id: &str) -> Result<GetConversationResponse> {
        let url = format!("{}/api/conversations/{}", self.base_url, id);
        let response = self.http.get(&url).send().await?;
        self.json_response(response).await
    }

    /// Append one turn to a conversation.
    pub async fn save_message(&self, id: &str, turn: &Turn) -> Result<()> {
        let url = format!("{}/api/conversations/{}/messages", self.base_url, id);
        let body = SaveMessageRequest {
            role: turn.role,
            content: turn.content.clone(),
        };

        let response = self.http.post(&url).json(&body).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.parse_error(response).await)
        }
    }

    /// Rename a conversation.
    pub async fn rename_conversation(&self, id: &str, title: &str) -> Result<()> {
        let url = format!("{}/api/conversations/{}", self.base_url, id);
        let body = RenameConversationRequest {
            title: title.to_string(),
        };

        let response = self.http.put(&url).json(&body).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.parse_error(response).await)
        }
    }

    /// Delete a conversation.
    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        let url = format!("{}/api/conversations/{}", self.base_url, id);
        let response = self.http.delete(&url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.parse_error(response).await)
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Parse an error response into a `ClientError`.
    async fn parse_error(&self, response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();

        if let Ok(body) = response.json::<ErrorBody>().await
            && let Some(message) = body.error
        {
            ClientError::Api { status, message }
        } else {
            ClientError::Api {
                status,
                message: format!("HTTP {status}"),
            }
        }
    }

    /// Parse a successful JSON response or convert the error response.
    async fn json_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(self.parse_error(response).await)
        }
    }
}

#[async_trait]
impl ChatBackend for GemClient {
    async fn stream_chat(&self, message: &str) -> Result<ChatFrameStream> {
        GemClient::stream_chat(self, message).await
    }

    async fn history(&self) -> Result<HistoryResponse> {
        GemClient::history(self).await
    }

    async fn list_gems(&self) -> Result<GemsResponse> {
        GemClient::list_gems(self).await
    }

    async fn activate_gem(&self, gem_id: &str) -> Result<ActivateResponse> {
        GemClient::activate_gem(self, gem_id).await
    }

    async fn reset(&self) -> Result<ResetResponse> {
        GemClient::reset(self).await
    }
}

#[async_trait]
impl RemoteConversations for GemClient {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        GemClient::list_conversations(self).await
    }

    async fn fetch_conversation(&self, id: &str) -> Result<GetConversationResponse> {
        GemClient::fetch_conversation(self, id).await
    }

    async fn append_turns(&self, id: &str, turns: &[Turn]) -> Result<()> {
        for turn in turns {
            self.save_message(id, turn).await?;
        }
        Ok(())
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<()> {
        GemClient::rename_conversation(self, id, title).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        GemClient::delete_conversation(self, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_new_trims_trailing_slash() {
        let client = GemClient::new("http://localhost:8000/");
        assert_eq!(client.base_url, "http://localhost:8000");
    }

    #[test]
    fn client_new_preserves_url_without_slash() {
        let client = GemClient::new("http://localhost:8000");
        assert_eq!(client.base_url, "http://localhost:8000");
    }
}
