//! CLI command implementations.

use std::path::Path;

use anyhow::Result;

use gemchat::client::GemClient;
use gemchat::config::Config;
use gemchat::orchestrator::Orchestrator;
use gemchat::store::{ConversationBridge, FileConversationCache};

pub mod chat;
pub mod conversations;
pub mod gems;
pub mod reset;

mod render;

/// Orchestrator wired against the HTTP client on both seams.
pub type App = Orchestrator<GemClient, GemClient>;

/// Load the config and build the orchestrator for one command invocation.
pub async fn build_app(config_path: &str, server_override: Option<&str>) -> Result<App> {
    let config = Config::load(config_path).await?;
    let server_url = server_override.unwrap_or(&config.server_url);

    let client = GemClient::new(server_url);
    let cache = FileConversationCache::new(config.conversations_dir(Path::new(config_path)));
    let bridge = ConversationBridge::new(client.clone(), cache);

    Ok(Orchestrator::new(client, bridge, config.drive_options()))
}
