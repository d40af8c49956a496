mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Types
// ============================================================================

/// Gemchat - terminal client for the GEM guided-journey chat service
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an interactive chat with the active GEM
    Chat {
        /// Path to configuration file
        #[arg(short, long, default_value = gemchat::config::DEFAULT_CONFIG_FILE)]
        config: String,

        /// Server URL (overrides config file)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// List the journey personas and progress
    Gems {
        /// Path to configuration file
        #[arg(short, long, default_value = gemchat::config::DEFAULT_CONFIG_FILE)]
        config: String,

        /// Server URL (overrides config file)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Reset the journey, keeping archived conversations
    Reset {
        /// Path to configuration file
        #[arg(short, long, default_value = gemchat::config::DEFAULT_CONFIG_FILE)]
        config: String,

        /// Server URL (overrides config file)
        #[arg(short, long)]
        server: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage stored conversations
    Conversations {
        #[command(subcommand)]
        action: ConversationsAction,

        /// Path to configuration file
        #[arg(short, long, default_value = gemchat::config::DEFAULT_CONFIG_FILE, global = true)]
        config: String,

        /// Server URL (overrides config file)
        #[arg(short, long, global = true)]
        server: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConversationsAction {
    /// List cached conversations
    List,
    /// Print one conversation's transcript
    Show {
        /// Conversation ID
        id: String,
    },
    /// Rename a conversation
    Rename {
        /// Conversation ID
        id: String,
        /// New title
        title: String,
    },
    /// Delete a conversation
    Delete {
        /// Conversation ID
        id: String,
    },
    /// Push pending local turns to the server
    Sync,
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat { config, server } => commands::chat::run(&config, server.as_deref()).await,
        Commands::Gems { config, server } => commands::gems::run(&config, server.as_deref()).await,
        Commands::Reset {
            config,
            server,
            yes,
        } => commands::reset::run(&config, server.as_deref(), yes).await,
        Commands::Conversations {
            action,
            config,
            server,
        } => {
            let server = server.as_deref();
            match action {
                ConversationsAction::List => commands::conversations::list(&config, server).await,
                ConversationsAction::Show { id } => {
                    commands::conversations::show(&config, server, &id).await
                }
                ConversationsAction::Rename { id, title } => {
                    commands::conversations::rename(&config, server, &id, &title).await
                }
                ConversationsAction::Delete { id } => {
                    commands::conversations::delete(&config, server, &id).await
                }
                ConversationsAction::Sync => commands::conversations::sync(&config, server).await,
            }
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
