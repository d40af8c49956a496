//! Interactive chat command implementation.

use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use gemchat::orchestrator::{HistoryChoice, OrchestratorError, RestoredHistory, SendOptions, SendOutcome};
use gemchat::store::SyncStatus;

use super::render::{StreamPainter, print_final};
use super::{App, gems};

pub async fn run(config_path: &str, server: Option<&str>) -> Result<()> {
    let app = super::build_app(config_path, server).await?;

    // Push anything that missed the server last time before chatting.
    match app.reconcile().await {
        Ok(0) => {}
        Ok(n) => println!("Synced {n} conversation(s) saved while offline."),
        Err(e) => tracing::debug!(error = %e, "reconcile failed at startup"),
    }

    restore_saved_journey(&app).await?;

    // Ctrl+C cancels the in-flight answer instead of killing the process.
    let cancel = app.cancel_token();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    println!("Chat with your GEM journey.");
    println!("Commands: /gems /gem <id> /status /reset /sync /exit");
    println!("Ctrl+C cancels a streaming answer.");
    println!();

    let stdin = BufReader::new(tokio::io::stdin());
    let mut async_stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    loop {
        async_stdout.write_all(b"> ").await?;
        async_stdout.flush().await?;

        let Some(input) = lines.next_line().await? else {
            println!();
            break;
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/exit" | "/quit" => break,
            "/gems" | "/status" => {
                if let Err(e) = gems::print_journey(&app).await {
                    eprintln!("Error: {e}");
                }
            }
            "/reset" => reset_journey(&app).await,
            "/sync" => match app.reconcile().await {
                Ok(n) => println!("Synced {n} conversation(s)."),
                Err(e) => eprintln!("Error: {e}"),
            },
            _ if input.starts_with("/gem ") => {
                activate(&app, input.trim_start_matches("/gem ").trim()).await;
            }
            _ if input.starts_with('/') => {
                eprintln!("Unknown command: {input}");
            }
            message => send(&app, message).await,
        }
        println!();
    }

    Ok(())
}

/// Send one message and stream the answer to the terminal.
async fn send(app: &App, message: &str) {
    let mut painter = StreamPainter::new();
    println!();

    match app
        .send(message, SendOptions::default(), |view| painter.paint(view))
        .await
    {
        Ok(SendOutcome::Completed { sync, .. }) => {
            if sync == SyncStatus::LocalOnly {
                println!("(saved locally; will sync when the server is reachable)");
            }
        }
        Ok(SendOutcome::Cancelled) => {
            println!("\n[cancelled]");
        }
        Err(OrchestratorError::Busy) => {
            eprintln!("A message is already being processed; wait for it to finish.");
        }
        Err(e) => {
            eprintln!("Error: {e}");
        }
    }
}

/// Switch to another persona and replay its saved transcript.
async fn activate(app: &App, gem_id: &str) {
    match app.activate(gem_id).await {
        Ok((message, messages)) => {
            println!("{message}");
            println!();
            for view in &messages {
                print_final(view);
            }
        }
        Err(OrchestratorError::UnknownGem(id)) => {
            eprintln!("Unknown gem: {id}. Use /gems to see the journey.");
        }
        Err(e) => {
            eprintln!("Error: {e}");
        }
    }
}

async fn reset_journey(app: &App) {
    if !confirm("Reset the journey? Archived conversations are kept. [y/N]: ", false) {
        println!("Reset skipped.");
        return;
    }
    match app.reset_journey().await {
        Ok(message) => println!("{message}"),
        Err(e) => eprintln!("Error: {e}"),
    }
}

/// Offer the one-time continue-or-reset choice for a saved journey.
async fn restore_saved_journey(app: &App) -> Result<()> {
    let restored = app
        .restore_history(|turns| {
            println!("Found a saved journey with {} message(s).", turns.len());
            if confirm("Continue where you left off? [Y/n]: ", true) {
                HistoryChoice::Continue
            } else {
                HistoryChoice::Reset
            }
        })
        .await;

    match restored {
        Ok(RestoredHistory::Continued {
            current_gem,
            messages,
        }) => {
            if let Some(gem) = current_gem {
                println!("Continuing with {gem}.");
            }
            println!();
            for view in &messages {
                print_final(view);
            }
        }
        Ok(RestoredHistory::Fresh | RestoredHistory::AlreadyRestored) => {}
        // A dead server at startup is not fatal; the first send will say so.
        Err(e) => tracing::debug!(error = %e, "could not restore saved journey"),
    }

    Ok(())
}

/// Blocking yes/no prompt; `default_yes` decides what empty input means.
pub(super) fn confirm(prompt: &str, default_yes: bool) -> bool {
    print!("{prompt}");
    let _ = std::io::stdout().flush();

    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    match line.trim().to_lowercase().as_str() {
        "" => default_yes,
        "y" | "yes" => true,
        _ => false,
    }
}
