//! Conversation management command implementations.

use anyhow::Result;

use gemchat::api::{Role, Turn};
use gemchat::render::format_spans;
use gemchat::store::{DeleteOutcome, RenameOutcome};

use super::render::spans_to_ansi;

pub async fn list(config_path: &str, server: Option<&str>) -> Result<()> {
    let app = super::build_app(config_path, server).await?;
    let store = app.conversations();

    let local = store.list_local().await?;
    if !local.is_empty() {
        for record in &local {
            let title = record.title.as_deref().unwrap_or("(untitled)");
            let pending = if record.pending() { " *" } else { "" };
            println!(
                "{}  {}  {}{pending}",
                record.id,
                record.updated_at.format("%Y-%m-%d %H:%M"),
                title,
            );
        }
        if local.iter().any(|r| r.pending()) {
            println!();
            println!("* has turns not yet on the server (run `gemchat conversations sync`)");
        }
        return Ok(());
    }

    // Nothing cached; fall back to the server listing.
    let remote = store.list_remote().await?;
    if remote.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }
    for summary in &remote {
        match summary.updated_at {
            Some(ts) => println!("{}  {}  {}", summary.id, ts.format("%Y-%m-%d %H:%M"), summary.title),
            None => println!("{}  {}", summary.id, summary.title),
        }
    }
    Ok(())
}

pub async fn show(config_path: &str, server: Option<&str>, id: &str) -> Result<()> {
    let app = super::build_app(config_path, server).await?;
    let store = app.conversations();

    let (title, turns) = match store.load_local(id).await? {
        Some(record) => (record.title, record.turns),
        None => {
            let remote = store.fetch_remote(id).await?;
            (Some(remote.title), remote.messages)
        }
    };

    if let Some(title) = title {
        println!("{title}");
        println!();
    }
    for turn in &turns {
        print_turn(turn);
    }
    Ok(())
}

pub async fn rename(config_path: &str, server: Option<&str>, id: &str, title: &str) -> Result<()> {
    let app = super::build_app(config_path, server).await?;

    match app.conversations().rename(id, title).await? {
        RenameOutcome::Renamed => println!("Renamed {id}."),
        RenameOutcome::LocalOnly { reason } => {
            println!("Renamed {id} locally; the server kept the old title ({reason}).");
        }
    }
    Ok(())
}

pub async fn delete(config_path: &str, server: Option<&str>, id: &str) -> Result<()> {
    let app = super::build_app(config_path, server).await?;

    match app.conversations().delete(id).await? {
        DeleteOutcome::Deleted => println!("Deleted {id}."),
        DeleteOutcome::LocalOnly { reason } => {
            println!("Deleted the local copy of {id}; the server still has it ({reason}).");
        }
    }
    Ok(())
}

pub async fn sync(config_path: &str, server: Option<&str>) -> Result<()> {
    let app = super::build_app(config_path, server).await?;
    let count = app.reconcile().await?;
    println!("Synced {count} conversation(s).");
    Ok(())
}

fn print_turn(turn: &Turn) {
    match turn.role {
        Role::User => println!("\x1b[2m> {}\x1b[0m", turn.content),
        Role::Assistant => println!("{}", spans_to_ansi(&format_spans(&turn.content))),
    }
    println!();
}
