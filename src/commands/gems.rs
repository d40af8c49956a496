//! Journey listing command implementation.

use anyhow::Result;

use super::App;

pub async fn run(config_path: &str, server: Option<&str>) -> Result<()> {
    let app = super::build_app(config_path, server).await?;
    print_journey(&app).await
}

/// Print the persona sequence with completion markers and overall progress.
pub async fn print_journey(app: &App) -> Result<()> {
    let gems = app.list_gems().await?;
    let progress = app.progress().await?;

    println!("Journey:");
    for gem in &gems {
        let marker = if progress.is_completed(&gem.id) {
            "[x]"
        } else if progress.current() == Some(gem.id.as_str()) {
            " > "
        } else {
            "[ ]"
        };

        let emoji = gem.emoji.as_deref().unwrap_or("");
        match &gem.role {
            Some(role) => println!("  {marker} {emoji} {} ({}) - {role}", gem.name, gem.id),
            None => println!("  {marker} {emoji} {} ({})", gem.name, gem.id),
        }
    }

    let (done, total) = progress.fraction();
    println!();
    println!("{done}/{total} gems completed");
    if let Some(next) = progress.next_gem() {
        println!("Next up: {next}");
    }

    Ok(())
}
