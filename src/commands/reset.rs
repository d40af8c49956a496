//! Journey reset command implementation.

use anyhow::Result;

use super::chat::confirm;

pub async fn run(config_path: &str, server: Option<&str>, yes: bool) -> Result<()> {
    if !yes && !confirm("Reset the journey? Archived conversations are kept. [y/N]: ", false) {
        println!("Reset skipped.");
        return Ok(());
    }

    let app = super::build_app(config_path, server).await?;
    let message = app.reset_journey().await?;
    println!("{message}");
    Ok(())
}
