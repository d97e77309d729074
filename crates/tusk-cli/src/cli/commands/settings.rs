//! `tusk settings` – print the server's upload settings.

use anyhow::{Context, Result};
use tusk_core::upload::Uploader;

pub async fn run_settings(uploader: &Uploader) -> Result<()> {
    let settings = uploader
        .settings()
        .await
        .context("fetching upload settings")?;
    println!("{:<12} {}", "endpoint", uploader.options().endpoint);
    println!("{:<12} {}", "enabled", settings.enabled);
    println!("{:<12} {}", "chunk size", settings.chunk_size);
    println!("{:<12} {}", "parallel", uploader.options().parallel_uploads);
    Ok(())
}
