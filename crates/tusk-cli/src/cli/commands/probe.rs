//! `tusk probe` – would this file take the resumable path?

use anyhow::{Context, Result};
use std::path::Path;
use tusk_core::upload::{FilePayload, Payload, Uploader};

pub async fn run_probe(uploader: &Uploader, file: &Path) -> Result<()> {
    let payload = FilePayload::open(file).with_context(|| format!("opening {}", file.display()))?;
    let resumable = uploader.use_transport(&payload).await;
    println!(
        "{}: {} bytes, {}, resumable upload: {}",
        file.display(),
        payload.len(),
        payload.content_type(),
        if resumable { "yes" } else { "no" }
    );
    Ok(())
}
