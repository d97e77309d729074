//! `tusk upload` – upload one file through the resumable path.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tusk_core::upload::{FilePayload, Payload, ProgressEvent, ProgressFn, Uploader};

const PROGRESS_INTERVAL_MS: u64 = 500;

fn format_progress(e: &ProgressEvent, elapsed_secs: f64) -> String {
    let done_mib = e.loaded as f64 / 1_048_576.0;
    let total_mib = e.total as f64 / 1_048_576.0;
    let pct = if e.total == 0 {
        100.0
    } else {
        e.loaded as f64 / e.total as f64 * 100.0
    };
    let rate_mib = if elapsed_secs > 0.0 {
        done_mib / elapsed_secs
    } else {
        0.0
    };
    format!(
        "  {:.1} / {:.1} MiB ({:.1}%)  {:.2} MiB/s",
        done_mib, total_mib, pct, rate_mib
    )
}

pub async fn run_upload(
    uploader: &Uploader,
    file: &Path,
    destination: &str,
    overwrite: bool,
    force: bool,
) -> Result<()> {
    let payload = FilePayload::open(file).with_context(|| format!("opening {}", file.display()))?;
    if !force && !uploader.use_transport(&payload).await {
        bail!(
            "{} would not take the resumable upload path; pass --force to upload anyway",
            file.display()
        );
    }
    let total = payload.len();

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
    let started = Instant::now();
    let progress_handle = tokio::spawn(async move {
        let mut last_print: Option<Instant> = None;
        while let Some(event) = progress_rx.recv().await {
            let now = Instant::now();
            let due = last_print
                .map(|t| now.duration_since(t).as_millis() as u64 >= PROGRESS_INTERVAL_MS)
                .unwrap_or(true);
            if due || event.loaded >= event.total {
                println!(
                    "{}",
                    format_progress(&event, now.duration_since(started).as_secs_f64())
                );
                last_print = Some(now);
            }
        }
    });
    let on_progress: ProgressFn = Arc::new(move |e| {
        let _ = progress_tx.send(e);
    });

    let res = uploader
        .upload(destination, Arc::new(payload), overwrite, Some(on_progress))
        .await;
    let _ = progress_handle.await;
    res?;

    println!(
        "Uploaded {} ({} bytes) to {} in {:.1}s",
        file.display(),
        total,
        destination,
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
