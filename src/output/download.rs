use anyhow::{Context, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::job::{Job, JobStatus};

/// Where the subtitles of `job` end up inside `dir`
pub fn subtitle_path(job: &Job, dir: &Path) -> PathBuf {
    dir.join(job.subtitle_filename())
}

/// Download the subtitle file of a completed job into `dir`
pub async fn download_subtitles(job: &Job, dir: &Path, show_progress: bool) -> Result<PathBuf> {
    if job.status != JobStatus::Completed {
        anyhow::bail!("Job {} is {}, subtitles are not available", job.id, job.status);
    }
    let url = job
        .result_ref
        .as_deref()
        .with_context(|| format!("Job {} has no subtitle location", job.id))?;

    let path = subtitle_path(job, dir);
    tracing::info!("Downloading subtitles to: {}", path.display());

    let response = reqwest::get(url)
        .await
        .context("Failed to download subtitles")?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to download subtitles: HTTP {}", response.status());
    }

    let progress = if show_progress {
        let bar = ProgressBar::new(response.content_length().unwrap_or(0));
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")?,
        );
        bar.set_message("Downloading subtitles...");
        bar
    } else {
        ProgressBar::hidden()
    };

    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)?;
    }
    let mut file = fs_err::File::create(&path)?;
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Subtitle download interrupted")?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        progress.set_position(downloaded);
    }

    progress.finish_with_message("Download complete");
    Ok(path)
}
