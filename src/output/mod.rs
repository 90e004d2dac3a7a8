use anyhow::Result;

use crate::cli::OutputFormat;
use crate::job::Job;

pub mod download;
pub mod formatters;

pub use download::download_subtitles;
pub use formatters::*;

/// Print a job's status board
pub fn print_status(job: &Job, format: &OutputFormat) -> Result<()> {
    let content = match format {
        OutputFormat::Text => format_status_as_text(job, chrono::Utc::now()),
        OutputFormat::Json => format_status_as_json(job)?,
    };

    println!("{}", content);
    Ok(())
}

/// Print a list of jobs
pub fn print_recent(jobs: &[Job], format: &OutputFormat) -> Result<()> {
    let content = match format {
        OutputFormat::Text => format_recent_as_text(jobs),
        OutputFormat::Json => format_recent_as_json(jobs)?,
    };

    println!("{}", content);
    Ok(())
}
