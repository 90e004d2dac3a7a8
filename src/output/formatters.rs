use anyhow::Result;
use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use std::fmt::Write;

use crate::job::state::{display_steps, step_state, StepState};
use crate::job::{Job, JobStatus};
use crate::utils::{format_elapsed, format_file_size};

/// Label and description shown for a display step
pub fn step_text(step: JobStatus) -> (&'static str, &'static str) {
    match step {
        JobStatus::Uploading => ("Upload file", "Sending the file to the server"),
        JobStatus::Processing => ("Preparing", "Getting the audio ready for processing"),
        JobStatus::ProcessingAudio => ("Transcribing", "AI is transcribing speech to text"),
        JobStatus::Completed => ("Done", "Subtitles are ready to download"),
        JobStatus::Error => ("Failed", "Please try again"),
    }
}

fn marker(state: StepState) -> String {
    match state {
        StepState::Done => style("✔").green().to_string(),
        StepState::Active => style("⟳").blue().to_string(),
        StepState::Pending => style("○").dim().to_string(),
        StepState::Failed => style("✖").red().to_string(),
    }
}

/// Step rendering of a job as plain data
#[derive(Debug, Serialize)]
pub struct StepView {
    pub step: JobStatus,
    pub label: &'static str,
    pub state: StepState,
}

#[derive(Debug, Serialize)]
pub struct StatusView<'a> {
    pub job: &'a Job,
    pub steps: Vec<StepView>,
    pub subtitle_filename: Option<String>,
}

pub fn status_view(job: &Job) -> StatusView<'_> {
    let steps = display_steps(job.status)
        .into_iter()
        .map(|step| StepView {
            step,
            label: step_text(step).0,
            state: step_state(step, job.status),
        })
        .collect();

    StatusView {
        job,
        steps,
        subtitle_filename: (job.status == JobStatus::Completed).then(|| job.subtitle_filename()),
    }
}

/// Format a job's status board as text
pub fn format_status_as_text(job: &Job, now: DateTime<Utc>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "{} {}", style("Job").bold(), job.id);

    let mut header = format!("File: {}", job.filename);
    if let Some(size) = job.file_size {
        let _ = write!(header, "   Size: {}", format_file_size(size));
    }
    if job.is_terminal() {
        let _ = write!(header, "   Elapsed: {}", format_elapsed(job.elapsed(now)));
    }
    let _ = writeln!(output, "{}", header);
    output.push('\n');

    for step in status_view(job).steps {
        let (label, description) = step_text(step.step);
        let label = match step.state {
            StepState::Pending => style(label).dim().to_string(),
            _ => style(label).bold().to_string(),
        };
        let _ = writeln!(output, "  {} {} - {}", marker(step.state), label, description);
    }

    if let (JobStatus::Error, Some(message)) = (job.status, &job.error_message) {
        let _ = writeln!(output, "\n{} {}", style("Error:").red().bold(), message);
    }

    if let (JobStatus::Completed, Some(url)) = (job.status, &job.result_ref) {
        let _ = writeln!(
            output,
            "\n{} {}\n  save as: {}",
            style("Subtitles ready:").green().bold(),
            url,
            job.subtitle_filename()
        );
    }

    if !job.program_name.is_empty() {
        let _ = writeln!(output, "\nProgram: {}", job.program_name);
    }

    output
}

/// Format a job's status board as JSON
pub fn format_status_as_json(job: &Job) -> Result<String> {
    Ok(serde_json::to_string_pretty(&status_view(job))?)
}

/// One line per job, newest first
pub fn format_recent_as_text(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "No jobs yet.".to_string();
    }

    let mut output = String::new();
    for job in jobs {
        let name = if job.program_name.is_empty() {
            &job.filename
        } else {
            &job.program_name
        };
        let _ = writeln!(
            output,
            "{}  {:<16}  {}  {}",
            job.created_at.format("%Y-%m-%d %H:%M"),
            job.status,
            job.id,
            name
        );
    }
    output
}

pub fn format_recent_as_json(jobs: &[Job]) -> Result<String> {
    Ok(serde_json::to_string_pretty(jobs)?)
}

/// One-line progress message for a spinner
pub fn progress_message(job: &Job) -> String {
    let (label, description) = step_text(job.status);
    format!("{}: {}", label, description)
}
