//! srtflow - submit media to an SRT generation service and track the job until subtitles are ready
//!
//! This library provides the job lifecycle core: the status state machine, the submission
//! orchestrator that talks to the transcription service, and the status observer that follows
//! a job through the job store's change feed.

pub mod cli;
pub mod config;
pub mod job;
pub mod observer;
pub mod output;
pub mod store;
pub mod submit;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use job::state::{StepState, TrackingState};
pub use job::{Job, JobId, JobStatus, Speaker};
pub use observer::{StatusObserver, Subscription, WatchEnd};
pub use store::{JobFeed, JobStore};
pub use submit::{Submission, SubmissionReceipt, Submitter, TranscriptionService};

/// Result type used by the binary and configuration layer
pub type Result<T> = anyhow::Result<T>;

/// Errors raised by the job lifecycle core
#[derive(thiserror::Error, Debug)]
pub enum JobError {
    /// Bad local input; never sent over the wire
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The service or job store could not be reached
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote side answered with an error status
    #[error("Request rejected (HTTP {status}): {message}")]
    RemoteRejection { status: u16, message: String },

    #[error("Job not found: {0}")]
    NotFound(String),
}

impl JobError {
    /// True for failures that came back from a submission attempt rather than local input
    pub fn is_submission_failure(&self) -> bool {
        matches!(self, JobError::Transport(_) | JobError::RemoteRejection { .. })
    }
}

impl From<reqwest::Error> for JobError {
    fn from(err: reqwest::Error) -> Self {
        JobError::Transport(err.to_string())
    }
}
