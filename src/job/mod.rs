use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::sanitize_filename;
use crate::JobError;

pub mod state;

/// Opaque job identifier assigned by the job store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Parse an identifier, rejecting blank input
    pub fn parse(raw: &str) -> Result<Self, JobError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(JobError::Validation("job id must not be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Fresh random identifier, used by in-process stores
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Lifecycle status of a job
///
/// `Uploading` only exists on the client between calling submit and receiving a job id;
/// it is never a valid value for a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Uploading,
    Processing,
    ProcessingAudio,
    Completed,
    Error,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Uploading,
        JobStatus::Processing,
        JobStatus::ProcessingAudio,
        JobStatus::Completed,
        JobStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploading => "uploading",
            JobStatus::Processing => "processing",
            JobStatus::ProcessingAudio => "processing_audio",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| JobError::Validation(format!("unrecognized job status: {:?}", s)))
    }
}

/// A single transcription request as persisted by the job store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    /// Principal that owns the job; absent for anonymous submissions
    #[serde(rename = "user_id", default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    pub filename: String,

    #[serde(default)]
    pub program_name: String,

    pub status: JobStatus,

    /// Size of the original upload in bytes
    #[serde(default)]
    pub file_size: Option<u64>,

    /// Where the produced subtitle file can be downloaded
    #[serde(rename = "srt_url", default)]
    pub result_ref: Option<String>,

    #[serde(default)]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        state::is_terminal(self.status)
    }

    /// File name for the downloaded subtitles: `{program_name or filename}.srt`
    pub fn subtitle_filename(&self) -> String {
        let base = if self.program_name.trim().is_empty() {
            self.filename.as_str()
        } else {
            self.program_name.as_str()
        };
        let sanitized = sanitize_filename(base);
        if sanitized.is_empty() {
            format!("{}.srt", self.id)
        } else {
            format!("{}.srt", sanitized)
        }
    }

    /// Time spent in the pipeline, up to completion or up to `now` while still running
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        let end = self.completed_at.unwrap_or(now);
        (end - self.created_at).max(chrono::Duration::zero())
    }

    /// Check the record-level invariants of a stored job
    pub fn check_invariants(&self) -> Result<(), JobError> {
        let violation = |msg: &str| Err(JobError::Validation(format!("job {}: {}", self.id, msg)));

        match self.status {
            JobStatus::Uploading => violation("stored record cannot be in uploading state"),
            JobStatus::Processing | JobStatus::ProcessingAudio => {
                if self.result_ref.is_some() || self.error_message.is_some() {
                    violation("running job carries a result or error")
                } else if self.completed_at.is_some() {
                    violation("running job has completed_at set")
                } else {
                    Ok(())
                }
            }
            JobStatus::Completed => {
                if self.result_ref.is_none() || self.error_message.is_some() {
                    violation("completed job must carry a result and no error")
                } else if self.completed_at.is_none() {
                    violation("completed job is missing completed_at")
                } else {
                    Ok(())
                }
            }
            JobStatus::Error => {
                if self.error_message.is_none() || self.result_ref.is_some() {
                    violation("failed job must carry an error and no result")
                } else if self.completed_at.is_none() {
                    violation("failed job is missing completed_at")
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Speaker hint sent along with a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub comment: String,
}

impl Speaker {
    /// Speakers missing an id or a name are not forwarded to the service
    pub fn is_complete(&self) -> bool {
        !self.id.trim().is_empty() && !self.name.trim().is_empty()
    }
}

impl FromStr for Speaker {
    type Err = JobError;

    /// Parse `ID:NAME[:COMMENT]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let id = parts.next().unwrap_or_default().trim();
        let name = parts.next().unwrap_or_default().trim();
        let comment = parts.next().unwrap_or_default().trim();

        if id.is_empty() || name.is_empty() {
            return Err(JobError::Validation(format!(
                "speaker must be given as ID:NAME[:COMMENT], got {:?}",
                s
            )));
        }

        Ok(Speaker {
            id: id.to_string(),
            name: name.to_string(),
            comment: comment.to_string(),
        })
    }
}
