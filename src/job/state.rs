//! Job state machine
//!
//! Pure functions over [`JobStatus`]: ordering, terminality, the allowed lifecycle
//! transitions, and how each display step is rendered for a job's current status.

use serde::Serialize;

use super::{Job, JobId, JobStatus};
use crate::JobError;

/// How a single display step is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Active,
    Done,
    Failed,
}

/// Position of a status in the pipeline.
///
/// `Error` sits past `Completed` but is a side branch, not a further step.
pub fn ordinal(status: JobStatus) -> u8 {
    match status {
        JobStatus::Uploading => 0,
        JobStatus::Processing => 1,
        JobStatus::ProcessingAudio => 2,
        JobStatus::Completed => 3,
        JobStatus::Error => 4,
    }
}

pub fn is_terminal(status: JobStatus) -> bool {
    matches!(status, JobStatus::Completed | JobStatus::Error)
}

/// Whether a job may move from `from` to `to`.
///
/// Forward moves may skip steps (`processing -> completed`), `error` is reachable from
/// any non-terminal status, and nothing leaves a terminal status.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    if is_terminal(from) {
        return false;
    }
    to == JobStatus::Error || ordinal(to) > ordinal(from)
}

/// Render state of display `step` given the job's `current` status
pub fn step_state(step: JobStatus, current: JobStatus) -> StepState {
    if current == JobStatus::Error {
        // progress made before the failure stays visible
        return if step == JobStatus::Error {
            StepState::Failed
        } else {
            StepState::Done
        };
    }

    let (step_pos, current_pos) = (ordinal(step), ordinal(current));
    if current_pos > step_pos {
        StepState::Done
    } else if current_pos == step_pos {
        if current == JobStatus::Completed {
            StepState::Done
        } else {
            StepState::Active
        }
    } else {
        StepState::Pending
    }
}

/// Same as [`step_state`] for raw status strings as received from outside
pub fn step_state_str(step: &str, current: &str) -> Result<StepState, JobError> {
    Ok(step_state(step.parse()?, current.parse()?))
}

/// The steps shown for a job: the three pipeline stages, then the outcome
pub fn display_steps(current: JobStatus) -> [JobStatus; 4] {
    let outcome = if current == JobStatus::Error {
        JobStatus::Error
    } else {
        JobStatus::Completed
    };
    [
        JobStatus::Uploading,
        JobStatus::Processing,
        JobStatus::ProcessingAudio,
        outcome,
    ]
}

/// Where a client is in the submit-then-track flow
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TrackingState {
    #[default]
    NotStarted,
    Tracking(JobId),
    Finished(Job),
}

impl TrackingState {
    /// Start following a job; replaces whatever was tracked before
    pub fn track(self, id: JobId) -> Self {
        TrackingState::Tracking(id)
    }

    /// Record the terminal snapshot of the tracked job
    pub fn finish(self, job: Job) -> Result<Self, JobError> {
        match self {
            TrackingState::Tracking(ref id) if *id == job.id => {
                if !job.is_terminal() {
                    return Err(JobError::Validation(format!(
                        "job {} is still {}",
                        job.id, job.status
                    )));
                }
                Ok(TrackingState::Finished(job))
            }
            TrackingState::Tracking(id) => Err(JobError::Validation(format!(
                "tracking job {} but received job {}",
                id, job.id
            ))),
            TrackingState::NotStarted | TrackingState::Finished(_) => Err(JobError::Validation(
                "no job is being tracked".to_string(),
            )),
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            TrackingState::NotStarted => None,
            TrackingState::Tracking(id) => Some(id),
            TrackingState::Finished(job) => Some(&job.id),
        }
    }
}
