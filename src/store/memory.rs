//! In-process job store
//!
//! Holds jobs in a map and fans every change out to the open feeds of that job. It enforces
//! the lifecycle rules a real backend is expected to follow, which makes it the reference
//! collaborator for exercising the submitter and the observer.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{JobFeed, JobStore, FEED_CAPACITY};
use crate::job::state::{can_transition, is_terminal};
use crate::job::{Job, JobId, JobStatus};
use crate::JobError;

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    listeners: HashMap<JobId, Vec<mpsc::Sender<Job>>>,
}

/// Job store kept in memory
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    push_enabled: bool,
}

impl MemoryJobStore {
    /// Store with change notifications
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            push_enabled: true,
        }
    }

    /// Store that only answers reads; `subscribe` always returns `None`
    pub fn without_push() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            push_enabled: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new job in its initial `processing` state
    pub fn create(&self, filename: &str, program_name: &str, file_size: u64) -> Job {
        let job = Job {
            id: JobId::generate(),
            owner: None,
            filename: filename.to_string(),
            program_name: program_name.to_string(),
            status: JobStatus::Processing,
            file_size: Some(file_size),
            result_ref: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        };

        self.lock().jobs.insert(job.id.clone(), job.clone());
        tracing::debug!("Created job {} for {}", job.id, filename);
        job
    }

    /// Move a job to a later non-terminal status
    pub fn advance(&self, id: &JobId, status: JobStatus) -> Result<Job, JobError> {
        if is_terminal(status) {
            return Err(JobError::Validation(format!(
                "use complete or fail to move a job to {}",
                status
            )));
        }
        self.update(id, |job| {
            transition(job, status)?;
            Ok(())
        })
    }

    /// Finish a job with the location of its subtitle file
    pub fn complete(&self, id: &JobId, result_ref: &str) -> Result<Job, JobError> {
        self.update(id, |job| {
            transition(job, JobStatus::Completed)?;
            job.result_ref = Some(result_ref.to_string());
            job.completed_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Finish a job with a diagnostic
    pub fn fail(&self, id: &JobId, message: &str) -> Result<Job, JobError> {
        self.update(id, |job| {
            transition(job, JobStatus::Error)?;
            job.error_message = Some(message.to_string());
            job.completed_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Number of feeds currently open for a job
    pub fn listener_count(&self, id: &JobId) -> usize {
        let mut inner = self.lock();
        match inner.listeners.get_mut(id) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    fn update<F>(&self, id: &JobId, apply: F) -> Result<Job, JobError>
    where
        F: FnOnce(&mut Job) -> Result<(), JobError>,
    {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        let mut next = job.clone();
        apply(&mut next)?;
        *job = next.clone();

        notify(&mut inner, &next);
        Ok(next)
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn transition(job: &mut Job, to: JobStatus) -> Result<(), JobError> {
    if !can_transition(job.status, to) {
        return Err(JobError::Validation(format!(
            "job {} cannot move from {} to {}",
            job.id, job.status, to
        )));
    }
    job.status = to;
    Ok(())
}

fn notify(inner: &mut Inner, job: &Job) {
    let Some(senders) = inner.listeners.get_mut(&job.id) else {
        return;
    };

    senders.retain(|tx| match tx.try_send(job.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!("Change feed for job {} is full, dropping update", job.id);
            true
        }
        Err(TrySendError::Closed(_)) => false,
    });
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn fetch(&self, id: &JobId) -> Result<Job, JobError> {
        self.lock()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    async fn set_owner(&self, id: &JobId, owner: &str) -> Result<(), JobError> {
        self.update(id, |job| {
            if job.is_terminal() {
                return Err(JobError::Validation(format!(
                    "job {} is {} and can no longer change owner",
                    job.id, job.status
                )));
            }
            if let Some(current) = job.owner.as_deref() {
                if current != owner {
                    return Err(JobError::Validation(format!(
                        "job {} already belongs to another user",
                        job.id
                    )));
                }
            }
            job.owner = Some(owner.to_string());
            Ok(())
        })
        .map(|_| ())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Job>, JobError> {
        let mut jobs: Vec<Job> = self.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn subscribe(&self, id: &JobId) -> Option<JobFeed> {
        if !self.push_enabled {
            return None;
        }
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        self.lock().listeners.entry(id.clone()).or_default().push(tx);
        Some(rx)
    }
}
