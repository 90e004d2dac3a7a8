use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::job::{Job, JobId};
use crate::JobError;

pub mod memory;
pub mod poll;
pub mod rest;

pub use memory::MemoryJobStore;
pub use poll::PollSchedule;
pub use rest::RestJobStore;

/// Stream of full job records for a single job, newest last
pub type JobFeed = mpsc::Receiver<Job>;

/// Buffer size of a change feed; a slow reader makes the producer drop updates
pub const FEED_CAPACITY: usize = 32;

/// Number of jobs listed by `recent` when the caller does not say
pub const DEFAULT_RECENT_LIMIT: usize = 5;

/// Persistent job storage with change notifications
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Read the current record of a job
    async fn fetch(&self, id: &JobId) -> Result<Job, JobError>;

    /// Record the principal that owns a job
    async fn set_owner(&self, id: &JobId, owner: &str) -> Result<(), JobError>;

    /// Newest jobs first
    async fn recent(&self, limit: usize) -> Result<Vec<Job>, JobError>;

    /// Open a change feed for one job.
    ///
    /// Returns `None` when this store cannot deliver change notifications.
    async fn subscribe(&self, id: &JobId) -> Option<JobFeed>;
}
