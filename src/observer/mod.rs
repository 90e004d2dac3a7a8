//! Status observer
//!
//! Follows one job: an immediate read, then every record pushed on the job store's change
//! feed. Each record is handed to the caller whole, and completion is signalled exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::job::state::{can_transition, is_terminal};
use crate::job::{Job, JobId, JobStatus};
use crate::store::{JobFeed, JobStore};
use crate::JobError;

/// Why a subscription stopped delivering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEnd {
    /// A terminal record was delivered
    Terminal(JobStatus),
    /// The store closed the change feed before the job finished
    FeedClosed,
    /// The caller cancelled
    Cancelled,
    /// The store has no change feed; only the initial snapshot was delivered
    Detached,
}

pub struct StatusObserver {
    store: Arc<dyn JobStore>,
}

impl StatusObserver {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Start following `id`.
    ///
    /// `on_update` receives the initial snapshot and every later record. `on_complete` runs
    /// once, on the first record whose status is `completed`. Fails without leaving a
    /// subscription behind when the job cannot be read.
    pub async fn observe<U, C>(
        &self,
        id: &JobId,
        on_update: U,
        on_complete: C,
    ) -> Result<Subscription, JobError>
    where
        U: FnMut(&Job) + Send + 'static,
        C: FnOnce(&Job) + Send + 'static,
    {
        // subscribe before reading so no change between the two is missed
        let feed = self.store.subscribe(id).await;
        let snapshot = self.store.fetch(id).await?;

        tracing::info!("Observing job {} ({})", id, snapshot.status);

        let cancelled = Arc::new(AtomicBool::new(false));
        let mut delivery = Delivery::new(on_update, on_complete, cancelled.clone());
        match delivery.deliver(&snapshot) {
            Flow::Stop(status) => return Ok(Subscription::ended(WatchEnd::Terminal(status))),
            Flow::Cancelled => return Ok(Subscription::ended(WatchEnd::Cancelled)),
            Flow::Continue => {}
        }

        match feed {
            Some(feed) => Ok(Subscription::spawn(id.clone(), feed, delivery, cancelled)),
            None => {
                tracing::info!("No change feed for job {}, showing a single snapshot", id);
                Ok(Subscription::ended(WatchEnd::Detached))
            }
        }
    }
}

enum Flow {
    Continue,
    Stop(JobStatus),
    Cancelled,
}

/// Hands records to the caller's callbacks
struct Delivery<U, C> {
    on_update: U,
    on_complete: Option<C>,
    last: Option<JobStatus>,
    cancelled: Arc<AtomicBool>,
}

impl<U, C> Delivery<U, C>
where
    U: FnMut(&Job),
    C: FnOnce(&Job),
{
    fn new(on_update: U, on_complete: C, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            on_update,
            on_complete: Some(on_complete),
            last: None,
            cancelled,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn deliver(&mut self, job: &Job) -> Flow {
        if let Some(last) = self.last {
            if last != job.status && !can_transition(last, job.status) {
                tracing::debug!(
                    "Ignoring stale record for job {}: {} after {}",
                    job.id,
                    job.status,
                    last
                );
                return Flow::Continue;
            }
        }

        if let Err(e) = job.check_invariants() {
            tracing::warn!("Inconsistent job record: {}", e);
        }

        tracing::debug!("Job {} is {}", job.id, job.status);
        if self.is_cancelled() {
            return Flow::Cancelled;
        }
        (self.on_update)(job);

        // cancel() may have returned while on_update ran
        if self.is_cancelled() {
            return Flow::Cancelled;
        }
        if job.status == JobStatus::Completed {
            if let Some(on_complete) = self.on_complete.take() {
                on_complete(job);
            }
        }

        self.last = Some(job.status);
        if is_terminal(job.status) {
            Flow::Stop(job.status)
        } else {
            Flow::Continue
        }
    }
}

/// Handle to a running observation.
///
/// Dropping the handle cancels it.
pub struct Subscription {
    cancelled: Arc<AtomicBool>,
    task: Option<JoinHandle<WatchEnd>>,
    ended: Option<WatchEnd>,
}

impl Subscription {
    fn ended(end: WatchEnd) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            task: None,
            ended: Some(end),
        }
    }

    fn spawn<U, C>(
        id: JobId,
        mut feed: JobFeed,
        mut delivery: Delivery<U, C>,
        cancelled: Arc<AtomicBool>,
    ) -> Self
    where
        U: FnMut(&Job) + Send + 'static,
        C: FnOnce(&Job) + Send + 'static,
    {
        let flag = cancelled.clone();

        let task = tokio::spawn(async move {
            while let Some(job) = feed.recv().await {
                if flag.load(Ordering::SeqCst) {
                    return WatchEnd::Cancelled;
                }
                if job.id != id {
                    continue;
                }
                match delivery.deliver(&job) {
                    Flow::Stop(status) => return WatchEnd::Terminal(status),
                    Flow::Cancelled => return WatchEnd::Cancelled,
                    Flow::Continue => {}
                }
            }
            tracing::warn!("Change feed for job {} closed before it finished", id);
            WatchEnd::FeedClosed
        });

        Self {
            cancelled,
            task: Some(task),
            ended: None,
        }
    }

    /// Stop delivering and release the change feed.
    ///
    /// Safe to call any number of times. A callback already running finishes; no new one
    /// starts afterwards.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// True while records may still be delivered
    pub fn is_active(&self) -> bool {
        !self.is_cancelled()
            && self
                .task
                .as_ref()
                .map(|task| !task.is_finished())
                .unwrap_or(false)
    }

    /// Wait until the subscription stops delivering
    pub async fn finished(mut self) -> WatchEnd {
        if let Some(end) = self.ended {
            return end;
        }
        // awaited in place so dropping this future still aborts the task
        let Some(task) = self.task.as_mut() else {
            return WatchEnd::Cancelled;
        };
        let result = task.await;
        self.task = None;

        match result {
            Ok(end) => end,
            Err(e) if e.is_cancelled() => WatchEnd::Cancelled,
            Err(e) => {
                tracing::error!("Observer task failed: {}", e);
                WatchEnd::FeedClosed
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
