use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::{JobFeed, JobStore, FEED_CAPACITY};
use crate::job::{Job, JobId};

/// Back-off used when a store emulates push by re-reading a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub initial: Duration,
    pub step: Duration,
    pub max: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            step: Duration::from_secs(2),
            max: Duration::from_secs(30),
        }
    }
}

impl PollSchedule {
    /// Wait before check number `check` (1-based), growing linearly up to `max`
    pub fn delay(&self, check: u32) -> Duration {
        let grown = self.initial + self.step * check.saturating_sub(1);
        grown.min(self.max)
    }
}

/// Open a feed that re-reads `id` from `store` and forwards each changed record.
///
/// The task ends after forwarding a terminal record, when the receiver is dropped, or on
/// the first failed read.
pub fn spawn_poll_feed(store: Arc<dyn JobStore>, id: JobId, schedule: PollSchedule) -> JobFeed {
    let (tx, rx) = mpsc::channel(FEED_CAPACITY);

    tokio::spawn(async move {
        let mut last: Option<Job> = None;
        let mut check_count = 0u32;

        loop {
            check_count += 1;
            tokio::select! {
                _ = tx.closed() => break,
                _ = sleep(schedule.delay(check_count)) => {}
            }

            let job = match store.fetch(&id).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!("Polling job {} failed: {}", id, e);
                    break;
                }
            };

            tracing::debug!("Poll #{} for job {}: {}", check_count, id, job.status);

            if last.as_ref() == Some(&job) {
                continue;
            }

            let terminal = job.is_terminal();
            if tx.send(job.clone()).await.is_err() {
                break;
            }
            if terminal {
                break;
            }
            last = Some(job);
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::store::MemoryJobStore;

    fn fast() -> PollSchedule {
        PollSchedule {
            initial: Duration::from_millis(5),
            step: Duration::from_millis(1),
            max: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_default_schedule_grows_and_caps() {
        let schedule = PollSchedule::default();
        assert_eq!(schedule.delay(1), Duration::from_secs(5));
        assert_eq!(schedule.delay(2), Duration::from_secs(7));
        assert_eq!(schedule.delay(13), Duration::from_secs(29));
        assert_eq!(schedule.delay(14), Duration::from_secs(30));
        assert_eq!(schedule.delay(500), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_poll_feed_forwards_changes_until_terminal() {
        let store = Arc::new(MemoryJobStore::without_push());
        let job = store.create("a.mp3", "A", 100);

        let mut feed = spawn_poll_feed(store.clone(), job.id.clone(), fast());

        let first = feed.recv().await.unwrap();
        assert_eq!(first.status, JobStatus::Processing);

        store.complete(&job.id, "https://cdn.example.com/a.srt").unwrap();

        let mut last = None;
        while let Some(update) = feed.recv().await {
            last = Some(update);
        }
        let last = last.unwrap();
        assert_eq!(last.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_poll_feed_ends_on_missing_job() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::without_push());
        let mut feed = spawn_poll_feed(store, JobId::parse("gone").unwrap(), fast());
        assert!(feed.recv().await.is_none());
    }
}
