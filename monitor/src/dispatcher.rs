//! The REST dispatcher: a timestamped priority queue of deferred API calls
//! with bounded retry.
//!
//! Jobs live in timestamp buckets processed in ascending order. A failing job
//! is retried immediately (head of its bucket) until its ninth attempt, which
//! is scheduled once at the tail of the bucket; the tenth failure drops it.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use holograph_types::Tag;
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};

use crate::api::{ApiClient, ApiRequest};

/// Hard cap on delivery attempts per job.
pub const MAX_ATTEMPTS: u32 = 10;

/// At this attempt count a failing job is re-inserted at the tail of its
/// bucket, leaving exactly one final attempt behind everything already
/// queued at that timestamp.
pub const FINAL_ATTEMPT: u32 = 9;

/// Cooldown after a failed attempt before the scheduler runs again.
pub const RETRY_COOLDOWN: Duration = Duration::from_secs(1);

/// A deferred downstream side effect.
#[derive(Clone, Debug)]
pub struct DbJob {
    pub attempts: u32,
    pub timestamp_sec: i64,
    pub chain: String,
    pub request: ApiRequest,
    pub tags: Vec<Tag>,
}

impl DbJob {
    pub fn new(chain: &str, request: ApiRequest, tags: Vec<Tag>) -> Self {
        let timestamp_sec = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Self {
            attempts: 0,
            timestamp_sec,
            chain: chain.into(),
            request,
            tags,
        }
    }
}

/// What happened to the job the scheduler just ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    Requeued,
    Dropped,
}

/// The timestamp-bucketed scheduler. Pure data structure plus one async step;
/// the surrounding task owns pacing.
#[derive(Debug, Default)]
pub struct RestScheduler {
    buckets: BTreeMap<i64, VecDeque<DbJob>>,
}

impl RestScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job: DbJob) {
        self.buckets
            .entry(job.timestamp_sec)
            .or_default()
            .push_back(job);
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }

    fn pop_earliest(&mut self) -> Option<(i64, DbJob)> {
        loop {
            let ts = *self.buckets.keys().next()?;
            let bucket = self.buckets.get_mut(&ts)?;
            match bucket.pop_front() {
                Some(job) => {
                    if bucket.is_empty() {
                        self.buckets.remove(&ts);
                    }
                    return Some((ts, job));
                },
                None => {
                    self.buckets.remove(&ts);
                },
            }
        }
    }

    /// Run the earliest queued job once against the API.
    pub async fn process_next(&mut self, api: &dyn ApiClient) -> Option<Outcome> {
        let (ts, mut job) = self.pop_earliest()?;
        match api.execute(&job.request).await {
            Ok(()) => {
                tracing::debug!(chain = %job.chain, tags = ?job.tags, "api job delivered");
                Some(Outcome::Delivered)
            },
            Err(err) => {
                job.attempts += 1;
                if job.attempts >= MAX_ATTEMPTS {
                    tracing::error!(
                        chain = %job.chain,
                        attempts = job.attempts,
                        tags = ?job.tags,
                        "api job exhausted its attempts, dropping: {err:#}"
                    );
                    Some(Outcome::Dropped)
                } else if job.attempts >= FINAL_ATTEMPT {
                    tracing::warn!(
                        chain = %job.chain,
                        attempts = job.attempts,
                        "api job scheduled for one final attempt: {err:#}"
                    );
                    self.buckets.entry(ts).or_default().push_back(job);
                    Some(Outcome::Requeued)
                } else {
                    tracing::warn!(
                        chain = %job.chain,
                        attempts = job.attempts,
                        "api job failed, retrying: {err:#}"
                    );
                    self.buckets.entry(ts).or_default().push_front(job);
                    Some(Outcome::Requeued)
                }
            },
        }
    }
}

/// Cloneable producer handle for the dispatcher task.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<DbJob>,
}

impl DispatcherHandle {
    pub async fn enqueue(&self, job: DbJob) {
        if self.tx.send(job).await.is_err() {
            tracing::warn!("dispatcher is gone, dropping api job");
        }
    }
}

/// Spawn the dispatcher as the single owner of the scheduler. Exits once
/// every producer handle is dropped and the queue has drained.
pub fn spawn(api: Arc<dyn ApiClient>) -> (DispatcherHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<DbJob>(1024);
    let task = tokio::spawn(async move {
        let mut scheduler = RestScheduler::new();
        loop {
            // Pull everything that has arrived, without blocking.
            while let Ok(job) = rx.try_recv() {
                scheduler.insert(job);
            }
            match scheduler.process_next(&*api).await {
                // Fair scheduling: a delivered job immediately yields to the
                // next one.
                Some(Outcome::Delivered) | Some(Outcome::Dropped) => {},
                Some(Outcome::Requeued) => sleep(RETRY_COOLDOWN).await,
                None => match rx.recv().await {
                    Some(job) => scheduler.insert(job),
                    None => break,
                },
            }
        }
        tracing::info!("dispatcher drained, exiting");
    });
    (DispatcherHandle { tx }, task)
}

#[cfg(test)]
mod test {
    use alloy::primitives::B256;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        api::JobStatus,
        error::DispatchError,
    };

    /// Fails requests whose status is `Failed`, delivers the rest, and
    /// records delivery order by job hash.
    #[derive(Default)]
    struct ScriptedApi {
        delivered: Mutex<Vec<B256>>,
    }

    #[async_trait]
    impl ApiClient for ScriptedApi {
        async fn execute(&self, request: &ApiRequest) -> Result<(), DispatchError> {
            match request {
                ApiRequest::CrossChainTransactionStatus { job_hash, status } => {
                    if *status == JobStatus::Failed {
                        Err(DispatchError::Api("scripted failure".into()))
                    } else {
                        self.delivered.lock().push(*job_hash);
                        Ok(())
                    }
                },
                _ => Ok(()),
            }
        }
    }

    fn job(ts: i64, hash: u8, status: JobStatus) -> DbJob {
        DbJob {
            attempts: 0,
            timestamp_sec: ts,
            chain: "goerli".into(),
            request: ApiRequest::CrossChainTransactionStatus {
                job_hash: B256::repeat_byte(hash),
                status,
            },
            tags: vec![Tag::Int(hash as i64)],
        }
    }

    #[tokio::test]
    async fn test_ascending_timestamp_order() {
        let api = ScriptedApi::default();
        let mut scheduler = RestScheduler::new();
        scheduler.insert(job(20, 2, JobStatus::Completed));
        scheduler.insert(job(10, 1, JobStatus::Completed));
        scheduler.insert(job(30, 3, JobStatus::Completed));

        while scheduler.process_next(&api).await.is_some() {}
        assert_eq!(
            *api.delivered.lock(),
            vec![
                B256::repeat_byte(1),
                B256::repeat_byte(2),
                B256::repeat_byte(3)
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_retries_at_head() {
        let api = ScriptedApi::default();
        let mut scheduler = RestScheduler::new();
        scheduler.insert(job(10, 1, JobStatus::Failed));
        scheduler.insert(job(10, 2, JobStatus::Completed));

        // The failing job stays at the head of its bucket.
        assert_eq!(scheduler.process_next(&api).await, Some(Outcome::Requeued));
        assert_eq!(scheduler.len(), 2);
        assert_eq!(
            scheduler.buckets[&10].front().unwrap().attempts,
            1,
            "failed job is first in line again"
        );
        assert!(api.delivered.lock().is_empty());
    }

    #[tokio::test]
    async fn test_final_attempt_moves_to_tail() {
        let api = ScriptedApi::default();
        let mut scheduler = RestScheduler::new();
        let mut failing = job(10, 1, JobStatus::Failed);
        failing.attempts = FINAL_ATTEMPT - 1;
        scheduler.insert(failing);
        scheduler.insert(job(10, 2, JobStatus::Completed));

        assert_eq!(scheduler.process_next(&api).await, Some(Outcome::Requeued));
        let bucket = &scheduler.buckets[&10];
        assert_eq!(bucket.back().unwrap().attempts, FINAL_ATTEMPT);
        assert!(matches!(
            bucket.front().unwrap().request,
            ApiRequest::CrossChainTransactionStatus {
                status: JobStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_exhaustion_drops_job() {
        let api = ScriptedApi::default();
        let mut scheduler = RestScheduler::new();
        let mut failing = job(10, 1, JobStatus::Failed);
        failing.attempts = MAX_ATTEMPTS - 1;
        scheduler.insert(failing);
        scheduler.insert(job(20, 2, JobStatus::Completed));

        assert_eq!(scheduler.process_next(&api).await, Some(Outcome::Dropped));
        // The dispatcher moves on to the next timestamp bucket.
        assert_eq!(scheduler.process_next(&api).await, Some(Outcome::Delivered));
        assert_eq!(*api.delivered.lock(), vec![B256::repeat_byte(2)]);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_ten_consecutive_failures_drop() {
        let api = ScriptedApi::default();
        let mut scheduler = RestScheduler::new();
        scheduler.insert(job(10, 1, JobStatus::Failed));

        let mut outcomes = vec![];
        while let Some(outcome) = scheduler.process_next(&api).await {
            outcomes.push(outcome);
        }
        assert_eq!(outcomes.len(), MAX_ATTEMPTS as usize);
        assert_eq!(outcomes.last(), Some(&Outcome::Dropped));
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_empty_bucket_deleted() {
        let api = ScriptedApi::default();
        let mut scheduler = RestScheduler::new();
        scheduler.insert(job(10, 1, JobStatus::Completed));
        scheduler.process_next(&api).await;
        assert!(scheduler.buckets.is_empty());
    }
}
