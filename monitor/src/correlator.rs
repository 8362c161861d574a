//! Correlates the three phases of a cross-chain job (origin → available →
//! executed) into a single record.
//!
//! The correlator is the single owner of the `job hash → job` index; all
//! mutation goes through its message channel, which serializes updates per
//! job hash by construction.

use std::collections::HashMap;

use alloy::primitives::B256;
use holograph_types::{ArchivedJob, CrossChainJob, JobPhase, JobType, PhaseRecord};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

/// One phase observation, as extracted from a receipt by the indexer.
#[derive(Clone, Debug)]
pub enum PhaseReport {
    /// A bridge-out transaction on the origin chain.
    Origin {
        job_hash: B256,
        job_type: JobType,
        record: PhaseRecord,
    },
    /// The destination operator pool advertised the job.
    Available {
        job_hash: B256,
        record: PhaseRecord,
        /// Result of `validate_operator_job`: the job was already executed
        /// when we saw it become available.
        completed: bool,
    },
    /// An operator executed the job.
    Executed {
        job_hash: B256,
        job_type: JobType,
        record: PhaseRecord,
    },
}

impl PhaseReport {
    pub fn job_hash(&self) -> B256 {
        match self {
            Self::Origin { job_hash, .. }
            | Self::Available { job_hash, .. }
            | Self::Executed { job_hash, .. } => *job_hash,
        }
    }
}

/// The in-memory phase index.
#[derive(Debug, Default)]
pub struct JobCorrelator {
    jobs: HashMap<B256, CrossChainJob>,
}

impl JobCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the working set from a persisted archive. The phase count of
    /// each logged job is re-derived from its non-empty phase fields; a job
    /// with all three phases is already complete and stays out of the index.
    pub fn from_archive<'a>(archive: impl IntoIterator<Item = &'a ArchivedJob>) -> Self {
        let mut jobs = HashMap::new();
        for archived in archive {
            let job = CrossChainJob::from(archived);
            if job.is_full() {
                continue;
            }
            jobs.insert(job.job_hash, job);
        }
        Self { jobs }
    }

    /// Record one phase observation. When the observation completes the
    /// job's third phase, the job is returned and evicted from the index in
    /// the same call.
    pub fn report(&mut self, report: PhaseReport) -> Option<CrossChainJob> {
        let job_hash = report.job_hash();
        let job = self
            .jobs
            .entry(job_hash)
            .or_insert_with(|| CrossChainJob::new(job_hash));

        match report {
            PhaseReport::Origin {
                job_type, record, ..
            } => {
                if job_type != JobType::Unknown {
                    job.job_type = job_type;
                }
                job.record(JobPhase::Origin, record);
            },
            PhaseReport::Available {
                record, completed, ..
            } => {
                job.record(JobPhase::Available, record);
                if completed {
                    job.completed = true;
                }
            },
            PhaseReport::Executed {
                job_type, record, ..
            } => {
                if job_type != JobType::Unknown {
                    job.job_type = job_type;
                }
                job.record(JobPhase::Operator, record);
                job.completed = true;
            },
        }

        if job.is_full() {
            let job = self.jobs.remove(&job_hash).expect("job just inserted");
            tracing::info!(
                %job_hash,
                job_type = %job.job_type,
                "cross-chain job fully correlated, flushing"
            );
            Some(job)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn active(&self) -> impl Iterator<Item = &CrossChainJob> {
        self.jobs.values()
    }
}

enum Request {
    Report(PhaseReport),
    Snapshot(oneshot::Sender<Vec<CrossChainJob>>),
}

/// Cloneable handle to the correlator task.
#[derive(Clone)]
pub struct CorrelatorHandle {
    tx: mpsc::Sender<Request>,
}

impl CorrelatorHandle {
    pub async fn report(&self, report: PhaseReport) {
        // A closed channel means we are shutting down; dropping the report
        // is correct, it will be reconciled from chain state on restart.
        let _ = self.tx.send(Request::Report(report)).await;
    }

    pub async fn snapshot(&self) -> Vec<CrossChainJob> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Request::Snapshot(reply)).await.is_err() {
            return vec![];
        }
        rx.await.unwrap_or_default()
    }
}

/// Spawn the correlator as a single-owner task. Fully correlated jobs are
/// forwarded on `flushed`; the final index state is returned when every
/// handle has been dropped, so shutdown can archive the still-active jobs.
pub fn spawn(
    mut correlator: JobCorrelator,
    flushed: mpsc::Sender<CrossChainJob>,
) -> (CorrelatorHandle, JoinHandle<JobCorrelator>) {
    let (tx, mut rx) = mpsc::channel(256);
    let task = tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            match request {
                Request::Report(report) => {
                    if let Some(job) = correlator.report(report) {
                        if flushed.send(job).await.is_err() {
                            tracing::warn!("flush receiver dropped, discarding completed job");
                        }
                    }
                },
                Request::Snapshot(reply) => {
                    let _ = reply.send(correlator.active().cloned().collect());
                },
            }
        }
        correlator
    });
    (CorrelatorHandle { tx }, task)
}
