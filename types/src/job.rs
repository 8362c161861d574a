//! The cross-chain job model: three on-chain phases correlated under one
//! content-addressed job hash.

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::bridge::JobType;

/// The three phases of a bridge job, in lifecycle order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobPhase {
    /// Bridge-out transaction on the origin chain.
    Origin,
    /// The operator pool on the destination chain received the job.
    Available,
    /// An operator executed the job.
    Operator,
}

/// Where one phase of a job was observed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    pub tx: B256,
    pub network: String,
    pub block: u64,
}

/// One cross-chain job, keyed by the keccak hash of its bridge payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossChainJob {
    pub job_hash: B256,
    pub job_type: JobType,
    pub origin: Option<PhaseRecord>,
    pub available: Option<PhaseRecord>,
    pub operator: Option<PhaseRecord>,
    pub completed: bool,
}

impl CrossChainJob {
    pub fn new(job_hash: B256) -> Self {
        Self {
            job_hash,
            job_type: JobType::Unknown,
            origin: None,
            available: None,
            operator: None,
            completed: false,
        }
    }

    /// Record one phase observation. A duplicate report overwrites the
    /// earlier one (last writer wins); the phase count never decreases.
    pub fn record(&mut self, phase: JobPhase, record: PhaseRecord) {
        let slot = match phase {
            JobPhase::Origin => &mut self.origin,
            JobPhase::Available => &mut self.available,
            JobPhase::Operator => &mut self.operator,
        };
        *slot = Some(record);
    }

    /// How many phases have been observed.
    pub fn phase_count(&self) -> usize {
        [&self.origin, &self.available, &self.operator]
            .iter()
            .filter(|p| p.is_some())
            .count()
    }

    /// Whether all three phases have been observed.
    pub fn is_full(&self) -> bool {
        self.phase_count() == 3
    }
}

/// A record in the job archive file. The archive is a JSON array of these,
/// written by the analyzer on shutdown and reloaded on restart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "logType")]
pub enum ArchivedLog {
    AvailableJob(ArchivedJob),
    ContractDeployment(ArchivedDeployment),
}

/// An archived cross-chain job. The top-level `tx`/`network`/`block` triple
/// names the log that produced the record: the available phase when it was
/// seen, otherwise the origin phase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedJob {
    pub tx: B256,
    pub network: String,
    pub block: u64,
    pub job_hash: B256,
    pub job_type: JobType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_tx: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_tx: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_tx: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_block: Option<u64>,
    pub completed: bool,
}

/// An archived contract deployment observation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedDeployment {
    pub tx: B256,
    pub network: String,
    pub block: u64,
    pub contract_address: Address,
    pub config_hash: B256,
}

impl From<&CrossChainJob> for ArchivedJob {
    fn from(job: &CrossChainJob) -> Self {
        let reporting = job
            .available
            .as_ref()
            .or(job.origin.as_ref())
            .or(job.operator.as_ref());
        let (tx, network, block) = match reporting {
            Some(p) => (p.tx, p.network.clone(), p.block),
            None => (B256::ZERO, String::new(), 0),
        };
        let split = |p: &Option<PhaseRecord>| {
            (
                p.as_ref().map(|p| p.tx),
                p.as_ref().map(|p| p.network.clone()),
                p.as_ref().map(|p| p.block),
            )
        };
        let (origin_tx, origin_network, origin_block) = split(&job.origin);
        let (available_tx, available_network, available_block) = split(&job.available);
        let (operator_tx, operator_network, operator_block) = split(&job.operator);
        Self {
            tx,
            network,
            block,
            job_hash: job.job_hash,
            job_type: job.job_type,
            origin_tx,
            origin_network,
            origin_block,
            available_tx,
            available_network,
            available_block,
            operator_tx,
            operator_network,
            operator_block,
            completed: job.completed,
        }
    }
}

impl From<&ArchivedJob> for CrossChainJob {
    fn from(archived: &ArchivedJob) -> Self {
        let join = |tx: &Option<B256>, network: &Option<String>, block: &Option<u64>| {
            tx.map(|tx| PhaseRecord {
                tx,
                network: network.clone().unwrap_or_default(),
                block: block.unwrap_or_default(),
            })
        };
        Self {
            job_hash: archived.job_hash,
            job_type: archived.job_type,
            origin: join(
                &archived.origin_tx,
                &archived.origin_network,
                &archived.origin_block,
            ),
            available: join(
                &archived.available_tx,
                &archived.available_network,
                &archived.available_block,
            ),
            operator: join(
                &archived.operator_tx,
                &archived.operator_network,
                &archived.operator_block,
            ),
            completed: archived.completed,
        }
    }
}

#[cfg(test)]
mod test {
    use alloy::primitives::b256;
    use pretty_assertions::assert_eq;

    use super::*;

    fn phase(network: &str, block: u64) -> PhaseRecord {
        PhaseRecord {
            tx: b256!("00000000000000000000000000000000000000000000000000000000000000aa"),
            network: network.into(),
            block,
        }
    }

    #[test]
    fn test_phase_counting() {
        let mut job = CrossChainJob::new(B256::ZERO);
        assert_eq!(job.phase_count(), 0);

        job.record(JobPhase::Origin, phase("goerli", 100));
        assert_eq!(job.phase_count(), 1);

        // Duplicate report overwrites but doesn't decrement the count.
        job.record(JobPhase::Origin, phase("goerli", 101));
        assert_eq!(job.phase_count(), 1);
        assert_eq!(job.origin.as_ref().unwrap().block, 101);

        job.record(JobPhase::Available, phase("mumbai", 50));
        job.record(JobPhase::Operator, phase("mumbai", 51));
        assert!(job.is_full());
    }

    #[test]
    fn test_archive_round_trip() {
        let mut job = CrossChainJob::new(b256!(
            "1111111111111111111111111111111111111111111111111111111111111111"
        ));
        job.job_type = crate::bridge::JobType::Erc721;
        job.record(JobPhase::Origin, phase("goerli", 100));
        job.record(JobPhase::Available, phase("mumbai", 50));

        let archived = ArchivedJob::from(&job);
        assert_eq!(archived.network, "mumbai");
        assert_eq!(archived.block, 50);

        let reloaded = CrossChainJob::from(&archived);
        assert_eq!(reloaded, job);
        assert_eq!(reloaded.phase_count(), 2);

        // Serde round trip through the archive representation.
        let json = serde_json::to_string(&ArchivedLog::AvailableJob(archived.clone())).unwrap();
        assert!(json.contains("\"logType\":\"AvailableJob\""));
        let parsed: ArchivedLog = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ArchivedLog::AvailableJob(archived));
    }
}
