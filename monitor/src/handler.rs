//! The seam between the block pipeline and whatever consumes interesting
//! transactions (indexer, propagator, analyzer).

use alloy::rpc::types::{Log, Transaction};
use async_trait::async_trait;

use crate::ingestor::BlockJob;

/// A transaction selected by at least one filter, together with its receipt
/// logs.
#[derive(Clone, Debug)]
pub struct InterestingTransaction {
    pub tx: Transaction,
    pub logs: Vec<Log>,
}

/// Invoked by the block processor once per block that contains interesting
/// transactions. The processor waits for completion before advancing
/// progress, so implementations own their retry policy.
#[async_trait]
pub trait TransactionHandler: Send + Sync + 'static {
    async fn process_transactions(
        &self,
        job: &BlockJob,
        txs: Vec<Transaction>,
    ) -> anyhow::Result<()>;
}
