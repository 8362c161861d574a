//! Per-chain block processing: fetch, filter, hand off, advance progress.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use alloy::{providers::Provider, rpc::types::Transaction};
use holograph_types::{filter_interesting, TransactionFilter};
use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    handler::TransactionHandler,
    ingestor::{BlockJob, BlockQueue},
    progress::ProgressStore,
    provider::ChainProvider,
};

/// How stale the per-chain loop may get before the watchdog kicks it.
pub const WATCHDOG_THRESHOLD: Duration = Duration::from_secs(15);

/// Consumes one chain's block-job queue, single-threaded and cooperative
/// within the chain. No two jobs for the same chain run concurrently.
pub struct BlockProcessor<H: TransactionHandler> {
    provider: Arc<ChainProvider>,
    queue: Arc<BlockQueue>,
    filters: Vec<TransactionFilter>,
    handler: Arc<H>,
    progress: Arc<ProgressStore>,
    last_done: Arc<Mutex<Instant>>,
}

impl<H: TransactionHandler> BlockProcessor<H> {
    pub fn new(
        provider: Arc<ChainProvider>,
        queue: Arc<BlockQueue>,
        filters: Vec<TransactionFilter>,
        handler: Arc<H>,
        progress: Arc<ProgressStore>,
    ) -> Self {
        Self {
            provider,
            queue,
            filters,
            handler,
            progress,
            last_done: Arc::new(Mutex::new(Instant::now())),
        }
    }

    fn chain_name(&self) -> &str {
        &self.provider.chain().name
    }

    /// Spawn the watchdog for this processor: every second, check whether the
    /// loop has gone quiet with work still queued, and wake it if so.
    pub fn spawn_watchdog(&self, cancel: &CancellationToken) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let last_done = self.last_done.clone();
        let cancel = cancel.clone();
        let chain = self.chain_name().to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(Duration::from_secs(1)) => {},
                }
                if last_done.lock().elapsed() > WATCHDOG_THRESHOLD && !queue.is_empty() {
                    tracing::warn!(chain = %chain, "processor stalled, kicking dequeue loop");
                    queue.kick();
                }
            }
        })
    }

    /// Run until the queue closes and drains (repair mode / shutdown).
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        while let Some(number) = self.queue.recv(&cancel).await {
            let job = BlockJob {
                chain: self.chain_name().to_string(),
                block_number: number,
            };
            match self.fetch_transactions(number).await {
                Some(txs) => {
                    self.process_block(&job, txs).await;
                    self.progress.update(&job.chain, number);
                    *self.last_done.lock() = Instant::now();
                },
                None => {
                    // Transient: retry the same block before anything newer.
                    self.queue.push_front(number);
                    sleep(self.provider.options().retry_delay).await;
                },
            }
        }
        tracing::info!(chain = %self.chain_name(), "block queue drained, processor exiting");
        Ok(())
    }

    /// Fetch the block with full transaction bodies. `None` means the block
    /// was not available (yet) or the fetch failed.
    async fn fetch_transactions(&self, number: u64) -> Option<Vec<Transaction>> {
        let client = match self.provider.client().await {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(chain = %self.chain_name(), number, "no provider: {err:#}");
                return None;
            },
        };
        match client.get_block(number.into()).full().await {
            Ok(Some(block)) => Some(
                block
                    .transactions
                    .as_transactions()
                    .unwrap_or_default()
                    .to_vec(),
            ),
            Ok(None) => {
                tracing::debug!(chain = %self.chain_name(), number, "block not yet available");
                None
            },
            Err(err) => {
                tracing::warn!(chain = %self.chain_name(), number, "block fetch failed: {err:#}");
                None
            },
        }
    }

    /// Filter the block's transactions and hand matches to the handler,
    /// waiting for it to finish before progress advances.
    pub async fn process_block(&self, job: &BlockJob, txs: Vec<Transaction>) {
        let interesting: Vec<Transaction> = filter_interesting(&job.chain, &self.filters, &txs)
            .into_iter()
            .cloned()
            .collect();
        if interesting.is_empty() {
            return;
        }
        tracing::debug!(
            chain = %job.chain,
            block = job.block_number,
            count = interesting.len(),
            "processing interesting transactions"
        );
        if let Err(err) = self.handler.process_transactions(job, interesting).await {
            // Protocol mismatches and decoder misses are fatal for the
            // receipt, not the pipeline.
            tracing::error!(
                chain = %job.chain,
                block = job.block_number,
                "transaction handler failed, skipping block: {err:#}"
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use alloy::{
        consensus::{SignableTransaction, TxEnvelope, TxLegacy},
        primitives::{address, Address, Bytes, Signature, TxKind, U256},
        rpc::types::Transaction,
    };

    pub(crate) const ALICE: Address = address!("00000000000000000000000000000000000000a1");

    pub(crate) fn tx(from: Address, to: Address, nonce: u64, input: &[u8]) -> Transaction {
        let tx = TxLegacy {
            chain_id: Some(5),
            nonce,
            gas_price: 1,
            gas_limit: 21_000,
            to: TxKind::Call(to),
            value: U256::ZERO,
            input: Bytes::copy_from_slice(input),
        };
        let signature = Signature::new(U256::from(1), U256::from(1), false);
        Transaction {
            inner: alloy::consensus::transaction::Recovered::new_unchecked(
                TxEnvelope::Legacy(tx.into_signed(signature)),
                from,
            ),
            block_hash: None,
            block_number: None,
            transaction_index: None,
            effective_gas_price: None,
        }
    }

    pub(crate) fn tx_to(to: Address) -> Transaction {
        tx(ALICE, to, 0, &[])
    }
}
