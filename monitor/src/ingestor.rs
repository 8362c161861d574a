//! Per-chain block ingestion: a monotonically increasing stream of block
//! numbers to process.
//!
//! Each chain gets one ingestor loop feeding one [`BlockQueue`]. The ingestor
//! has push-only access; the processor owns the consuming side and may
//! re-insert a failed job at the head.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use alloy::providers::Provider;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::{sync::Notify, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::provider::ChainProvider;

/// One unit of work for the block processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockJob {
    pub chain: String,
    pub block_number: u64,
}

/// A bounded-ownership FIFO of block numbers for one chain.
///
/// The ingestor pushes to the back; the processor pops from the front and may
/// push a failed fetch back to the front. Closing the queue tells the
/// processor no more jobs will arrive (repair mode, shutdown).
#[derive(Debug, Default)]
pub struct BlockQueue {
    jobs: Mutex<VecDeque<u64>>,
    notify: Notify,
    closed: AtomicBool,
}

impl BlockQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_back(&self, number: u64) {
        self.jobs.lock().push_back(number);
        self.notify.notify_one();
    }

    /// Re-insert a job at the head of the queue, preserving block order for
    /// the retry.
    pub fn push_front(&self, number: u64) {
        self.jobs.lock().push_front(number);
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<u64> {
        self.jobs.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wake a waiting consumer even though nothing changed. Used by the
    /// processor watchdog to guard against lost timers.
    pub fn kick(&self) {
        self.notify.notify_waiters();
    }

    /// Wait for the next job. Returns `None` once the queue is closed and
    /// drained, or as soon as `cancel` fires: a shutdown stops accepting new
    /// jobs, it does not drain the backlog.
    pub async fn recv(&self, cancel: &CancellationToken) -> Option<u64> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(number) = self.pop() {
                return Some(number);
            }
            if self.is_closed() {
                return None;
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {},
                // Re-check periodically regardless of notifications.
                _ = sleep(Duration::from_secs(1)) => {},
            }
        }
    }
}

/// Backfill strategy selected at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IngestMode {
    /// Subscribe at the current head.
    #[default]
    Live,
    /// Re-play this many blocks behind head, then subscribe.
    Warp(u64),
    /// Process `[head - n, head]` and exit without subscribing.
    Repair(u64),
    /// Resume from a persisted height: the gap up to the current head is
    /// reconciled on the first header.
    Resume(u64),
}

/// Produces a strictly ascending stream of block numbers for one chain.
pub struct BlockIngestor {
    provider: Arc<ChainProvider>,
    queue: Arc<BlockQueue>,
    mode: IngestMode,
    last_seen: u64,
}

impl BlockIngestor {
    pub fn new(provider: Arc<ChainProvider>, queue: Arc<BlockQueue>, mode: IngestMode) -> Self {
        let last_seen = match mode {
            IngestMode::Resume(height) => height,
            _ => 0,
        };
        Self {
            provider,
            queue,
            mode,
            last_seen,
        }
    }

    fn chain_name(&self) -> &str {
        &self.provider.chain().name
    }

    /// Handle one observed head. Gaps since the last seen header are enqueued
    /// first, in ascending order.
    fn on_head(&mut self, number: u64) {
        self.provider.note_head(number);
        if number <= self.last_seen {
            return;
        }
        if self.last_seen > 0 {
            for n in self.last_seen + 1..number {
                self.queue.push_back(n);
            }
            if number > self.last_seen + 1 {
                tracing::info!(
                    chain = %self.chain_name(),
                    from = self.last_seen + 1,
                    to = number - 1,
                    "reconciled header gap"
                );
            }
        }
        self.queue.push_back(number);
        self.last_seen = number;
    }

    /// Enqueue the `[head - window, head]` backfill batch.
    fn seed(&mut self, head: u64, window: u64) {
        let start = head.saturating_sub(window);
        tracing::info!(chain = %self.chain_name(), start, head, "seeding backfill batch");
        for n in start..=head {
            self.queue.push_back(n);
        }
        self.last_seen = head;
        self.provider.note_head(head);
    }

    async fn current_head(&self, cancel: &CancellationToken) -> Option<u64> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let client = match self.provider.client().await {
                Ok(client) => client,
                Err(err) => {
                    tracing::error!(chain = %self.chain_name(), "no provider for head fetch: {err:#}");
                    sleep(self.provider_retry_delay()).await;
                    continue;
                },
            };
            match client.get_block_number().await {
                Ok(head) => return Some(head),
                Err(err) => {
                    tracing::warn!(chain = %self.chain_name(), "failed to fetch head, will retry: {err:#}");
                    sleep(self.provider_retry_delay()).await;
                },
            }
        }
    }

    fn provider_retry_delay(&self) -> Duration {
        self.provider.options().retry_delay
    }

    /// Run the ingestor until cancellation, or to completion in repair mode.
    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        let Some(head) = self.current_head(&cancel).await else {
            self.queue.close();
            return Ok(());
        };

        match self.mode {
            IngestMode::Repair(window) => {
                self.seed(head, window);
                // Repair processes a bounded range and exits: no
                // subscription, the queue is complete as seeded.
                self.queue.close();
                return Ok(());
            },
            IngestMode::Warp(window) => self.seed(head, window),
            IngestMode::Live | IngestMode::Resume(_) => {},
        }

        if self.provider.chain().is_ws() {
            self.subscribe_loop(&cancel).await;
        } else {
            self.poll_loop(&cancel).await;
        }
        self.queue.close();
        Ok(())
    }

    /// Websocket path: subscribe to new heads, re-arming the subscription on
    /// the replacement client whenever the stream dies.
    async fn subscribe_loop(&mut self, cancel: &CancellationToken) {
        let timeout = self.subscription_timeout();
        while !cancel.is_cancelled() {
            let client = match self.provider.client().await {
                Ok(client) => client,
                Err(err) => {
                    tracing::error!(chain = %self.chain_name(), "provider unavailable: {err:#}");
                    sleep(self.provider_retry_delay()).await;
                    continue;
                },
            };
            let mut stream = match client.subscribe_blocks().await {
                Ok(sub) => sub.into_stream(),
                Err(err) => {
                    tracing::warn!(chain = %self.chain_name(), "failed to subscribe to heads: {err:#}");
                    self.provider.mark_dead();
                    sleep(self.provider_retry_delay()).await;
                    continue;
                },
            };
            tracing::info!(chain = %self.chain_name(), "established head subscription");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    next = tokio::time::timeout(timeout, stream.next()) => match next {
                        Ok(Some(header)) => self.on_head(header.number),
                        Ok(None) => {
                            tracing::warn!(chain = %self.chain_name(), "head stream ended, re-establishing");
                            self.provider.mark_dead();
                            break;
                        },
                        Err(_) => {
                            tracing::warn!(
                                chain = %self.chain_name(),
                                ?timeout,
                                "no head within subscription timeout, re-establishing"
                            );
                            self.provider.mark_dead();
                            break;
                        },
                    },
                }
            }
        }
    }

    /// HTTP path: poll the head height. The gap logic turns a jump of several
    /// blocks between polls into individual jobs.
    async fn poll_loop(&mut self, cancel: &CancellationToken) {
        let interval = self.polling_interval();
        while !cancel.is_cancelled() {
            if let Some(head) = self.current_head(cancel).await {
                self.on_head(head);
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(interval) => {},
            }
        }
    }

    fn subscription_timeout(&self) -> Duration {
        self.provider.options().subscription_timeout
    }

    fn polling_interval(&self) -> Duration {
        self.provider.options().polling_interval
    }
}

#[cfg(test)]
mod test {
    use holograph_types::{Chain, PeerAddresses};

    use super::*;
    use crate::provider::{ProviderOptions, ProviderPool};

    fn test_provider(name: &str) -> Arc<ChainProvider> {
        let chain = Chain {
            name: name.into(),
            chain_id: 5,
            holograph_id: 4_000_000_001,
            endpoint: "ws://127.0.0.1:9".parse().unwrap(),
            peers: PeerAddresses {
                bridge: Default::default(),
                factory: Default::default(),
                operator: Default::default(),
                layer_zero_receiver: Default::default(),
                messaging_module: Default::default(),
            },
        };
        let pool = ProviderPool::new(vec![chain], ProviderOptions::default());
        pool.chain(name).unwrap()
    }

    fn drain(queue: &BlockQueue) -> Vec<u64> {
        std::iter::from_fn(|| queue.pop()).collect()
    }

    #[test]
    fn test_gap_reconciliation() {
        let queue = BlockQueue::new();
        let mut ingestor =
            BlockIngestor::new(test_provider("goerli"), queue.clone(), IngestMode::Live);

        ingestor.on_head(1001);
        assert_eq!(drain(&queue), vec![1001]);

        // Header N+K after N enqueues N+1..=N+K in order.
        ingestor.on_head(1005);
        assert_eq!(drain(&queue), vec![1002, 1003, 1004, 1005]);
    }

    #[test]
    fn test_stale_header_ignored() {
        let queue = BlockQueue::new();
        let mut ingestor =
            BlockIngestor::new(test_provider("goerli"), queue.clone(), IngestMode::Live);
        ingestor.on_head(1001);
        ingestor.on_head(1001);
        ingestor.on_head(1000);
        assert_eq!(drain(&queue), vec![1001]);
    }

    #[test]
    fn test_resume_backfills_from_saved_height() {
        let queue = BlockQueue::new();
        let mut ingestor = BlockIngestor::new(
            test_provider("goerli"),
            queue.clone(),
            IngestMode::Resume(998),
        );
        ingestor.on_head(1001);
        assert_eq!(drain(&queue), vec![999, 1000, 1001]);
    }

    #[test]
    fn test_warp_seed() {
        let queue = BlockQueue::new();
        let mut ingestor =
            BlockIngestor::new(test_provider("goerli"), queue.clone(), IngestMode::Warp(3));
        ingestor.seed(1000, 3);
        assert_eq!(drain(&queue), vec![997, 998, 999, 1000]);
        // Subsequent heads continue from the seeded point.
        ingestor.on_head(1002);
        assert_eq!(drain(&queue), vec![1001, 1002]);
    }

    #[tokio::test]
    async fn test_queue_close_drains_then_ends() {
        let queue = BlockQueue::new();
        queue.push_back(1);
        queue.push_back(2);
        queue.close();

        let cancel = CancellationToken::new();
        assert_eq!(queue.recv(&cancel).await, Some(1));
        assert_eq!(queue.recv(&cancel).await, Some(2));
        assert_eq!(queue.recv(&cancel).await, None);
    }

    #[tokio::test]
    async fn test_push_front_orders_retry_first() {
        let queue = BlockQueue::new();
        queue.push_back(10);
        queue.push_back(11);
        let n = queue.pop().unwrap();
        queue.push_front(n);
        assert_eq!(queue.pop(), Some(10));
        assert_eq!(queue.pop(), Some(11));
    }
}
