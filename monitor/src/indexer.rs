//! The indexer: wires the block pipeline into the receipt decoder, the job
//! correlator and the downstream channels.

use std::sync::Arc;

use alloy::{
    consensus::Transaction as _,
    primitives::{Address, B256},
    providers::Provider,
    rpc::types::{Log, Transaction},
};
use anyhow::Context;
use async_trait::async_trait;
use futures::future::try_join_all;
use alloy::sol_types::SolCall;
use holograph_types::{
    bridge::{executeJobCall, inbound_job_type, outbound_job_type},
    event::{decode_logs, verified_bridge_payload},
    lower_hex, ArchivedDeployment, ArchivedJob, Chain, CrossChainJob, DecodedEvent, Environment,
    FilterAddress, MessagePayload, MessageType, NetworksConfig, PhaseRecord, QueueMessage, Tag,
    TransactionFilter,
};
use serde_json::json;
use tokio::sync::mpsc;

use crate::{
    api::{ApiClient, ApiRequest, HttpApiClient, JobStatus, LoggingApiClient},
    correlator::{self, CorrelatorHandle, JobCorrelator, PhaseReport},
    dispatcher::{self, DbJob, DispatcherHandle},
    executor::validate_operator_job,
    handler::TransactionHandler,
    healthcheck,
    ingestor::{BlockIngestor, BlockJob, BlockQueue, IngestMode},
    lifecycle::Lifecycle,
    options::{Cli, IndexerArgs},
    processor::BlockProcessor,
    progress::ProgressStore,
    provider::{ChainProvider, ProviderPool},
    queue::{self, HttpMessageQueue, LoggingMessageQueue, MessageQueue},
};

/// The protocol filter set: transactions to any protocol peer contract, with
/// per-chain address substitution, plus direct `bridgeOutRequest` calls.
pub fn protocol_filters(chains: &[Chain]) -> Vec<TransactionFilter> {
    let per_chain = |pick: fn(&Chain) -> Address| {
        FilterAddress::PerChain(
            chains
                .iter()
                .map(|c| (c.name.clone(), pick(c)))
                .collect(),
        )
    };
    vec![
        TransactionFilter::To(per_chain(|c| c.peers.bridge)),
        TransactionFilter::To(per_chain(|c| c.peers.factory)),
        TransactionFilter::To(per_chain(|c| c.peers.operator)),
        TransactionFilter::To(per_chain(|c| c.peers.layer_zero_receiver)),
        TransactionFilter::FunctionSelector(
            holograph_types::BridgeCall::BridgeOutRequest.selector(),
        ),
    ]
}

/// Decodes interesting transactions and feeds the correlator and the
/// downstream channels.
pub struct IndexerHandler {
    environment: Environment,
    pool: Arc<ProviderPool>,
    correlator: CorrelatorHandle,
    dispatcher: DispatcherHandle,
    mq: Arc<dyn MessageQueue>,
}

impl IndexerHandler {
    pub fn new(
        environment: Environment,
        pool: Arc<ProviderPool>,
        correlator: CorrelatorHandle,
        dispatcher: DispatcherHandle,
        mq: Arc<dyn MessageQueue>,
    ) -> Self {
        Self {
            environment,
            pool,
            correlator,
            dispatcher,
            mq,
        }
    }

    async fn fetch_receipt_logs(
        &self,
        provider: &Arc<ChainProvider>,
        tx_hash: B256,
    ) -> anyhow::Result<Option<Vec<Log>>> {
        let client = provider.client().await?;
        for attempt in 1..=3u32 {
            match client.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(Some(receipt.inner.logs().to_vec())),
                Ok(None) => return Ok(None),
                Err(err) => {
                    tracing::warn!(%tx_hash, attempt, "receipt fetch failed: {err:#}");
                    tokio::time::sleep(provider.options().retry_delay).await;
                },
            }
        }
        Ok(None)
    }

    async fn emit(&self, message: QueueMessage) {
        if let Err(err) = queue::send_with_retry(&*self.mq, &message).await {
            // Best effort: exhaustion is logged and the message dropped.
            tracing::error!("queue message dropped: {err:#}");
        }
    }

    fn message(
        &self,
        chain: &Chain,
        message_type: MessageType,
        event: &DecodedEvent,
        payload: MessagePayload,
        tags: Vec<Tag>,
    ) -> QueueMessage {
        QueueMessage {
            message_type,
            event_name: event.name().into(),
            event_signature: event.signature().map(Into::into),
            tag_id: tags,
            chain_id: chain.chain_id,
            holograph_address: lower_hex(chain.peers.bridge),
            environment: self.environment,
            payload,
        }
    }

    /// Handle one interesting transaction's receipt. Protocol mismatches
    /// abort this receipt only.
    async fn handle_receipt(
        &self,
        chain: &Chain,
        job: &BlockJob,
        tx: &Transaction,
        logs: &[Log],
    ) -> anyhow::Result<()> {
        let tx_hash = *tx.inner.tx_hash();
        let record = PhaseRecord {
            tx: tx_hash,
            network: chain.name.clone(),
            block: job.block_number,
        };

        // Origin phase: a bridge-out carries both the message-sent event and
        // the LayerZero packet; the payload hash is verified before anything
        // downstream sees the job.
        if let Some((job_hash, _payload)) =
            verified_bridge_payload(logs, chain.peers.messaging_module)?
        {
            self.correlator
                .report(PhaseReport::Origin {
                    job_hash,
                    job_type: outbound_job_type(tx.input()),
                    record: record.clone(),
                })
                .await;
        }

        for event in decode_logs(logs) {
            match &event {
                DecodedEvent::ContractDeployed {
                    contract,
                    config_hash,
                } => {
                    let payload = MessagePayload::new(tx_hash, job.block_number)
                        .with("contractAddress", json!(lower_hex(*contract)))
                        .with("configHash", json!(format!("{config_hash}")));
                    let message = self.message(
                        chain,
                        MessageType::HolographProtocol,
                        &event,
                        payload,
                        vec![Tag::Str(format!("{config_hash}"))],
                    );
                    self.emit(message).await;
                    self.dispatcher
                        .enqueue(DbJob::new(
                            &chain.name,
                            ApiRequest::ContractDeployment {
                                deployment: ArchivedDeployment {
                                    tx: tx_hash,
                                    network: chain.name.clone(),
                                    block: job.block_number,
                                    contract_address: *contract,
                                    config_hash: *config_hash,
                                },
                            },
                            vec![Tag::Str(lower_hex(*contract))],
                        ))
                        .await;
                },
                // The legacy receiver announces jobs without a hash; it is
                // re-derived from the payload.
                DecodedEvent::AvailableJob { payload } => {
                    let job_hash = alloy::primitives::keccak256(payload);
                    let completed = self.job_already_executed(chain, payload.clone()).await;
                    self.correlator
                        .report(PhaseReport::Available {
                            job_hash,
                            record: record.clone(),
                            completed,
                        })
                        .await;
                },
                DecodedEvent::AvailableOperatorJob { job_hash, payload } => {
                    let completed = self.job_already_executed(chain, payload.clone()).await;
                    self.correlator
                        .report(PhaseReport::Available {
                            job_hash: *job_hash,
                            record: record.clone(),
                            completed,
                        })
                        .await;
                    let payload = MessagePayload::new(tx_hash, job.block_number)
                        .with("jobHash", json!(format!("{job_hash}")));
                    let message = self.message(
                        chain,
                        MessageType::HolographProtocol,
                        &event,
                        payload,
                        vec![Tag::Str(format!("{job_hash}"))],
                    );
                    self.emit(message).await;
                },
                DecodedEvent::FinishedOperatorJob { job_hash, operator } => {
                    self.correlator
                        .report(PhaseReport::Executed {
                            job_hash: *job_hash,
                            job_type: executed_job_type(tx),
                            record: record.clone(),
                        })
                        .await;
                    let payload = MessagePayload::new(tx_hash, job.block_number)
                        .with("jobHash", json!(format!("{job_hash}")))
                        .with("operator", json!(lower_hex(*operator)));
                    let message = self.message(
                        chain,
                        MessageType::HolographProtocol,
                        &event,
                        payload,
                        vec![Tag::Str(format!("{job_hash}"))],
                    );
                    self.emit(message).await;
                },
                DecodedEvent::FailedOperatorJob { job_hash } => {
                    self.dispatcher
                        .enqueue(DbJob::new(
                            &chain.name,
                            ApiRequest::CrossChainTransactionStatus {
                                job_hash: *job_hash,
                                status: JobStatus::Failed,
                            },
                            vec![Tag::Str(format!("{job_hash}"))],
                        ))
                        .await;
                    let payload = MessagePayload::new(tx_hash, job.block_number)
                        .with("jobHash", json!(format!("{job_hash}")));
                    let message = self.message(
                        chain,
                        MessageType::HolographProtocol,
                        &event,
                        payload,
                        vec![Tag::Str(format!("{job_hash}"))],
                    );
                    self.emit(message).await;
                },
                DecodedEvent::Erc20Transfer {
                    contract,
                    from,
                    to,
                    value,
                } => {
                    let payload = MessagePayload::new(tx_hash, job.block_number)
                        .with("contract", json!(lower_hex(*contract)))
                        .with("from", json!(lower_hex(*from)))
                        .with("to", json!(lower_hex(*to)))
                        .with("value", json!(value.to_string()));
                    let message =
                        self.message(chain, MessageType::Erc20, &event, payload, vec![]);
                    self.emit(message).await;
                },
                DecodedEvent::Erc721Transfer {
                    contract,
                    from,
                    to,
                    token_id,
                } => {
                    let mut message = self.message(
                        chain,
                        MessageType::Erc721,
                        &event,
                        MessagePayload::new(tx_hash, job.block_number)
                            .with("contract", json!(lower_hex(*contract)))
                            .with("from", json!(lower_hex(*from)))
                            .with("to", json!(lower_hex(*to)))
                            .with("tokenId", json!(token_id.to_string())),
                        vec![],
                    );
                    // A transfer out of the zero address is a mint.
                    if *from == Address::ZERO {
                        message.event_name = "Mint".into();
                    }
                    self.emit(message).await;
                },
                DecodedEvent::Erc1155Transfer { .. }
                | DecodedEvent::Erc1155TransferBatch { .. } => {
                    tracing::debug!(%tx_hash, "observed erc1155 transfer");
                },
                // Covered by the verified origin pass above.
                DecodedEvent::CrossChainMessageSent { .. }
                | DecodedEvent::LayerZeroPacket { .. } => {},
            }
        }
        Ok(())
    }

    /// Gas-estimate `executeJob` on the operator contract: a revert with the
    /// already-executed signal means the job is complete.
    async fn job_already_executed(&self, chain: &Chain, payload: alloy::primitives::Bytes) -> bool {
        let Some(provider) = self.pool.chain(&chain.name) else {
            return false;
        };
        let Ok(client) = provider.client().await else {
            return false;
        };
        match validate_operator_job(client, chain.peers.operator, payload).await {
            Ok(completed) => completed,
            Err(err) => {
                tracing::info!(chain = %chain.name, "operator job validation failed: {err:#}");
                false
            },
        }
    }
}

/// The job type of an `executeJob` transaction, refined from the inner
/// bridge function named by its payload.
fn executed_job_type(tx: &Transaction) -> holograph_types::JobType {
    match executeJobCall::abi_decode(tx.input(), true) {
        Ok(call) => inbound_job_type(&call.payload),
        Err(_) => holograph_types::JobType::Unknown,
    }
}

#[async_trait]
impl TransactionHandler for IndexerHandler {
    async fn process_transactions(
        &self,
        job: &BlockJob,
        txs: Vec<Transaction>,
    ) -> anyhow::Result<()> {
        let provider = self
            .pool
            .chain(&job.chain)
            .with_context(|| format!("unknown chain {}", job.chain))?;
        let chain = provider.chain().clone();

        for tx in txs {
            let tx_hash = *tx.inner.tx_hash();
            let logs = match self.fetch_receipt_logs(&provider, tx_hash).await? {
                Some(logs) => logs,
                None => {
                    tracing::info!(%tx_hash, "no receipt for interesting transaction, skipping");
                    continue;
                },
            };
            if let Err(err) = self.handle_receipt(&chain, job, &tx, &logs).await {
                // Fatal for this receipt only.
                tracing::warn!(%tx_hash, "rejected receipt: {err:#}");
            }
        }
        Ok(())
    }
}

/// Consume fully-correlated jobs: archive them downstream via both channels.
fn spawn_flush_consumer(
    environment: Environment,
    mq: Arc<dyn MessageQueue>,
    dispatcher: DispatcherHandle,
    mut flushed: mpsc::Receiver<CrossChainJob>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = flushed.recv().await {
            let archived = ArchivedJob::from(&job);
            let message = QueueMessage {
                message_type: MessageType::HolographProtocol,
                event_name: "CrossChainTransaction".into(),
                event_signature: None,
                tag_id: vec![Tag::Str(format!("{}", job.job_hash))],
                chain_id: 0,
                holograph_address: String::new(),
                environment,
                payload: MessagePayload::new(archived.tx, archived.block)
                    .with("jobHash", json!(format!("{}", job.job_hash)))
                    .with("jobType", json!(job.job_type.to_string()))
                    .with("completed", json!(job.completed)),
            };
            if let Err(err) = queue::send_with_retry(&*mq, &message).await {
                tracing::error!("queue message dropped: {err:#}");
            }
            let network = archived.network.clone();
            dispatcher
                .enqueue(DbJob::new(
                    &network,
                    ApiRequest::CrossChainTransaction { job: archived },
                    vec![Tag::Str(format!("{}", job.job_hash))],
                ))
                .await;
        }
    })
}

/// Run the `indexer` subcommand to completion.
pub async fn run(cli: &Cli, args: &IndexerArgs) -> anyhow::Result<()> {
    let environment = cli.env;
    let networks = NetworksConfig::load(&cli.networks_path())?;
    let chains = if args.networks.is_empty() {
        networks.chains().collect()
    } else {
        networks.select(&args.networks)?
    };
    anyhow::ensure!(!chains.is_empty(), "no networks selected");

    let progress = Arc::new(ProgressStore::load(cli.progress_path())?);
    let pool = Arc::new(ProviderPool::new(chains.clone(), args.provider.clone()));
    let lifecycle = Lifecycle::new();
    lifecycle.spawn_signal_listener();
    let cancel = lifecycle.token();

    // Downstream channels. Local environments log instead of calling out; a
    // dead queue in a live environment is fatal at startup.
    let mq: Arc<dyn MessageQueue> = if environment.is_live() {
        let mq = Arc::new(HttpMessageQueue::from_options(&args.queue)?);
        queue::startup_probe(&*mq, environment)
            .await
            .context("message queue unreachable")?;
        mq
    } else {
        Arc::new(LoggingMessageQueue)
    };
    let api: Arc<dyn ApiClient> = if environment.is_live() {
        let host = args
            .host
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--host is required in live environments"))?;
        let client = HttpApiClient::new(host);
        let key = args
            .operator_api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("OPERATOR_API_KEY is required in live environments"))?;
        client.authenticate(&key).await?;
        Arc::new(client)
    } else {
        Arc::new(LoggingApiClient)
    };

    let (dispatcher, dispatcher_task) = dispatcher::spawn(api);
    let (flushed_tx, flushed_rx) = mpsc::channel(256);
    let (correlator, correlator_task) = correlator::spawn(JobCorrelator::new(), flushed_tx);
    let flush_task =
        spawn_flush_consumer(environment, mq.clone(), dispatcher.clone(), flushed_rx);

    let handler = Arc::new(IndexerHandler::new(
        environment,
        pool.clone(),
        correlator.clone(),
        dispatcher.clone(),
        mq.clone(),
    ));

    pool.spawn_keepalive(&cancel);
    if args.health_check {
        let pool = pool.clone();
        let cancel = cancel.clone();
        let port = args.health_check_port;
        tokio::spawn(async move {
            if let Err(err) = healthcheck::serve(port, pool, cancel).await {
                tracing::error!("healthcheck server exited: {err:#}");
            }
        });
    }

    let filters = protocol_filters(&chains);
    let mut workers = vec![];
    for chain in &chains {
        let provider = pool.chain(&chain.name).expect("chain was just configured");
        let queue = BlockQueue::new();

        let saved = progress.get(&chain.name);
        let mode = match (args.warp, saved) {
            (Some(w), _) => IngestMode::Warp(w),
            (None, 0) => IngestMode::Live,
            (None, height) => IngestMode::Resume(height),
        };

        let ingestor = BlockIngestor::new(provider.clone(), queue.clone(), mode);
        let processor = BlockProcessor::new(
            provider,
            queue,
            filters.clone(),
            handler.clone(),
            progress.clone(),
        );
        processor.spawn_watchdog(&cancel);

        let ingest_cancel = cancel.clone();
        workers.push(tokio::spawn(ingestor.run(ingest_cancel)));
        let proc_cancel = cancel.clone();
        workers.push(tokio::spawn(
            async move { processor.run(proc_cancel).await },
        ));
    }

    let results = try_join_all(workers).await.context("worker panicked")?;
    for result in results {
        result?;
    }

    // Let the single-owner tasks drain before the snapshot is written.
    drop(handler);
    drop(correlator);
    drop(dispatcher);
    correlator_task.await.ok();
    flush_task.await.ok();
    dispatcher_task.await.ok();

    progress.save()?;
    tracing::info!("indexer shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod test {
    use alloy::primitives::address;
    use holograph_types::PeerAddresses;
    use pretty_assertions::assert_eq;

    use super::*;

    fn chain(name: &str, factory: Address) -> Chain {
        Chain {
            name: name.into(),
            chain_id: 5,
            holograph_id: 4_000_000_001,
            endpoint: "wss://rpc.example.test".parse().unwrap(),
            peers: PeerAddresses {
                bridge: address!("00000000000000000000000000000000000000b1"),
                factory,
                operator: address!("00000000000000000000000000000000000000c1"),
                layer_zero_receiver: address!("00000000000000000000000000000000000000d1"),
                messaging_module: address!("00000000000000000000000000000000000000e1"),
            },
        }
    }

    #[test]
    fn test_protocol_filters_substitute_per_chain() {
        let goerli_factory = address!("00000000000000000000000000000000000000f1");
        let mumbai_factory = address!("00000000000000000000000000000000000000f2");
        let chains = vec![
            chain("goerli", goerli_factory),
            chain("mumbai", mumbai_factory),
        ];
        let filters = protocol_filters(&chains);

        let to_goerli_factory = crate::processor::test_support::tx_to(goerli_factory);
        assert!(filters.iter().any(|f| f.matches("goerli", &to_goerli_factory)));
        assert!(!filters
            .iter()
            .filter(|f| matches!(f, TransactionFilter::To(_)))
            .any(|f| f.matches("mumbai", &to_goerli_factory)));
    }

    #[test]
    fn test_filter_count_covers_all_peers() {
        let chains = vec![chain("goerli", address!("00000000000000000000000000000000000000f1"))];
        let filters = protocol_filters(&chains);
        assert_eq!(filters.len(), 5);
    }
}
