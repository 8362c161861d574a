//! The propagator: observes holographable contract deployments and replays
//! them to peer chains.

use std::sync::Arc;

use alloy::{
    consensus::Transaction as _,
    network::EthereumWallet,
    primitives::{Address, B256},
    providers::{Provider, ProviderBuilder, WsConnect},
    rpc::types::{Log, Transaction},
    sol_types::SolCall,
};
use anyhow::Context;
use async_trait::async_trait;
use futures::future::try_join_all;
use holograph_types::{
    bridge::{deployOutCall, DeploymentConfig, HolographFactory},
    event::decode_logs,
    Chain, DecodedEvent, FilterAddress, NetworksConfig, ProtocolError, TransactionFilter,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    executor::{execute_transaction, ExecutorOptions},
    handler::TransactionHandler,
    ingestor::{BlockIngestor, BlockJob, BlockQueue, IngestMode},
    lifecycle::Lifecycle,
    options::{Cli, PropagatorArgs, PropagatorMode},
    processor::BlockProcessor,
    progress::ProgressStore,
    provider::{ChainProvider, ProviderPool},
};

/// A single deployment to replay, as passed to `--recover`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverRequest {
    pub network: String,
    pub tx: B256,
}

/// Filters for factory deployments only, with per-chain substitution.
pub fn factory_filters(chains: &[Chain]) -> Vec<TransactionFilter> {
    vec![TransactionFilter::To(FilterAddress::PerChain(
        chains
            .iter()
            .map(|c| (c.name.clone(), c.peers.factory))
            .collect(),
    ))]
}

/// Pull the deployment config out of a factory transaction's calldata.
///
/// Direct factory calls carry it in `deployHolographableContract`; bridge
/// deployments wrap it in `deployOut`.
pub fn extract_deployment_config(input: &[u8]) -> Option<DeploymentConfig> {
    if let Ok(call) = HolographFactory::deployHolographableContractCall::abi_decode(input, true) {
        return Some(call.config);
    }
    deployOutCall::abi_decode(input, true)
        .ok()
        .map(|call| call.config)
}

/// Check a decoded deployment event against the config that produced it.
pub fn verify_deployment(
    config: &DeploymentConfig,
    factory: Address,
    event_contract: Address,
    event_config_hash: B256,
) -> Result<(), ProtocolError> {
    let config_hash = config.config_hash();
    if config_hash != event_config_hash {
        return Err(ProtocolError::DeploymentConfigMismatch {
            expected: event_config_hash,
            actual: config_hash,
        });
    }
    let address = config.deployment_address(factory);
    if address != event_contract {
        return Err(ProtocolError::DeploymentAddressMismatch {
            expected: event_contract,
            actual: address,
        });
    }
    Ok(())
}

pub struct Propagator {
    mode: PropagatorMode,
    pool: Arc<ProviderPool>,
    chains: Vec<Chain>,
    wallet: Option<EthereumWallet>,
    executor_opt: ExecutorOptions,
}

impl Propagator {
    pub fn new(
        mode: PropagatorMode,
        pool: Arc<ProviderPool>,
        chains: Vec<Chain>,
        wallet: Option<EthereumWallet>,
    ) -> Self {
        Self {
            mode,
            pool,
            chains,
            wallet,
            executor_opt: ExecutorOptions::default(),
        }
    }

    async fn fetch_receipt_logs(
        &self,
        provider: &Arc<ChainProvider>,
        tx_hash: B256,
    ) -> anyhow::Result<Option<Vec<Log>>> {
        let client = provider.client().await?;
        match client.get_transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => Ok(Some(receipt.inner.logs().to_vec())),
            Ok(None) => Ok(None),
            Err(err) => Err(err).context("fetching receipt"),
        }
    }

    /// Whether the deterministic address already has code on the chain.
    async fn already_deployed(&self, chain: &Chain, address: Address) -> bool {
        let Some(provider) = self.pool.chain(&chain.name) else {
            return false;
        };
        let Ok(client) = provider.client().await else {
            return false;
        };
        match client.get_code_at(address).await {
            Ok(code) => !code.is_empty(),
            Err(err) => {
                tracing::warn!(chain = %chain.name, %address, "code check failed: {err:#}");
                false
            },
        }
    }

    /// Replay one deployment to every peer chain that doesn't have it yet.
    async fn propagate(&self, origin: &str, config: DeploymentConfig) -> anyhow::Result<()> {
        for target in self.chains.iter().filter(|c| c.name != origin) {
            let address = config.deployment_address(target.peers.factory);
            if self.already_deployed(target, address).await {
                tracing::info!(chain = %target.name, %address, "contract already deployed, skipping");
                continue;
            }
            match self.mode {
                PropagatorMode::Listen => {
                    tracing::info!(
                        chain = %target.name,
                        %address,
                        "deployment missing on peer chain (listen mode, not replaying)"
                    );
                },
                PropagatorMode::Manual => {
                    let call = HolographFactory::deployHolographableContractCall {
                        config: config.clone(),
                    };
                    tracing::info!(
                        chain = %target.name,
                        factory = %target.peers.factory,
                        calldata = %alloy::hex::encode_prefixed(call.abi_encode()),
                        "replay transaction prepared, submit manually"
                    );
                },
                PropagatorMode::Auto => {
                    if let Err(err) = self.replay(target, config.clone()).await {
                        tracing::error!(chain = %target.name, "deployment replay failed: {err:#}");
                    }
                },
            }
        }
        Ok(())
    }

    async fn replay(&self, target: &Chain, config: DeploymentConfig) -> anyhow::Result<()> {
        let wallet = self
            .wallet
            .clone()
            .ok_or_else(|| anyhow::anyhow!("auto mode requires a wallet; set MNEMONIC"))?;
        if target.is_ws() {
            let provider = ProviderBuilder::new()
                .wallet(wallet)
                .on_ws(WsConnect::new(target.endpoint.to_string()))
                .await?;
            self.replay_with(target, provider, config).await
        } else {
            let provider = ProviderBuilder::new()
                .wallet(wallet)
                .on_http(target.endpoint.clone());
            self.replay_with(target, provider, config).await
        }
    }

    async fn replay_with<P: Provider + Clone>(
        &self,
        target: &Chain,
        provider: P,
        config: DeploymentConfig,
    ) -> anyhow::Result<()> {
        let factory = HolographFactory::new(target.peers.factory, provider.clone());
        let call = factory.deployHolographableContract(config);
        let receipt =
            execute_transaction(target, &provider, call, true, &self.executor_opt).await?;
        match receipt {
            Some(receipt) => tracing::info!(
                chain = %target.name,
                tx = %receipt.transaction_hash,
                "deployment replayed"
            ),
            None => tracing::info!(chain = %target.name, "deployment already satisfied"),
        }
        Ok(())
    }

    async fn handle_deployment_tx(
        &self,
        chain: &Chain,
        tx: &Transaction,
        logs: &[Log],
    ) -> anyhow::Result<()> {
        let Some(config) = extract_deployment_config(tx.input()) else {
            tracing::debug!(tx = %tx.inner.tx_hash(), "factory transaction without deployment config");
            return Ok(());
        };
        for event in decode_logs(logs) {
            let DecodedEvent::ContractDeployed {
                contract,
                config_hash,
            } = event
            else {
                continue;
            };
            if let Err(err) =
                verify_deployment(&config, chain.peers.factory, contract, config_hash)
            {
                // Fatal for this receipt; the pipeline continues.
                tracing::warn!(tx = %tx.inner.tx_hash(), "rejected deployment: {err}");
                continue;
            }
            tracing::info!(
                chain = %chain.name,
                %contract,
                "observed holographable contract deployment"
            );
            self.propagate(&chain.name, config.clone()).await?;
        }
        Ok(())
    }

    /// Replay a single deployment named by a `--recover` request.
    pub async fn recover(&self, request: RecoverRequest) -> anyhow::Result<()> {
        let provider = self
            .pool
            .chain(&request.network)
            .with_context(|| format!("unknown network {}", request.network))?;
        let chain = provider.chain().clone();
        let client = provider.client().await?;
        let tx = client
            .get_transaction_by_hash(request.tx)
            .await?
            .with_context(|| format!("transaction {} not found", request.tx))?;
        let logs = self
            .fetch_receipt_logs(&provider, request.tx)
            .await?
            .with_context(|| format!("no receipt for {}", request.tx))?;
        self.handle_deployment_tx(&chain, &tx, &logs).await
    }
}

#[async_trait]
impl TransactionHandler for Propagator {
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
            match self.fetch_receipt_logs(&provider, tx_hash).await {
                Ok(Some(logs)) => {
                    if let Err(err) = self.handle_deployment_tx(&chain, &tx, &logs).await {
                        tracing::warn!(%tx_hash, "deployment handling failed: {err:#}");
                    }
                },
                Ok(None) => {
                    tracing::info!(%tx_hash, "no receipt for factory transaction, skipping");
                },
                Err(err) => {
                    tracing::warn!(%tx_hash, "receipt fetch failed, skipping: {err:#}");
                },
            }
        }
        Ok(())
    }
}

/// Run the `propagator` subcommand to completion.
pub async fn run(cli: &Cli, args: &PropagatorArgs) -> anyhow::Result<()> {
    let networks = NetworksConfig::load(&cli.networks_path())?;
    let chains = if args.networks.is_empty() {
        networks.chains().collect()
    } else {
        networks.select(&args.networks)?
    };
    anyhow::ensure!(!chains.is_empty(), "no networks selected");

    let pool = Arc::new(ProviderPool::new(chains.clone(), args.provider.clone()));
    let wallet = match args.mode {
        PropagatorMode::Auto => Some(args.wallet.wallet()?.0),
        _ => args.wallet.wallet().ok().map(|(w, _)| w),
    };
    let propagator = Arc::new(Propagator::new(args.mode, pool.clone(), chains.clone(), wallet));

    // One-shot recovery path.
    let recover_json = match (&args.recover, &args.recover_file) {
        (Some(json), _) => Some(json.clone()),
        (None, Some(path)) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading recover file {}", path.display()))?,
        ),
        (None, None) => None,
    };
    if let Some(json) = recover_json {
        let request: RecoverRequest =
            serde_json::from_str(&json).context("parsing recover request")?;
        return propagator.recover(request).await;
    }

    let progress = Arc::new(ProgressStore::load(cli.progress_path())?);
    let lifecycle = Lifecycle::new();
    lifecycle.spawn_signal_listener();
    let cancel: CancellationToken = lifecycle.token();
    pool.spawn_keepalive(&cancel);

    let filters = factory_filters(&chains);
    let mut workers = vec![];
    for chain in &chains {
        let provider = pool.chain(&chain.name).expect("chain was just configured");
        let queue = BlockQueue::new();

        let saved = progress.get(&chain.name);
        let mode = match (args.repair, args.sync, saved) {
            (Some(window), _, _) => IngestMode::Repair(window),
            (None, true, height) if height > 0 => IngestMode::Resume(height),
            _ => IngestMode::Live,
        };

        let ingestor = BlockIngestor::new(provider.clone(), queue.clone(), mode);
        let processor = BlockProcessor::new(
            provider,
            queue,
            filters.clone(),
            propagator.clone(),
            progress.clone(),
        );
        processor.spawn_watchdog(&cancel);
        workers.push(tokio::spawn(ingestor.run(cancel.clone())));
        let proc_cancel = cancel.clone();
        workers.push(tokio::spawn(
            async move { processor.run(proc_cancel).await },
        ));
    }

    let results = try_join_all(workers).await.context("worker panicked")?;
    for result in results {
        result?;
    }
    progress.save()?;
    tracing::info!("propagator shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod test {
    use alloy::primitives::{address, Bytes, B256};
    use holograph_types::bridge::DeploymentConfig;

    use super::*;

    fn config() -> DeploymentConfig {
        DeploymentConfig {
            contractType: B256::repeat_byte(0x11),
            chainType: 4_000_000_001,
            salt: B256::repeat_byte(0x22),
            byteCode: Bytes::from_static(b"\x60\x80"),
            initCode: Bytes::new(),
        }
    }

    #[test]
    fn test_extract_config_from_factory_call() {
        let call = HolographFactory::deployHolographableContractCall { config: config() };
        let extracted = extract_deployment_config(&call.abi_encode()).unwrap();
        assert_eq!(extracted.config_hash(), config().config_hash());
        assert!(extract_deployment_config(&[0xde, 0xad, 0xbe, 0xef]).is_none());
    }

    #[test]
    fn test_extract_config_from_deploy_out() {
        let call = deployOutCall {
            toChain: 4_000_000_002,
            config: config(),
        };
        let extracted = extract_deployment_config(&call.abi_encode()).unwrap();
        assert_eq!(extracted.config_hash(), config().config_hash());
    }

    #[test]
    fn test_verify_deployment() {
        let factory = address!("90425798cc0e33932f11edc3eb9fcfac4bb8ae6a");
        let config = config();
        let contract = config.deployment_address(factory);
        let config_hash = config.config_hash();

        assert!(verify_deployment(&config, factory, contract, config_hash).is_ok());

        assert!(matches!(
            verify_deployment(&config, factory, contract, B256::repeat_byte(0xff)),
            Err(ProtocolError::DeploymentConfigMismatch { .. })
        ));
        assert!(matches!(
            verify_deployment(
                &config,
                factory,
                address!("0000000000000000000000000000000000000001"),
                config_hash
            ),
            Err(ProtocolError::DeploymentAddressMismatch { .. })
        ));
    }
}
