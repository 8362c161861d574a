//! One-shot write-side commands: faucet, collection bridging and contract
//! creation.

use alloy::{
    consensus::Transaction as _,
    primitives::{Bytes, B256, U256},
    providers::{Provider, ProviderBuilder, WsConnect},
    sol,
    sol_types::SolCall,
};
use anyhow::Context;
use holograph_types::{
    bridge::{deployOutCall, DeploymentConfig, HolographBridge, HolographFactory},
    Chain, NetworksConfig,
};
use serde::Deserialize;

use crate::{
    executor::{execute_transaction, ExecutorOptions},
    options::{BridgeCollectionArgs, Cli, CreateContractArgs, DeploymentType, FaucetArgs},
    propagator::extract_deployment_config,
    provider::ProviderPool,
};

sol! {
    #[sol(rpc)]
    contract HolographFaucet {
        function requestTokens() external;
    }
}

/// Default gas envelope for a bridge-out request; the destination executor
/// re-estimates on arrival.
const BRIDGE_OUT_GAS_LIMIT: u64 = 1_000_000;

/// A [`DeploymentConfig`] as read from a config file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentConfigFile {
    contract_type: B256,
    chain_type: u32,
    #[serde(default)]
    salt: B256,
    byte_code: Bytes,
    #[serde(default)]
    init_code: Bytes,
}

impl From<DeploymentConfigFile> for DeploymentConfig {
    fn from(file: DeploymentConfigFile) -> Self {
        Self {
            contractType: file.contract_type,
            chainType: file.chain_type,
            salt: file.salt,
            byteCode: file.byte_code,
            initCode: file.init_code,
        }
    }
}

fn select_chain(cli: &Cli, name: &str) -> anyhow::Result<Chain> {
    let networks = NetworksConfig::load(&cli.networks_path())?;
    Ok(networks.select(&[name.to_string()])?.remove(0))
}

/// Run `op` with a wallet-backed provider for the chain, bridging the ws/http
/// transport split.
macro_rules! with_wallet_provider {
    ($chain:expr, $wallet:expr, $provider:ident, $body:expr) => {{
        if $chain.is_ws() {
            let $provider = ProviderBuilder::new()
                .wallet($wallet)
                .on_ws(WsConnect::new($chain.endpoint.to_string()))
                .await?;
            $body
        } else {
            let $provider = ProviderBuilder::new()
                .wallet($wallet)
                .on_http($chain.endpoint.clone());
            $body
        }
    }};
}

/// `faucet`: request testnet funds from the faucet contract.
pub async fn faucet(cli: &Cli, args: &FaucetArgs) -> anyhow::Result<()> {
    let chain = select_chain(cli, &args.network)?;
    let (wallet, account) = args.wallet.wallet()?;
    tracing::info!(chain = %chain.name, %account, "requesting faucet funds");

    with_wallet_provider!(chain, wallet, provider, {
        let contract = HolographFaucet::new(args.address, provider.clone());
        let call = contract.requestTokens();
        let receipt =
            execute_transaction(&chain, &provider, call, true, &ExecutorOptions::default())
                .await?
                .context("faucet request was skipped")?;
        anyhow::ensure!(receipt.status(), "faucet transaction reverted");
        tracing::info!(tx = %receipt.transaction_hash, "faucet funds granted");
        Ok(())
    })
}

/// Fetch a transaction and pull its deployment config out of the calldata.
async fn deployment_config_from_tx(
    pool: &ProviderPool,
    network: &str,
    tx_hash: B256,
) -> anyhow::Result<DeploymentConfig> {
    let client = pool.get(network).await?;
    let tx = client
        .get_transaction_by_hash(tx_hash)
        .await?
        .with_context(|| format!("transaction {tx_hash} not found on {network}"))?;
    extract_deployment_config(tx.input())
        .with_context(|| format!("transaction {tx_hash} carries no deployment config"))
}

/// `bridge:collection`: re-deploy a collection on the destination chain by
/// bridging its deployment config.
pub async fn bridge_collection(cli: &Cli, args: &BridgeCollectionArgs) -> anyhow::Result<()> {
    let source = select_chain(cli, &args.network)?;
    let destination = select_chain(cli, &args.destination)?;
    let pool = ProviderPool::new(vec![source.clone()], args.provider.clone());

    let config = deployment_config_from_tx(&pool, &source.name, args.tx).await?;
    let collection = config.deployment_address(source.peers.factory);
    tracing::info!(
        %collection,
        from = %source.name,
        to = %destination.name,
        "bridging collection"
    );

    let (wallet, _) = args.wallet.wallet()?;
    let payload: Bytes = deployOutCall {
        toChain: destination.holograph_id,
        config,
    }
    .abi_encode()
    .into();

    with_wallet_provider!(source, wallet, provider, {
        let gas_price = crate::executor::gas_price(&provider, &source).await?;
        let bridge = HolographBridge::new(source.peers.bridge, provider.clone());
        let call = bridge.bridgeOutRequest(
            destination.holograph_id,
            collection,
            U256::from(BRIDGE_OUT_GAS_LIMIT),
            U256::from(gas_price),
            payload,
        );
        let receipt =
            execute_transaction(&source, &provider, call, true, &ExecutorOptions::default())
                .await?
                .context("bridge-out was skipped")?;
        anyhow::ensure!(receipt.status(), "bridge-out transaction reverted");
        tracing::info!(tx = %receipt.transaction_hash, "collection bridge-out submitted");
        Ok(())
    })
}

/// `create:contract`: deploy a holographable contract on the target chain.
pub async fn create_contract(cli: &Cli, args: &CreateContractArgs) -> anyhow::Result<()> {
    let target = select_chain(cli, &args.target_network)?;

    let config: DeploymentConfig = match args.deployment_type {
        DeploymentType::DeployedTx => {
            let tx = args
                .tx
                .context("--tx is required for --deployment-type deployed-tx")?;
            let network = args
                .tx_network
                .clone()
                .context("--tx-network is required for --deployment-type deployed-tx")?;
            let source = select_chain(cli, &network)?;
            let pool = ProviderPool::new(vec![source], args.provider.clone());
            deployment_config_from_tx(&pool, &network, tx).await?
        },
        DeploymentType::DeploymentConfig | DeploymentType::CreateConfig => {
            let path = args
                .config_file
                .as_ref()
                .context("--config-file is required for config-driven deployments")?;
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading deployment config {}", path.display()))?;
            let file: DeploymentConfigFile = serde_json::from_str(&raw)
                .with_context(|| format!("parsing deployment config {}", path.display()))?;
            file.into()
        },
    };

    let address = config.deployment_address(target.peers.factory);
    tracing::info!(chain = %target.name, %address, "deploying holographable contract");

    let (wallet, _) = args.wallet.wallet()?;
    with_wallet_provider!(target, wallet, provider, {
        let factory = HolographFactory::new(target.peers.factory, provider.clone());
        let call = factory.deployHolographableContract(config);
        let receipt =
            execute_transaction(&target, &provider, call, true, &ExecutorOptions::default())
                .await?
                .context("deployment was skipped")?;
        anyhow::ensure!(receipt.status(), "deployment transaction reverted");
        tracing::info!(tx = %receipt.transaction_hash, %address, "contract deployed");
        Ok(())
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_deployment_config_file_defaults() {
        let json = serde_json::json!({
            "contractType": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "chainType": 4_000_000_001u32,
            "byteCode": "0x6080",
        });
        let file: DeploymentConfigFile = serde_json::from_value(json).unwrap();
        let config = DeploymentConfig::from(file);
        assert_eq!(config.salt, B256::ZERO);
        assert!(config.initCode.is_empty());
        assert_eq!(config.byteCode, Bytes::from_static(b"\x60\x80"));
    }
}
