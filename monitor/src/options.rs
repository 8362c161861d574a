//! The `holograph` CLI surface.

use std::path::PathBuf;

use alloy::{
    network::EthereumWallet,
    primitives::{Address, B256},
    signers::local::{coins_bip39::English, MnemonicBuilder},
};
use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use holograph_types::Environment;
use holograph_utils::logging;
use url::Url;

use crate::{provider::ProviderOptions, queue::QueueOptions};

#[derive(Debug, Parser)]
#[command(name = "holograph", version, about = "Holograph network monitor and tooling")]
pub struct Cli {
    /// Deployment environment.
    #[clap(
        long,
        env = "HOLOGRAPH_ENVIRONMENT",
        default_value = "develop",
        global = true
    )]
    pub env: Environment,

    /// Directory holding the networks config and progress files.
    #[clap(
        long,
        env = "HOLOGRAPH_CONFIG_DIR",
        default_value = ".holograph",
        global = true
    )]
    pub config_dir: PathBuf,

    /// Networks config file, resolved against the config dir unless absolute.
    #[clap(long, default_value = "networks.json", global = true)]
    pub networks_file: PathBuf,

    /// Progress file, resolved against the config dir unless absolute.
    #[clap(long, default_value = "blocks.json", global = true)]
    pub last_block_filename: PathBuf,

    #[clap(flatten)]
    pub logging: logging::Config,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn resolve(&self, file: &PathBuf) -> PathBuf {
        if file.is_absolute() {
            file.clone()
        } else {
            self.config_dir.join(file)
        }
    }

    pub fn networks_path(&self) -> PathBuf {
        self.resolve(&self.networks_file)
    }

    pub fn progress_path(&self) -> PathBuf {
        self.resolve(&self.last_block_filename)
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the multi-chain event indexer.
    Indexer(IndexerArgs),
    /// Observe contract deployments and replay them to peer chains.
    Propagator(PropagatorArgs),
    /// Correlate cross-chain job phases over block ranges and export JSON.
    Analyze(AnalyzeArgs),
    /// Request testnet funds from the faucet contract.
    Faucet(FaucetArgs),
    /// Bridge a holographable collection, seeded from its deployment
    /// transaction.
    #[command(name = "bridge:collection")]
    BridgeCollection(BridgeCollectionArgs),
    /// Deploy a holographable contract on a target chain.
    #[command(name = "create:contract")]
    CreateContract(CreateContractArgs),
}

#[derive(Debug, Args)]
pub struct IndexerArgs {
    /// Base URL of the operator API.
    #[clap(long)]
    pub host: Option<Url>,

    /// Networks to monitor. Defaults to every configured network.
    #[clap(long, value_delimiter = ',')]
    pub networks: Vec<String>,

    /// Serve the HTTP healthcheck endpoint.
    #[clap(long)]
    pub health_check: bool,

    #[clap(long, default_value = "6000")]
    pub health_check_port: u16,

    /// Re-play this many blocks behind the current head before going live.
    #[clap(long)]
    pub warp: Option<u64>,

    /// Operator API key, exchanged for a JWT in live environments.
    #[clap(long, env = "OPERATOR_API_KEY", hide_env_values = true)]
    pub operator_api_key: Option<String>,

    #[clap(flatten)]
    pub provider: ProviderOptions,

    #[clap(flatten)]
    pub queue: QueueOptions,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PropagatorMode {
    /// Observe and log deployments only.
    Listen,
    /// Log replay transactions instead of sending them; an operator submits
    /// by hand.
    Manual,
    /// Replay deployments automatically.
    Auto,
}

#[derive(Debug, Args)]
pub struct PropagatorArgs {
    #[clap(long, value_enum, default_value = "listen")]
    pub mode: PropagatorMode,

    #[clap(long, value_delimiter = ',')]
    pub networks: Vec<String>,

    /// Resume from the persisted per-chain progress.
    #[clap(long)]
    pub sync: bool,

    /// Process the trailing block range and exit.
    #[clap(long)]
    pub repair: Option<u64>,

    /// Replay a single deployment, JSON-encoded `{network, tx}`.
    #[clap(long)]
    pub recover: Option<String>,

    /// Like `--recover` but read from a file.
    #[clap(long)]
    pub recover_file: Option<PathBuf>,

    #[clap(flatten)]
    pub provider: ProviderOptions,

    #[clap(flatten)]
    pub wallet: WalletOptions,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// JSON array of `{network, startBlock, endBlock}`; an endBlock of 0
    /// means the head at run time.
    #[clap(long)]
    pub scope: String,

    /// Path of the exported job archive.
    #[clap(long)]
    pub output: PathBuf,

    #[clap(flatten)]
    pub provider: ProviderOptions,
}

#[derive(Debug, Args)]
pub struct FaucetArgs {
    #[clap(long)]
    pub network: String,

    /// The faucet contract address.
    #[clap(long)]
    pub address: Address,

    #[clap(flatten)]
    pub provider: ProviderOptions,

    #[clap(flatten)]
    pub wallet: WalletOptions,
}

#[derive(Debug, Args)]
pub struct BridgeCollectionArgs {
    /// The collection's deployment transaction.
    #[clap(long)]
    pub tx: B256,

    /// Network the deployment transaction lives on.
    #[clap(long)]
    pub network: String,

    /// Network to bridge the collection to.
    #[clap(long)]
    pub destination: String,

    #[clap(flatten)]
    pub provider: ProviderOptions,

    #[clap(flatten)]
    pub wallet: WalletOptions,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DeploymentType {
    /// Derive the deployment config from an existing deployment transaction.
    DeployedTx,
    /// Read a deployment config from a JSON file.
    DeploymentConfig,
    /// Build a fresh config from a creation description.
    CreateConfig,
}

#[derive(Debug, Args)]
pub struct CreateContractArgs {
    #[clap(long, value_enum)]
    pub deployment_type: DeploymentType,

    /// Source deployment transaction (for `deployed-tx`).
    #[clap(long)]
    pub tx: Option<B256>,

    /// Network of the source transaction.
    #[clap(long)]
    pub tx_network: Option<String>,

    /// Network to deploy on.
    #[clap(long)]
    pub target_network: String,

    /// Deployment config file (for the config-driven types).
    #[clap(long)]
    pub config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub provider: ProviderOptions,

    #[clap(flatten)]
    pub wallet: WalletOptions,
}

/// Wallet derivation for the write-side commands.
#[derive(Clone, Debug, Args)]
pub struct WalletOptions {
    /// The mnemonic to derive the signing key from.
    #[clap(long, env = "MNEMONIC", hide_env_values = true)]
    pub mnemonic: Option<String>,

    /// The mnemonic account index.
    #[clap(long, env = "ACCOUNT_INDEX", default_value = "0")]
    pub account_index: u32,
}

impl WalletOptions {
    pub fn wallet(&self) -> Result<(EthereumWallet, Address)> {
        let Some(mnemonic) = &self.mnemonic else {
            bail!("a mnemonic is required for write commands; set MNEMONIC");
        };
        let signer = MnemonicBuilder::<English>::default()
            .phrase(mnemonic.as_str())
            .index(self.account_index)?
            .build()?;
        let account = signer.address();
        Ok((EthereumWallet::from(signer), account))
    }
}
