use clap::Parser;
use holograph_monitor::{
    analyzer, commands, indexer,
    options::{Cli, Command},
    propagator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    cli.logging.init();

    tracing::info!(env = %cli.env, config_dir = %cli.config_dir.display(), "starting");

    match &cli.command {
        Command::Indexer(args) => indexer::run(&cli, args).await,
        Command::Propagator(args) => propagator::run(&cli, args).await,
        Command::Analyze(args) => analyzer::run(&cli, args).await,
        Command::Faucet(args) => commands::faucet(&cli, args).await,
        Command::BridgeCollection(args) => commands::bridge_collection(&cli, args).await,
        Command::CreateContract(args) => commands::create_contract(&cli, args).await,
    }
}
