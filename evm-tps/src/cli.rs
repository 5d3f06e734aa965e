use std::path::PathBuf;
use std::sync::Arc;

use eyre::Context;
use evm_tps::utils::increase_nofile_limit;
use evm_tps::{Config, Session, Stats, Variant};
use thousands::Separable;
use tracing::{info, warn};

/// Sockets the server front-end should be able to hold open.
const SERVER_CONNECTIONS: u64 = 4096;

#[derive(Debug, clap::Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Send the configured number of transactions and report throughput.
    Run(RunArgs),
    /// Derive the gas limit and pool ceiling, then exit.
    Estimate(RunArgs),
    /// Serve the HTTP front-end that submits one transaction per request.
    Server(RunArgs),
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// TOML file merged over the built-in defaults.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub endpoint: Option<String>,

    /// substrate, geth or parity.
    #[arg(long)]
    pub variant: Option<Variant>,

    #[arg(short, long)]
    pub transactions: Option<u64>,

    /// Number of sender/receiver pairs.
    #[arg(short, long)]
    pub accounts: Option<usize>,
}

impl RunArgs {
    pub fn load_config(&self) -> eyre::Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(endpoint) = &self.endpoint {
            config.node.endpoint = endpoint.clone();
        }
        if let Some(variant) = self.variant {
            config.node.variant = variant;
        }
        if let Some(transactions) = self.transactions {
            config.run.transactions = transactions;
        }
        if let Some(accounts) = self.accounts {
            config.accounts.count = accounts;
        }
        config.validate()?;
        Ok(config)
    }
}

impl Command {
    pub async fn run(self) -> eyre::Result<()> {
        match self {
            Command::Run(args) => {
                let config = args.load_config()?;
                if config.run.estimate_only {
                    return estimate(config).await;
                }
                let mut session = Session::connect(config).await?;
                let report = session.run(Arc::new(Stats::new())).await.wrap_err("benchmark run failed")?;
                println!("{report}");
                if !report.all_passed() {
                    warn!("balance assertions failed");
                }
                Ok(())
            }
            Command::Estimate(args) => estimate(args.load_config()?).await,
            Command::Server(args) => {
                if let Err(err) = increase_nofile_limit(SERVER_CONNECTIONS * 10) {
                    warn!(%err, "failed to increase file descriptor limit");
                }
                let session = Session::connect(args.load_config()?).await?;
                evm_tps::server::serve(session, Arc::new(Stats::new())).await
            }
        }
    }
}

async fn estimate(config: Config) -> eyre::Result<()> {
    let session = Session::connect(config).await?;
    let estimate = session.estimate;
    info!("estimate only, not sending transactions");
    println!("estimateGas:       {}", estimate.estimated_gas.separate_with_commas());
    println!("gas limit:         {}", estimate.gas_limit.separate_with_commas());
    println!("block gas limit:   {}", estimate.block_gas_limit.separate_with_commas());
    println!("max txn per block: {}", estimate.max_txn_per_block.separate_with_commas());
    println!("txpool ceiling:    {}", session.ceiling.separate_with_commas());
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn overrides_apply_over_the_file() {
        let cli = Cli::parse_from(["evm-tps", "run", "--endpoint", "http://10.0.0.1:8545", "--variant", "geth", "-t", "50"]);
        let Command::Run(args) = cli.cmd else { panic!("expected run") };
        let config = args.load_config().unwrap();

        assert_eq!(config.node.endpoint, "http://10.0.0.1:8545");
        assert_eq!(config.node.variant, Variant::Geth);
        assert_eq!(config.run.transactions, 50);
        assert_eq!(config.accounts.count, 100);
    }

    #[test]
    fn zero_accounts_is_rejected() {
        let cli = Cli::parse_from(["evm-tps", "server", "--accounts", "0"]);
        let Command::Server(args) = cli.cmd else { panic!("expected server") };
        assert!(args.load_config().is_err());
    }
}
