//! Command Line Interface for the ledger checker.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use ledger_check_domain::entities::{AccountCurrency, AccountIdentifier, Currency};
use ledger_check_execution::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ledger-check")]
#[command(about = "Checks computed balances against a node and locates missing operations", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Recorded chain served as the node (JSON)
    #[arg(long)]
    chain: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync blocks and reconcile balances
    CheckData {
        /// First block to sync when nothing was synced yet
        #[arg(long)]
        start: Option<i64>,

        /// Last block to sync
        #[arg(long)]
        end: Option<i64>,
    },
    /// Locate the block missing operations of one account
    FindMissingOps {
        /// Account address
        #[arg(long)]
        account: String,

        /// Sub-account, if any
        #[arg(long)]
        sub_account: Option<String>,

        /// Currency symbol (e.g., BTC)
        #[arg(long)]
        currency: String,

        /// Currency decimals
        #[arg(long, default_value_t = 8)]
        decimals: u32,

        /// Block at which the balance was observed to be wrong
        #[arg(long)]
        observed_at: i64,
    },
}

fn load_config(path: Option<&Path>) -> Result<DataConfiguration> {
    match path {
        Some(path) => Ok(Configuration::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?
            .data),
        None => Ok(DataConfiguration::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    let fixture = ChainFixture::load(&cli.chain)?;
    let fetcher: Arc<dyn Fetcher> = Arc::new(RecordedChainFetcher::new(fixture)?);

    let registry = Arc::new(CancellationRegistry::new());
    {
        let registry = registry.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, aborting");
                registry.abort_all();
            }
        });
    }

    let verdict = match cli.command {
        Commands::CheckData { start, end } => {
            if start.is_some() {
                config.start_index = start;
            }
            if end.is_some() {
                config.end_index = end;
            }
            config.validate()?;

            Orchestrator::new(config, fetcher, registry).run().await?
        }
        Commands::FindMissingOps {
            account,
            sub_account,
            currency,
            decimals,
            observed_at,
        } => {
            let mut account = AccountIdentifier::new(account);
            if let Some(sub_account) = sub_account {
                account = account.with_sub_account(sub_account);
            }
            let account_currency = AccountCurrency::new(account, Currency::new(currency, decimals));
            info!(account = %account_currency, observed_at, "Searching for missing operations");

            Orchestrator::new(config, fetcher, registry)
                .find_missing_ops(&account_currency, observed_at)
                .await?
        }
    };

    println!("{}", verdict);
    std::process::exit(verdict.exit_code());
}
