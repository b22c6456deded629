use anyhow::Result;
use clap::{Parser, Subcommand};
use options_exec_core::{AppConfig, ConfigLoader};

mod commands;

use commands::{QuoteArgs, SubmitArgs};

#[derive(Parser)]
#[command(name = "options-exec")]
#[command(about = "Options order execution against IB Gateway", long_about = None)]
struct Cli {
    /// Configuration profile layered over config/Config.toml
    #[arg(short, long, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the account summary
    Account,
    /// Show the account with reconciled positions
    Portfolio,
    /// List expirations and strikes for an underlying
    Chain {
        /// Underlying symbol (e.g., "SPY")
        #[arg(long)]
        symbol: String,
    },
    /// Quote one option contract
    Quote(QuoteArgs),
    /// Submit a strategy from a JSON file
    Submit(SubmitArgs),
    /// Show tracked, open and completed orders
    Orders,
    /// Show executions
    Executions,
}

fn load_config(profile: Option<&str>) -> Result<AppConfig> {
    match profile {
        Some(profile) => ConfigLoader::load_with_profile(profile),
        None => ConfigLoader::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.profile.as_deref())?;

    match cli.command {
        Commands::Account => commands::run_account(&config).await?,
        Commands::Portfolio => commands::run_portfolio(&config).await?,
        Commands::Chain { symbol } => commands::run_chain(&config, &symbol).await?,
        Commands::Quote(args) => commands::run_quote(&config, args).await?,
        Commands::Submit(args) => commands::run_submit(&config, args).await?,
        Commands::Orders => commands::run_orders(&config).await?,
        Commands::Executions => commands::run_executions(&config).await?,
    }

    Ok(())
}
