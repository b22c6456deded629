//! Option chain and quote commands.

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Args, ValueEnum};
use options_exec_core::AppConfig;
use options_exec_ib::{OptionRight, OptionsContract};
use rust_decimal::Decimal;
use tracing::info;

use super::{connect, print_json};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Right {
    #[value(alias = "c")]
    Call,
    #[value(alias = "p")]
    Put,
}

impl From<Right> for OptionRight {
    fn from(right: Right) -> Self {
        match right {
            Right::Call => OptionRight::Call,
            Right::Put => OptionRight::Put,
        }
    }
}

/// Arguments for the quote command.
#[derive(Args, Debug, Clone)]
pub struct QuoteArgs {
    /// Underlying symbol (e.g., "SPY")
    #[arg(long)]
    pub symbol: String,

    /// Strike price; snapped to the nearest listed strike
    #[arg(long)]
    pub strike: Decimal,

    #[arg(long, value_enum)]
    pub right: Right,

    /// Expiration date (YYYY-MM-DD); snapped to the nearest listed expiry
    #[arg(long)]
    pub expiry: NaiveDate,
}

/// Prints listed expirations and strikes for an underlying.
///
/// # Errors
/// Returns an error if the gateway connection fails or the chain is unavailable.
pub async fn run_chain(config: &AppConfig, symbol: &str) -> Result<()> {
    let client = connect(config).await?;
    let chain = client
        .option_chain_params(symbol)
        .await
        .ok_or_else(|| anyhow!("no option chain available for {symbol}"))?;
    info!(
        symbol = chain.symbol,
        expirations = chain.expirations.len(),
        strikes = chain.strikes.len(),
        "Option chain"
    );
    print_json(&chain)?;
    client.disconnect().await?;
    Ok(())
}

/// Prints the NBBO for one option contract, after snapping it to the chain.
///
/// # Errors
/// Returns an error if the gateway connection fails or no listing matches.
pub async fn run_quote(config: &AppConfig, args: QuoteArgs) -> Result<()> {
    let client = connect(config).await?;
    let listed = client
        .resolve_option_contract(&args.symbol, args.strike, args.expiry)
        .await
        .ok_or_else(|| anyhow!("no listed contract near {} {}", args.symbol, args.strike))?;
    let contract = OptionsContract::new(&args.symbol, listed.expiry, listed.strike, args.right.into());

    let quote = client.option_nbbo(&contract).await;
    print_json(&serde_json::json!({
        "contract": contract.display_name(),
        "quote": quote,
    }))?;
    client.disconnect().await?;
    Ok(())
}
