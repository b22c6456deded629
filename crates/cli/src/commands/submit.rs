//! Strategy submission command.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use options_exec_core::AppConfig;
use options_exec_ib::{OrderType, SessionEvent, Strategy};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::info;

use super::{connect, print_json};

/// Arguments for the submit command.
#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    /// Strategy JSON file: {"name": ..., "legs": [...]}
    #[arg(long)]
    pub strategy: PathBuf,

    /// Submit market orders instead of limit orders
    #[arg(long)]
    pub market: bool,
}

/// Load and sanity-check a strategy file.
pub fn load_strategy(path: &PathBuf) -> Result<Strategy> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read strategy file {}", path.display()))?;
    let strategy: Strategy = serde_json::from_str(&raw)
        .with_context(|| format!("invalid strategy file {}", path.display()))?;
    if strategy.legs.is_empty() {
        bail!("strategy '{}' has no legs", strategy.name);
    }
    Ok(strategy)
}

/// Submits a strategy and prints the result with the order events seen.
///
/// # Errors
/// Returns an error if the strategy file is invalid or the connection fails.
pub async fn run_submit(config: &AppConfig, args: SubmitArgs) -> Result<()> {
    let strategy = load_strategy(&args.strategy)?;
    let order_type = if args.market {
        OrderType::Market
    } else {
        OrderType::Limit
    };

    let client = connect(config).await?;
    let mut events = client.subscribe();
    let result = client.submit_strategy(&strategy, order_type).await;
    info!(
        success = result.success,
        orders = result.order_ids.len(),
        "Strategy submitted"
    );

    let mut updates = Vec::new();
    loop {
        match events.try_recv() {
            Ok(SessionEvent::OrderStatus(update)) => updates.push(update),
            Ok(SessionEvent::Connection(_)) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    print_json(&serde_json::json!({
        "result": result,
        "order_updates": updates,
    }))?;
    client.disconnect().await?;
    Ok(())
}
