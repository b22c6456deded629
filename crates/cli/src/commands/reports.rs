//! Read-only account and order reports.

use std::sync::Arc;

use anyhow::Result;
use options_exec_core::AppConfig;
use options_exec_ib::AccountCache;

use super::{connect, print_json};

/// Prints the account summary.
///
/// # Errors
/// Returns an error if the gateway connection or the summary request fails.
pub async fn run_account(config: &AppConfig) -> Result<()> {
    let client = Arc::new(connect(config).await?);
    let cache = AccountCache::new(client.clone(), client.config().account_refresh);
    print_json(&cache.get().await?)?;
    client.disconnect().await?;
    Ok(())
}

/// Prints the account with reconciled positions.
///
/// # Errors
/// Returns an error if the gateway connection or a portfolio query fails.
pub async fn run_portfolio(config: &AppConfig) -> Result<()> {
    let client = connect(config).await?;
    print_json(&client.full_portfolio().await?)?;
    client.disconnect().await?;
    Ok(())
}

/// Prints orders placed by this process alongside the gateway's open and
/// completed orders.
///
/// # Errors
/// Returns an error if the gateway connection or an order query fails.
pub async fn run_orders(config: &AppConfig) -> Result<()> {
    let client = connect(config).await?;
    let open = client.open_orders().await?;
    let completed = client.completed_orders().await?;
    print_json(&serde_json::json!({
        "tracked": client.orders(),
        "open": open,
        "completed": completed,
    }))?;
    client.disconnect().await?;
    Ok(())
}

/// Prints executions reported by the gateway.
///
/// # Errors
/// Returns an error if the gateway connection or the executions query fails.
pub async fn run_executions(config: &AppConfig) -> Result<()> {
    let client = connect(config).await?;
    print_json(&client.executions().await?)?;
    client.disconnect().await?;
    Ok(())
}
