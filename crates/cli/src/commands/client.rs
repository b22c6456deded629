//! Builds a connected `IBClient` from application configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use options_exec_core::AppConfig;
use options_exec_ib::{
    ExecutionStore, IBClient, IBConfig, InMemoryExecutionStore, PaperGateway, PgExecutionStore,
    Timeouts,
};

/// Map application configuration onto the client's configuration.
pub fn ib_config(config: &AppConfig) -> IBConfig {
    let gateway = &config.gateway;
    let execution = &config.execution;
    IBConfig {
        host: gateway.host.clone(),
        port: gateway.port,
        client_id: gateway.client_id,
        account: gateway.account.clone(),
        base_currency: gateway.base_currency.clone(),
        timeouts: Timeouts {
            connect: Duration::from_secs(gateway.connect_timeout_secs),
            quote: Duration::from_secs(execution.quote_timeout_secs),
            quote_grace: Duration::from_secs(execution.quote_grace_secs),
            order_ack: Duration::from_millis(execution.order_ack_ms),
            ..Timeouts::default()
        },
        cache_ttl: Duration::from_secs(execution.cache_ttl_secs),
        quote_concurrency: execution.quote_concurrency,
        market_data_lines: execution.market_data_lines,
        account_refresh: Duration::from_secs(execution.account_refresh_secs),
    }
}

async fn execution_store(config: &AppConfig) -> Result<Arc<dyn ExecutionStore>> {
    match &config.database.url {
        Some(url) => {
            let store = PgExecutionStore::connect(url, config.database.max_connections)
                .await
                .context("failed to open execution store")?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryExecutionStore::new())),
    }
}

/// Connect a client to the configured gateway.
///
/// # Errors
/// Returns an error if no transport is available for the configuration or
/// the handshake fails.
pub async fn connect(config: &AppConfig) -> Result<IBClient> {
    if !config.gateway.paper {
        bail!(
            "no socket transport is bundled; set gateway.paper = true (APP_GATEWAY__PAPER=true) \
             to run against the paper gateway"
        );
    }
    let client = IBClient::new(ib_config(config), Arc::new(PaperGateway::demo()))
        .with_execution_store(execution_store(config).await?);
    client
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", client.config().connection_url()))?;
    Ok(client)
}
