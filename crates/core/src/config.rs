use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub execution: ExecutionConfig,
    pub database: DatabaseConfig,
}

/// Connection to IB Gateway/TWS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    /// 4002 paper, 4001 live.
    pub port: u16,
    pub client_id: i32,
    /// Trade this account instead of the first managed one.
    pub account: Option<String>,
    pub base_currency: String,
    /// Serve requests from the in-process paper gateway.
    pub paper: bool,
    pub connect_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4002,
            client_id: 100,
            account: None,
            base_currency: "USD".to_string(),
            paper: true,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub cache_ttl_secs: u64,
    pub quote_timeout_secs: u64,
    pub quote_grace_secs: u64,
    pub quote_concurrency: usize,
    pub market_data_lines: usize,
    pub order_ack_ms: u64,
    pub account_refresh_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            quote_timeout_secs: 8,
            quote_grace_secs: 3,
            quote_concurrency: 50,
            market_data_lines: 50,
            order_ack_ms: 2000,
            account_refresh_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Execution history is kept in memory when unset.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}
