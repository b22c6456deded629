//! IB Gateway/TWS client: configuration and the facade that owns every component.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

use crate::error::Result;
use crate::execution::{LegPricePricer, TheoreticalPricer};
use crate::market_data::QuoteOracle;
use crate::options_chain::ContractCache;
use crate::session::{ConnectionState, IbSession, SessionEvent};
use crate::store::ExecutionStore;
use crate::transport::Transport;

/// Deadlines for every timed gateway interaction.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Handshake: transport connect through next-valid-id.
    pub connect: Duration,
    pub contract_details: Duration,
    pub chain_params: Duration,
    /// Hard ceiling for one NBBO request.
    pub quote: Duration,
    /// After this, a quote settles on last/close if bid/ask are missing.
    pub quote_grace: Duration,
    pub account_summary: Duration,
    /// How long to wait for the live account subscription before querying.
    pub live_account_wait: Duration,
    pub positions: Duration,
    pub orders: Duration,
    pub executions: Duration,
    /// Window in which a combo rejection triggers per-leg fallback.
    pub order_ack: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            contract_details: Duration::from_secs(10),
            chain_params: Duration::from_secs(15),
            quote: Duration::from_secs(8),
            quote_grace: Duration::from_secs(3),
            account_summary: Duration::from_secs(30),
            live_account_wait: Duration::from_secs(5),
            positions: Duration::from_secs(10),
            orders: Duration::from_secs(10),
            executions: Duration::from_secs(10),
            order_ack: Duration::from_secs(2),
        }
    }
}

/// IB client configuration.
#[derive(Debug, Clone)]
pub struct IBConfig {
    /// Gateway/TWS host (use 127.0.0.1, not localhost; TWS may block IPv6).
    pub host: String,
    /// Gateway port (4001 = live, 4002 = paper).
    pub port: u16,
    /// Client ID (unique per connection).
    pub client_id: i32,
    /// Account for live updates and orders; first managed account when unset.
    pub account: Option<String>,
    pub base_currency: String,
    pub timeouts: Timeouts,
    /// Contract id and chain cache lifetime.
    pub cache_ttl: Duration,
    /// Default in-flight cap for batch quotes.
    pub quote_concurrency: usize,
    /// Market-data lines shared by all quote requests.
    pub market_data_lines: usize,
    /// Minimum interval between `AccountCache` refreshes.
    pub account_refresh: Duration,
}

impl Default for IBConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4002, // Paper trading by default
            client_id: 100,
            account: None,
            base_currency: "USD".to_string(),
            timeouts: Timeouts::default(),
            cache_ttl: Duration::from_secs(300),
            quote_concurrency: 50,
            market_data_lines: 50,
            account_refresh: Duration::from_secs(30),
        }
    }
}

impl IBConfig {
    /// Paper trading configuration.
    pub fn paper() -> Self {
        Self::default()
    }

    /// Live trading configuration.
    pub fn live() -> Self {
        Self {
            port: 4001,
            ..Self::default()
        }
    }

    /// Gateway address.
    pub fn connection_url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Protocol client and execution engine for one gateway connection.
///
/// Constructed explicitly and owned by the caller; `disconnect` closes the
/// connection and fails every pending request.
pub struct IBClient {
    config: IBConfig,
    pub(crate) session: IbSession,
    pub(crate) contracts: ContractCache,
    pub(crate) quotes: QuoteOracle,
    pub(crate) pricer: Arc<dyn TheoreticalPricer>,
    pub(crate) store: Option<Arc<dyn ExecutionStore>>,
}

impl IBClient {
    /// Build a client over the given transport. Nothing is sent until `connect`.
    pub fn new(config: IBConfig, transport: Arc<dyn Transport>) -> Self {
        let session = IbSession::new(config.clone(), transport);
        let correlator = session.correlator();
        let contracts = ContractCache::new(correlator.clone(), &config);
        let quotes = QuoteOracle::new(correlator, &config);
        Self {
            config,
            session,
            contracts,
            quotes,
            pricer: Arc::new(LegPricePricer),
            store: None,
        }
    }

    /// Replace the fallback pricer used when no live quote is available.
    pub fn with_pricer(mut self, pricer: Arc<dyn TheoreticalPricer>) -> Self {
        self.pricer = pricer;
        self
    }

    /// Persist executions returned by `executions()`.
    pub fn with_execution_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Connect to IB Gateway/TWS and wait for the handshake.
    pub async fn connect(&self) -> Result<()> {
        info!(
            url = %self.config.connection_url(),
            client_id = self.config.client_id,
            "Connecting to IB Gateway"
        );
        self.session.connect().await
    }

    /// Close the connection, failing in-flight requests.
    pub async fn disconnect(&self) -> Result<()> {
        self.session.disconnect().await
    }

    /// Explicit disconnect followed by a fresh connect.
    pub async fn reconnect(&self) -> Result<()> {
        self.session.disconnect().await?;
        self.session.connect().await
    }

    /// Check if the connection is alive.
    pub fn is_connected(&self) -> bool {
        self.session.state() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Order-status transitions and connection state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    /// Get the configuration.
    pub fn config(&self) -> &IBConfig {
        &self.config
    }

    pub fn session(&self) -> &IbSession {
        &self.session
    }
}
