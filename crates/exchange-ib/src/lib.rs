//! Interactive Brokers gateway client and options order-execution engine.
//!
//! This crate provides:
//! - A session over a pluggable `Transport` with one dispatch loop and
//!   per-request correlation (timeouts, cancels, exactly-once completion)
//! - Contract and option-chain resolution with TTL caching
//! - NBBO quotes with delayed-data fallback and synthesized spreads
//! - Live account and portfolio state with one-shot fallbacks
//! - Strategy submission as combo orders with per-leg fallback
//! - A paper gateway for running the full pipeline without IB
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use options_exec_ib::{IBClient, IBConfig, OrderType, PaperGateway, Strategy};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = IBClient::new(IBConfig::paper(), Arc::new(PaperGateway::demo()));
//!     client.connect().await?;
//!
//!     let account = client.account_summary().await?;
//!     println!("Net liquidation: {}", account.net_liquidation);
//!
//!     let strategy: Strategy = serde_json::from_str(&std::fs::read_to_string("spread.json")?)?;
//!     let result = client.submit_strategy(&strategy, OrderType::Limit).await;
//!     println!("{}", result.message);
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod client;
pub mod correlator;
pub mod error;
pub mod execution;
pub mod live;
pub mod market_data;
pub mod options_chain;
pub mod orders;
pub mod paper;
pub mod portfolio;
pub mod protocol;
pub mod session;
pub mod store;
pub mod tick;
pub mod transport;
pub mod types;

// Re-export main types
pub use account::{AccountCache, AccountSource};
pub use client::{IBClient, IBConfig, Timeouts};
pub use error::{IbError, Result};
pub use execution::{LegPricePricer, ResolvedLeg, TheoreticalPricer};
pub use market_data::build_quote;
pub use options_chain::{nearest_listing, TtlCache};
pub use paper::{PaperGateway, PaperMarket, PaperQuote};
pub use portfolio::reconcile;
pub use session::{ConnectionState, SessionEvent};
pub use store::{ExecutionStore, InMemoryExecutionStore, PgExecutionStore};
pub use tick::round_to_tick;
pub use transport::{GatewayLink, Transport};
pub use types::{
    AccountSummary, BarePosition, ChainParams, CompletedOrder, Execution, Instrument, NbboQuote,
    OpenOrder, OptionRight, OptionsContract, Order, OrderSide, OrderStatus, OrderType,
    OrderUpdate, Portfolio, PortfolioPosition, PositionSource, SecType, Strategy, StrategyLeg,
    SubmitResult,
};
