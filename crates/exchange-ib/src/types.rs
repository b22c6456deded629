//! Core types for IB options trading.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Options contract right (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    Call,
    Put,
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "C"),
            Self::Put => write!(f, "P"),
        }
    }
}

/// Security type of a gateway contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecType {
    Stock,
    Option,
    /// Combo/basket instrument.
    Bag,
}

impl std::fmt::Display for SecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stock => write!(f, "STK"),
            Self::Option => write!(f, "OPT"),
            Self::Bag => write!(f, "BAG"),
        }
    }
}

/// An options contract specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionsContract {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub strike: Decimal,
    pub right: OptionRight,
    /// Exchange routing (e.g., "SMART", "CBOE").
    pub exchange: String,
    /// Contract multiplier (100 for standard US equity options).
    pub multiplier: Decimal,
}

impl OptionsContract {
    /// Create a new standard US equity options contract.
    pub fn new(symbol: &str, expiry: NaiveDate, strike: Decimal, right: OptionRight) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            expiry,
            strike,
            right,
            exchange: "SMART".to_string(),
            multiplier: Decimal::from(100),
        }
    }

    /// Same contract with a different strike/expiry (used after synthetic resolution).
    pub fn with_listing(&self, strike: Decimal, expiry: NaiveDate) -> Self {
        Self {
            strike,
            expiry,
            ..self.clone()
        }
    }

    /// Stable key for caches and batch results (e.g., "NVDA|140|C|2026-03-20").
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.symbol,
            self.strike.normalize(),
            self.right,
            self.expiry
        )
    }

    /// Human-readable contract description (e.g., "NVDA 140C 2026-03-20").
    pub fn display_name(&self) -> String {
        format!(
            "{} {}{} {}",
            self.symbol,
            self.strike.normalize(),
            self.right,
            self.expiry
        )
    }
}

/// Instrument referenced by a strategy leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Instrument {
    Stock { symbol: String },
    Option(OptionsContract),
}

impl Instrument {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Stock { symbol } => symbol,
            Self::Option(contract) => &contract.symbol,
        }
    }

    pub fn sec_type(&self) -> SecType {
        match self {
            Self::Stock { .. } => SecType::Stock,
            Self::Option(_) => SecType::Option,
        }
    }

    pub fn as_option(&self) -> Option<&OptionsContract> {
        match self {
            Self::Option(contract) => Some(contract),
            Self::Stock { .. } => None,
        }
    }
}

/// Best bid/offer for one contract.
///
/// `synthesized` marks quotes derived from the last trade price
/// (`last × 0.95 / 1.05`); they are an uncalibrated approximation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NbboQuote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub mid: Decimal,
    pub last: Option<Decimal>,
    pub delayed: bool,
    pub synthesized: bool,
}

/// Listed expirations and strikes for an underlying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub symbol: String,
    pub exchange: String,
    pub expirations: BTreeSet<NaiveDate>,
    pub strikes: BTreeSet<Decimal>,
}

/// A synthetic strike/expiry snapped onto the listed chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedContract {
    pub strike: Decimal,
    pub expiry: NaiveDate,
}

/// IB account summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub currency: String,
    pub net_liquidation: Decimal,
    pub total_cash: Decimal,
    pub buying_power: Decimal,
    pub available_funds: Decimal,
    pub maintenance_margin: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

impl AccountSummary {
    /// Apply one gateway account tag. Returns false for tags we don't track
    /// or values that aren't numeric.
    pub fn apply_tag(&mut self, tag: &str, value: &str) -> bool {
        let Ok(value) = value.trim().parse::<Decimal>() else {
            return false;
        };
        let field = match tag {
            "NetLiquidation" => &mut self.net_liquidation,
            "TotalCashValue" => &mut self.total_cash,
            "BuyingPower" => &mut self.buying_power,
            "AvailableFunds" => &mut self.available_funds,
            "MaintMarginReq" => &mut self.maintenance_margin,
            "UnrealizedPnL" => &mut self.unrealized_pnl,
            "RealizedPnL" => &mut self.realized_pnl,
            _ => return false,
        };
        *field = value;
        true
    }

    /// A zero net liquidation means the fetch most likely failed.
    pub fn is_populated(&self) -> bool {
        self.net_liquidation > Decimal::ZERO
    }
}

/// Account tags requested by the one-shot summary.
pub const ACCOUNT_SUMMARY_TAGS: &[&str] = &[
    "NetLiquidation",
    "TotalCashValue",
    "BuyingPower",
    "AvailableFunds",
    "MaintMarginReq",
    "UnrealizedPnL",
    "RealizedPnL",
];

/// Identity of a position across the bare and live sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub symbol: String,
    pub sec_type: SecType,
    pub strike: Option<Decimal>,
    pub right: Option<OptionRight>,
    pub expiry: Option<NaiveDate>,
}

/// Position from the one-shot positions query: quantity and cost only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarePosition {
    pub account: String,
    pub key: PositionKey,
    pub con_id: Option<i64>,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
}

/// Position maintained from the portfolio push stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivePosition {
    pub account: String,
    pub key: PositionKey,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    pub market_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

/// Where a portfolio row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSource {
    Live,
    Snapshot,
}

/// Reconciled portfolio row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioPosition {
    pub key: PositionKey,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    pub market_price: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub source: PositionSource,
}

/// Account plus reconciled positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub account: AccountSummary,
    pub positions: Vec<PortfolioPosition>,
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Sign of the leg's cash flow: buying costs, selling collects.
    pub fn direction(self) -> Decimal {
        match self {
            Self::Buy => Decimal::NEGATIVE_ONE,
            Self::Sell => Decimal::ONE,
        }
    }

    pub fn inverse(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "MKT"),
            Self::Limit => write!(f, "LMT"),
        }
    }
}

/// One leg of a strategy. `price` is the strategy's proposed (theoretical) price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyLeg {
    pub instrument: Instrument,
    pub side: OrderSide,
    pub quantity: u32,
    pub price: Decimal,
}

/// A named set of legs to execute together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    pub legs: Vec<StrategyLeg>,
}

impl Strategy {
    pub fn option_leg_count(&self) -> usize {
        self.legs
            .iter()
            .filter(|leg| leg.instrument.sec_type() == SecType::Option)
            .count()
    }
}

/// Outcome of `submit_strategy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub success: bool,
    pub order_ids: Vec<i64>,
    pub message: String,
}

/// Order lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingSubmit,
    PreSubmitted,
    Submitted,
    PendingCancel,
    Filled,
    Cancelled,
    Inactive,
    Rejected { reason: String },
}

impl OrderStatus {
    /// Parse a gateway status string.
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "PendingSubmit" | "ApiPending" => Self::PendingSubmit,
            "PreSubmitted" => Self::PreSubmitted,
            "Submitted" => Self::Submitted,
            "PendingCancel" => Self::PendingCancel,
            "Filled" => Self::Filled,
            "Cancelled" | "ApiCancelled" => Self::Cancelled,
            "Inactive" => Self::Inactive,
            other => Self::Rejected {
                reason: format!("unknown status {other}"),
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Inactive | Self::Rejected { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Inactive | Self::Rejected { .. })
    }
}

/// An order created by this process, retained for the life of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub legs: Vec<StrategyLeg>,
    pub action: OrderSide,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub avg_fill_price: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Status transition pushed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: i64,
    pub status: OrderStatus,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub avg_fill_price: Decimal,
}

/// A confirmed execution from IB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub exec_id: String,
    pub order_id: i64,
    pub symbol: String,
    pub sec_type: SecType,
    pub side: OrderSide,
    pub shares: Decimal,
    pub price: Decimal,
    pub time: DateTime<Utc>,
    pub commission: Option<Decimal>,
}

impl Execution {
    /// Deduplication key: execution id, or a composite when the gateway omits it.
    pub fn dedup_key(&self) -> String {
        if !self.exec_id.is_empty() {
            return self.exec_id.clone();
        }
        format!(
            "{}|{}|{}|{}|{}",
            self.order_id,
            self.time.timestamp_millis(),
            self.symbol,
            self.side,
            self.shares.normalize()
        )
    }
}

/// Order that reached a terminal state, as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedOrder {
    pub order_id: i64,
    pub symbol: String,
    pub sec_type: SecType,
    pub action: OrderSide,
    pub quantity: Decimal,
    pub status: OrderStatus,
    pub avg_fill_price: Decimal,
    pub completed_at: DateTime<Utc>,
}

/// Working order as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: i64,
    pub symbol: String,
    pub sec_type: SecType,
    pub action: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub status: OrderStatus,
}
