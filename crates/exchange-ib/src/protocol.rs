//! Typed gateway messages.
//!
//! The transport delivers `GatewayEvent`s and accepts `GatewayRequest`s;
//! framing and wire encoding live below this layer.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{
    CompletedOrder, Execution, OpenOrder, OptionRight, OptionsContract, OrderSide, OrderStatus,
    OrderType, SecType,
};

/// Correlation id.
pub type RequestId = i64;

/// Sentinel id for the id-less positions stream.
pub const ALL_POSITIONS_ID: RequestId = 2_000_000_001;
/// Sentinel id for the id-less open-orders stream.
pub const ALL_OPEN_ORDERS_ID: RequestId = 2_000_000_002;
/// Sentinel id for the id-less completed-orders stream.
pub const COMPLETED_ORDERS_ID: RequestId = 2_000_000_003;

/// First id handed out by the correlator; keeps request ids clear of broker order ids.
pub const FIRST_REQUEST_ID: RequestId = 1_000_000_000;

/// Market data type requested on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketDataType {
    RealTime = 1,
    Frozen = 2,
    Delayed = 3,
    DelayedFrozen = 4,
}

/// One leg of a BAG contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboLeg {
    pub con_id: i64,
    pub ratio: u32,
    pub action: OrderSide,
    pub exchange: String,
}

/// Gateway-level contract description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub con_id: Option<i64>,
    pub symbol: String,
    pub sec_type: SecType,
    pub currency: String,
    pub exchange: String,
    pub expiry: Option<NaiveDate>,
    pub strike: Option<Decimal>,
    pub right: Option<OptionRight>,
    pub multiplier: Option<Decimal>,
    pub combo_legs: Vec<ComboLeg>,
}

impl Contract {
    pub fn stock(symbol: &str) -> Self {
        Self {
            con_id: None,
            symbol: symbol.to_uppercase(),
            sec_type: SecType::Stock,
            currency: "USD".to_string(),
            exchange: "SMART".to_string(),
            expiry: None,
            strike: None,
            right: None,
            multiplier: None,
            combo_legs: Vec::new(),
        }
    }

    pub fn option(contract: &OptionsContract) -> Self {
        Self {
            con_id: None,
            symbol: contract.symbol.clone(),
            sec_type: SecType::Option,
            currency: "USD".to_string(),
            exchange: contract.exchange.clone(),
            expiry: Some(contract.expiry),
            strike: Some(contract.strike),
            right: Some(contract.right),
            multiplier: Some(contract.multiplier),
            combo_legs: Vec::new(),
        }
    }

    pub fn combo(symbol: &str, legs: Vec<ComboLeg>) -> Self {
        Self {
            con_id: None,
            symbol: symbol.to_uppercase(),
            sec_type: SecType::Bag,
            currency: "USD".to_string(),
            exchange: "SMART".to_string(),
            expiry: None,
            strike: None,
            right: None,
            multiplier: None,
            combo_legs: legs,
        }
    }

    /// Option view of this contract, if it describes a single option.
    pub fn as_options_contract(&self) -> Option<OptionsContract> {
        match (self.sec_type, self.expiry, self.strike, self.right) {
            (SecType::Option, Some(expiry), Some(strike), Some(right)) => {
                let mut contract = OptionsContract::new(&self.symbol, expiry, strike, right);
                contract.exchange = self.exchange.clone();
                if let Some(multiplier) = self.multiplier {
                    contract.multiplier = multiplier;
                }
                Some(contract)
            }
            _ => None,
        }
    }
}

/// Order ticket sent with `PlaceOrder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTicket {
    pub action: OrderSide,
    pub total_quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub time_in_force: String,
    pub account: Option<String>,
}

/// Tick field carried by `TickPrice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickField {
    Bid,
    Ask,
    Last,
    Close,
}

/// Tick type as numbered by the gateway, in both real-time and delayed spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickType(pub i32);

impl TickType {
    pub const BID: Self = Self(1);
    pub const ASK: Self = Self(2);
    pub const LAST: Self = Self(4);
    pub const CLOSE: Self = Self(9);
    pub const DELAYED_BID: Self = Self(66);
    pub const DELAYED_ASK: Self = Self(67);
    pub const DELAYED_LAST: Self = Self(68);
    pub const DELAYED_CLOSE: Self = Self(75);

    /// Field and delayed flag, or `None` for tick types we don't consume.
    pub fn field(self) -> Option<(TickField, bool)> {
        match self.0 {
            1 => Some((TickField::Bid, false)),
            2 => Some((TickField::Ask, false)),
            4 => Some((TickField::Last, false)),
            9 => Some((TickField::Close, false)),
            66 => Some((TickField::Bid, true)),
            67 => Some((TickField::Ask, true)),
            68 => Some((TickField::Last, true)),
            75 => Some((TickField::Close, true)),
            _ => None,
        }
    }
}

/// Option parameter set for one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionParameterSet {
    pub exchange: String,
    pub trading_class: String,
    pub multiplier: String,
    pub expirations: Vec<NaiveDate>,
    pub strikes: Vec<Decimal>,
}

/// Requests accepted by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayRequest {
    RequestIds,
    ContractDetails {
        req_id: RequestId,
        contract: Contract,
    },
    OptionParameters {
        req_id: RequestId,
        symbol: String,
        underlying_con_id: i64,
    },
    MarketDataType(MarketDataType),
    MarketData {
        req_id: RequestId,
        contract: Contract,
        snapshot: bool,
    },
    CancelMarketData {
        req_id: RequestId,
    },
    AccountSummary {
        req_id: RequestId,
        group: String,
        tags: Vec<String>,
    },
    CancelAccountSummary {
        req_id: RequestId,
    },
    AccountUpdates {
        subscribe: bool,
        account: String,
    },
    Positions,
    CancelPositions,
    PlaceOrder {
        order_id: i64,
        contract: Contract,
        order: OrderTicket,
    },
    CancelOrder {
        order_id: i64,
    },
    AllOpenOrders,
    Executions {
        req_id: RequestId,
    },
    CompletedOrders,
}

impl GatewayRequest {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestIds => "request_ids",
            Self::ContractDetails { .. } => "contract_details",
            Self::OptionParameters { .. } => "option_parameters",
            Self::MarketDataType(_) => "market_data_type",
            Self::MarketData { .. } => "market_data",
            Self::CancelMarketData { .. } => "cancel_market_data",
            Self::AccountSummary { .. } => "account_summary",
            Self::CancelAccountSummary { .. } => "cancel_account_summary",
            Self::AccountUpdates { .. } => "account_updates",
            Self::Positions => "positions",
            Self::CancelPositions => "cancel_positions",
            Self::PlaceOrder { .. } => "place_order",
            Self::CancelOrder { .. } => "cancel_order",
            Self::AllOpenOrders => "all_open_orders",
            Self::Executions { .. } => "executions",
            Self::CompletedOrders => "completed_orders",
        }
    }
}

/// Events delivered by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayEvent {
    NextValidId(i64),
    ManagedAccounts(Vec<String>),
    ContractDetails {
        req_id: RequestId,
        contract: Contract,
    },
    ContractDetailsEnd {
        req_id: RequestId,
    },
    OptionParameters {
        req_id: RequestId,
        params: OptionParameterSet,
    },
    OptionParametersEnd {
        req_id: RequestId,
    },
    TickPrice {
        req_id: RequestId,
        tick: TickType,
        price: Decimal,
    },
    TickSnapshotEnd {
        req_id: RequestId,
    },
    AccountSummary {
        req_id: RequestId,
        account: String,
        tag: String,
        value: String,
        currency: String,
    },
    AccountSummaryEnd {
        req_id: RequestId,
    },
    AccountValue {
        account: String,
        key: String,
        value: String,
        currency: String,
    },
    PortfolioValue {
        account: String,
        contract: Contract,
        position: Decimal,
        market_price: Decimal,
        market_value: Decimal,
        avg_cost: Decimal,
        unrealized_pnl: Decimal,
        realized_pnl: Decimal,
    },
    AccountDownloadEnd {
        account: String,
    },
    Position {
        account: String,
        contract: Contract,
        position: Decimal,
        avg_cost: Decimal,
    },
    PositionEnd,
    OrderStatus {
        order_id: i64,
        status: OrderStatus,
        filled: Decimal,
        remaining: Decimal,
        avg_fill_price: Decimal,
    },
    OpenOrder(OpenOrder),
    OpenOrderEnd,
    ExecutionDetails {
        req_id: RequestId,
        execution: Execution,
    },
    ExecutionDetailsEnd {
        req_id: RequestId,
    },
    CompletedOrder(CompletedOrder),
    CompletedOrdersEnd,
    Error {
        id: Option<RequestId>,
        code: i32,
        message: String,
    },
    ConnectionClosed,
}

impl GatewayEvent {
    /// Correlation id this event belongs to, mapping id-less streams onto sentinels.
    pub fn correlation_id(&self) -> Option<RequestId> {
        match self {
            Self::ContractDetails { req_id, .. }
            | Self::ContractDetailsEnd { req_id }
            | Self::OptionParameters { req_id, .. }
            | Self::OptionParametersEnd { req_id }
            | Self::TickPrice { req_id, .. }
            | Self::TickSnapshotEnd { req_id }
            | Self::AccountSummary { req_id, .. }
            | Self::AccountSummaryEnd { req_id }
            | Self::ExecutionDetails { req_id, .. }
            | Self::ExecutionDetailsEnd { req_id } => Some(*req_id),
            Self::Position { .. } | Self::PositionEnd => Some(ALL_POSITIONS_ID),
            Self::OpenOrder(_) | Self::OpenOrderEnd => Some(ALL_OPEN_ORDERS_ID),
            Self::CompletedOrder(_) | Self::CompletedOrdersEnd => Some(COMPLETED_ORDERS_ID),
            Self::Error { id, .. } => *id,
            Self::NextValidId(_)
            | Self::ManagedAccounts(_)
            | Self::AccountValue { .. }
            | Self::PortfolioValue { .. }
            | Self::AccountDownloadEnd { .. }
            | Self::OrderStatus { .. }
            | Self::ConnectionClosed => None,
        }
    }
}
