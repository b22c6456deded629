//! Paper gateway.
//!
//! An in-process `Transport` that answers gateway requests from a scripted
//! market: contract ids, option chains, quotes, account values and positions.
//! Orders fill immediately at their limit price unless resting is enabled.
//! Useful for exercising the full pipeline without IB Gateway.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::IBConfig;
use crate::error::Result;
use crate::protocol::{
    Contract, GatewayEvent, GatewayRequest, MarketDataType, OptionParameterSet, OrderTicket,
    RequestId, TickType,
};
use crate::transport::{GatewayLink, Transport};
use crate::types::{
    CompletedOrder, Execution, OpenOrder, OptionRight, OptionsContract, OrderStatus, OrderType,
    SecType,
};

/// Per-contract commission for options and combos.
const OPTION_COMMISSION: Decimal = dec!(0.65);
const STOCK_COMMISSION_PER_SHARE: Decimal = dec!(0.005);
const STOCK_COMMISSION_MIN: Decimal = dec!(1.00);

/// Error code the gateway uses for a rejected order.
pub const ORDER_REJECTED_CODE: i32 = 201;
const NO_SECURITY_DEFINITION_CODE: i32 = 200;
const CANCEL_NOT_FOUND_CODE: i32 = 10147;

/// Market data the paper gateway serves for one contract.
#[derive(Debug, Clone)]
pub enum PaperQuote {
    /// Tick prices sent in order; an absent field is simply never sent.
    Ticks(Vec<(TickType, Decimal)>),
    /// A gateway error code sent instead of data.
    Error(i32),
}

/// Portfolio row pushed on the account-updates subscription.
#[derive(Debug, Clone)]
pub struct PaperPortfolioRow {
    pub contract: Contract,
    pub position: Decimal,
    pub market_price: Decimal,
    pub avg_cost: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Scripted market state served by `PaperGateway`.
#[derive(Debug, Clone)]
pub struct PaperMarket {
    pub account: String,
    pub next_order_id: i64,
    pub contract_ids: HashMap<String, i64>,
    pub chains: HashMap<String, Vec<OptionParameterSet>>,
    pub quotes: HashMap<String, PaperQuote>,
    /// Values pushed on the live account subscription.
    pub live_values: Vec<(String, String)>,
    /// Values returned by the one-shot account summary.
    pub summary_values: Vec<(String, String)>,
    pub portfolio: Vec<PaperPortfolioRow>,
    pub positions: Vec<(Contract, Decimal, Decimal)>,
    /// Answer the account-updates subscription at all.
    pub live_updates: bool,
    /// Never answer one-shot account summary requests.
    pub silent_account_summary: bool,
    /// Reject BAG orders with error 201.
    pub reject_combos: bool,
    /// Keep orders working instead of filling them.
    pub rest_orders: bool,
}

impl Default for PaperMarket {
    fn default() -> Self {
        Self {
            account: "DU0000001".to_string(),
            next_order_id: 1,
            contract_ids: HashMap::new(),
            chains: HashMap::new(),
            quotes: HashMap::new(),
            live_values: Vec::new(),
            summary_values: Vec::new(),
            portfolio: Vec::new(),
            positions: Vec::new(),
            live_updates: true,
            silent_account_summary: false,
            reject_combos: false,
            rest_orders: false,
        }
    }
}

/// Lookup key the paper market uses for a gateway contract.
pub fn listing_key(contract: &Contract) -> String {
    match contract.as_options_contract() {
        Some(option) => option.key(),
        None => format!("{}|{}", contract.sec_type, contract.symbol),
    }
}

impl PaperMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stock(mut self, symbol: &str, con_id: i64) -> Self {
        self.contract_ids
            .insert(listing_key(&Contract::stock(symbol)), con_id);
        self
    }

    pub fn with_option(mut self, contract: &OptionsContract, con_id: i64) -> Self {
        self.contract_ids.insert(contract.key(), con_id);
        self
    }

    /// Add an option parameter set; expirations and strikes are sorted.
    pub fn with_chain(
        mut self,
        symbol: &str,
        exchange: &str,
        expirations: &[NaiveDate],
        strikes: &[Decimal],
    ) -> Self {
        let mut expirations = expirations.to_vec();
        expirations.sort();
        let mut strikes = strikes.to_vec();
        strikes.sort();
        self.chains
            .entry(symbol.to_uppercase())
            .or_default()
            .push(OptionParameterSet {
                exchange: exchange.to_string(),
                trading_class: symbol.to_uppercase(),
                multiplier: "100".to_string(),
                expirations,
                strikes,
            });
        self
    }

    /// Two-sided quote.
    pub fn with_quote(mut self, contract: &OptionsContract, bid: Decimal, ask: Decimal) -> Self {
        self.quotes.insert(
            contract.key(),
            PaperQuote::Ticks(vec![(TickType::BID, bid), (TickType::ASK, ask)]),
        );
        self
    }

    /// Trade print only; clients must synthesize a spread.
    pub fn with_last_only(mut self, contract: &OptionsContract, last: Decimal) -> Self {
        self.quotes
            .insert(contract.key(), PaperQuote::Ticks(vec![(TickType::LAST, last)]));
        self
    }

    pub fn with_close_only(mut self, contract: &OptionsContract, close: Decimal) -> Self {
        self.quotes
            .insert(contract.key(), PaperQuote::Ticks(vec![(TickType::CLOSE, close)]));
        self
    }

    pub fn with_quote_error(mut self, contract: &OptionsContract, code: i32) -> Self {
        self.quotes.insert(contract.key(), PaperQuote::Error(code));
        self
    }

    pub fn with_live_value(mut self, key: &str, value: &str) -> Self {
        self.live_values.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_summary_value(mut self, tag: &str, value: &str) -> Self {
        self.summary_values.push((tag.to_string(), value.to_string()));
        self
    }

    pub fn with_portfolio_row(mut self, row: PaperPortfolioRow) -> Self {
        self.portfolio.push(row);
        self
    }

    pub fn with_position(mut self, contract: Contract, quantity: Decimal, avg_cost: Decimal) -> Self {
        self.positions.push((contract, quantity, avg_cost));
        self
    }

    /// SPY and AAPL with listed chains, quotes and a funded account.
    pub fn demo() -> Self {
        let expiries = [
            date(2026, 11, 20),
            date(2026, 12, 18),
            date(2027, 1, 15),
        ];
        let spy_strikes: Vec<Decimal> = (0..=20).map(|i| dec!(640) + Decimal::from(i * 5)).collect();
        let aapl_strikes: Vec<Decimal> = (0..=16).map(|i| dec!(220) + Decimal::from(i * 5)).collect();

        let mut market = Self::new()
            .with_stock("SPY", 756_733)
            .with_stock("AAPL", 265_598)
            .with_chain("SPY", "SMART", &expiries, &spy_strikes)
            .with_chain("SPY", "CBOE", &expiries[..1], &spy_strikes[..5])
            .with_chain("AAPL", "SMART", &expiries, &aapl_strikes)
            .with_live_value("NetLiquidation", "100000.00")
            .with_live_value("TotalCashValue", "62500.00")
            .with_live_value("BuyingPower", "250000.00")
            .with_live_value("AvailableFunds", "60000.00")
            .with_live_value("MaintMarginReq", "12000.00")
            .with_live_value("UnrealizedPnL", "1250.00")
            .with_live_value("RealizedPnL", "-80.00")
            .with_summary_value("NetLiquidation", "100000.00")
            .with_summary_value("TotalCashValue", "62500.00")
            .with_summary_value("BuyingPower", "250000.00");

        let mut con_id = 700_000_000;
        for (symbol, strikes, spot) in [("SPY", &spy_strikes, dec!(680)), ("AAPL", &aapl_strikes, dec!(255))] {
            for expiry in expiries {
                for strike in strikes.iter().copied() {
                    for right in [OptionRight::Call, OptionRight::Put] {
                        let contract = OptionsContract::new(symbol, expiry, strike, right);
                        con_id += 1;
                        let intrinsic = match right {
                            OptionRight::Call => (spot - strike).max(Decimal::ZERO),
                            OptionRight::Put => (strike - spot).max(Decimal::ZERO),
                        };
                        let mid = intrinsic + dec!(2.50);
                        market = market
                            .with_option(&contract, con_id)
                            .with_quote(&contract, mid - dec!(0.05), mid + dec!(0.05));
                    }
                }
            }
        }

        let held = OptionsContract::new("SPY", expiries[0], dec!(680), OptionRight::Call);
        market
            .with_portfolio_row(PaperPortfolioRow {
                contract: Contract::option(&held),
                position: dec!(2),
                market_price: dec!(2.50),
                avg_cost: dec!(210),
                unrealized_pnl: dec!(80),
            })
            .with_position(Contract::stock("AAPL"), dec!(100), dec!(231.40))
    }

    fn quote_mid(&self, contract: &Contract) -> Option<Decimal> {
        let PaperQuote::Ticks(ticks) = self.quotes.get(&listing_key(contract))? else {
            return None;
        };
        let find = |wanted: TickType| ticks.iter().find(|(t, _)| *t == wanted).map(|(_, p)| *p);
        match (find(TickType::BID), find(TickType::ASK)) {
            (Some(bid), Some(ask)) => Some((bid + ask) / dec!(2)),
            _ => find(TickType::LAST),
        }
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

/// Contracts an order trades, for commission purposes.
fn contract_count(contract: &Contract, quantity: Decimal) -> Decimal {
    match contract.sec_type {
        SecType::Bag => {
            let legs: u32 = contract.combo_legs.iter().map(|leg| leg.ratio).sum();
            quantity * Decimal::from(legs)
        }
        _ => quantity,
    }
}

/// Commission for a fill: per contract for options, per share for stock.
pub fn simulate_commission(contract: &Contract, quantity: Decimal) -> Decimal {
    match contract.sec_type {
        SecType::Stock => (STOCK_COMMISSION_PER_SHARE * quantity).max(STOCK_COMMISSION_MIN),
        SecType::Option | SecType::Bag => OPTION_COMMISSION * contract_count(contract, quantity),
    }
}

#[derive(Debug, Clone)]
struct WorkingOrder {
    contract: Contract,
    ticket: OrderTicket,
}

/// Mutable state behind the gateway task.
#[derive(Default)]
struct PaperState {
    market: PaperMarket,
    data_type: Option<MarketDataType>,
    working: BTreeMap<i64, WorkingOrder>,
    executions: Vec<Execution>,
    completed: Vec<CompletedOrder>,
    exec_seq: u64,
    requests: Vec<GatewayRequest>,
}

type Events = mpsc::UnboundedSender<GatewayEvent>;

fn emit(events: &Events, event: GatewayEvent) {
    // The client side hung up; nothing left to answer.
    let _ = events.send(event);
}

fn gateway_error(id: RequestId, code: i32, message: &str) -> GatewayEvent {
    GatewayEvent::Error {
        id: Some(id),
        code,
        message: message.to_string(),
    }
}

impl PaperState {
    fn handle(&mut self, request: GatewayRequest, events: &Events) {
        self.requests.push(request.clone());
        match request {
            GatewayRequest::RequestIds => {
                emit(events, GatewayEvent::NextValidId(self.market.next_order_id));
            }
            GatewayRequest::ContractDetails { req_id, contract } => {
                match self.market.contract_ids.get(&listing_key(&contract)) {
                    Some(con_id) => {
                        let mut contract = contract;
                        contract.con_id = Some(*con_id);
                        emit(events, GatewayEvent::ContractDetails { req_id, contract });
                        emit(events, GatewayEvent::ContractDetailsEnd { req_id });
                    }
                    None => emit(
                        events,
                        gateway_error(
                            req_id,
                            NO_SECURITY_DEFINITION_CODE,
                            "No security definition has been found for the request",
                        ),
                    ),
                }
            }
            GatewayRequest::OptionParameters { req_id, symbol, .. } => {
                for params in self.market.chains.get(&symbol).cloned().unwrap_or_default() {
                    emit(events, GatewayEvent::OptionParameters { req_id, params });
                }
                emit(events, GatewayEvent::OptionParametersEnd { req_id });
            }
            GatewayRequest::MarketDataType(data_type) => self.data_type = Some(data_type),
            GatewayRequest::MarketData {
                req_id, contract, ..
            } => match self.market.quotes.get(&listing_key(&contract)) {
                Some(PaperQuote::Ticks(ticks)) => {
                    for (tick, price) in ticks {
                        emit(
                            events,
                            GatewayEvent::TickPrice {
                                req_id,
                                tick: *tick,
                                price: *price,
                            },
                        );
                    }
                }
                Some(PaperQuote::Error(code)) => emit(
                    events,
                    gateway_error(req_id, *code, "Requested market data is not subscribed"),
                ),
                None => emit(
                    events,
                    gateway_error(
                        req_id,
                        NO_SECURITY_DEFINITION_CODE,
                        "No security definition has been found for the request",
                    ),
                ),
            },
            GatewayRequest::AccountSummary { req_id, .. } => {
                if self.market.silent_account_summary {
                    return;
                }
                for (tag, value) in &self.market.summary_values {
                    emit(
                        events,
                        GatewayEvent::AccountSummary {
                            req_id,
                            account: self.market.account.clone(),
                            tag: tag.clone(),
                            value: value.clone(),
                            currency: "USD".to_string(),
                        },
                    );
                }
                emit(events, GatewayEvent::AccountSummaryEnd { req_id });
            }
            GatewayRequest::AccountUpdates { subscribe: true, .. } => self.push_account(events),
            GatewayRequest::Positions => {
                for (contract, position, avg_cost) in &self.market.positions {
                    emit(
                        events,
                        GatewayEvent::Position {
                            account: self.market.account.clone(),
                            contract: contract.clone(),
                            position: *position,
                            avg_cost: *avg_cost,
                        },
                    );
                }
                emit(events, GatewayEvent::PositionEnd);
            }
            GatewayRequest::PlaceOrder {
                order_id,
                contract,
                order,
            } => self.place(order_id, contract, order, events),
            GatewayRequest::CancelOrder { order_id } => self.cancel(order_id, events),
            GatewayRequest::AllOpenOrders => {
                for (order_id, working) in &self.working {
                    emit(
                        events,
                        GatewayEvent::OpenOrder(OpenOrder {
                            order_id: *order_id,
                            symbol: working.contract.symbol.clone(),
                            sec_type: working.contract.sec_type,
                            action: working.ticket.action,
                            quantity: working.ticket.total_quantity,
                            order_type: working.ticket.order_type,
                            limit_price: working.ticket.limit_price,
                            status: OrderStatus::Submitted,
                        }),
                    );
                }
                emit(events, GatewayEvent::OpenOrderEnd);
            }
            GatewayRequest::Executions { req_id } => {
                for execution in &self.executions {
                    emit(
                        events,
                        GatewayEvent::ExecutionDetails {
                            req_id,
                            execution: execution.clone(),
                        },
                    );
                }
                emit(events, GatewayEvent::ExecutionDetailsEnd { req_id });
            }
            GatewayRequest::CompletedOrders => {
                for completed in &self.completed {
                    emit(events, GatewayEvent::CompletedOrder(completed.clone()));
                }
                emit(events, GatewayEvent::CompletedOrdersEnd);
            }
            GatewayRequest::AccountUpdates { subscribe: false, .. }
            | GatewayRequest::CancelMarketData { .. }
            | GatewayRequest::CancelAccountSummary { .. }
            | GatewayRequest::CancelPositions => {}
        }
    }

    fn push_account(&self, events: &Events) {
        if !self.market.live_updates {
            return;
        }
        let account = self.market.account.clone();
        for (key, value) in &self.market.live_values {
            emit(
                events,
                GatewayEvent::AccountValue {
                    account: account.clone(),
                    key: key.clone(),
                    value: value.clone(),
                    currency: "USD".to_string(),
                },
            );
        }
        for row in &self.market.portfolio {
            let multiplier = row.contract.multiplier.unwrap_or(Decimal::ONE);
            emit(
                events,
                GatewayEvent::PortfolioValue {
                    account: account.clone(),
                    contract: row.contract.clone(),
                    position: row.position,
                    market_price: row.market_price,
                    market_value: row.market_price * row.position * multiplier,
                    avg_cost: row.avg_cost,
                    unrealized_pnl: row.unrealized_pnl,
                    realized_pnl: Decimal::ZERO,
                },
            );
        }
        emit(events, GatewayEvent::AccountDownloadEnd { account });
    }

    fn place(&mut self, order_id: i64, contract: Contract, ticket: OrderTicket, events: &Events) {
        self.market.next_order_id = self.market.next_order_id.max(order_id + 1);
        if contract.sec_type == SecType::Bag && self.market.reject_combos {
            debug!(order_id, "Paper gateway rejecting combo order");
            emit(
                events,
                gateway_error(
                    order_id,
                    ORDER_REJECTED_CODE,
                    "Order rejected - reason: combo orders are not accepted",
                ),
            );
            return;
        }

        let quantity = ticket.total_quantity;
        emit(
            events,
            GatewayEvent::OrderStatus {
                order_id,
                status: OrderStatus::Submitted,
                filled: Decimal::ZERO,
                remaining: quantity,
                avg_fill_price: Decimal::ZERO,
            },
        );
        if self.market.rest_orders {
            self.working.insert(order_id, WorkingOrder { contract, ticket });
            return;
        }
        self.fill(order_id, contract, ticket, events);
    }

    /// Fill the whole order at its limit, or at the quote mid for market orders.
    fn fill(&mut self, order_id: i64, contract: Contract, ticket: OrderTicket, events: &Events) {
        let price = match ticket.order_type {
            OrderType::Limit => ticket.limit_price.unwrap_or_default(),
            OrderType::Market => self.market.quote_mid(&contract).unwrap_or_default(),
        };
        let quantity = ticket.total_quantity;
        let commission = simulate_commission(&contract, quantity);
        self.exec_seq += 1;
        let now = Utc::now();

        self.executions.push(Execution {
            exec_id: format!("{order_id:08x}.{:04}", self.exec_seq),
            order_id,
            symbol: contract.symbol.clone(),
            sec_type: contract.sec_type,
            side: ticket.action,
            shares: quantity,
            price,
            time: now,
            commission: Some(commission),
        });
        self.completed.push(CompletedOrder {
            order_id,
            symbol: contract.symbol.clone(),
            sec_type: contract.sec_type,
            action: ticket.action,
            quantity,
            status: OrderStatus::Filled,
            avg_fill_price: price,
            completed_at: now,
        });
        emit(
            events,
            GatewayEvent::OrderStatus {
                order_id,
                status: OrderStatus::Filled,
                filled: quantity,
                remaining: Decimal::ZERO,
                avg_fill_price: price,
            },
        );
        info!(
            order_id,
            symbol = contract.symbol,
            price = %price,
            quantity = %quantity,
            commission = %commission,
            "Paper fill simulated"
        );
    }

    fn cancel(&mut self, order_id: i64, events: &Events) {
        let Some(working) = self.working.remove(&order_id) else {
            emit(
                events,
                gateway_error(
                    order_id,
                    CANCEL_NOT_FOUND_CODE,
                    "OrderId that needs to be cancelled is not found",
                ),
            );
            return;
        };
        self.completed.push(CompletedOrder {
            order_id,
            symbol: working.contract.symbol,
            sec_type: working.contract.sec_type,
            action: working.ticket.action,
            quantity: working.ticket.total_quantity,
            status: OrderStatus::Cancelled,
            avg_fill_price: Decimal::ZERO,
            completed_at: Utc::now(),
        });
        emit(
            events,
            GatewayEvent::OrderStatus {
                order_id,
                status: OrderStatus::Cancelled,
                filled: Decimal::ZERO,
                remaining: working.ticket.total_quantity,
                avg_fill_price: Decimal::ZERO,
            },
        );
    }
}

/// In-process gateway backed by a `PaperMarket`.
#[derive(Default)]
pub struct PaperGateway {
    state: Arc<Mutex<PaperState>>,
    events: Mutex<Option<Events>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PaperGateway {
    pub fn new(market: PaperMarket) -> Self {
        Self {
            state: Arc::new(Mutex::new(PaperState {
                market,
                ..PaperState::default()
            })),
            events: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn demo() -> Self {
        Self::new(PaperMarket::demo())
    }

    /// Change the scripted market while connected.
    pub fn update(&self, change: impl FnOnce(&mut PaperMarket)) {
        change(&mut self.state.lock().market);
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.state.lock().requests.clone()
    }

    /// Market data type most recently requested.
    pub fn market_data_type(&self) -> Option<MarketDataType> {
        self.state.lock().data_type
    }

    /// Push an arbitrary event to the connected client.
    pub fn push(&self, event: GatewayEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            emit(events, event);
        }
    }

    /// Simulate the socket dropping without an explicit disconnect.
    pub fn drop_connection(&self) {
        if let Some(events) = self.events.lock().take() {
            emit(&events, GatewayEvent::ConnectionClosed);
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for PaperGateway {
    async fn connect(&self, config: &IBConfig) -> Result<GatewayLink> {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<GatewayRequest>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        {
            let state = self.state.lock();
            emit(
                &event_tx,
                GatewayEvent::ManagedAccounts(vec![state.market.account.clone()]),
            );
            emit(&event_tx, GatewayEvent::NextValidId(state.market.next_order_id));
        }

        let state = Arc::clone(&self.state);
        let events = event_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                state.lock().handle(request, &events);
            }
        });
        if let Some(stale) = self.task.lock().replace(task) {
            stale.abort();
        }
        *self.events.lock() = Some(event_tx);

        info!(client_id = config.client_id, "Paper gateway connected");
        Ok(GatewayLink {
            requests: request_tx,
            events: event_rx,
        })
    }

    async fn disconnect(&self) -> Result<()> {
        self.events.lock().take();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ComboLeg;
    use crate::types::OrderSide;

    fn spy_call() -> OptionsContract {
        OptionsContract::new("SPY", date(2026, 11, 20), dec!(680), OptionRight::Call)
    }

    fn ticket(order_type: OrderType, limit_price: Option<Decimal>) -> OrderTicket {
        OrderTicket {
            action: OrderSide::Buy,
            total_quantity: dec!(2),
            order_type,
            limit_price,
            time_in_force: "DAY".into(),
            account: None,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_commission() {
        let option = Contract::option(&spy_call());
        assert_eq!(simulate_commission(&option, dec!(3)), dec!(1.95));
        assert_eq!(simulate_commission(&Contract::stock("SPY"), dec!(10)), dec!(1.00));
        assert_eq!(simulate_commission(&Contract::stock("SPY"), dec!(1000)), dec!(5.000));

        let combo = Contract::combo(
            "SPY",
            vec![
                ComboLeg { con_id: 1, ratio: 1, action: OrderSide::Buy, exchange: "SMART".into() },
                ComboLeg { con_id: 2, ratio: 2, action: OrderSide::Sell, exchange: "SMART".into() },
            ],
        );
        assert_eq!(simulate_commission(&combo, dec!(1)), dec!(1.95));
    }

    #[test]
    fn test_limit_order_fills_at_limit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = PaperState {
            market: PaperMarket::demo(),
            ..PaperState::default()
        };
        state.handle(
            GatewayRequest::PlaceOrder {
                order_id: 5,
                contract: Contract::option(&spy_call()),
                order: ticket(OrderType::Limit, Some(dec!(2.45))),
            },
            &tx,
        );
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(GatewayEvent::OrderStatus { status: OrderStatus::Filled, avg_fill_price, .. })
                if *avg_fill_price == dec!(2.45)
        ));
        assert_eq!(state.executions.len(), 1);
        assert_eq!(state.executions[0].commission, Some(dec!(1.30)));
    }

    #[test]
    fn test_market_order_fills_at_mid() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = PaperState {
            market: PaperMarket::demo(),
            ..PaperState::default()
        };
        state.handle(
            GatewayRequest::PlaceOrder {
                order_id: 6,
                contract: Contract::option(&spy_call()),
                order: ticket(OrderType::Market, None),
            },
            &tx,
        );
        assert_eq!(state.executions[0].price, dec!(2.50));
    }

    #[test]
    fn test_resting_order_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = PaperState {
            market: PaperMarket {
                rest_orders: true,
                ..PaperMarket::demo()
            },
            ..PaperState::default()
        };
        state.handle(
            GatewayRequest::PlaceOrder {
                order_id: 9,
                contract: Contract::stock("AAPL"),
                order: ticket(OrderType::Limit, Some(dec!(200))),
            },
            &tx,
        );
        assert_eq!(state.working.len(), 1);
        state.handle(GatewayRequest::CancelOrder { order_id: 9 }, &tx);
        state.handle(GatewayRequest::CancelOrder { order_id: 9 }, &tx);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            GatewayEvent::OrderStatus { status: OrderStatus::Cancelled, .. }
        )));
        assert!(matches!(
            events.last(),
            Some(GatewayEvent::Error { code: CANCEL_NOT_FOUND_CODE, .. })
        ));
        assert_eq!(state.completed.len(), 1);
    }

    #[test]
    fn test_unknown_contract_gets_no_definition_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = PaperState::default();
        state.handle(
            GatewayRequest::ContractDetails {
                req_id: 77,
                contract: Contract::stock("ZZZZ"),
            },
            &tx,
        );
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [GatewayEvent::Error { id: Some(77), code: 200, .. }]
        ));
    }
}
