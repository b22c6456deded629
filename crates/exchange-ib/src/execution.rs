//! Order execution: strategy submission, combo orders, per-leg fallback.
//!
//! Multi-leg option strategies go out as one BAG order when every leg
//! resolves to a contract id. Anything that goes wrong before the combo is
//! acknowledged degrades to submitting each leg on its own.

use std::time::Duration;

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::client::IBClient;
use crate::error::{IbError, Result};
use crate::orders::pending_update;
use crate::protocol::{ComboLeg, Contract, GatewayRequest, OrderTicket};
use crate::session::SessionEvent;
use crate::tick::round_to_tick;
use crate::types::{
    Instrument, NbboQuote, Order, OrderSide, OrderStatus, OrderType, Strategy, StrategyLeg,
    SubmitResult,
};

/// Buy limits above `ask × 1.05` are treated as stale and replaced by mid.
const BUY_CEILING: Decimal = dec!(1.05);
/// Sell limits above `ask × 1.5` are treated as stale and replaced by mid.
const SELL_CEILING: Decimal = dec!(1.5);
/// Limits below `bid × 0.5` are treated as stale on either side.
const FLOOR: Decimal = dec!(0.5);

const TIME_IN_FORCE: &str = "DAY";

/// Fallback price source when no live quote is available.
pub trait TheoreticalPricer: Send + Sync {
    fn theoretical_price(&self, leg: &StrategyLeg) -> Option<Decimal>;
}

/// Uses the leg's own proposed price.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegPricePricer;

impl TheoreticalPricer for LegPricePricer {
    fn theoretical_price(&self, leg: &StrategyLeg) -> Option<Decimal> {
        Some(leg.price)
    }
}

/// A strategy leg with its broker contract id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLeg {
    pub leg: StrategyLeg,
    pub con_id: i64,
}

/// Signed net of a package: sells collect, buys cost. Rounded to cents.
pub fn combo_net_price(legs: &[(OrderSide, u32, Decimal)]) -> Decimal {
    legs.iter()
        .map(|(side, quantity, price)| *price * side.direction() * Decimal::from(*quantity))
        .sum::<Decimal>()
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Credit packages are sold, debit (or zero) packages are bought.
pub fn combo_action(net: Decimal) -> OrderSide {
    if net > Decimal::ZERO {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

/// Combo legs for the gateway. Selling the package inverts each leg so the
/// resulting fills match the intended leg sides.
pub fn combo_legs(legs: &[ResolvedLeg], action: OrderSide) -> Vec<ComboLeg> {
    legs.iter()
        .map(|resolved| ComboLeg {
            con_id: resolved.con_id,
            ratio: resolved.leg.quantity,
            action: match action {
                OrderSide::Buy => resolved.leg.side,
                OrderSide::Sell => resolved.leg.side.inverse(),
            },
            exchange: "SMART".to_string(),
        })
        .collect()
}

/// Pull a proposed limit back inside the market. Unrounded.
pub fn clamp_to_quote(price: Decimal, side: OrderSide, quote: &NbboQuote) -> Decimal {
    let stale = match side {
        OrderSide::Buy => price > quote.ask * BUY_CEILING || price < quote.bid * FLOOR,
        OrderSide::Sell => price < quote.bid * FLOOR || price > quote.ask * SELL_CEILING,
    };
    let candidate = if stale { quote.mid } else { price };
    candidate.max(quote.bid).min(quote.ask)
}

fn instrument_contract(instrument: &Instrument) -> Contract {
    match instrument {
        Instrument::Stock { symbol } => Contract::stock(symbol),
        Instrument::Option(contract) => Contract::option(contract),
    }
}

fn leg_label(leg: &StrategyLeg) -> String {
    match &leg.instrument {
        Instrument::Stock { symbol } => format!("{} {} {}", leg.side, leg.quantity, symbol),
        Instrument::Option(contract) => {
            format!("{} {} {}", leg.side, leg.quantity, contract.display_name())
        }
    }
}

impl IBClient {
    /// Submit a strategy: as one combo when it has two or more option legs,
    /// otherwise (or when the combo fails) leg by leg.
    pub async fn submit_strategy(&self, strategy: &Strategy, order_type: OrderType) -> SubmitResult {
        if strategy.legs.is_empty() {
            return SubmitResult {
                success: false,
                order_ids: Vec::new(),
                message: "Strategy has no legs".to_string(),
            };
        }
        info!(
            strategy = strategy.name,
            legs = strategy.legs.len(),
            order_type = %order_type,
            "Submitting strategy"
        );

        let mut fallback_reason = None;
        if strategy.option_leg_count() >= 2 {
            match self.submit_combo(strategy, order_type).await {
                Ok(result) => return result,
                Err(e) => {
                    warn!(strategy = strategy.name, error = %e, "Combo submission failed, falling back to per-leg orders");
                    fallback_reason = Some(e.to_string());
                }
            }
        }
        self.submit_legs(strategy, order_type, fallback_reason).await
    }

    async fn submit_combo(&self, strategy: &Strategy, order_type: OrderType) -> Result<SubmitResult> {
        let mut resolved = Vec::with_capacity(strategy.legs.len());
        for leg in &strategy.legs {
            let leg = self.resolve_leg(leg).await;
            let con_id = self
                .contracts
                .resolve_contract_id(&instrument_contract(&leg.instrument))
                .await
                .ok_or_else(|| IbError::ContractNotFound(leg_label(&leg)))?;
            resolved.push(ResolvedLeg { leg, con_id });
        }

        let options: Vec<_> = resolved
            .iter()
            .filter_map(|r| r.leg.instrument.as_option().cloned())
            .collect();
        let quotes = self
            .quotes
            .quote_batch(&options, self.config().quote_concurrency)
            .await;

        let priced: Vec<(OrderSide, u32, Decimal)> = resolved
            .iter()
            .map(|r| {
                let live_mid = r
                    .leg
                    .instrument
                    .as_option()
                    .and_then(|c| quotes.get(&c.key()).cloned().flatten())
                    .map(|q| q.mid);
                let price = live_mid
                    .or_else(|| self.pricer.theoretical_price(&r.leg))
                    .unwrap_or(r.leg.price);
                (r.leg.side, r.leg.quantity, price)
            })
            .collect();

        let net = combo_net_price(&priced);
        let action = combo_action(net);
        let limit = match order_type {
            OrderType::Limit => Some(net.abs()),
            OrderType::Market => None,
        };

        let mut events = self.session.subscribe();
        let order_id = self.place_combo_order(&resolved, action, order_type, limit)?;
        self.await_acknowledgement(&mut events, order_id).await?;

        let message = match limit {
            Some(limit) => format!(
                "Combo order {order_id} submitted: {action} {}-leg {} @ {limit}",
                resolved.len(),
                strategy.name
            ),
            None => format!(
                "Combo order {order_id} submitted: {action} {}-leg {} at market",
                resolved.len(),
                strategy.name
            ),
        };
        Ok(SubmitResult {
            success: true,
            order_ids: vec![order_id],
            message,
        })
    }

    /// Watch the order's status for the acknowledgement window. A rejection
    /// or cancel inside the window is an error; silence counts as accepted.
    async fn await_acknowledgement(
        &self,
        events: &mut broadcast::Receiver<SessionEvent>,
        order_id: i64,
    ) -> Result<()> {
        let window: Duration = self.config().timeouts.order_ack;
        let watch = async {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::OrderStatus(update)) if update.order_id == order_id => {
                        if update.status.is_failure() {
                            let reason = match update.status {
                                OrderStatus::Rejected { reason } => reason,
                                other => format!("{other:?}"),
                            };
                            return Err(IbError::OrderRejected { order_id, reason });
                        }
                        if matches!(
                            update.status,
                            OrderStatus::Submitted | OrderStatus::PreSubmitted | OrderStatus::Filled
                        ) {
                            return Ok(());
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Order event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(IbError::Disconnected),
                }
            }
        };
        match tokio::time::timeout(window, watch).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(order_id, "No rejection within acknowledgement window");
                Ok(())
            }
        }
    }

    async fn submit_legs(
        &self,
        strategy: &Strategy,
        order_type: OrderType,
        fallback_reason: Option<String>,
    ) -> SubmitResult {
        let total = strategy.legs.len();
        let mut order_ids = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for (index, leg) in strategy.legs.iter().enumerate() {
            match self.submit_leg(leg, order_type).await {
                Ok(order_id) => order_ids.push(order_id),
                Err(e) => {
                    warn!(leg = index + 1, error = %e, "Leg submission failed");
                    failures.push(format!("leg {} ({}): {e}", index + 1, leg_label(leg)));
                }
            }
        }

        let mut message = format!("{}/{} legs submitted", order_ids.len(), total);
        if let Some(reason) = fallback_reason {
            message = format!("Combo unavailable ({reason}); {message}");
        }
        if !failures.is_empty() {
            message.push_str("; failures: ");
            message.push_str(&failures.join("; "));
        }
        SubmitResult {
            success: !order_ids.is_empty(),
            order_ids,
            message,
        }
    }

    async fn submit_leg(&self, leg: &StrategyLeg, order_type: OrderType) -> Result<i64> {
        let leg = self.resolve_leg(leg).await;
        if leg.instrument.as_option().is_some()
            && self
                .contracts
                .resolve_contract_id(&instrument_contract(&leg.instrument))
                .await
                .is_none()
        {
            return Err(IbError::ContractNotFound(leg_label(&leg)));
        }
        let limit = match order_type {
            OrderType::Market => None,
            OrderType::Limit => Some(self.leg_limit_price(&leg).await),
        };
        self.place_order(&leg.instrument, leg.side, leg.quantity, order_type, limit)
    }

    /// Leg with its option contract snapped to the listed chain.
    async fn resolve_leg(&self, leg: &StrategyLeg) -> StrategyLeg {
        match &leg.instrument {
            Instrument::Option(contract) => StrategyLeg {
                instrument: Instrument::Option(self.snap_to_listing(contract).await),
                ..leg.clone()
            },
            Instrument::Stock { .. } => leg.clone(),
        }
    }

    /// Proposed price rounded to tick, and for options pulled inside the NBBO.
    async fn leg_limit_price(&self, leg: &StrategyLeg) -> Decimal {
        let sec_type = leg.instrument.sec_type();
        let symbol = leg.instrument.symbol();
        let proposed = round_to_tick(leg.price, sec_type, symbol);

        let Some(contract) = leg.instrument.as_option() else {
            return proposed;
        };
        let Some(quote) = self.quotes.quote(contract).await else {
            debug!(contract = %contract.display_name(), "No quote, using proposed limit");
            return proposed;
        };
        let clamped = round_to_tick(clamp_to_quote(proposed, leg.side, &quote), sec_type, symbol);
        if clamped != proposed {
            info!(
                contract = %contract.display_name(),
                side = %leg.side,
                proposed = %proposed,
                bid = %quote.bid,
                ask = %quote.ask,
                limit = %clamped,
                "Limit adjusted to market"
            );
        }
        clamped
    }

    /// Place a single-instrument order. Returns the broker order id.
    pub fn place_order(
        &self,
        instrument: &Instrument,
        side: OrderSide,
        quantity: u32,
        order_type: OrderType,
        limit_price: Option<Decimal>,
    ) -> Result<i64> {
        if quantity == 0 {
            return Err(IbError::InvalidOrder("quantity must be positive".to_string()));
        }
        let limit_price = match (order_type, limit_price) {
            (OrderType::Limit, None) => {
                return Err(IbError::InvalidOrder("limit order without a price".to_string()))
            }
            (OrderType::Limit, Some(price)) if price <= Decimal::ZERO => {
                return Err(IbError::InvalidOrder(format!("non-positive limit price {price}")))
            }
            (OrderType::Limit, price) => price,
            (OrderType::Market, _) => None,
        };

        let leg = StrategyLeg {
            instrument: instrument.clone(),
            side,
            quantity,
            price: limit_price.unwrap_or_default(),
        };
        self.transmit(
            instrument_contract(instrument),
            side,
            Decimal::from(quantity),
            order_type,
            limit_price,
            vec![leg],
        )
    }

    /// Place one BAG order over resolved legs. Total quantity is 1; each
    /// leg's ratio is its quantity. The limit is the package net in cents,
    /// not rounded to an option tick.
    pub fn place_combo_order(
        &self,
        legs: &[ResolvedLeg],
        action: OrderSide,
        order_type: OrderType,
        limit_price: Option<Decimal>,
    ) -> Result<i64> {
        let Some(first) = legs.first() else {
            return Err(IbError::InvalidOrder("combo without legs".to_string()));
        };
        let limit_price = match (order_type, limit_price) {
            (OrderType::Limit, None) => {
                return Err(IbError::InvalidOrder("limit order without a price".to_string()))
            }
            (OrderType::Limit, Some(price)) if price <= Decimal::ZERO => {
                return Err(IbError::InvalidOrder(format!("non-positive combo limit {price}")))
            }
            (OrderType::Limit, price) => price,
            (OrderType::Market, _) => None,
        };
        let contract = Contract::combo(first.leg.instrument.symbol(), combo_legs(legs, action));
        self.transmit(
            contract,
            action,
            Decimal::ONE,
            order_type,
            limit_price,
            legs.iter().map(|r| r.leg.clone()).collect(),
        )
    }

    fn transmit(
        &self,
        contract: Contract,
        action: OrderSide,
        total_quantity: Decimal,
        order_type: OrderType,
        limit_price: Option<Decimal>,
        legs: Vec<StrategyLeg>,
    ) -> Result<i64> {
        let order_id = self.session.order_ids().allocate()?;
        let ticket = OrderTicket {
            action,
            total_quantity,
            order_type,
            limit_price,
            time_in_force: TIME_IN_FORCE.to_string(),
            account: self.session.account(),
        };

        self.session.orders().insert(Order {
            id: order_id,
            legs,
            action,
            order_type,
            limit_price,
            status: OrderStatus::PendingSubmit,
            filled: Decimal::ZERO,
            remaining: total_quantity,
            avg_fill_price: Decimal::ZERO,
            created_at: Utc::now(),
        });

        info!(
            order_id,
            symbol = contract.symbol,
            sec_type = %contract.sec_type,
            action = %action,
            quantity = %total_quantity,
            order_type = %order_type,
            limit = ?limit_price,
            "Placing order"
        );
        self.session
            .publish(SessionEvent::OrderStatus(pending_update(order_id, total_quantity)));
        if let Err(e) = self.session.outbound().send(GatewayRequest::PlaceOrder {
            order_id,
            contract,
            order: ticket,
        }) {
            let rejected = OrderStatus::Rejected {
                reason: e.to_string(),
            };
            if let Some(update) = self.session.orders().fail(order_id, rejected) {
                self.session.publish(SessionEvent::OrderStatus(update));
            }
            return Err(e);
        }
        Ok(order_id)
    }

    /// Cancel a working order by broker order id.
    pub fn cancel_order(&self, order_id: i64) -> Result<()> {
        info!(order_id, "Cancelling order");
        self.session.outbound().send(GatewayRequest::CancelOrder { order_id })
    }
}
