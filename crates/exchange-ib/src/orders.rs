//! Order ids, the in-process order book, and order/execution reports.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::IBClient;
use crate::correlator::{Accumulator, Completion, Dispatch, RequestOptions, Step};
use crate::error::{IbError, Result};
use crate::protocol::{GatewayEvent, GatewayRequest, ALL_OPEN_ORDERS_ID, COMPLETED_ORDERS_ID};
use crate::types::{CompletedOrder, Execution, OpenOrder, Order, OrderStatus, OrderUpdate};

const UNKNOWN: i64 = -1;

/// Hands out broker order ids seeded by the gateway's next-valid-id.
///
/// Ids only move forward: a later seed lower than the current counter is
/// ignored, so an id is never handed out twice within a session.
pub struct OrderIdAllocator {
    next: AtomicI64,
    known: watch::Sender<bool>,
}

impl Default for OrderIdAllocator {
    fn default() -> Self {
        let (known, _) = watch::channel(false);
        Self {
            next: AtomicI64::new(UNKNOWN),
            known,
        }
    }
}

impl OrderIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a next-valid-id event.
    pub fn seed(&self, next_valid_id: i64) {
        let previous = self.next.fetch_max(next_valid_id, Ordering::SeqCst);
        debug!(next_valid_id, previous, "Order id counter seeded");
        self.known.send_replace(true);
    }

    pub fn is_known(&self) -> bool {
        self.next.load(Ordering::SeqCst) != UNKNOWN
    }

    /// Allocate the next order id, or `NotReady` before the handshake.
    pub fn allocate(&self) -> Result<i64> {
        let mut current = self.next.load(Ordering::SeqCst);
        loop {
            if current == UNKNOWN {
                return Err(IbError::NotReady(
                    "next valid order id not received".to_string(),
                ));
            }
            match self.next.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(id) => return Ok(id),
                Err(actual) => current = actual,
            }
        }
    }

    /// Wait for the first seed. Returns false on timeout.
    pub async fn wait_known(&self, timeout: Duration) -> bool {
        let mut rx = self.known.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|known| *known))
            .await
            .map(|seen| seen.is_ok())
            .unwrap_or(false)
    }

    /// Forget the counter; the next session must re-seed it.
    pub fn reset(&self) {
        self.next.store(UNKNOWN, Ordering::SeqCst);
        self.known.send_replace(false);
    }
}

/// Orders created by this process, kept for the life of the process.
#[derive(Default)]
pub struct OrderTracker {
    orders: RwLock<HashMap<i64, Order>>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: Order) {
        self.orders.write().insert(order.id, order);
    }

    pub fn contains(&self, order_id: i64) -> bool {
        self.orders.read().contains_key(&order_id)
    }

    pub fn get(&self, order_id: i64) -> Option<Order> {
        self.orders.read().get(&order_id).cloned()
    }

    /// All tracked orders, oldest id first.
    pub fn all(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.read().values().cloned().collect();
        orders.sort_by_key(|order| order.id);
        orders
    }

    /// Apply a status push. Returns false for orders this process didn't create.
    pub fn apply(&self, update: &OrderUpdate) -> bool {
        let mut orders = self.orders.write();
        let Some(order) = orders.get_mut(&update.order_id) else {
            return false;
        };
        order.status = update.status.clone();
        order.filled = update.filled;
        order.remaining = update.remaining;
        if !update.avg_fill_price.is_zero() {
            order.avg_fill_price = update.avg_fill_price;
        }
        true
    }

    /// Move an order to a failure status from a gateway error.
    ///
    /// Returns the resulting update, or None for unknown or already
    /// terminal orders.
    pub fn fail(&self, order_id: i64, status: OrderStatus) -> Option<OrderUpdate> {
        let mut orders = self.orders.write();
        let order = orders.get_mut(&order_id)?;
        if order.status.is_terminal() {
            return None;
        }
        order.status = status;
        Some(OrderUpdate {
            order_id,
            status: order.status.clone(),
            filled: order.filled,
            remaining: order.remaining,
            avg_fill_price: order.avg_fill_price,
        })
    }
}

/// Initial update recorded when an order is transmitted.
pub(crate) fn pending_update(order_id: i64, quantity: Decimal) -> OrderUpdate {
    OrderUpdate {
        order_id,
        status: OrderStatus::PendingSubmit,
        filled: Decimal::ZERO,
        remaining: quantity,
        avg_fill_price: Decimal::ZERO,
    }
}

/// Rows of an id-less stream (open or completed orders) until its end marker.
struct StreamAccumulator<T> {
    rows: Vec<T>,
    extract: fn(&GatewayEvent) -> Option<T>,
    end: fn(&GatewayEvent) -> bool,
}

impl<T> StreamAccumulator<T> {
    fn new(extract: fn(&GatewayEvent) -> Option<T>, end: fn(&GatewayEvent) -> bool) -> Self {
        Self {
            rows: Vec::new(),
            extract,
            end,
        }
    }
}

impl<T: Send + 'static> Accumulator for StreamAccumulator<T> {
    type Output = Vec<T>;

    fn accept(&mut self, event: &GatewayEvent) -> Step {
        if (self.end)(event) {
            return Step::Done;
        }
        if let Some(row) = (self.extract)(event) {
            self.rows.push(row);
        }
        Step::Continue
    }

    fn finish(self, _completion: Completion) -> Result<Vec<T>> {
        Ok(self.rows)
    }
}

/// Execution reports, deduplicated as they arrive.
#[derive(Default)]
struct ExecutionsAccumulator {
    seen: HashSet<String>,
    executions: Vec<Execution>,
}

impl Accumulator for ExecutionsAccumulator {
    type Output = Vec<Execution>;

    fn accept(&mut self, event: &GatewayEvent) -> Step {
        match event {
            GatewayEvent::ExecutionDetails { execution, .. } => {
                if self.seen.insert(execution.dedup_key()) {
                    self.executions.push(execution.clone());
                }
                Step::Continue
            }
            GatewayEvent::ExecutionDetailsEnd { .. } => Step::Done,
            _ => Step::Continue,
        }
    }

    fn finish(self, _completion: Completion) -> Result<Vec<Execution>> {
        Ok(self.executions)
    }
}

impl IBClient {
    /// Orders created by this process.
    pub fn orders(&self) -> Vec<Order> {
        self.session.orders().all()
    }

    /// Working orders across all clients of the account.
    pub async fn open_orders(&self) -> Result<Vec<OpenOrder>> {
        let orders = self
            .session
            .correlator()
            .send_sentinel(
                ALL_OPEN_ORDERS_ID,
                "open_orders",
                Dispatch::new(GatewayRequest::AllOpenOrders),
                StreamAccumulator::new(
                    |event| match event {
                        GatewayEvent::OpenOrder(order) => Some(order.clone()),
                        _ => None,
                    },
                    |event| matches!(event, GatewayEvent::OpenOrderEnd),
                ),
                RequestOptions::timeout(self.config().timeouts.orders),
            )
            .await?;
        debug!(count = orders.len(), "Open orders retrieved");
        Ok(orders)
    }

    /// Orders that reached a terminal state.
    pub async fn completed_orders(&self) -> Result<Vec<CompletedOrder>> {
        let orders = self
            .session
            .correlator()
            .send_sentinel(
                COMPLETED_ORDERS_ID,
                "completed_orders",
                Dispatch::new(GatewayRequest::CompletedOrders),
                StreamAccumulator::new(
                    |event| match event {
                        GatewayEvent::CompletedOrder(order) => Some(order.clone()),
                        _ => None,
                    },
                    |event| matches!(event, GatewayEvent::CompletedOrdersEnd),
                ),
                RequestOptions::timeout(self.config().timeouts.orders),
            )
            .await?;
        debug!(count = orders.len(), "Completed orders retrieved");
        Ok(orders)
    }

    /// Today's executions. Each is recorded in the execution store, if one
    /// is configured; store failures are logged and don't fail the query.
    pub async fn executions(&self) -> Result<Vec<Execution>> {
        let executions = self
            .session
            .correlator()
            .send(
                "executions",
                |req_id| Dispatch::new(GatewayRequest::Executions { req_id }),
                ExecutionsAccumulator::default(),
                RequestOptions::timeout(self.config().timeouts.executions),
            )
            .await?;

        if let Some(store) = &self.store {
            let mut recorded = 0usize;
            for execution in &executions {
                match store.insert_if_absent(execution).await {
                    Ok(true) => recorded += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(exec_id = execution.exec_id, error = %e, "Failed to persist execution")
                    }
                }
            }
            if recorded > 0 {
                info!(recorded, total = executions.len(), "Executions persisted");
            }
        }
        Ok(executions)
    }
}
