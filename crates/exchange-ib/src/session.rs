//! Gateway session: connection lifecycle and the single event dispatch loop.
//!
//! One task owns the inbound event stream. Push state (account values,
//! portfolio rows, order status, next valid id) is applied here in arrival
//! order, then the event is offered to the request correlator.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::IBConfig;
use crate::correlator::RequestCorrelator;
use crate::error::{classify, IbError, Notice, Result};
use crate::live::LiveStore;
use crate::orders::{OrderIdAllocator, OrderTracker};
use crate::protocol::{GatewayEvent, GatewayRequest, MarketDataType};
use crate::transport::{Outbound, Transport};
use crate::types::{OrderStatus, OrderUpdate};

/// Gateway error code for "order cancelled".
const ORDER_CANCELLED_CODE: i32 = 202;
/// Order-level warning that does not affect the order.
const ORDER_WARNING_CODE: i32 = 399;
/// Connectivity between the gateway and the broker lost / restored.
const CONNECTIVITY_CODES: &[i32] = &[1100, 1101, 1102];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Pushed to `subscribe()` receivers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connection(ConnectionState),
    OrderStatus(OrderUpdate),
}

/// State mutated by the dispatch loop.
pub(crate) struct Dispatcher {
    pub(crate) correlator: Arc<RequestCorrelator>,
    pub(crate) live: LiveStore,
    pub(crate) orders: OrderTracker,
    pub(crate) order_ids: OrderIdAllocator,
    accounts: RwLock<Vec<String>>,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Sender<ConnectionState>,
}

impl Dispatcher {
    fn new(correlator: Arc<RequestCorrelator>, base_currency: &str) -> Self {
        let (events, _) = broadcast::channel(256);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            correlator,
            live: LiveStore::new(base_currency),
            orders: OrderTracker::new(),
            order_ids: OrderIdAllocator::new(),
            accounts: RwLock::new(Vec::new()),
            events,
            state,
        }
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            self.publish(SessionEvent::Connection(state));
        }
    }

    fn handle(&self, event: GatewayEvent) {
        match &event {
            GatewayEvent::NextValidId(id) => self.order_ids.seed(*id),
            GatewayEvent::ManagedAccounts(accounts) => {
                debug!(?accounts, "Managed accounts");
                *self.accounts.write() = accounts.clone();
            }
            GatewayEvent::AccountValue {
                account,
                key,
                value,
                currency,
            } => self.live.apply_account_value(account, key, value, currency),
            GatewayEvent::PortfolioValue {
                account,
                contract,
                position,
                market_price,
                market_value,
                avg_cost,
                unrealized_pnl,
                realized_pnl,
            } => self.live.apply_portfolio(
                account,
                contract,
                *position,
                *market_price,
                *market_value,
                *avg_cost,
                *unrealized_pnl,
                *realized_pnl,
            ),
            GatewayEvent::AccountDownloadEnd { account } => self.live.mark_ready(account),
            GatewayEvent::OrderStatus {
                order_id,
                status,
                filled,
                remaining,
                avg_fill_price,
            } => {
                let update = OrderUpdate {
                    order_id: *order_id,
                    status: status.clone(),
                    filled: *filled,
                    remaining: *remaining,
                    avg_fill_price: *avg_fill_price,
                };
                if self.orders.apply(&update) {
                    info!(order_id, status = ?update.status, filled = %filled, "Order status");
                }
                self.publish(SessionEvent::OrderStatus(update));
            }
            GatewayEvent::Error {
                id: Some(id),
                code,
                message,
            } if self.orders.contains(*id) => {
                self.order_error(*id, *code, message);
                return;
            }
            GatewayEvent::Error {
                id: None,
                code,
                message,
            } => self.connection_notice(*code, message),
            _ => {}
        }

        if !self.correlator.dispatch(&event) {
            if let Some(id) = event.correlation_id() {
                debug!(req_id = id, "Dropping event for request no longer pending");
            }
        }
    }

    fn order_error(&self, order_id: i64, code: i32, message: &str) {
        if code == ORDER_WARNING_CODE || classify(code) == Notice::Informational {
            debug!(order_id, code, detail = message, "Order notice");
            return;
        }
        let status = if code == ORDER_CANCELLED_CODE {
            OrderStatus::Cancelled
        } else {
            OrderStatus::Rejected {
                reason: format!("[{code}] {message}"),
            }
        };
        warn!(order_id, code, detail = message, "Order error");
        if let Some(update) = self.orders.fail(order_id, status) {
            self.publish(SessionEvent::OrderStatus(update));
        }
    }

    fn connection_notice(&self, code: i32, message: &str) {
        match classify(code) {
            Notice::Informational => debug!(code, detail = message, "Gateway notice"),
            _ if CONNECTIVITY_CODES.contains(&code) => {
                warn!(code, detail = message, "Gateway connectivity change")
            }
            _ => warn!(code, detail = message, "Gateway error"),
        }
    }

    /// The event stream ended without an explicit disconnect.
    fn connection_lost(&self) {
        let dropped = self.state.send_if_modified(|current| {
            if *current == ConnectionState::Disconnected {
                return false;
            }
            *current = ConnectionState::Disconnected;
            true
        });
        if !dropped {
            return;
        }
        error!("Gateway connection lost");
        self.correlator.outbound().detach();
        self.correlator.fail_all(IbError::Disconnected);
        self.publish(SessionEvent::Connection(ConnectionState::Disconnected));
    }
}

async fn dispatch_loop(dispatcher: Arc<Dispatcher>, mut events: mpsc::UnboundedReceiver<GatewayEvent>) {
    while let Some(event) = events.recv().await {
        if matches!(event, GatewayEvent::ConnectionClosed) {
            break;
        }
        dispatcher.handle(event);
    }
    dispatcher.connection_lost();
}

/// Owns the transport and the dispatch task for one client.
pub struct IbSession {
    config: IBConfig,
    transport: Arc<dyn Transport>,
    outbound: Outbound,
    dispatcher: Arc<Dispatcher>,
    task: Mutex<Option<JoinHandle<()>>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl IbSession {
    pub fn new(config: IBConfig, transport: Arc<dyn Transport>) -> Self {
        let outbound = Outbound::new();
        let correlator = Arc::new(RequestCorrelator::new(outbound.clone()));
        let dispatcher = Arc::new(Dispatcher::new(correlator, &config.base_currency));
        Self {
            config,
            transport,
            outbound,
            dispatcher,
            task: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn correlator(&self) -> Arc<RequestCorrelator> {
        self.dispatcher.correlator.clone()
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    pub fn live(&self) -> &LiveStore {
        &self.dispatcher.live
    }

    pub fn orders(&self) -> &OrderTracker {
        &self.dispatcher.orders
    }

    pub fn order_ids(&self) -> &OrderIdAllocator {
        &self.dispatcher.order_ids
    }

    pub fn managed_accounts(&self) -> Vec<String> {
        self.dispatcher.accounts.read().clone()
    }

    /// Account used for live updates and orders.
    pub fn account(&self) -> Option<String> {
        self.config
            .account
            .clone()
            .or_else(|| self.managed_accounts().into_iter().next())
    }

    pub fn state(&self) -> ConnectionState {
        *self.dispatcher.state.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.dispatcher.events.subscribe()
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        self.dispatcher.publish(event);
    }

    /// Connect and complete the handshake: next valid id received, live
    /// account subscription started.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.dispatcher.set_state(ConnectionState::Connecting);

        let link = match self.transport.connect(&self.config).await {
            Ok(link) => link,
            Err(e) => {
                self.dispatcher.set_state(ConnectionState::Disconnected);
                return Err(IbError::Connection(e.to_string()));
            }
        };
        self.outbound.attach(link.requests);
        let handle = tokio::spawn(dispatch_loop(self.dispatcher.clone(), link.events));
        if let Some(stale) = self.task.lock().replace(handle) {
            stale.abort();
        }

        if let Err(e) = self.handshake().await {
            self.teardown().await;
            return Err(e);
        }

        self.dispatcher.set_state(ConnectionState::Connected);
        info!(
            url = %self.config.connection_url(),
            account = ?self.account(),
            "Connected to IB Gateway"
        );
        Ok(())
    }

    async fn handshake(&self) -> Result<()> {
        if !self.dispatcher.order_ids.is_known() {
            self.outbound.send(GatewayRequest::RequestIds)?;
        }
        if !self
            .dispatcher
            .order_ids
            .wait_known(self.config.timeouts.connect)
            .await
        {
            return Err(IbError::Connection(format!(
                "no next valid order id from {} within {:?}",
                self.config.connection_url(),
                self.config.timeouts.connect
            )));
        }
        self.outbound
            .send(GatewayRequest::MarketDataType(MarketDataType::RealTime))?;
        self.outbound.send(GatewayRequest::AccountUpdates {
            subscribe: true,
            account: self.account().unwrap_or_default(),
        })?;
        Ok(())
    }

    /// Explicit disconnect: fails pending requests and resets live state.
    pub async fn disconnect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() == ConnectionState::Disconnected && !self.outbound.is_attached() {
            return Ok(());
        }
        if self.outbound.is_attached() {
            let _ = self.outbound.send(GatewayRequest::AccountUpdates {
                subscribe: false,
                account: self.account().unwrap_or_default(),
            });
        }
        self.teardown().await;
        info!("Disconnected from IB Gateway");
        Ok(())
    }

    async fn teardown(&self) {
        self.dispatcher.set_state(ConnectionState::Disconnected);
        self.outbound.detach();
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Transport disconnect failed");
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.dispatcher.correlator.fail_all(IbError::Disconnected);
        self.dispatcher.live.reset();
        self.dispatcher.order_ids.reset();
    }
}

impl Drop for IbSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
