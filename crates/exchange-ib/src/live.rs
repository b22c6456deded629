//! Live account and portfolio state maintained from push updates.
//!
//! The gateway streams account values and per-position portfolio values
//! after `AccountUpdates { subscribe: true }`; "account download end" marks
//! the initial snapshot complete and flips `ready`. Only an explicit
//! disconnect resets it.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::protocol::Contract;
use crate::types::{AccountSummary, LivePosition, PositionKey};

/// Readiness signal watched by account-summary callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveStatus {
    pub ready: bool,
    pub net_liquidation: Decimal,
}

impl LiveStatus {
    /// Ready with a positive net liquidation.
    pub fn is_usable(&self) -> bool {
        self.ready && self.net_liquidation > Decimal::ZERO
    }
}

/// Snapshot of the live account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveAccountState {
    pub summary: AccountSummary,
    pub ready: bool,
}

#[derive(Default)]
struct LiveState {
    summary: AccountSummary,
    positions: HashMap<PositionKey, LivePosition>,
}

/// Position key shared by the live and bare position sources.
pub fn position_key(contract: &Contract) -> PositionKey {
    PositionKey {
        symbol: contract.symbol.to_uppercase(),
        sec_type: contract.sec_type,
        strike: contract.strike.map(|s| s.normalize()),
        right: contract.right,
        expiry: contract.expiry,
    }
}

/// Push-fed account and position state.
pub struct LiveStore {
    base_currency: String,
    state: RwLock<LiveState>,
    status: watch::Sender<LiveStatus>,
}

impl LiveStore {
    pub fn new(base_currency: impl Into<String>) -> Self {
        let (status, _) = watch::channel(LiveStatus::default());
        Self {
            base_currency: base_currency.into(),
            state: RwLock::new(LiveState::default()),
            status,
        }
    }

    /// Apply one account value push.
    pub fn apply_account_value(&self, account: &str, key: &str, value: &str, currency: &str) {
        if !currency.is_empty() && currency != self.base_currency {
            return;
        }
        let net_liquidation = {
            let mut state = self.state.write();
            if !state.summary.apply_tag(key, value) {
                return;
            }
            if state.summary.account_id.is_empty() {
                state.summary.account_id = account.to_string();
            }
            state.summary.currency = self.base_currency.clone();
            state.summary.net_liquidation
        };
        self.status.send_if_modified(|status| {
            let changed = status.net_liquidation != net_liquidation;
            status.net_liquidation = net_liquidation;
            changed
        });
    }

    /// Apply one portfolio push; a zero position removes the row.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_portfolio(
        &self,
        account: &str,
        contract: &Contract,
        position: Decimal,
        market_price: Decimal,
        market_value: Decimal,
        avg_cost: Decimal,
        unrealized_pnl: Decimal,
        realized_pnl: Decimal,
    ) {
        let key = position_key(contract);
        let mut state = self.state.write();
        if position.is_zero() {
            state.positions.remove(&key);
            return;
        }
        state.positions.insert(
            key.clone(),
            LivePosition {
                account: account.to_string(),
                key,
                quantity: position,
                avg_cost,
                market_price,
                market_value,
                unrealized_pnl,
                realized_pnl,
            },
        );
    }

    /// Initial download complete.
    pub fn mark_ready(&self, account: &str) {
        let net_liquidation = self.state.read().summary.net_liquidation;
        self.status.send_if_modified(|status| {
            if status.ready {
                return false;
            }
            status.ready = true;
            status.net_liquidation = net_liquidation;
            true
        });
        info!(account, net_liquidation = %net_liquidation, "Live account subscription ready");
    }

    pub fn is_ready(&self) -> bool {
        self.status.borrow().ready
    }

    pub fn status(&self) -> LiveStatus {
        *self.status.borrow()
    }

    pub fn account(&self) -> LiveAccountState {
        LiveAccountState {
            summary: self.state.read().summary.clone(),
            ready: self.is_ready(),
        }
    }

    /// Live summary when ready with a positive net liquidation.
    pub fn usable_summary(&self) -> Option<AccountSummary> {
        if self.status().is_usable() {
            Some(self.state.read().summary.clone())
        } else {
            None
        }
    }

    pub fn positions(&self) -> Vec<LivePosition> {
        self.state.read().positions.values().cloned().collect()
    }

    /// Wait until the live summary is usable. Returns false on timeout.
    pub async fn wait_usable(&self, timeout: Duration) -> bool {
        let mut rx = self.status.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(LiveStatus::is_usable))
            .await
            .map(|seen| seen.is_ok())
            .unwrap_or(false)
    }

    /// Forget everything; only called on explicit disconnect.
    pub fn reset(&self) {
        *self.state.write() = LiveState::default();
        self.status.send_replace(LiveStatus::default());
        debug!("Live account state reset");
    }
}
