//! Positions: the bare one-shot view and its reconciliation with live data.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::client::IBClient;
use crate::correlator::{Accumulator, Completion, Dispatch, RequestOptions, Step};
use crate::error::Result;
use crate::live::position_key;
use crate::protocol::{GatewayEvent, GatewayRequest, ALL_POSITIONS_ID};
use crate::types::{BarePosition, LivePosition, Portfolio, PortfolioPosition, PositionKey, PositionSource};

/// Position rows until the end marker; partial (possibly empty) on timeout.
#[derive(Default)]
struct PositionsAccumulator {
    positions: Vec<BarePosition>,
}

impl Accumulator for PositionsAccumulator {
    type Output = Vec<BarePosition>;

    fn accept(&mut self, event: &GatewayEvent) -> Step {
        match event {
            GatewayEvent::Position {
                account,
                contract,
                position,
                avg_cost,
            } => {
                if !position.is_zero() {
                    self.positions.push(BarePosition {
                        account: account.clone(),
                        key: position_key(contract),
                        con_id: contract.con_id,
                        quantity: *position,
                        avg_cost: *avg_cost,
                    });
                }
                Step::Continue
            }
            GatewayEvent::PositionEnd => Step::Done,
            _ => Step::Continue,
        }
    }

    fn finish(self, completion: Completion) -> Result<Vec<BarePosition>> {
        if let Completion::TimedOut { .. } = completion {
            debug!(rows = self.positions.len(), "Positions request timed out, using partial data");
        }
        Ok(self.positions)
    }
}

fn from_live(position: LivePosition) -> PortfolioPosition {
    PortfolioPosition {
        key: position.key,
        quantity: position.quantity,
        avg_cost: position.avg_cost,
        market_price: Some(position.market_price),
        market_value: Some(position.market_value),
        unrealized_pnl: Some(position.unrealized_pnl),
        realized_pnl: Some(position.realized_pnl),
        source: PositionSource::Live,
    }
}

fn from_bare(position: BarePosition) -> PortfolioPosition {
    PortfolioPosition {
        key: position.key,
        quantity: position.quantity,
        avg_cost: position.avg_cost,
        market_price: None,
        market_value: None,
        unrealized_pnl: None,
        realized_pnl: None,
        source: PositionSource::Snapshot,
    }
}

/// Merge bare and live positions. Live rows win in full per key; bare rows
/// fill only keys with no live data.
pub fn reconcile(bare: Vec<BarePosition>, live: Vec<LivePosition>) -> Vec<PortfolioPosition> {
    let mut merged: HashMap<PositionKey, PortfolioPosition> = HashMap::new();
    for position in bare {
        merged.insert(position.key.clone(), from_bare(position));
    }
    for position in live {
        merged.insert(position.key.clone(), from_live(position));
    }

    let mut positions: Vec<PortfolioPosition> = merged.into_values().collect();
    positions.sort_by(|a, b| {
        a.key
            .symbol
            .cmp(&b.key.symbol)
            .then(a.key.expiry.cmp(&b.key.expiry))
            .then(a.key.strike.cmp(&b.key.strike))
            .then(a.key.sec_type.to_string().cmp(&b.key.sec_type.to_string()))
            .then(
                a.key
                    .right
                    .map(|r| r.to_string())
                    .cmp(&b.key.right.map(|r| r.to_string())),
            )
    });
    positions
}

impl IBClient {
    /// Bare one-shot positions (no market value or P&L).
    pub async fn positions(&self) -> Result<Vec<BarePosition>> {
        let positions = self
            .session
            .correlator()
            .send_sentinel(
                ALL_POSITIONS_ID,
                "positions",
                Dispatch::new(GatewayRequest::Positions).with_cancel(GatewayRequest::CancelPositions),
                PositionsAccumulator::default(),
                RequestOptions::timeout(self.config().timeouts.positions),
            )
            .await?;
        debug!(count = positions.len(), "Positions retrieved");
        Ok(positions)
    }

    /// Account summary plus positions, live data preferred per position.
    pub async fn full_portfolio(&self) -> Result<Portfolio> {
        let account = self.account_summary().await?;
        let bare = self.positions().await?;
        let live = self.session.live().positions();
        let positions = reconcile(bare, live);
        info!(
            account = account.account_id,
            positions = positions.len(),
            live = positions.iter().filter(|p| p.source == PositionSource::Live).count(),
            "Portfolio assembled"
        );
        Ok(Portfolio { account, positions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Contract;
    use crate::types::{OptionRight, OptionsContract};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn spy_key() -> PositionKey {
        position_key(&Contract::stock("SPY"))
    }

    fn call_key() -> PositionKey {
        position_key(&Contract::option(&OptionsContract::new(
            "SPY",
            NaiveDate::from_ymd_opt(2026, 3, 20).unwrap(),
            dec!(450.0),
            OptionRight::Call,
        )))
    }

    fn bare(key: PositionKey, quantity: rust_decimal::Decimal) -> BarePosition {
        BarePosition {
            account: "DU1".into(),
            key,
            con_id: None,
            quantity,
            avg_cost: dec!(1),
        }
    }

    fn live(key: PositionKey, quantity: rust_decimal::Decimal) -> LivePosition {
        LivePosition {
            account: "DU1".into(),
            key,
            quantity,
            avg_cost: dec!(2),
            market_price: dec!(3),
            market_value: dec!(30),
            unrealized_pnl: dec!(10),
            realized_pnl: dec!(0),
        }
    }

    #[test]
    fn test_live_wins_per_key() {
        let merged = reconcile(
            vec![bare(spy_key(), dec!(5)), bare(call_key(), dec!(1))],
            vec![live(spy_key(), dec!(10))],
        );
        assert_eq!(merged.len(), 2);

        let spy = merged.iter().find(|p| p.key == spy_key()).unwrap();
        assert_eq!(spy.source, PositionSource::Live);
        assert_eq!(spy.quantity, dec!(10));
        assert_eq!(spy.avg_cost, dec!(2));
        assert_eq!(spy.market_value, Some(dec!(30)));

        let call = merged.iter().find(|p| p.key == call_key()).unwrap();
        assert_eq!(call.source, PositionSource::Snapshot);
        assert_eq!(call.market_value, None);
    }

    #[test]
    fn test_live_only_keys_included() {
        let merged = reconcile(vec![], vec![live(call_key(), dec!(-2))]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].quantity, dec!(-2));
    }

    #[test]
    fn test_strike_scale_does_not_split_keys() {
        let mut contract = Contract::stock("SPY");
        contract.sec_type = crate::types::SecType::Option;
        contract.strike = Some(dec!(450.00));
        contract.right = Some(OptionRight::Call);
        contract.expiry = NaiveDate::from_ymd_opt(2026, 3, 20);
        assert_eq!(position_key(&contract), call_key());
    }

    #[test]
    fn test_zero_rows_skipped() {
        let mut acc = PositionsAccumulator::default();
        acc.accept(&GatewayEvent::Position {
            account: "DU1".into(),
            contract: Contract::stock("QQQ"),
            position: dec!(0),
            avg_cost: dec!(0),
        });
        acc.accept(&GatewayEvent::Position {
            account: "DU1".into(),
            contract: Contract::stock("SPY"),
            position: dec!(3),
            avg_cost: dec!(500),
        });
        let rows = acc
            .finish(Completion::TimedOut {
                req_id: ALL_POSITIONS_ID,
                request: "positions",
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.symbol, "SPY");
    }
}
