//! Option NBBO quotes.
//!
//! Each quote opens a streaming market-data line under delayed-frozen data
//! type, settles as soon as bid and ask are both known, and falls back to
//! the last (or close) price once the grace window passes. Quotes never
//! fail: every failure mode ends in `None`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::client::{IBClient, IBConfig};
use crate::correlator::{Accumulator, Completion, Dispatch, RequestCorrelator, RequestOptions, Step};
use crate::error::{classify, IbError, Notice, Result};
use crate::protocol::{Contract, GatewayEvent, GatewayRequest, MarketDataType, TickField};
use crate::transport::Outbound;
use crate::types::{NbboQuote, OptionsContract};

/// Synthesized spread around the last trade price.
const SYNTHETIC_BID_FACTOR: Decimal = dec!(0.95);
const SYNTHETIC_ASK_FACTOR: Decimal = dec!(1.05);

fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Build a quote from the fields seen so far.
///
/// A two-sided market wins; otherwise a positive last (or close) price is
/// turned into a synthesized ±5% quote.
pub fn build_quote(
    bid: Option<Decimal>,
    ask: Option<Decimal>,
    last: Option<Decimal>,
    close: Option<Decimal>,
    delayed: bool,
) -> Option<NbboQuote> {
    if let (Some(bid), Some(ask)) = (bid, ask) {
        if bid <= ask {
            let mid = round_cents((bid + ask) / dec!(2)).max(bid).min(ask);
            return Some(NbboQuote {
                bid,
                ask,
                mid,
                last,
                delayed,
                synthesized: false,
            });
        }
    }
    let reference = last.or(close)?;
    let bid = round_cents(reference * SYNTHETIC_BID_FACTOR);
    let ask = round_cents(reference * SYNTHETIC_ASK_FACTOR);
    let mid = round_cents(reference).max(bid).min(ask);
    Some(NbboQuote {
        bid,
        ask,
        mid,
        last,
        delayed,
        synthesized: true,
    })
}

/// Folds tick prices into one NBBO.
#[derive(Debug, Default)]
struct NbboAccumulator {
    bid: Option<Decimal>,
    ask: Option<Decimal>,
    last: Option<Decimal>,
    close: Option<Decimal>,
    delayed: bool,
    grace_elapsed: bool,
    unavailable: bool,
}

impl NbboAccumulator {
    fn two_sided(&self) -> bool {
        matches!((self.bid, self.ask), (Some(bid), Some(ask)) if bid <= ask)
    }

    fn progress(&self) -> Step {
        if self.two_sided() || (self.grace_elapsed && self.last.or(self.close).is_some()) {
            Step::Done
        } else {
            Step::Continue
        }
    }
}

impl Accumulator for NbboAccumulator {
    type Output = Option<NbboQuote>;

    fn accept(&mut self, event: &GatewayEvent) -> Step {
        match event {
            GatewayEvent::TickPrice { tick, price, .. } => {
                let Some((field, delayed)) = tick.field() else {
                    return Step::Continue;
                };
                // The gateway sends -1 / 0 for "no data".
                if *price <= Decimal::ZERO {
                    return Step::Continue;
                }
                let slot = match field {
                    TickField::Bid => &mut self.bid,
                    TickField::Ask => &mut self.ask,
                    TickField::Last => &mut self.last,
                    TickField::Close => &mut self.close,
                };
                *slot = Some(*price);
                self.delayed |= delayed;
                self.progress()
            }
            GatewayEvent::TickSnapshotEnd { .. } => Step::Done,
            _ => Step::Continue,
        }
    }

    fn on_error(&mut self, code: i32, message: &str) -> Step {
        match classify(code) {
            Notice::Informational => Step::Continue,
            Notice::ContractNotFound | Notice::NoEntitlement => {
                debug!(code, detail = message, "Quote unavailable");
                self.unavailable = true;
                Step::Done
            }
            Notice::Other => Step::Fail(IbError::from_gateway(code, message)),
        }
    }

    fn on_grace(&mut self) -> Step {
        self.grace_elapsed = true;
        self.progress()
    }

    fn finish(self, _completion: Completion) -> Result<Option<NbboQuote>> {
        if self.unavailable {
            return Ok(None);
        }
        Ok(build_quote(self.bid, self.ask, self.last, self.close, self.delayed))
    }
}

/// Keeps the session on delayed-frozen data while any quote is in flight.
///
/// The first acquirer switches the type; the last release restores real-time.
struct DataTypeScope {
    outbound: Outbound,
    active: Mutex<usize>,
}

impl DataTypeScope {
    fn enter(self: &Arc<Self>) -> DataTypeGuard {
        let mut active = self.active.lock();
        if *active == 0 {
            self.switch(MarketDataType::DelayedFrozen);
        }
        *active += 1;
        DataTypeGuard {
            scope: Arc::clone(self),
        }
    }

    fn switch(&self, data_type: MarketDataType) {
        if let Err(e) = self.outbound.send(GatewayRequest::MarketDataType(data_type)) {
            debug!(?data_type, error = %e, "Could not switch market data type");
        }
    }
}

struct DataTypeGuard {
    scope: Arc<DataTypeScope>,
}

impl Drop for DataTypeGuard {
    fn drop(&mut self) {
        let mut active = self.scope.active.lock();
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.scope.switch(MarketDataType::RealTime);
        }
    }
}

/// NBBO quotes for option contracts.
pub struct QuoteOracle {
    correlator: Arc<RequestCorrelator>,
    scope: Arc<DataTypeScope>,
    lines: Arc<Semaphore>,
    timeout: Duration,
    grace: Duration,
}

impl QuoteOracle {
    pub fn new(correlator: Arc<RequestCorrelator>, config: &IBConfig) -> Self {
        let scope = Arc::new(DataTypeScope {
            outbound: correlator.outbound().clone(),
            active: Mutex::new(0),
        });
        Self {
            correlator,
            scope,
            lines: Arc::new(Semaphore::new(config.market_data_lines.max(1))),
            timeout: config.timeouts.quote,
            grace: config.timeouts.quote_grace,
        }
    }

    /// NBBO for one contract, or None when unavailable.
    pub async fn quote(&self, contract: &OptionsContract) -> Option<NbboQuote> {
        let _line = self.lines.acquire().await.ok()?;
        let _data_type = self.scope.enter();
        let result = self
            .correlator
            .send(
                "market_data",
                |req_id| {
                    Dispatch::new(GatewayRequest::MarketData {
                        req_id,
                        contract: Contract::option(contract),
                        snapshot: false,
                    })
                    .with_cancel(GatewayRequest::CancelMarketData { req_id })
                },
                NbboAccumulator::default(),
                RequestOptions::timeout(self.timeout).with_grace(self.grace),
            )
            .await;

        match result {
            Ok(Some(quote)) => {
                debug!(
                    contract = %contract.display_name(),
                    bid = %quote.bid,
                    ask = %quote.ask,
                    synthesized = quote.synthesized,
                    "Option quote"
                );
                Some(quote)
            }
            Ok(None) => {
                debug!(contract = %contract.display_name(), "No quote available");
                None
            }
            Err(e) => {
                warn!(contract = %contract.display_name(), error = %e, "Quote request failed");
                None
            }
        }
    }

    /// Quotes for many contracts keyed by `OptionsContract::key`, with at
    /// most `concurrency` requests in flight.
    pub async fn quote_batch(
        &self,
        contracts: &[OptionsContract],
        concurrency: usize,
    ) -> HashMap<String, Option<NbboQuote>> {
        let mut seen = HashSet::new();
        let unique: Vec<&OptionsContract> = contracts
            .iter()
            .filter(|contract| seen.insert(contract.key()))
            .collect();

        stream::iter(unique)
            .map(|contract| async move { (contract.key(), self.quote(contract).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }
}

impl IBClient {
    /// NBBO for an option; None when no market data is available.
    pub async fn option_nbbo(&self, contract: &OptionsContract) -> Option<NbboQuote> {
        self.quotes.quote(contract).await
    }

    /// NBBO for many options, keyed by `OptionsContract::key`.
    pub async fn option_nbbo_batch(
        &self,
        contracts: &[OptionsContract],
        concurrency: Option<usize>,
    ) -> HashMap<String, Option<NbboQuote>> {
        let concurrency = concurrency.unwrap_or(self.config().quote_concurrency);
        self.quotes.quote_batch(contracts, concurrency).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RequestId, TickType};
    use chrono::NaiveDate;
    use tokio::sync::mpsc;

    fn spy_call() -> OptionsContract {
        OptionsContract::new(
            "SPY",
            NaiveDate::from_ymd_opt(2026, 3, 20).unwrap(),
            dec!(450),
            crate::types::OptionRight::Call,
        )
    }

    fn oracle() -> (Arc<QuoteOracle>, Arc<RequestCorrelator>, mpsc::UnboundedReceiver<GatewayRequest>) {
        let outbound = Outbound::new();
        let (tx, rx) = mpsc::unbounded_channel();
        outbound.attach(tx);
        let correlator = Arc::new(RequestCorrelator::new(outbound));
        (
            Arc::new(QuoteOracle::new(correlator.clone(), &IBConfig::paper())),
            correlator,
            rx,
        )
    }

    async fn market_data_id(rx: &mut mpsc::UnboundedReceiver<GatewayRequest>) -> RequestId {
        loop {
            match rx.recv().await.unwrap() {
                GatewayRequest::MarketData { req_id, .. } => return req_id,
                GatewayRequest::MarketDataType(_) => continue,
                other => panic!("unexpected request {other:?}"),
            }
        }
    }

    fn tick(req_id: RequestId, tick: TickType, price: Decimal) -> GatewayEvent {
        GatewayEvent::TickPrice { req_id, tick, price }
    }

    // ==================== Quote Construction Tests ====================

    #[test]
    fn test_build_quote_two_sided() {
        let quote = build_quote(Some(dec!(1.00)), Some(dec!(1.05)), None, None, false).unwrap();
        assert_eq!(quote.mid, dec!(1.03));
        assert!(!quote.synthesized);
        assert!(quote.bid <= quote.mid && quote.mid <= quote.ask);
    }

    #[test]
    fn test_build_quote_synthesized_from_last() {
        let quote = build_quote(None, Some(dec!(2.10)), Some(dec!(2.00)), None, true).unwrap();
        assert_eq!(quote.bid, dec!(1.90));
        assert_eq!(quote.ask, dec!(2.10));
        assert_eq!(quote.mid, dec!(2.00));
        assert!(quote.synthesized);
        assert!(quote.delayed);
    }

    #[test]
    fn test_build_quote_crossed_market_uses_close() {
        let quote = build_quote(Some(dec!(2.0)), Some(dec!(1.0)), None, Some(dec!(1.50)), false).unwrap();
        assert!(quote.synthesized);
        assert_eq!(quote.mid, dec!(1.50));
    }

    #[test]
    fn test_synthesized_quotes_keep_mid_inside_market() {
        let references = [
            dec!(0.01),
            dec!(0.03),
            dec!(0.07),
            dec!(0.335),
            dec!(1.005),
            dec!(2.99),
            dec!(3.01),
            dec!(17.777),
            dec!(250.125),
        ];
        for reference in references {
            let from_last = build_quote(None, None, Some(reference), None, false).unwrap();
            let from_close = build_quote(None, None, None, Some(reference), true).unwrap();
            for quote in [from_last, from_close] {
                assert!(quote.synthesized);
                assert!(
                    quote.bid <= quote.mid && quote.mid <= quote.ask,
                    "{reference}: {} / {} / {}",
                    quote.bid,
                    quote.mid,
                    quote.ask
                );
            }
        }
    }

    #[test]
    fn test_build_quote_nothing() {
        assert!(build_quote(Some(dec!(1.0)), None, None, None, false).is_none());
    }

    // ==================== Request Tests ====================

    #[tokio::test]
    async fn test_quote_settles_on_bid_and_ask() {
        let (oracle, correlator, mut rx) = oracle();
        let handle = {
            let oracle = oracle.clone();
            tokio::spawn(async move { oracle.quote(&spy_call()).await })
        };
        assert_eq!(
            rx.recv().await.unwrap(),
            GatewayRequest::MarketDataType(MarketDataType::DelayedFrozen)
        );
        let id = market_data_id(&mut rx).await;
        correlator.dispatch(&tick(id, TickType::DELAYED_BID, dec!(1.00)));
        correlator.dispatch(&tick(id, TickType::DELAYED_ASK, dec!(2.00)));

        let quote = handle.await.unwrap().unwrap();
        assert_eq!(quote.mid, dec!(1.50));
        assert!(quote.delayed);

        assert_eq!(rx.recv().await.unwrap(), GatewayRequest::CancelMarketData { req_id: id });
        assert_eq!(
            rx.recv().await.unwrap(),
            GatewayRequest::MarketDataType(MarketDataType::RealTime)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_quote_synthesized_after_grace() {
        let (oracle, correlator, mut rx) = oracle();
        let started = tokio::time::Instant::now();
        let handle = {
            let oracle = oracle.clone();
            tokio::spawn(async move { oracle.quote(&spy_call()).await })
        };
        let id = market_data_id(&mut rx).await;
        correlator.dispatch(&tick(id, TickType::LAST, dec!(3.00)));

        // Grace is 3s; the hard ceiling (8s) is never reached.
        let quote = handle.await.unwrap().unwrap();
        assert!(quote.synthesized);
        assert_eq!(quote.bid, dec!(2.85));
        assert_eq!(quote.ask, dec!(3.15));
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_no_entitlement_returns_none() {
        let (oracle, correlator, mut rx) = oracle();
        let handle = {
            let oracle = oracle.clone();
            tokio::spawn(async move { oracle.quote(&spy_call()).await })
        };
        let id = market_data_id(&mut rx).await;
        correlator.dispatch(&GatewayEvent::Error {
            id: Some(id),
            code: 10089,
            message: "Requested market data requires additional subscription".into(),
        });
        assert!(handle.await.unwrap().is_none());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quote_times_out_to_none() {
        let (oracle, _correlator, _rx) = oracle();
        assert!(oracle.quote(&spy_call()).await.is_none());
    }

    #[tokio::test]
    async fn test_overlapping_quotes_keep_delayed_type() {
        let (oracle, correlator, mut rx) = oracle();
        let first = {
            let oracle = oracle.clone();
            tokio::spawn(async move { oracle.quote(&spy_call()).await })
        };
        let first_id = market_data_id(&mut rx).await;
        let second = {
            let oracle = oracle.clone();
            let put = OptionsContract {
                right: crate::types::OptionRight::Put,
                ..spy_call()
            };
            tokio::spawn(async move { oracle.quote(&put).await })
        };
        let second_id = market_data_id(&mut rx).await;

        correlator.dispatch(&tick(first_id, TickType::BID, dec!(1.00)));
        correlator.dispatch(&tick(first_id, TickType::ASK, dec!(1.10)));
        first.await.unwrap().unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            GatewayRequest::CancelMarketData { req_id: first_id }
        );
        // The second quote is still open: no switch back to real-time yet.
        assert!(rx.try_recv().is_err());

        correlator.dispatch(&tick(second_id, TickType::BID, dec!(2.00)));
        correlator.dispatch(&tick(second_id, TickType::ASK, dec!(2.20)));
        second.await.unwrap().unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            GatewayRequest::CancelMarketData { req_id: second_id }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            GatewayRequest::MarketDataType(MarketDataType::RealTime)
        );
    }
}
