//! IB account queries: net liquidation, cash, buying power, margin, P&L.
//!
//! The live subscription is preferred whenever it is ready with a positive
//! net liquidation; the one-shot summary request only fills the gap before
//! that, and never displaces live data that arrives while it runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::IBClient;
use crate::correlator::{Accumulator, Completion, Dispatch, RequestOptions, Step};
use crate::error::{IbError, Result};
use crate::protocol::{GatewayEvent, GatewayRequest};
use crate::types::{AccountSummary, ACCOUNT_SUMMARY_TAGS};

/// One-shot account summary. Times out as an error when nothing arrived.
struct AccountSummaryAccumulator {
    base_currency: String,
    summary: AccountSummary,
    rows: usize,
}

impl AccountSummaryAccumulator {
    fn new(base_currency: &str) -> Self {
        Self {
            base_currency: base_currency.to_string(),
            summary: AccountSummary {
                currency: base_currency.to_string(),
                ..AccountSummary::default()
            },
            rows: 0,
        }
    }
}

impl Accumulator for AccountSummaryAccumulator {
    type Output = AccountSummary;

    fn accept(&mut self, event: &GatewayEvent) -> Step {
        match event {
            GatewayEvent::AccountSummary {
                account,
                tag,
                value,
                currency,
                ..
            } => {
                if !currency.is_empty() && *currency != self.base_currency {
                    return Step::Continue;
                }
                if self.summary.apply_tag(tag, value) {
                    self.rows += 1;
                    if self.summary.account_id.is_empty() {
                        self.summary.account_id = account.clone();
                    }
                }
                Step::Continue
            }
            GatewayEvent::AccountSummaryEnd { .. } => Step::Done,
            _ => Step::Continue,
        }
    }

    fn finish(self, completion: Completion) -> Result<AccountSummary> {
        match completion.timeout_error() {
            Some(err) if self.rows == 0 => Err(err),
            _ => Ok(self.summary),
        }
    }
}

impl IBClient {
    /// Account summary, preferring live subscription data.
    pub async fn account_summary(&self) -> Result<AccountSummary> {
        let live = self.session.live();
        if let Some(summary) = live.usable_summary() {
            return Ok(summary);
        }

        let timeouts = self.config().timeouts;
        if live.wait_usable(timeouts.live_account_wait).await {
            if let Some(summary) = live.usable_summary() {
                debug!("Live account data became usable");
                return Ok(summary);
            }
        }

        debug!("Live account data not ready, requesting one-shot summary");
        tokio::select! {
            result = self.one_shot_account_summary() => {
                // Live data that turned usable meanwhile beats the snapshot.
                match live.usable_summary() {
                    Some(summary) => Ok(summary),
                    None => result,
                }
            }
            true = live.wait_usable(timeouts.account_summary) => {
                debug!("Live account data won the race against the one-shot summary");
                live.usable_summary().ok_or_else(|| {
                    IbError::NotReady("live account data withdrawn".to_string())
                })
            }
        }
    }

    async fn one_shot_account_summary(&self) -> Result<AccountSummary> {
        let tags: Vec<String> = ACCOUNT_SUMMARY_TAGS.iter().map(|t| t.to_string()).collect();
        let summary = self
            .session
            .correlator()
            .send(
                "account_summary",
                |req_id| {
                    Dispatch::new(GatewayRequest::AccountSummary {
                        req_id,
                        group: "All".to_string(),
                        tags,
                    })
                    .with_cancel(GatewayRequest::CancelAccountSummary { req_id })
                },
                AccountSummaryAccumulator::new(&self.config().base_currency),
                RequestOptions::timeout(self.config().timeouts.account_summary),
            )
            .await?;
        info!(
            account = summary.account_id,
            net_liquidation = %summary.net_liquidation,
            "Account summary retrieved"
        );
        Ok(summary)
    }
}

/// Anything that can produce a fresh account summary.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn fetch_account_summary(&self) -> Result<AccountSummary>;
}

#[async_trait]
impl AccountSource for IBClient {
    async fn fetch_account_summary(&self) -> Result<AccountSummary> {
        self.account_summary().await
    }
}

/// Consumer-level account snapshot, refreshed at most once per interval.
///
/// A fetch that comes back with zero net liquidation never replaces a
/// populated snapshot, and fetch errors fall back to the cached value.
pub struct AccountCache {
    source: Arc<dyn AccountSource>,
    refresh: Duration,
    cached: Mutex<Option<(AccountSummary, Instant)>>,
}

impl AccountCache {
    pub fn new(source: Arc<dyn AccountSource>, refresh: Duration) -> Self {
        Self {
            source,
            refresh,
            cached: Mutex::new(None),
        }
    }

    /// Last accepted snapshot, regardless of age.
    pub fn cached(&self) -> Option<AccountSummary> {
        self.cached.lock().as_ref().map(|(summary, _)| summary.clone())
    }

    pub async fn get(&self) -> Result<AccountSummary> {
        let previous = self.cached.lock().clone();
        if let Some((summary, fetched_at)) = &previous {
            if fetched_at.elapsed() < self.refresh {
                return Ok(summary.clone());
            }
        }

        match self.source.fetch_account_summary().await {
            Ok(fresh) => match previous {
                Some((stale, _)) if stale.is_populated() && !fresh.is_populated() => {
                    warn!(
                        cached_net_liquidation = %stale.net_liquidation,
                        "Fetched account summary has zero net liquidation, keeping cached snapshot"
                    );
                    Ok(stale)
                }
                _ => {
                    *self.cached.lock() = Some((fresh.clone(), Instant::now()));
                    Ok(fresh)
                }
            },
            Err(e) => match previous {
                Some((stale, _)) => {
                    warn!(error = %e, "Account summary fetch failed, using cached snapshot");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }
}
