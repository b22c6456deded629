//! Contract ids and option chain parameters, cached with a TTL.
//!
//! A request that fails or comes back empty is not cached, so the next
//! caller asks the gateway again.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{IBClient, IBConfig};
use crate::correlator::{Accumulator, Completion, Dispatch, RequestCorrelator, RequestOptions, Step};
use crate::error::{classify, IbError, Notice, Result};
use crate::protocol::{Contract, GatewayEvent, GatewayRequest, OptionParameterSet};
use crate::types::{ChainParams, OptionsContract, ResolvedContract};

const PREFERRED_EXCHANGE: &str = "SMART";

/// Key → value map whose entries expire after a fixed lifetime.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, (V, Instant)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Value cached less than `ttl` ago.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        let fresh = entries
            .get(key)
            .filter(|(_, cached_at)| cached_at.elapsed() < self.ttl)
            .map(|(value, _)| value.clone());
        if fresh.is_none() {
            entries.remove(key);
        }
        fresh
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries.lock().insert(key.into(), (value, Instant::now()));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Collects contract details until the end marker. "Not found" is an empty result.
#[derive(Default)]
struct ContractDetailsAccumulator {
    contracts: Vec<Contract>,
}

impl Accumulator for ContractDetailsAccumulator {
    type Output = Vec<Contract>;

    fn accept(&mut self, event: &GatewayEvent) -> Step {
        match event {
            GatewayEvent::ContractDetails { contract, .. } => {
                self.contracts.push(contract.clone());
                Step::Continue
            }
            GatewayEvent::ContractDetailsEnd { .. } => Step::Done,
            _ => Step::Continue,
        }
    }

    fn on_error(&mut self, code: i32, message: &str) -> Step {
        match classify(code) {
            Notice::Informational => Step::Continue,
            Notice::ContractNotFound => Step::Done,
            _ => Step::Fail(IbError::from_gateway(code, message)),
        }
    }

    fn finish(self, completion: Completion) -> Result<Vec<Contract>> {
        match completion.timeout_error() {
            Some(err) if self.contracts.is_empty() => Err(err),
            _ => Ok(self.contracts),
        }
    }
}

/// Collects option parameter sets (one per exchange) until the end marker.
#[derive(Default)]
struct OptionParametersAccumulator {
    sets: Vec<OptionParameterSet>,
}

impl Accumulator for OptionParametersAccumulator {
    type Output = Vec<OptionParameterSet>;

    fn accept(&mut self, event: &GatewayEvent) -> Step {
        match event {
            GatewayEvent::OptionParameters { params, .. } => {
                self.sets.push(params.clone());
                Step::Continue
            }
            GatewayEvent::OptionParametersEnd { .. } => Step::Done,
            _ => Step::Continue,
        }
    }

    fn finish(self, completion: Completion) -> Result<Vec<OptionParameterSet>> {
        match completion.timeout_error() {
            Some(err) if self.sets.is_empty() => Err(err),
            _ => Ok(self.sets),
        }
    }
}

/// SMART if present, otherwise the set listing the most strikes.
pub fn select_parameter_set(sets: &[OptionParameterSet]) -> Option<&OptionParameterSet> {
    sets.iter()
        .find(|set| set.exchange == PREFERRED_EXCHANGE)
        .or_else(|| sets.iter().max_by_key(|set| set.strikes.len()))
}

/// Nearest listed strike and expiry; ties go to the lower value.
pub fn nearest_listing(
    chain: &ChainParams,
    strike: Decimal,
    expiry: NaiveDate,
) -> Option<ResolvedContract> {
    let strike = nearest_by(&chain.strikes, |s| (*s - strike).abs())?;
    let expiry = nearest_by(&chain.expirations, |d| (*d - expiry).num_days().abs())?;
    Some(ResolvedContract { strike, expiry })
}

fn nearest_by<T: Copy, D: PartialOrd>(set: &BTreeSet<T>, distance: impl Fn(&T) -> D) -> Option<T> {
    let mut best: Option<(T, D)> = None;
    // Ascending iteration with strict comparison keeps the lower value on ties.
    for value in set {
        let d = distance(value);
        match &best {
            Some((_, best_d)) if d >= *best_d => {}
            _ => best = Some((*value, d)),
        }
    }
    best.map(|(value, _)| value)
}

fn contract_cache_key(contract: &Contract) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}",
        contract.symbol.to_uppercase(),
        contract.sec_type,
        contract.strike.map(|s| s.normalize().to_string()).unwrap_or_default(),
        contract.right.map(|r| r.to_string()).unwrap_or_default(),
        contract.expiry.map(|d| d.to_string()).unwrap_or_default(),
        contract.exchange
    )
}

/// Cached contract-id and chain-parameter lookups.
pub struct ContractCache {
    correlator: Arc<RequestCorrelator>,
    contract_ids: TtlCache<i64>,
    chains: TtlCache<ChainParams>,
    details_timeout: Duration,
    chain_timeout: Duration,
}

impl ContractCache {
    pub fn new(correlator: Arc<RequestCorrelator>, config: &IBConfig) -> Self {
        Self {
            correlator,
            contract_ids: TtlCache::new(config.cache_ttl),
            chains: TtlCache::new(config.cache_ttl),
            details_timeout: config.timeouts.contract_details,
            chain_timeout: config.timeouts.chain_params,
        }
    }

    async fn contract_details(&self, contract: &Contract) -> Result<Vec<Contract>> {
        self.correlator
            .send(
                "contract_details",
                |req_id| {
                    Dispatch::new(GatewayRequest::ContractDetails {
                        req_id,
                        contract: contract.clone(),
                    })
                },
                ContractDetailsAccumulator::default(),
                RequestOptions::timeout(self.details_timeout),
            )
            .await
    }

    /// Broker contract id, or None when unknown or on failure.
    pub async fn resolve_contract_id(&self, contract: &Contract) -> Option<i64> {
        let key = contract_cache_key(contract);
        if let Some(con_id) = self.contract_ids.get(&key) {
            return Some(con_id);
        }
        match self.contract_details(contract).await {
            Ok(details) => {
                let con_id = details.iter().find_map(|c| c.con_id);
                match con_id {
                    Some(id) => {
                        debug!(key, con_id = id, "Resolved contract id");
                        self.contract_ids.insert(key, id);
                    }
                    None => debug!(key, "No contract found"),
                }
                con_id
            }
            Err(e) => {
                warn!(key, error = %e, "Contract details request failed");
                None
            }
        }
    }

    pub async fn resolve_option_id(&self, contract: &OptionsContract) -> Option<i64> {
        self.resolve_contract_id(&Contract::option(contract)).await
    }

    /// Listed expiries and strikes for an underlying.
    pub async fn chain_params(&self, symbol: &str) -> Option<ChainParams> {
        let symbol = symbol.to_uppercase();
        if let Some(chain) = self.chains.get(&symbol) {
            return Some(chain);
        }

        let underlying = self.resolve_contract_id(&Contract::stock(&symbol)).await?;
        let sets = match self
            .correlator
            .send(
                "option_parameters",
                |req_id| {
                    Dispatch::new(GatewayRequest::OptionParameters {
                        req_id,
                        symbol: symbol.clone(),
                        underlying_con_id: underlying,
                    })
                },
                OptionParametersAccumulator::default(),
                RequestOptions::timeout(self.chain_timeout),
            )
            .await
        {
            Ok(sets) => sets,
            Err(e) => {
                warn!(symbol, error = %e, "Option parameters request failed");
                return None;
            }
        };

        let set = select_parameter_set(&sets)?;
        let chain = ChainParams {
            symbol: symbol.clone(),
            exchange: set.exchange.clone(),
            expirations: set.expirations.iter().copied().collect(),
            strikes: set.strikes.iter().map(|s| s.normalize()).collect(),
        };
        if chain.strikes.is_empty() || chain.expirations.is_empty() {
            debug!(symbol, exchange = chain.exchange, "Option chain has no listings");
            return None;
        }
        info!(
            symbol,
            exchange = chain.exchange,
            expirations = chain.expirations.len(),
            strikes = chain.strikes.len(),
            "Option chain loaded"
        );
        self.chains.insert(symbol, chain.clone());
        Some(chain)
    }

    /// Snap a requested strike/expiry to the nearest listed contract.
    pub async fn resolve_synthetic(
        &self,
        symbol: &str,
        strike: Decimal,
        expiry: NaiveDate,
    ) -> Option<ResolvedContract> {
        let chain = self.chain_params(symbol).await?;
        nearest_listing(&chain, strike, expiry)
    }
}

impl IBClient {
    /// Listed expirations and strikes for an underlying.
    pub async fn option_chain_params(&self, symbol: &str) -> Option<ChainParams> {
        self.contracts.chain_params(symbol).await
    }

    /// Nearest listed (strike, expiry) for a possibly unlisted contract.
    pub async fn resolve_option_contract(
        &self,
        symbol: &str,
        strike: Decimal,
        expiry: NaiveDate,
    ) -> Option<ResolvedContract> {
        self.contracts.resolve_synthetic(symbol, strike, expiry).await
    }

    /// Broker contract id for a stock, option, or combo contract.
    pub async fn resolve_contract_id(&self, contract: &Contract) -> Option<i64> {
        self.contracts.resolve_contract_id(contract).await
    }

    /// Option contract with strike/expiry snapped to the listed chain.
    /// Unchanged when the chain is unavailable.
    pub(crate) async fn snap_to_listing(&self, contract: &OptionsContract) -> OptionsContract {
        match self
            .contracts
            .resolve_synthetic(&contract.symbol, contract.strike, contract.expiry)
            .await
        {
            Some(listed) if listed.strike != contract.strike || listed.expiry != contract.expiry => {
                info!(
                    requested = %contract.display_name(),
                    strike = %listed.strike,
                    expiry = %listed.expiry,
                    "Snapped option to listed contract"
                );
                contract.with_listing(listed.strike, listed.expiry)
            }
            Some(_) => contract.clone(),
            None => {
                debug!(contract = %contract.display_name(), "No chain available, using requested listing");
                contract.clone()
            }
        }
    }
}
