//! Minimum price variation rules.
//!
//! Stocks trade in pennies. Options at or above $3.00 trade in dimes; below
//! $3.00 they trade in pennies for penny-pilot classes and nickels otherwise.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::types::SecType;

/// Option classes quoted in $0.01 increments below $3.00.
pub const PENNY_PILOT_SYMBOLS: &[&str] = &[
    "AAPL", "AMD", "AMZN", "BAC", "C", "DIA", "EEM", "EFA", "F", "GDX", "GE", "GLD", "GOOG",
    "GOOGL", "INTC", "IWM", "JPM", "META", "MSFT", "NFLX", "NVDA", "PFE", "QQQ", "SLV", "SPY",
    "T", "TLT", "TSLA", "UBER", "USO", "VZ", "WMT", "XLE", "XLF", "XOM",
];

const PENNY: Decimal = dec!(0.01);
const NICKEL: Decimal = dec!(0.05);
const DIME: Decimal = dec!(0.10);
const OPTION_DIME_THRESHOLD: Decimal = dec!(3.00);

pub fn is_penny_pilot(symbol: &str) -> bool {
    PENNY_PILOT_SYMBOLS
        .iter()
        .any(|s| s.eq_ignore_ascii_case(symbol))
}

/// Tick size for an instrument at the given price level.
pub fn tick_size(sec_type: SecType, symbol: &str, price: Decimal) -> Decimal {
    match sec_type {
        SecType::Stock => PENNY,
        SecType::Option | SecType::Bag => {
            if price.abs() >= OPTION_DIME_THRESHOLD {
                DIME
            } else if is_penny_pilot(symbol) {
                PENNY
            } else {
                NICKEL
            }
        }
    }
}

fn round_with(price: Decimal, tick: Decimal, strategy: RoundingStrategy) -> Decimal {
    if tick.is_zero() {
        return price;
    }
    ((price / tick).round_dp_with_strategy(0, strategy) * tick).normalize()
}

/// Nearest valid tick.
pub fn round_to_tick(price: Decimal, sec_type: SecType, symbol: &str) -> Decimal {
    let tick = tick_size(sec_type, symbol, price);
    let rounded = round_with(price, tick, RoundingStrategy::MidpointAwayFromZero);
    // Crossing the $3.00 boundary can change the tick; settle on the coarser grid.
    let settled = tick_size(sec_type, symbol, rounded);
    if settled > tick {
        round_with(rounded, settled, RoundingStrategy::MidpointAwayFromZero)
    } else {
        rounded
    }
}

/// Largest valid tick not above `price`.
pub fn floor_to_tick(price: Decimal, sec_type: SecType, symbol: &str) -> Decimal {
    let tick = tick_size(sec_type, symbol, price);
    round_with(price, tick, RoundingStrategy::ToNegativeInfinity)
}

/// Smallest valid tick not below `price`.
pub fn ceil_to_tick(price: Decimal, sec_type: SecType, symbol: &str) -> Decimal {
    let tick = tick_size(sec_type, symbol, price);
    let rounded = round_with(price, tick, RoundingStrategy::ToPositiveInfinity);
    let settled = tick_size(sec_type, symbol, rounded);
    if settled > tick {
        round_with(rounded, settled, RoundingStrategy::ToPositiveInfinity)
    } else {
        rounded
    }
}
