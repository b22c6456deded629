//! CLI commands for the options execution client.

pub mod client;
pub mod market;
pub mod reports;
pub mod submit;

pub use client::connect;
pub use market::{run_chain, run_quote, QuoteArgs};
pub use reports::{run_account, run_executions, run_orders, run_portfolio};
pub use submit::{run_submit, SubmitArgs};

use anyhow::{Context, Result};
use serde::Serialize;

/// Pretty-print a value as JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}
