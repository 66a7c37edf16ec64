//! Combinatorial vAMM Engine Library
//!
//! Prices N correlated binary events as one joint market over all 2^N world
//! states: an LS-LMSR market maker with liquidity that deepens with volume,
//! an inventory/volatility risk layer, and an LP vault enforcing solvency.

pub mod commitment;
pub mod config;
pub mod contracts;
pub mod engine;
pub mod error;
pub mod lmsr_core;
pub mod market;
pub mod risk;
pub mod stress;
pub mod vault;
pub mod worlds;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use contracts::Contract;
pub use engine::{Engine, MarketId};
pub use error::EngineError;
pub use market::{Market, Side};
