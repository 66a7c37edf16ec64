//! Stress and invariant simulation for the combinatorial vAMM.
//!
//! This module hammers independent markets with randomized trade flow and
//! checks, continuously:
//! 1. **Correctness**: probabilities sum to 1 after every trade
//! 2. **Liquidity monotonicity**: `b` never shrinks
//! 3. **Solvency**: vault utilization stays within the cap, pool never negative
//! 4. **Atomicity**: rejected trades leave quantities untouched
//!
//! Markets are independent, so the simulation runs them in parallel with
//! rayon. All state is in memory; no external services are involved.

use std::env;
use std::sync::OnceLock;
use std::time::Instant;

use anyhow::{anyhow, Result};
use chrono::{Duration, TimeZone, Utc};
use rand::prelude::*;
use rayon::prelude::*;
use tracing::info;

use crate::config::Config;
use crate::contracts::Contract;
use crate::error::EngineError;
use crate::lmsr_core::LEDGER_SCALE;
use crate::market::{Market, Side};
use crate::worlds::WorldBits;

// Simulation parameters (defaults; override via STRESS_* env vars)
const NUM_MARKETS: usize = 8;
const NUM_EVENTS: usize = 4;
const TRADES_PER_MARKET: usize = 5_000;
const MAX_STAKE: f64 = 500.0;
const SELL_PROBABILITY: f64 = 0.25;
const LP_SEED_USDC: i128 = 500_000;

#[derive(Debug, Clone)]
pub struct StressConfig {
    pub num_markets: usize,
    pub num_events: usize,
    pub trades_per_market: usize,
    pub max_stake: f64,
    pub sell_probability: f64,
}

impl StressConfig {
    fn from_env() -> Self {
        Self {
            num_markets: env_usize("STRESS_NUM_MARKETS", NUM_MARKETS),
            num_events: env_usize("STRESS_NUM_EVENTS", NUM_EVENTS),
            trades_per_market: env_usize("STRESS_TRADES_PER_MARKET", TRADES_PER_MARKET),
            max_stake: env_f64_min("STRESS_MAX_STAKE", MAX_STAKE, 2.0),
            sell_probability: env_f64("STRESS_SELL_PROBABILITY", SELL_PROBABILITY)
                .clamp(0.0, 1.0),
        }
    }
}

pub fn stress_config() -> &'static StressConfig {
    static CONFIG: OnceLock<StressConfig> = OnceLock::new();
    CONFIG.get_or_init(StressConfig::from_env)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
}

fn env_f64_min(name: &str, default: f64, min: f64) -> f64 {
    env_f64(name, default).max(min)
}

#[derive(Debug, Default, Clone)]
pub struct StressReport {
    pub markets: usize,
    pub executed: u64,
    pub rejected: u64,
    pub toxic_episodes: u64,
    pub total_volume: f64,
    pub final_b_sum: f64,
    pub elapsed_secs: f64,
}

/// Run the full simulation across all markets in parallel.
pub fn run_stress_test(config: &Config) -> Result<StressReport> {
    let sim = stress_config();
    info!(?sim, "starting vAMM stress simulation");
    let started = Instant::now();

    let per_market: Vec<MarketOutcome> = (0..sim.num_markets)
        .into_par_iter()
        .map(|m| simulate_market(m as u64, config, sim))
        .collect::<Result<Vec<_>>>()?;

    let mut report = StressReport {
        markets: sim.num_markets,
        elapsed_secs: started.elapsed().as_secs_f64(),
        ..Default::default()
    };
    for outcome in per_market {
        report.executed += outcome.executed;
        report.rejected += outcome.rejected;
        report.toxic_episodes += outcome.toxic_episodes;
        report.total_volume += outcome.volume;
        report.final_b_sum += outcome.final_b;
    }
    info!(
        executed = report.executed,
        rejected = report.rejected,
        volume = report.total_volume,
        elapsed = report.elapsed_secs,
        "stress simulation finished"
    );
    Ok(report)
}

#[derive(Debug)]
struct MarketOutcome {
    executed: u64,
    rejected: u64,
    toxic_episodes: u64,
    volume: f64,
    final_b: f64,
}

fn simulate_market(seed: u64, config: &Config, sim: &StressConfig) -> Result<MarketOutcome> {
    let mut rng = StdRng::seed_from_u64(0x5eed ^ seed);
    let labels = (0..sim.num_events).map(|i| format!("E{i}")).collect();
    let mut market = Market::new(seed, labels, None, config.clone())?;
    market.deposit_liquidity("lp", LP_SEED_USDC * LEDGER_SCALE)?;

    let mut now = Utc
        .timestamp_opt(1_700_000_000, 0)
        .single()
        .ok_or_else(|| anyhow!("bad simulation epoch"))?;
    let mut outcome = MarketOutcome {
        executed: 0,
        rejected: 0,
        toxic_episodes: 0,
        volume: 0.0,
        final_b: 0.0,
    };
    let mut was_toxic = false;
    let mut prev_b = market.liquidity_parameter();

    for trade in 0..sim.trades_per_market {
        now += Duration::seconds(rng.gen_range(1..120));
        let contract = random_contract(&mut rng, sim.num_events);
        let (side, amount) = random_order(&mut rng, &market, &contract, sim)?;

        let q_before = market.ledger().quantities();
        match market.execute(&contract, side, amount, "trader", trade as u64, now) {
            Ok(receipt) => {
                outcome.executed += 1;
                outcome.volume += receipt.total;
            }
            Err(
                EngineError::VaultCapExceeded { .. }
                | EngineError::VaultLocked { .. }
                | EngineError::InsufficientPosition { .. }
                | EngineError::NumericalInstability(_)
                | EngineError::InvalidAmount(_),
            ) => {
                // expected business rejections must not move the market
                outcome.rejected += 1;
                if market.ledger().quantities() != q_before {
                    return Err(anyhow!("rejected trade mutated market {seed}"));
                }
            }
            Err(e) => return Err(anyhow!("unexpected engine error: {e}")),
        }

        let b = market.liquidity_parameter();
        if b < prev_b {
            return Err(anyhow!("liquidity parameter shrank: {prev_b} -> {b}"));
        }
        prev_b = b;

        let probs = market.probabilities()?;
        let sum: f64 = probs.iter().sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(anyhow!("probability sum drifted to {sum} on market {seed}"));
        }
        if market.vault().pool_value() < 0 {
            return Err(anyhow!("vault pool went negative on market {seed}"));
        }
        if market.vault().utilization() > 1.0 {
            return Err(anyhow!("vault exceeded its cap on market {seed}"));
        }

        let toxic = market.volatility_state() == crate::risk::VolState::Toxic;
        if toxic && !was_toxic {
            outcome.toxic_episodes += 1;
        }
        was_toxic = toxic;
    }

    outcome.final_b = market.liquidity_parameter();
    Ok(outcome)
}

fn random_contract(rng: &mut StdRng, n_events: usize) -> Contract {
    match rng.gen_range(0..3) {
        0 => Contract::Marginal {
            event: rng.gen_range(0..n_events),
            outcome: rng.gen_bool(0.5),
        },
        1 => {
            let mut legs = Vec::new();
            for event in 0..n_events {
                if rng.gen_bool(0.5) {
                    legs.push((event, rng.gen_bool(0.5)));
                }
            }
            if legs.is_empty() {
                Contract::Marginal {
                    event: 0,
                    outcome: true,
                }
            } else {
                Contract::Slice { legs }
            }
        }
        _ => Contract::Corner {
            bits: WorldBits(rng.gen_range(0..(1u32 << n_events))),
        },
    }
}

/// Pick a side and amount: mostly buys, occasional sell-backs sized within
/// the vAMM's actual inventory on the contract's worlds.
fn random_order(
    rng: &mut StdRng,
    market: &Market,
    contract: &Contract,
    sim: &StressConfig,
) -> Result<(Side, f64)> {
    if rng.gen_bool(sim.sell_probability) {
        let basket = contract.resolve(market.n_events())?;
        let held = basket
            .iter()
            .map(|&w| {
                market
                    .skew_report()
                    .get(w)
                    .map(|row| row.position)
                    .unwrap_or(0.0)
            })
            .fold(f64::INFINITY, f64::min);
        if held > 1.0 {
            return Ok((Side::Sell, held * rng.gen_range(0.1..0.9)));
        }
    }
    Ok((Side::Buy, rng.gen_range(1.0..sim.max_stake)))
}
