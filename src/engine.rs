//! Multi-market engine service.
//!
//! Async facade over the per-market aggregates. Money crosses this boundary
//! as `rust_decimal::Decimal` (6 dp, micro-USDC resolution); everything below
//! it runs on f64 quantities and i128 ledger units. DTOs here are the
//! UI-facing types and carry `ts-rs` bindings.
//!
//! Locking: the market map is behind one `RwLock`, each market behind its
//! own. Reads (tables, quotes, status) take read locks and see a consistent
//! snapshot; `execute_trade` and vault ops take the market's write lock, so
//! there is a single logical writer per market and markets never block each
//! other. Commitment verification is awaited before the write lock is taken.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::warn;
use ts_rs::TS;

use crate::commitment::{CommitmentVerifier, TradeCommitment};
use crate::config::Config;
use crate::contracts::Contract;
use crate::error::{EngineError, Result};
use crate::lmsr_core::to_ledger_units;
use crate::market::{Market, Side};

pub type MarketId = u64;

/// One row of the UI world table. Probabilities are rounded to 6 dp with
/// largest-remainder correction so the column sums to exactly 1.000000.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, TS)]
#[ts(export)]
pub struct WorldRow {
    /// Outcome bit string, event 0 leftmost.
    pub bits: String,
    #[ts(as = "String")]
    pub probability: Decimal,
    /// Contract price of this world's corner, equal to its probability.
    #[ts(as = "String")]
    pub price: Decimal,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, TS)]
#[ts(export)]
pub struct QuoteResponse {
    pub contract: String,
    pub side: Side,
    #[ts(as = "String")]
    pub fair_price: Decimal,
    #[ts(as = "String")]
    pub exec_price: Decimal,
    #[ts(as = "String")]
    pub shares: Decimal,
    #[ts(as = "String")]
    pub total: Decimal,
    #[ts(as = "String")]
    pub fee: Decimal,
    pub spread: f64,
    pub skew_multiplier: f64,
    #[ts(as = "String")]
    pub payout_if_correct: Decimal,
    pub liquidity_parameter: f64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, TS)]
#[ts(export)]
pub struct TradeReceiptResponse {
    pub trade_id: u64,
    pub market_id: MarketId,
    pub account: String,
    pub nonce: u64,
    pub contract: String,
    pub side: Side,
    #[ts(as = "String")]
    pub shares: Decimal,
    #[ts(as = "String")]
    pub exec_price: Decimal,
    #[ts(as = "String")]
    pub total: Decimal,
    #[ts(as = "String")]
    pub fee: Decimal,
    pub liquidity_parameter: f64,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, TS)]
#[ts(export)]
pub struct SkewEntry {
    pub world: usize,
    pub position: f64,
    pub skew: f64,
}

/// The VAMMStatus panel payload.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, TS)]
#[ts(export)]
pub struct RiskStatus {
    pub market_id: MarketId,
    pub liquidity_parameter: f64,
    #[ts(as = "String")]
    pub cumulative_volume: Decimal,
    /// "calm" or "toxic".
    pub volatility_state: String,
    pub current_spread: f64,
    pub inventory_skew: Vec<SkewEntry>,
    #[ts(as = "String")]
    pub vault_pool_value: Decimal,
    pub vault_utilization: f64,
    #[ts(as = "String")]
    pub fees_accrued: Decimal,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, TS)]
#[ts(export)]
pub struct LadderLevel {
    #[ts(as = "String")]
    pub price: Decimal,
    #[ts(as = "String")]
    pub size: Decimal,
    pub source: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, TS)]
#[ts(export)]
pub struct OrderLadder {
    pub contract: String,
    #[ts(as = "String")]
    pub mid: Decimal,
    pub bids: Vec<LadderLevel>,
    pub asks: Vec<LadderLevel>,
}

pub struct Engine {
    cfg: Config,
    verifier: Arc<dyn CommitmentVerifier>,
    markets: RwLock<HashMap<MarketId, Arc<RwLock<Market>>>>,
    next_id: AtomicU64,
}

impl Engine {
    pub fn new(cfg: Config, verifier: Arc<dyn CommitmentVerifier>) -> Self {
        Self {
            cfg,
            verifier,
            markets: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub async fn create_market(
        &self,
        labels: Vec<String>,
        prior: Option<Vec<f64>>,
    ) -> Result<MarketId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let market = Market::new(id, labels, prior.as_deref(), self.cfg.clone())?;
        self.markets
            .write()
            .await
            .insert(id, Arc::new(RwLock::new(market)));
        Ok(id)
    }

    pub async fn create_market_with_deadline(
        &self,
        labels: Vec<String>,
        prior: Option<Vec<f64>>,
        deadline: DateTime<Utc>,
    ) -> Result<MarketId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let market =
            Market::new(id, labels, prior.as_deref(), self.cfg.clone())?.with_deadline(deadline);
        self.markets
            .write()
            .await
            .insert(id, Arc::new(RwLock::new(market)));
        Ok(id)
    }

    pub async fn get_world_table(&self, id: MarketId) -> Result<Vec<WorldRow>> {
        let market = self.market(id).await?;
        let market = market.read().await;
        let probs = market.probabilities()?;
        let rounded = round_to_unit(&probs)?;
        Ok(market
            .ledger()
            .worlds()
            .iter()
            .zip(rounded)
            .map(|(w, p)| WorldRow {
                bits: w.bits.display(market.n_events()),
                probability: p,
                price: p,
            })
            .collect())
    }

    pub async fn quote(
        &self,
        id: MarketId,
        contract: &Contract,
        side: Side,
        amount: Decimal,
    ) -> Result<QuoteResponse> {
        let market = self.market(id).await?;
        let market = market.read().await;
        let quote = market.quote(contract, side, decimal_to_f64(amount)?)?;
        Ok(QuoteResponse {
            contract: quote.contract,
            side: quote.side,
            fair_price: money(quote.fair_price)?,
            exec_price: money(quote.exec_price)?,
            shares: money(quote.shares)?,
            total: money(quote.total)?,
            fee: money(quote.fee)?,
            spread: quote.spread,
            skew_multiplier: quote.skew_multiplier,
            payout_if_correct: money(quote.payout_if_correct)?,
            liquidity_parameter: quote.liquidity_parameter,
        })
    }

    /// Verify the commitment, then execute under the market's write lock.
    /// Any rejection surfaces synchronously and leaves the market untouched.
    pub async fn execute_trade(
        &self,
        id: MarketId,
        contract: &Contract,
        side: Side,
        amount: Decimal,
        commitment: &TradeCommitment,
    ) -> Result<TradeReceiptResponse> {
        let market = self.market(id).await?;
        if let Err(e) = self.verifier.verify(commitment).await {
            warn!(market = id, account = %commitment.account, error = %e, "commitment rejected");
            return Err(e);
        }
        let mut market = market.write().await;
        let receipt = market.execute(
            contract,
            side,
            decimal_to_f64(amount)?,
            &commitment.account,
            commitment.nonce,
            Utc::now(),
        )?;
        Ok(TradeReceiptResponse {
            trade_id: receipt.trade_id,
            market_id: receipt.market_id,
            account: receipt.account,
            nonce: receipt.nonce,
            contract: receipt.contract,
            side: receipt.side,
            shares: money(receipt.shares)?,
            exec_price: money(receipt.exec_price)?,
            total: money(receipt.total)?,
            fee: money(receipt.fee)?,
            liquidity_parameter: receipt.liquidity_parameter,
            executed_at: receipt.executed_at,
        })
    }

    /// Deposit collateral into a market's LP vault; returns pool shares.
    pub async fn deposit_liquidity(
        &self,
        id: MarketId,
        account: &str,
        amount: Decimal,
    ) -> Result<i128> {
        let market = self.market(id).await?;
        let mut market = market.write().await;
        market.deposit_liquidity(account, decimal_units(amount)?)
    }

    /// Redeem pool shares for collateral.
    pub async fn withdraw_liquidity(
        &self,
        id: MarketId,
        account: &str,
        shares: i128,
    ) -> Result<Decimal> {
        let market = self.market(id).await?;
        let mut market = market.write().await;
        let units = market.withdraw_liquidity(account, shares)?;
        Ok(Decimal::from_i128_with_scale(units, 6))
    }

    pub async fn get_risk_status(&self, id: MarketId) -> Result<RiskStatus> {
        let market = self.market(id).await?;
        let market = market.read().await;
        Ok(RiskStatus {
            market_id: id,
            liquidity_parameter: market.liquidity_parameter(),
            cumulative_volume: money(market.cumulative_volume())?,
            volatility_state: match market.volatility_state() {
                crate::risk::VolState::Calm => "calm".to_string(),
                crate::risk::VolState::Toxic => "toxic".to_string(),
            },
            current_spread: market.current_spread(),
            inventory_skew: market
                .skew_report()
                .into_iter()
                .map(|row| SkewEntry {
                    world: row.world,
                    position: row.position,
                    skew: row.skew,
                })
                .collect(),
            vault_pool_value: Decimal::from_i128_with_scale(market.vault().pool_value(), 6),
            vault_utilization: market.vault().utilization(),
            fees_accrued: Decimal::from_i128_with_scale(market.vault().fees_accrued(), 6),
        })
    }

    pub async fn get_order_ladder(
        &self,
        id: MarketId,
        contract: &Contract,
        depth: usize,
        step: f64,
    ) -> Result<OrderLadder> {
        let market = self.market(id).await?;
        let market = market.read().await;
        let ladder = market.ladder(contract, depth, step)?;
        let level = |r: &crate::market::LadderRung| -> Result<LadderLevel> {
            Ok(LadderLevel {
                price: money(r.price)?,
                size: money(r.size)?,
                source: r.source.clone(),
            })
        };
        Ok(OrderLadder {
            contract: ladder.contract,
            mid: money(ladder.mid)?,
            bids: ladder.bids.iter().map(level).collect::<Result<_, _>>()?,
            asks: ladder.asks.iter().map(level).collect::<Result<_, _>>()?,
        })
    }

    /// Advance every market's volatility cooldown clock.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let markets: Vec<_> = self.markets.read().await.values().cloned().collect();
        for market in markets {
            market.write().await.tick(now);
        }
    }

    async fn market(&self, id: MarketId) -> Result<Arc<RwLock<Market>>> {
        self.markets
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::MarketNotFound(id))
    }
}

/// Round a probability vector to 6 dp so the rounded values sum to exactly
/// 1.000000: floor everything to micro-units, then hand the missing units to
/// the entries with the largest truncated remainders.
pub fn round_to_unit(probs: &[f64]) -> Result<Vec<Decimal>> {
    const UNIT: i64 = 1_000_000;
    if probs.is_empty() {
        return Ok(Vec::new());
    }
    if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(EngineError::NumericalInstability(
            "probability vector contains invalid entries".into(),
        ));
    }
    let mut floors: Vec<i64> = Vec::with_capacity(probs.len());
    let mut remainders: Vec<(usize, f64)> = Vec::with_capacity(probs.len());
    for (i, &p) in probs.iter().enumerate() {
        let scaled = p * UNIT as f64;
        let floor = scaled.floor() as i64;
        floors.push(floor);
        remainders.push((i, scaled - floor as f64));
    }
    let mut deficit = UNIT - floors.iter().sum::<i64>();
    remainders.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    // hand out surplus units largest-remainder first; claw back from the
    // smallest remainders in the degenerate over-allocated case
    let mut cursor = 0;
    while deficit > 0 {
        floors[remainders[cursor % remainders.len()].0] += 1;
        deficit -= 1;
        cursor += 1;
    }
    let mut back = remainders.len();
    while deficit < 0 && back > 0 {
        back -= 1;
        let idx = remainders[back].0;
        if floors[idx] > 0 {
            floors[idx] -= 1;
            deficit += 1;
        }
    }
    Ok(floors.into_iter().map(|u| Decimal::new(u, 6)).collect())
}

fn money(x: f64) -> Result<Decimal> {
    Decimal::from_f64(x)
        .map(|d| d.round_dp(6))
        .ok_or_else(|| EngineError::NumericalInstability(format!("{x} not representable")))
}

fn decimal_to_f64(d: Decimal) -> Result<f64> {
    d.to_f64()
        .ok_or_else(|| EngineError::InvalidAmount(format!("{d} not representable")))
}

/// Decimal dollars to i128 micro-USDC ledger units.
fn decimal_units(d: Decimal) -> Result<i128> {
    Ok(to_ledger_units(decimal_to_f64(d)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::StaticVerifier;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    fn engine() -> Engine {
        Engine::new(Config::default(), Arc::new(StaticVerifier::accept_all()))
    }

    fn commitment(account: &str) -> TradeCommitment {
        TradeCommitment {
            account: account.into(),
            nonce: 7,
            payload: vec![1, 2, 3],
        }
    }

    fn yes(event: usize) -> Contract {
        Contract::Marginal {
            event,
            outcome: true,
        }
    }

    #[tokio::test]
    async fn world_table_sums_to_exactly_one() {
        let eng = engine();
        // an awkward prior whose naive 6dp roundings do not sum to 1
        let prior = vec![1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0, 1.0 / 6.0];
        let id = eng
            .create_market(vec!["A".into(), "B".into()], Some(prior))
            .await
            .unwrap();
        let table = eng.get_world_table(id).await.unwrap();
        assert_eq!(table.len(), 4);
        let sum: Decimal = table.iter().map(|r| r.probability).sum();
        assert_eq!(sum, dec("1.000000"));
        assert_eq!(table[0].bits, "00");
        assert_eq!(table[1].bits, "10");
    }

    #[tokio::test]
    async fn rejected_commitment_blocks_the_trade() {
        let eng = Engine::new(
            Config::default(),
            Arc::new(StaticVerifier::rejecting(["mallory"])),
        );
        let id = eng
            .create_market(vec!["A".into(), "B".into()], None)
            .await
            .unwrap();
        eng.deposit_liquidity(id, "lp", dec("10000")).await.unwrap();

        let err = eng
            .execute_trade(id, &yes(0), Side::Buy, dec("100"), &commitment("mallory"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidCommitment(_)));
        // state untouched: uniform table survives
        let table = eng.get_world_table(id).await.unwrap();
        assert!(table.iter().all(|r| r.probability == dec("0.250000")));

        let receipt = eng
            .execute_trade(id, &yes(0), Side::Buy, dec("100"), &commitment("alice"))
            .await
            .unwrap();
        assert_eq!(receipt.nonce, 7);
        assert!(receipt.shares > Decimal::ZERO);
    }

    #[tokio::test]
    async fn liquidity_round_trip_is_exact() {
        let eng = engine();
        let id = eng.create_market(vec!["A".into()], None).await.unwrap();
        let shares = eng
            .deposit_liquidity(id, "alice", dec("2500.50"))
            .await
            .unwrap();
        let back = eng.withdraw_liquidity(id, "alice", shares).await.unwrap();
        assert_eq!(back, dec("2500.500000"));
    }

    #[tokio::test]
    async fn large_pool_values_survive_the_decimal_boundary() {
        let eng = engine();
        let id = eng.create_market(vec!["A".into()], None).await.unwrap();
        // $10T is past i64::MAX micro-USDC; the conversion must not wrap
        let shares = eng
            .deposit_liquidity(id, "whale", dec("10000000000000"))
            .await
            .unwrap();
        let status = eng.get_risk_status(id).await.unwrap();
        assert_eq!(status.vault_pool_value, dec("10000000000000"));
        let back = eng.withdraw_liquidity(id, "whale", shares).await.unwrap();
        assert_eq!(back, dec("10000000000000"));
    }

    #[tokio::test]
    async fn unknown_market_is_reported() {
        let eng = engine();
        let err = eng.get_world_table(99).await.unwrap_err();
        assert_eq!(err, EngineError::MarketNotFound(99));
    }

    #[tokio::test]
    async fn risk_status_reflects_trading() {
        let eng = engine();
        let id = eng
            .create_market(vec!["A".into(), "B".into(), "C".into()], None)
            .await
            .unwrap();
        eng.deposit_liquidity(id, "lp", dec("100000")).await.unwrap();
        eng.execute_trade(id, &yes(2), Side::Buy, dec("250"), &commitment("bob"))
            .await
            .unwrap();

        let status = eng.get_risk_status(id).await.unwrap();
        assert_eq!(status.inventory_skew.len(), 8);
        assert!(status.cumulative_volume > Decimal::ZERO);
        assert!(status.fees_accrued > Decimal::ZERO);
        assert!(status.vault_pool_value > dec("100000"));
    }

    #[test]
    fn largest_remainder_handles_thirds() {
        let rounded = round_to_unit(&[1.0 / 3.0; 3]).unwrap();
        let sum: Decimal = rounded.iter().sum();
        assert_eq!(sum, Decimal::new(1_000_000, 6));
        // two entries floor to 0.333333, one gets the spare unit
        let bumped = rounded
            .iter()
            .filter(|&&d| d == Decimal::new(333_334, 6))
            .count();
        assert_eq!(bumped, 1);
    }
}
