//! Market aggregate and trade executor.
//!
//! A `Market` owns everything for one combinatorial market: the event list,
//! the world ledger, the LS-LMSR liquidity state, the risk controller and the
//! LP vault. The executor stages every trade fully (re-quote, solvency checks,
//! position checks) before mutating anything, so a rejected trade leaves the
//! market byte-identical to how it found it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use ts_rs::TS;

use crate::config::Config;
use crate::contracts::Contract;
use crate::error::{EngineError, Result};
use crate::lmsr_core::{self, from_ledger_units, to_ledger_units, LsLmsr};
use crate::risk::{RiskController, SkewRow, VolState};
use crate::vault::Vault;
use crate::worlds::{Event, WorldLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// `amount` is a stake in dollars; the executor solves for shares.
    Buy,
    /// `amount` is a share count to sell back to the vAMM.
    Sell,
}

/// Priced trade preview. All money fields are dollars; the engine layer
/// converts to `Decimal` at the API boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub contract: String,
    pub side: Side,
    /// Probability mass of the matched worlds before the trade.
    pub fair_price: f64,
    /// Effective per-share price after spread and skew premium.
    pub exec_price: f64,
    pub shares: f64,
    /// Buy: total the trader pays (incl. fee). Sell: total the trader receives
    /// (net of fee).
    pub total: f64,
    pub fee: f64,
    pub spread: f64,
    pub skew_multiplier: f64,
    /// $1 per share if any matched world resolves true.
    pub payout_if_correct: f64,
    pub liquidity_parameter: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeReceipt {
    pub trade_id: u64,
    pub market_id: u64,
    pub account: String,
    pub nonce: u64,
    pub contract: String,
    pub side: Side,
    pub shares: f64,
    pub exec_price: f64,
    pub total: f64,
    pub fee: f64,
    pub liquidity_parameter: f64,
    pub executed_at: DateTime<Utc>,
}

/// One display-only rung of the synthetic vAMM book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderRung {
    pub price: f64,
    pub size: f64,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ladder {
    pub contract: String,
    pub mid: f64,
    /// Prices the vAMM would pay, best first.
    pub bids: Vec<LadderRung>,
    /// Prices the vAMM would charge, best first.
    pub asks: Vec<LadderRung>,
}

/// Fully staged trade: every check has passed, nothing has mutated yet.
struct StagedTrade {
    quote: Quote,
    basket: Vec<usize>,
    deltas: Vec<f64>,
    share_delta: f64,
    premium_units: i128,
    face_units: i128,
    fee_units: i128,
}

#[derive(Debug)]
pub struct Market {
    id: u64,
    events: Vec<Event>,
    ledger: WorldLedger,
    lmsr: LsLmsr,
    risk: RiskController,
    vault: Vault,
    cfg: Config,
    deadline: Option<DateTime<Utc>>,
    trade_seq: u64,
}

impl Market {
    pub fn new(
        id: u64,
        labels: Vec<String>,
        prior: Option<&[f64]>,
        cfg: Config,
    ) -> Result<Self> {
        let n_events = labels.len();
        let max = cfg.liquidity.max_events;
        let ledger = match prior {
            Some(p) => WorldLedger::with_prior(n_events, max, p, cfg.liquidity.b_min)?,
            None => WorldLedger::new_uniform(n_events, max)?,
        };
        let events = labels
            .into_iter()
            .enumerate()
            .map(|(id, label)| Event { id, label })
            .collect();
        let world_count = ledger.world_count();
        info!(market = id, n_events, world_count, "market created");
        Ok(Self {
            id,
            events,
            ledger,
            lmsr: LsLmsr::new(cfg.liquidity.alpha, cfg.liquidity.b_min),
            risk: RiskController::new(world_count, cfg.risk.clone()),
            vault: Vault::new(&cfg.vault),
            cfg,
            deadline: None,
            trade_seq: 0,
        })
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn n_events(&self) -> usize {
        self.ledger.n_events()
    }

    pub fn ledger(&self) -> &WorldLedger {
        &self.ledger
    }

    pub fn liquidity_parameter(&self) -> f64 {
        self.lmsr.b()
    }

    pub fn cumulative_volume(&self) -> f64 {
        self.lmsr.volume()
    }

    pub fn volatility_state(&self) -> VolState {
        self.risk.state()
    }

    pub fn current_spread(&self) -> f64 {
        self.risk.current_spread()
    }

    pub fn skew_report(&self) -> Vec<SkewRow> {
        self.risk.skew_report()
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn probabilities(&self) -> Result<Vec<f64>> {
        self.ledger.probabilities(self.lmsr.b())
    }

    pub fn contract_price(&self, contract: &Contract) -> Result<f64> {
        contract.price(&self.probabilities()?, self.n_events())
    }

    /// Price a trade against current state without mutating anything.
    pub fn quote(&self, contract: &Contract, side: Side, amount: f64) -> Result<Quote> {
        Ok(self.stage(contract, side, amount)?.quote)
    }

    /// Execute a verified trade. Commitment verification happens in the
    /// engine layer before this is called; here every remaining check runs
    /// against a full staging of the trade, and state mutates only after all
    /// of them pass.
    pub fn execute(
        &mut self,
        contract: &Contract,
        side: Side,
        amount: f64,
        account: &str,
        nonce: u64,
        now: DateTime<Utc>,
    ) -> Result<TradeReceipt> {
        if let Some(deadline) = self.deadline {
            if now >= deadline {
                return Err(EngineError::MarketClosed(self.id));
            }
        }

        let staged = self.stage(contract, side, amount)?;

        // last pure checks before mutation
        match side {
            Side::Buy => {
                self.vault
                    .check_buy(staged.premium_units, staged.face_units)?;
            }
            Side::Sell => {
                if staged.premium_units > self.vault.pool_value() {
                    return Err(EngineError::VaultLocked {
                        remaining: self.vault.pool_value(),
                        liability: staged.premium_units,
                    });
                }
            }
        }

        // commit point: nothing below may fail
        self.ledger.apply_trade(&staged.deltas)?;
        self.risk.apply_fill(&staged.basket, staged.share_delta);
        match side {
            Side::Buy => {
                self.vault
                    .commit_buy(staged.premium_units, staged.face_units)?;
            }
            Side::Sell => {
                self.vault
                    .commit_sell(staged.premium_units, staged.face_units)?;
            }
        }
        self.vault.accrue_fee(staged.fee_units);
        self.lmsr
            .record_volume(from_ledger_units(staged.premium_units));

        // feed the trade's price move into the volatility guard: the
        // pre-trade fair and the post-trade mid bracket the jump. The trade
        // is already committed, so a degenerate mid only costs an
        // observation, never the receipt.
        self.risk.observe_price(now, staged.quote.fair_price);
        match self.contract_price(contract) {
            Ok(mid) => self.risk.observe_price(now, mid),
            Err(e) => warn!(
                market = self.id,
                error = %e,
                "post-trade mid unavailable, skipping volatility observation"
            ),
        }

        self.trade_seq += 1;
        let receipt = TradeReceipt {
            trade_id: self.trade_seq,
            market_id: self.id,
            account: account.to_string(),
            nonce,
            contract: staged.quote.contract.clone(),
            side,
            shares: staged.quote.shares,
            exec_price: staged.quote.exec_price,
            total: staged.quote.total,
            fee: staged.quote.fee,
            liquidity_parameter: self.lmsr.b(),
            executed_at: now,
        };
        info!(
            market = self.id,
            trade = receipt.trade_id,
            account,
            contract = %receipt.contract,
            side = ?side,
            shares = receipt.shares,
            total = receipt.total,
            b = receipt.liquidity_parameter,
            "trade executed"
        );
        Ok(receipt)
    }

    /// Synthetic vAMM quote ladder: `depth` rungs of `step` shares each side
    /// of the contract's fair price. Display only, never settled against.
    pub fn ladder(
        &self,
        contract: &Contract,
        depth: usize,
        step: f64,
    ) -> Result<Ladder> {
        if !(step > 0.0 && step.is_finite()) || depth == 0 {
            return Err(EngineError::InvalidAmount(format!(
                "ladder needs positive step and depth, got step={step}, depth={depth}"
            )));
        }
        let basket = contract.resolve(self.n_events())?;
        if basket.len() == self.ledger.world_count() {
            return Err(EngineError::InvalidAmount(
                "contract covers every world, nothing to quote".into(),
            ));
        }
        let q = self.ledger.quantities();
        let b = self.lmsr.b();
        let spread = self.risk.current_spread();
        let mid = self.contract_price(contract)?;

        let mut asks = Vec::with_capacity(depth);
        let mut bids = Vec::with_capacity(depth);
        for k in 1..=depth {
            let size = step * k as f64;
            let buy_cost = lmsr_core::basket_cost(&q, &basket, size, b)?;
            let skew = self.risk.buy_multiplier(&basket, size);
            asks.push(LadderRung {
                price: buy_cost / size * (1.0 + spread / 2.0) * skew,
                size: step,
                source: "vamm".into(),
            });
            let sell_credit = -lmsr_core::basket_cost(&q, &basket, -size, b)?;
            bids.push(LadderRung {
                price: sell_credit / size * (1.0 - spread / 2.0),
                size: step,
                source: "vamm".into(),
            });
        }
        Ok(Ladder {
            contract: contract.describe(self.n_events()),
            mid,
            bids,
            asks,
        })
    }

    /// Advance the volatility cooldown clock without trading.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        self.risk.tick(now);
    }

    pub fn deposit_liquidity(&mut self, account: &str, amount: i128) -> Result<i128> {
        self.vault.deposit(account, amount)
    }

    pub fn withdraw_liquidity(&mut self, account: &str, shares: i128) -> Result<i128> {
        self.vault.withdraw(account, shares)
    }

    // --- staging ---

    fn stage(&self, contract: &Contract, side: Side, amount: f64) -> Result<StagedTrade> {
        let n = self.n_events();
        let basket = contract.resolve(n)?;
        if basket.len() == self.ledger.world_count() {
            return Err(EngineError::InvalidAmount(
                "contract covers every world, trade has no price exposure".into(),
            ));
        }
        let q = self.ledger.quantities();
        let b = self.lmsr.b();
        let spread = self.risk.current_spread();
        let fair_price = contract.price(&self.probabilities()?, n)?;

        match side {
            Side::Buy => self.stage_buy(contract, &basket, &q, b, spread, fair_price, amount),
            Side::Sell => self.stage_sell(contract, &basket, &q, b, spread, fair_price, amount),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn stage_buy(
        &self,
        contract: &Contract,
        basket: &[usize],
        q: &[f64],
        b: f64,
        spread: f64,
        fair_price: f64,
        stake: f64,
    ) -> Result<StagedTrade> {
        if !(stake > 0.0 && stake.is_finite()) {
            return Err(EngineError::InvalidAmount(format!(
                "buy stake must be positive, got {stake}"
            )));
        }
        let shares = lmsr_core::delta_q_for_stake(q, basket, stake, b)?;
        let skew_multiplier = self.risk.buy_multiplier(basket, shares);
        let cost = stake * (1.0 + spread / 2.0) * skew_multiplier;
        let fee = cost * self.cfg.vault.fee_rate;
        let total = cost + fee;

        let mut deltas = vec![0.0; q.len()];
        for &w in basket {
            deltas[w] = shares;
        }

        Ok(StagedTrade {
            quote: Quote {
                contract: contract.describe(self.n_events()),
                side: Side::Buy,
                fair_price,
                exec_price: cost / shares,
                shares,
                total,
                fee,
                spread,
                skew_multiplier,
                payout_if_correct: shares,
                liquidity_parameter: b,
            },
            basket: basket.to_vec(),
            deltas,
            share_delta: shares,
            premium_units: to_ledger_units(cost),
            face_units: to_ledger_units(shares),
            fee_units: to_ledger_units(fee),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn stage_sell(
        &self,
        contract: &Contract,
        basket: &[usize],
        q: &[f64],
        b: f64,
        spread: f64,
        fair_price: f64,
        shares: f64,
    ) -> Result<StagedTrade> {
        if !(shares > 0.0 && shares.is_finite()) {
            return Err(EngineError::InvalidAmount(format!(
                "sell share count must be positive, got {shares}"
            )));
        }
        // the vAMM only buys back inventory it actually sold
        let held = basket
            .iter()
            .map(|&w| self.risk.position(w))
            .fold(f64::INFINITY, f64::min);
        if shares > held {
            return Err(EngineError::InsufficientPosition {
                requested: shares,
                held: held.max(0.0),
            });
        }
        let raw_credit = -lmsr_core::basket_cost(q, basket, -shares, b)?;
        let proceeds = raw_credit * (1.0 - spread / 2.0);
        let fee = proceeds * self.cfg.vault.fee_rate;
        let net = proceeds - fee;

        let mut deltas = vec![0.0; q.len()];
        for &w in basket {
            deltas[w] = -shares;
        }

        Ok(StagedTrade {
            quote: Quote {
                contract: contract.describe(self.n_events()),
                side: Side::Sell,
                fair_price,
                exec_price: proceeds / shares,
                shares,
                total: net,
                fee,
                spread,
                skew_multiplier: 1.0,
                payout_if_correct: 0.0,
                liquidity_parameter: b,
            },
            basket: basket.to_vec(),
            deltas,
            share_delta: -shares,
            premium_units: to_ledger_units(proceeds),
            face_units: to_ledger_units(shares),
            fee_units: to_ledger_units(fee),
        })
    }
}
