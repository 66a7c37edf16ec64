//! LP vault: the capital pool backing one market's vAMM.
//!
//! All amounts are i128 micro-USDC ledger units (`lmsr_core::LEDGER_SCALE`).
//! Accounting is cash-basis: `pool_value` is money actually held (deposits +
//! premiums + fees - refunds - withdrawals), and `committed` is the signed net
//! worst-case payout obligation (outstanding shares at $1 each, minus the
//! premiums already collected against them). Withdrawals that would leave the
//! pool unable to cover the outstanding liability are refused, never queued.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::VaultConfig;
use crate::error::{EngineError, Result};
use crate::lmsr_core::to_ledger_units;

/// One LP's stake, in internal pool shares.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LpAccount {
    pub shares: i128,
}

#[derive(Debug, Clone)]
pub struct Vault {
    /// Cash on hand, micro-USDC.
    pool_value: i128,
    /// Total pool shares outstanding across all LPs.
    total_shares: i128,
    accounts: HashMap<String, LpAccount>,
    /// Signed net liability: contract shares sold * $1 minus premiums taken.
    /// Can go negative when premiums exceed face exposure; floored at zero
    /// wherever solvency is checked.
    committed: i128,
    /// Utilization cap on committed liability, micro-USDC.
    cap: i128,
    /// Lifetime fees accrued into the pool, for telemetry.
    fees_accrued: i128,
}

impl Vault {
    pub fn new(cfg: &VaultConfig) -> Self {
        Self {
            pool_value: 0,
            total_shares: 0,
            accounts: HashMap::new(),
            committed: 0,
            cap: to_ledger_units(cfg.cap_usdc),
            fees_accrued: 0,
        }
    }

    pub fn pool_value(&self) -> i128 {
        self.pool_value
    }

    pub fn total_shares(&self) -> i128 {
        self.total_shares
    }

    pub fn fees_accrued(&self) -> i128 {
        self.fees_accrued
    }

    pub fn cap(&self) -> i128 {
        self.cap
    }

    /// Outstanding liability, floored at zero for solvency math.
    pub fn committed_liability(&self) -> i128 {
        self.committed.max(0)
    }

    /// Fraction of the cap currently committed, for the status feed.
    pub fn utilization(&self) -> f64 {
        if self.cap == 0 {
            return 0.0;
        }
        self.committed_liability() as f64 / self.cap as f64
    }

    pub fn shares_of(&self, account: &str) -> i128 {
        self.accounts.get(account).map(|a| a.shares).unwrap_or(0)
    }

    /// Pool value attributable to one LP right now, micro-USDC.
    pub fn value_of(&self, account: &str) -> i128 {
        if self.total_shares == 0 {
            return 0;
        }
        self.shares_of(account) * self.pool_value / self.total_shares
    }

    /// Deposit collateral, minting pool shares pro rata. The first deposit
    /// bootstraps at one share per micro-USDC.
    pub fn deposit(&mut self, account: &str, amount: i128) -> Result<i128> {
        if amount <= 0 {
            return Err(EngineError::InvalidAmount(format!(
                "deposit must be positive, got {amount}"
            )));
        }
        let minted = if self.total_shares == 0 || self.pool_value == 0 {
            amount
        } else {
            amount * self.total_shares / self.pool_value
        };
        if minted <= 0 {
            return Err(EngineError::InvalidAmount(format!(
                "deposit {amount} too small to mint a share at current pool value"
            )));
        }
        self.pool_value += amount;
        self.total_shares += minted;
        self.accounts
            .entry(account.to_string())
            .or_insert(LpAccount { shares: 0 })
            .shares += minted;
        info!(account, amount, minted, pool = self.pool_value, "lp deposit");
        Ok(minted)
    }

    /// Redeem pool shares for cash. Refused outright if the remaining pool
    /// could no longer cover the outstanding liability.
    pub fn withdraw(&mut self, account: &str, shares: i128) -> Result<i128> {
        if shares <= 0 {
            return Err(EngineError::InvalidAmount(format!(
                "withdrawal must redeem a positive share count, got {shares}"
            )));
        }
        let held = self.shares_of(account);
        if shares > held {
            return Err(EngineError::InsufficientShares {
                requested: shares,
                held,
            });
        }
        let amount = shares * self.pool_value / self.total_shares;
        let remaining = self.pool_value - amount;
        let liability = self.committed_liability();
        if remaining < liability {
            return Err(EngineError::VaultLocked {
                remaining,
                liability,
            });
        }
        self.pool_value = remaining;
        self.total_shares -= shares;
        if let Some(a) = self.accounts.get_mut(account) {
            a.shares -= shares;
        }
        info!(account, shares, amount, pool = self.pool_value, "lp withdrawal");
        Ok(amount)
    }

    /// Solvency gate for a buy: the post-trade liability must stay under the
    /// utilization cap AND under the collateral the pool will actually hold
    /// once the premium lands. Pure check, mutates nothing; the executor
    /// calls this before staging.
    pub fn check_buy(&self, premium: i128, face_exposure: i128) -> Result<()> {
        let committed = (self.committed + face_exposure - premium).max(0);
        if committed > self.cap {
            return Err(EngineError::VaultCapExceeded {
                committed,
                cap: self.cap,
            });
        }
        let funded = self.pool_value + premium;
        if committed > funded {
            return Err(EngineError::VaultLocked {
                remaining: funded,
                liability: committed,
            });
        }
        Ok(())
    }

    /// Book an executed buy: premium flows in, face exposure is committed.
    /// `face_exposure` is shares sold times $1 in ledger units.
    pub fn commit_buy(&mut self, premium: i128, face_exposure: i128) -> Result<()> {
        self.check_buy(premium, face_exposure)?;
        self.pool_value += premium;
        self.committed += face_exposure - premium;
        debug!(
            premium,
            face_exposure,
            committed = self.committed_liability(),
            "vault buy committed"
        );
        Ok(())
    }

    /// Book an executed sell-back: refund flows out, face exposure released.
    pub fn commit_sell(&mut self, refund: i128, face_released: i128) -> Result<()> {
        if refund > self.pool_value {
            return Err(EngineError::VaultLocked {
                remaining: self.pool_value,
                liability: refund,
            });
        }
        self.pool_value -= refund;
        self.committed -= face_released - refund;
        debug!(
            refund,
            face_released,
            committed = self.committed_liability(),
            "vault sell committed"
        );
        Ok(())
    }

    /// Accrue a trade fee into the pool. Fees raise share value for all LPs.
    pub fn accrue_fee(&mut self, fee: i128) {
        if fee > 0 {
            self.pool_value += fee;
            self.fees_accrued += fee;
        }
    }
}
