//! Fast, numerically stable LS-LMSR core with f64 math + fixed-point ledger (i128).
//!
//! All functions operate on the full 2^N world quantity vector; a contract
//! trade is a basket of world indices bought or sold simultaneously at a
//! single combined cost.

use std::fmt;

use crate::error::{EngineError, Result};

pub const LEDGER_SCALE: i128 = 1_000_000; // 1 micro-USDC units

/// Arguments beyond this ratio overflow `exp` long before f64 saturates.
const MAX_EXP_ARG: f64 = 700.0;

#[inline]
pub fn to_ledger_units(x: f64) -> i128 {
    // round half-away-from-zero
    if x.is_nan() || !x.is_finite() {
        panic!("non-finite value passed to to_ledger_units: {x}");
    }
    let scaled = x * (LEDGER_SCALE as f64);
    if scaled >= 0.0 {
        (scaled + 0.5).floor() as i128
    } else {
        (scaled - 0.5).ceil() as i128
    }
}

#[inline]
pub fn from_ledger_units(x: i128) -> f64 {
    x as f64 / LEDGER_SCALE as f64
}

/// Liquidity parameter state: `b = max(b_min, alpha * cumulative_volume)`,
/// never decreasing. Trades are priced at the pre-trade `b`; volume is
/// recorded after the cost is computed.
#[derive(Clone, Copy)]
pub struct LsLmsr {
    alpha: f64,
    b_min: f64,
    b: f64,
    volume: f64,
}

impl fmt::Debug for LsLmsr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LsLmsr")
            .field("alpha", &self.alpha)
            .field("b_min", &self.b_min)
            .field("b", &self.b)
            .field("volume", &self.volume)
            .finish()
    }
}

impl LsLmsr {
    pub fn new(alpha: f64, b_min: f64) -> Self {
        assert!(
            alpha > 0.0 && alpha.is_finite() && b_min > 0.0 && b_min.is_finite(),
            "alpha and b_min must be positive and finite"
        );
        Self {
            alpha,
            b_min,
            b: b_min,
            volume: 0.0,
        }
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Deepen liquidity with traded volume (in dollars). `b` only ever grows:
    /// liquidity must not become retroactively thinner.
    pub fn record_volume(&mut self, dollars: f64) {
        if dollars > 0.0 && dollars.is_finite() {
            self.volume += dollars;
            let scaled = self.alpha * self.volume;
            if scaled > self.b {
                self.b = scaled;
            }
        }
    }
}

// -----------------------
// Numerically stable math
// -----------------------

#[inline]
fn max_of(q: &[f64]) -> f64 {
    q.iter().fold(f64::NEG_INFINITY, |acc, &x| acc.max(x))
}

/// `C(q) = b * ln(sum_i exp(q_i / b))`, computed with max-subtraction so the
/// exponentials never overflow for realistic q/b magnitudes.
pub fn cost(q: &[f64], b: f64) -> Result<f64> {
    if !(b > 0.0 && b.is_finite()) {
        return Err(EngineError::NumericalInstability(format!(
            "liquidity parameter b={b} invalid"
        )));
    }
    if q.is_empty() {
        return Ok(0.0);
    }
    let m = max_of(q);
    let sum_exp: f64 = q.iter().map(|&x| ((x - m) / b).exp()).sum();
    let c = b * (sum_exp.ln() + m / b);
    if !c.is_finite() {
        return Err(EngineError::NumericalInstability(format!(
            "cost not finite for b={b}"
        )));
    }
    Ok(c)
}

/// Instantaneous world prices `p_i = exp(q_i/b) / sum_j exp(q_j/b)`.
/// A softmax; prices equal probabilities under LMSR no-arbitrage, and sum to
/// 1 by construction.
pub fn prices(q: &[f64], b: f64) -> Result<Vec<f64>> {
    if !(b > 0.0 && b.is_finite()) {
        return Err(EngineError::NumericalInstability(format!(
            "liquidity parameter b={b} invalid"
        )));
    }
    if q.is_empty() {
        return Ok(Vec::new());
    }
    let m = max_of(q);
    let exps: Vec<f64> = q.iter().map(|&x| ((x - m) / b).exp()).collect();
    let sum_exp: f64 = exps.iter().sum();
    if !(sum_exp > 0.0 && sum_exp.is_finite()) {
        return Err(EngineError::NumericalInstability(
            "softmax denominator degenerate".into(),
        ));
    }
    Ok(exps.into_iter().map(|e| e / sum_exp).collect())
}

/// Cost of buying `shares` of every world in `basket` simultaneously:
/// `C(q + shares * 1_basket) - C(q)`. Negative `shares` prices a sell.
/// Order-independent: a multi-world contract is charged one combined cost,
/// not the sum of leg-by-leg marginal costs.
pub fn basket_cost(q: &[f64], basket: &[usize], shares: f64, b: f64) -> Result<f64> {
    if !shares.is_finite() {
        return Err(EngineError::NumericalInstability(
            "non-finite share delta".into(),
        ));
    }
    let mut bumped = q.to_vec();
    for &i in basket {
        let slot = bumped
            .get_mut(i)
            .ok_or(EngineError::InvalidWorldCount {
                expected: q.len(),
                given: i + 1,
            })?;
        *slot += shares;
    }
    Ok(cost(&bumped, b)? - cost(q, b)?)
}

/// Closed-form share delta for buying a basket with stake `S` (in dollars):
/// with `A = sum_{i in basket} exp(q_i/b)` and `B = sum_{i not in basket}`,
/// solving `C(q + d*1_basket) - C(q) = S` gives
/// `d = b * ln((exp(S/b) * (A + B) - B) / A)`.
///
/// The max-subtraction factor cancels in the ratio, so A and B are computed
/// shifted.
pub fn delta_q_for_stake(
    q: &[f64],
    basket: &[usize],
    stake: f64,
    b: f64,
) -> Result<f64> {
    if !(stake > 0.0 && stake.is_finite()) {
        return Err(EngineError::InvalidAmount(format!(
            "stake must be positive, got {stake}"
        )));
    }
    if !(b > 0.0 && b.is_finite()) {
        return Err(EngineError::NumericalInstability(format!(
            "liquidity parameter b={b} invalid"
        )));
    }
    if stake / b > MAX_EXP_ARG {
        return Err(EngineError::NumericalInstability(format!(
            "stake too large relative to liquidity: stake/b = {}",
            stake / b
        )));
    }
    if basket.is_empty() || basket.len() >= q.len() {
        return Err(EngineError::InvalidWorldCount {
            expected: q.len(),
            given: basket.len(),
        });
    }

    let m = max_of(q);
    let mut in_basket = vec![false; q.len()];
    for &i in basket {
        if i >= q.len() {
            return Err(EngineError::InvalidWorldCount {
                expected: q.len(),
                given: i + 1,
            });
        }
        in_basket[i] = true;
    }

    let mut a = 0.0; // basket mass
    let mut rest = 0.0; // everything else
    for (i, &x) in q.iter().enumerate() {
        let e = ((x - m) / b).exp();
        if in_basket[i] {
            a += e;
        } else {
            rest += e;
        }
    }

    let numerator = (stake / b).exp() * (a + rest) - rest;
    if !(numerator > 0.0 && a > 0.0) {
        return Err(EngineError::NumericalInstability(format!(
            "degenerate stake solve: numerator={numerator}, basket mass={a}"
        )));
    }

    let delta = b * (numerator / a).ln();
    if !delta.is_finite() {
        return Err(EngineError::NumericalInstability(
            "share delta not finite".into(),
        ));
    }
    Ok(delta)
}

// -----------------------
// Tests
// -----------------------
