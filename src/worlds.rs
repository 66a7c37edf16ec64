//! World ledger: the canonical store of 2^N mutually exclusive world states.
//!
//! A world is one fully-specified combination of outcomes for all N tracked
//! events, keyed by an N-bit vector (bit i = event i resolves true). World
//! order is stable: bit-vector value ascending. Probabilities are always
//! derived from quantities via the softmax in `lmsr_core`, never stored, so
//! they sum to 1 by construction.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::lmsr_core;

/// One tracked binary event. Immutable once the market is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: usize,
    pub label: String,
}

/// N-bit outcome vector; bit i corresponds to event i.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorldBits(pub u32);

impl WorldBits {
    pub fn event_is_true(self, event: usize) -> bool {
        self.0 & (1 << event) != 0
    }

    /// Render as the UI's bit string, event 0 leftmost (a 3-event world where
    /// only events 0 and 1 are true reads "110").
    pub fn display(self, n_events: usize) -> String {
        (0..n_events)
            .map(|i| if self.event_is_true(i) { '1' } else { '0' })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorldState {
    pub bits: WorldBits,
    /// Shares of this world sold by the vAMM (LMSR quantity, may carry a
    /// prior-seeding offset).
    pub quantity: f64,
}

/// Single source of truth for world quantities.
#[derive(Debug, Clone)]
pub struct WorldLedger {
    n_events: usize,
    worlds: Vec<WorldState>,
}

impl WorldLedger {
    /// Uniform prior: all quantities zero, every world priced 1/2^N.
    pub fn new_uniform(n_events: usize, max_events: usize) -> Result<Self> {
        if n_events == 0 || n_events > max_events {
            return Err(EngineError::InvalidEventCount {
                given: n_events,
                max: max_events,
            });
        }
        let count = 1usize << n_events;
        let worlds = (0..count)
            .map(|i| WorldState {
                bits: WorldBits(i as u32),
                quantity: 0.0,
            })
            .collect();
        Ok(Self { n_events, worlds })
    }

    /// Seeded prior: quantities offset to `b0 * ln(p_i)` so the initial
    /// softmax reproduces the supplied probability vector.
    pub fn with_prior(
        n_events: usize,
        max_events: usize,
        prior: &[f64],
        b0: f64,
    ) -> Result<Self> {
        let mut ledger = Self::new_uniform(n_events, max_events)?;
        let count = ledger.worlds.len();
        if prior.len() != count {
            return Err(EngineError::InvalidWorldCount {
                expected: count,
                given: prior.len(),
            });
        }
        if prior.iter().any(|&p| !(p > 0.0 && p < 1.0 && p.is_finite())) {
            return Err(EngineError::InvalidPrior(
                "every prior probability must lie strictly inside (0, 1)".into(),
            ));
        }
        let sum: f64 = prior.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::InvalidPrior(format!(
                "prior sums to {sum}, expected 1.0"
            )));
        }
        for (world, &p) in ledger.worlds.iter_mut().zip(prior) {
            world.quantity = b0 * (p / sum).ln();
        }
        Ok(ledger)
    }

    pub fn n_events(&self) -> usize {
        self.n_events
    }

    pub fn world_count(&self) -> usize {
        self.worlds.len()
    }

    /// Ordered view, bits ascending.
    pub fn worlds(&self) -> &[WorldState] {
        &self.worlds
    }

    /// Quantity vector in world order, for the pricing core.
    pub fn quantities(&self) -> Vec<f64> {
        self.worlds.iter().map(|w| w.quantity).collect()
    }

    /// Derived probabilities (== prices) for the current quantities.
    pub fn probabilities(&self, b: f64) -> Result<Vec<f64>> {
        lmsr_core::prices(&self.quantities(), b)
    }

    /// Apply one trade's share deltas across the full vector. All-or-nothing:
    /// the delta vector is validated before any quantity moves, since every
    /// trade reprices every world.
    pub fn apply_trade(&mut self, deltas: &[f64]) -> Result<()> {
        if deltas.len() != self.worlds.len() {
            return Err(EngineError::InvalidWorldCount {
                expected: self.worlds.len(),
                given: deltas.len(),
            });
        }
        if deltas.iter().any(|d| !d.is_finite()) {
            return Err(EngineError::NumericalInstability(
                "non-finite quantity delta".into(),
            ));
        }
        for (world, &d) in self.worlds.iter_mut().zip(deltas) {
            world.quantity += d;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_event_counts() {
        assert!(matches!(
            WorldLedger::new_uniform(0, 16),
            Err(EngineError::InvalidEventCount { given: 0, .. })
        ));
        assert!(matches!(
            WorldLedger::new_uniform(17, 16),
            Err(EngineError::InvalidEventCount { given: 17, .. })
        ));
    }

    #[test]
    fn uniform_ledger_prices_evenly() {
        let ledger = WorldLedger::new_uniform(3, 16).unwrap();
        assert_eq!(ledger.world_count(), 8);
        let p = ledger.probabilities(1000.0).unwrap();
        for x in &p {
            assert!((x - 0.125).abs() < 1e-12);
        }
    }

    #[test]
    fn prior_seeding_reproduces_probabilities() {
        let prior = [0.20, 0.05, 0.15, 0.10, 0.10, 0.05, 0.25, 0.10];
        let ledger = WorldLedger::with_prior(3, 16, &prior, 1000.0).unwrap();
        let p = ledger.probabilities(1000.0).unwrap();
        for (got, want) in p.iter().zip(prior) {
            assert!((got - want).abs() < 1e-9, "got={got}, want={want}");
        }
    }

    #[test]
    fn prior_length_mismatch_is_rejected() {
        let prior = [0.5, 0.5];
        let err = WorldLedger::with_prior(3, 16, &prior, 1000.0).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidWorldCount {
                expected: 8,
                given: 2
            }
        );
    }

    #[test]
    fn apply_trade_validates_length_before_mutating() {
        let mut ledger = WorldLedger::new_uniform(2, 16).unwrap();
        let before = ledger.quantities();
        assert!(ledger.apply_trade(&[1.0, 2.0]).is_err());
        assert_eq!(ledger.quantities(), before);
        ledger.apply_trade(&[1.0, 0.0, 0.0, -2.0]).unwrap();
        assert_eq!(ledger.quantities(), vec![1.0, 0.0, 0.0, -2.0]);
    }

    #[test]
    fn bit_display_matches_ui_convention() {
        // value 3 = events 0 and 1 true -> "110" with event 0 leftmost
        assert_eq!(WorldBits(3).display(3), "110");
        assert_eq!(WorldBits(4).display(3), "001");
        assert!(WorldBits(6).event_is_true(1));
        assert!(!WorldBits(6).event_is_true(0));
    }
}
