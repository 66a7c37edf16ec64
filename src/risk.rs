//! Inventory & risk controller.
//!
//! Two independent mechanisms sit between the raw LS-LMSR quote and the
//! price a trader actually sees:
//!
//! - per-world inventory skew versus a neutral target, charging a linear
//!   premium on trades that push an already-overweight world further over;
//! - a volatility-expansion spread, a two-state machine (`Calm -> Toxic` on a
//!   breach, `Toxic -> Calm` after a quiet cooldown) that widens all quotes
//!   symmetrically around fair value while active.
//!
//! Both take explicit `now` timestamps so tests control the clock.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::RiskConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolState {
    Calm,
    Toxic,
}

/// Per-world skew telemetry row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkewRow {
    pub world: usize,
    pub position: f64,
    pub target: f64,
    /// `(position - target) / target`
    pub skew: f64,
}

#[derive(Debug, Clone)]
pub struct RiskController {
    cfg: RiskConfig,
    /// Net vAMM exposure per world: shares sold minus shares bought back.
    positions: Vec<f64>,
    window: VecDeque<(DateTime<Utc>, f64)>,
    state: VolState,
    last_breach: Option<DateTime<Utc>>,
}

impl RiskController {
    pub fn new(world_count: usize, cfg: RiskConfig) -> Self {
        Self {
            cfg,
            positions: vec![0.0; world_count],
            window: VecDeque::new(),
            state: VolState::Calm,
            last_breach: None,
        }
    }

    // --- inventory skew ---

    /// Record an executed fill: positive `shares` were sold to a trader in
    /// every basket world, negative were bought back.
    pub fn apply_fill(&mut self, basket: &[usize], shares: f64) {
        for &w in basket {
            if let Some(p) = self.positions.get_mut(w) {
                *p += shares;
            }
        }
    }

    pub fn position(&self, world: usize) -> f64 {
        self.positions.get(world).copied().unwrap_or(0.0)
    }

    pub fn skew(&self, world: usize) -> f64 {
        (self.position(world) - self.cfg.inventory_target) / self.cfg.inventory_target
    }

    pub fn skew_report(&self) -> Vec<SkewRow> {
        self.positions
            .iter()
            .enumerate()
            .map(|(world, &position)| SkewRow {
                world,
                position,
                target: self.cfg.inventory_target,
                skew: (position - self.cfg.inventory_target) / self.cfg.inventory_target,
            })
            .collect()
    }

    /// Cost multiplier for a buy that would add `shares` to every basket
    /// world. Monotonic: the further past the skew threshold the trade pushes
    /// the most overweight basket world, the worse the price. Trades that
    /// reduce exposure (sells) never pay the premium.
    pub fn buy_multiplier(&self, basket: &[usize], shares: f64) -> f64 {
        if self.cfg.skew_premium_rate == 0.0 || shares <= 0.0 {
            return 1.0;
        }
        let worst_excess = basket
            .iter()
            .map(|&w| {
                let post = self.position(w) + shares;
                (post - self.cfg.inventory_target) / self.cfg.inventory_target
                    - self.cfg.skew_threshold
            })
            .fold(f64::NEG_INFINITY, f64::max);
        if worst_excess > 0.0 {
            1.0 + self.cfg.skew_premium_rate * worst_excess
        } else {
            1.0
        }
    }

    // --- volatility-expansion spread ---

    /// Record a contract mid-price observation and run the state machine.
    pub fn observe_price(&mut self, now: DateTime<Utc>, mid: f64) {
        self.window.push_back((now, mid));
        self.prune(now);
        let (min, max) = self
            .window
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, p)| {
                (lo.min(p), hi.max(p))
            });
        if max - min > self.cfg.vol_move_threshold {
            if self.state == VolState::Calm {
                warn!(
                    from = min,
                    to = max,
                    window_secs = self.cfg.vol_window_secs,
                    "toxic flow suspected, expanding spread"
                );
            }
            self.state = VolState::Toxic;
            self.last_breach = Some(now);
        }
        self.tick(now);
    }

    /// Advance the cooldown without a new observation.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if self.state == VolState::Toxic {
            if let Some(breach) = self.last_breach {
                if now - breach >= Duration::seconds(self.cfg.cooldown_secs) {
                    self.state = VolState::Calm;
                }
            }
        }
    }

    pub fn state(&self) -> VolState {
        self.state
    }

    /// Spread applied to all quotes: base while calm, expanded while toxic.
    /// Buys pay `fair * (1 + spread/2)`, sells receive `fair * (1 - spread/2)`.
    pub fn current_spread(&self) -> f64 {
        match self.state {
            VolState::Calm => self.cfg.base_spread,
            VolState::Toxic => self.cfg.toxic_spread,
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - Duration::seconds(self.cfg.vol_window_secs);
        while let Some(&(t, _)) = self.window.front() {
            if t < horizon {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}
