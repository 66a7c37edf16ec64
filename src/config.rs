//! Configuration management for the vAMM engine
//! Supports environment variables and default values for all policy constants

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Configuration for the combinatorial market engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Liquidity-sensitivity parameters
    pub liquidity: LiquidityConfig,
    /// Inventory and volatility risk parameters
    pub risk: RiskConfig,
    /// LP vault parameters
    pub vault: VaultConfig,
}

/// LS-LMSR liquidity scaling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityConfig {
    /// Scaling constant in `b = alpha * cumulative_volume` (default: 5e-4)
    pub alpha: f64,

    /// Floor for the liquidity parameter so a fresh market never divides by
    /// zero in the exponent (default: 1000.0)
    pub b_min: f64,

    /// Hard cap on event count; worlds scale as 2^N (default: 16)
    pub max_events: usize,
}

/// Inventory skew and volatility-expansion spread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Neutral per-world inventory target in shares (default: 1000.0)
    pub inventory_target: f64,

    /// Skew fraction beyond which the premium kicks in (default: 0.10)
    pub skew_threshold: f64,

    /// Linear premium per unit of excess skew; 0 disables (default: 0.25)
    pub skew_premium_rate: f64,

    /// Quote spread while calm (default: 0.02)
    pub base_spread: f64,

    /// Quote spread while toxic flow is suspected (default: 0.05)
    pub toxic_spread: f64,

    /// Absolute mid-price move that counts as a breach (default: 0.30)
    pub vol_move_threshold: f64,

    /// Rolling observation window in seconds (default: 600)
    pub vol_window_secs: i64,

    /// Seconds without a breach before returning to calm (default: 300)
    pub cooldown_secs: i64,
}

/// LP vault solvency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Trade fee accrued to the pool, as a fraction of volume (default: 0.002)
    pub fee_rate: f64,

    /// Default utilization cap per market in USDC (default: 2_000_000)
    pub cap_usdc: f64,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            alpha: 5e-4,
            b_min: 1000.0,
            max_events: 16,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            inventory_target: 1000.0,
            skew_threshold: 0.10,
            skew_premium_rate: 0.25,
            base_spread: 0.02,
            toxic_spread: 0.05,
            vol_move_threshold: 0.30,
            vol_window_secs: 600,
            cooldown_secs: 300,
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            fee_rate: 0.002,
            cap_usdc: 2_000_000.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            liquidity: LiquidityConfig::default(),
            risk: RiskConfig::default(),
            vault: VaultConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Self {
        let mut config = Config::default();

        read_f64("VAMM_ALPHA", &mut config.liquidity.alpha);
        read_f64("VAMM_B_MIN", &mut config.liquidity.b_min);
        read_usize("VAMM_MAX_EVENTS", &mut config.liquidity.max_events);

        read_f64("VAMM_INVENTORY_TARGET", &mut config.risk.inventory_target);
        read_f64("VAMM_SKEW_THRESHOLD", &mut config.risk.skew_threshold);
        read_f64("VAMM_SKEW_PREMIUM_RATE", &mut config.risk.skew_premium_rate);
        read_f64("VAMM_BASE_SPREAD", &mut config.risk.base_spread);
        read_f64("VAMM_TOXIC_SPREAD", &mut config.risk.toxic_spread);
        read_f64("VAMM_VOL_MOVE_THRESHOLD", &mut config.risk.vol_move_threshold);
        read_i64("VAMM_VOL_WINDOW_SECS", &mut config.risk.vol_window_secs);
        read_i64("VAMM_COOLDOWN_SECS", &mut config.risk.cooldown_secs);

        read_f64("VAMM_FEE_RATE", &mut config.vault.fee_rate);
        read_f64("VAMM_VAULT_CAP_USDC", &mut config.vault.cap_usdc);

        config.validate();
        config
    }

    /// Validate configuration values, restoring defaults on nonsense
    fn validate(&mut self) {
        let defaults = Config::default();

        if !(self.liquidity.alpha > 0.0 && self.liquidity.alpha.is_finite()) {
            warn!(alpha = self.liquidity.alpha, "invalid alpha, using default");
            self.liquidity.alpha = defaults.liquidity.alpha;
        }
        if !(self.liquidity.b_min > 0.0 && self.liquidity.b_min.is_finite()) {
            warn!(b_min = self.liquidity.b_min, "invalid b_min, using default");
            self.liquidity.b_min = defaults.liquidity.b_min;
        }
        if self.liquidity.max_events == 0 || self.liquidity.max_events > 24 {
            warn!(
                max_events = self.liquidity.max_events,
                "invalid max_events, using default"
            );
            self.liquidity.max_events = defaults.liquidity.max_events;
        }

        if !(self.risk.inventory_target > 0.0) {
            warn!(
                target = self.risk.inventory_target,
                "invalid inventory_target, using default"
            );
            self.risk.inventory_target = defaults.risk.inventory_target;
        }
        if !(0.0..1.0).contains(&self.risk.skew_threshold) {
            warn!(
                threshold = self.risk.skew_threshold,
                "invalid skew_threshold, using default"
            );
            self.risk.skew_threshold = defaults.risk.skew_threshold;
        }
        if self.risk.skew_premium_rate < 0.0 {
            warn!(
                rate = self.risk.skew_premium_rate,
                "invalid skew_premium_rate, using default"
            );
            self.risk.skew_premium_rate = defaults.risk.skew_premium_rate;
        }
        if !(0.0..1.0).contains(&self.risk.base_spread)
            || !(0.0..1.0).contains(&self.risk.toxic_spread)
            || self.risk.toxic_spread < self.risk.base_spread
        {
            warn!(
                base = self.risk.base_spread,
                toxic = self.risk.toxic_spread,
                "invalid spread pair, using defaults"
            );
            self.risk.base_spread = defaults.risk.base_spread;
            self.risk.toxic_spread = defaults.risk.toxic_spread;
        }
        if !(0.0..=1.0).contains(&self.risk.vol_move_threshold) {
            warn!(
                threshold = self.risk.vol_move_threshold,
                "invalid vol_move_threshold, using default"
            );
            self.risk.vol_move_threshold = defaults.risk.vol_move_threshold;
        }
        if self.risk.vol_window_secs <= 0 {
            warn!(
                window = self.risk.vol_window_secs,
                "invalid vol_window_secs, using default"
            );
            self.risk.vol_window_secs = defaults.risk.vol_window_secs;
        }
        if self.risk.cooldown_secs <= 0 {
            warn!(
                cooldown = self.risk.cooldown_secs,
                "invalid cooldown_secs, using default"
            );
            self.risk.cooldown_secs = defaults.risk.cooldown_secs;
        }

        if !(0.0..0.5).contains(&self.vault.fee_rate) {
            warn!(fee = self.vault.fee_rate, "invalid fee_rate, using default");
            self.vault.fee_rate = defaults.vault.fee_rate;
        }
        if !(self.vault.cap_usdc > 0.0 && self.vault.cap_usdc.is_finite()) {
            warn!(cap = self.vault.cap_usdc, "invalid vault cap, using default");
            self.vault.cap_usdc = defaults.vault.cap_usdc;
        }
    }
}

fn read_f64(name: &str, slot: &mut f64) {
    if let Ok(raw) = env::var(name) {
        *slot = raw.parse().unwrap_or(*slot);
    }
}

fn read_i64(name: &str, slot: &mut i64) {
    if let Ok(raw) = env::var(name) {
        *slot = raw.parse().unwrap_or(*slot);
    }
}

fn read_usize(name: &str, slot: &mut usize) {
    if let Ok(raw) = env::var(name) {
        *slot = raw.parse().unwrap_or(*slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut config = Config::default();
        let before = format!("{config:?}");
        config.validate();
        assert_eq!(before, format!("{config:?}"));
    }

    #[test]
    fn validation_restores_defaults() {
        let mut config = Config::default();
        config.liquidity.alpha = -1.0;
        config.risk.toxic_spread = 0.01; // below base
        config.vault.fee_rate = 0.9;
        config.validate();
        let defaults = Config::default();
        assert_eq!(config.liquidity.alpha, defaults.liquidity.alpha);
        assert_eq!(config.risk.toxic_spread, defaults.risk.toxic_spread);
        assert_eq!(config.vault.fee_rate, defaults.vault.fee_rate);
    }
}
