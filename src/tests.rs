//! Cross-module scenario tests: full trades through `Market` exercising the
//! LS-LMSR core, risk controller and vault together.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use crate::config::Config;
use crate::contracts::Contract;
use crate::error::EngineError;
use crate::lmsr_core::LEDGER_SCALE;
use crate::market::{Market, Side};
use crate::risk::VolState;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn yes(event: usize) -> Contract {
    Contract::Marginal {
        event,
        outcome: true,
    }
}

fn no(event: usize) -> Contract {
    Contract::Marginal {
        event,
        outcome: false,
    }
}

/// The demo market from the UI mock: three correlated events, seeded prior.
fn escalation_cluster() -> Market {
    let prior = [0.20, 0.10, 0.15, 0.25, 0.05, 0.05, 0.10, 0.10];
    let mut market = Market::new(
        1,
        vec!["strike".into(), "response".into(), "oil".into()],
        Some(&prior),
        Config::default(),
    )
    .unwrap();
    market
        .deposit_liquidity("lp", 1_250_000 * LEDGER_SCALE)
        .unwrap();
    market
}

#[test]
fn cluster_prior_reproduces_mock_marginals() {
    let market = escalation_cluster();
    let strike = market.contract_price(&yes(0)).unwrap();
    let response = market.contract_price(&yes(1)).unwrap();
    let oil = market.contract_price(&yes(2)).unwrap();
    assert!((strike - 0.50).abs() < 1e-9);
    assert!((response - 0.60).abs() < 1e-9);
    assert!((oil - 0.30).abs() < 1e-9);
}

#[test]
fn marginal_complements_price_to_one() {
    let mut market = escalation_cluster();
    market
        .execute(&yes(0), Side::Buy, 3_000.0, "a", 1, t(0))
        .unwrap();
    market
        .execute(&no(2), Side::Buy, 1_200.0, "a", 2, t(30))
        .unwrap();
    for event in 0..3 {
        let p = market.contract_price(&yes(event)).unwrap();
        let q = market.contract_price(&no(event)).unwrap();
        assert!((p + q - 1.0).abs() < 1e-9, "event {event}: {p} + {q}");
    }
}

// A marginal buy adds the same quantity to every matched world, so matched
// worlds all scale by one factor and unmatched worlds renormalize by another.
#[test]
fn marginal_buy_moves_worlds_proportionally() {
    let market = escalation_cluster();
    let before = market.probabilities().unwrap();

    let mut market = market;
    market
        .execute(&yes(0), Side::Buy, 5_000.0, "a", 1, t(0))
        .unwrap();
    let after = market.probabilities().unwrap();

    let matched: Vec<usize> = (0..8).filter(|w| w % 2 == 1).collect();
    let up = after[1] / before[1];
    let down = after[0] / before[0];
    assert!(up > 1.0 && down < 1.0);
    for w in 0..8 {
        let ratio = after[w] / before[w];
        let expected = if matched.contains(&w) { up } else { down };
        assert!(
            (ratio - expected).abs() < 1e-9,
            "world {w} scaled by {ratio}, expected {expected}"
        );
    }
}

#[test]
fn toxic_transition_widens_quotes_by_half_spread() {
    // single event priced at 0.35, like the status panel's incident report
    let mut cfg = Config::default();
    cfg.vault.fee_rate = 0.0;
    cfg.risk.skew_premium_rate = 0.0;
    let mut market = Market::new(1, vec!["E".into()], Some(&[0.65, 0.35]), cfg).unwrap();
    market
        .deposit_liquidity("lp", 1_000_000 * LEDGER_SCALE)
        .unwrap();

    // calm: a $100 buy is charged exactly stake * (1 + base_spread / 2)
    let calm = market.quote(&yes(0), Side::Buy, 100.0).unwrap();
    assert!((calm.total - 100.0 * 1.01).abs() < 1e-9);

    // ~$710 pushes the marginal from 0.35 to ~0.68 in one shot
    market
        .execute(&yes(0), Side::Buy, 710.0, "a", 1, t(0))
        .unwrap();
    let mid = market.contract_price(&yes(0)).unwrap();
    assert!((0.66..0.70).contains(&mid), "mid moved to {mid}");
    assert_eq!(market.volatility_state(), VolState::Toxic);

    // toxic: same stake now charged stake * (1 + toxic_spread / 2)
    let toxic = market.quote(&yes(0), Side::Buy, 100.0).unwrap();
    assert!((toxic.total - 100.0 * 1.025).abs() < 1e-9);
    let sell = market.quote(&yes(0), Side::Sell, 10.0).unwrap();
    assert!((sell.exec_price - sell.total / 10.0).abs() < 1e-12);

    // cooldown returns the market to calm pricing
    market.tick(t(301));
    assert_eq!(market.volatility_state(), VolState::Calm);
    let calm_again = market.quote(&yes(0), Side::Buy, 100.0).unwrap();
    assert!((calm_again.total - 100.0 * 1.01).abs() < 1e-9);
}

#[test]
fn cap_rejection_leaves_every_subsystem_untouched() {
    let mut cfg = Config::default();
    cfg.vault.cap_usdc = 100.0;
    let mut market = Market::new(1, vec!["A".into(), "B".into()], None, cfg).unwrap();
    market.deposit_liquidity("lp", 10_000 * LEDGER_SCALE).unwrap();
    market
        .execute(&yes(0), Side::Buy, 20.0, "a", 1, t(0))
        .unwrap();

    let quantities = market.ledger().quantities();
    let positions = market.skew_report();
    let pool = market.vault().pool_value();
    let committed = market.vault().committed_liability();
    let b = market.liquidity_parameter();
    let volume = market.cumulative_volume();

    let err = market
        .execute(&yes(0), Side::Buy, 500.0, "a", 2, t(10))
        .unwrap_err();
    assert!(matches!(err, EngineError::VaultCapExceeded { .. }));

    assert_eq!(market.ledger().quantities(), quantities);
    assert_eq!(market.vault().pool_value(), pool);
    assert_eq!(market.vault().committed_liability(), committed);
    assert_eq!(market.liquidity_parameter(), b);
    assert_eq!(market.cumulative_volume(), volume);
    for (before, after) in positions.iter().zip(market.skew_report()) {
        assert_eq!(before.position, after.position);
    }
}

// The raw LS-LMSR cost function is path independent, so a frictionless
// buy-then-sell returns the stake exactly; with spread and fees on, the same
// round trip always loses.
#[test]
fn round_trips_never_profit() {
    // frictions on: strict loss
    let mut market = escalation_cluster();
    let bought = market
        .execute(&yes(0), Side::Buy, 1_000.0, "a", 1, t(0))
        .unwrap();
    let sold = market
        .execute(&yes(0), Side::Sell, bought.shares, "a", 2, t(5))
        .unwrap();
    assert!(sold.total < bought.total);

    // frictions off: the stake comes back to float precision
    let mut cfg = Config::default();
    cfg.vault.fee_rate = 0.0;
    cfg.risk.base_spread = 0.0;
    cfg.risk.toxic_spread = 0.0;
    cfg.risk.skew_premium_rate = 0.0;
    let mut market = Market::new(1, vec!["A".into(), "B".into()], None, cfg).unwrap();
    market
        .deposit_liquidity("lp", 1_000_000 * LEDGER_SCALE)
        .unwrap();
    let bought = market
        .execute(&yes(0), Side::Buy, 1_000.0, "a", 1, t(0))
        .unwrap();
    let sold = market
        .execute(&yes(0), Side::Sell, bought.shares, "a", 2, t(5))
        .unwrap();
    assert!((bought.total - sold.total).abs() < 1e-6);
}

#[test]
fn corner_buys_respect_slice_aggregation() {
    let mut market = escalation_cluster();
    market
        .execute(
            &Contract::Corner {
                bits: crate::worlds::WorldBits(3),
            },
            Side::Buy,
            2_000.0,
            "a",
            1,
            t(0),
        )
        .unwrap();
    let probs = market.probabilities().unwrap();
    // slice (E0=yes, E1=yes) spans exactly worlds 3 and 7
    let slice = Contract::Slice {
        legs: vec![(0, true), (1, true)],
    };
    let p = market.contract_price(&slice).unwrap();
    assert!((p - (probs[3] + probs[7])).abs() < 1e-12);
}

proptest! {
    // Arbitrary interleaved buys and sells across contract shapes: the
    // probability sum, liquidity monotonicity and vault solvency must hold at
    // every step.
    #[test]
    fn invariants_hold_under_arbitrary_flow(
        ops in prop::collection::vec((0u8..3, 0usize..3, 1.0f64..400.0, prop::bool::ANY), 1..60),
    ) {
        let mut market = escalation_cluster();
        let mut prev_b = market.liquidity_parameter();
        let mut clock = 0i64;

        for (kind, event, stake, outcome) in ops {
            clock += 30;
            let contract = match kind {
                0 => Contract::Marginal { event, outcome },
                1 => Contract::Slice { legs: vec![(event, outcome), ((event + 1) % 3, !outcome)] },
                _ => Contract::Corner { bits: crate::worlds::WorldBits(event as u32) },
            };
            // business rejections are fine; panics or state corruption are not
            let _ = market.execute(&contract, Side::Buy, stake, "t", 1, t(clock));

            let probs = market.probabilities().unwrap();
            let sum: f64 = probs.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-9);
            prop_assert!(market.liquidity_parameter() >= prev_b);
            prev_b = market.liquidity_parameter();
            prop_assert!(market.vault().pool_value() >= 0);
            prop_assert!(market.vault().utilization() <= 1.0);
        }
    }
}
