//! Demo binary: builds the three-event "Middle East Escalation Cluster"
//! market and walks it through the full engine surface: world table,
//! marginal prices, quotes, an executed trade, the vAMM status block and the
//! synthetic order ladder.

use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;

use vamm_engine::commitment::{StaticVerifier, TradeCommitment};
use vamm_engine::config::Config;
use vamm_engine::contracts::Contract;
use vamm_engine::engine::Engine;
use vamm_engine::market::Side;

// World priors from the cluster's order book, keyed by internal bit value
// (bit 0 = Iran strike, bit 1 = US response, bit 2 = oil > $120).
const CLUSTER_PRIOR: [f64; 8] = [0.20, 0.10, 0.15, 0.25, 0.05, 0.05, 0.10, 0.10];

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,vamm_engine=debug".into()),
        )
        .init();

    println!("🦀 Combinatorial vAMM Engine Demo");
    println!("=================================\n");

    let config = Config::from_env();
    let engine = Engine::new(config, Arc::new(StaticVerifier::accept_all()));

    let market_id = engine
        .create_market(
            vec![
                "Iran Strike on Israel".into(),
                "US Military Response".into(),
                "Oil Price >$120/barrel".into(),
            ],
            Some(CLUSTER_PRIOR.to_vec()),
        )
        .await?;

    let lp_shares = engine
        .deposit_liquidity(market_id, "vault-lp", Decimal::from(1_250_000))
        .await?;
    println!("💧 LP seeded $1,250,000 -> {lp_shares} pool shares\n");

    print_world_table(&engine, market_id).await?;
    print_marginals(&engine, market_id).await?;

    // a trader backs the joint strike+response slice with $500
    let slice = Contract::Slice {
        legs: vec![(0, true), (1, true)],
    };
    let quote = engine
        .quote(market_id, &slice, Side::Buy, Decimal::from(500))
        .await?;
    println!("📋 Quote for $500 on {}:", quote.contract);
    println!("   fair price      {:.4}", quote.fair_price);
    println!("   exec price      {:.4}", quote.exec_price);
    println!("   shares          {:.2}", quote.shares);
    println!("   payout if right ${:.2}", quote.payout_if_correct);
    println!("   total (w/ fee)  ${:.2}\n", quote.total);

    let receipt = engine
        .execute_trade(
            market_id,
            &slice,
            Side::Buy,
            Decimal::from(500),
            &TradeCommitment {
                account: "alice".into(),
                nonce: 1,
                payload: vec![0; 32],
            },
        )
        .await?;
    println!(
        "✅ Trade #{} filled: {:.2} shares of {} for ${:.2}\n",
        receipt.trade_id, receipt.shares, receipt.contract, receipt.total
    );

    print_world_table(&engine, market_id).await?;
    print_status(&engine, market_id).await?;
    print_ladder(&engine, market_id).await?;

    Ok(())
}

async fn print_world_table(engine: &Engine, id: u64) -> Result<()> {
    println!("🌍 World Table");
    println!("   bits  probability  price");
    let table = engine.get_world_table(id).await?;
    for row in &table {
        println!("   {}   {}     {}", row.bits, row.probability, row.price);
    }
    let sum: Decimal = table.iter().map(|r| r.probability).sum();
    println!("   total probability: {sum}\n");
    Ok(())
}

async fn print_marginals(engine: &Engine, id: u64) -> Result<()> {
    println!("📈 Marginal Prices");
    for (event, label) in [(0, "Iran strike"), (1, "US response"), (2, "Oil >$120")] {
        let quote = engine
            .quote(
                id,
                &Contract::Marginal {
                    event,
                    outcome: true,
                },
                Side::Buy,
                Decimal::ONE,
            )
            .await?;
        println!("   {label:<12} {:.4}", quote.fair_price);
    }
    println!();
    Ok(())
}

async fn print_status(engine: &Engine, id: u64) -> Result<()> {
    let status = engine.get_risk_status(id).await?;
    println!("🛡  vAMM Status");
    println!("   liquidity parameter b : {:.1}", status.liquidity_parameter);
    println!("   cumulative volume     : ${}", status.cumulative_volume);
    println!(
        "   volatility            : {} (spread {:.0}bps)",
        status.volatility_state,
        status.current_spread * 10_000.0
    );
    println!("   vault pool            : ${}", status.vault_pool_value);
    println!(
        "   vault utilization     : {:.2}%",
        status.vault_utilization * 100.0
    );
    println!("   fees accrued          : ${}", status.fees_accrued);
    let mut hot: Vec<_> = status
        .inventory_skew
        .iter()
        .filter(|row| row.skew > 0.0)
        .collect();
    hot.sort_by(|a, b| b.skew.total_cmp(&a.skew));
    for row in hot.iter().take(3) {
        println!(
            "   world {:>2} position     : {:.0} (skew {:+.1}%)",
            row.world,
            row.position,
            row.skew * 100.0
        );
    }
    println!();
    Ok(())
}

async fn print_ladder(engine: &Engine, id: u64) -> Result<()> {
    let ladder = engine
        .get_order_ladder(
            id,
            &Contract::Marginal {
                event: 0,
                outcome: true,
            },
            4,
            500.0,
        )
        .await?;
    println!("📖 Order Ladder for {} (mid {})", ladder.contract, ladder.mid);
    for ask in ladder.asks.iter().rev() {
        println!("   ask {} x {}  [{}]", ask.price, ask.size, ask.source);
    }
    for bid in &ladder.bids {
        println!("   bid {} x {}  [{}]", bid.price, bid.size, bid.source);
    }
    Ok(())
}
