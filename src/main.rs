//! Synthetic Asset Engine Simulation.
//!
//! Walks the full lifecycle of a collateral-backed synthetic: borrowing,
//! trading, margin calls, forced settlement, a black swan, and revival
//! through collateral bidding.

use std::collections::BTreeSet;
use synth_core::*;

const CORE: AssetId = AssetId(0);
const USD: AssetId = AssetId(1);

const ISSUER: AccountId = AccountId(1);
const FEEDER: AccountId = AccountId(2);
const ALICE: AccountId = AccountId(10);
const BOB: AccountId = AccountId(11);
const CAROL: AccountId = AccountId(12);

fn main() {
    println!("Synthetic Asset Engine Simulation");
    println!("Margin-Backed Synthetics, Full Lifecycle\n");

    scenario_1_borrow_and_trade();
    scenario_2_margin_call();
    scenario_3_forced_settlement();
    scenario_4_global_settlement();
    scenario_5_collateral_bid_revival();

    println!("\nAll simulations completed successfully.");
}

fn feed(usd: i64, core: i64) -> PriceFeed {
    PriceFeed {
        settlement_price: Price::new(AssetAmount::new(usd, USD), AssetAmount::new(core, CORE)),
        maintenance_collateral_ratio: 1750,
        maximum_short_squeeze_ratio: 1100,
    }
}

/// Fresh engine with the USD synthetic registered and a 10 USD/CORE feed.
fn setup() -> Engine {
    let mut engine = Engine::new(ChainParams::default(), Timestamp::from_secs(0));
    engine
        .register_synthetic(
            USD,
            ISSUER,
            BitassetOptions {
                backing_asset: CORE,
                feed_lifetime_secs: 30 * 86_400,
                force_settlement_offset_percent: 100, // 1%
                ..BitassetOptions::default()
            },
        )
        .unwrap();
    engine
        .set_feed_producers(USD, BTreeSet::from([FEEDER]))
        .unwrap();
    publish(&mut engine, 10, 1);
    engine
}

fn publish(engine: &mut Engine, usd: i64, core: i64) {
    engine
        .publish_price_feed(PublishPriceFeed {
            producer: FEEDER,
            asset: USD,
            feed: feed(usd, core),
        })
        .unwrap();
}

fn borrow(engine: &mut Engine, account: AccountId, debt: i64, collateral: i64) {
    engine
        .update_margin_position(UpdateMarginPosition {
            account,
            asset: USD,
            delta_collateral: collateral,
            delta_debt: debt,
            target_collateral_ratio: None,
        })
        .unwrap();
}

fn sell(
    engine: &mut Engine,
    seller: AccountId,
    amount: AssetAmount,
    wants: AssetAmount,
) -> OrderOutcome {
    engine
        .place_limit_order(PlaceLimitOrder {
            seller,
            amount_to_sell: amount,
            min_to_receive: wants,
            expiration: Timestamp::MAX,
            fill_or_kill: false,
        })
        .unwrap()
}

/// Borrow the synthetic into existence, then trade it on the book.
fn scenario_1_borrow_and_trade() {
    println!("Scenario 1: Borrowing and Trading\n");

    let mut engine = setup();
    engine.deposit(ALICE, AssetAmount::new(10_000, CORE));
    engine.deposit(BOB, AssetAmount::new(1_000, CORE));

    borrow(&mut engine, ALICE, 1_000, 500);
    println!("  Alice borrows 1000 USD against 500 CORE at the 10 USD/CORE feed");

    let outcome = sell(
        &mut engine,
        ALICE,
        AssetAmount::new(200, USD),
        AssetAmount::new(18, CORE),
    );
    println!("  Alice offers 200 USD for 18 CORE, resting: {}", !outcome.completed);

    let outcome = sell(
        &mut engine,
        BOB,
        AssetAmount::new(20, CORE),
        AssetAmount::new(200, USD),
    );
    println!("  Bob offers 20 CORE for 200 USD, crosses at Alice's price");
    println!("  Bob remaining on book: {} CORE", outcome.remaining);

    println!("  Alice: {} USD, Bob: {} USD, {} CORE left\n",
        engine.balance(ALICE, USD),
        engine.balance(BOB, USD),
        engine.balance(BOB, CORE),
    );
}

/// A falling feed margin-calls the weakest borrower into a resting offer.
fn scenario_2_margin_call() {
    println!("Scenario 2: Margin Call\n");

    let mut engine = setup();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    engine.deposit(BOB, AssetAmount::new(1_000, CORE));

    borrow(&mut engine, ALICE, 1_000, 250);
    borrow(&mut engine, BOB, 500, 200);
    println!("  Alice borrows 1000 USD / 250 CORE, Bob 500 USD / 200 CORE");

    sell(
        &mut engine,
        BOB,
        AssetAmount::new(300, USD),
        AssetAmount::new(45, CORE),
    );
    println!("  Bob offers 300 USD at ~6.67 USD/CORE");

    publish(&mut engine, 6, 1);
    println!("  Feed drops to 6 USD/CORE; Alice's ratio falls below maintenance");

    let alice = engine.position(ALICE, USD).unwrap();
    println!(
        "  Alice margin-called into Bob's offer: {} USD debt, {} CORE collateral left",
        alice.debt, alice.collateral
    );
    println!("  Bob received {} CORE for his USD\n", engine.balance(BOB, CORE));
}

/// Settlement requests queue, mature, and convert against the weakest position.
fn scenario_3_forced_settlement() {
    println!("Scenario 3: Forced Settlement\n");

    let mut engine = setup();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    borrow(&mut engine, ALICE, 1_000, 400);

    engine.deposit(CAROL, AssetAmount::new(50, CORE));
    sell(
        &mut engine,
        ALICE,
        AssetAmount::new(500, USD),
        AssetAmount::new(50, CORE),
    );
    sell(
        &mut engine,
        CAROL,
        AssetAmount::new(50, CORE),
        AssetAmount::new(500, USD),
    );
    println!("  Carol buys 500 USD from Alice for 50 CORE");

    let outcome = engine
        .request_force_settle(RequestForceSettle {
            account: CAROL,
            amount: AssetAmount::new(500, USD),
        })
        .unwrap();
    match outcome {
        SettleOutcome::Queued(id) => println!("  Carol requests settlement of 500 USD, queued as {:?}", id),
        SettleOutcome::Instant(_) => unreachable!(),
    }

    // a day for the delay, then the next maintenance tick executes it
    engine.advance_block(Timestamp::from_secs(90_000)).unwrap();
    println!("  One day later, maintenance works the queue");
    println!(
        "  Volume-capped to 20% of supply: Carol got {} CORE (feed less 1% offset)",
        engine.balance(CAROL, CORE)
    );
    let queued: i64 = engine
        .pending_settlements(USD)
        .iter()
        .map(|s| s.balance.amount)
        .sum();
    println!("  Still queued for the next interval: {} USD", queued);
    let alice = engine.position(ALICE, USD).unwrap();
    println!("  Alice's position now {} USD / {} CORE\n", alice.debt, alice.collateral);
}

/// Undercollateralization settles every position into a redemption fund.
fn scenario_4_global_settlement() {
    println!("Scenario 4: Global Settlement\n");

    let mut engine = setup();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    borrow(&mut engine, ALICE, 1_000, 200);
    println!("  Alice borrows 1000 USD against 200 CORE");

    publish(&mut engine, 5, 1);
    println!("  Feed halves to 5 USD/CORE: debt equals collateral value");

    let state = engine.synthetic(USD).unwrap();
    println!(
        "  Asset globally settled, fund: {} CORE for {} USD supply",
        state.settlement_fund, state.current_supply
    );

    let outcome = engine
        .request_force_settle(RequestForceSettle {
            account: ALICE,
            amount: AssetAmount::new(400, USD),
        })
        .unwrap();
    if let SettleOutcome::Instant(received) = outcome {
        println!("  Alice instantly redeems 400 USD for {}", received);
    }
    let outcome = engine
        .request_force_settle(RequestForceSettle {
            account: ALICE,
            amount: AssetAmount::new(600, USD),
        })
        .unwrap();
    if let SettleOutcome::Instant(received) = outcome {
        println!("  Redeeming the rest drains the fund: {}", received);
    }
    let state = engine.synthetic(USD).unwrap();
    println!("  Fund: {} CORE, supply: {} USD\n", state.settlement_fund, state.current_supply);
}

/// A collateral bid recapitalizes a settled asset and brings it back.
fn scenario_5_collateral_bid_revival() {
    println!("Scenario 5: Collateral Bidding and Revival\n");

    let mut engine = setup();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    engine.deposit(BOB, AssetAmount::new(1_000, CORE));
    borrow(&mut engine, ALICE, 1_000, 200);

    publish(&mut engine, 5, 1);
    println!("  Feed crash settles the asset (fund 200 CORE, supply 1000 USD)");

    engine
        .bid_collateral(BidCollateral {
            bidder: BOB,
            additional_collateral: AssetAmount::new(300, CORE),
            debt_covered: AssetAmount::new(1_000, USD),
        })
        .unwrap();
    println!("  Bob bids 300 CORE to take over the whole 1000 USD debt");

    engine.advance_block(Timestamp::from_secs(4_000)).unwrap();

    let state = engine.synthetic(USD).unwrap();
    println!("  Maintenance revives the asset, settled: {}", state.has_settlement());
    let bob = engine.position(BOB, USD).unwrap();
    println!(
        "  Bob inherits a position: {} USD debt on {} CORE (fund + bid)",
        bob.debt, bob.collateral
    );
    println!("  Events recorded this run: {}", engine.events().len());
}
