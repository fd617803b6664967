//! Forced settlement, global settlement, and revival tests.
//!
//! The settlement queue is throttled and FIFO; a black swan freezes the
//! asset into a redemption fund; collateral bids bring it back.

use std::collections::BTreeSet;
use synth_core::*;

const CORE: AssetId = AssetId(0);
const USD: AssetId = AssetId(1);
const ISSUER: AccountId = AccountId(1);
const FEEDER: AccountId = AccountId(2);
const ALICE: AccountId = AccountId(10);
const BOB: AccountId = AccountId(11);
const CAROL: AccountId = AccountId(12);
const DAVE: AccountId = AccountId(13);

fn feed(usd: i64, core: i64) -> PriceFeed {
    PriceFeed {
        settlement_price: Price::new(AssetAmount::new(usd, USD), AssetAmount::new(core, CORE)),
        maintenance_collateral_ratio: 1750,
        maximum_short_squeeze_ratio: 1100,
    }
}

fn engine_with_usd() -> Engine {
    let mut engine = Engine::new(ChainParams::default(), Timestamp::from_secs(0));
    engine
        .register_synthetic(
            USD,
            ISSUER,
            BitassetOptions {
                backing_asset: CORE,
                feed_lifetime_secs: 30 * 86_400,
                ..BitassetOptions::default()
            },
        )
        .unwrap();
    engine
        .set_feed_producers(USD, BTreeSet::from([FEEDER]))
        .unwrap();
    engine
        .publish_price_feed(PublishPriceFeed {
            producer: FEEDER,
            asset: USD,
            feed: feed(10, 1),
        })
        .unwrap();
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

fn sell(engine: &mut Engine, seller: AccountId, amount: AssetAmount, wants: AssetAmount) {
    engine
        .place_limit_order(PlaceLimitOrder {
            seller,
            amount_to_sell: amount,
            min_to_receive: wants,
            expiration: Timestamp::MAX,
            fill_or_kill: false,
        })
        .unwrap();
}

/// Move `amount` USD from a borrower to a buyer through the book at the
/// feed price of 10 USD/CORE.
fn hand_usd(engine: &mut Engine, from: AccountId, to: AccountId, amount: i64) {
    let core = amount / 10;
    sell(engine, from, AssetAmount::new(amount, USD), AssetAmount::new(core, CORE));
    sell(engine, to, AssetAmount::new(core, CORE), AssetAmount::new(amount, USD));
    assert_eq!(engine.balance(to, USD), amount);
}

fn settle(engine: &mut Engine, account: AccountId, amount: i64) -> SettleOutcome {
    engine
        .request_force_settle(RequestForceSettle {
            account,
            amount: AssetAmount::new(amount, USD),
        })
        .unwrap()
}

#[test]
fn settle_requests_queue_and_fill_against_weakest_position() {
    let mut engine = engine_with_usd();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    engine.deposit(CAROL, AssetAmount::new(50, CORE));
    borrow(&mut engine, ALICE, 1_000, 400);
    hand_usd(&mut engine, ALICE, CAROL, 500);

    let outcome = settle(&mut engine, CAROL, 500);
    assert!(matches!(outcome, SettleOutcome::Queued(_)));
    // escrowed, not paid yet
    assert_eq!(engine.balance(CAROL, USD), 0);
    assert_eq!(engine.pending_settlements(USD).len(), 1);

    // past the one day delay and into a maintenance tick; the per-interval
    // volume cap (20% of 1000 supply) limits the fill to 200 USD
    engine.advance_block(Timestamp::from_secs(90_000)).unwrap();

    assert_eq!(engine.balance(CAROL, CORE), 20);
    assert_eq!(engine.pending_settlements(USD)[0].balance.amount, 300);
    let alice = engine.position(ALICE, USD).unwrap();
    assert_eq!(alice.debt, 800);
    assert_eq!(alice.collateral, 380);
    assert_eq!(engine.synthetic(USD).unwrap().force_settled_volume, 200);
}

#[test]
fn settle_queue_drains_across_intervals() {
    let mut engine = engine_with_usd();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    engine.deposit(CAROL, AssetAmount::new(50, CORE));
    borrow(&mut engine, ALICE, 1_000, 400);
    hand_usd(&mut engine, ALICE, CAROL, 500);
    settle(&mut engine, CAROL, 500);

    // cap shrinks with supply: fills of 200, 160, 128, then the last 12
    for k in 0..6 {
        engine
            .advance_block(Timestamp::from_secs(90_000 + k * 3_600))
            .unwrap();
    }

    assert!(engine.pending_settlements(USD).is_empty());
    assert_eq!(engine.balance(CAROL, CORE), 20 + 16 + 12 + 1);
    let alice = engine.position(ALICE, USD).unwrap();
    assert_eq!(alice.debt, 500);
    assert_eq!(alice.collateral, 400 - 49);
}

#[test]
fn settle_queue_is_fifo_under_the_volume_cap() {
    let mut engine = engine_with_usd();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    engine.deposit(CAROL, AssetAmount::new(15, CORE));
    engine.deposit(DAVE, AssetAmount::new(15, CORE));
    borrow(&mut engine, ALICE, 1_000, 400);
    hand_usd(&mut engine, ALICE, CAROL, 150);
    hand_usd(&mut engine, ALICE, DAVE, 150);

    settle(&mut engine, CAROL, 150);
    settle(&mut engine, DAVE, 150);

    engine.advance_block(Timestamp::from_secs(90_000)).unwrap();

    // 200 USD of capacity: carol's whole request, then 50 of dave's
    assert_eq!(engine.balance(CAROL, CORE), 15);
    assert_eq!(engine.balance(DAVE, CORE), 5);
    let pending = engine.pending_settlements(USD);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].owner, DAVE);
    assert_eq!(pending[0].balance.amount, 100);
}

#[test]
fn tiny_settle_requests_can_pay_zero() {
    let mut engine = engine_with_usd();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    engine.deposit(CAROL, AssetAmount::new(50, CORE));
    borrow(&mut engine, ALICE, 1_000, 400);
    sell(&mut engine, ALICE, AssetAmount::new(5, USD), AssetAmount::new(1, CORE));
    sell(&mut engine, CAROL, AssetAmount::new(1, CORE), AssetAmount::new(5, USD));

    settle(&mut engine, CAROL, 5);
    engine.advance_block(Timestamp::from_secs(90_000)).unwrap();

    // 5 USD rounds to zero CORE at 10 USD/CORE; the debt is still retired
    assert!(engine.pending_settlements(USD).is_empty());
    assert_eq!(engine.balance(CAROL, CORE), 49);
    assert_eq!(engine.balance(CAROL, USD), 0);
    assert_eq!(engine.position(ALICE, USD).unwrap().debt, 995);
    assert_eq!(engine.synthetic(USD).unwrap().current_supply, 995);
}

#[test]
fn settle_request_validation_and_cancel() {
    let mut engine = engine_with_usd();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    borrow(&mut engine, ALICE, 1_000, 400);

    let err = engine
        .request_force_settle(RequestForceSettle {
            account: ALICE,
            amount: AssetAmount::new(0, USD),
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount));

    let SettleOutcome::Queued(id) = settle(&mut engine, ALICE, 100) else {
        panic!("expected queued settlement");
    };
    assert_eq!(engine.balance(ALICE, USD), 900);

    let err = engine
        .cancel_force_settle(CancelForceSettle {
            account: BOB,
            settlement_id: id,
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::NotOwner(_)));

    engine
        .cancel_force_settle(CancelForceSettle {
            account: ALICE,
            settlement_id: id,
        })
        .unwrap();
    assert_eq!(engine.balance(ALICE, USD), 1_000);
    assert!(engine.pending_settlements(USD).is_empty());
}

#[test]
fn matured_requests_cannot_be_cancelled() {
    let mut engine = engine_with_usd();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    engine.deposit(CAROL, AssetAmount::new(100, CORE));
    borrow(&mut engine, ALICE, 1_000, 400);
    hand_usd(&mut engine, ALICE, CAROL, 1_000);

    let SettleOutcome::Queued(id) = settle(&mut engine, CAROL, 1_000) else {
        panic!("expected queued settlement");
    };

    // maintenance fills 200 under the volume cap; the 800 remainder is
    // matured but unexecuted
    engine.advance_block(Timestamp::from_secs(90_000)).unwrap();
    assert_eq!(engine.balance(CAROL, CORE), 20);
    assert_eq!(engine.pending_settlements(USD)[0].balance.amount, 800);

    // too late to back out of the queue now
    let err = engine
        .cancel_force_settle(CancelForceSettle {
            account: CAROL,
            settlement_id: id,
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::SettlementMatured(_)));
    assert_eq!(engine.pending_settlements(USD)[0].balance.amount, 800);
    assert_eq!(engine.balance(CAROL, USD), 0);
}

#[test]
fn registration_rejects_out_of_range_percents() {
    let mut engine = Engine::new(ChainParams::default(), Timestamp::from_secs(0));

    let err = engine
        .register_synthetic(
            USD,
            ISSUER,
            BitassetOptions {
                backing_asset: CORE,
                force_settlement_offset_percent: PERCENT_100 + 1,
                ..BitassetOptions::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAssetOptions(_)));
    assert_eq!(err.kind(), ErrorKind::InputValidation);

    let err = engine
        .register_synthetic(
            USD,
            ISSUER,
            BitassetOptions {
                backing_asset: CORE,
                maximum_force_settlement_volume: PERCENT_100 + 1,
                ..BitassetOptions::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAssetOptions(_)));
    assert!(engine.synthetic(USD).is_none());
}

#[test]
fn global_settlement_needs_outstanding_supply() {
    let mut engine = engine_with_usd();

    let err = engine
        .trigger_global_settlement(TriggerGlobalSettlement {
            issuer: ISSUER,
            asset: USD,
            settlement_price: Price::new(
                AssetAmount::new(10, USD),
                AssetAmount::new(1, CORE),
            ),
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::NoSupplyToSettle(_)));
    assert!(!engine.synthetic(USD).unwrap().has_settlement());
}

#[test]
fn issuer_can_trigger_global_settlement_at_or_above_feed() {
    let mut engine = engine_with_usd();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    borrow(&mut engine, ALICE, 1_000, 400);

    let err = engine
        .trigger_global_settlement(TriggerGlobalSettlement {
            issuer: BOB,
            asset: USD,
            settlement_price: Price::new(AssetAmount::new(10, USD), AssetAmount::new(1, CORE)),
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::NotIssuer(_, _)));

    let err = engine
        .trigger_global_settlement(TriggerGlobalSettlement {
            issuer: ISSUER,
            asset: USD,
            settlement_price: Price::new(AssetAmount::new(5, USD), AssetAmount::new(1, CORE)),
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSettlementPrice));

    engine
        .trigger_global_settlement(TriggerGlobalSettlement {
            issuer: ISSUER,
            asset: USD,
            settlement_price: Price::new(AssetAmount::new(10, USD), AssetAmount::new(1, CORE)),
        })
        .unwrap();

    let state = engine.synthetic(USD).unwrap();
    assert!(state.has_settlement());
    // 1000 USD at 10/1 gathers 100 CORE; the excess goes back to alice
    assert_eq!(state.settlement_fund, 100);
    assert_eq!(state.current_supply, 1_000);
    assert_eq!(engine.balance(ALICE, CORE), 1_000 - 400 + 300);
    assert!(engine.position(ALICE, USD).is_none());
}

#[test]
fn undercollateralization_settles_automatically_and_redeems() {
    let mut engine = engine_with_usd();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    borrow(&mut engine, ALICE, 1_000, 200);

    // at 5 USD/CORE the debt exactly equals the collateral's value, which
    // is past the short squeeze cap: black swan
    publish(&mut engine, 5, 1);

    let state = engine.synthetic(USD).unwrap();
    assert!(state.has_settlement());
    assert_eq!(state.settlement_fund, 200);
    assert_eq!(state.current_supply, 1_000);
    assert_eq!(
        state.settlement_price,
        Some(Price::new(AssetAmount::new(1_000, USD), AssetAmount::new(200, CORE)))
    );

    // redemption is instant while settled
    let outcome = settle(&mut engine, ALICE, 400);
    assert!(matches!(outcome, SettleOutcome::Instant(a) if a == AssetAmount::new(80, CORE)));

    // the last redeemer takes the whole remaining fund
    let outcome = settle(&mut engine, ALICE, 600);
    assert!(matches!(outcome, SettleOutcome::Instant(a) if a == AssetAmount::new(120, CORE)));

    let state = engine.synthetic(USD).unwrap();
    assert_eq!(state.settlement_fund, 0);
    assert_eq!(state.current_supply, 0);

    // with supply and fund empty, maintenance revives the asset
    engine.advance_block(Timestamp::from_secs(4_000)).unwrap();
    assert!(!engine.synthetic(USD).unwrap().has_settlement());
}

#[test]
fn queued_settle_requests_are_returned_on_global_settlement() {
    let mut engine = engine_with_usd();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    engine.deposit(CAROL, AssetAmount::new(10, CORE));
    borrow(&mut engine, ALICE, 1_000, 200);
    hand_usd(&mut engine, ALICE, CAROL, 100);

    settle(&mut engine, CAROL, 100);
    publish(&mut engine, 5, 1);
    assert!(engine.synthetic(USD).unwrap().has_settlement());

    engine.advance_block(Timestamp::from_secs(4_000)).unwrap();

    assert!(engine.pending_settlements(USD).is_empty());
    assert_eq!(engine.balance(CAROL, USD), 100);
    assert!(engine.events().iter().any(|e| matches!(
        &e.payload,
        EventPayload::SettlementCanceled(c) if c.reason == SettleCancelReason::GloballySettled
    )));
}

#[test]
fn collateral_bid_recapitalizes_and_revives() {
    let mut engine = engine_with_usd();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    engine.deposit(BOB, AssetAmount::new(1_000, CORE));
    borrow(&mut engine, ALICE, 1_000, 200);
    publish(&mut engine, 5, 1);

    engine
        .bid_collateral(BidCollateral {
            bidder: BOB,
            additional_collateral: AssetAmount::new(300, CORE),
            debt_covered: AssetAmount::new(1_000, USD),
        })
        .unwrap();
    assert_eq!(engine.balance(BOB, CORE), 700);

    engine.advance_block(Timestamp::from_secs(4_000)).unwrap();

    let state = engine.synthetic(USD).unwrap();
    assert!(!state.has_settlement());
    assert_eq!(state.settlement_fund, 0);
    // bob's position holds his 300 CORE plus the whole 200 CORE fund
    let bob = engine.position(BOB, USD).unwrap();
    assert_eq!(bob.debt, 1_000);
    assert_eq!(bob.collateral, 500);
    assert!(engine.collateral_bids(USD).is_empty());
    // alice's USD is live again, still fully backed
    assert_eq!(engine.balance(ALICE, USD), 1_000);
    assert_eq!(engine.synthetic(USD).unwrap().current_supply, 1_000);
}

#[test]
fn insufficient_bids_leave_the_asset_settled() {
    let mut engine = engine_with_usd();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    engine.deposit(BOB, AssetAmount::new(1_000, CORE));
    borrow(&mut engine, ALICE, 1_000, 200);
    publish(&mut engine, 5, 1);

    // covers less than half the supply; well collateralized but not enough
    engine
        .bid_collateral(BidCollateral {
            bidder: BOB,
            additional_collateral: AssetAmount::new(300, CORE),
            debt_covered: AssetAmount::new(400, USD),
        })
        .unwrap();

    engine.advance_block(Timestamp::from_secs(4_000)).unwrap();

    assert!(engine.synthetic(USD).unwrap().has_settlement());
    assert_eq!(engine.collateral_bids(USD).len(), 1);
    assert!(engine.position(BOB, USD).is_none());
}

#[test]
fn a_new_bid_replaces_the_old_and_zero_debt_cancels() {
    let mut engine = engine_with_usd();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    engine.deposit(BOB, AssetAmount::new(1_000, CORE));
    borrow(&mut engine, ALICE, 1_000, 200);
    publish(&mut engine, 5, 1);

    engine
        .bid_collateral(BidCollateral {
            bidder: BOB,
            additional_collateral: AssetAmount::new(300, CORE),
            debt_covered: AssetAmount::new(1_000, USD),
        })
        .unwrap();
    engine
        .bid_collateral(BidCollateral {
            bidder: BOB,
            additional_collateral: AssetAmount::new(200, CORE),
            debt_covered: AssetAmount::new(500, USD),
        })
        .unwrap();
    // old escrow came back, only the new bid stands
    assert_eq!(engine.balance(BOB, CORE), 800);
    let bids = engine.collateral_bids(USD);
    assert_eq!(bids.len(), 1);
    assert_eq!(bids[0].additional_collateral().amount, 200);

    engine
        .bid_collateral(BidCollateral {
            bidder: BOB,
            additional_collateral: AssetAmount::new(0, CORE),
            debt_covered: AssetAmount::new(0, USD),
        })
        .unwrap();
    assert!(engine.collateral_bids(USD).is_empty());
    assert_eq!(engine.balance(BOB, CORE), 1_000);
}

#[test]
fn bids_require_a_settled_asset() {
    let mut engine = engine_with_usd();
    engine.deposit(BOB, AssetAmount::new(1_000, CORE));

    let err = engine
        .bid_collateral(BidCollateral {
            bidder: BOB,
            additional_collateral: AssetAmount::new(300, CORE),
            debt_covered: AssetAmount::new(1_000, USD),
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::NotGloballySettled(_)));
}

#[test]
fn recovered_prices_revive_to_the_issuer_without_bids() {
    let mut engine = engine_with_usd();
    engine.deposit(ALICE, AssetAmount::new(1_000, CORE));
    borrow(&mut engine, ALICE, 1_000, 200);
    publish(&mut engine, 5, 1);
    assert!(engine.synthetic(USD).unwrap().has_settlement());

    // at 20 USD/CORE the 200 CORE fund collateralizes the supply on its own
    publish(&mut engine, 20, 1);
    engine.advance_block(Timestamp::from_secs(4_000)).unwrap();

    let state = engine.synthetic(USD).unwrap();
    assert!(!state.has_settlement());
    assert_eq!(state.settlement_fund, 0);
    let position = engine.position(ISSUER, USD).unwrap();
    assert_eq!(position.debt, 1_000);
    assert_eq!(position.collateral, 200);
}
