// 10.6 engine/swan.rs: global settlement and recovery. when the weakest
// position can no longer cover its debt at any available price, every
// position closes at once into a settlement fund; holders redeem against the
// fund, and collateral bids can later recapitalize the debt and revive the
// asset.

use super::core::Engine;
use super::results::EngineError;
use crate::events::{
    AssetRevivedEvent, BidCanceledEvent, BidExecutedEvent, BidPlacedEvent, EventPayload,
    GlobalSettlementEvent, PositionUpdatedEvent,
};
use crate::ops::{BidCollateral, TriggerGlobalSettlement};
use crate::position::MarginPosition;
use crate::price::Price;
use crate::settlement::CollateralBid;
use crate::types::{AccountId, AssetAmount, AssetId, BidId, PositionId};

impl Engine {
    pub fn trigger_global_settlement(
        &mut self,
        op: TriggerGlobalSettlement,
    ) -> Result<(), EngineError> {
        let feed = {
            let state = self.state(op.asset)?;
            if state.issuer != op.issuer {
                return Err(EngineError::NotIssuer(op.issuer, op.asset));
            }
            if !state.options.allow_global_settle {
                return Err(EngineError::GlobalSettleNotPermitted(op.asset));
            }
            if state.has_settlement() {
                return Err(EngineError::GloballySettled(op.asset));
            }
            // zero supply means zero positions: nothing to gather, and a
            // recorded price over an empty fund would be meaningless
            if state.current_supply == 0 {
                return Err(EngineError::NoSupplyToSettle(op.asset));
            }
            let Some(feed) = state.current_feed else {
                return Err(EngineError::NoPriceFeed(op.asset));
            };
            if op.settlement_price.base.asset != state.asset
                || op.settlement_price.quote.asset != state.options.backing_asset
                || op.settlement_price.validate().is_err()
            {
                return Err(EngineError::InvalidSettlementPrice);
            }
            feed
        };
        // debt holders may not be handed less per share than the feed says
        if op.settlement_price < feed.settlement_price {
            return Err(EngineError::InvalidSettlementPrice);
        }
        self.globally_settle(op.asset, op.settlement_price)
    }

    /// True when the asset is (or just became) globally settled. The trigger
    /// is the weakest position's collateralization falling to where no bid,
    /// resting or squeezed, could absorb its debt.
    pub(super) fn check_for_blackswan(
        &mut self,
        asset: AssetId,
        enable_black_swan: bool,
    ) -> Result<bool, EngineError> {
        let Some(state) = self.assets.get(&asset) else {
            return Ok(false);
        };
        if state.has_settlement() {
            return Ok(true);
        }
        let Some(feed) = state.current_feed else {
            return Ok(false);
        };
        let backing = state.options.backing_asset;

        let Some(weakest) = self.positions.by_collateralization(backing, asset).next() else {
            return Ok(false);
        };
        let least_collateral = weakest.collateralization();

        let mut highest = feed.max_short_squeeze_price();
        if let Some(best) = self.orders.best(asset, backing) {
            highest = highest.max(best.sell_price);
        }

        if least_collateral.invert() < highest {
            return Ok(false);
        }
        if !enable_black_swan {
            return Err(EngineError::WouldTriggerGlobalSettlement);
        }
        let price = self.global_settlement_price(asset)?;
        self.globally_settle(asset, price)?;
        Ok(true)
    }

    /// Price an automatic global settlement executes at: the feed, or the
    /// weakest position's actual debt per collateral if that is higher.
    /// Positions short of it pay everything they have anyway.
    pub(super) fn global_settlement_price(&self, asset: AssetId) -> Result<Price, EngineError> {
        let state = self.state(asset)?;
        let feed = state
            .current_feed
            .ok_or(EngineError::NoPriceFeed(asset))?;
        let backing = state.options.backing_asset;
        let weakest = self
            .positions
            .by_collateralization(backing, asset)
            .next()
            .ok_or(EngineError::InvariantViolation("settlement without positions"))?;
        Ok(feed.settlement_price.max(weakest.collateralization().invert()))
    }

    /// Close every position at `settlement_price` into the settlement fund.
    /// Each pays the collateral its debt is worth (rounded against it),
    /// capped at what it holds; the borrower keeps any excess.
    pub(super) fn globally_settle(
        &mut self,
        asset: AssetId,
        settlement_price: Price,
    ) -> Result<(), EngineError> {
        let (backing, original_supply) = {
            let state = self.state(asset)?;
            (state.options.backing_asset, state.current_supply)
        };

        let ids: Vec<PositionId> = self
            .positions
            .by_collateralization(backing, asset)
            .map(|p| p.id)
            .collect();

        let mut gathered = 0i64;
        for id in ids {
            let (debt, collateral) = {
                let position = self
                    .positions
                    .get(id)
                    .ok_or(EngineError::InvariantViolation("position disappeared"))?;
                (position.amount_of_debt(), position.collateral)
            };
            let owed = debt.multiply_ceil(&settlement_price)?;
            let pays = AssetAmount::new(owed.amount.min(collateral), backing);
            self.fill_call_order(id, pays, debt, settlement_price, true)?;
            gathered += pays.amount;
        }

        // closing the positions burned the supply; the debt is not retired,
        // it is now backed by the fund
        let recorded = Price::new(
            AssetAmount::new(original_supply, asset),
            AssetAmount::new(gathered, backing),
        );
        let state = self.state_mut(asset)?;
        state.current_supply = original_supply;
        state.settlement_price = Some(recorded);
        state.settlement_fund = gathered;

        self.emit(EventPayload::GlobalSettlement(GlobalSettlementEvent {
            asset,
            settlement_price: recorded,
            fund: AssetAmount::new(gathered, backing),
        }));
        Ok(())
    }

    // --- collateral bids ---

    pub fn bid_collateral(&mut self, op: BidCollateral) -> Result<(), EngineError> {
        let asset = op.debt_covered.asset;
        let backing = {
            let state = self.state(asset)?;
            if !state.has_settlement() {
                return Err(EngineError::NotGloballySettled(asset));
            }
            state.options.backing_asset
        };
        if op.additional_collateral.asset != backing {
            return Err(EngineError::BidWrongCollateral);
        }
        if op.debt_covered.amount < 0 || op.additional_collateral.amount < 0 {
            return Err(EngineError::InvalidAmount);
        }

        // one bid per account and asset: a new bid replaces the old one
        if let Some(existing) = self.bids.find(asset, op.bidder).map(|b| b.id) {
            self.cancel_bid(existing)?;
        }
        if op.debt_covered.amount == 0 {
            return Ok(());
        }
        if op.additional_collateral.amount == 0 {
            return Err(EngineError::InvalidAmount);
        }

        self.debit(op.bidder, op.additional_collateral)?;
        let id = BidId(self.next_bid_id);
        self.next_bid_id += 1;
        self.bids.insert(CollateralBid {
            id,
            bidder: op.bidder,
            bid: Price::new(op.additional_collateral, op.debt_covered),
        });
        self.emit(EventPayload::BidPlaced(BidPlacedEvent {
            bid_id: id,
            bidder: op.bidder,
            additional_collateral: op.additional_collateral,
            debt_covered: op.debt_covered,
        }));
        Ok(())
    }

    pub(super) fn cancel_bid(&mut self, id: BidId) -> Result<(), EngineError> {
        let bid = self
            .bids
            .remove(id)
            .ok_or(EngineError::InvariantViolation("bid index out of sync"))?;
        self.credit(bid.bidder, bid.additional_collateral());
        self.emit(EventPayload::BidCanceled(BidCanceledEvent {
            bid_id: id,
            bidder: bid.bidder,
            refund: bid.additional_collateral(),
        }));
        Ok(())
    }

    /// Maintenance pass over a settled asset: revive it if the open bids
    /// (or the fund alone) can recapitalize the whole remaining supply.
    pub(super) fn process_bids_and_revive(&mut self, asset: AssetId) -> Result<(), EngineError> {
        let (backing, issuer, fund, supply, feed, recorded) = {
            let state = self.state(asset)?;
            let recorded = state
                .settlement_price
                .ok_or(EngineError::InvariantViolation("settled without price"))?;
            (
                state.options.backing_asset,
                state.issuer,
                state.settlement_fund,
                state.current_supply,
                state.current_feed,
                recorded,
            )
        };

        // everything redeemed: nothing left to recapitalize
        if supply == 0 {
            if fund != 0 {
                return Err(EngineError::InvariantViolation("fund outlived supply"));
            }
            return self.revive(asset, backing);
        }

        let Some(feed) = feed else {
            return Ok(());
        };
        let mcr = feed.maintenance_collateral_ratio;
        let supply_amount = AssetAmount::new(supply, asset);

        // collateral recovered, or prices recovered: the fund alone may now
        // collateralize the supply, in which case the issuer takes it over
        // as an ordinary position and bids go back unused
        let fund_trigger =
            Price::call_price(supply_amount, AssetAmount::new(fund, backing), mcr).invert();
        if fund_trigger < feed.settlement_price {
            let id = self.create_revival_position(issuer, supply_amount, fund, backing, mcr);
            self.emit(EventPayload::PositionUpdated(PositionUpdatedEvent {
                position_id: id,
                borrower: issuer,
                asset,
                debt: supply,
                collateral: fund,
            }));
            return self.revive(asset, backing);
        }

        // otherwise the bids must cover the whole supply. each bid is judged
        // with its pro-rata slice of the fund added in: accept while the
        // resulting position would not be instantly callable
        let mut covered = 0i64;
        let mut accepted: Vec<BidId> = Vec::new();
        for bid in self.bids.for_asset(backing, asset) {
            if covered >= supply {
                break;
            }
            let debt = bid.debt_covered().amount.min(supply);
            let slice = AssetAmount::new(debt, asset).multiply(&recorded)?;
            let total = slice.amount + bid.additional_collateral().amount;
            let trigger = Price::call_price(
                AssetAmount::new(debt, asset),
                AssetAmount::new(total, backing),
                mcr,
            )
            .invert();
            if trigger >= feed.settlement_price {
                break;
            }
            covered += debt;
            accepted.push(bid.id);
        }
        if covered < supply {
            return Ok(());
        }

        let mut to_cover = supply;
        let mut remaining_fund = fund;
        for id in accepted {
            let bid = self
                .bids
                .remove(id)
                .ok_or(EngineError::InvariantViolation("bid index out of sync"))?;
            let mut debt = bid.debt_covered().amount.min(supply);
            let mut from_fund = AssetAmount::new(debt, asset).multiply(&recorded)?.amount;
            if debt >= to_cover {
                // final bid absorbs whatever debt and fund are left
                debt = to_cover;
                from_fund = remaining_fund;
            }
            to_cover -= debt;
            remaining_fund -= from_fund;

            let collateral = from_fund + bid.additional_collateral().amount;
            let position_id = self.create_revival_position(
                bid.bidder,
                AssetAmount::new(debt, asset),
                collateral,
                backing,
                mcr,
            );
            self.emit(EventPayload::BidExecuted(BidExecutedEvent {
                bid_id: id,
                bidder: bid.bidder,
                debt: AssetAmount::new(debt, asset),
                collateral: AssetAmount::new(collateral, backing),
            }));
            self.emit(EventPayload::PositionUpdated(PositionUpdatedEvent {
                position_id,
                borrower: bid.bidder,
                asset,
                debt,
                collateral,
            }));
        }
        if to_cover != 0 || remaining_fund != 0 {
            return Err(EngineError::InvariantViolation("revival did not drain the fund"));
        }
        self.revive(asset, backing)
    }

    fn create_revival_position(
        &mut self,
        borrower: AccountId,
        debt: AssetAmount,
        collateral: i64,
        backing: AssetId,
        mcr: u16,
    ) -> PositionId {
        let id = PositionId(self.next_position_id);
        self.next_position_id += 1;
        self.positions.insert(MarginPosition {
            id,
            borrower,
            collateral,
            debt: debt.amount,
            call_price: Price::call_price(debt, AssetAmount::new(collateral, backing), mcr),
            target_collateral_ratio: None,
        });
        id
    }

    /// Clear settlement state, refund untouched bids, mark the asset live.
    fn revive(&mut self, asset: AssetId, backing: AssetId) -> Result<(), EngineError> {
        let leftover: Vec<BidId> = self.bids.for_asset(backing, asset).map(|b| b.id).collect();
        for id in leftover {
            self.cancel_bid(id)?;
        }
        let state = self.state_mut(asset)?;
        state.settlement_price = None;
        state.settlement_fund = 0;
        self.emit(EventPayload::AssetRevived(AssetRevivedEvent { asset }));
        Ok(())
    }
}
