// 10.2 engine/matching.rs: the matching core. limit orders match limit
// orders at the maker's price; callable margin positions match limit orders
// selling the debt asset, squeezed between the short-squeeze cap and the
// call trigger. all rounding floors on the multiplied side, and a fill that
// would hand out zero for a nonzero payment is never executed: the starved
// order is culled instead.

use super::core::Engine;
use super::results::{EngineError, OrderOutcome};
use crate::events::{
    CancelReason, EventPayload, FillEvent, OrderCanceledEvent, OrderPlacedEvent, OrderRef,
};
use crate::ops::{CancelLimitOrder, PlaceLimitOrder};
use crate::order::LimitOrder;
use crate::price::Price;
use crate::types::{AssetAmount, AssetId, OrderId, PositionId};

/// Outcome of matching a taker against one maker.
enum LimitMatch {
    /// Maker fully consumed; the taker may keep walking the book.
    MakerFilled,
    /// Taker exhausted (filled or culled); stop.
    TakerDone,
}

impl Engine {
    pub fn place_limit_order(&mut self, op: PlaceLimitOrder) -> Result<OrderOutcome, EngineError> {
        if op.amount_to_sell.amount <= 0 || op.min_to_receive.amount <= 0 {
            return Err(EngineError::InvalidAmount);
        }
        if op.amount_to_sell.asset == op.min_to_receive.asset {
            return Err(EngineError::SameAssets);
        }
        if op.expiration < self.current_time {
            return Err(EngineError::ExpirationInPast);
        }
        if op.fill_or_kill {
            // all-or-nothing: run on a scratch copy, commit only if nothing
            // of the order is left resting
            let mut scratch = self.clone();
            let outcome = scratch.place_limit_order_unchecked(&op)?;
            if !outcome.completed {
                return Err(EngineError::FillOrKillUnfilled);
            }
            *self = scratch;
            Ok(outcome)
        } else {
            self.place_limit_order_unchecked(&op)
        }
    }

    fn place_limit_order_unchecked(
        &mut self,
        op: &PlaceLimitOrder,
    ) -> Result<OrderOutcome, EngineError> {
        self.debit(op.seller, op.amount_to_sell)?;
        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;
        let order = LimitOrder {
            id,
            seller: op.seller,
            for_sale: op.amount_to_sell.amount,
            sell_price: op.sell_price(),
            expiration: op.expiration,
        };
        self.emit(EventPayload::OrderPlaced(OrderPlacedEvent {
            order_id: id,
            seller: op.seller,
            for_sale: op.amount_to_sell,
            sell_price: order.sell_price,
        }));
        self.orders.insert(order);

        let completed = self.apply_order(id)?;
        let remaining = self.orders.get(id).map(|o| o.for_sale).unwrap_or(0);
        Ok(OrderOutcome {
            order_id: id,
            remaining,
            completed,
        })
    }

    pub fn cancel_limit_order(&mut self, op: CancelLimitOrder) -> Result<AssetAmount, EngineError> {
        let order = self
            .orders
            .get(op.order_id)
            .ok_or(EngineError::UnknownOrder(op.order_id))?;
        if order.seller != op.account {
            return Err(EngineError::NotOwner(op.account));
        }
        let order = self.cancel_order(op.order_id, CancelReason::UserRequested)?;
        Ok(order.amount_for_sale())
    }

    /// Remove an order and refund its remainder.
    pub(super) fn cancel_order(
        &mut self,
        id: OrderId,
        reason: CancelReason,
    ) -> Result<LimitOrder, EngineError> {
        let order = self.orders.remove(id).ok_or(EngineError::UnknownOrder(id))?;
        let refund = order.amount_for_sale();
        self.credit(order.seller, refund);
        self.emit(EventPayload::OrderCanceled(OrderCanceledEvent {
            order_id: id,
            seller: order.seller,
            refund,
            reason,
        }));
        Ok(order)
    }

    /// Take a freshly inserted order through margin calls and the opposite
    /// book. Returns true when nothing of it is left resting.
    fn apply_order(&mut self, id: OrderId) -> Result<bool, EngineError> {
        let (sell_asset, receive_asset, sell_price) = {
            let order = self.orders.get(id).ok_or(EngineError::UnknownOrder(id))?;
            (order.sell_asset(), order.receive_asset(), order.sell_price)
        };

        // margin calls on either asset may take the new order first; the
        // call side is maker here
        let mut called_some = self.check_call_orders(sell_asset, true, true)?;
        called_some |= self.check_call_orders(receive_asset, true, true)?;
        if called_some && self.orders.get(id).is_none() {
            return Ok(true);
        }

        // cheapest counter price we accept: our own price seen from the
        // other side
        let floor = sell_price.invert();
        let ceiling = Price::upper_bound(receive_asset, sell_asset);
        loop {
            if self.orders.get(id).is_none() {
                return Ok(true);
            }
            let maker_id = match self.orders.range(ceiling, floor).next() {
                Some(maker) => maker.id,
                None => break,
            };
            match self.match_limit_limit(id, maker_id)? {
                LimitMatch::MakerFilled => continue,
                LimitMatch::TakerDone => break,
            }
        }

        // the fills above may have moved prices enough to free margin calls;
        // this time the call side is taker
        self.check_call_orders(sell_asset, true, false)?;
        self.check_call_orders(receive_asset, true, false)?;

        match self.orders.get(id) {
            Some(_) => self.maybe_cull_small(id),
            None => Ok(true),
        }
    }

    /// One fill at the maker's price. The smaller notional side is consumed
    /// whole; the multiplied side floors.
    fn match_limit_limit(
        &mut self,
        taker_id: OrderId,
        maker_id: OrderId,
    ) -> Result<LimitMatch, EngineError> {
        let (taker_for_sale, taker_sell_asset) = {
            let taker = self
                .orders
                .get(taker_id)
                .ok_or(EngineError::UnknownOrder(taker_id))?;
            (taker.for_sale, taker.sell_asset())
        };
        let (maker_for_sale, match_price) = {
            let maker = self
                .orders
                .get(maker_id)
                .ok_or(EngineError::UnknownOrder(maker_id))?;
            (maker.for_sale, maker.sell_price)
        };

        let maker_amount = AssetAmount::new(maker_for_sale, match_price.base.asset);
        let maker_for_sale_in_taker_units = maker_amount.multiply(&match_price)?;

        let taker_pays;
        let taker_receives;
        if taker_for_sale <= maker_for_sale_in_taker_units.amount {
            taker_pays = AssetAmount::new(taker_for_sale, taker_sell_asset);
            taker_receives = taker_pays.multiply(&match_price)?;
        } else {
            taker_receives = maker_amount;
            taker_pays = maker_for_sale_in_taker_units;
        }

        if taker_receives.amount == 0 {
            // priced to cross but rounds to nothing; no transfer happens and
            // the taker remainder is thrown out
            self.cancel_order(taker_id, CancelReason::Culled)?;
            return Ok(LimitMatch::TakerDone);
        }

        let maker_pays = taker_receives;
        let maker_receives = taker_pays;

        self.fill_limit_order(taker_id, taker_pays, taker_receives, false, match_price, false)?;
        let maker_removed =
            self.fill_limit_order(maker_id, maker_pays, maker_receives, true, match_price, true)?;

        if maker_removed {
            Ok(LimitMatch::MakerFilled)
        } else {
            Ok(LimitMatch::TakerDone)
        }
    }

    /// Pay out one side of a fill on a limit order. Removes the order when
    /// it pays its whole remainder; otherwise shrinks it and, if requested,
    /// culls a remainder that can no longer receive a whole unit.
    pub(super) fn fill_limit_order(
        &mut self,
        id: OrderId,
        pays: AssetAmount,
        receives: AssetAmount,
        cull_if_small: bool,
        fill_price: Price,
        is_maker: bool,
    ) -> Result<bool, EngineError> {
        let (seller, for_sale) = {
            let order = self.orders.get(id).ok_or(EngineError::UnknownOrder(id))?;
            (order.seller, order.for_sale)
        };
        if pays.amount <= 0 || pays.amount > for_sale || receives.amount < 0 {
            return Err(EngineError::InvariantViolation("bad limit fill amounts"));
        }
        self.credit(seller, receives);
        self.emit(EventPayload::Fill(FillEvent {
            order: OrderRef::Limit(id),
            account: seller,
            pays,
            receives,
            fill_price,
            is_maker,
        }));
        if pays.amount == for_sale {
            self.orders.remove(id);
            Ok(true)
        } else {
            self.orders
                .reduce(id, pays.amount)
                .ok_or(EngineError::UnknownOrder(id))?;
            if cull_if_small {
                self.maybe_cull_small(id)
            } else {
                Ok(false)
            }
        }
    }

    /// Cancel an order whose remainder rounds to zero at its own price.
    pub(super) fn maybe_cull_small(&mut self, id: OrderId) -> Result<bool, EngineError> {
        let receives = {
            let order = self.orders.get(id).ok_or(EngineError::UnknownOrder(id))?;
            order.amount_to_receive()?
        };
        if receives.amount == 0 {
            self.cancel_order(id, CancelReason::Culled)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Pay out one side of a fill on a margin position: the position gives
    /// up collateral and retires debt. Closes the position when the debt
    /// reaches zero, returning leftover collateral to the borrower.
    pub(super) fn fill_call_order(
        &mut self,
        id: PositionId,
        pays: AssetAmount,
        receives: AssetAmount,
        fill_price: Price,
        is_maker: bool,
    ) -> Result<bool, EngineError> {
        let (borrower, debt, collateral, debt_asset, collateral_asset) = {
            let position = self
                .positions
                .get(id)
                .ok_or(EngineError::InvariantViolation("position disappeared"))?;
            (
                position.borrower,
                position.debt,
                position.collateral,
                position.debt_asset(),
                position.collateral_asset(),
            )
        };
        if receives.asset != debt_asset
            || pays.asset != collateral_asset
            || receives.amount <= 0
            || receives.amount > debt
            || pays.amount < 0
            || pays.amount > collateral
        {
            return Err(EngineError::InvariantViolation("bad call fill amounts"));
        }

        // retired debt leaves circulation
        let state = self.state_mut(debt_asset)?;
        state.current_supply -= receives.amount;

        self.emit(EventPayload::Fill(FillEvent {
            order: OrderRef::Margin(id),
            account: borrower,
            pays,
            receives,
            fill_price,
            is_maker,
        }));

        if receives.amount == debt {
            let freed = AssetAmount::new(collateral - pays.amount, collateral_asset);
            self.positions.remove(id);
            self.credit(borrower, freed);
            Ok(true)
        } else {
            let mcr = self
                .state(debt_asset)?
                .current_feed
                .map(|f| f.maintenance_collateral_ratio);
            self.positions.update(id, |position| {
                position.debt -= receives.amount;
                position.collateral -= pays.amount;
                if let Some(mcr) = mcr {
                    position.recompute_call_price(mcr);
                }
            });
            Ok(false)
        }
    }

    /// Match callable margin positions against limit orders selling the
    /// debt asset. Returns true when anything was margin called.
    pub(super) fn check_call_orders(
        &mut self,
        asset: AssetId,
        enable_black_swan: bool,
        for_new_limit_order: bool,
    ) -> Result<bool, EngineError> {
        let Some(state) = self.assets.get(&asset) else {
            return Ok(false);
        };
        if state.has_settlement() {
            return Ok(false);
        }
        let Some(feed) = state.current_feed else {
            return Ok(false);
        };
        let backing = state.options.backing_asset;

        if self.check_for_blackswan(asset, enable_black_swan)? {
            return Ok(false);
        }

        // looking for limit orders selling the most debt for the least
        // collateral; stop at the short squeeze cap
        let ceiling = Price::upper_bound(asset, backing);
        let floor = feed.max_short_squeeze_price();

        let mut margin_called = false;
        loop {
            if self.check_for_blackswan(asset, enable_black_swan)? {
                break;
            }
            let Some(position) = self.positions.by_call_price(backing, asset).next() else {
                break;
            };
            let position = position.clone();
            let trigger = position.call_price.invert();

            // feed protected: the weakest position is above water
            if feed.settlement_price > trigger {
                return Ok(margin_called);
            }

            let Some(limit) = self.orders.range(ceiling, floor).next() else {
                return Ok(margin_called);
            };
            let limit_id = limit.id;
            let match_price = limit.sell_price;
            let limit_for_sale = limit.for_sale;

            // would be margin called, but no order is priced to take it
            if match_price > trigger {
                return Ok(margin_called);
            }

            margin_called = true;

            let position_id = position.id;
            let full_debt = position.debt;
            let collateral = position.collateral;
            let max_cover = position.max_debt_to_cover(&match_price, &feed)?;

            // if even full liquidation at this price cannot cover the debt,
            // the whole asset goes down instead
            let full_cover = AssetAmount::new(full_debt, asset).multiply(&match_price)?;
            if full_cover.amount > collateral {
                if !enable_black_swan {
                    return Err(EngineError::WouldTriggerGlobalSettlement);
                }
                let price = self.global_settlement_price(asset)?;
                self.globally_settle(asset, price)?;
                return Ok(true);
            }

            let debt_to_buy = full_debt.min(max_cover);
            let call_receives = AssetAmount::new(debt_to_buy.min(limit_for_sale), asset);
            let order_receives = call_receives.multiply(&match_price)?;

            if order_receives.amount == 0 {
                // would hand the order nothing for something; leave the dust
                // position alone until prices move
                return Ok(margin_called);
            }

            // the call gives up collateral, the order gives up debt
            self.fill_call_order(
                position_id,
                order_receives,
                call_receives,
                match_price,
                for_new_limit_order,
            )?;
            self.fill_limit_order(
                limit_id,
                call_receives,
                order_receives,
                true,
                match_price,
                !for_new_limit_order,
            )?;
        }
        Ok(margin_called)
    }
}
