// 10.3 engine/margin.rs: opening, adjusting and closing debt positions.
// the update itself is easy; the hard rule is the exit check: a position may
// not be left margin-callable, unless the call fills completely on the spot.

use super::core::Engine;
use super::results::EngineError;
use crate::events::{EventPayload, PositionUpdatedEvent};
use crate::ops::UpdateMarginPosition;
use crate::position::MarginPosition;
use crate::price::Price;
use crate::types::{AssetAmount, PositionId, MAX_SHARE_SUPPLY};

impl Engine {
    /// Change a position's debt and collateral by the given deltas. Runs on
    /// a scratch clone: the exit checks can only be made after matching has
    /// already mutated state, and a failed update must leave no trace.
    pub fn update_margin_position(&mut self, op: UpdateMarginPosition) -> Result<(), EngineError> {
        let mut scratch = self.clone();
        scratch.update_margin_position_unchecked(&op)?;
        *self = scratch;
        Ok(())
    }

    fn update_margin_position_unchecked(
        &mut self,
        op: &UpdateMarginPosition,
    ) -> Result<(), EngineError> {
        if op.delta_debt == 0 && op.delta_collateral == 0 {
            return Err(EngineError::InvalidPositionUpdate("nothing to change"));
        }

        let (backing, feed) = {
            let state = self.state(op.asset)?;
            if state.has_settlement() {
                return Err(EngineError::GloballySettled(op.asset));
            }
            let Some(feed) = state.current_feed else {
                return Err(EngineError::NoPriceFeed(op.asset));
            };
            (state.options.backing_asset, feed)
        };

        // debt first: minting credits the borrower, covering burns from
        // their balance
        if op.delta_debt != 0 {
            let state = self.state_mut(op.asset)?;
            if op.delta_debt > 0 && state.current_supply > MAX_SHARE_SUPPLY - op.delta_debt {
                return Err(EngineError::InvalidPositionUpdate("would exceed share supply"));
            }
            state.current_supply += op.delta_debt;
            if op.delta_debt > 0 {
                self.credit(op.account, AssetAmount::new(op.delta_debt, op.asset));
            } else {
                self.debit(op.account, AssetAmount::new(-op.delta_debt, op.asset))?;
            }
        }

        // then collateral: positive deltas escrow, negative ones release
        if op.delta_collateral > 0 {
            self.debit(op.account, AssetAmount::new(op.delta_collateral, backing))?;
        } else if op.delta_collateral < 0 {
            self.credit(op.account, AssetAmount::new(-op.delta_collateral, backing));
        }

        let mcr = feed.maintenance_collateral_ratio;
        let existing = self.positions.find(op.account, op.asset).map(|p| p.id);
        let position_id = match existing {
            None => {
                if op.delta_collateral <= 0 || op.delta_debt <= 0 {
                    return Err(EngineError::InvalidPositionUpdate(
                        "new position needs positive debt and collateral",
                    ));
                }
                let id = PositionId(self.next_position_id);
                self.next_position_id += 1;
                let position = MarginPosition {
                    id,
                    borrower: op.account,
                    collateral: op.delta_collateral,
                    debt: op.delta_debt,
                    call_price: Price::call_price(
                        AssetAmount::new(op.delta_debt, op.asset),
                        AssetAmount::new(op.delta_collateral, backing),
                        mcr,
                    ),
                    target_collateral_ratio: op.target_collateral_ratio,
                };
                self.positions.insert(position);
                id
            }
            Some(id) => {
                let (debt, collateral) = {
                    let position = self
                        .positions
                        .get(id)
                        .ok_or(EngineError::InvariantViolation("position index out of sync"))?;
                    (position.debt, position.collateral)
                };
                let new_debt = debt + op.delta_debt;
                let new_collateral = collateral + op.delta_collateral;
                if new_debt < 0 || new_collateral < 0 {
                    return Err(EngineError::InvalidPositionUpdate(
                        "cannot take more than the position holds",
                    ));
                }
                if new_debt == 0 {
                    if new_collateral != 0 {
                        return Err(EngineError::InvalidPositionUpdate(
                            "must withdraw all collateral when closing",
                        ));
                    }
                    self.positions.remove(id);
                    self.emit(EventPayload::PositionUpdated(PositionUpdatedEvent {
                        position_id: id,
                        borrower: op.account,
                        asset: op.asset,
                        debt: 0,
                        collateral: 0,
                    }));
                    return Ok(());
                }
                if new_collateral == 0 {
                    return Err(EngineError::InvalidPositionUpdate(
                        "debt cannot stand without collateral",
                    ));
                }
                self.positions.update(id, |position| {
                    position.debt = new_debt;
                    position.collateral = new_collateral;
                    position.target_collateral_ratio = op.target_collateral_ratio;
                    position.recompute_call_price(mcr);
                });
                id
            }
        };

        let (debt, collateral) = {
            let position = self
                .positions
                .get(position_id)
                .ok_or(EngineError::InvariantViolation("position index out of sync"))?;
            (position.debt, position.collateral)
        };
        self.emit(EventPayload::PositionUpdated(PositionUpdatedEvent {
            position_id,
            borrower: op.account,
            asset: op.asset,
            debt,
            collateral,
        }));

        // global settlement may never be a side effect of a position update
        let called = self.check_call_orders(op.asset, false, false)?;
        match self.positions.get(position_id) {
            // fully taken by existing orders: allowed
            None => Ok(()),
            Some(position) => {
                if called {
                    return Err(EngineError::UnfilledMarginCall);
                }
                if feed.settlement_price <= position.call_price.invert() {
                    return Err(EngineError::PositionUndercollateralized);
                }
                Ok(())
            }
        }
    }
}
