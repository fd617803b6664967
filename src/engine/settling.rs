// 10.5 engine/settling.rs: forced settlement. requests escrow the synthetic
// and mature after the asset's delay; once per maintenance interval the
// matured queue converts against the weakest positions at the feed price
// minus the offset, throttled by the per-interval volume cap. a globally
// settled asset instead redeems instantly from the settlement fund.

use super::core::Engine;
use super::results::{EngineError, SettleOutcome};
use crate::events::{
    AssetSettledEvent, EventPayload, FillEvent, OrderRef, SettleCancelReason,
    SettlementCanceledEvent, SettlementRequestedEvent,
};
use crate::ops::{CancelForceSettle, RequestForceSettle};
use crate::price::Price;
use crate::settlement::ForceSettlement;
use crate::types::{AssetAmount, AssetId, SettlementId, Timestamp, PERCENT_100};

/// Why a queue run stopped working on one asset.
enum SettleStop {
    /// Volume cap reached or queue drained.
    Done,
    /// The next fill would have consumed a position's whole collateral.
    ImminentSwan,
}

impl Engine {
    pub fn request_force_settle(
        &mut self,
        op: RequestForceSettle,
    ) -> Result<SettleOutcome, EngineError> {
        if op.amount.amount <= 0 {
            return Err(EngineError::InvalidAmount);
        }
        if op.amount.amount < self.params.min_force_settle_amount {
            return Err(EngineError::BelowMinimumSettleAmount(
                self.params.min_force_settle_amount,
            ));
        }
        let (backing, delay, settled) = {
            let state = self.state(op.amount.asset)?;
            (
                state.options.backing_asset,
                state.options.force_settlement_delay_secs,
                state.has_settlement(),
            )
        };
        self.debit(op.account, op.amount)?;

        if settled {
            // instant redemption from the settlement fund at the recorded
            // price; the last redeemer takes the whole remaining fund so no
            // dust is stranded
            let (fund, supply, price) = {
                let state = self.state(op.amount.asset)?;
                let price = state
                    .settlement_price
                    .ok_or(EngineError::InvariantViolation("settled without price"))?;
                (state.settlement_fund, state.current_supply, price)
            };
            if op.amount.amount > supply {
                return Err(EngineError::InvariantViolation("supply drained below balance"));
            }
            let receives = if op.amount.amount == supply {
                AssetAmount::new(fund, backing)
            } else {
                op.amount.multiply(&price)?
            };
            let state = self.state_mut(op.amount.asset)?;
            state.settlement_fund -= receives.amount;
            state.current_supply -= op.amount.amount;
            if state.settlement_fund < 0 {
                return Err(EngineError::InvariantViolation("settlement fund overdrawn"));
            }
            self.credit(op.account, receives);
            self.emit(EventPayload::AssetSettled(AssetSettledEvent {
                account: op.account,
                pays: op.amount,
                receives,
            }));
            return Ok(SettleOutcome::Instant(receives));
        }

        let id = SettlementId(self.next_settlement_id);
        self.next_settlement_id += 1;
        let settlement_date = self.current_time.plus_secs(delay);
        self.settlements.insert(ForceSettlement {
            id,
            owner: op.account,
            balance: op.amount,
            settlement_date,
        });
        self.emit(EventPayload::SettlementRequested(SettlementRequestedEvent {
            settlement_id: id,
            owner: op.account,
            amount: op.amount,
            settlement_date,
        }));
        Ok(SettleOutcome::Queued(id))
    }

    pub fn cancel_force_settle(&mut self, op: CancelForceSettle) -> Result<(), EngineError> {
        let (owner, settlement_date) = {
            let settlement = self
                .settlements
                .get(op.settlement_id)
                .ok_or(EngineError::UnknownSettlement(op.settlement_id))?;
            (settlement.owner, settlement.settlement_date)
        };
        if owner != op.account {
            return Err(EngineError::NotOwner(op.account));
        }
        // a matured request is committed: it fills (or caps out) in queue
        // order and may not back out after seeing the price move
        if self.current_time >= settlement_date {
            return Err(EngineError::SettlementMatured(op.settlement_id));
        }
        self.cancel_settlement(op.settlement_id, SettleCancelReason::UserRequested)
    }

    pub(super) fn cancel_settlement(
        &mut self,
        id: SettlementId,
        reason: SettleCancelReason,
    ) -> Result<(), EngineError> {
        let settlement = self
            .settlements
            .remove(id)
            .ok_or(EngineError::UnknownSettlement(id))?;
        self.credit(settlement.owner, settlement.balance);
        self.emit(EventPayload::SettlementCanceled(SettlementCanceledEvent {
            settlement_id: id,
            owner: settlement.owner,
            refund: settlement.balance,
            reason,
        }));
        Ok(())
    }

    /// Maintenance entry point: work each asset's matured queue.
    pub(super) fn process_settlements(&mut self, now: Timestamp) -> Result<(), EngineError> {
        for asset in self.settlements.assets() {
            self.process_asset_settlements(asset, now)?;
        }
        Ok(())
    }

    fn process_asset_settlements(
        &mut self,
        asset: AssetId,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        let (backing, offset, max_delay, settled, feed) = {
            let state = self.state(asset)?;
            (
                state.options.backing_asset,
                state.options.force_settlement_offset_percent,
                state.options.force_settlement_max_delay_secs,
                state.has_settlement(),
                state.current_feed,
            )
        };

        if settled {
            // requests queued before the global settlement are returned;
            // their owners can re-request for instant redemption
            let queued: Vec<SettlementId> =
                self.settlements.for_asset(asset).map(|s| s.id).collect();
            for id in queued {
                self.cancel_settlement(id, SettleCancelReason::GloballySettled)?;
            }
            return Ok(());
        }
        let Some(feed) = feed else {
            // no price: requests stay queued until the feed returns or they
            // hit their maximum delay
            let overdue: Vec<SettlementId> = self
                .settlements
                .for_asset(asset)
                .filter(|s| s.settlement_date.plus_secs(max_delay) <= now)
                .map(|s| s.id)
                .collect();
            for id in overdue {
                self.cancel_settlement(id, SettleCancelReason::MaxDelayExceeded)?;
            }
            return Ok(());
        };

        loop {
            let Some(next) = self.settlements.next_matured(asset, now) else {
                break;
            };
            let settlement_id = next.id;
            let balance = next.balance;
            if next.settlement_date.plus_secs(max_delay) <= now {
                self.cancel_settlement(settlement_id, SettleCancelReason::MaxDelayExceeded)?;
                continue;
            }

            let (max_volume, settled_so_far) = {
                let state = self.state(asset)?;
                (state.max_force_settlement_volume(), state.force_settled_volume)
            };
            if settled_so_far >= max_volume {
                break;
            }
            let max_settlement = AssetAmount::new(max_volume - settled_so_far, asset);

            // effective price: feed, worsened by the offset. receives may
            // floor to zero; the request still executes at that price.
            let receives_at_feed = balance.multiply(&feed.settlement_price)?;
            let discounted = (receives_at_feed.amount as i128
                * (PERCENT_100 - offset) as i128
                / PERCENT_100 as i128) as i64;
            let settlement_price =
                Price::new(balance, AssetAmount::new(discounted, backing));

            match self.match_call_settle(asset, backing, settlement_id, settlement_price, max_settlement)? {
                SettleStop::Done => continue,
                SettleStop::ImminentSwan => {
                    self.cancel_settlement(
                        settlement_id,
                        SettleCancelReason::ImminentGlobalSettlement,
                    )?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Fill one settlement request against the weakest position.
    fn match_call_settle(
        &mut self,
        asset: AssetId,
        backing: AssetId,
        settlement_id: SettlementId,
        settlement_price: Price,
        max_settlement: AssetAmount,
    ) -> Result<SettleStop, EngineError> {
        let Some(position) = self.positions.by_collateralization(backing, asset).next() else {
            return Ok(SettleStop::Done);
        };
        let position_id = position.id;
        let position_debt = position.debt;
        let position_collateral = position.collateral;

        let balance = self
            .settlements
            .get(settlement_id)
            .ok_or(EngineError::UnknownSettlement(settlement_id))?
            .balance;

        let call_receives = balance.amount.min(max_settlement.amount).min(position_debt);
        if call_receives <= 0 {
            return Ok(SettleStop::Done);
        }
        let call_receives = AssetAmount::new(call_receives, asset);
        let call_pays = call_receives.multiply(&settlement_price)?;

        // the settlement path never empties a position's collateral; that is
        // the market's job via global settlement
        if call_pays.amount >= position_collateral {
            return Ok(SettleStop::ImminentSwan);
        }

        self.fill_call_order(position_id, call_pays, call_receives, settlement_price, true)?;
        self.fill_settle_order(settlement_id, call_receives, call_pays, settlement_price)?;

        self.state_mut(asset)?.force_settled_volume += call_receives.amount;
        Ok(SettleStop::Done)
    }

    /// Pay out one side of a fill on a settlement request.
    fn fill_settle_order(
        &mut self,
        id: SettlementId,
        pays: AssetAmount,
        receives: AssetAmount,
        fill_price: Price,
    ) -> Result<(), EngineError> {
        let (owner, balance) = {
            let settlement = self
                .settlements
                .get(id)
                .ok_or(EngineError::UnknownSettlement(id))?;
            (settlement.owner, settlement.balance.amount)
        };
        if pays.amount <= 0 || pays.amount > balance {
            return Err(EngineError::InvariantViolation("bad settle fill amounts"));
        }
        self.credit(owner, receives);
        self.emit(EventPayload::Fill(FillEvent {
            order: OrderRef::Settlement(id),
            account: owner,
            pays,
            receives,
            fill_price,
            is_maker: false,
        }));
        if pays.amount == balance {
            self.settlements.remove(id);
        } else {
            self.settlements
                .reduce(id, pays.amount)
                .ok_or(EngineError::UnknownSettlement(id))?;
        }
        Ok(())
    }
}
