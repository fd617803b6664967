// 10.1 engine/core.rs: main engine struct. all state lives here: asset
// registry, balances, the four indices, the audit log, the clock.

use super::results::EngineError;
use crate::asset::{BitassetOptions, BitassetState};
use crate::events::{Event, EventId, EventPayload, MedianUpdatedEvent};
use crate::ops::Operation;
use crate::order::{LimitOrder, LimitOrderBook};
use crate::params::ChainParams;
use crate::position::{MarginPosition, PositionIndex};
use crate::price::PriceFeed;
use crate::settlement::{BidSet, CollateralBid, ForceSettlement, SettlementQueue};
use crate::types::{AccountId, AssetAmount, AssetId, OrderId, Timestamp};
use std::collections::{BTreeMap, BTreeSet};

/// Deterministic state machine: same genesis plus same operation log yields
/// byte-identical state and events. Cloning is cheap enough that operations
/// which can only fail after mutating run on a scratch clone.
#[derive(Debug, Clone)]
pub struct Engine {
    pub(super) params: ChainParams,
    pub(super) assets: BTreeMap<AssetId, BitassetState>,
    pub(super) balances: BTreeMap<(AccountId, AssetId), i64>,
    pub(super) orders: LimitOrderBook,
    pub(super) positions: PositionIndex,
    pub(super) settlements: SettlementQueue,
    pub(super) bids: BidSet,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) next_order_id: u64,
    pub(super) next_position_id: u64,
    pub(super) next_settlement_id: u64,
    pub(super) next_bid_id: u64,
    pub(super) current_time: Timestamp,
    pub(super) next_maintenance_time: Timestamp,
}

impl Engine {
    pub fn new(params: ChainParams, genesis: Timestamp) -> Self {
        let next_maintenance_time = genesis.plus_secs(params.maintenance_interval_secs);
        Self {
            params,
            assets: BTreeMap::new(),
            balances: BTreeMap::new(),
            orders: LimitOrderBook::new(),
            positions: PositionIndex::new(),
            settlements: SettlementQueue::new(),
            bids: BidSet::new(),
            events: Vec::new(),
            next_event_id: 1,
            next_order_id: 1,
            next_position_id: 1,
            next_settlement_id: 1,
            next_bid_id: 1,
            current_time: genesis,
            next_maintenance_time,
        }
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    // --- genesis / administration ---

    pub fn register_synthetic(
        &mut self,
        asset: AssetId,
        issuer: AccountId,
        options: BitassetOptions,
    ) -> Result<(), EngineError> {
        if asset == options.backing_asset {
            return Err(EngineError::SameAssets);
        }
        options.validate().map_err(EngineError::InvalidAssetOptions)?;
        if self.assets.contains_key(&asset) {
            return Err(EngineError::DuplicateAsset(asset));
        }
        self.assets.insert(asset, BitassetState::new(asset, issuer, options));
        Ok(())
    }

    /// Replace the authorized producer set. Feeds from removed producers are
    /// pruned and the median recomputed, which can move margin calls.
    pub fn set_feed_producers(
        &mut self,
        asset: AssetId,
        producers: BTreeSet<AccountId>,
    ) -> Result<(), EngineError> {
        let now = self.current_time;
        let state = self.state_mut(asset)?;
        state.feeds.retain(|producer, _| producers.contains(producer));
        state.feed_producers = producers;
        state.update_median_feeds(now);
        let feed = state.current_feed;
        self.emit(EventPayload::MedianUpdated(MedianUpdatedEvent {
            asset,
            feed,
        }));
        self.check_call_orders(asset, true, false)?;
        Ok(())
    }

    /// External funding source for tests and the simulator. Real deployments
    /// would credit balances from transfers outside this engine.
    pub fn deposit(&mut self, account: AccountId, amount: AssetAmount) {
        self.credit(account, amount);
    }

    // --- balances ---

    pub fn balance(&self, account: AccountId, asset: AssetId) -> i64 {
        self.balances.get(&(account, asset)).copied().unwrap_or(0)
    }

    pub(super) fn credit(&mut self, account: AccountId, amount: AssetAmount) {
        debug_assert!(amount.amount >= 0);
        if amount.amount == 0 {
            return;
        }
        *self.balances.entry((account, amount.asset)).or_insert(0) += amount.amount;
    }

    pub(super) fn debit(
        &mut self,
        account: AccountId,
        amount: AssetAmount,
    ) -> Result<(), EngineError> {
        if amount.amount < 0 {
            return Err(EngineError::InvariantViolation("negative debit"));
        }
        if amount.amount == 0 {
            return Ok(());
        }
        let available = self.balance(account, amount.asset);
        if available < amount.amount {
            return Err(EngineError::InsufficientBalance {
                account,
                required: amount,
                available,
            });
        }
        let remaining = available - amount.amount;
        if remaining == 0 {
            self.balances.remove(&(account, amount.asset));
        } else {
            self.balances.insert((account, amount.asset), remaining);
        }
        Ok(())
    }

    // --- asset state access ---

    pub(super) fn state(&self, asset: AssetId) -> Result<&BitassetState, EngineError> {
        self.assets.get(&asset).ok_or(EngineError::UnknownAsset(asset))
    }

    pub(super) fn state_mut(&mut self, asset: AssetId) -> Result<&mut BitassetState, EngineError> {
        self.assets
            .get_mut(&asset)
            .ok_or(EngineError::UnknownAsset(asset))
    }

    // --- events ---

    pub(super) fn emit(&mut self, payload: EventPayload) {
        let id = EventId(self.next_event_id);
        self.next_event_id += 1;
        self.events.push(Event {
            id,
            timestamp: self.current_time,
            payload,
        });
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    // --- operation dispatch ---

    pub fn apply(&mut self, op: Operation) -> Result<(), EngineError> {
        match op {
            Operation::PlaceLimitOrder(op) => self.place_limit_order(op).map(|_| ()),
            Operation::CancelLimitOrder(op) => self.cancel_limit_order(op).map(|_| ()),
            Operation::UpdateMarginPosition(op) => self.update_margin_position(op),
            Operation::PublishPriceFeed(op) => self.publish_price_feed(op),
            Operation::RequestForceSettle(op) => self.request_force_settle(op).map(|_| ()),
            Operation::CancelForceSettle(op) => self.cancel_force_settle(op),
            Operation::TriggerGlobalSettlement(op) => self.trigger_global_settlement(op),
            Operation::BidCollateral(op) => self.bid_collateral(op),
        }
    }

    // --- block hook ---

    /// Advance the clock to a new block time: cancel expired orders, then
    /// run maintenance if its schedule came due.
    pub fn advance_block(&mut self, now: Timestamp) -> Result<(), EngineError> {
        self.current_time = now;
        for id in self.orders.expired(now) {
            self.cancel_order(id, crate::events::CancelReason::Expired)?;
        }
        if now >= self.next_maintenance_time {
            self.run_maintenance(now)?;
            let interval = self.params.maintenance_interval_secs;
            let behind = (now.as_secs() - self.next_maintenance_time.as_secs()) / interval;
            self.next_maintenance_time = self
                .next_maintenance_time
                .plus_secs((behind + 1) * interval);
        }
        Ok(())
    }

    fn run_maintenance(&mut self, now: Timestamp) -> Result<(), EngineError> {
        let assets: Vec<AssetId> = self.assets.keys().copied().collect();

        // stale medians first so everything downstream sees fresh prices
        for &asset in &assets {
            let needs_sweep = {
                let state = self.state(asset)?;
                state.feed_is_expired(now)
            };
            if needs_sweep {
                let state = self.state_mut(asset)?;
                state.update_median_feeds(now);
                let feed = state.current_feed;
                self.emit(EventPayload::MedianUpdated(MedianUpdatedEvent {
                    asset,
                    feed,
                }));
                self.check_call_orders(asset, true, false)?;
            }
            self.state_mut(asset)?.force_settled_volume = 0;
        }

        self.process_settlements(now)?;

        for &asset in &assets {
            if self.state(asset)?.has_settlement() {
                self.process_bids_and_revive(asset)?;
            }
        }
        Ok(())
    }

    // --- query surface ---

    pub fn synthetic(&self, asset: AssetId) -> Option<&BitassetState> {
        self.assets.get(&asset)
    }

    pub fn current_feed(&self, asset: AssetId) -> Option<PriceFeed> {
        self.assets.get(&asset).and_then(|s| s.current_feed)
    }

    pub fn order(&self, id: OrderId) -> Option<&LimitOrder> {
        self.orders.get(id)
    }

    /// Best-priced resting order selling `sell` for `receive`.
    pub fn best_order(&self, sell: AssetId, receive: AssetId) -> Option<&LimitOrder> {
        self.orders.best(sell, receive)
    }

    /// All resting orders selling `sell` for `receive`, best first.
    pub fn order_book(&self, sell: AssetId, receive: AssetId) -> Vec<&LimitOrder> {
        use crate::price::Price;
        self.orders
            .range(
                Price::upper_bound(sell, receive),
                Price::lower_bound(sell, receive),
            )
            .collect()
    }

    pub fn position(&self, account: AccountId, asset: AssetId) -> Option<&MarginPosition> {
        self.positions.find(account, asset)
    }

    /// Margin positions for the asset, weakest collateralization first.
    pub fn margin_positions(&self, asset: AssetId) -> Vec<&MarginPosition> {
        match self.assets.get(&asset) {
            Some(state) => self
                .positions
                .by_collateralization(state.options.backing_asset, asset)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Queued settlement requests for the asset, FIFO.
    pub fn pending_settlements(&self, asset: AssetId) -> Vec<&ForceSettlement> {
        self.settlements.for_asset(asset).collect()
    }

    /// Open collateral bids for the asset, best first.
    pub fn collateral_bids(&self, asset: AssetId) -> Vec<&CollateralBid> {
        match self.assets.get(&asset) {
            Some(state) => self
                .bids
                .for_asset(state.options.backing_asset, asset)
                .collect(),
            None => Vec::new(),
        }
    }
}
