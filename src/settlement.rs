// 6.0: forced settlement requests and post-settlement collateral bids.
// requests queue FIFO per asset and mature after the asset's delay; bids
// only exist while an asset sits in global settlement.

use crate::price::Price;
use crate::types::{AccountId, AssetAmount, AssetId, BidId, SettlementId, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Escrowed synthetic waiting to be converted to collateral on or after
/// `settlement_date`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceSettlement {
    pub id: SettlementId,
    pub owner: AccountId,
    pub balance: AssetAmount,
    pub settlement_date: Timestamp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementQueue {
    entries: BTreeMap<SettlementId, ForceSettlement>,
    by_maturity: BTreeSet<(AssetId, Timestamp, SettlementId)>,
}

impl SettlementQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, settlement: ForceSettlement) {
        self.by_maturity.insert((
            settlement.balance.asset,
            settlement.settlement_date,
            settlement.id,
        ));
        self.entries.insert(settlement.id, settlement);
    }

    pub fn remove(&mut self, id: SettlementId) -> Option<ForceSettlement> {
        let settlement = self.entries.remove(&id)?;
        self.by_maturity.remove(&(
            settlement.balance.asset,
            settlement.settlement_date,
            id,
        ));
        Some(settlement)
    }

    pub fn get(&self, id: SettlementId) -> Option<&ForceSettlement> {
        self.entries.get(&id)
    }

    pub fn reduce(&mut self, id: SettlementId, pays: i64) -> Option<i64> {
        let settlement = self.entries.get_mut(&id)?;
        settlement.balance.amount -= pays;
        Some(settlement.balance.amount)
    }

    /// Oldest request for the asset that has matured by `now`.
    pub fn next_matured(&self, asset: AssetId, now: Timestamp) -> Option<&ForceSettlement> {
        self.for_asset(asset)
            .next()
            .filter(|s| s.settlement_date <= now)
    }

    /// All requests for the asset in maturity (FIFO) order.
    pub fn for_asset(&self, asset: AssetId) -> impl Iterator<Item = &ForceSettlement> + '_ {
        let lo = Bound::Included((asset, Timestamp(i64::MIN), SettlementId(0)));
        let hi = Bound::Included((asset, Timestamp::MAX, SettlementId(u64::MAX)));
        self.by_maturity
            .range((lo, hi))
            .filter_map(move |(_, _, id)| self.entries.get(id))
    }

    /// Assets that currently have at least one queued request.
    pub fn assets(&self) -> Vec<AssetId> {
        let mut assets: Vec<AssetId> = self.by_maturity.iter().map(|(a, _, _)| *a).collect();
        assets.dedup();
        assets
    }
}

/// An open bid to take over a slice of a globally settled asset's debt in
/// exchange for the matching slice of the settlement fund. `bid` is
/// additional collateral / debt covered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralBid {
    pub id: BidId,
    pub bidder: AccountId,
    pub bid: Price,
}

impl CollateralBid {
    pub fn additional_collateral(&self) -> AssetAmount {
        self.bid.base
    }

    pub fn debt_covered(&self) -> AssetAmount {
        self.bid.quote
    }

    pub fn debt_asset(&self) -> AssetId {
        self.bid.quote.asset
    }
}

// 6.1: best bid first: most additional collateral per unit of debt covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct BidKey {
    price: Price,
    id: BidId,
}

impl Ord for BidKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .price
            .cmp(&self.price)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for BidKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BidSet {
    bids: BTreeMap<BidId, CollateralBid>,
    by_price: BTreeSet<BidKey>,
    by_account: BTreeMap<(AssetId, AccountId), BidId>,
}

impl BidSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bids.len()
    }

    pub fn insert(&mut self, bid: CollateralBid) {
        self.by_price.insert(BidKey {
            price: bid.bid,
            id: bid.id,
        });
        self.by_account
            .insert((bid.debt_asset(), bid.bidder), bid.id);
        self.bids.insert(bid.id, bid);
    }

    pub fn remove(&mut self, id: BidId) -> Option<CollateralBid> {
        let bid = self.bids.remove(&id)?;
        self.by_price.remove(&BidKey {
            price: bid.bid,
            id,
        });
        self.by_account.remove(&(bid.debt_asset(), bid.bidder));
        Some(bid)
    }

    pub fn get(&self, id: BidId) -> Option<&CollateralBid> {
        self.bids.get(&id)
    }

    pub fn find(&self, asset: AssetId, bidder: AccountId) -> Option<&CollateralBid> {
        let id = self.by_account.get(&(asset, bidder))?;
        self.bids.get(id)
    }

    /// Bids on the asset, best (highest collateral per debt) first.
    pub fn for_asset(
        &self,
        collateral: AssetId,
        debt: AssetId,
    ) -> impl Iterator<Item = &CollateralBid> + '_ {
        let lo = Bound::Included(BidKey {
            price: Price::upper_bound(collateral, debt),
            id: BidId(0),
        });
        let hi = Bound::Included(BidKey {
            price: Price::lower_bound(collateral, debt),
            id: BidId(u64::MAX),
        });
        self.by_price
            .range((lo, hi))
            .filter_map(move |key| self.bids.get(&key.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USD: AssetId = AssetId(1);
    const CORE: AssetId = AssetId(0);

    fn settlement(id: u64, owner: u64, amount: i64, date: i64) -> ForceSettlement {
        ForceSettlement {
            id: SettlementId(id),
            owner: AccountId(owner),
            balance: AssetAmount::new(amount, USD),
            settlement_date: Timestamp::from_secs(date),
        }
    }

    #[test]
    fn queue_is_fifo_per_asset() {
        let mut queue = SettlementQueue::new();
        queue.insert(settlement(2, 1, 10, 100));
        queue.insert(settlement(1, 2, 10, 100));
        queue.insert(settlement(3, 3, 10, 50));

        let order: Vec<_> = queue.for_asset(USD).map(|s| s.id.0).collect();
        assert_eq!(order, vec![3, 1, 2]);

        assert!(queue.next_matured(USD, Timestamp::from_secs(40)).is_none());
        assert_eq!(
            queue
                .next_matured(USD, Timestamp::from_secs(60))
                .map(|s| s.id.0),
            Some(3)
        );
    }

    #[test]
    fn bids_rank_by_collateral_per_debt() {
        let mut bids = BidSet::new();
        let bid = |id: u64, bidder: u64, collateral: i64, debt: i64| CollateralBid {
            id: BidId(id),
            bidder: AccountId(bidder),
            bid: Price::new(
                AssetAmount::new(collateral, CORE),
                AssetAmount::new(debt, USD),
            ),
        };
        bids.insert(bid(1, 1, 100, 50));
        bids.insert(bid(2, 2, 100, 20));
        bids.insert(bid(3, 3, 100, 80));

        let order: Vec<_> = bids.for_asset(CORE, USD).map(|b| b.id.0).collect();
        assert_eq!(order, vec![2, 1, 3]);
        assert_eq!(bids.find(USD, AccountId(2)).map(|b| b.id.0), Some(2));
    }
}
