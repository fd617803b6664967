// 3.0: resting limit orders and the book that indexes them. the book is an
// arena (id -> order) plus explicit ordered key sets, so every iteration
// order is total and survives serialization round trips.

use crate::price::{Price, PriceError};
use crate::types::{market_pair, AccountId, AssetAmount, AssetId, OrderId, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// An offer to sell `for_sale` of the price's base asset at `sell_price`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrder {
    pub id: OrderId,
    pub seller: AccountId,
    /// Remaining amount, denominated in sell_price.base.asset.
    pub for_sale: i64,
    pub sell_price: Price,
    pub expiration: Timestamp,
}

impl LimitOrder {
    pub fn sell_asset(&self) -> AssetId {
        self.sell_price.base.asset
    }

    pub fn receive_asset(&self) -> AssetId {
        self.sell_price.quote.asset
    }

    pub fn market(&self) -> (AssetId, AssetId) {
        market_pair(self.sell_asset(), self.receive_asset())
    }

    pub fn amount_for_sale(&self) -> AssetAmount {
        AssetAmount::new(self.for_sale, self.sell_asset())
    }

    pub fn amount_to_receive(&self) -> Result<AssetAmount, PriceError> {
        self.amount_for_sale().multiply(&self.sell_price)
    }
}

// 3.1: price-ordered key. best (highest) price first within a pair, then
// oldest id, so price-time priority falls straight out of BTree iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceKey {
    pub price: Price,
    pub id: OrderId,
}

impl Ord for PriceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .price
            .cmp(&self.price)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for PriceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitOrderBook {
    orders: BTreeMap<OrderId, LimitOrder>,
    by_price: BTreeSet<PriceKey>,
    by_expiration: BTreeSet<(Timestamp, OrderId)>,
}

impl LimitOrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn insert(&mut self, order: LimitOrder) {
        self.by_price.insert(PriceKey {
            price: order.sell_price,
            id: order.id,
        });
        self.by_expiration.insert((order.expiration, order.id));
        self.orders.insert(order.id, order);
    }

    pub fn remove(&mut self, id: OrderId) -> Option<LimitOrder> {
        let order = self.orders.remove(&id)?;
        self.by_price.remove(&PriceKey {
            price: order.sell_price,
            id,
        });
        self.by_expiration.remove(&(order.expiration, id));
        Some(order)
    }

    pub fn get(&self, id: OrderId) -> Option<&LimitOrder> {
        self.orders.get(&id)
    }

    /// Shrink an order in place after a partial fill. The price key does not
    /// move, only the remaining amount changes.
    pub fn reduce(&mut self, id: OrderId, pays: i64) -> Option<i64> {
        let order = self.orders.get_mut(&id)?;
        order.for_sale -= pays;
        Some(order.for_sale)
    }

    /// Orders in the price window [floor, ceiling], best (highest) first.
    /// Both bounds must be quoted for the same sell/receive pair.
    pub fn range(&self, ceiling: Price, floor: Price) -> impl Iterator<Item = &LimitOrder> + '_ {
        let lo = Bound::Included(PriceKey {
            price: ceiling,
            id: OrderId(0),
        });
        let hi = Bound::Included(PriceKey {
            price: floor,
            id: OrderId(u64::MAX),
        });
        self.by_price
            .range((lo, hi))
            .filter_map(move |key| self.orders.get(&key.id))
    }

    /// Best-priced order selling `base` for `quote`, if any.
    pub fn best(&self, base: AssetId, quote: AssetId) -> Option<&LimitOrder> {
        self.range(
            Price::upper_bound(base, quote),
            Price::lower_bound(base, quote),
        )
        .next()
    }

    pub fn expired(&self, now: Timestamp) -> Vec<OrderId> {
        self.by_expiration
            .range(..=(now, OrderId(u64::MAX)))
            .map(|(_, id)| *id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LimitOrder> {
        self.orders.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USD: AssetId = AssetId(1);
    const CORE: AssetId = AssetId(0);

    fn order(id: u64, for_sale: i64, base: i64, quote: i64) -> LimitOrder {
        LimitOrder {
            id: OrderId(id),
            seller: AccountId(1),
            for_sale,
            sell_price: Price::new(AssetAmount::new(base, USD), AssetAmount::new(quote, CORE)),
            expiration: Timestamp::MAX,
        }
    }

    #[test]
    fn best_price_first_then_fifo() {
        let mut book = LimitOrderBook::new();
        book.insert(order(1, 10, 2, 1));
        book.insert(order(2, 10, 3, 1));
        book.insert(order(3, 10, 3, 1)); // same price as 2, later id

        let ids: Vec<_> = book
            .range(Price::upper_bound(USD, CORE), Price::lower_bound(USD, CORE))
            .map(|o| o.id.0)
            .collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert_eq!(book.best(USD, CORE).map(|o| o.id.0), Some(2));
    }

    #[test]
    fn range_floor_excludes_cheap_orders() {
        let mut book = LimitOrderBook::new();
        book.insert(order(1, 10, 1, 1));
        book.insert(order(2, 10, 5, 1));

        let floor = Price::new(AssetAmount::new(2, USD), AssetAmount::new(1, CORE));
        let ids: Vec<_> = book
            .range(Price::upper_bound(USD, CORE), floor)
            .map(|o| o.id.0)
            .collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn remove_clears_all_indices() {
        let mut book = LimitOrderBook::new();
        book.insert(order(1, 10, 2, 1));
        let removed = book.remove(OrderId(1)).unwrap();
        assert_eq!(removed.for_sale, 10);
        assert!(book.is_empty());
        assert!(book.best(USD, CORE).is_none());
        assert!(book.expired(Timestamp::MAX).is_empty());
    }

    #[test]
    fn expired_orders_listed_in_time_order() {
        let mut book = LimitOrderBook::new();
        let mut early = order(1, 10, 2, 1);
        early.expiration = Timestamp::from_secs(100);
        let mut late = order(2, 10, 2, 1);
        late.expiration = Timestamp::from_secs(200);
        book.insert(late);
        book.insert(early);

        assert_eq!(book.expired(Timestamp::from_secs(150)), vec![OrderId(1)]);
        assert_eq!(
            book.expired(Timestamp::from_secs(300)),
            vec![OrderId(1), OrderId(2)]
        );
    }
}
