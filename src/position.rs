// 4.0: margin positions (debt backed by escrowed collateral) and the index
// over them. two orderings matter: by call price (who gets margin called
// first) and by raw collateralization (who is closest to underwater).

use crate::price::{Price, PriceError, PriceFeed};
use crate::types::{AccountId, AssetAmount, AssetId, PositionId, COLLATERAL_RATIO_DENOM};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginPosition {
    pub id: PositionId,
    pub borrower: AccountId,
    /// Amount of call_price.base.asset held as collateral.
    pub collateral: i64,
    /// Amount of call_price.quote.asset owed.
    pub debt: i64,
    /// Margin call trigger, collateral/debt oriented. Recomputed from the
    /// current feed's MCR after every debt or collateral change.
    pub call_price: Price,
    /// If set, margin calls cover only enough debt to restore this ratio.
    pub target_collateral_ratio: Option<u16>,
}

impl MarginPosition {
    pub fn collateral_asset(&self) -> AssetId {
        self.call_price.base.asset
    }

    pub fn debt_asset(&self) -> AssetId {
        self.call_price.quote.asset
    }

    pub fn amount_of_collateral(&self) -> AssetAmount {
        AssetAmount::new(self.collateral, self.collateral_asset())
    }

    pub fn amount_of_debt(&self) -> AssetAmount {
        AssetAmount::new(self.debt, self.debt_asset())
    }

    /// Raw collateral/debt ratio as an exact price.
    pub fn collateralization(&self) -> Price {
        Price::new(self.amount_of_collateral(), self.amount_of_debt())
    }

    pub fn recompute_call_price(&mut self, maintenance_collateral_ratio: u16) {
        self.call_price = Price::call_price(
            self.amount_of_debt(),
            self.amount_of_collateral(),
            maintenance_collateral_ratio,
        );
    }

    /// How much debt a margin call should cover at `match_price`. Without a
    /// target ratio the whole debt is up for grabs. With one, the smallest
    /// cover that lifts the remaining position back to the target (valued at
    /// the feed price) wins; found by binary search since the exact formula
    /// does not divide cleanly over integers.
    pub fn max_debt_to_cover(
        &self,
        match_price: &Price,
        feed: &PriceFeed,
    ) -> Result<i64, PriceError> {
        let tcr = match self.target_collateral_ratio {
            Some(tcr) => tcr.max(feed.maintenance_collateral_ratio),
            None => return Ok(self.debt),
        };

        let restored = |cover: i64| -> Result<bool, PriceError> {
            let paid = AssetAmount::new(cover, self.debt_asset()).multiply(match_price)?;
            if paid.amount > self.collateral {
                return Ok(false);
            }
            let coll_rem = (self.collateral - paid.amount) as i128;
            let debt_rem = (self.debt - cover) as i128;
            let f = &feed.settlement_price;
            let lhs = coll_rem * f.base.amount as i128 * COLLATERAL_RATIO_DENOM as i128;
            let rhs = debt_rem * f.quote.amount as i128 * tcr as i128;
            Ok(lhs >= rhs)
        };

        if !restored(self.debt)? {
            // not even a full cover restores the target; take everything
            return Ok(self.debt);
        }
        let mut lo = 1i64;
        let mut hi = self.debt;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if restored(mid)? {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(lo)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct PositionKey {
    price: Price,
    id: PositionId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionIndex {
    positions: BTreeMap<PositionId, MarginPosition>,
    by_call_price: BTreeSet<PositionKey>,
    by_collateralization: BTreeSet<PositionKey>,
    by_account: BTreeMap<(AccountId, AssetId), PositionId>,
}

impl PositionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn insert(&mut self, position: MarginPosition) {
        self.by_call_price.insert(PositionKey {
            price: position.call_price,
            id: position.id,
        });
        self.by_collateralization.insert(PositionKey {
            price: position.collateralization(),
            id: position.id,
        });
        self.by_account
            .insert((position.borrower, position.debt_asset()), position.id);
        self.positions.insert(position.id, position);
    }

    pub fn remove(&mut self, id: PositionId) -> Option<MarginPosition> {
        let position = self.positions.remove(&id)?;
        self.by_call_price.remove(&PositionKey {
            price: position.call_price,
            id,
        });
        self.by_collateralization.remove(&PositionKey {
            price: position.collateralization(),
            id,
        });
        self.by_account
            .remove(&(position.borrower, position.debt_asset()));
        Some(position)
    }

    pub fn get(&self, id: PositionId) -> Option<&MarginPosition> {
        self.positions.get(&id)
    }

    pub fn find(&self, borrower: AccountId, debt_asset: AssetId) -> Option<&MarginPosition> {
        let id = self.by_account.get(&(borrower, debt_asset))?;
        self.positions.get(id)
    }

    /// Mutate a position and keep every ordering consistent.
    pub fn update<F>(&mut self, id: PositionId, f: F) -> Option<&MarginPosition>
    where
        F: FnOnce(&mut MarginPosition),
    {
        let mut position = self.remove(id)?;
        f(&mut position);
        self.insert(position);
        self.positions.get(&id)
    }

    fn in_market<'a>(
        &'a self,
        index: &'a BTreeSet<PositionKey>,
        collateral: AssetId,
        debt: AssetId,
    ) -> impl Iterator<Item = &'a MarginPosition> + 'a {
        let lo = Bound::Included(PositionKey {
            price: Price::lower_bound(collateral, debt),
            id: PositionId(0),
        });
        let hi = Bound::Included(PositionKey {
            price: Price::upper_bound(collateral, debt),
            id: PositionId(u64::MAX),
        });
        index
            .range((lo, hi))
            .filter_map(move |key| self.positions.get(&key.id))
    }

    /// Positions for the pair ordered by call price, lowest trigger first.
    /// The first entry is the next margin call candidate.
    pub fn by_call_price(
        &self,
        collateral: AssetId,
        debt: AssetId,
    ) -> impl Iterator<Item = &MarginPosition> + '_ {
        self.in_market(&self.by_call_price, collateral, debt)
    }

    /// Positions for the pair ordered by collateral/debt, weakest first.
    pub fn by_collateralization(
        &self,
        collateral: AssetId,
        debt: AssetId,
    ) -> impl Iterator<Item = &MarginPosition> + '_ {
        self.in_market(&self.by_collateralization, collateral, debt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USD: AssetId = AssetId(1);
    const CORE: AssetId = AssetId(0);

    fn position(id: u64, borrower: u64, debt: i64, collateral: i64) -> MarginPosition {
        let mut p = MarginPosition {
            id: PositionId(id),
            borrower: AccountId(borrower),
            collateral,
            debt,
            call_price: Price::call_price(
                AssetAmount::new(debt, USD),
                AssetAmount::new(collateral, CORE),
                1750,
            ),
            target_collateral_ratio: None,
        };
        p.recompute_call_price(1750);
        p
    }

    fn feed(base: i64, quote: i64) -> PriceFeed {
        PriceFeed {
            settlement_price: Price::new(AssetAmount::new(base, USD), AssetAmount::new(quote, CORE)),
            maintenance_collateral_ratio: 1750,
            maximum_short_squeeze_ratio: 1100,
        }
    }

    #[test]
    fn weakest_position_iterates_first() {
        let mut index = PositionIndex::new();
        index.insert(position(1, 1, 100, 300)); // 3x collateralized
        index.insert(position(2, 2, 100, 200)); // 2x
        index.insert(position(3, 3, 100, 500)); // 5x

        let order: Vec<_> = index
            .by_collateralization(CORE, USD)
            .map(|p| p.id.0)
            .collect();
        assert_eq!(order, vec![2, 1, 3]);

        let call_order: Vec<_> = index.by_call_price(CORE, USD).map(|p| p.id.0).collect();
        assert_eq!(call_order, vec![2, 1, 3]);
    }

    #[test]
    fn update_reindexes() {
        let mut index = PositionIndex::new();
        index.insert(position(1, 1, 100, 300));
        index.insert(position(2, 2, 100, 400));

        index.update(PositionId(2), |p| {
            p.collateral = 150;
            p.recompute_call_price(1750);
        });
        let order: Vec<_> = index
            .by_collateralization(CORE, USD)
            .map(|p| p.id.0)
            .collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn one_position_per_account_and_asset() {
        let mut index = PositionIndex::new();
        index.insert(position(1, 7, 100, 300));
        assert!(index.find(AccountId(7), USD).is_some());
        assert!(index.find(AccountId(7), CORE).is_none());
        index.remove(PositionId(1));
        assert!(index.find(AccountId(7), USD).is_none());
    }

    #[test]
    fn max_debt_to_cover_without_target_is_full_debt() {
        let p = position(1, 1, 100, 300);
        let mp = Price::new(AssetAmount::new(10, USD), AssetAmount::new(11, CORE));
        assert_eq!(p.max_debt_to_cover(&mp, &feed(1, 2)).unwrap(), 100);
    }

    #[test]
    fn max_debt_to_cover_with_target_is_partial() {
        let mut p = position(1, 1, 1000, 1600);
        p.target_collateral_ratio = Some(2000);
        // feed 1 USD per 1 CORE, match price 10 USD per 11 CORE.
        let f = feed(1, 1);
        let mp = Price::new(AssetAmount::new(10, USD), AssetAmount::new(11, CORE));
        let cover = p.max_debt_to_cover(&mp, &f).unwrap();
        assert!(cover > 0 && cover < 1000);
        // covering that much restores the target ratio
        let paid = AssetAmount::new(cover, USD).multiply(&mp).unwrap();
        let lhs = (p.collateral - paid.amount) as i128 * 1000;
        let rhs = (p.debt - cover) as i128 * 2000;
        assert!(lhs >= rhs);
        // one unit less does not
        let paid = AssetAmount::new(cover - 1, USD).multiply(&mp).unwrap();
        let lhs = (p.collateral - paid.amount) as i128 * 1000;
        let rhs = (p.debt - cover + 1) as i128 * 2000;
        assert!(lhs < rhs);
    }
}
