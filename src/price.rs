// 2.0: exchange rates as exact integer rationals. a Price is base/quote of two
// AssetAmounts; comparisons cross-multiply in i128 so 3/1 and 6/2 are the same
// rate and nothing ever rounds during a comparison. conversions floor (or
// ceil where liquidation demands it) exactly once, at the transfer boundary.

use crate::types::{AssetAmount, AssetId, MAX_SHARE_SUPPLY};
use crate::types::{COLLATERAL_RATIO_DENOM, MAX_COLLATERAL_RATIO, MIN_COLLATERAL_RATIO};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PriceError {
    #[error("asset {0:?} matches neither side of price {1}")]
    MismatchedAsset(AssetId, Price),

    #[error("conversion result exceeds maximum share supply")]
    Overflow,

    #[error("price {0} has a non-positive divisor for this conversion")]
    ZeroDivisor(Price),

    #[error("price must have positive amounts and distinct assets")]
    Malformed,

    #[error("collateral ratio {0} outside permitted bounds")]
    RatioOutOfBounds(u16),

    #[error("maintenance collateral ratio must not be below the short squeeze ratio")]
    RatioInversion,
}

fn mul_div_floor(amount: i64, num: i64, den: i64) -> Result<i64, PriceError> {
    let result = (amount as i128 * num as i128) / den as i128;
    if result > MAX_SHARE_SUPPLY as i128 {
        return Err(PriceError::Overflow);
    }
    Ok(result as i64)
}

fn mul_div_ceil(amount: i64, num: i64, den: i64) -> Result<i64, PriceError> {
    let result = (amount as i128 * num as i128 + den as i128 - 1) / den as i128;
    if result > MAX_SHARE_SUPPLY as i128 {
        return Err(PriceError::Overflow);
    }
    Ok(result as i64)
}

// 2.1: the price itself. value = base.amount / quote.amount, in units of
// base asset per quote asset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Price {
    pub base: AssetAmount,
    pub quote: AssetAmount,
}

impl Price {
    pub fn new(base: AssetAmount, quote: AssetAmount) -> Self {
        Self { base, quote }
    }

    /// Greatest representable rate for the pair. Used as a range endpoint
    /// when scanning a book from the top.
    pub fn upper_bound(base: AssetId, quote: AssetId) -> Self {
        Self {
            base: AssetAmount::new(MAX_SHARE_SUPPLY, base),
            quote: AssetAmount::new(1, quote),
        }
    }

    /// Smallest representable rate for the pair.
    pub fn lower_bound(base: AssetId, quote: AssetId) -> Self {
        Self {
            base: AssetAmount::new(1, base),
            quote: AssetAmount::new(MAX_SHARE_SUPPLY, quote),
        }
    }

    /// Swap base and quote: the same rate seen from the other side.
    pub fn invert(&self) -> Self {
        Self {
            base: self.quote,
            quote: self.base,
        }
    }

    pub fn validate(&self) -> Result<(), PriceError> {
        if self.base.amount <= 0 || self.quote.amount <= 0 || self.base.asset == self.quote.asset {
            return Err(PriceError::Malformed);
        }
        Ok(())
    }

    /// Margin call trigger for a position. Computed as the rational
    /// (debt * ratio) / (collateral * DENOM) then inverted, so the stored
    /// price is collateral/debt oriented. Components are halved (rounding
    /// up) until they fit the share supply cap; the collateral side can
    /// never reach zero this way.
    pub fn call_price(debt: AssetAmount, collateral: AssetAmount, collateral_ratio: u16) -> Self {
        let mut num = debt.amount as i128 * collateral_ratio as i128;
        let mut den = collateral.amount as i128 * COLLATERAL_RATIO_DENOM as i128;
        while num > MAX_SHARE_SUPPLY as i128 || den > MAX_SHARE_SUPPLY as i128 {
            num = (num >> 1) + 1;
            den = (den >> 1) + 1;
        }
        Self {
            base: AssetAmount::new(num as i64, debt.asset),
            quote: AssetAmount::new(den as i64, collateral.asset),
        }
        .invert()
    }

    /// Non-consensus: approximate decimal value for display and queries.
    pub fn to_real(&self) -> Option<Decimal> {
        if self.quote.amount == 0 {
            return None;
        }
        Some(Decimal::from(self.base.amount) / Decimal::from(self.quote.amount))
    }
}

impl PartialEq for Price {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Price {}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Price {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.base.asset, self.quote.asset)
            .cmp(&(other.base.asset, other.quote.asset))
            .then_with(|| {
                let lhs = self.base.amount as i128 * other.quote.amount as i128;
                let rhs = other.base.amount as i128 * self.quote.amount as i128;
                lhs.cmp(&rhs)
            })
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.base, self.quote)
    }
}

impl AssetAmount {
    /// Convert this amount through a price, flooring the result. The amount
    /// must match one side of the price; the opposite side's asset comes out.
    pub fn multiply(&self, price: &Price) -> Result<AssetAmount, PriceError> {
        if self.asset == price.base.asset {
            if price.base.amount <= 0 {
                return Err(PriceError::ZeroDivisor(*price));
            }
            let out = mul_div_floor(self.amount, price.quote.amount, price.base.amount)?;
            Ok(AssetAmount::new(out, price.quote.asset))
        } else if self.asset == price.quote.asset {
            if price.quote.amount <= 0 {
                return Err(PriceError::ZeroDivisor(*price));
            }
            let out = mul_div_floor(self.amount, price.base.amount, price.quote.amount)?;
            Ok(AssetAmount::new(out, price.base.asset))
        } else {
            Err(PriceError::MismatchedAsset(self.asset, *price))
        }
    }

    /// Same conversion rounding up. Used where flooring would shortchange
    /// the side the rules protect (global settlement collateral owed).
    pub fn multiply_ceil(&self, price: &Price) -> Result<AssetAmount, PriceError> {
        if self.asset == price.base.asset {
            if price.base.amount <= 0 {
                return Err(PriceError::ZeroDivisor(*price));
            }
            let out = mul_div_ceil(self.amount, price.quote.amount, price.base.amount)?;
            Ok(AssetAmount::new(out, price.quote.asset))
        } else if self.asset == price.quote.asset {
            if price.quote.amount <= 0 {
                return Err(PriceError::ZeroDivisor(*price));
            }
            let out = mul_div_ceil(self.amount, price.base.amount, price.quote.amount)?;
            Ok(AssetAmount::new(out, price.base.asset))
        } else {
            Err(PriceError::MismatchedAsset(self.asset, *price))
        }
    }
}

// 2.2: a published feed. settlement price is debt per unit of collateral;
// the two ratios are fixed-point over COLLATERAL_RATIO_DENOM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFeed {
    pub settlement_price: Price,
    pub maintenance_collateral_ratio: u16,
    pub maximum_short_squeeze_ratio: u16,
}

impl PriceFeed {
    pub fn validate(&self) -> Result<(), PriceError> {
        self.settlement_price.validate()?;
        for ratio in [
            self.maintenance_collateral_ratio,
            self.maximum_short_squeeze_ratio,
        ] {
            if !(MIN_COLLATERAL_RATIO..=MAX_COLLATERAL_RATIO).contains(&ratio) {
                return Err(PriceError::RatioOutOfBounds(ratio));
            }
        }
        if self.maintenance_collateral_ratio < self.maximum_short_squeeze_ratio {
            return Err(PriceError::RatioInversion);
        }
        Ok(())
    }

    /// Worst price a margin call may pay: settlement price discounted by the
    /// short squeeze ratio. Reduction here rounds to nearest so the squeeze
    /// cap stays as close to the exact rational as representable.
    pub fn max_short_squeeze_price(&self) -> Price {
        let mut num =
            self.settlement_price.base.amount as i128 * COLLATERAL_RATIO_DENOM as i128;
        let mut den =
            self.settlement_price.quote.amount as i128 * self.maximum_short_squeeze_ratio as i128;
        while num > MAX_SHARE_SUPPLY as i128 || den > MAX_SHARE_SUPPLY as i128 {
            num = (num >> 1) + (num & 1);
            den = (den >> 1) + (den & 1);
        }
        Price {
            base: AssetAmount::new(num as i64, self.settlement_price.base.asset),
            quote: AssetAmount::new(den as i64, self.settlement_price.quote.asset),
        }
    }
}
