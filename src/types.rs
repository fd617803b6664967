// 1.0: all the primitives live here. nothing in the engine works without these types.
// IDs, share amounts, timestamps. each is a newtype so the compiler catches type mixups.
// consensus math is integer-only: i64 amounts, i128 intermediates. never floats.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard cap on the amount of any single asset in existence.
pub const MAX_SHARE_SUPPLY: i64 = 1_000_000_000_000_000;

/// Collateral ratios are fixed-point with this denominator: 1750 = 1.75x.
pub const COLLATERAL_RATIO_DENOM: u16 = 1000;

/// Percentages (settlement offset, settlement volume caps) are fixed-point
/// with this denominator: 100 = 1%.
pub const PERCENT_100: u16 = 10_000;
pub const MIN_COLLATERAL_RATIO: u16 = 1001;
pub const MAX_COLLATERAL_RATIO: u16 = 32000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SettlementId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BidId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acct-{}", self.0)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "asset-{}", self.0)
    }
}

// 1.1: a quantity of a specific asset. the asset id travels with the amount so
// cross-asset arithmetic is impossible to write by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetAmount {
    pub amount: i64,
    pub asset: AssetId,
}

impl AssetAmount {
    pub fn new(amount: i64, asset: AssetId) -> Self {
        Self { amount, asset }
    }

    pub fn zero(asset: AssetId) -> Self {
        Self { amount: 0, asset }
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

impl fmt::Display for AssetAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.asset)
    }
}

// 1.2: second-precision timestamp. the engine never reads a clock, it is fed
// block times; Timestamp::now() exists for the simulator only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Sentinel for orders that never expire.
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp())
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A trading pair in canonical (lower asset id first) form, used to group
/// book entries regardless of which side an order sells.
pub fn market_pair(a: AssetId, b: AssetId) -> (AssetId, AssetId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}
