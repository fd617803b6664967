// 10.0.2: result types and errors for engine operations.

use crate::price::PriceError;
use crate::types::{AccountId, AssetAmount, AssetId, OrderId, SettlementId};

/// Broad classification callers can branch on without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The operation itself was malformed or not payable.
    InputValidation,
    /// The signer is not allowed to do this.
    Permission,
    /// Engine state broke an invariant; the transition must not commit.
    InvariantViolation,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("asset {0:?} is not a registered synthetic")]
    UnknownAsset(AssetId),

    #[error("asset {0:?} is already registered")]
    DuplicateAsset(AssetId),

    #[error("order {0:?} not found")]
    UnknownOrder(OrderId),

    #[error("settlement {0:?} not found")]
    UnknownSettlement(SettlementId),

    #[error("settlement {0:?} has matured and can no longer be cancelled")]
    SettlementMatured(SettlementId),

    #[error("invalid asset options: {0}")]
    InvalidAssetOptions(&'static str),

    #[error("account {account:?} has {available}, needs {required}")]
    InsufficientBalance {
        account: AccountId,
        required: AssetAmount,
        available: i64,
    },

    #[error("amounts must be positive")]
    InvalidAmount,

    #[error("order must trade two distinct assets")]
    SameAssets,

    #[error("expiration is already in the past")]
    ExpirationInPast,

    #[error("{0:?} does not own this object")]
    NotOwner(AccountId),

    #[error("{0:?} is not the issuer of asset {1:?}")]
    NotIssuer(AccountId, AssetId),

    #[error("{0:?} is not an authorized feed producer for asset {1:?}")]
    UnauthorizedFeedProducer(AccountId, AssetId),

    #[error("asset {0:?} has no valid price feed")]
    NoPriceFeed(AssetId),

    #[error("invalid feed: {0}")]
    InvalidFeed(PriceError),

    #[error("feed must price the synthetic in its backing asset")]
    WrongFeedPair,

    #[error("asset {0:?} is globally settled")]
    GloballySettled(AssetId),

    #[error("asset {0:?} is not globally settled")]
    NotGloballySettled(AssetId),

    #[error("asset {0:?} does not permit issuer-triggered global settlement")]
    GlobalSettleNotPermitted(AssetId),

    #[error("settlement price must not be below the feed's collateralization")]
    InvalidSettlementPrice,

    #[error("asset {0:?} has no outstanding supply to settle")]
    NoSupplyToSettle(AssetId),

    #[error("settle amount below the chain minimum of {0}")]
    BelowMinimumSettleAmount(i64),

    #[error("bid collateral must be the asset's backing asset")]
    BidWrongCollateral,

    #[error("invalid position update: {0}")]
    InvalidPositionUpdate(&'static str),

    #[error("position update leaves a margin call that cannot fully fill")]
    UnfilledMarginCall,

    #[error("position would be undercollateralized at the current feed")]
    PositionUndercollateralized,

    #[error("order would not fill completely")]
    FillOrKillUnfilled,

    #[error("matching would trigger a global settlement")]
    WouldTriggerGlobalSettlement,

    #[error("price error: {0}")]
    Price(#[from] PriceError),

    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        use EngineError::*;
        match self {
            NotOwner(_) | NotIssuer(_, _) | UnauthorizedFeedProducer(_, _) => ErrorKind::Permission,
            Price(_) | InvariantViolation(_) => ErrorKind::InvariantViolation,
            _ => ErrorKind::InputValidation,
        }
    }
}

/// What happened to a freshly placed limit order.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub order_id: OrderId,
    /// Amount still resting in the book; zero when filled or culled.
    pub remaining: i64,
    /// True when nothing of the order survives (fully filled or culled).
    pub completed: bool,
}

/// What a settlement request turned into.
#[derive(Debug, Clone)]
pub enum SettleOutcome {
    /// Queued for the future.
    Queued(SettlementId),
    /// Asset was globally settled; redeemed instantly for this much.
    Instant(AssetAmount),
}
