// 9.0: the eight input operations. plain data; validation and application
// live on the engine so a serialized operation log can be replayed verbatim.

use crate::price::{Price, PriceFeed};
use crate::types::{AccountId, AssetAmount, AssetId, OrderId, SettlementId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceLimitOrder {
    pub seller: AccountId,
    pub amount_to_sell: AssetAmount,
    pub min_to_receive: AssetAmount,
    pub expiration: Timestamp,
    /// Fail the whole operation unless the order fills completely.
    pub fill_or_kill: bool,
}

impl PlaceLimitOrder {
    /// The price implied by the two amounts: sell/receive.
    pub fn sell_price(&self) -> Price {
        Price::new(self.amount_to_sell, self.min_to_receive)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelLimitOrder {
    pub account: AccountId,
    pub order_id: OrderId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMarginPosition {
    pub account: AccountId,
    /// Synthetic whose debt is being changed.
    pub asset: AssetId,
    /// Signed change in escrowed collateral (backing asset shares).
    pub delta_collateral: i64,
    /// Signed change in debt (synthetic shares). Positive mints.
    pub delta_debt: i64,
    pub target_collateral_ratio: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishPriceFeed {
    pub producer: AccountId,
    pub asset: AssetId,
    pub feed: PriceFeed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestForceSettle {
    pub account: AccountId,
    pub amount: AssetAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelForceSettle {
    pub account: AccountId,
    pub settlement_id: SettlementId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerGlobalSettlement {
    pub issuer: AccountId,
    pub asset: AssetId,
    pub settlement_price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidCollateral {
    pub bidder: AccountId,
    pub additional_collateral: AssetAmount,
    pub debt_covered: AssetAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    PlaceLimitOrder(PlaceLimitOrder),
    CancelLimitOrder(CancelLimitOrder),
    UpdateMarginPosition(UpdateMarginPosition),
    PublishPriceFeed(PublishPriceFeed),
    RequestForceSettle(RequestForceSettle),
    CancelForceSettle(CancelForceSettle),
    TriggerGlobalSettlement(TriggerGlobalSettlement),
    BidCollateral(BidCollateral),
}
