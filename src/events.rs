// 7.0: every state change appends an event. the fill events double as the
// trade history output; the rest exist for audit and state reconstruction.

use crate::price::{Price, PriceFeed};
use crate::types::{
    AccountId, AssetAmount, AssetId, BidId, OrderId, PositionId, SettlementId, Timestamp,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

/// Which book-side object took part in a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderRef {
    Limit(OrderId),
    Margin(PositionId),
    Settlement(SettlementId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // trade history
    Fill(FillEvent),
    OrderPlaced(OrderPlacedEvent),
    OrderCanceled(OrderCanceledEvent),

    // price feeds
    FeedPublished(FeedPublishedEvent),
    MedianUpdated(MedianUpdatedEvent),

    // margin positions
    PositionUpdated(PositionUpdatedEvent),

    // forced settlement
    SettlementRequested(SettlementRequestedEvent),
    SettlementCanceled(SettlementCanceledEvent),
    AssetSettled(AssetSettledEvent),

    // global settlement and revival
    GlobalSettlement(GlobalSettlementEvent),
    BidPlaced(BidPlacedEvent),
    BidCanceled(BidCanceledEvent),
    BidExecuted(BidExecutedEvent),
    AssetRevived(AssetRevivedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub order: OrderRef,
    pub account: AccountId,
    pub pays: AssetAmount,
    pub receives: AssetAmount,
    pub fill_price: Price,
    pub is_maker: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedEvent {
    pub order_id: OrderId,
    pub seller: AccountId,
    pub for_sale: AssetAmount,
    pub sell_price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCanceledEvent {
    pub order_id: OrderId,
    pub seller: AccountId,
    pub refund: AssetAmount,
    pub reason: CancelReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    UserRequested,
    Expired,
    /// Remainder too small to ever receive a whole unit.
    Culled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPublishedEvent {
    pub asset: AssetId,
    pub producer: AccountId,
    pub feed: PriceFeed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedianUpdatedEvent {
    pub asset: AssetId,
    pub feed: Option<PriceFeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdatedEvent {
    pub position_id: PositionId,
    pub borrower: AccountId,
    pub asset: AssetId,
    pub debt: i64,
    pub collateral: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRequestedEvent {
    pub settlement_id: SettlementId,
    pub owner: AccountId,
    pub amount: AssetAmount,
    pub settlement_date: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementCanceledEvent {
    pub settlement_id: SettlementId,
    pub owner: AccountId,
    pub refund: AssetAmount,
    pub reason: SettleCancelReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettleCancelReason {
    UserRequested,
    /// Queued past the asset's maximum settlement delay without filling.
    MaxDelayExceeded,
    /// Filling it would have consumed a position's entire collateral.
    ImminentGlobalSettlement,
    /// The asset globally settled while the request was queued.
    GloballySettled,
}

/// Instant redemption against the settlement fund of a settled asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSettledEvent {
    pub account: AccountId,
    pub pays: AssetAmount,
    pub receives: AssetAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettlementEvent {
    pub asset: AssetId,
    pub settlement_price: Price,
    pub fund: AssetAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidPlacedEvent {
    pub bid_id: BidId,
    pub bidder: AccountId,
    pub additional_collateral: AssetAmount,
    pub debt_covered: AssetAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidCanceledEvent {
    pub bid_id: BidId,
    pub bidder: AccountId,
    pub refund: AssetAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidExecutedEvent {
    pub bid_id: BidId,
    pub bidder: AccountId,
    pub debt: AssetAmount,
    pub collateral: AssetAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRevivedEvent {
    pub asset: AssetId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_event_serializes() {
        let event = Event {
            id: EventId(1),
            timestamp: Timestamp::from_secs(100),
            payload: EventPayload::Fill(FillEvent {
                order: OrderRef::Limit(OrderId(7)),
                account: AccountId(1),
                pays: AssetAmount::new(10, AssetId(1)),
                receives: AssetAmount::new(5, AssetId(0)),
                fill_price: Price::new(
                    AssetAmount::new(10, AssetId(1)),
                    AssetAmount::new(5, AssetId(0)),
                ),
                is_maker: false,
            }),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("Fill"));
    }
}
