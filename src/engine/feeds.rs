// 10.4 engine/feeds.rs: feed publication. producers push feeds, the median
// recomputes, and a moved median immediately re-checks margin calls.

use super::core::Engine;
use super::results::EngineError;
use crate::events::{EventPayload, FeedPublishedEvent, MedianUpdatedEvent};
use crate::ops::PublishPriceFeed;

impl Engine {
    pub fn publish_price_feed(&mut self, op: PublishPriceFeed) -> Result<(), EngineError> {
        op.feed.validate().map_err(EngineError::InvalidFeed)?;

        let now = self.current_time;
        let changed = {
            let state = self.state_mut(op.asset)?;
            if !state.feed_producers.contains(&op.producer) {
                return Err(EngineError::UnauthorizedFeedProducer(op.producer, op.asset));
            }
            if op.feed.settlement_price.base.asset != state.asset
                || op.feed.settlement_price.quote.asset != state.options.backing_asset
            {
                return Err(EngineError::WrongFeedPair);
            }
            let old = state.current_feed;
            state.feeds.insert(op.producer, (now, op.feed));
            state.update_median_feeds(now);
            let new = state.current_feed;
            old != new
        };

        self.emit(EventPayload::FeedPublished(FeedPublishedEvent {
            asset: op.asset,
            producer: op.producer,
            feed: op.feed,
        }));
        if changed {
            let feed = self.state(op.asset)?.current_feed;
            self.emit(EventPayload::MedianUpdated(MedianUpdatedEvent {
                asset: op.asset,
                feed,
            }));
            // a cheaper median can free margin calls on the spot
            self.check_call_orders(op.asset, true, false)?;
        }
        Ok(())
    }
}
