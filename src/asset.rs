// 5.0: synthetic asset state. each synthetic tracks its issuer, the options
// fixed at registration, the authorized feed producers with their published
// feeds, the aggregated median feed, settlement throttling, and (after a
// global settlement) the settlement fund and recorded price.

use crate::price::{Price, PriceFeed};
use crate::types::{AccountId, AssetId, Timestamp, PERCENT_100};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitassetOptions {
    /// Asset held as collateral and paid out on settlement.
    pub backing_asset: AssetId,
    /// A published feed older than this no longer counts toward the median.
    pub feed_lifetime_secs: i64,
    /// Fewer live feeds than this and the asset has no price at all.
    pub minimum_feeds: u8,
    /// Delay between a settlement request and its earliest execution.
    pub force_settlement_delay_secs: i64,
    /// A matured request unfilled for this long past its settlement date is
    /// cancelled and refunded.
    pub force_settlement_max_delay_secs: i64,
    /// Settlers receive the feed price worsened by this much (100 = 1%).
    pub force_settlement_offset_percent: u16,
    /// At most this fraction of supply settles per maintenance interval.
    pub maximum_force_settlement_volume: u16,
    /// Whether the issuer may trigger a global settlement by hand.
    pub allow_global_settle: bool,
}

impl BitassetOptions {
    /// Percent fields are fractions of PERCENT_100; anything above it would
    /// make settlement payouts negative or let one interval settle more
    /// than the whole supply.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.force_settlement_offset_percent > PERCENT_100 {
            return Err("settlement offset above 100%");
        }
        if self.maximum_force_settlement_volume > PERCENT_100 {
            return Err("settlement volume cap above 100%");
        }
        Ok(())
    }
}

impl Default for BitassetOptions {
    fn default() -> Self {
        Self {
            backing_asset: AssetId(0),
            feed_lifetime_secs: 60 * 60 * 24,
            minimum_feeds: 1,
            force_settlement_delay_secs: 60 * 60 * 24,
            force_settlement_max_delay_secs: 60 * 60 * 24 * 7,
            force_settlement_offset_percent: 0,
            maximum_force_settlement_volume: 2000,
            allow_global_settle: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitassetState {
    pub asset: AssetId,
    pub issuer: AccountId,
    pub options: BitassetOptions,
    pub feed_producers: BTreeSet<AccountId>,
    /// Latest feed per producer with its publication time.
    pub feeds: BTreeMap<AccountId, (Timestamp, PriceFeed)>,
    /// Element-wise median over live feeds. None while too few feeds are
    /// live; all margin call and settlement activity suspends then.
    pub current_feed: Option<PriceFeed>,
    /// Publication time of the oldest feed used for the current median.
    pub current_feed_publication_time: Timestamp,
    /// Debt settled so far in the current maintenance interval.
    pub force_settled_volume: i64,
    pub current_supply: i64,
    /// Set once globally settled: price debt was converted at, and the
    /// collateral gathered for redemptions. Cleared on revival.
    pub settlement_price: Option<Price>,
    pub settlement_fund: i64,
}

impl BitassetState {
    pub fn new(asset: AssetId, issuer: AccountId, options: BitassetOptions) -> Self {
        Self {
            asset,
            issuer,
            options,
            feed_producers: BTreeSet::new(),
            feeds: BTreeMap::new(),
            current_feed: None,
            current_feed_publication_time: Timestamp::from_secs(0),
            force_settled_volume: 0,
            current_supply: 0,
            settlement_price: None,
            settlement_fund: 0,
        }
    }

    pub fn has_settlement(&self) -> bool {
        self.settlement_price.is_some()
    }

    pub fn feed_is_expired(&self, now: Timestamp) -> bool {
        self.current_feed_publication_time
            .plus_secs(self.options.feed_lifetime_secs)
            <= now
    }

    /// Most debt allowed to force-settle this interval.
    pub fn max_force_settlement_volume(&self) -> i64 {
        let numer =
            self.current_supply as i128 * self.options.maximum_force_settlement_volume as i128;
        (numer / PERCENT_100 as i128) as i64
    }

    /// Recompute the median feed from the still-live publications. Each
    /// component medians independently; the upper median is taken when the
    /// count is even.
    pub fn update_median_feeds(&mut self, now: Timestamp) {
        let mut live: Vec<(Timestamp, PriceFeed)> = self
            .feeds
            .values()
            .filter(|(published, _)| published.plus_secs(self.options.feed_lifetime_secs) > now)
            .copied()
            .collect();

        if live.len() < self.options.minimum_feeds as usize {
            self.current_feed = None;
            self.current_feed_publication_time = now;
            return;
        }

        self.current_feed_publication_time = live
            .iter()
            .map(|(published, _)| *published)
            .min()
            .unwrap_or(now);

        let mid = live.len() / 2;
        let median_price = {
            live.sort_by(|a, b| a.1.settlement_price.cmp(&b.1.settlement_price));
            live[mid].1.settlement_price
        };
        let median_mcr = {
            live.sort_by_key(|f| f.1.maintenance_collateral_ratio);
            live[mid].1.maintenance_collateral_ratio
        };
        let median_mssr = {
            live.sort_by_key(|f| f.1.maximum_short_squeeze_ratio);
            live[mid].1.maximum_short_squeeze_ratio
        };
        self.current_feed = Some(PriceFeed {
            settlement_price: median_price,
            maintenance_collateral_ratio: median_mcr,
            maximum_short_squeeze_ratio: median_mssr,
        });
    }
}
