//! Derived publisher and advertiser statistics
//!
//! Stats are views recomputed from a scan of the record store; nothing here
//! is persisted. The ratio functions are pure and exposed so reporting code
//! can apply them to its own totals.

use crate::{
    context::OpContext,
    metrics::Metrics,
    money::Money,
    records::RecordStore,
    types::{AdvertiserStats, BidRecord, ImpressionRecord, PublisherStats},
    Error, Result,
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::Arc;

/// Fractional digits kept for fill rate and CTR
pub const RATIO_SCALE: u32 = 6;

/// Served impressions per ad request; zero without requests
pub fn fill_rate(impressions: u64, ad_requests: u64) -> Decimal {
    ratio(impressions, ad_requests)
}

/// Revenue per thousand impressions; zero without impressions
pub fn ecpm(revenue: Money, impressions: u64) -> Result<Money> {
    revenue.per_mille(impressions).ok_or_else(|| {
        Error::InvalidAmount(format!(
            "eCPM of {} over {} impressions overflowed",
            revenue, impressions
        ))
    })
}

/// Clicks per impression; zero without impressions
pub fn ctr(clicks: u64, impressions: u64) -> Decimal {
    ratio(clicks, impressions)
}

/// Spend per click; zero without clicks
pub fn avg_cpc(spend: Money, clicks: u64) -> Money {
    spend.div_count(clicks)
}

fn ratio(numerator: u64, denominator: u64) -> Decimal {
    if denominator == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(numerator) / Decimal::from(denominator))
        .round_dp_with_strategy(RATIO_SCALE, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

fn overflow(total: &str, owner: &str, id: &str) -> Error {
    Error::InvalidAmount(format!("{} total for {} {} overflowed", total, owner, id))
}

/// Stats aggregator over a [`RecordStore`]
#[derive(Debug)]
pub struct StatsAggregator {
    records: Arc<RecordStore>,
    metrics: Arc<Metrics>,
}

impl StatsAggregator {
    /// Create an aggregator
    pub fn new(records: Arc<RecordStore>, metrics: Arc<Metrics>) -> Self {
        Self { records, metrics }
    }

    /// Publisher stats for impressions and bids in `[start, end)`
    ///
    /// Ad requests are the distinct auctions among the publisher's bids; a
    /// bid without an auction ID counts as its own request.
    pub fn publisher_stats(
        &self,
        ctx: &OpContext,
        publisher_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PublisherStats> {
        let result = self.compute_publisher(ctx, publisher_id, start, end);
        self.observe(&result);
        result
    }

    /// Advertiser stats for impressions in `[start, end)`
    pub fn advertiser_stats(
        &self,
        ctx: &OpContext,
        advertiser_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AdvertiserStats> {
        let result = self.compute_advertiser(ctx, advertiser_id, start, end);
        self.observe(&result);
        result
    }

    fn compute_publisher(
        &self,
        ctx: &OpContext,
        publisher_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PublisherStats> {
        require_id("publisher", publisher_id)?;

        let mut impressions = 0u64;
        let mut revenue = Money::ZERO;
        let mut overflowed = false;
        let mut unique_users = BTreeSet::new();

        self.records.scan(ctx, start, end, |imp: ImpressionRecord| {
            if imp.publisher_id != publisher_id {
                return ControlFlow::Continue(());
            }
            impressions += 1;
            match revenue.checked_add(imp.price) {
                Some(total) => revenue = total,
                None => {
                    overflowed = true;
                    return ControlFlow::Break(());
                }
            }
            if !imp.user_id.is_empty() {
                unique_users.insert(imp.user_id);
            }
            ControlFlow::Continue(())
        })?;
        if overflowed {
            return Err(overflow("revenue", "publisher", publisher_id));
        }

        let mut auctions = BTreeSet::new();
        self.records.scan(ctx, start, end, |bid: BidRecord| {
            if bid.publisher_id == publisher_id {
                if bid.auction_id.is_empty() {
                    auctions.insert(bid.id);
                } else {
                    auctions.insert(bid.auction_id);
                }
            }
            ControlFlow::Continue(())
        })?;
        let ad_requests = auctions.len() as u64;

        Ok(PublisherStats {
            publisher_id: publisher_id.to_string(),
            period_start: start,
            period_end: end,
            impressions,
            ad_requests,
            revenue,
            unique_users,
            fill_rate: fill_rate(impressions, ad_requests),
            ecpm: ecpm(revenue, impressions)?,
        })
    }

    fn compute_advertiser(
        &self,
        ctx: &OpContext,
        advertiser_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AdvertiserStats> {
        require_id("advertiser", advertiser_id)?;

        let mut impressions = 0u64;
        let mut clicks = 0u64;
        let mut completions = 0u64;
        let mut spend = Money::ZERO;
        let mut overflowed = false;
        let mut unique_users = BTreeSet::new();

        self.records.scan(ctx, start, end, |imp: ImpressionRecord| {
            if imp.advertiser_id != advertiser_id {
                return ControlFlow::Continue(());
            }
            impressions += 1;
            clicks += u64::from(imp.clicked);
            completions += u64::from(imp.completed);
            match spend.checked_add(imp.price) {
                Some(total) => spend = total,
                None => {
                    overflowed = true;
                    return ControlFlow::Break(());
                }
            }
            if !imp.user_id.is_empty() {
                unique_users.insert(imp.user_id);
            }
            ControlFlow::Continue(())
        })?;
        if overflowed {
            return Err(overflow("spend", "advertiser", advertiser_id));
        }

        Ok(AdvertiserStats {
            advertiser_id: advertiser_id.to_string(),
            period_start: start,
            period_end: end,
            impressions,
            clicks,
            completions,
            spend,
            unique_users,
            ctr: ctr(clicks, impressions),
            avg_cpc: avg_cpc(spend, clicks),
        })
    }

    fn observe<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.metrics.record_read(),
            Err(_) => self.metrics.record_error(),
        }
    }
}

fn require_id(what: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::InvalidRecord(format!("{} id is empty", what)));
    }
    Ok(())
}
