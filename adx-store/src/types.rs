//! Core types for the event store
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (`Money` for every monetary field)

use crate::money::Money;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Kind of stored record; selects the key namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Served ad impression
    Impression,
    /// DSP bid
    Bid,
}

impl RecordKind {
    /// Short name used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Impression => "impression",
            RecordKind::Bid => "bid",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record the store keeps in a time-ordered index, keyed by ID
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Key namespace
    const KIND: RecordKind;

    /// Unique ID
    fn id(&self) -> &str;

    /// Event time
    fn timestamp(&self) -> DateTime<Utc>;

    /// Check required fields
    fn validate(&self) -> Result<()>;
}

/// Epoch nanoseconds for a valid (non-negative, representable) timestamp
pub fn timestamp_nanos(ts: DateTime<Utc>) -> Option<u64> {
    ts.timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
}

fn validate_common(kind: RecordKind, id: &str, ts: DateTime<Utc>) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::InvalidRecord(format!("{} id is empty", kind)));
    }
    if timestamp_nanos(ts).is_none() {
        return Err(Error::InvalidRecord(format!(
            "{} {} has timestamp {} outside the storable range",
            kind, id, ts
        )));
    }
    Ok(())
}

fn validate_price(kind: RecordKind, id: &str, field: &str, value: Money) -> Result<()> {
    if value.is_negative() {
        return Err(Error::InvalidRecord(format!(
            "{} {} has negative {}: {}",
            kind, id, field, value
        )));
    }
    if value.as_decimal().normalize().scale() > Money::SCALE {
        return Err(Error::InvalidRecord(format!(
            "{} {} {} exceeds {} decimal places",
            kind,
            id,
            field,
            Money::SCALE
        )));
    }
    Ok(())
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Stored ad impression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpressionRecord {
    /// Unique impression ID
    pub id: String,

    /// Event time
    pub timestamp: DateTime<Utc>,

    /// Publisher that served the impression
    pub publisher_id: String,

    /// Placement within the publisher inventory
    pub placement_id: String,

    /// Advertiser whose creative was shown
    #[serde(default)]
    pub advertiser_id: String,

    /// Viewer
    pub user_id: String,

    /// Viewer device
    pub device_id: String,

    /// Miner that delivered the creative (empty when none)
    pub miner_id: String,

    /// ISO country code
    pub geo_country: String,

    /// Region within the country
    pub geo_region: String,

    /// Clearing price for this impression
    pub price: Money,

    /// ISO 4217 currency code
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Winning DSP
    pub winning_dsp: String,

    /// CTV ad pod this impression belonged to
    pub ad_pod_id: String,

    /// Creative/video reference
    pub video_url: String,

    /// Creative duration (seconds)
    pub duration_secs: u32,

    /// Playback completed
    pub completed: bool,

    /// Click observed for this impression
    #[serde(default)]
    pub clicked: bool,
}

impl ImpressionRecord {
    /// New impression with the required fields; everything else empty
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>, price: Money) -> Self {
        Self {
            id: id.into(),
            timestamp,
            publisher_id: String::new(),
            placement_id: String::new(),
            advertiser_id: String::new(),
            user_id: String::new(),
            device_id: String::new(),
            miner_id: String::new(),
            geo_country: String::new(),
            geo_region: String::new(),
            price,
            currency: default_currency(),
            winning_dsp: String::new(),
            ad_pod_id: String::new(),
            video_url: String::new(),
            duration_secs: 0,
            completed: false,
            clicked: false,
        }
    }

    /// True when the impression should credit a miner
    pub fn carries_settlement(&self) -> bool {
        !self.miner_id.is_empty() && !self.price.is_zero() && !self.price.is_negative()
    }
}

impl Record for ImpressionRecord {
    const KIND: RecordKind = RecordKind::Impression;

    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn validate(&self) -> Result<()> {
        validate_common(Self::KIND, &self.id, self.timestamp)?;
        validate_price(Self::KIND, &self.id, "price", self.price)
    }
}

/// Outcome of a bid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum BidStatus {
    /// Bid submitted, auction not yet closed
    Submitted = 1,
    /// Bid won the auction
    Won = 2,
    /// Bid lost the auction
    Lost = 3,
}

impl BidStatus {
    /// Parse from the lowercase wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(BidStatus::Submitted),
            "won" => Some(BidStatus::Won),
            "lost" => Some(BidStatus::Lost),
            _ => None,
        }
    }
}

/// Stored DSP bid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidRecord {
    /// Unique bid ID
    pub id: String,

    /// Event time
    pub timestamp: DateTime<Utc>,

    /// Auction this bid competed in
    pub auction_id: String,

    /// Publisher whose ad request opened the auction
    #[serde(default)]
    pub publisher_id: String,

    /// Opaque upstream bid request ID
    #[serde(default)]
    pub bid_request: String,

    /// Bidder seat
    pub bidder_id: String,

    /// Demand-side platform
    pub dsp_id: String,

    /// Offered price
    pub bid_price: Money,

    /// Bid won
    pub won: bool,

    /// DSP response latency
    pub response_time: Duration,

    /// Creative offered
    pub creative_id: String,

    /// Auction outcome
    pub status: BidStatus,

    /// Price paid when won
    pub clear_price: Money,
}

impl BidRecord {
    /// New submitted bid with the required fields; everything else empty
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>, bid_price: Money) -> Self {
        Self {
            id: id.into(),
            timestamp,
            auction_id: String::new(),
            publisher_id: String::new(),
            bid_request: String::new(),
            bidder_id: String::new(),
            dsp_id: String::new(),
            bid_price,
            won: false,
            response_time: Duration::ZERO,
            creative_id: String::new(),
            status: BidStatus::Submitted,
            clear_price: Money::ZERO,
        }
    }
}

impl Record for BidRecord {
    const KIND: RecordKind = RecordKind::Bid;

    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn validate(&self) -> Result<()> {
        validate_common(Self::KIND, &self.id, self.timestamp)?;
        validate_price(Self::KIND, &self.id, "bid_price", self.bid_price)?;
        validate_price(Self::KIND, &self.id, "clear_price", self.clear_price)?;
        if self.won != (self.status == BidStatus::Won) {
            return Err(Error::InvalidRecord(format!(
                "bid {} won flag {} contradicts status {:?}",
                self.id, self.won, self.status
            )));
        }
        Ok(())
    }
}

/// Cumulative earnings for one miner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsEntry {
    /// Miner ID
    pub miner_id: String,
    /// Cumulative balance
    pub balance: Money,
}

/// Derived publisher statistics for a period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherStats {
    /// Publisher ID
    pub publisher_id: String,
    /// Period start (inclusive)
    pub period_start: DateTime<Utc>,
    /// Period end (exclusive)
    pub period_end: DateTime<Utc>,
    /// Impressions served
    pub impressions: u64,
    /// Distinct auctions opened for the publisher
    pub ad_requests: u64,
    /// Sum of impression prices
    pub revenue: Money,
    /// Users observed (cardinality only)
    pub unique_users: BTreeSet<String>,
    /// impressions / ad_requests
    pub fill_rate: Decimal,
    /// revenue per thousand impressions
    pub ecpm: Money,
}

impl PublisherStats {
    /// Number of distinct users
    pub fn unique_user_count(&self) -> usize {
        self.unique_users.len()
    }
}

/// Derived advertiser statistics for a period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertiserStats {
    /// Advertiser ID
    pub advertiser_id: String,
    /// Period start (inclusive)
    pub period_start: DateTime<Utc>,
    /// Period end (exclusive)
    pub period_end: DateTime<Utc>,
    /// Impressions bought
    pub impressions: u64,
    /// Clicked impressions
    pub clicks: u64,
    /// Completed impressions
    pub completions: u64,
    /// Sum of impression prices
    pub spend: Money,
    /// Users observed (cardinality only)
    pub unique_users: BTreeSet<String>,
    /// clicks / impressions
    pub ctr: Decimal,
    /// spend / clicks
    pub avg_cpc: Money,
}

impl AdvertiserStats {
    /// Number of distinct users
    pub fn unique_user_count(&self) -> usize {
        self.unique_users.len()
    }
}

/// Mutation kind carried by a [`WriteOp`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOpKind {
    /// Insert or replace
    Put,
    /// Remove
    Delete,
}

/// A buffered mutation awaiting flush
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    /// Mutation kind
    pub kind: WriteOpKind,
    /// Backend key
    pub key: Vec<u8>,
    /// Value (empty for deletes)
    pub value: Vec<u8>,
    /// When the operation was accepted
    pub timestamp: DateTime<Utc>,
}

impl WriteOp {
    /// Put operation stamped now
    pub fn put(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            kind: WriteOpKind::Put,
            key,
            value,
            timestamp: Utc::now(),
        }
    }

    /// Delete operation stamped now
    pub fn delete(key: Vec<u8>) -> Self {
        Self {
            kind: WriteOpKind::Delete,
            key,
            value: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_impression_validation() {
        let now = Utc::now();
        let ok = ImpressionRecord::new("imp-1", now, "5.50".parse().unwrap());
        assert!(ok.validate().is_ok());

        let empty_id = ImpressionRecord::new("  ", now, Money::ZERO);
        assert!(matches!(empty_id.validate(), Err(Error::InvalidRecord(_))));

        let negative = ImpressionRecord::new("imp-2", now, "-1".parse().unwrap());
        assert!(matches!(negative.validate(), Err(Error::InvalidRecord(_))));

        let before_epoch = Utc.with_ymd_and_hms(1969, 12, 31, 0, 0, 0).unwrap();
        let old = ImpressionRecord::new("imp-3", before_epoch, Money::ZERO);
        assert!(matches!(old.validate(), Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn test_bid_won_flag_must_match_status() {
        let mut bid = BidRecord::new("bid-1", Utc::now(), "10.50".parse().unwrap());
        bid.won = true;
        assert!(bid.validate().is_err());

        bid.status = BidStatus::Won;
        assert!(bid.validate().is_ok());
    }

    #[test]
    fn test_bid_status_parse() {
        assert_eq!(BidStatus::parse("won"), Some(BidStatus::Won));
        assert_eq!(BidStatus::parse("lost"), Some(BidStatus::Lost));
        assert_eq!(BidStatus::parse("pending"), None);
    }

    #[test]
    fn test_settlement_detection() {
        let mut imp = ImpressionRecord::new("imp-1", Utc::now(), "5.50".parse().unwrap());
        assert!(!imp.carries_settlement());
        imp.miner_id = "miner-1".into();
        assert!(imp.carries_settlement());
        imp.price = Money::ZERO;
        assert!(!imp.carries_settlement());
    }

    #[test]
    fn test_record_bincode_roundtrip_keeps_money_exact() {
        let mut imp = ImpressionRecord::new("imp-1", Utc::now(), "3.50".parse().unwrap());
        imp.user_id = "user-abc".into();
        let bytes = bincode::serialize(&imp).unwrap();
        let back: ImpressionRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, imp);
        assert_eq!(back.price.to_string_fixed(2), "3.50");
    }
}
