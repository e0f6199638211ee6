//! Backend key layout
//!
//! ```text
//! imp/t/<u64 BE epoch nanos><id>   -> bincode(ImpressionRecord)
//! imp/i/<id>                       -> u64 BE epoch nanos
//! bid/t/<u64 BE epoch nanos><id>   -> bincode(BidRecord)
//! bid/i/<id>                       -> u64 BE epoch nanos
//! earn/<miner id>                  -> decimal string
//! ```
//!
//! Big-endian timestamps make lexicographic key order equal time order, so a
//! range query is a seek to the start key followed by a forward scan.

use crate::types::RecordKind;

const IMPRESSION_TIME: &[u8] = b"imp/t/";
const IMPRESSION_ID: &[u8] = b"imp/i/";
const BID_TIME: &[u8] = b"bid/t/";
const BID_ID: &[u8] = b"bid/i/";
const EARNINGS: &[u8] = b"earn/";

/// Prefix of the time-ordered namespace for `kind`
pub fn time_prefix(kind: RecordKind) -> &'static [u8] {
    match kind {
        RecordKind::Impression => IMPRESSION_TIME,
        RecordKind::Bid => BID_TIME,
    }
}

/// Prefix of the ID index for `kind`
pub fn id_prefix(kind: RecordKind) -> &'static [u8] {
    match kind {
        RecordKind::Impression => IMPRESSION_ID,
        RecordKind::Bid => BID_ID,
    }
}

/// First key at or after `nanos` in the time namespace
pub fn time_bound(kind: RecordKind, nanos: u64) -> Vec<u8> {
    let prefix = time_prefix(kind);
    let mut key = Vec::with_capacity(prefix.len() + 8);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&nanos.to_be_bytes());
    key
}

/// Time-ordered key for one record
pub fn time_key(kind: RecordKind, nanos: u64, id: &str) -> Vec<u8> {
    let mut key = time_bound(kind, nanos);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Decode the timestamp and ID from a time key
pub fn parse_time_key(kind: RecordKind, key: &[u8]) -> Option<(u64, &[u8])> {
    let rest = key.strip_prefix(time_prefix(kind))?;
    if rest.len() < 8 {
        return None;
    }
    let (ts, id) = rest.split_at(8);
    let nanos = u64::from_be_bytes(ts.try_into().ok()?);
    Some((nanos, id))
}

/// ID index key for one record
pub fn id_key(kind: RecordKind, id: &str) -> Vec<u8> {
    let prefix = id_prefix(kind);
    let mut key = Vec::with_capacity(prefix.len() + id.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Encode the ID index value
pub fn encode_nanos(nanos: u64) -> Vec<u8> {
    nanos.to_be_bytes().to_vec()
}

/// Decode the ID index value
pub fn decode_nanos(value: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = value.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Earnings balance key for a miner
pub fn earnings_key(miner_id: &str) -> Vec<u8> {
    let mut key = EARNINGS.to_vec();
    key.extend_from_slice(miner_id.as_bytes());
    key
}
