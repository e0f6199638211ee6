//! Impression and bid records
//!
//! Records are upserted by ID through the [`WriteBuffer`] and read back from
//! the backend's time-ordered namespace. Writes for the same ID serialize on
//! a striped lock; everything else runs in parallel.
//!
//! Range scans read the backend only, so records still pending in the write
//! buffer become visible to them after the next flush. Point lookups read
//! through the buffer.

use crate::{
    backend::{KvBackend, KvBatch},
    buffer::WriteBuffer,
    context::OpContext,
    keys,
    metrics::Metrics,
    types::{timestamp_nanos, BidRecord, ImpressionRecord, Record, RecordKind, WriteOp},
    Error, Result,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::ControlFlow;
use std::sync::Arc;

const ID_LOCK_STRIPES: usize = 64;

/// Outcome of pruning one record namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Records removed
    pub pruned: u64,
    /// Records whose deletion failed
    pub failures: u64,
}

/// Record store over a key-value backend
#[derive(Debug)]
pub struct RecordStore {
    backend: Arc<dyn KvBackend>,
    buffer: Arc<WriteBuffer>,
    metrics: Arc<Metrics>,
    id_locks: Vec<Mutex<()>>,
}

impl RecordStore {
    /// Create a store writing through `buffer`
    pub fn new(backend: Arc<dyn KvBackend>, buffer: Arc<WriteBuffer>, metrics: Arc<Metrics>) -> Self {
        Self {
            backend,
            buffer,
            metrics,
            id_locks: (0..ID_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Store an impression, replacing any previous record with the same ID
    pub fn store_impression(&self, ctx: &OpContext, record: &ImpressionRecord) -> Result<()> {
        self.observe_write(self.store(ctx, record))
    }

    /// Store a bid, replacing any previous record with the same ID
    pub fn store_bid(&self, ctx: &OpContext, record: &BidRecord) -> Result<()> {
        self.observe_write(self.store(ctx, record))
    }

    /// Impression by ID
    pub fn get_impression(&self, ctx: &OpContext, id: &str) -> Result<ImpressionRecord> {
        self.observe_read(self.get(ctx, id))
    }

    /// Bid by ID
    pub fn get_bid(&self, ctx: &OpContext, id: &str) -> Result<BidRecord> {
        self.observe_read(self.get(ctx, id))
    }

    /// Impressions with `start <= timestamp < end`, ascending, at most `limit`
    pub fn get_impressions(
        &self,
        ctx: &OpContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ImpressionRecord>> {
        self.observe_read(self.range(ctx, start, end, limit))
    }

    /// Bids with `start <= timestamp < end`, ascending, at most `limit`
    pub fn get_bids(
        &self,
        ctx: &OpContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<BidRecord>> {
        self.observe_read(self.range(ctx, start, end, limit))
    }

    /// Visit every record of type `R` in `[start, end)` in time order
    ///
    /// The visitor may stop early by returning `ControlFlow::Break`. The
    /// deadline is checked before each record.
    pub fn scan<R, F>(
        &self,
        ctx: &OpContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        mut visit: F,
    ) -> Result<()>
    where
        R: Record,
        F: FnMut(R) -> ControlFlow<()>,
    {
        ctx.check("scan")?;
        if end < start {
            return Err(Error::InvalidRange(format!(
                "end {} precedes start {}",
                end, start
            )));
        }

        let start_nanos = clamp_nanos(start);
        let end_nanos = clamp_nanos(end);
        if start_nanos >= end_nanos {
            return Ok(());
        }

        let prefix = keys::time_prefix(R::KIND);
        let seek = keys::time_bound(R::KIND, start_nanos);

        for item in self.backend.iter_from(prefix, &seek) {
            ctx.check("scan")?;
            let (key, value) = item?;
            let Some((nanos, _)) = keys::parse_time_key(R::KIND, &key) else {
                tracing::warn!(kind = %R::KIND, "Skipping malformed time key");
                continue;
            };
            if nanos >= end_nanos {
                break;
            }
            let record: R = bincode::deserialize(&value)?;
            if visit(record).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Delete every record of `kind` older than `cutoff`
    ///
    /// The scan stops at the first time key at or past the cutoff. A failed
    /// delete is logged and counted; the pass continues.
    pub fn prune_before(
        &self,
        ctx: &OpContext,
        kind: RecordKind,
        cutoff: DateTime<Utc>,
    ) -> Result<PruneOutcome> {
        let cutoff_nanos = clamp_nanos(cutoff);
        let prefix = keys::time_prefix(kind);
        let mut outcome = PruneOutcome::default();

        for item in self.backend.iter_prefix(prefix) {
            ctx.check("retention scan")?;
            let (key, _) = item?;
            let Some((nanos, id)) = keys::parse_time_key(kind, &key) else {
                continue;
            };
            if nanos >= cutoff_nanos {
                break;
            }
            let id = String::from_utf8_lossy(id).into_owned();

            match self.delete_version(kind, &id, nanos, &key) {
                Ok(()) => outcome.pruned += 1,
                Err(e) => {
                    outcome.failures += 1;
                    self.metrics.record_error();
                    tracing::warn!(kind = %kind, id = %id, error = %e, "Failed to prune record");
                }
            }
        }

        self.metrics.record_pruned(outcome.pruned);
        Ok(outcome)
    }

    fn store<R: Record>(&self, ctx: &OpContext, record: &R) -> Result<()> {
        ctx.check("store")?;
        record.validate()?;

        let id = record.id();
        let nanos = timestamp_nanos(record.timestamp()).ok_or_else(|| {
            Error::InvalidRecord(format!("{} {} timestamp out of range", R::KIND, id))
        })?;
        let value = bincode::serialize(record)?;
        let id_key = keys::id_key(R::KIND, id);

        let _guard = self.lock_id(id);
        let previous = self
            .buffer
            .read_through(&id_key)?
            .and_then(|v| keys::decode_nanos(&v));

        let mut ops = Vec::with_capacity(3);
        if let Some(old) = previous.filter(|old| *old != nanos) {
            ops.push(WriteOp::delete(keys::time_key(R::KIND, old, id)));
        }
        ops.push(WriteOp::put(keys::time_key(R::KIND, nanos, id), value));
        ops.push(WriteOp::put(id_key, keys::encode_nanos(nanos)));

        self.buffer.enqueue_all(ops)
    }

    fn get<R: Record>(&self, ctx: &OpContext, id: &str) -> Result<R> {
        ctx.check("get")?;
        let not_found = || Error::NotFound(format!("{} {}", R::KIND, id));

        let nanos = self
            .buffer
            .read_through(&keys::id_key(R::KIND, id))?
            .and_then(|v| keys::decode_nanos(&v))
            .ok_or_else(not_found)?;
        let value = self
            .buffer
            .read_through(&keys::time_key(R::KIND, nanos, id))?
            .ok_or_else(not_found)?;
        Ok(bincode::deserialize(&value)?)
    }

    fn range<R: Record>(
        &self,
        ctx: &OpContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<R>> {
        if limit == 0 {
            return Err(Error::InvalidRange("limit must be positive".to_string()));
        }
        let mut out = Vec::with_capacity(limit.min(1024));
        self.scan(ctx, start, end, |record: R| {
            out.push(record);
            if out.len() >= limit {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(out)
    }

    /// Remove one time-key version; drop the ID index only if it still
    /// points at this version
    fn delete_version(&self, kind: RecordKind, id: &str, nanos: u64, time_key: &[u8]) -> Result<()> {
        let id_key = keys::id_key(kind, id);
        let _guard = self.lock_id(id);

        let current = self
            .buffer
            .read_through(&id_key)?
            .and_then(|v| keys::decode_nanos(&v));

        let mut batch = KvBatch::new();
        batch.delete(time_key.to_vec());
        if current == Some(nanos) {
            batch.delete(id_key);
        }
        self.backend.write_batch(batch)
    }

    fn lock_id(&self, id: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.id_locks.len();
        self.id_locks[stripe].lock()
    }

    fn observe_write(&self, result: Result<()>) -> Result<()> {
        match &result {
            Ok(()) => self.metrics.record_write(),
            Err(e) => {
                self.metrics.record_error();
                if !e.is_validation() {
                    tracing::warn!(error = %e, "Record write failed");
                }
            }
        }
        result
    }

    fn observe_read<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.metrics.record_read(),
            Err(Error::NotFound(_)) => self.metrics.record_read(),
            Err(_) => self.metrics.record_error(),
        }
        result
    }
}

/// Epoch nanos for a query bound; pre-epoch clamps to zero, far future to max
pub(crate) fn clamp_nanos(ts: DateTime<Utc>) -> u64 {
    match ts.timestamp_nanos_opt() {
        Some(n) if n < 0 => 0,
        Some(n) => n as u64,
        None if ts.timestamp() < 0 => 0,
        None => u64::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::BatchingConfig;
    use crate::money::Money;
    use chrono::Duration;

    fn store(batch: usize) -> (Arc<MemoryBackend>, Arc<WriteBuffer>, RecordStore) {
        let backend = Arc::new(MemoryBackend::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let config = BatchingConfig {
            max_batch_size: batch,
            ..BatchingConfig::default()
        };
        let buffer = Arc::new(WriteBuffer::new(backend.clone(), metrics.clone(), &config));
        let records = RecordStore::new(backend.clone(), buffer.clone(), metrics);
        (backend, buffer, records)
    }

    fn impression(id: &str, ts: DateTime<Utc>, price: &str) -> ImpressionRecord {
        ImpressionRecord::new(id, ts, price.parse::<Money>().unwrap())
    }

    #[test]
    fn test_store_and_get_by_id() {
        let (_backend, _buffer, records) = store(100);
        let ctx = OpContext::background();
        let imp = impression("imp-1", Utc::now(), "5.50");

        records.store_impression(&ctx, &imp).unwrap();

        // Still buffered, but point lookups read through
        let back = records.get_impression(&ctx, "imp-1").unwrap();
        assert_eq!(back, imp);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let (_backend, _buffer, records) = store(1);
        let ctx = OpContext::background();
        assert!(matches!(
            records.get_bid(&ctx, "nope"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_range_is_half_open_and_ordered() {
        let (_backend, buffer, records) = store(100);
        let ctx = OpContext::background();
        let base = Utc::now() - Duration::hours(10);

        for i in [3, 0, 4, 1, 2] {
            let imp = impression(&format!("imp-{}", i), base + Duration::hours(i), "1.00");
            records.store_impression(&ctx, &imp).unwrap();
        }
        buffer.flush().unwrap();

        let found = records
            .get_impressions(&ctx, base + Duration::hours(1), base + Duration::hours(4), 10)
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["imp-1", "imp-2", "imp-3"]);

        let limited = records
            .get_impressions(&ctx, base, base + Duration::hours(5), 2)
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, "imp-0");
    }

    #[test]
    fn test_range_validation() {
        let (_backend, _buffer, records) = store(1);
        let ctx = OpContext::background();
        let now = Utc::now();

        assert!(matches!(
            records.get_impressions(&ctx, now, now - Duration::seconds(1), 10),
            Err(Error::InvalidRange(_))
        ));
        assert!(matches!(
            records.get_impressions(&ctx, now, now, 0),
            Err(Error::InvalidRange(_))
        ));
        assert!(records.get_impressions(&ctx, now, now, 5).unwrap().is_empty());
    }

    #[test]
    fn test_replacement_moves_time_key() {
        let (backend, buffer, records) = store(100);
        let ctx = OpContext::background();
        let t0 = Utc::now() - Duration::hours(2);
        let t1 = Utc::now() - Duration::hours(1);

        records.store_impression(&ctx, &impression("imp-1", t0, "1.00")).unwrap();
        buffer.flush().unwrap();
        records.store_impression(&ctx, &impression("imp-1", t1, "2.00")).unwrap();
        buffer.flush().unwrap();

        let all = records
            .get_impressions(&ctx, t0 - Duration::hours(1), Utc::now(), 10)
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].timestamp, t1);
        assert_eq!(all[0].price, "2.00".parse().unwrap());
        // one time key + one id key
        assert_eq!(backend.len(), 2);
    }

    #[test]
    fn test_replacement_while_previous_still_buffered() {
        let (backend, buffer, records) = store(100);
        let ctx = OpContext::background();
        let t0 = Utc::now() - Duration::hours(2);
        let t1 = Utc::now() - Duration::hours(1);

        records.store_bid(&ctx, &BidRecord::new("bid-1", t0, Money::ZERO)).unwrap();
        records.store_bid(&ctx, &BidRecord::new("bid-1", t1, Money::ZERO)).unwrap();
        buffer.flush().unwrap();

        assert_eq!(backend.len(), 2);
        assert_eq!(records.get_bid(&ctx, "bid-1").unwrap().timestamp, t1);
    }

    #[test]
    fn test_metrics_observed() {
        let (_backend, _buffer, records) = store(1);
        let ctx = OpContext::background();
        records
            .store_impression(&ctx, &impression("imp-1", Utc::now(), "1"))
            .unwrap();
        let _ = records.store_impression(&ctx, &impression("", Utc::now(), "1"));
        let _ = records.get_impressions(&ctx, Utc::now(), Utc::now(), 1);

        let snapshot = records.metrics.snapshot();
        assert_eq!(snapshot["writes"], 1);
        assert_eq!(snapshot["errors"], 1);
        assert_eq!(snapshot["reads"], 1);
    }

    #[test]
    fn test_expired_deadline_aborts_scan() {
        let (_backend, buffer, records) = store(100);
        let now = Utc::now();
        for i in 0..10 {
            records
                .store_impression(
                    &OpContext::background(),
                    &impression(&format!("imp-{}", i), now - Duration::minutes(i), "1"),
                )
                .unwrap();
        }
        buffer.flush().unwrap();

        let expired = OpContext::with_deadline(std::time::Instant::now());
        assert!(matches!(
            records.get_impressions(&expired, now - Duration::hours(1), now, 100),
            Err(Error::DeadlineExceeded(_))
        ));
    }

    #[test]
    fn test_prune_before_keeps_newer_records() {
        let (backend, buffer, records) = store(100);
        let ctx = OpContext::background();
        let now = Utc::now();

        records.store_impression(&ctx, &impression("old", now - Duration::days(90), "1")).unwrap();
        records.store_impression(&ctx, &impression("new", now, "1")).unwrap();
        buffer.flush().unwrap();

        let outcome = records
            .prune_before(&ctx, RecordKind::Impression, now - Duration::days(60))
            .unwrap();
        assert_eq!(outcome, PruneOutcome { pruned: 1, failures: 0 });
        assert!(matches!(records.get_impression(&ctx, "old"), Err(Error::NotFound(_))));
        assert!(records.get_impression(&ctx, "new").is_ok());
        assert_eq!(backend.len(), 2);
    }

    #[test]
    fn test_clamp_nanos() {
        use chrono::TimeZone;
        assert_eq!(clamp_nanos(Utc.timestamp_opt(-5, 0).unwrap()), 0);
        assert_eq!(clamp_nanos(Utc.timestamp_opt(1, 0).unwrap()), 1_000_000_000);
        assert_eq!(clamp_nanos(DateTime::<Utc>::MAX_UTC), u64::MAX);
    }
}
