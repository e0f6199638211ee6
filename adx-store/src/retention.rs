//! Retention-based pruning and compaction
//!
//! A pass computes its cutoff once (`now - window`), drains the write
//! buffer, deletes every impression and then every bid whose time key
//! precedes the cutoff, and compacts each pruned key range. Records written
//! during the pass are judged against the same cutoff, so a record at or
//! after it always survives.

use crate::{
    backend::KvBackend,
    buffer::WriteBuffer,
    context::OpContext,
    keys,
    records::{clamp_nanos, PruneOutcome, RecordStore},
    types::RecordKind,
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Result of one retention pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    /// Records strictly older than this were eligible
    pub cutoff: DateTime<Utc>,

    /// Impressions removed
    pub impressions_pruned: u64,

    /// Bids removed
    pub bids_pruned: u64,

    /// Per-record deletions that failed and were skipped
    pub delete_failures: u64,
}

impl RetentionReport {
    /// Records removed across both namespaces
    pub fn total_pruned(&self) -> u64 {
        self.impressions_pruned + self.bids_pruned
    }
}

/// Retention optimizer
#[derive(Debug)]
pub struct RetentionOptimizer {
    backend: Arc<dyn KvBackend>,
    buffer: Arc<WriteBuffer>,
    records: Arc<RecordStore>,
    window: Duration,
}

impl RetentionOptimizer {
    /// Create an optimizer keeping records younger than `window`
    pub fn new(
        backend: Arc<dyn KvBackend>,
        buffer: Arc<WriteBuffer>,
        records: Arc<RecordStore>,
        window: Duration,
    ) -> Self {
        Self {
            backend,
            buffer,
            records,
            window,
        }
    }

    /// Retention window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Run a pass against the current wall clock
    pub fn optimize(&self, ctx: &OpContext) -> Result<RetentionReport> {
        self.optimize_at(ctx, Utc::now())
    }

    /// Run a pass as if the current time were `now`
    pub fn optimize_at(&self, ctx: &OpContext, now: DateTime<Utc>) -> Result<RetentionReport> {
        ctx.check("optimize")?;
        let cutoff = now.checked_sub_signed(self.window).ok_or_else(|| {
            Error::Config(format!(
                "retention window of {} days reaches before the representable range",
                self.window.num_days()
            ))
        })?;

        // Old records still sitting in the buffer must reach the backend
        // before the scan can see them
        self.buffer.flush()?;

        let mut compaction_errors = Vec::new();
        let impressions =
            self.prune_kind(ctx, RecordKind::Impression, cutoff, &mut compaction_errors)?;
        let bids = self.prune_kind(ctx, RecordKind::Bid, cutoff, &mut compaction_errors)?;

        let report = RetentionReport {
            cutoff,
            impressions_pruned: impressions.pruned,
            bids_pruned: bids.pruned,
            delete_failures: impressions.failures + bids.failures,
        };

        if !compaction_errors.is_empty() {
            tracing::error!(
                pruned = report.total_pruned(),
                errors = compaction_errors.len(),
                "Retention compaction failed"
            );
            return Err(Error::Compaction {
                pruned: report.total_pruned(),
                reason: compaction_errors.join("; "),
            });
        }

        tracing::info!(
            cutoff = %report.cutoff,
            impressions_pruned = report.impressions_pruned,
            bids_pruned = report.bids_pruned,
            delete_failures = report.delete_failures,
            "Retention pass complete"
        );
        Ok(report)
    }

    fn prune_kind(
        &self,
        ctx: &OpContext,
        kind: RecordKind,
        cutoff: DateTime<Utc>,
        compaction_errors: &mut Vec<String>,
    ) -> Result<PruneOutcome> {
        let outcome = self.records.prune_before(ctx, kind, cutoff)?;
        if outcome.pruned == 0 {
            return Ok(outcome);
        }

        let start = keys::time_bound(kind, 0);
        let end = keys::time_bound(kind, clamp_nanos(cutoff));
        if let Err(e) = self.backend.compact(&start, &end) {
            compaction_errors.push(format!("{}: {}", kind, e));
        }
        Ok(outcome)
    }
}

/// Periodic retention passes on the tokio runtime
#[derive(Debug)]
pub struct RetentionTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RetentionTask {
    /// Run a pass every `period`, starting one period from now
    pub fn spawn(optimizer: Arc<RetentionOptimizer>, period: std::time::Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let opt = optimizer.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            opt.optimize(&OpContext::background())
                        })
                        .await;
                        match result {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => tracing::error!(error = %e, "Retention pass failed"),
                            Err(e) => tracing::error!(error = %e, "Retention pass panicked"),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        Self { shutdown, handle }
    }

    /// Stop scheduling passes and wait for a running one to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Retention task terminated abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::BatchingConfig;
    use crate::metrics::Metrics;
    use crate::money::Money;
    use crate::types::{BidRecord, ImpressionRecord};

    struct Fixture {
        backend: Arc<MemoryBackend>,
        records: Arc<RecordStore>,
        optimizer: RetentionOptimizer,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let buffer = Arc::new(WriteBuffer::new(
            backend.clone(),
            metrics.clone(),
            &BatchingConfig::default(),
        ));
        let records = Arc::new(RecordStore::new(backend.clone(), buffer.clone(), metrics));
        let optimizer =
            RetentionOptimizer::new(backend.clone(), buffer, records.clone(), Duration::days(60));
        Fixture {
            backend,
            records,
            optimizer,
        }
    }

    #[test]
    fn test_prunes_only_records_before_cutoff() {
        let f = fixture();
        let ctx = OpContext::background();
        let now = Utc::now();
        let cutoff = now - Duration::days(60);

        for (id, ts) in [
            ("ancient", now - Duration::days(400)),
            ("old", cutoff - Duration::nanoseconds(1)),
            ("borderline", cutoff),
            ("fresh", now),
        ] {
            f.records
                .store_impression(&ctx, &ImpressionRecord::new(id, ts, Money::from_units(1)))
                .unwrap();
        }
        f.records
            .store_bid(&ctx, &BidRecord::new("old-bid", now - Duration::days(61), Money::ZERO))
            .unwrap();

        // Buffered records are flushed by the pass itself
        let report = f.optimizer.optimize_at(&ctx, now).unwrap();
        assert_eq!(report.cutoff, cutoff);
        assert_eq!(report.impressions_pruned, 2);
        assert_eq!(report.bids_pruned, 1);
        assert_eq!(report.delete_failures, 0);

        let remaining = f
            .records
            .get_impressions(&ctx, now - Duration::days(1000), now + Duration::days(1), 100)
            .unwrap();
        let ids: Vec<&str> = remaining.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["borderline", "fresh"]);
        assert_eq!(f.backend.compactions(), 2);
    }

    #[test]
    fn test_empty_store_is_a_no_op() {
        let f = fixture();
        let report = f.optimizer.optimize(&OpContext::background()).unwrap();
        assert_eq!(report.total_pruned(), 0);
        assert_eq!(f.backend.compactions(), 0);
    }

    #[test]
    fn test_window_past_representable_time_is_an_error() {
        let backend = Arc::new(MemoryBackend::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let buffer = Arc::new(WriteBuffer::new(
            backend.clone(),
            metrics.clone(),
            &BatchingConfig::default(),
        ));
        let records = Arc::new(RecordStore::new(backend.clone(), buffer.clone(), metrics));
        let optimizer =
            RetentionOptimizer::new(backend, buffer, records, Duration::days(100_000_000));

        assert!(matches!(
            optimizer.optimize(&OpContext::background()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_expired_deadline() {
        let f = fixture();
        let ctx = OpContext::with_deadline(std::time::Instant::now());
        assert!(matches!(
            f.optimizer.optimize(&ctx),
            Err(Error::DeadlineExceeded(_))
        ));
    }
}
