//! Metrics collection for observability
//!
//! Counters live in a per-store prometheus [`Registry`]; nothing is
//! registered globally, so several stores can coexist in one process.
//!
//! # Metrics
//!
//! - `adx_store_writes_total` - Records accepted for storage
//! - `adx_store_reads_total` - Read operations served
//! - `adx_store_errors_total` - Failed operations (validation and backend)
//! - `adx_store_flushes_total` - Write buffer batches flushed
//! - `adx_store_flush_errors_total` - Failed flush attempts
//! - `adx_store_ops_flushed_total` - Operations written by flushes
//! - `adx_store_credits_total` - Ledger credits applied
//! - `adx_store_records_pruned_total` - Records removed by retention
//! - `adx_store_flush_batch_size` - Histogram of flushed batch sizes

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::collections::BTreeMap;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Records accepted
    pub writes: IntCounter,

    /// Read operations
    pub reads: IntCounter,

    /// Failed operations
    pub errors: IntCounter,

    /// Batches flushed
    pub flushes: IntCounter,

    /// Failed flushes
    pub flush_errors: IntCounter,

    /// Operations flushed
    pub ops_flushed: IntCounter,

    /// Ledger credits
    pub credits: IntCounter,

    /// Records pruned by retention
    pub records_pruned: IntCounter,

    /// Flushed batch size histogram
    pub flush_batch_size: Histogram,

    registry: Registry,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::new(format!("adx_store_{}_total", name), help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let flush_batch_size = Histogram::with_opts(
            HistogramOpts::new(
                "adx_store_flush_batch_size",
                "Histogram of flushed batch sizes",
            )
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]),
        )?;
        registry.register(Box::new(flush_batch_size.clone()))?;

        Ok(Self {
            writes: counter(&registry, "writes", "Records accepted for storage")?,
            reads: counter(&registry, "reads", "Read operations served")?,
            errors: counter(&registry, "errors", "Failed operations")?,
            flushes: counter(&registry, "flushes", "Write buffer batches flushed")?,
            flush_errors: counter(&registry, "flush_errors", "Failed flush attempts")?,
            ops_flushed: counter(&registry, "ops_flushed", "Operations written by flushes")?,
            credits: counter(&registry, "credits", "Ledger credits applied")?,
            records_pruned: counter(&registry, "records_pruned", "Records removed by retention")?,
            flush_batch_size,
            registry,
        })
    }

    /// Record an accepted write
    pub fn record_write(&self) {
        self.writes.inc();
    }

    /// Record a served read
    pub fn record_read(&self) {
        self.reads.inc();
    }

    /// Record a failed operation
    pub fn record_error(&self) {
        self.errors.inc();
    }

    /// Record a successful batch flush
    pub fn record_flush(&self, batch_size: usize) {
        self.flushes.inc();
        self.ops_flushed.inc_by(batch_size as u64);
        self.flush_batch_size.observe(batch_size as f64);
    }

    /// Record a failed flush attempt
    pub fn record_flush_error(&self) {
        self.flush_errors.inc();
        self.errors.inc();
    }

    /// Record a ledger credit
    pub fn record_credit(&self) {
        self.credits.inc();
    }

    /// Record pruned records
    pub fn record_pruned(&self, count: u64) {
        self.records_pruned.inc_by(count);
    }

    /// Counter values by short name
    ///
    /// Each counter is read independently; the snapshot is not a consistent
    /// cut across counters.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        [
            ("writes", &self.writes),
            ("reads", &self.reads),
            ("errors", &self.errors),
            ("flushes", &self.flushes),
            ("flush_errors", &self.flush_errors),
            ("ops_flushed", &self.ops_flushed),
            ("credits", &self.credits),
            ("records_pruned", &self.records_pruned),
        ]
        .into_iter()
        .map(|(name, counter)| (name.to_string(), counter.get()))
        .collect()
    }

    /// Prometheus text exposition of every metric
    pub fn encode_text(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("metric names are static and unique per registry")
    }
}
