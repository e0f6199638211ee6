//! Event store facade
//!
//! Ties the backend, write buffer, record store, earnings ledger, retention
//! optimizer and stats aggregator into one handle. There is no global
//! instance: callers open a store and pass it where it is needed.
//!
//! # Example
//!
//! ```no_run
//! use adx_store::{Config, EventStore, ImpressionRecord, Money, OpContext};
//! use chrono::Utc;
//!
//! fn main() -> adx_store::Result<()> {
//!     let store = EventStore::open(Config::in_memory())?;
//!     let ctx = OpContext::background();
//!
//!     let mut imp = ImpressionRecord::new("imp-1", Utc::now(), "3.50".parse::<Money>()?);
//!     imp.miner_id = "miner-7".to_string();
//!     store.store_impression(&ctx, &imp)?;
//!
//!     let earned = store.get_earnings(&ctx, "miner-7")?;
//!     println!("miner-7 earned {}", earned);
//!
//!     store.close()
//! }
//! ```

use crate::{
    backend::{KvBackend, MemoryBackend, RocksBackend},
    buffer::{FlushTask, WriteBuffer},
    config::BackendKind,
    context::OpContext,
    earnings::EarningsLedger,
    metrics::Metrics,
    money::Money,
    records::RecordStore,
    retention::{RetentionOptimizer, RetentionReport, RetentionTask},
    stats::StatsAggregator,
    types::{AdvertiserStats, BidRecord, EarningsEntry, ImpressionRecord, PublisherStats},
    Config, Error, Result,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Event store and earnings ledger
#[derive(Debug)]
pub struct EventStore {
    config: Config,
    backend: Arc<dyn KvBackend>,
    metrics: Arc<Metrics>,
    buffer: Arc<WriteBuffer>,
    records: Arc<RecordStore>,
    ledger: EarningsLedger,
    retention: Arc<RetentionOptimizer>,
    stats: StatsAggregator,
}

impl EventStore {
    /// Open the backend named by `config.backend`
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let backend: Arc<dyn KvBackend> = match config.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            BackendKind::RocksDb => Arc::new(RocksBackend::open(&config.data_dir, &config.rocksdb)?),
        };
        Self::with_backend(backend, config)
    }

    /// Build a store over an injected backend
    pub fn with_backend(backend: Arc<dyn KvBackend>, config: Config) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(
            Metrics::new().map_err(|e| Error::Config(format!("metrics registry: {}", e)))?,
        );
        let buffer = Arc::new(WriteBuffer::new(
            backend.clone(),
            metrics.clone(),
            &config.batching,
        ));
        let records = Arc::new(RecordStore::new(
            backend.clone(),
            buffer.clone(),
            metrics.clone(),
        ));
        let ledger = EarningsLedger::new(backend.clone(), metrics.clone());
        let retention = Arc::new(RetentionOptimizer::new(
            backend.clone(),
            buffer.clone(),
            records.clone(),
            config.retention.window(),
        ));
        let stats = StatsAggregator::new(records.clone(), metrics.clone());

        tracing::info!(
            service = %config.service_name,
            backend = ?config.backend,
            batch_size = buffer.batch_size(),
            retention_days = config.retention.window_days,
            "Event store opened"
        );

        Ok(Self {
            config,
            backend,
            metrics,
            buffer,
            records,
            ledger,
            retention,
            stats,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Store an impression and settle the miner's share
    ///
    /// The miner is credited only after the impression is accepted. Storing
    /// the same impression twice credits twice; deduplication belongs to the
    /// caller.
    pub fn store_impression(&self, ctx: &OpContext, record: &ImpressionRecord) -> Result<()> {
        self.records.store_impression(ctx, record)?;

        if self.config.ledger.settle_on_ingest && record.carries_settlement() {
            let share = record
                .price
                .checked_mul_ratio(self.config.ledger.miner_share)
                .ok_or_else(|| {
                    Error::InvalidAmount(format!("miner share of {} overflowed", record.price))
                })?;
            if !share.is_zero() {
                self.ledger.credit(ctx, &record.miner_id, share)?;
            }
        }
        Ok(())
    }

    /// Store a bid
    pub fn store_bid(&self, ctx: &OpContext, record: &BidRecord) -> Result<()> {
        self.records.store_bid(ctx, record)
    }

    /// Impression by ID
    pub fn get_impression(&self, ctx: &OpContext, id: &str) -> Result<ImpressionRecord> {
        self.records.get_impression(ctx, id)
    }

    /// Bid by ID
    pub fn get_bid(&self, ctx: &OpContext, id: &str) -> Result<BidRecord> {
        self.records.get_bid(ctx, id)
    }

    /// Impressions in `[start, end)`, ascending by timestamp, at most `limit`
    ///
    /// Range queries read flushed data only. A record still waiting in the
    /// write buffer becomes visible once its batch fills
    /// (`batching.max_batch_size` ops) or the interval flusher runs
    /// (`batching.flush_interval_ms`), whichever comes first; call
    /// [`EventStore::flush`] to see it immediately. Lookups by ID read
    /// through the buffer.
    pub fn get_impressions(
        &self,
        ctx: &OpContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ImpressionRecord>> {
        self.records.get_impressions(ctx, start, end, limit)
    }

    /// Bids in `[start, end)`, ascending by timestamp, at most `limit`
    ///
    /// Buffered bids follow the same visibility rule as
    /// [`EventStore::get_impressions`].
    pub fn get_bids(
        &self,
        ctx: &OpContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<BidRecord>> {
        self.records.get_bids(ctx, start, end, limit)
    }

    /// Credit a miner; returns the new balance
    pub fn credit_earnings(&self, ctx: &OpContext, miner_id: &str, amount: Money) -> Result<Money> {
        self.ledger.credit(ctx, miner_id, amount)
    }

    /// Miner balance; zero for unknown miners
    pub fn get_earnings(&self, ctx: &OpContext, miner_id: &str) -> Result<Money> {
        self.ledger.balance(ctx, miner_id)
    }

    /// Every persisted miner balance
    pub fn earnings_entries(&self, ctx: &OpContext) -> Result<Vec<EarningsEntry>> {
        self.ledger.entries(ctx)
    }

    /// Counter snapshot
    pub fn get_metrics(&self) -> BTreeMap<String, u64> {
        self.metrics.snapshot()
    }

    /// Run a retention pass now
    pub fn optimize(&self, ctx: &OpContext) -> Result<RetentionReport> {
        self.retention.optimize(ctx)
    }

    /// Publisher stats for `[start, end)`
    pub fn publisher_stats(
        &self,
        ctx: &OpContext,
        publisher_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PublisherStats> {
        self.stats.publisher_stats(ctx, publisher_id, start, end)
    }

    /// Advertiser stats for `[start, end)`
    pub fn advertiser_stats(
        &self,
        ctx: &OpContext,
        advertiser_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AdvertiserStats> {
        self.stats.advertiser_stats(ctx, advertiser_id, start, end)
    }

    /// Flush buffered writes; returns the number of operations written
    pub fn flush(&self) -> Result<usize> {
        self.buffer.flush()
    }

    /// Operations waiting in the write buffer
    pub fn pending_writes(&self) -> usize {
        self.buffer.pending_len()
    }

    /// Start the interval flusher and periodic retention, as configured
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_background(&self) -> BackgroundTasks {
        let (flush, errors) = if self.config.batching.enabled {
            let (task, errors) = FlushTask::spawn(
                self.buffer.clone(),
                std::time::Duration::from_millis(self.config.batching.flush_interval_ms),
            );
            (Some(task), Some(errors))
        } else {
            (None, None)
        };

        let retention = self.config.retention.enabled.then(|| {
            RetentionTask::spawn(
                self.retention.clone(),
                std::time::Duration::from_secs(self.config.retention.interval_secs),
            )
        });

        BackgroundTasks {
            flush,
            retention,
            errors,
        }
    }

    /// Drain the write buffer and close the backend
    pub fn close(&self) -> Result<()> {
        let drained = self.buffer.flush()?;
        self.backend.close()?;
        tracing::info!(drained, "Event store closed");
        Ok(())
    }
}

/// Handles to the store's background tasks
#[derive(Debug)]
pub struct BackgroundTasks {
    flush: Option<FlushTask>,
    retention: Option<RetentionTask>,
    errors: Option<mpsc::UnboundedReceiver<Error>>,
}

impl BackgroundTasks {
    /// Errors from timer-triggered flushes (taken once)
    pub fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<Error>> {
        self.errors.take()
    }

    /// Stop retention, then stop the flusher after a final drain
    pub async fn shutdown(self) {
        if let Some(retention) = self.retention {
            retention.shutdown().await;
        }
        if let Some(flush) = self.flush {
            flush.shutdown().await;
        }
    }
}
