//! Ad-exchange event store and earnings ledger
//!
//! Ingests impressions and bids from the bidding pipeline, serves them back
//! by ID and by time range, and keeps an exact-decimal ledger of miner
//! earnings.
//!
//! # Architecture
//!
//! - **Injected engine**: persistence is a [`backend::KvBackend`] handed in at
//!   construction (RocksDB on disk, an ordered map in tests)
//! - **Time-ordered keys**: big-endian epoch nanoseconds make range queries a
//!   seek plus a forward scan
//! - **Batching**: writes queue in a FIFO [`buffer::WriteBuffer`] and reach the
//!   engine as atomic batches
//! - **Per-key locking**: upserts serialize per record ID, credits per miner
//!
//! # Invariants
//!
//! - Money is fixed-scale decimal; no floating point touches an amount
//! - A failed flush never drops operations
//! - Retention never removes a record at or after its cutoff
//! - Stats are recomputable views, never a source of truth

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod backend;
pub mod buffer;
pub mod config;
pub mod context;
pub mod earnings;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod money;
pub mod records;
pub mod retention;
pub mod stats;
pub mod store;
pub mod types;

// Re-exports
pub use config::Config;
pub use context::OpContext;
pub use error::{Error, Result};
pub use money::Money;
pub use retention::RetentionReport;
pub use store::{BackgroundTasks, EventStore};
pub use types::{
    AdvertiserStats, BidRecord, BidStatus, EarningsEntry, ImpressionRecord, PublisherStats,
    RecordKind,
};
