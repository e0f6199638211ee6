//! Shared fixtures for integration tests

#![allow(dead_code)]

use adx_store::backend::{BatchOp, KvBackend, KvBatch, KvIter, MemoryBackend};
use adx_store::{Config, EventStore, ImpressionRecord, Money, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Parse a money literal
pub fn money(s: &str) -> Money {
    s.parse().unwrap()
}

/// In-memory store with the given batch size
pub fn memory_store(batch_size: usize) -> EventStore {
    let mut config = Config::in_memory();
    config.batching.max_batch_size = batch_size;
    EventStore::open(config).unwrap()
}

/// Impression with publisher, advertiser and user filled in
pub fn impression(id: &str, ts: DateTime<Utc>, price: &str) -> ImpressionRecord {
    let mut imp = ImpressionRecord::new(id, ts, money(price));
    imp.publisher_id = "pub-1".to_string();
    imp.advertiser_id = "adv-1".to_string();
    imp.user_id = format!("user-{}", id);
    imp
}

/// Memory backend that records every batch it applies
#[derive(Debug, Default)]
pub struct RecordingBackend {
    inner: MemoryBackend,
    batches: Mutex<Vec<Vec<BatchOp>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applied batches in application order
    pub fn batches(&self) -> Vec<Vec<BatchOp>> {
        self.batches.lock().clone()
    }
}

impl KvBackend for RecordingBackend {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put(key, value)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(key)
    }

    fn write_batch(&self, batch: KvBatch) -> Result<()> {
        self.batches.lock().push(batch.ops().to_vec());
        self.inner.write_batch(batch)
    }

    fn iter_from<'a>(&'a self, prefix: &[u8], start: &[u8]) -> KvIter<'a> {
        self.inner.iter_from(prefix, start)
    }

    fn compact(&self, start: &[u8], end: &[u8]) -> Result<()> {
        self.inner.compact(start, end)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

/// Memory backend whose batch writes and compactions can be made to fail
#[derive(Debug, Default)]
pub struct FlakyBackend {
    pub inner: MemoryBackend,
    fail_batches: AtomicBool,
    fail_compaction: AtomicBool,
    fail_delete_of: Mutex<Option<String>>,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }

    pub fn fail_compaction(&self, fail: bool) {
        self.fail_compaction.store(fail, Ordering::SeqCst);
    }

    /// Fail the next batch that deletes a key ending in `id`, once
    pub fn fail_next_delete_of(&self, id: &str) {
        *self.fail_delete_of.lock() = Some(id.to_string());
    }

    fn take_delete_failure(&self, batch: &KvBatch) -> bool {
        let mut target = self.fail_delete_of.lock();
        let hit = match target.as_deref() {
            Some(id) => batch.ops().iter().any(|op| {
                matches!(op, BatchOp::Delete(key) if key.ends_with(id.as_bytes()))
            }),
            None => false,
        };
        if hit {
            *target = None;
        }
        hit
    }
}

impl KvBackend for FlakyBackend {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put(key, value)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(key)
    }

    fn write_batch(&self, batch: KvBatch) -> Result<()> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(adx_store::Error::Backend("injected batch failure".to_string()));
        }
        if self.take_delete_failure(&batch) {
            return Err(adx_store::Error::Backend("injected delete failure".to_string()));
        }
        self.inner.write_batch(batch)
    }

    fn iter_from<'a>(&'a self, prefix: &[u8], start: &[u8]) -> KvIter<'a> {
        self.inner.iter_from(prefix, start)
    }

    fn compact(&self, start: &[u8], end: &[u8]) -> Result<()> {
        if self.fail_compaction.load(Ordering::SeqCst) {
            return Err(adx_store::Error::Backend("injected compaction failure".to_string()));
        }
        self.inner.compact(start, end)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}
