//! Key-value engine seam
//!
//! The store never owns its persistence: it is handed an [`KvBackend`] at
//! construction. [`MemoryBackend`] is the in-process fake used by tests and
//! ephemeral nodes, [`RocksBackend`] the on-disk engine.

mod memory;
mod rocks;

pub use memory::MemoryBackend;
pub use rocks::RocksBackend;

use crate::types::{WriteOp, WriteOpKind};
use crate::Result;
use std::fmt;

/// Ordered key/value pairs yielded by [`KvBackend::iter_from`]
pub type KvIter<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + 'a>;

/// One mutation inside a [`KvBatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or replace
    Put(Vec<u8>, Vec<u8>),
    /// Remove
    Delete(Vec<u8>),
}

/// Multi-put/delete applied atomically by [`KvBackend::write_batch`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvBatch {
    ops: Vec<BatchOp>,
}

impl KvBatch {
    /// Empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    /// Queue a delete
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    /// Number of queued mutations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queued mutations in submission order
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consume into the queued mutations
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

impl<'a> FromIterator<&'a WriteOp> for KvBatch {
    fn from_iter<I: IntoIterator<Item = &'a WriteOp>>(iter: I) -> Self {
        let mut batch = KvBatch::new();
        for op in iter {
            match op.kind {
                WriteOpKind::Put => batch.put(op.key.clone(), op.value.clone()),
                WriteOpKind::Delete => batch.delete(op.key.clone()),
            }
        }
        batch
    }
}

/// Persistent key-value engine consumed by the store
pub trait KvBackend: Send + Sync + fmt::Debug {
    /// Insert or replace one key
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Value for `key`, `None` when absent
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// True when `key` is present
    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Remove one key (absent keys are not an error)
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Apply every mutation in `batch` or none of them
    fn write_batch(&self, batch: KvBatch) -> Result<()>;

    /// Keys starting with `prefix`, ascending, beginning at the first key `>= start`
    fn iter_from<'a>(&'a self, prefix: &[u8], start: &[u8]) -> KvIter<'a>;

    /// Keys starting with `prefix`, ascending
    fn iter_prefix<'a>(&'a self, prefix: &[u8]) -> KvIter<'a> {
        self.iter_from(prefix, prefix)
    }

    /// Reclaim space for keys in `[start, end)`
    fn compact(&self, start: &[u8], end: &[u8]) -> Result<()>;

    /// Flush and release engine resources
    fn close(&self) -> Result<()>;
}
