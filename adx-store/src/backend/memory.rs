//! In-process ordered map standing in for a persistent engine

use super::{BatchOp, KvBackend, KvBatch, KvIter};
use crate::Result;
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

/// Keys copied out per read-lock acquisition while iterating
const ITER_CHUNK: usize = 256;

/// `BTreeMap` backend
///
/// Iterators copy keys out in chunks of [`ITER_CHUNK`], taking the read lock
/// once per chunk, so a long scan never blocks writers for its whole length.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    compactions: AtomicU64,
}

impl MemoryBackend {
    /// Empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// True when no keys are stored
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Number of `compact` calls served
    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }
}

impl KvBackend for MemoryBackend {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.map.read().contains_key(key))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn write_batch(&self, batch: KvBatch) -> Result<()> {
        let mut map = self.map.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    map.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iter_from<'a>(&'a self, prefix: &[u8], start: &[u8]) -> KvIter<'a> {
        let seek = if start < prefix { prefix } else { start };
        Box::new(ChunkedIter {
            map: &self.map,
            prefix: prefix.to_vec(),
            lower: Bound::Included(seek.to_vec()),
            chunk: VecDeque::new(),
            exhausted: false,
        })
    }

    fn compact(&self, _start: &[u8], _end: &[u8]) -> Result<()> {
        self.compactions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct ChunkedIter<'a> {
    map: &'a RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    prefix: Vec<u8>,
    lower: Bound<Vec<u8>>,
    chunk: VecDeque<(Vec<u8>, Vec<u8>)>,
    exhausted: bool,
}

impl ChunkedIter<'_> {
    fn refill(&mut self) {
        let map = self.map.read();
        let range = map.range::<Vec<u8>, _>((self.lower.clone(), Bound::Unbounded));
        for (key, value) in range {
            if !key.starts_with(&self.prefix) {
                self.exhausted = true;
                break;
            }
            self.chunk.push_back((key.clone(), value.clone()));
            if self.chunk.len() == ITER_CHUNK {
                break;
            }
        }
        match self.chunk.back() {
            Some((last, _)) if !self.exhausted => {
                self.lower = Bound::Excluded(last.clone());
            }
            Some(_) => {}
            None => self.exhausted = true,
        }
    }
}

impl Iterator for ChunkedIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.chunk.is_empty() && !self.exhausted {
            self.refill();
        }
        self.chunk.pop_front().map(Ok)
    }
}
