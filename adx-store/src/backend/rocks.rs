//! RocksDB engine adapter

use super::{BatchOp, KvBackend, KvBatch, KvIter};
use crate::{config::RocksDBConfig, error::Error, Result};
use rocksdb::{DBCompactionStyle, Direction, IteratorMode, Options, WriteBatch, DB};
use std::fmt;
use std::path::{Path, PathBuf};

/// RocksDB-backed [`KvBackend`]
pub struct RocksBackend {
    db: DB,
    path: PathBuf,
}

impl RocksBackend {
    /// Open or create database
    pub fn open(path: impl AsRef<Path>, config: &RocksDBConfig) -> Result<Self> {
        let path = path.as_ref();

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.max_background_jobs);
        db_opts.set_level_zero_file_num_compaction_trigger(
            config.level0_file_num_compaction_trigger,
        );

        // Level compaction: retention deletes whole time ranges and then
        // compacts them explicitly
        db_opts.set_compaction_style(DBCompactionStyle::Level);
        db_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        db_opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);

        if config.enable_statistics {
            db_opts.enable_statistics();
        }

        let db = DB::open(&db_opts, path)
            .map_err(|e| Error::Backend(format!("open {}: {}", path.display(), e)))?;

        tracing::info!(path = %path.display(), "Opened RocksDB");

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    /// Database directory
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for RocksBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RocksBackend")
            .field("path", &self.path)
            .finish()
    }
}

impl KvBackend for RocksBackend {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put(key, value)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.delete(key)?;
        Ok(())
    }

    fn write_batch(&self, batch: KvBatch) -> Result<()> {
        let mut wb = WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => wb.put(key, value),
                BatchOp::Delete(key) => wb.delete(key),
            }
        }

        // Atomic commit
        self.db.write(wb)?;
        Ok(())
    }

    fn iter_from<'a>(&'a self, prefix: &[u8], start: &[u8]) -> KvIter<'a> {
        let seek = if start < prefix { prefix } else { start };
        let prefix = prefix.to_vec();
        let iter = self
            .db
            .iterator(IteratorMode::From(seek, Direction::Forward))
            .map(|item| {
                item.map(|(k, v)| (k.into_vec(), v.into_vec()))
                    .map_err(Error::from)
            })
            .take_while(move |item| match item {
                Ok((key, _)) => key.starts_with(&prefix),
                Err(_) => true,
            });
        Box::new(iter)
    }

    fn compact(&self, start: &[u8], end: &[u8]) -> Result<()> {
        self.db.compact_range(Some(start), Some(end));
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.db.flush()?;
        tracing::info!(path = %self.path.display(), "RocksDB flushed for shutdown");
        Ok(())
    }
}
