//! Batched write buffering
//!
//! Callers enqueue [`WriteOp`]s; the buffer hands them to the backend in
//! FIFO batches of at most `max_batch_size` operations:
//!
//! ```text
//!   store_impression ──┐
//!   store_bid ─────────┼──► pending: VecDeque<WriteOp>
//!   retention ─────────┘          │
//!                                 │ len >= max_batch_size, flush(), or timer
//!                                 ▼
//!                    KvBackend::write_batch (atomic)
//! ```
//!
//! A batch is removed from the queue only after the backend accepts it, so a
//! failed flush leaves its operations at the head of the queue for the next
//! attempt. The queue lock is held across the backend write, which serializes
//! flushes and keeps batches in submission order.

use crate::{
    backend::{KvBackend, KvBatch},
    config::BatchingConfig,
    metrics::Metrics,
    types::{WriteOp, WriteOpKind},
    Error, Result,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Write buffer in front of a [`KvBackend`]
#[derive(Debug)]
pub struct WriteBuffer {
    backend: Arc<dyn KvBackend>,
    metrics: Arc<Metrics>,
    pending: Mutex<VecDeque<WriteOp>>,
    max_batch_size: usize,
    max_pending: usize,
}

impl WriteBuffer {
    /// Create a buffer over `backend`
    pub fn new(backend: Arc<dyn KvBackend>, metrics: Arc<Metrics>, config: &BatchingConfig) -> Self {
        let max_batch_size = if config.enabled {
            config.max_batch_size.max(1)
        } else {
            1
        };
        Self {
            backend,
            metrics,
            pending: Mutex::new(VecDeque::with_capacity(max_batch_size)),
            max_batch_size,
            max_pending: config.max_pending_ops.max(max_batch_size),
        }
    }

    /// Operations per flushed batch
    pub fn batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Operations waiting for a flush
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Enqueue one operation
    pub fn enqueue(&self, op: WriteOp) -> Result<()> {
        self.enqueue_all(vec![op])
    }

    /// Enqueue a group of operations contiguously
    ///
    /// Flushes every full batch before returning. If a flush fails the
    /// operations stay queued and the backend error is returned.
    pub fn enqueue_all(&self, ops: Vec<WriteOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut pending = self.pending.lock();
        if pending.len() + ops.len() > self.max_pending {
            return Err(Error::BufferFull(pending.len()));
        }
        pending.extend(ops);

        while pending.len() >= self.max_batch_size {
            self.flush_batch(&mut pending)?;
        }
        Ok(())
    }

    /// Latest buffered state of `key`
    ///
    /// `Some(Some(value))` for a pending put, `Some(None)` for a pending
    /// delete, `None` when the key has no pending operation.
    pub fn pending_value(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        let pending = self.pending.lock();
        pending
            .iter()
            .rev()
            .find(|op| op.key == key)
            .map(|op| match op.kind {
                WriteOpKind::Put => Some(op.value.clone()),
                WriteOpKind::Delete => None,
            })
    }

    /// Read `key` through the buffer: pending operations win over the backend
    pub fn read_through(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.pending_value(key) {
            Some(value) => Ok(value),
            None => self.backend.get(key),
        }
    }

    /// Flush everything pending; returns the number of operations written
    pub fn flush(&self) -> Result<usize> {
        let mut pending = self.pending.lock();
        let mut written = 0;
        while !pending.is_empty() {
            written += self.flush_batch(&mut pending)?;
        }
        Ok(written)
    }

    fn flush_batch(&self, pending: &mut VecDeque<WriteOp>) -> Result<usize> {
        let take = pending.len().min(self.max_batch_size);
        if take == 0 {
            return Ok(0);
        }

        let batch: KvBatch = pending.iter().take(take).collect();
        let started = Instant::now();

        match self.backend.write_batch(batch) {
            Ok(()) => {
                pending.drain(..take);
                self.metrics.record_flush(take);
                tracing::debug!(
                    batch_size = take,
                    remaining = pending.len(),
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "Flushed write batch"
                );
                Ok(take)
            }
            Err(e) => {
                self.metrics.record_flush_error();
                tracing::warn!(
                    batch_size = take,
                    pending = pending.len(),
                    error = %e,
                    "Write batch flush failed, operations retained"
                );
                Err(Error::Backend(format!(
                    "flush of {} operations failed ({} pending): {}",
                    take,
                    pending.len(),
                    e
                )))
            }
        }
    }
}

/// Background interval flusher
///
/// Errors from timer-triggered flushes have no caller to return to; they are
/// sent on the channel returned by [`FlushTask::spawn`].
#[derive(Debug)]
pub struct FlushTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FlushTask {
    /// Spawn the flusher on the current tokio runtime
    pub fn spawn(
        buffer: Arc<WriteBuffer>,
        period: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Error>) {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if buffer.pending_len() == 0 {
                            continue;
                        }
                        let buf = buffer.clone();
                        match tokio::task::spawn_blocking(move || buf.flush()).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => {
                                tracing::error!(error = %e, "Timed flush failed");
                                let _ = errors_tx.send(e);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Timed flush task panicked");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            // Final drain
            let buf = buffer.clone();
            match tokio::task::spawn_blocking(move || buf.flush()).await {
                Ok(Ok(n)) if n > 0 => tracing::info!(operations = n, "Drained write buffer on shutdown"),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Shutdown drain failed");
                    let _ = errors_tx.send(e);
                }
                Err(e) => tracing::error!(error = %e, "Shutdown drain task panicked"),
            }
        });

        (Self { shutdown, handle }, errors_rx)
    }

    /// Stop the timer, drain the buffer, and wait for the task
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Flush task terminated abnormally");
        }
    }
}
