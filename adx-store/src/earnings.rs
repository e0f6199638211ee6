//! Per-miner earnings ledger
//!
//! Append-only: the only mutation is a non-negative credit. Each miner has
//! its own mutex (held in a [`DashMap`]) that serializes credits and caches
//! the balance; credits to different miners never contend.
//!
//! Balances are written straight to the backend on every credit rather than
//! through the write buffer, so an acknowledged credit is durable.

use crate::{
    backend::KvBackend, context::OpContext, keys, metrics::Metrics, money::Money,
    types::EarningsEntry, Error, Result,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

type BalanceSlot = Arc<Mutex<Option<Money>>>;

/// Earnings ledger over a key-value backend
#[derive(Debug)]
pub struct EarningsLedger {
    backend: Arc<dyn KvBackend>,
    metrics: Arc<Metrics>,
    balances: DashMap<String, BalanceSlot>,
}

impl EarningsLedger {
    /// Create a ledger
    pub fn new(backend: Arc<dyn KvBackend>, metrics: Arc<Metrics>) -> Self {
        Self {
            backend,
            metrics,
            balances: DashMap::new(),
        }
    }

    /// Add `amount` to the miner's balance and return the new balance
    pub fn credit(&self, ctx: &OpContext, miner_id: &str, amount: Money) -> Result<Money> {
        let result = self.apply_credit(ctx, miner_id, amount);
        match &result {
            Ok(balance) => {
                self.metrics.record_credit();
                tracing::debug!(miner_id, %amount, %balance, "Credited earnings");
            }
            Err(_) => self.metrics.record_error(),
        }
        result
    }

    /// Current balance; zero for a miner that was never credited
    pub fn balance(&self, ctx: &OpContext, miner_id: &str) -> Result<Money> {
        let result = self.read_balance(ctx, miner_id);
        match &result {
            Ok(_) => self.metrics.record_read(),
            Err(_) => self.metrics.record_error(),
        }
        result
    }

    /// Balance snapshot for one miner
    pub fn entry(&self, ctx: &OpContext, miner_id: &str) -> Result<EarningsEntry> {
        Ok(EarningsEntry {
            miner_id: miner_id.to_string(),
            balance: self.balance(ctx, miner_id)?,
        })
    }

    /// Every persisted balance, ordered by miner ID
    pub fn entries(&self, ctx: &OpContext) -> Result<Vec<EarningsEntry>> {
        ctx.check("earnings scan")?;
        let prefix = keys::earnings_key("");
        let mut out = Vec::new();
        for item in self.backend.iter_prefix(&prefix) {
            ctx.check("earnings scan")?;
            let (key, value) = item?;
            let miner_id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            let balance = decode_balance(&miner_id, &value)?;
            out.push(EarningsEntry { miner_id, balance });
        }
        self.metrics.record_read();
        Ok(out)
    }

    fn apply_credit(&self, ctx: &OpContext, miner_id: &str, amount: Money) -> Result<Money> {
        ctx.check("credit")?;
        validate_miner(miner_id)?;
        if amount.is_negative() {
            return Err(Error::NegativeAmount(format!(
                "credit of {} to miner {}",
                amount, miner_id
            )));
        }

        // Clone the slot out so the map shard is not held across backend I/O
        let slot = self.slot(miner_id);
        let mut cached = slot.lock();

        let current = match *cached {
            Some(balance) => balance,
            None => self.load(miner_id)?,
        };
        let updated = current.checked_add(amount).ok_or_else(|| {
            Error::InvalidAmount(format!(
                "balance overflow crediting {} to miner {}",
                amount, miner_id
            ))
        })?;

        self.backend
            .put(&keys::earnings_key(miner_id), updated.to_string().as_bytes())
            .map_err(|e| Error::Backend(format!("persist balance for {}: {}", miner_id, e)))?;

        *cached = Some(updated);
        Ok(updated)
    }

    fn read_balance(&self, ctx: &OpContext, miner_id: &str) -> Result<Money> {
        ctx.check("get earnings")?;
        validate_miner(miner_id)?;

        let slot = match self.balances.get(miner_id) {
            Some(slot) => Arc::clone(slot.value()),
            None => return self.load(miner_id),
        };
        let mut cached = slot.lock();
        match *cached {
            Some(balance) => Ok(balance),
            None => {
                let balance = self.load(miner_id)?;
                *cached = Some(balance);
                Ok(balance)
            }
        }
    }

    fn slot(&self, miner_id: &str) -> BalanceSlot {
        if let Some(slot) = self.balances.get(miner_id) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.balances
                .entry(miner_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .value(),
        )
    }

    fn load(&self, miner_id: &str) -> Result<Money> {
        match self.backend.get(&keys::earnings_key(miner_id))? {
            Some(raw) => decode_balance(miner_id, &raw),
            None => Ok(Money::ZERO),
        }
    }
}

fn validate_miner(miner_id: &str) -> Result<()> {
    if miner_id.trim().is_empty() {
        return Err(Error::InvalidRecord("miner id is empty".to_string()));
    }
    Ok(())
}

fn decode_balance(miner_id: &str, raw: &[u8]) -> Result<Money> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<Money>().ok())
        .ok_or_else(|| Error::Backend(format!("corrupt balance stored for miner {}", miner_id)))
}
