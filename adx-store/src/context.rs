//! Caller-supplied operation deadlines

use crate::{Error, Result};
use std::time::{Duration, Instant};

/// Per-call context carrying an optional deadline
///
/// Every exposed operation checks the deadline on entry; scans re-check it
/// per record and abort with [`Error::DeadlineExceeded`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
}

impl OpContext {
    /// No deadline
    pub fn background() -> Self {
        Self { deadline: None }
    }

    /// Deadline `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Absolute deadline
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline (`None` when unbounded)
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail with `DeadlineExceeded` once the deadline has passed
    pub fn check(&self, operation: &'static str) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(Error::DeadlineExceeded(operation))
            }
            _ => Ok(()),
        }
    }
}
