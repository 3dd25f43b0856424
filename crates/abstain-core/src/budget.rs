// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Request Latency Budget
// ─────────────────────────────────────────────────────────────────────
//! Monotonic clocks and the per-request deadline.
//!
//! A [`Budget`] borrows the pipeline's clock, so it cannot outlive the
//! request that created it. Charges are serialized behind a mutex so
//! batches sharing one budget account for true wall-clock cost.
//!
//! Spent time is the larger of wall-clock elapsed time and the charged
//! total. Charges measured on the budget's own clock never exceed the
//! elapsed time; cost reported from elsewhere (e.g. device time) can
//! only bring the deadline closer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use abstain_types::BudgetState;

/// Monotonic time source, as an offset from an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall clock backed by `Instant`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for deterministic budget tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: f64) {
        self.advance(from_ms(ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

pub(crate) fn as_ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Millisecond float to a microsecond-resolution duration; non-finite
/// or negative input maps to zero.
pub(crate) fn from_ms(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_micros((ms * 1000.0).round() as u64)
    } else {
        Duration::ZERO
    }
}

/// Deadline for one top-level request.
pub struct Budget<'c> {
    clock: &'c dyn Clock,
    started: Duration,
    limit: Duration,
    charged: Mutex<Duration>,
}

impl<'c> Budget<'c> {
    /// Start a budget of `limit_ms` now.
    pub fn start(clock: &'c dyn Clock, limit_ms: f64) -> Self {
        Self {
            clock,
            started: clock.now(),
            limit: from_ms(limit_ms),
            charged: Mutex::new(Duration::ZERO),
        }
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Wall-clock time since request entry.
    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.started)
    }

    /// Time counted against the limit: elapsed or charged, whichever
    /// is larger.
    pub fn spent(&self) -> Duration {
        self.elapsed().max(self.charged())
    }

    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.spent())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Record scorer time against the budget. The charged total bounds
    /// [`Budget::remaining`] even when the clock has not moved.
    pub fn charge(&self, cost: Duration) {
        let mut charged = self.charged.lock();
        *charged += cost;
    }

    pub fn charged(&self) -> Duration {
        *self.charged.lock()
    }

    pub fn state(&self) -> BudgetState {
        let elapsed = self.elapsed();
        let charged = self.charged();
        let remaining = self.limit.saturating_sub(elapsed.max(charged));
        BudgetState {
            limit_ms: as_ms(self.limit),
            elapsed_ms: as_ms(elapsed),
            charged_ms: as_ms(charged),
            remaining_ms: as_ms(remaining),
            exhausted: remaining.is_zero(),
        }
    }
}
