//! Persistence collaborators.
//!
//! The scan engine consumes these narrow interfaces and never talks to
//! the database directly: signal history lookups for confirmation and
//! dedup, activation/override/resume rows for the circuit breaker, and
//! the adaptation audit log. Every write is safe to retry; reads on a
//! day with no matching row surface [`StorageError::NotFound`].

pub mod sqlite;
pub mod state;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Mutex;
use thiserror::Error;

use crate::types::{
    AdaptationLevel, Direction, ExitReason, OpenPosition, RankedSignal, StrategyId,
};

/// Typed persistence failures the core distinguishes.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A row the operation requires does not exist (e.g. overriding a
    /// breaker on a day with no activation record).
    #[error("no record found: {0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Signal history
// ---------------------------------------------------------------------------

/// Read/write access to the emitted-signal history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalHistory: Send + Sync {
    /// Distinct strategies that emitted a signal for `symbol` at or after
    /// `since`.
    async fn strategies_since(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<StrategyId>>;

    /// Whether any signal for `symbol` was already emitted on `date`.
    async fn has_signal_today(&self, symbol: &str, date: NaiveDate) -> Result<bool>;

    /// Record an emitted signal. Idempotent: re-recording the same signal
    /// id is a no-op.
    async fn record_signal(&self, signal: &RankedSignal) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Circuit breaker log
// ---------------------------------------------------------------------------

/// Activation/override/resume records for the circuit breaker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BreakerLog: Send + Sync {
    /// Record (or update) the day's activation. Safe to retry.
    async fn record_activation(
        &self,
        day: NaiveDate,
        sl_count: u32,
        total_loss: Decimal,
    ) -> Result<()>;

    /// Mark the day's activation as manually overridden.
    /// Fails with [`StorageError::NotFound`] when no activation row exists.
    async fn record_override(&self, day: NaiveDate) -> Result<()>;

    /// Mark the day's activation as resumed at daily reset.
    /// Fails with [`StorageError::NotFound`] when no activation row exists.
    async fn record_resume(&self, day: NaiveDate) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Adaptation log
// ---------------------------------------------------------------------------

/// Audit trail of adaptive-manager level transitions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdaptationLog: Send + Sync {
    async fn record_transition(
        &self,
        day: NaiveDate,
        strategy: StrategyId,
        old_level: AdaptationLevel,
        new_level: AdaptationLevel,
        consecutive_losses: u32,
        reason: &str,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Position book
// ---------------------------------------------------------------------------

/// Open-position source for the exit monitor.
#[async_trait]
pub trait PositionBook: Send + Sync {
    async fn open_positions(&self) -> Result<Vec<OpenPosition>>;

    /// Close a position after an exit was detected. Idempotent: closing
    /// an already-closed position is a no-op.
    async fn mark_closed(
        &self,
        symbol: &str,
        strategy: StrategyId,
        reason: ExitReason,
        exit_price: Decimal,
    ) -> Result<()>;
}

/// In-memory position book for paper tracking and tests.
pub struct MemoryPositionBook {
    positions: Mutex<Vec<OpenPosition>>,
}

impl MemoryPositionBook {
    pub fn new() -> Self {
        Self {
            positions: Mutex::new(Vec::new()),
        }
    }

    pub fn open(
        &self,
        symbol: &str,
        strategy: StrategyId,
        direction: Direction,
        entry: Decimal,
        stop: Decimal,
        target: Decimal,
        quantity: u64,
    ) {
        self.positions.lock().unwrap().push(OpenPosition {
            symbol: symbol.to_string(),
            strategy,
            direction,
            entry,
            stop,
            target,
            quantity,
            opened_at: Utc::now(),
        });
    }

    pub fn open_count(&self) -> usize {
        self.positions.lock().unwrap().len()
    }
}

impl Default for MemoryPositionBook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PositionBook for MemoryPositionBook {
    async fn open_positions(&self) -> Result<Vec<OpenPosition>> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn mark_closed(
        &self,
        symbol: &str,
        strategy: StrategyId,
        _reason: ExitReason,
        _exit_price: Decimal,
    ) -> Result<()> {
        self.positions
            .lock()
            .unwrap()
            .retain(|p| !(p.symbol == symbol && p.strategy == strategy));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
