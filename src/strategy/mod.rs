//! Strategy engine — independent signal generators over the same
//! snapshot batch.
//!
//! Each strategy declares which market phases it trades and evaluates
//! the full snapshot batch into zero or more [`CandidateSignal`]s.
//! Strategies must tolerate transient data gaps by skipping the affected
//! instrument — never by returning an error.

pub mod momentum;
pub mod orb;
pub mod vwap;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{CandidateSignal, InstrumentSnapshot, MarketPhase, StrategyId};

/// A signal-generating strategy.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Stable identity used for enable flags, adaptation, and history.
    fn id(&self) -> StrategyId;

    /// Phases in which the strategy produces entries. Defaults to the
    /// capability mapping on [`StrategyId`].
    fn active_phases(&self) -> &'static [MarketPhase] {
        self.id().active_phases()
    }

    /// Evaluate a snapshot batch. Instruments with missing or degenerate
    /// data are skipped; the result is empty rather than an error.
    async fn evaluate(
        &self,
        snapshots: &[InstrumentSnapshot],
        phase: MarketPhase,
    ) -> Result<Vec<CandidateSignal>>;
}
