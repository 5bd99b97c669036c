//! Multi-strategy confirmation detection.
//!
//! Groups the cycle's candidates by instrument and unions the current
//! strategy set with the distinct strategies that signalled the same
//! instrument within a trailing window. Classification depends only on
//! the resulting set of strategy names — never on candidate order or
//! duplicate entries.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::storage::SignalHistory;
use crate::types::{CandidateSignal, ConfirmationResult, StrategyId};

/// Default trailing window for "recent" agreement.
pub const DEFAULT_WINDOW_MINUTES: i64 = 15;

pub struct ConfidenceDetector {
    history: Arc<dyn SignalHistory>,
    window: Duration,
}

impl ConfidenceDetector {
    pub fn new(history: Arc<dyn SignalHistory>, window_minutes: i64) -> Self {
        Self {
            history,
            window: Duration::minutes(window_minutes.max(1)),
        }
    }

    /// Compute a confirmation result per instrument present in the batch.
    /// Every candidate for an instrument receives the same result.
    pub async fn detect(
        &self,
        candidates: &[CandidateSignal],
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, ConfirmationResult>> {
        let mut by_symbol: HashMap<&str, BTreeSet<StrategyId>> = HashMap::new();
        for candidate in candidates {
            by_symbol
                .entry(candidate.symbol.as_str())
                .or_default()
                .insert(candidate.strategy);
        }

        let cutoff = now - self.window;
        let mut out = HashMap::with_capacity(by_symbol.len());

        for (symbol, mut strategies) in by_symbol {
            let recent = self.history.strategies_since(symbol, cutoff).await?;
            strategies.extend(recent);

            let result = ConfirmationResult::from_strategies(strategies);
            debug!(
                symbol,
                level = %result.level,
                agreeing = result.strategies.len(),
                "Confirmation classified"
            );
            out.insert(symbol.to_string(), result);
        }

        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
