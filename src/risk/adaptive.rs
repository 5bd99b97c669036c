//! Per-strategy adaptive throttle.
//!
//! Tracks consecutive losses per strategy and degrades the strategy's
//! permission level: NORMAL → REDUCED (raised star floor) → PAUSED
//! (blocked entirely). A single winning trade restores NORMAL. Every
//! level transition is written to the adaptation log with a
//! human-readable reason.
//!
//! A strategy with no recorded exits is NORMAL: absence of state never
//! means paused.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::storage::AdaptationLog;
use crate::types::{AdaptationLevel, StrategyId};

/// Loss-count thresholds driving level transitions.
#[derive(Debug, Clone)]
pub struct AdaptiveThresholds {
    /// Consecutive losses at which a strategy drops to REDUCED.
    pub reduce_after: u32,
    /// Consecutive losses at which a strategy is PAUSED.
    pub pause_after: u32,
    /// Minimum star rating a REDUCED strategy may still emit.
    pub reduced_min_stars: u8,
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        Self {
            reduce_after: 3,
            pause_after: 5,
            reduced_min_stars: 5,
        }
    }
}

impl AdaptiveThresholds {
    fn level_for(&self, consecutive_losses: u32) -> AdaptationLevel {
        if consecutive_losses >= self.pause_after {
            AdaptationLevel::Paused
        } else if consecutive_losses >= self.reduce_after {
            AdaptationLevel::Reduced
        } else {
            AdaptationLevel::Normal
        }
    }
}

#[derive(Debug, Clone, Default)]
struct StrategyState {
    consecutive_losses: u32,
    level: Option<AdaptationLevel>,
}

impl StrategyState {
    fn level(&self) -> AdaptationLevel {
        self.level.unwrap_or(AdaptationLevel::Normal)
    }
}

/// Per-strategy consecutive-loss throttle.
pub struct AdaptiveManager {
    thresholds: AdaptiveThresholds,
    states: HashMap<StrategyId, StrategyState>,
    log: Arc<dyn AdaptationLog>,
}

impl AdaptiveManager {
    pub fn new(thresholds: AdaptiveThresholds, log: Arc<dyn AdaptationLog>) -> Self {
        Self {
            thresholds,
            states: HashMap::new(),
            log,
        }
    }

    /// Current level for a strategy (NORMAL when nothing is recorded).
    pub fn level(&self, strategy: StrategyId) -> AdaptationLevel {
        self.states
            .get(&strategy)
            .map(|s| s.level())
            .unwrap_or(AdaptationLevel::Normal)
    }

    pub fn consecutive_losses(&self, strategy: StrategyId) -> u32 {
        self.states
            .get(&strategy)
            .map(|s| s.consecutive_losses)
            .unwrap_or(0)
    }

    /// Whether the strategy may emit a signal of the given star rating.
    pub fn should_allow_signal(&self, strategy: StrategyId, star_rating: u8) -> bool {
        match self.level(strategy) {
            AdaptationLevel::Normal => true,
            AdaptationLevel::Reduced => star_rating >= self.thresholds.reduced_min_stars,
            AdaptationLevel::Paused => false,
        }
    }

    /// Update state from a trade exit. Wins reset the streak and restore
    /// NORMAL; losses extend the streak and may degrade the level.
    pub async fn record_exit(
        &mut self,
        strategy: StrategyId,
        pnl: Decimal,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let state = self.states.entry(strategy).or_default();
        let old_level = state.level();

        if pnl >= Decimal::ZERO {
            state.consecutive_losses = 0;
            state.level = Some(AdaptationLevel::Normal);
            if old_level != AdaptationLevel::Normal {
                info!(
                    strategy = %strategy,
                    from = %old_level,
                    "Winning trade restores strategy to NORMAL"
                );
                self.log
                    .record_transition(
                        at.date_naive(),
                        strategy,
                        old_level,
                        AdaptationLevel::Normal,
                        0,
                        "winning trade resets the loss streak",
                    )
                    .await?;
            }
            return Ok(());
        }

        state.consecutive_losses += 1;
        let losses = state.consecutive_losses;
        let new_level = self.thresholds.level_for(losses);
        state.level = Some(new_level);

        if new_level != old_level {
            info!(
                strategy = %strategy,
                from = %old_level,
                to = %new_level,
                consecutive_losses = losses,
                "Strategy throttle level changed"
            );
            self.log
                .record_transition(
                    at.date_naive(),
                    strategy,
                    old_level,
                    new_level,
                    losses,
                    &format!("{losses} consecutive losses"),
                )
                .await?;
        }

        Ok(())
    }

    /// Clear all per-strategy state at the start of a trading day.
    pub fn reset_daily(&mut self) {
        self.states.clear();
        info!("Adaptive manager reset for new trading day");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
