//! Concrete pipeline stages, in their contractual order:
//! gate → regime → strategies → confidence → scoring → dedup → ranking →
//! sizing → exit monitor → diagnostics.
//!
//! Optional collaborators are held as `Option<Arc<dyn Trait>>`; a stage
//! whose collaborator is absent (or whose input is empty) returns the
//! context untouched so the rest of the pipeline still runs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::confidence::ConfidenceDetector;
use super::pipeline::{ScanContext, ScanStage};
use crate::config::SettingsProvider;
use crate::data::MarketDataProvider;
use crate::events::{Event, EventBus, ExitAlertEvent, StopLossHitEvent, TradeExitedEvent};
use crate::risk::adaptive::AdaptiveManager;
use crate::risk::circuit_breaker::CircuitBreaker;
use crate::risk::position_sizer::PositionSizer;
use crate::scoring::{CompositeScorer, DuplicateChecker, RegimeClassifier, SignalRanker};
use crate::storage::{PositionBook, SignalHistory};
use crate::strategy::Strategy;
use crate::types::{Direction, ExitReason, OpenPosition};

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Clears `accepting_signals` when the phase disallows entries or the
/// circuit breaker is active. Reads breaker state only — never mutates it.
pub struct GateStage {
    breaker: Arc<Mutex<CircuitBreaker>>,
}

impl GateStage {
    pub fn new(breaker: Arc<Mutex<CircuitBreaker>>) -> Self {
        Self { breaker }
    }
}

#[async_trait]
impl ScanStage for GateStage {
    fn name(&self) -> &'static str {
        "gate"
    }

    async fn process(&self, ctx: &mut ScanContext) -> Result<()> {
        if !ctx.phase.accepts_entries() {
            debug!(phase = %ctx.phase, "Phase disallows new entries");
            ctx.accepting_signals = false;
            return Ok(());
        }

        if self.breaker.lock().await.is_active() {
            info!("Circuit breaker active — not accepting signals this cycle");
            ctx.accepting_signals = false;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Regime
// ---------------------------------------------------------------------------

/// Attaches regime modifiers when a classifier is configured.
pub struct RegimeStage {
    classifier: Option<Arc<dyn RegimeClassifier>>,
}

impl RegimeStage {
    pub fn new(classifier: Option<Arc<dyn RegimeClassifier>>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl ScanStage for RegimeStage {
    fn name(&self) -> &'static str {
        "regime"
    }

    async fn process(&self, ctx: &mut ScanContext) -> Result<()> {
        let Some(classifier) = &self.classifier else {
            debug!("No regime classifier configured — skipping");
            return Ok(());
        };
        let modifiers = classifier.classify(ctx.now).await?;
        debug!(
            min_stars = modifiers.min_star_rating,
            size_multiplier = %modifiers.size_multiplier,
            "Regime modifiers attached"
        );
        ctx.regime = Some(modifiers);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Strategy evaluation
// ---------------------------------------------------------------------------

/// Fetches snapshots and evaluates all enabled, phase-active strategies
/// concurrently. Results are merged serially into the context; the
/// adaptive throttle filters candidates before they enter it.
pub struct StrategyStage {
    strategies: Vec<Arc<dyn Strategy>>,
    data: Arc<dyn MarketDataProvider>,
    adaptive: Arc<Mutex<AdaptiveManager>>,
    settings: Arc<dyn SettingsProvider>,
}

impl StrategyStage {
    pub fn new(
        strategies: Vec<Arc<dyn Strategy>>,
        data: Arc<dyn MarketDataProvider>,
        adaptive: Arc<Mutex<AdaptiveManager>>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            strategies,
            data,
            adaptive,
            settings,
        }
    }
}

#[async_trait]
impl ScanStage for StrategyStage {
    fn name(&self) -> &'static str {
        "strategies"
    }

    async fn process(&self, ctx: &mut ScanContext) -> Result<()> {
        let settings = self.settings.current();
        if settings.universe.is_empty() {
            debug!("Empty universe — nothing to scan");
            return Ok(());
        }

        // Snapshots are fetched even when the gate closed acceptance:
        // the exit monitor downstream still needs current prices for
        // open positions.
        let snapshots = self
            .data
            .fetch_snapshots(&settings.universe)
            .await
            .context("Snapshot fetch failed")?;
        for snap in &snapshots {
            ctx.snapshots.insert(snap.symbol.clone(), snap.clone());
        }

        if !ctx.accepting_signals {
            debug!("Not accepting signals — skipping strategy evaluation");
            return Ok(());
        }

        let active: Vec<&Arc<dyn Strategy>> = self
            .strategies
            .iter()
            .filter(|s| {
                ctx.enabled_strategies.contains(&s.id())
                    && s.active_phases().contains(&ctx.phase)
            })
            .collect();
        if active.is_empty() {
            debug!(phase = %ctx.phase, "No strategies active in this phase");
            return Ok(());
        }

        // Concurrent evaluation; each strategy sees the same batch. The
        // shared context is only written after the join, serially.
        let results = join_all(
            active
                .iter()
                .map(|s| s.evaluate(&snapshots, ctx.phase)),
        )
        .await;

        let mut merged = Vec::new();
        for (strategy, result) in active.iter().zip(results) {
            match result {
                Ok(candidates) => merged.extend(candidates),
                Err(e) => warn!(
                    strategy = %strategy.id(),
                    error = %e,
                    "Strategy evaluation failed — skipping its output"
                ),
            }
        }

        let before = merged.len();
        {
            let adaptive = self.adaptive.lock().await;
            merged.retain(|c| adaptive.should_allow_signal(c.strategy, c.star_rating));
        }
        if merged.len() < before {
            info!(
                dropped = before - merged.len(),
                "Candidates blocked by adaptive throttle"
            );
        }

        info!(
            instruments = snapshots.len(),
            strategies = active.len(),
            candidates = merged.len(),
            "Strategy evaluation complete"
        );
        ctx.candidates = merged;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Confidence
// ---------------------------------------------------------------------------

/// Computes multi-strategy confirmations for the cycle's candidates.
pub struct ConfidenceStage {
    detector: Option<ConfidenceDetector>,
}

impl ConfidenceStage {
    pub fn new(detector: Option<ConfidenceDetector>) -> Self {
        Self { detector }
    }
}

#[async_trait]
impl ScanStage for ConfidenceStage {
    fn name(&self) -> &'static str {
        "confidence"
    }

    async fn process(&self, ctx: &mut ScanContext) -> Result<()> {
        let Some(detector) = &self.detector else {
            debug!("No confidence detector configured — skipping");
            return Ok(());
        };
        if ctx.candidates.is_empty() {
            return Ok(());
        }
        let confirmations = detector.detect(&ctx.candidates, ctx.now).await?;
        ctx.confirmations = Some(confirmations);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Composite scoring
// ---------------------------------------------------------------------------

/// Scores each instrument once; when several candidates share an
/// instrument the highest score wins, independent of candidate order.
/// Regime weight overrides are applied here so the scorer interface
/// stays narrow.
pub struct ScoringStage {
    scorer: Option<Arc<dyn CompositeScorer>>,
}

impl ScoringStage {
    pub fn new(scorer: Option<Arc<dyn CompositeScorer>>) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl ScanStage for ScoringStage {
    fn name(&self) -> &'static str {
        "scoring"
    }

    async fn process(&self, ctx: &mut ScanContext) -> Result<()> {
        let Some(scorer) = &self.scorer else {
            debug!("No composite scorer configured — skipping");
            return Ok(());
        };
        if ctx.candidates.is_empty() {
            return Ok(());
        }

        let date = ctx.now.date_naive();
        let mut scores = HashMap::new();
        for candidate in &ctx.candidates {
            let confirmation = ctx
                .confirmations
                .as_ref()
                .and_then(|m| m.get(&candidate.symbol));
            let mut score = scorer.score(candidate, confirmation, date).await?;

            if let Some(regime) = &ctx.regime {
                if let Some(weight) = regime.strategy_weights.get(&candidate.strategy) {
                    score.score *= weight;
                }
            }

            let improved = scores
                .get(&candidate.symbol)
                .map_or(true, |prev: &crate::types::CompositeScore| {
                    score.score > prev.score
                });
            if improved {
                scores.insert(candidate.symbol.clone(), score);
            }
        }

        ctx.composite_scores = Some(scores);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dedup
// ---------------------------------------------------------------------------

/// Wholesale candidate-list replacement through the duplicate checker.
pub struct DedupStage {
    checker: Option<Arc<dyn DuplicateChecker>>,
}

impl DedupStage {
    pub fn new(checker: Option<Arc<dyn DuplicateChecker>>) -> Self {
        Self { checker }
    }
}

#[async_trait]
impl ScanStage for DedupStage {
    fn name(&self) -> &'static str {
        "dedup"
    }

    async fn process(&self, ctx: &mut ScanContext) -> Result<()> {
        let Some(checker) = &self.checker else {
            debug!("No duplicate checker configured — skipping");
            return Ok(());
        };
        if ctx.candidates.is_empty() {
            return Ok(());
        }

        let before = ctx.candidates.len();
        let kept = checker
            .filter_duplicates(&ctx.candidates, ctx.now.date_naive())
            .await?;
        if kept.len() < before {
            info!(before, after = kept.len(), "Duplicates filtered");
        }
        ctx.candidates = kept;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Produces the final ordered signal list.
pub struct RankingStage {
    ranker: Option<Arc<dyn SignalRanker>>,
}

impl RankingStage {
    pub fn new(ranker: Option<Arc<dyn SignalRanker>>) -> Self {
        Self { ranker }
    }
}

#[async_trait]
impl ScanStage for RankingStage {
    fn name(&self) -> &'static str {
        "ranking"
    }

    async fn process(&self, ctx: &mut ScanContext) -> Result<()> {
        let Some(ranker) = &self.ranker else {
            debug!("No ranker configured — skipping");
            return Ok(());
        };
        if ctx.candidates.is_empty() {
            return Ok(());
        }

        ctx.ranked = ranker
            .rank(
                &ctx.candidates,
                ctx.composite_scores.as_ref(),
                ctx.confirmations.as_ref(),
            )
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

/// Applies the capital sizer to each ranked signal, folding in the
/// confirmation and regime multipliers, the regime star floor, and the
/// concurrent-position cap. Unaffordable signals (quantity 0) drop out.
pub struct SizingStage {
    settings: Arc<dyn SettingsProvider>,
}

impl SizingStage {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ScanStage for SizingStage {
    fn name(&self) -> &'static str {
        "sizing"
    }

    async fn process(&self, ctx: &mut ScanContext) -> Result<()> {
        if ctx.ranked.is_empty() {
            return Ok(());
        }

        let settings = self.settings.current();
        let (regime_multiplier, min_stars, max_concurrent) = ctx
            .regime
            .as_ref()
            .map(|r| (r.size_multiplier, r.min_star_rating, r.max_concurrent))
            .unwrap_or((Decimal::ONE, 0, None));

        let ranked = std::mem::take(&mut ctx.ranked);
        let mut sized = Vec::with_capacity(ranked.len());
        for mut signal in ranked {
            if signal.effective_stars < min_stars {
                debug!(
                    symbol = %signal.candidate.symbol,
                    stars = signal.effective_stars,
                    floor = min_stars,
                    "Signal below regime star floor — dropped"
                );
                continue;
            }

            let multiplier = signal.size_multiplier * regime_multiplier;
            let size = PositionSizer::calculate(
                signal.candidate.entry,
                settings.total_capital,
                settings.max_positions,
                multiplier,
            )
            .context("Position sizing failed")?;

            if size.quantity == 0 {
                debug!(
                    symbol = %signal.candidate.symbol,
                    entry = %signal.candidate.entry,
                    "Per-trade capital cannot afford one share — dropped"
                );
                continue;
            }

            signal.size_multiplier = multiplier;
            signal.quantity = size.quantity;
            signal.capital_required = size.capital_required;
            sized.push(signal);
        }

        if let Some(cap) = max_concurrent {
            if sized.len() > cap {
                info!(cap, dropped = sized.len() - cap, "Concurrent-position cap applied");
                sized.truncate(cap);
            }
        }

        ctx.ranked = sized;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Exit monitoring
// ---------------------------------------------------------------------------

/// Walks open positions against the cycle's snapshots and publishes
/// stop/target exits on the bus. Runs regardless of `accepting_signals`
/// so a tripped breaker never blinds exit handling.
pub struct ExitMonitorStage {
    positions: Option<Arc<dyn PositionBook>>,
    bus: Arc<EventBus>,
}

impl ExitMonitorStage {
    pub fn new(positions: Option<Arc<dyn PositionBook>>, bus: Arc<EventBus>) -> Self {
        Self { positions, bus }
    }

    fn detect_exit(position: &OpenPosition, last: Decimal) -> Option<(ExitReason, Decimal)> {
        match position.direction {
            Direction::Long => {
                if last <= position.stop {
                    Some((ExitReason::StopLoss, last))
                } else if last >= position.target {
                    Some((ExitReason::Target, last))
                } else {
                    None
                }
            }
            Direction::Short => {
                if last >= position.stop {
                    Some((ExitReason::StopLoss, last))
                } else if last <= position.target {
                    Some((ExitReason::Target, last))
                } else {
                    None
                }
            }
        }
    }
}

#[async_trait]
impl ScanStage for ExitMonitorStage {
    fn name(&self) -> &'static str {
        "exit_monitor"
    }

    async fn process(&self, ctx: &mut ScanContext) -> Result<()> {
        let Some(book) = &self.positions else {
            debug!("No position book configured — skipping exit monitoring");
            return Ok(());
        };

        for position in book.open_positions().await? {
            let Some(snapshot) = ctx.snapshots.get(&position.symbol) else {
                continue;
            };
            let Some((reason, exit_price)) = Self::detect_exit(&position, snapshot.last_price)
            else {
                continue;
            };

            let signed = match position.direction {
                Direction::Long => exit_price - position.entry,
                Direction::Short => position.entry - exit_price,
            };
            let pnl = signed * Decimal::from(position.quantity);

            info!(
                symbol = %position.symbol,
                strategy = %position.strategy,
                reason = %reason,
                pnl = %pnl,
                "Position exit detected"
            );

            // Mark closed before emitting so a handler failure cannot
            // cause the same exit to fire again next cycle.
            book.mark_closed(&position.symbol, position.strategy, reason, exit_price)
                .await?;

            if reason == ExitReason::StopLoss {
                self.bus
                    .emit(Event::StopLossHit(StopLossHitEvent {
                        symbol: position.symbol.clone(),
                        strategy: position.strategy,
                        pnl,
                        at: ctx.now,
                    }))
                    .await;
            }
            self.bus
                .emit(Event::TradeExited(TradeExitedEvent {
                    symbol: position.symbol.clone(),
                    strategy: position.strategy,
                    direction: position.direction,
                    pnl,
                    reason,
                    at: ctx.now,
                }))
                .await;
            self.bus
                .emit(Event::ExitAlert(ExitAlertEvent {
                    symbol: position.symbol.clone(),
                    strategy: position.strategy,
                    reason,
                    message: format!(
                        "{} {} exited at {} ({reason}, P&L {pnl})",
                        position.symbol, position.direction, exit_price
                    ),
                    at: ctx.now,
                }))
                .await;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Records the emitted signals into history and logs the cycle summary.
/// Recording failures degrade dedup/confirmation quality but must not
/// fail a cycle that already produced its output.
pub struct DiagnosticsStage {
    history: Option<Arc<dyn SignalHistory>>,
}

impl DiagnosticsStage {
    pub fn new(history: Option<Arc<dyn SignalHistory>>) -> Self {
        Self { history }
    }
}

#[async_trait]
impl ScanStage for DiagnosticsStage {
    fn name(&self) -> &'static str {
        "diagnostics"
    }

    async fn process(&self, ctx: &mut ScanContext) -> Result<()> {
        if let Some(history) = &self.history {
            for signal in &ctx.ranked {
                if let Err(e) = history.record_signal(signal).await {
                    warn!(
                        symbol = %signal.candidate.symbol,
                        error = %e,
                        "Failed to record emitted signal"
                    );
                }
            }
        }

        info!(
            phase = %ctx.phase,
            accepting = ctx.accepting_signals,
            candidates = ctx.candidates.len(),
            confirmed = ctx
                .confirmations
                .as_ref()
                .map(|m| m.len())
                .unwrap_or(0),
            emitted = ctx.ranked.len(),
            "Cycle diagnostics"
        );
        Ok(())
    }
}
