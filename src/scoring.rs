//! Scoring, ranking, dedup, and regime collaborators.
//!
//! The pipeline consumes these through narrow async traits so any of
//! them can be absent (the corresponding stage becomes a no-op) and so
//! tests can substitute mocks. The default implementations here cover
//! the standalone deployment: a star/weight composite scorer, a
//! score-ordered ranker, a same-day duplicate filter backed by the
//! signal history, and a session-phase regime classifier.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::storage::SignalHistory;
use crate::types::{
    CandidateSignal, CompositeScore, ConfirmationResult, MarketPhase, RankedSignal,
    RegimeModifiers, SessionClock, StrategyId,
};

/// Highest reachable star rating after confirmation boosts.
pub const MAX_STARS: u8 = 5;

/// Star rating after applying a confirmation boost, capped at [`MAX_STARS`].
pub fn effective_stars(base: u8, confirmation: Option<&ConfirmationResult>) -> u8 {
    let boost = confirmation.map(|c| c.star_boost).unwrap_or(0);
    (base + boost).min(MAX_STARS)
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Turns a candidate plus its confirmation into a composite score.
#[async_trait]
pub trait CompositeScorer: Send + Sync {
    async fn score(
        &self,
        candidate: &CandidateSignal,
        confirmation: Option<&ConfirmationResult>,
        date: NaiveDate,
    ) -> Result<CompositeScore>;
}

/// Orders the surviving candidates into the final signal list.
#[async_trait]
pub trait SignalRanker: Send + Sync {
    async fn rank(
        &self,
        candidates: &[CandidateSignal],
        composite_scores: Option<&HashMap<String, CompositeScore>>,
        confirmations: Option<&HashMap<String, ConfirmationResult>>,
    ) -> Result<Vec<RankedSignal>>;
}

/// Cross-strategy duplicate suppression.
#[async_trait]
pub trait DuplicateChecker: Send + Sync {
    async fn filter_duplicates(
        &self,
        candidates: &[CandidateSignal],
        date: NaiveDate,
    ) -> Result<Vec<CandidateSignal>>;
}

/// Classifies the current market regime into cycle modifiers.
#[async_trait]
pub trait RegimeClassifier: Send + Sync {
    async fn classify(&self, now: DateTime<Utc>) -> Result<RegimeModifiers>;
}

// ---------------------------------------------------------------------------
// Default composite scorer
// ---------------------------------------------------------------------------

/// Composite score = boosted stars × strategy weight, plus a small bonus
/// per additional agreeing strategy.
pub struct StarWeightedScorer {
    weights: HashMap<StrategyId, f64>,
    default_weight: f64,
}

impl StarWeightedScorer {
    pub fn new(weights: HashMap<StrategyId, f64>) -> Self {
        Self {
            weights,
            default_weight: 1.0,
        }
    }
}

impl Default for StarWeightedScorer {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

#[async_trait]
impl CompositeScorer for StarWeightedScorer {
    async fn score(
        &self,
        candidate: &CandidateSignal,
        confirmation: Option<&ConfirmationResult>,
        _date: NaiveDate,
    ) -> Result<CompositeScore> {
        let stars = effective_stars(candidate.star_rating, confirmation);
        let weight = self
            .weights
            .get(&candidate.strategy)
            .copied()
            .unwrap_or(self.default_weight);
        let agreement = confirmation.map(|c| c.strategies.len()).unwrap_or(1);

        Ok(CompositeScore {
            score: stars as f64 * weight + (agreement.saturating_sub(1)) as f64 * 0.5,
            effective_stars: stars,
        })
    }
}

// ---------------------------------------------------------------------------
// Default ranker
// ---------------------------------------------------------------------------

/// Orders by composite score descending; ties break on symbol so the
/// output is deterministic regardless of input order.
pub struct ScoreRanker;

#[async_trait]
impl SignalRanker for ScoreRanker {
    async fn rank(
        &self,
        candidates: &[CandidateSignal],
        composite_scores: Option<&HashMap<String, CompositeScore>>,
        confirmations: Option<&HashMap<String, ConfirmationResult>>,
    ) -> Result<Vec<RankedSignal>> {
        let mut ranked: Vec<RankedSignal> = candidates
            .iter()
            .map(|candidate| {
                let confirmation = confirmations
                    .and_then(|m| m.get(&candidate.symbol))
                    .cloned();
                let composite = composite_scores
                    .and_then(|m| m.get(&candidate.symbol))
                    .copied();
                let stars = effective_stars(candidate.star_rating, confirmation.as_ref());
                let size_multiplier = confirmation
                    .as_ref()
                    .map(|c| c.size_multiplier)
                    .unwrap_or(Decimal::ONE);

                RankedSignal {
                    candidate: candidate.clone(),
                    confirmation,
                    composite,
                    effective_stars: stars,
                    size_multiplier,
                    quantity: 0,
                    capital_required: Decimal::ZERO,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            let score_a = a.composite.map(|c| c.score).unwrap_or(a.effective_stars as f64);
            let score_b = b.composite.map(|c| c.score).unwrap_or(b.effective_stars as f64);
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.candidate.symbol.cmp(&b.candidate.symbol))
        });

        Ok(ranked)
    }
}

// ---------------------------------------------------------------------------
// Default duplicate checker
// ---------------------------------------------------------------------------

/// Keeps the strongest candidate per instrument and drops instruments
/// that already produced an emitted signal today.
pub struct DailyDuplicateChecker {
    history: Arc<dyn SignalHistory>,
}

impl DailyDuplicateChecker {
    pub fn new(history: Arc<dyn SignalHistory>) -> Self {
        Self { history }
    }
}

#[async_trait]
impl DuplicateChecker for DailyDuplicateChecker {
    async fn filter_duplicates(
        &self,
        candidates: &[CandidateSignal],
        date: NaiveDate,
    ) -> Result<Vec<CandidateSignal>> {
        // Strongest candidate per symbol; ties break on strategy order so
        // the winner is independent of arrival order.
        let mut best: BTreeMap<&str, &CandidateSignal> = BTreeMap::new();
        for candidate in candidates {
            let slot = best.entry(candidate.symbol.as_str()).or_insert(candidate);
            if candidate.star_rating > slot.star_rating
                || (candidate.star_rating == slot.star_rating
                    && candidate.strategy < slot.strategy)
            {
                *slot = candidate;
            }
        }

        let mut kept = Vec::with_capacity(best.len());
        for (symbol, candidate) in best {
            if self.history.has_signal_today(symbol, date).await? {
                debug!(symbol, "Instrument already signalled today — dropping duplicate");
                continue;
            }
            kept.push(candidate.clone());
        }
        Ok(kept)
    }
}

// ---------------------------------------------------------------------------
// Default regime classifier
// ---------------------------------------------------------------------------

/// Phase-based regime: midday chop demands higher-quality signals and
/// smaller size; the open trades full size on normal quality.
pub struct SessionRegimeClassifier {
    clock: SessionClock,
}

impl SessionRegimeClassifier {
    pub fn new(clock: SessionClock) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl RegimeClassifier for SessionRegimeClassifier {
    async fn classify(&self, now: DateTime<Utc>) -> Result<RegimeModifiers> {
        let phase = self.clock.phase_at(now);
        let modifiers = match phase {
            MarketPhase::Midday => RegimeModifiers {
                min_star_rating: 4,
                size_multiplier: rust_decimal_macros::dec!(0.75),
                max_concurrent: Some(3),
                strategy_weights: HashMap::from([(StrategyId::MomentumSurge, 0.8)]),
            },
            MarketPhase::Afternoon => RegimeModifiers {
                min_star_rating: 3,
                ..RegimeModifiers::default()
            },
            _ => RegimeModifiers::default(),
        };
        Ok(modifiers)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
