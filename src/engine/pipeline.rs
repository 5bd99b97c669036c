//! Scan pipeline — ordered stages over a single per-cycle context.
//!
//! The scheduler builds one [`ScanContext`] per polling cycle and threads
//! it through every registered stage in registration order. Stages mutate
//! the context in place; a stage whose collaborator is absent or whose
//! input is empty must leave the context untouched so the rest of the
//! pipeline still runs. An unhandled stage error aborts the cycle and
//! propagates to the scheduler, which logs and moves on to the next tick.
//!
//! Stage order is a hard contract: the gate runs before anything that
//! consults `accepting_signals`, and no stage may observe a later stage's
//! output.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use crate::types::{
    CandidateSignal, CompositeScore, ConfirmationResult, InstrumentSnapshot, MarketPhase,
    RankedSignal, RegimeModifiers, StrategyId,
};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Mutable, single-cycle state owned exclusively by one pipeline
/// invocation. Created fresh each cycle and discarded afterwards —
/// never shared across cycles.
#[derive(Debug)]
pub struct ScanContext {
    pub now: DateTime<Utc>,
    pub phase: MarketPhase,
    /// Cleared by the gate stage when the breaker is active or the phase
    /// disallows entries. Later stages must respect it.
    pub accepting_signals: bool,
    pub enabled_strategies: BTreeSet<StrategyId>,
    /// Snapshots fetched during strategy evaluation, reused by the exit
    /// monitor.
    pub snapshots: HashMap<String, InstrumentSnapshot>,
    /// Raw candidates produced this cycle (post adaptive filter, post
    /// dedup once that stage ran).
    pub candidates: Vec<CandidateSignal>,
    /// Instrument → confirmation, present once the confidence stage ran.
    pub confirmations: Option<HashMap<String, ConfirmationResult>>,
    /// Instrument → composite score, present once the scoring stage ran.
    pub composite_scores: Option<HashMap<String, CompositeScore>>,
    /// Final ranked output.
    pub ranked: Vec<RankedSignal>,
    /// Regime-derived modifiers, present once the regime stage ran.
    pub regime: Option<RegimeModifiers>,
}

impl ScanContext {
    pub fn new(
        now: DateTime<Utc>,
        phase: MarketPhase,
        enabled_strategies: BTreeSet<StrategyId>,
    ) -> Self {
        Self {
            now,
            phase,
            accepting_signals: true,
            enabled_strategies,
            snapshots: HashMap::new(),
            candidates: Vec::new(),
            confirmations: None,
            composite_scores: None,
            ranked: Vec::new(),
            regime: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// One unit of cycle work. Implementations must be no-ops when their
/// input or collaborator is missing.
#[async_trait]
pub trait ScanStage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn process(&self, ctx: &mut ScanContext) -> Result<()>;
}

/// Ordered stage list executed once per polling cycle.
pub struct ScanPipeline {
    stages: Vec<Box<dyn ScanStage>>,
}

impl ScanPipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage. Stages execute strictly in registration order.
    pub fn register(mut self, stage: Box<dyn ScanStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run all stages over the context. The first stage error aborts the
    /// cycle; the context is discarded by the caller.
    pub async fn process(&self, ctx: &mut ScanContext) -> Result<()> {
        for stage in &self.stages {
            debug!(stage = stage.name(), "Running pipeline stage");
            stage
                .process(ctx)
                .await
                .with_context(|| format!("Pipeline stage '{}' failed", stage.name()))?;
        }

        info!(
            phase = %ctx.phase,
            accepting = ctx.accepting_signals,
            candidates = ctx.candidates.len(),
            ranked = ctx.ranked.len(),
            "Pipeline cycle complete"
        );
        Ok(())
    }
}

impl Default for ScanPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct NamedStage {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl ScanStage for NamedStage {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn process(&self, _ctx: &mut ScanContext) -> Result<()> {
            self.order.lock().unwrap().push(self.name);
            if self.fail {
                anyhow::bail!("{} exploded", self.name);
            }
            Ok(())
        }
    }

    fn ctx() -> ScanContext {
        ScanContext::new(Utc::now(), MarketPhase::Morning, BTreeSet::new())
    }

    fn stage(
        name: &'static str,
        order: &Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    ) -> Box<NamedStage> {
        Box::new(NamedStage {
            name,
            order: order.clone(),
            fail,
        })
    }

    #[tokio::test]
    async fn test_stages_run_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ScanPipeline::new()
            .register(stage("gate", &order, false))
            .register(stage("strategies", &order, false))
            .register(stage("ranking", &order, false));

        pipeline.process(&mut ctx()).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["gate", "strategies", "ranking"]);
        assert_eq!(pipeline.stage_names(), vec!["gate", "strategies", "ranking"]);
    }

    #[tokio::test]
    async fn test_stage_error_aborts_remaining_stages() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ScanPipeline::new()
            .register(stage("first", &order, false))
            .register(stage("boom", &order, true))
            .register(stage("never", &order, false));

        let err = pipeline.process(&mut ctx()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(*order.lock().unwrap(), vec!["first", "boom"]);
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_a_noop() {
        let pipeline = ScanPipeline::new();
        let mut context = ctx();
        pipeline.process(&mut context).await.unwrap();
        assert!(context.accepting_signals);
        assert!(context.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_context_starts_clean() {
        let context = ctx();
        assert!(context.accepting_signals);
        assert!(context.confirmations.is_none());
        assert!(context.composite_scores.is_none());
        assert!(context.regime.is_none());
        assert!(context.ranked.is_empty());
    }
}
