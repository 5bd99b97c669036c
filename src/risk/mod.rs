//! Risk controls — circuit breaker, adaptive throttle, position sizing.
//!
//! The breaker and adaptive manager are mutated only from the trade-exit
//! notification path (via [`RiskEventHandler`]) and read by the pipeline's
//! gate and strategy stages; both sit behind a tokio mutex so the two
//! paths never race.

pub mod adaptive;
pub mod circuit_breaker;
pub mod position_sizer;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::events::{Event, EventHandler};
use adaptive::AdaptiveManager;
use circuit_breaker::CircuitBreaker;

/// Bus subscriber that routes exit events into the risk components.
///
/// Registered for `StopLossHit` before any alert handler so the breaker
/// always observes a loss before anything else reacts to it.
pub struct RiskEventHandler {
    breaker: Arc<Mutex<CircuitBreaker>>,
    adaptive: Arc<Mutex<AdaptiveManager>>,
}

impl RiskEventHandler {
    pub fn new(breaker: Arc<Mutex<CircuitBreaker>>, adaptive: Arc<Mutex<AdaptiveManager>>) -> Self {
        Self { breaker, adaptive }
    }
}

#[async_trait]
impl EventHandler for RiskEventHandler {
    fn name(&self) -> &str {
        "risk_guards"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        match event {
            Event::StopLossHit(hit) => {
                let mut breaker = self.breaker.lock().await;
                breaker
                    .on_sl_hit(&hit.symbol, hit.strategy, hit.pnl, hit.at)
                    .await
            }
            Event::TradeExited(exit) => {
                let mut adaptive = self.adaptive.lock().await;
                adaptive.record_exit(exit.strategy, exit.pnl, exit.at).await
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, EventKind, StopLossHitEvent, TradeExitedEvent};
    use crate::storage::{MockAdaptationLog, MockBreakerLog};
    use crate::types::{AdaptationLevel, Direction, ExitReason, StrategyId};
    use super::adaptive::AdaptiveThresholds;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn wired() -> (
        Arc<EventBus>,
        Arc<Mutex<CircuitBreaker>>,
        Arc<Mutex<AdaptiveManager>>,
    ) {
        let bus = Arc::new(EventBus::new());

        let mut breaker_log = MockBreakerLog::new();
        breaker_log
            .expect_record_activation()
            .returning(|_, _, _| Ok(()));
        let breaker = Arc::new(Mutex::new(CircuitBreaker::new(
            2,
            Arc::new(breaker_log),
            bus.clone(),
        )));

        let mut adaptation_log = MockAdaptationLog::new();
        adaptation_log
            .expect_record_transition()
            .returning(|_, _, _, _, _, _| Ok(()));
        let adaptive = Arc::new(Mutex::new(AdaptiveManager::new(
            AdaptiveThresholds::default(),
            Arc::new(adaptation_log),
        )));

        let handler = Arc::new(RiskEventHandler::new(breaker.clone(), adaptive.clone()));
        bus.subscribe(EventKind::StopLossHit, handler.clone());
        bus.subscribe(EventKind::TradeExited, handler);

        (bus, breaker, adaptive)
    }

    #[tokio::test]
    async fn test_stop_loss_events_trip_breaker() {
        let (bus, breaker, _adaptive) = wired();
        let now = Utc::now();

        for symbol in ["ACME", "GLOBEX"] {
            bus.emit(Event::StopLossHit(StopLossHitEvent {
                symbol: symbol.to_string(),
                strategy: StrategyId::VwapBreakout,
                pnl: dec!(-100),
                at: now,
            }))
            .await;
        }

        assert!(breaker.lock().await.is_active());
    }

    #[tokio::test]
    async fn test_trade_exits_drive_adaptation() {
        let (bus, _breaker, adaptive) = wired();
        let now = Utc::now();

        for _ in 0..3 {
            bus.emit(Event::TradeExited(TradeExitedEvent {
                symbol: "ACME".into(),
                strategy: StrategyId::MomentumSurge,
                direction: Direction::Long,
                pnl: dec!(-40),
                reason: ExitReason::StopLoss,
                at: now,
            }))
            .await;
        }

        assert_eq!(
            adaptive.lock().await.level(StrategyId::MomentumSurge),
            AdaptationLevel::Reduced
        );
    }
}
