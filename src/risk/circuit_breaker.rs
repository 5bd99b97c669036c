//! Day-scoped circuit breaker.
//!
//! Counts stop-loss hits for the trading day and halts acceptance of new
//! signals once the configured limit is reached. A warning alert fires
//! when the count reaches `limit - 1`; the trip itself persists an
//! activation record and emits a detailed summary of the day's hits.
//!
//! Overriding is manual, valid only while tripped, and sticky: once
//! overridden, further hits in the same day never re-trip the breaker.
//! `reset_daily` must run exactly once at the start of each trading day.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::events::{AlertMessageEvent, AlertSeverity, Event, EventBus};
use crate::storage::BreakerLog;
use crate::types::{SlHit, StrategyId};

pub struct CircuitBreaker {
    limit: u32,
    sl_count: u32,
    active: bool,
    overridden: bool,
    hits: Vec<SlHit>,
    log: Arc<dyn BreakerLog>,
    bus: Arc<EventBus>,
}

impl CircuitBreaker {
    pub fn new(limit: u32, log: Arc<dyn BreakerLog>, bus: Arc<EventBus>) -> Self {
        Self {
            limit: limit.max(1),
            sl_count: 0,
            active: false,
            overridden: false,
            hits: Vec::new(),
            log,
            bus,
        }
    }

    /// Whether new signals are currently halted. Read by the gate stage;
    /// the gate never mutates breaker state.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_overridden(&self) -> bool {
        self.overridden
    }

    pub fn sl_count(&self) -> u32 {
        self.sl_count
    }

    pub fn hits(&self) -> &[SlHit] {
        &self.hits
    }

    /// Register a stop-loss hit.
    ///
    /// Increments the daily counter, keeps the hit detail for the trip
    /// summary, warns at `limit - 1`, and trips at `limit` unless already
    /// tripped or overridden.
    pub async fn on_sl_hit(
        &mut self,
        symbol: &str,
        strategy: StrategyId,
        pnl: Decimal,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.sl_count += 1;
        self.hits.push(SlHit {
            symbol: symbol.to_string(),
            strategy,
            pnl,
            at,
        });

        info!(
            symbol,
            strategy = %strategy,
            pnl = %pnl,
            count = self.sl_count,
            limit = self.limit,
            "Stop-loss hit recorded"
        );

        if self.sl_count == self.limit - 1 {
            self.bus
                .emit(Event::AlertMessage(AlertMessageEvent {
                    severity: AlertSeverity::Warning,
                    title: "Circuit breaker warning".to_string(),
                    body: format!(
                        "{} of {} stop-losses hit today — one more halts new signals.",
                        self.sl_count, self.limit
                    ),
                    at,
                }))
                .await;
        }

        if self.sl_count >= self.limit && !self.active && !self.overridden {
            self.trip(at).await?;
        }

        Ok(())
    }

    async fn trip(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.active = true;
        let total_loss: Decimal = self.hits.iter().map(|h| h.pnl).sum();

        warn!(
            count = self.sl_count,
            total_loss = %total_loss,
            "Circuit breaker TRIPPED — halting new signals for the day"
        );

        self.log
            .record_activation(at.date_naive(), self.sl_count, total_loss)
            .await?;

        let detail = self
            .hits
            .iter()
            .map(|h| format!("{} {} {}", h.symbol, h.strategy, h.pnl))
            .collect::<Vec<_>>()
            .join("\n");

        self.bus
            .emit(Event::AlertMessage(AlertMessageEvent {
                severity: AlertSeverity::Critical,
                title: "Circuit breaker tripped".to_string(),
                body: format!(
                    "{} stop-losses today, total {}.\n{}",
                    self.sl_count, total_loss, detail
                ),
                at,
            }))
            .await;

        Ok(())
    }

    /// Manually override a tripped breaker, re-enabling signal acceptance
    /// for the rest of the day. Returns `false` (no state change) when the
    /// breaker is not currently tripped. Sticky: later hits do not re-trip.
    pub async fn override_halt(&mut self, at: DateTime<Utc>) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }

        self.log.record_override(at.date_naive()).await?;
        self.active = false;
        self.overridden = true;

        warn!("Circuit breaker manually overridden — signals re-enabled for today");
        self.bus
            .emit(Event::AlertMessage(AlertMessageEvent {
                severity: AlertSeverity::Warning,
                title: "Circuit breaker overridden".to_string(),
                body: format!(
                    "Manual override after {} stop-losses. Further hits today will not re-trip.",
                    self.sl_count
                ),
                at,
            }))
            .await;

        Ok(true)
    }

    /// Unconditionally return to the normal state. Invoke exactly once at
    /// the start of each trading day.
    pub fn reset_daily(&mut self) {
        self.sl_count = 0;
        self.active = false;
        self.overridden = false;
        self.hits.clear();
        info!("Circuit breaker reset for new trading day");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventHandler, EventKind};
    use crate::storage::MockBreakerLog;
    use crate::storage::StorageError;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// Collects alert events emitted by the breaker.
    struct AlertSink {
        seen: Mutex<Vec<AlertMessageEvent>>,
    }

    #[async_trait]
    impl EventHandler for AlertSink {
        fn name(&self) -> &str {
            "alert_sink"
        }
        async fn handle(&self, event: &Event) -> Result<()> {
            if let Event::AlertMessage(msg) = event {
                self.seen.lock().unwrap().push(msg.clone());
            }
            Ok(())
        }
    }

    fn quiet_log() -> Arc<MockBreakerLog> {
        let mut log = MockBreakerLog::new();
        log.expect_record_activation().returning(|_, _, _| Ok(()));
        log.expect_record_override().returning(|_| Ok(()));
        log.expect_record_resume().returning(|_| Ok(()));
        Arc::new(log)
    }

    fn wired(limit: u32) -> (CircuitBreaker, Arc<AlertSink>) {
        let bus = Arc::new(EventBus::new());
        let sink = Arc::new(AlertSink {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(EventKind::AlertMessage, sink.clone());
        (CircuitBreaker::new(limit, quiet_log(), bus), sink)
    }

    #[tokio::test]
    async fn test_trips_exactly_at_limit() {
        let (mut breaker, _sink) = wired(3);
        let now = Utc::now();

        breaker
            .on_sl_hit("ACME", StrategyId::VwapBreakout, dec!(-100), now)
            .await
            .unwrap();
        assert!(!breaker.is_active());

        breaker
            .on_sl_hit("GLOBEX", StrategyId::OpeningRange, dec!(-150), now)
            .await
            .unwrap();
        assert!(!breaker.is_active());

        breaker
            .on_sl_hit("INITECH", StrategyId::MomentumSurge, dec!(-200), now)
            .await
            .unwrap();
        assert!(breaker.is_active());
        assert_eq!(breaker.sl_count(), 3);
        assert_eq!(breaker.hits().len(), 3);
    }

    #[tokio::test]
    async fn test_warning_fires_at_limit_minus_one() {
        let (mut breaker, sink) = wired(3);
        let now = Utc::now();

        breaker
            .on_sl_hit("ACME", StrategyId::VwapBreakout, dec!(-100), now)
            .await
            .unwrap();
        assert!(sink.seen.lock().unwrap().is_empty());

        breaker
            .on_sl_hit("GLOBEX", StrategyId::VwapBreakout, dec!(-100), now)
            .await
            .unwrap();
        {
            let seen = sink.seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].severity, AlertSeverity::Warning);
        }

        // Third hit trips: one critical alert, no second warning.
        breaker
            .on_sl_hit("INITECH", StrategyId::VwapBreakout, dec!(-100), now)
            .await
            .unwrap();
        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].severity, AlertSeverity::Critical);
        assert!(seen[1].body.contains("3 stop-losses"));
    }

    #[tokio::test]
    async fn test_override_is_sticky_for_the_day() {
        let (mut breaker, _sink) = wired(2);
        let now = Utc::now();

        breaker
            .on_sl_hit("ACME", StrategyId::VwapBreakout, dec!(-100), now)
            .await
            .unwrap();
        breaker
            .on_sl_hit("GLOBEX", StrategyId::VwapBreakout, dec!(-100), now)
            .await
            .unwrap();
        assert!(breaker.is_active());

        assert!(breaker.override_halt(now).await.unwrap());
        assert!(!breaker.is_active());
        assert!(breaker.is_overridden());

        // Further hits keep counting but never re-trip.
        breaker
            .on_sl_hit("INITECH", StrategyId::VwapBreakout, dec!(-100), now)
            .await
            .unwrap();
        breaker
            .on_sl_hit("UMBRELLA", StrategyId::VwapBreakout, dec!(-100), now)
            .await
            .unwrap();
        assert!(!breaker.is_active());
        assert_eq!(breaker.sl_count(), 4);
    }

    #[tokio::test]
    async fn test_override_when_not_tripped_is_refused() {
        let (mut breaker, _sink) = wired(3);
        assert!(!breaker.override_halt(Utc::now()).await.unwrap());
        assert!(!breaker.is_overridden());
    }

    #[tokio::test]
    async fn test_override_surfaces_missing_activation_row() {
        let bus = Arc::new(EventBus::new());
        let mut log = MockBreakerLog::new();
        log.expect_record_activation().returning(|_, _, _| Ok(()));
        log.expect_record_override().returning(|day| {
            Err(StorageError::NotFound(format!("no activation for {day}")).into())
        });
        let mut breaker = CircuitBreaker::new(1, Arc::new(log), bus);

        breaker
            .on_sl_hit("ACME", StrategyId::VwapBreakout, dec!(-100), Utc::now())
            .await
            .unwrap();
        assert!(breaker.is_active());

        let err = breaker.override_halt(Utc::now()).await.unwrap_err();
        assert!(err.downcast_ref::<StorageError>().is_some());
        // Persistence failed, so no state change happened.
        assert!(breaker.is_active());
        assert!(!breaker.is_overridden());
    }

    #[tokio::test]
    async fn test_reset_daily_clears_everything() {
        let (mut breaker, _sink) = wired(2);
        let now = Utc::now();

        breaker
            .on_sl_hit("ACME", StrategyId::VwapBreakout, dec!(-100), now)
            .await
            .unwrap();
        breaker
            .on_sl_hit("GLOBEX", StrategyId::VwapBreakout, dec!(-100), now)
            .await
            .unwrap();
        breaker.override_halt(now).await.unwrap();

        breaker.reset_daily();
        assert_eq!(breaker.sl_count(), 0);
        assert!(!breaker.is_active());
        assert!(!breaker.is_overridden());
        assert!(breaker.hits().is_empty());

        // A fresh day can trip again.
        breaker
            .on_sl_hit("ACME", StrategyId::VwapBreakout, dec!(-100), now)
            .await
            .unwrap();
        breaker
            .on_sl_hit("GLOBEX", StrategyId::VwapBreakout, dec!(-100), now)
            .await
            .unwrap();
        assert!(breaker.is_active());
    }
}
