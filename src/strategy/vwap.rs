//! VWAP breakout strategy.
//!
//! Signals when price stretches beyond VWAP by a configured fraction on
//! elevated volume. Long above VWAP, short below; the stop sits on the
//! far side of VWAP and the target is two risk-units out.
//!
//! The strategy is deliberately noisy at high polling frequencies, so a
//! per-instrument cooldown limits signals per day and enforces a minimum
//! gap between consecutive signals. The cooldown survives restarts via
//! [`CooldownState`] serialize/restore.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::Strategy;
use crate::types::{CandidateSignal, Direction, InstrumentSnapshot, MarketPhase, StrategyId};

// ---------------------------------------------------------------------------
// Cooldown tracking
// ---------------------------------------------------------------------------

/// Per-instrument signal budget entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownEntry {
    pub count: u32,
    pub last_signal_at: DateTime<Utc>,
}

/// Serializable snapshot of the cooldown tracker, written to disk for
/// crash recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownState {
    pub day: NaiveDate,
    pub entries: HashMap<String, CooldownEntry>,
}

/// Throttles per-instrument signal frequency within one trading day.
#[derive(Debug)]
pub struct CooldownTracker {
    max_per_day: u32,
    min_gap: Duration,
    day: NaiveDate,
    entries: HashMap<String, CooldownEntry>,
}

impl CooldownTracker {
    pub fn new(max_per_day: u32, min_gap_minutes: i64, today: NaiveDate) -> Self {
        Self {
            max_per_day,
            min_gap: Duration::minutes(min_gap_minutes.max(0)),
            day: today,
            entries: HashMap::new(),
        }
    }

    /// Rebuild from a persisted snapshot. A snapshot from an earlier day
    /// is discarded on the first `should_allow` of the new day.
    pub fn restore(state: CooldownState, max_per_day: u32, min_gap_minutes: i64) -> Self {
        Self {
            max_per_day,
            min_gap: Duration::minutes(min_gap_minutes.max(0)),
            day: state.day,
            entries: state.entries,
        }
    }

    /// Snapshot for persistence.
    pub fn snapshot(&self) -> CooldownState {
        CooldownState {
            day: self.day,
            entries: self.entries.clone(),
        }
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            self.day = today;
            self.entries.clear();
        }
    }

    /// Whether another signal for `symbol` fits the daily budget and gap.
    pub fn should_allow(&mut self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.roll_day(now);
        match self.entries.get(symbol) {
            None => true,
            Some(entry) => {
                entry.count < self.max_per_day && now - entry.last_signal_at >= self.min_gap
            }
        }
    }

    /// Record a signal emission for `symbol`.
    pub fn record(&mut self, symbol: &str, now: DateTime<Utc>) {
        self.roll_day(now);
        let entry = self.entries.entry(symbol.to_string()).or_insert(CooldownEntry {
            count: 0,
            last_signal_at: now,
        });
        entry.count += 1;
        entry.last_signal_at = now;
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Tunables for the VWAP breakout.
#[derive(Debug, Clone)]
pub struct VwapParams {
    /// Volume must exceed the trailing average by this ratio.
    pub min_volume_ratio: f64,
    /// Fractional distance from VWAP that counts as a breakout.
    pub breakout_pct: Decimal,
    /// Stop buffer on the far side of VWAP, as a fraction of VWAP.
    pub stop_buffer_pct: Decimal,
}

impl Default for VwapParams {
    fn default() -> Self {
        Self {
            min_volume_ratio: 1.5,
            breakout_pct: dec!(0.002),
            stop_buffer_pct: dec!(0.003),
        }
    }
}

pub struct VwapBreakout {
    params: VwapParams,
    cooldown: Mutex<CooldownTracker>,
}

impl VwapBreakout {
    pub fn new(params: VwapParams, cooldown: CooldownTracker) -> Self {
        Self {
            params,
            cooldown: Mutex::new(cooldown),
        }
    }

    /// Snapshot of the cooldown tracker for persistence at shutdown.
    pub fn cooldown_state(&self) -> CooldownState {
        self.cooldown.lock().unwrap().snapshot()
    }

    fn stars(&self, stretch: Decimal, volume_ratio: f64) -> u8 {
        let mut stars = 3u8;
        if volume_ratio >= self.params.min_volume_ratio * 2.0 {
            stars += 1;
        }
        if stretch.abs() >= self.params.breakout_pct * dec!(2) {
            stars += 1;
        }
        stars.min(5)
    }
}

#[async_trait]
impl Strategy for VwapBreakout {
    fn id(&self) -> StrategyId {
        StrategyId::VwapBreakout
    }

    async fn evaluate(
        &self,
        snapshots: &[InstrumentSnapshot],
        _phase: MarketPhase,
    ) -> Result<Vec<CandidateSignal>> {
        let mut out = Vec::new();
        let mut cooldown = self.cooldown.lock().unwrap();

        for snap in snapshots {
            // Data gaps: no VWAP or no volume baseline yet.
            if snap.vwap <= Decimal::ZERO || snap.avg_volume == 0 {
                continue;
            }
            if snap.volume_ratio() < self.params.min_volume_ratio {
                continue;
            }
            if !cooldown.should_allow(&snap.symbol, snap.fetched_at) {
                debug!(symbol = %snap.symbol, "VWAP signal suppressed by cooldown");
                continue;
            }

            let stretch = (snap.last_price - snap.vwap) / snap.vwap;
            let (direction, stop) = if stretch >= self.params.breakout_pct {
                (
                    Direction::Long,
                    snap.vwap * (Decimal::ONE - self.params.stop_buffer_pct),
                )
            } else if stretch <= -self.params.breakout_pct {
                (
                    Direction::Short,
                    snap.vwap * (Decimal::ONE + self.params.stop_buffer_pct),
                )
            } else {
                continue;
            };

            let entry = snap.last_price;
            let risk = (entry - stop).abs();
            let target = match direction {
                Direction::Long => entry + risk * dec!(2),
                Direction::Short => entry - risk * dec!(2),
            };

            out.push(CandidateSignal {
                id: Uuid::new_v4(),
                symbol: snap.symbol.clone(),
                direction,
                strategy: self.id(),
                entry,
                stop,
                target,
                star_rating: self.stars(stretch, snap.volume_ratio()),
                generated_at: snap.fetched_at,
            });
            cooldown.record(&snap.symbol, snap.fetched_at);
        }

        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(symbol: &str, last: Decimal, vwap: Decimal, ratio: f64) -> InstrumentSnapshot {
        InstrumentSnapshot {
            symbol: symbol.to_string(),
            last_price: last,
            day_open: dec!(100),
            day_high: last.max(dec!(100)),
            day_low: last.min(dec!(100)),
            prev_close: dec!(100),
            vwap,
            volume: (1_000_000.0 * ratio) as u64,
            avg_volume: 1_000_000,
            opening_range_high: None,
            opening_range_low: None,
            fetched_at: Utc::now(),
        }
    }

    fn strategy() -> VwapBreakout {
        VwapBreakout::new(
            VwapParams::default(),
            CooldownTracker::new(3, 20, Utc::now().date_naive()),
        )
    }

    #[tokio::test]
    async fn test_long_above_vwap_on_volume() {
        let s = strategy();
        // 0.5% above VWAP, 2× volume.
        let out = s
            .evaluate(&[snapshot("ACME", dec!(100.5), dec!(100), 2.0)], MarketPhase::Morning)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        let sig = &out[0];
        assert_eq!(sig.direction, Direction::Long);
        assert_eq!(sig.strategy, StrategyId::VwapBreakout);
        assert!(sig.stop < sig.entry);
        assert!(sig.target > sig.entry);
    }

    #[tokio::test]
    async fn test_short_below_vwap() {
        let s = strategy();
        let out = s
            .evaluate(&[snapshot("ACME", dec!(99.5), dec!(100), 2.0)], MarketPhase::Morning)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].direction, Direction::Short);
        assert!(out[0].stop > out[0].entry);
        assert!(out[0].target < out[0].entry);
    }

    #[tokio::test]
    async fn test_inside_band_is_quiet() {
        let s = strategy();
        // 0.1% stretch is below the 0.2% breakout threshold.
        let out = s
            .evaluate(&[snapshot("ACME", dec!(100.1), dec!(100), 2.0)], MarketPhase::Morning)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_low_volume_is_quiet() {
        let s = strategy();
        let out = s
            .evaluate(&[snapshot("ACME", dec!(100.5), dec!(100), 1.0)], MarketPhase::Morning)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_data_gap_is_skipped_not_an_error() {
        let s = strategy();
        let mut gap = snapshot("ACME", dec!(100.5), dec!(100), 2.0);
        gap.vwap = Decimal::ZERO;
        let mut no_baseline = snapshot("GLOBEX", dec!(100.5), dec!(100), 2.0);
        no_baseline.avg_volume = 0;

        let out = s
            .evaluate(&[gap, no_baseline], MarketPhase::Morning)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_strong_move_earns_more_stars() {
        let s = strategy();
        let weak = s
            .evaluate(&[snapshot("ACME", dec!(100.25), dec!(100), 1.6)], MarketPhase::Morning)
            .await
            .unwrap();
        let strong = s
            .evaluate(&[snapshot("GLOBEX", dec!(100.6), dec!(100), 4.0)], MarketPhase::Morning)
            .await
            .unwrap();
        assert_eq!(weak[0].star_rating, 3);
        assert_eq!(strong[0].star_rating, 5);
    }

    #[tokio::test]
    async fn test_cooldown_gap_suppresses_repeat() {
        let s = VwapBreakout::new(
            VwapParams::default(),
            CooldownTracker::new(3, 20, Utc::now().date_naive()),
        );
        let snap = snapshot("ACME", dec!(100.5), dec!(100), 2.0);

        let first = s.evaluate(&[snap.clone()], MarketPhase::Morning).await.unwrap();
        assert_eq!(first.len(), 1);

        // Same instant: inside the 20-minute gap.
        let second = s.evaluate(&[snap], MarketPhase::Morning).await.unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_cooldown_daily_budget() {
        let day = Utc::now().date_naive();
        let mut tracker = CooldownTracker::new(2, 0, day);
        let t0 = Utc::now();

        assert!(tracker.should_allow("ACME", t0));
        tracker.record("ACME", t0);
        assert!(tracker.should_allow("ACME", t0));
        tracker.record("ACME", t0);
        // Budget of 2 exhausted.
        assert!(!tracker.should_allow("ACME", t0));
        // Other instruments are unaffected.
        assert!(tracker.should_allow("GLOBEX", t0));
    }

    #[test]
    fn test_cooldown_rolls_over_on_new_day() {
        let day = Utc::now().date_naive();
        let mut tracker = CooldownTracker::new(1, 0, day);
        let t0 = Utc::now();
        tracker.record("ACME", t0);
        assert!(!tracker.should_allow("ACME", t0));

        let tomorrow = t0 + Duration::days(1);
        assert!(tracker.should_allow("ACME", tomorrow));
    }

    #[test]
    fn test_cooldown_snapshot_restore_round_trip() {
        let day = Utc::now().date_naive();
        let mut tracker = CooldownTracker::new(1, 0, day);
        let t0 = Utc::now();
        tracker.record("ACME", t0);

        let mut restored = CooldownTracker::restore(tracker.snapshot(), 1, 0);
        assert!(!restored.should_allow("ACME", t0));
        assert!(restored.should_allow("GLOBEX", t0));
    }
}
