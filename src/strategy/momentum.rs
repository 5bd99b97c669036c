//! Momentum surge strategy.
//!
//! Signals on an outsized percent move from the previous close backed by
//! a relative-volume surge. Direction follows the move; the stop is a
//! fixed fraction off the entry.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use super::Strategy;
use crate::types::{CandidateSignal, Direction, InstrumentSnapshot, MarketPhase, StrategyId};

pub struct MomentumSurge {
    /// Minimum percent move from the previous close.
    min_change_pct: f64,
    min_volume_ratio: f64,
    /// Initial stop distance as a fraction of entry price.
    stop_pct: Decimal,
}

impl MomentumSurge {
    pub fn new(min_change_pct: f64, min_volume_ratio: f64, stop_pct: Decimal) -> Self {
        Self {
            min_change_pct,
            min_volume_ratio,
            stop_pct,
        }
    }

    fn stars(&self, change_pct: f64, volume_ratio: f64) -> u8 {
        let mut stars = 3u8;
        if change_pct.abs() >= self.min_change_pct * 2.0 {
            stars += 1;
        }
        if volume_ratio >= self.min_volume_ratio * 2.0 {
            stars += 1;
        }
        stars.min(5)
    }
}

impl Default for MomentumSurge {
    fn default() -> Self {
        Self::new(2.0, 2.0, dec!(0.0075))
    }
}

#[async_trait]
impl Strategy for MomentumSurge {
    fn id(&self) -> StrategyId {
        StrategyId::MomentumSurge
    }

    async fn evaluate(
        &self,
        snapshots: &[InstrumentSnapshot],
        _phase: MarketPhase,
    ) -> Result<Vec<CandidateSignal>> {
        let mut out = Vec::new();

        for snap in snapshots {
            if snap.prev_close <= Decimal::ZERO || snap.avg_volume == 0 {
                continue;
            }
            let change = snap.change_pct();
            if change.abs() < self.min_change_pct
                || snap.volume_ratio() < self.min_volume_ratio
            {
                continue;
            }

            let direction = if change > 0.0 {
                Direction::Long
            } else {
                Direction::Short
            };
            let entry = snap.last_price;
            let stop_offset = entry * self.stop_pct;
            let (stop, target) = match direction {
                Direction::Long => (entry - stop_offset, entry + stop_offset * dec!(2)),
                Direction::Short => (entry + stop_offset, entry - stop_offset * dec!(2)),
            };

            out.push(CandidateSignal {
                id: Uuid::new_v4(),
                symbol: snap.symbol.clone(),
                direction,
                strategy: self.id(),
                entry,
                stop,
                target,
                star_rating: self.stars(change, snap.volume_ratio()),
                generated_at: snap.fetched_at,
            });
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
    use chrono::Utc;

    fn snapshot(symbol: &str, last: Decimal, prev_close: Decimal, ratio: f64) -> InstrumentSnapshot {
        InstrumentSnapshot {
            symbol: symbol.to_string(),
            last_price: last,
            day_open: prev_close,
            day_high: last.max(prev_close),
            day_low: last.min(prev_close),
            prev_close,
            vwap: prev_close,
            volume: (1_000_000.0 * ratio) as u64,
            avg_volume: 1_000_000,
            opening_range_high: None,
            opening_range_low: None,
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_surge_up_goes_long() {
        let s = MomentumSurge::default();
        // +3% on 2.5× volume.
        let out = s
            .evaluate(&[snapshot("ACME", dec!(103), dec!(100), 2.5)], MarketPhase::Morning)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].direction, Direction::Long);
        assert!(out[0].stop < out[0].entry);
        assert!(out[0].target > out[0].entry);
    }

    #[tokio::test]
    async fn test_surge_down_goes_short() {
        let s = MomentumSurge::default();
        let out = s
            .evaluate(&[snapshot("ACME", dec!(96), dec!(100), 2.5)], MarketPhase::Morning)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].direction, Direction::Short);
        // -4% is twice the 2% threshold: extra star.
        assert_eq!(out[0].star_rating, 4);
    }

    #[tokio::test]
    async fn test_small_move_is_quiet() {
        let s = MomentumSurge::default();
        let out = s
            .evaluate(&[snapshot("ACME", dec!(101), dec!(100), 2.5)], MarketPhase::Morning)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_no_volume_surge_is_quiet() {
        let s = MomentumSurge::default();
        let out = s
            .evaluate(&[snapshot("ACME", dec!(103), dec!(100), 1.2)], MarketPhase::Morning)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_missing_baseline_is_skipped() {
        let s = MomentumSurge::default();
        let mut snap = snapshot("ACME", dec!(103), dec!(100), 2.5);
        snap.prev_close = Decimal::ZERO;
        let out = s.evaluate(&[snap], MarketPhase::Morning).await.unwrap();
        assert!(out.is_empty());
    }
}
