//! Opening-range breakout strategy.
//!
//! Trades the first clean break of the opening range: long through the
//! range high, short through the range low, stop at the opposite edge.
//! Instruments whose range is not yet established are skipped.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use super::Strategy;
use crate::types::{CandidateSignal, Direction, InstrumentSnapshot, MarketPhase, StrategyId};

pub struct OpeningRangeBreakout {
    /// Fractional buffer beyond the range edge before a break counts.
    buffer_pct: Decimal,
}

impl OpeningRangeBreakout {
    pub fn new(buffer_pct: Decimal) -> Self {
        Self { buffer_pct }
    }

    fn stars(range_pct: f64, volume_ratio: f64) -> u8 {
        let mut stars = 3u8;
        if volume_ratio >= 1.5 {
            stars += 1;
        }
        // A tight range breaks more decisively.
        if range_pct < 1.0 {
            stars += 1;
        }
        stars.min(5)
    }
}

impl Default for OpeningRangeBreakout {
    fn default() -> Self {
        Self::new(dec!(0.001))
    }
}

#[async_trait]
impl Strategy for OpeningRangeBreakout {
    fn id(&self) -> StrategyId {
        StrategyId::OpeningRange
    }

    async fn evaluate(
        &self,
        snapshots: &[InstrumentSnapshot],
        _phase: MarketPhase,
    ) -> Result<Vec<CandidateSignal>> {
        let mut out = Vec::new();

        for snap in snapshots {
            let (Some(high), Some(low)) = (snap.opening_range_high, snap.opening_range_low)
            else {
                continue; // range not established yet
            };
            if high <= low || snap.prev_close <= Decimal::ZERO {
                continue;
            }

            let (direction, stop) = if snap.last_price >= high * (Decimal::ONE + self.buffer_pct)
            {
                (Direction::Long, low)
            } else if snap.last_price <= low * (Decimal::ONE - self.buffer_pct) {
                (Direction::Short, high)
            } else {
                continue;
            };

            let entry = snap.last_price;
            let risk = (entry - stop).abs();
            if risk <= Decimal::ZERO {
                continue;
            }
            let target = match direction {
                Direction::Long => entry + risk * dec!(2),
                Direction::Short => entry - risk * dec!(2),
            };

            let range_pct = ((high - low) / snap.prev_close * dec!(100))
                .to_f64()
                .unwrap_or(f64::MAX);

            out.push(CandidateSignal {
                id: Uuid::new_v4(),
                symbol: snap.symbol.clone(),
                direction,
                strategy: self.id(),
                entry,
                stop,
                target,
                star_rating: Self::stars(range_pct, snap.volume_ratio()),
                generated_at: snap.fetched_at,
            });
        }

        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
