//! Capital-based position sizing.
//!
//! Pure computation: per-trade capital from total capital and slot count,
//! scaled by the confirmation/regime multiplier and capped as a fraction
//! of total capital. Invalid numeric inputs fail fast — never a silent
//! clamp.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

/// Cap on per-trade capital when the multiplier is below 2×.
const CAP_STANDARD: Decimal = dec!(0.20);
/// Cap on per-trade capital at 2× and above.
const CAP_BOOSTED: Decimal = dec!(0.25);

#[derive(Debug, Error, PartialEq)]
pub enum SizingError {
    #[error("max_positions must be positive, got {0}")]
    InvalidMaxPositions(u32),
    #[error("entry price must be positive, got {0}")]
    InvalidEntryPrice(Decimal),
}

/// Result of a sizing computation.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSize {
    /// Whole shares; no partial-share rounding beyond integer floor.
    pub quantity: u64,
    pub capital_required: Decimal,
    pub per_trade_capital: Decimal,
}

pub struct PositionSizer;

impl PositionSizer {
    /// Compute tradable quantity for one signal.
    ///
    /// Base per-trade capital is `total_capital / max_positions`. A
    /// multiplier above 1.0 scales it up, capped at 25% of total capital
    /// when the multiplier is ≥ 2.0 and at 20% otherwise.
    pub fn calculate(
        entry_price: Decimal,
        total_capital: Decimal,
        max_positions: u32,
        multiplier: Decimal,
    ) -> Result<PositionSize, SizingError> {
        if max_positions == 0 {
            return Err(SizingError::InvalidMaxPositions(max_positions));
        }
        if entry_price <= Decimal::ZERO {
            return Err(SizingError::InvalidEntryPrice(entry_price));
        }

        let base = total_capital / Decimal::from(max_positions);
        let per_trade = if multiplier > Decimal::ONE {
            let cap_pct = if multiplier >= dec!(2.0) {
                CAP_BOOSTED
            } else {
                CAP_STANDARD
            };
            (base * multiplier).min(total_capital * cap_pct)
        } else {
            base
        };

        let quantity = (per_trade / entry_price)
            .floor()
            .to_u64()
            .unwrap_or(0);

        Ok(PositionSize {
            quantity,
            capital_required: entry_price * Decimal::from(quantity),
            per_trade_capital: per_trade,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_sizing() {
        let size = PositionSizer::calculate(dec!(100), dec!(50000), 8, dec!(1.0)).unwrap();
        assert_eq!(size.per_trade_capital, dec!(6250));
        assert_eq!(size.quantity, 62);
        assert_eq!(size.capital_required, dec!(6200));
    }

    #[test]
    fn test_double_multiplier_caps_at_quarter_of_capital() {
        let size = PositionSizer::calculate(dec!(100), dec!(50000), 8, dec!(2.0)).unwrap();
        // 6250 × 2 = 12500 == 25% of 50000, cap binds exactly.
        assert_eq!(size.per_trade_capital, dec!(12500));
        assert_eq!(size.quantity, 125);
    }

    #[test]
    fn test_moderate_multiplier_caps_at_fifth_of_capital() {
        // 4 slots → base 12500; ×1.5 = 18750 but 20% cap = 10000.
        let size = PositionSizer::calculate(dec!(100), dec!(50000), 4, dec!(1.5)).unwrap();
        assert_eq!(size.per_trade_capital, dec!(10000));
        assert_eq!(size.quantity, 100);
    }

    #[test]
    fn test_multiplier_below_one_does_not_scale() {
        let size = PositionSizer::calculate(dec!(100), dec!(50000), 8, dec!(0.5)).unwrap();
        assert_eq!(size.per_trade_capital, dec!(6250));
        assert_eq!(size.quantity, 62);
    }

    #[test]
    fn test_expensive_instrument_floors_to_zero() {
        let size = PositionSizer::calculate(dec!(9000), dec!(50000), 8, dec!(1.0)).unwrap();
        assert_eq!(size.quantity, 0);
        assert_eq!(size.capital_required, Decimal::ZERO);
    }

    #[test]
    fn test_zero_max_positions_rejected() {
        let err = PositionSizer::calculate(dec!(100), dec!(50000), 0, dec!(1.0)).unwrap_err();
        assert_eq!(err, SizingError::InvalidMaxPositions(0));
    }

    #[test]
    fn test_non_positive_entry_rejected() {
        let err = PositionSizer::calculate(dec!(0), dec!(50000), 8, dec!(1.0)).unwrap_err();
        assert!(matches!(err, SizingError::InvalidEntryPrice(_)));

        let err = PositionSizer::calculate(dec!(-5), dec!(50000), 8, dec!(1.0)).unwrap_err();
        assert!(matches!(err, SizingError::InvalidEntryPrice(_)));
    }
}
