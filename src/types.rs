//! Shared types for the SENTINEL scanner.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that strategy, risk, and engine
//! modules can depend on them without circular references.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Convert an f64 into a Decimal, defaulting to zero on non-finite input.
pub fn d(v: f64) -> Decimal {
    Decimal::from_f64_retain(v).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Trade direction for a candidate signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// The opposite direction.
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy identifiers
// ---------------------------------------------------------------------------

/// Closed set of scanner strategies.
///
/// Strategy dispatch is keyed on this enum everywhere — enable flags,
/// active phases, adaptation state, and history rows all map through it
/// rather than through free-form display names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StrategyId {
    VwapBreakout,
    OpeningRange,
    MomentumSurge,
}

impl StrategyId {
    /// All known strategies (useful for iteration).
    pub const ALL: &'static [StrategyId] = &[
        StrategyId::VwapBreakout,
        StrategyId::OpeningRange,
        StrategyId::MomentumSurge,
    ];

    /// Stable identifier used in logs and persistence rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyId::VwapBreakout => "vwap_breakout",
            StrategyId::OpeningRange => "opening_range",
            StrategyId::MomentumSurge => "momentum_surge",
        }
    }

    /// Market phases during which the strategy produces entries.
    pub fn active_phases(&self) -> &'static [MarketPhase] {
        match self {
            StrategyId::VwapBreakout => &[
                MarketPhase::Morning,
                MarketPhase::Midday,
                MarketPhase::Afternoon,
            ],
            StrategyId::OpeningRange => &[MarketPhase::Opening, MarketPhase::Morning],
            StrategyId::MomentumSurge => &[
                MarketPhase::Opening,
                MarketPhase::Morning,
                MarketPhase::Midday,
                MarketPhase::Afternoon,
            ],
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StrategyId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vwap_breakout" => Ok(StrategyId::VwapBreakout),
            "opening_range" => Ok(StrategyId::OpeningRange),
            "momentum_surge" => Ok(StrategyId::MomentumSurge),
            _ => Err(anyhow::anyhow!("Unknown strategy id: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Market phases
// ---------------------------------------------------------------------------

/// Coarse intraday session phase, derived from the exchange clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketPhase {
    PreOpen,
    Opening,
    Morning,
    Midday,
    Afternoon,
    Closing,
    Closed,
}

impl MarketPhase {
    /// Whether new entries may be initiated during this phase.
    /// The closing window is for squaring off, not for fresh signals.
    pub fn accepts_entries(&self) -> bool {
        matches!(
            self,
            MarketPhase::Opening
                | MarketPhase::Morning
                | MarketPhase::Midday
                | MarketPhase::Afternoon
        )
    }

    /// Whether the exchange is open at all during this phase.
    pub fn is_session(&self) -> bool {
        !matches!(self, MarketPhase::PreOpen | MarketPhase::Closed)
    }
}

impl fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketPhase::PreOpen => "pre-open",
            MarketPhase::Opening => "opening",
            MarketPhase::Morning => "morning",
            MarketPhase::Midday => "midday",
            MarketPhase::Afternoon => "afternoon",
            MarketPhase::Closing => "closing",
            MarketPhase::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Maps wall-clock time to a [`MarketPhase`] for a single exchange session.
#[derive(Debug, Clone)]
pub struct SessionClock {
    open: NaiveTime,
    close: NaiveTime,
    offset: FixedOffset,
}

impl SessionClock {
    /// Build a clock for a session running `open`..`close` in exchange-local
    /// time, where local time is UTC shifted by `utc_offset_minutes`.
    pub fn new(open: NaiveTime, close: NaiveTime, utc_offset_minutes: i32) -> anyhow::Result<Self> {
        if close <= open {
            anyhow::bail!("Session close {close} must be after open {open}");
        }
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .ok_or_else(|| anyhow::anyhow!("Invalid UTC offset: {utc_offset_minutes} minutes"))?;
        Ok(Self { open, close, offset })
    }

    /// Classify a UTC instant into a market phase.
    ///
    /// Boundaries: first 15 minutes are `Opening`, the final 30 minutes are
    /// `Closing`, `Morning` runs until 150 minutes after open, `Afternoon`
    /// covers the last two hours before the closing window, and everything
    /// between is `Midday`.
    pub fn phase_at(&self, now: DateTime<Utc>) -> MarketPhase {
        let local = now.with_timezone(&self.offset).time();
        if local < self.open {
            return MarketPhase::PreOpen;
        }
        if local >= self.close {
            return MarketPhase::Closed;
        }
        let since_open = (local - self.open).num_minutes();
        let to_close = (self.close - local).num_minutes();
        if since_open < 15 {
            MarketPhase::Opening
        } else if to_close <= 30 {
            MarketPhase::Closing
        } else if since_open < 150 {
            MarketPhase::Morning
        } else if to_close <= 120 {
            MarketPhase::Afternoon
        } else {
            MarketPhase::Midday
        }
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of a single instrument, as served by the quotes
/// provider. Opening-range fields are absent until the range is established.
#[derive(Debug, Clone)]
pub struct InstrumentSnapshot {
    pub symbol: String,
    pub last_price: Decimal,
    pub day_open: Decimal,
    pub day_high: Decimal,
    pub day_low: Decimal,
    pub prev_close: Decimal,
    pub vwap: Decimal,
    pub volume: u64,
    /// Trailing average daily volume for the same elapsed session time.
    pub avg_volume: u64,
    pub opening_range_high: Option<Decimal>,
    pub opening_range_low: Option<Decimal>,
    pub fetched_at: DateTime<Utc>,
}

impl InstrumentSnapshot {
    /// Volume relative to the trailing average (0.0 when no baseline).
    pub fn volume_ratio(&self) -> f64 {
        if self.avg_volume == 0 {
            return 0.0;
        }
        self.volume as f64 / self.avg_volume as f64
    }

    /// Percent change from the previous close (0.0 when no baseline).
    pub fn change_pct(&self) -> f64 {
        if self.prev_close <= Decimal::ZERO {
            return 0.0;
        }
        ((self.last_price - self.prev_close) / self.prev_close * dec!(100))
            .to_f64()
            .unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// A candidate produced by one strategy for one instrument.
/// Immutable once created within a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSignal {
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub strategy: StrategyId,
    pub entry: Decimal,
    pub stop: Decimal,
    pub target: Decimal,
    /// Base conviction, 1–5 stars, before confirmation boosts.
    pub star_rating: u8,
    pub generated_at: DateTime<Utc>,
}

impl fmt::Display for CandidateSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @ {} (SL {} / T {} | {}*)",
            self.strategy,
            self.direction,
            self.symbol,
            self.entry,
            self.stop,
            self.target,
            self.star_rating,
        )
    }
}

/// Multi-strategy agreement level for one instrument within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationLevel {
    Single,
    Double,
    Triple,
}

impl ConfirmationLevel {
    pub fn star_boost(&self) -> u8 {
        match self {
            ConfirmationLevel::Single => 0,
            ConfirmationLevel::Double => 1,
            ConfirmationLevel::Triple => 2,
        }
    }

    pub fn size_multiplier(&self) -> Decimal {
        match self {
            ConfirmationLevel::Single => dec!(1.0),
            ConfirmationLevel::Double => dec!(1.5),
            ConfirmationLevel::Triple => dec!(2.0),
        }
    }
}

impl fmt::Display for ConfirmationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationLevel::Single => write!(f, "single"),
            ConfirmationLevel::Double => write!(f, "double"),
            ConfirmationLevel::Triple => write!(f, "triple"),
        }
    }
}

/// Outcome of confirmation detection for one instrument.
/// Derived per cycle; persisting it is a repository concern.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationResult {
    pub level: ConfirmationLevel,
    /// Distinct strategies that agreed (current batch ∪ recent history).
    pub strategies: BTreeSet<StrategyId>,
    pub star_boost: u8,
    pub size_multiplier: Decimal,
}

impl ConfirmationResult {
    /// Classify by the number of distinct agreeing strategies.
    /// Depends only on set membership, never on arrival order.
    pub fn from_strategies(strategies: BTreeSet<StrategyId>) -> Self {
        let level = match strategies.len() {
            0 | 1 => ConfirmationLevel::Single,
            2 => ConfirmationLevel::Double,
            _ => ConfirmationLevel::Triple,
        };
        Self {
            level,
            strategies,
            star_boost: level.star_boost(),
            size_multiplier: level.size_multiplier(),
        }
    }
}

/// Composite quality score attached to an instrument after scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeScore {
    pub score: f64,
    /// Star rating after confirmation boost, capped at 5.
    pub effective_stars: u8,
}

/// A candidate that survived dedup and ranking, enriched with its
/// confirmation, score, and (after sizing) tradable quantity.
#[derive(Debug, Clone)]
pub struct RankedSignal {
    pub candidate: CandidateSignal,
    pub confirmation: Option<ConfirmationResult>,
    pub composite: Option<CompositeScore>,
    pub effective_stars: u8,
    pub size_multiplier: Decimal,
    pub quantity: u64,
    pub capital_required: Decimal,
}

// ---------------------------------------------------------------------------
// Positions and exits
// ---------------------------------------------------------------------------

/// An open position tracked by the position book collaborator.
#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub symbol: String,
    pub strategy: StrategyId,
    pub direction: Direction,
    pub entry: Decimal,
    pub stop: Decimal,
    pub target: Decimal,
    pub quantity: u64,
    pub opened_at: DateTime<Utc>,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    Target,
    TimeStop,
    Manual,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop-loss"),
            ExitReason::Target => write!(f, "target"),
            ExitReason::TimeStop => write!(f, "time-stop"),
            ExitReason::Manual => write!(f, "manual"),
        }
    }
}

/// Detail of a single stop-loss hit, kept by the circuit breaker for the
/// day's trip summary.
#[derive(Debug, Clone)]
pub struct SlHit {
    pub symbol: String,
    pub strategy: StrategyId,
    pub pnl: Decimal,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Adaptation
// ---------------------------------------------------------------------------

/// Per-strategy throttle level maintained by the adaptive manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdaptationLevel {
    Normal,
    Reduced,
    Paused,
}

impl fmt::Display for AdaptationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdaptationLevel::Normal => write!(f, "NORMAL"),
            AdaptationLevel::Reduced => write!(f, "REDUCED"),
            AdaptationLevel::Paused => write!(f, "PAUSED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Regime
// ---------------------------------------------------------------------------

/// Cycle-scoped adjustments derived from the market regime.
#[derive(Debug, Clone)]
pub struct RegimeModifiers {
    /// Minimum effective star rating a signal must reach to be emitted.
    pub min_star_rating: u8,
    /// Scales every position size computed this cycle.
    pub size_multiplier: Decimal,
    /// Caps how many ranked signals may be emitted this cycle.
    pub max_concurrent: Option<usize>,
    /// Per-strategy composite-score weight overrides.
    pub strategy_weights: HashMap<StrategyId, f64>,
}

impl Default for RegimeModifiers {
    fn default() -> Self {
        Self {
            min_star_rating: 0,
            size_multiplier: Decimal::ONE,
            max_concurrent: None,
            strategy_weights: HashMap::new(),
        }
    }
}

/// The trading day a UTC instant belongs to.
pub fn trading_day(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock() -> SessionClock {
        // 09:30–16:00 exchange-local, UTC-5
        SessionClock::new(
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            -300,
        )
        .unwrap()
    }

    fn at_local(h: u32, m: u32) -> DateTime<Utc> {
        // Local = UTC-5, so UTC = local + 5h
        Utc.with_ymd_and_hms(2026, 3, 2, h + 5, m, 0).unwrap()
    }

    #[test]
    fn test_phase_boundaries() {
        let c = clock();
        assert_eq!(c.phase_at(at_local(9, 0)), MarketPhase::PreOpen);
        assert_eq!(c.phase_at(at_local(9, 30)), MarketPhase::Opening);
        assert_eq!(c.phase_at(at_local(9, 44)), MarketPhase::Opening);
        assert_eq!(c.phase_at(at_local(9, 45)), MarketPhase::Morning);
        assert_eq!(c.phase_at(at_local(11, 59)), MarketPhase::Morning);
        assert_eq!(c.phase_at(at_local(12, 0)), MarketPhase::Midday);
        assert_eq!(c.phase_at(at_local(14, 1)), MarketPhase::Afternoon);
        assert_eq!(c.phase_at(at_local(15, 31)), MarketPhase::Closing);
        assert_eq!(c.phase_at(at_local(16, 0)), MarketPhase::Closed);
    }

    #[test]
    fn test_closing_blocks_entries() {
        assert!(!MarketPhase::Closing.accepts_entries());
        assert!(MarketPhase::Closing.is_session());
        assert!(MarketPhase::Midday.accepts_entries());
        assert!(!MarketPhase::Closed.is_session());
    }

    #[test]
    fn test_invalid_session_rejected() {
        let open = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
        let close = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        assert!(SessionClock::new(open, close, 0).is_err());
    }

    #[test]
    fn test_confirmation_levels() {
        let single =
            ConfirmationResult::from_strategies([StrategyId::VwapBreakout].into_iter().collect());
        assert_eq!(single.level, ConfirmationLevel::Single);
        assert_eq!(single.star_boost, 0);
        assert_eq!(single.size_multiplier, dec!(1.0));

        let double = ConfirmationResult::from_strategies(
            [StrategyId::VwapBreakout, StrategyId::OpeningRange]
                .into_iter()
                .collect(),
        );
        assert_eq!(double.level, ConfirmationLevel::Double);
        assert_eq!(double.star_boost, 1);
        assert_eq!(double.size_multiplier, dec!(1.5));

        let triple =
            ConfirmationResult::from_strategies(StrategyId::ALL.iter().copied().collect());
        assert_eq!(triple.level, ConfirmationLevel::Triple);
        assert_eq!(triple.star_boost, 2);
        assert_eq!(triple.size_multiplier, dec!(2.0));
    }

    #[test]
    fn test_strategy_id_round_trip() {
        for id in StrategyId::ALL {
            let parsed: StrategyId = id.as_str().parse().unwrap();
            assert_eq!(parsed, *id);
        }
        assert!("martingale".parse::<StrategyId>().is_err());
    }

    #[test]
    fn test_snapshot_ratios() {
        let snap = InstrumentSnapshot {
            symbol: "ACME".into(),
            last_price: dec!(102),
            day_open: dec!(100),
            day_high: dec!(103),
            day_low: dec!(99),
            prev_close: dec!(100),
            vwap: dec!(101),
            volume: 3_000_000,
            avg_volume: 1_500_000,
            opening_range_high: None,
            opening_range_low: None,
            fetched_at: Utc::now(),
        };
        assert!((snap.volume_ratio() - 2.0).abs() < 1e-10);
        assert!((snap.change_pct() - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_snapshot_ratios_no_baseline() {
        let snap = InstrumentSnapshot {
            symbol: "ACME".into(),
            last_price: dec!(102),
            day_open: dec!(100),
            day_high: dec!(103),
            day_low: dec!(99),
            prev_close: Decimal::ZERO,
            vwap: dec!(101),
            volume: 100,
            avg_volume: 0,
            opening_range_high: None,
            opening_range_low: None,
            fetched_at: Utc::now(),
        };
        assert_eq!(snap.volume_ratio(), 0.0);
        assert_eq!(snap.change_pct(), 0.0);
    }
}
