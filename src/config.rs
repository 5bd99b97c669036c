//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys, bot tokens) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.
//!
//! Risk and capital settings flow to the pipeline through the
//! [`SettingsProvider`] abstraction so that every scan cycle observes a
//! fresh snapshot — the pipeline never caches settings across cycles.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::sync::RwLock;

use crate::types::{SessionClock, StrategyId};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub session: SessionConfig,
    pub capital: CapitalConfig,
    pub risk: RiskConfig,
    pub strategies: StrategiesConfig,
    pub confirmation: ConfirmationConfig,
    pub rate_limit: RateLimitConfig,
    pub data: DataConfig,
    pub alerts: AlertsConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub poll_interval_secs: u64,
    /// Instrument universe scanned every cycle.
    pub universe: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Session open, "HH:MM" exchange-local.
    pub open: String,
    /// Session close, "HH:MM" exchange-local.
    pub close: String,
    /// Exchange-local offset from UTC in minutes (e.g. -300 for UTC-5).
    pub utc_offset_minutes: i32,
}

impl SessionConfig {
    /// Build the session clock from the configured times.
    pub fn clock(&self) -> Result<SessionClock> {
        let open = NaiveTime::parse_from_str(&self.open, "%H:%M")
            .with_context(|| format!("Invalid session open time: {}", self.open))?;
        let close = NaiveTime::parse_from_str(&self.close, "%H:%M")
            .with_context(|| format!("Invalid session close time: {}", self.close))?;
        SessionClock::new(open, close, self.utc_offset_minutes)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CapitalConfig {
    pub total_capital: Decimal,
    pub max_positions: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    /// Stop-loss hits per day before the circuit breaker trips.
    pub breaker_limit: u32,
    /// Consecutive losses before a strategy is throttled to REDUCED.
    pub reduce_after_losses: u32,
    /// Consecutive losses before a strategy is PAUSED.
    pub pause_after_losses: u32,
    /// Minimum star rating a REDUCED strategy may still emit.
    pub reduced_min_stars: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategiesConfig {
    pub vwap_breakout: VwapConfig,
    pub opening_range: OrbConfig,
    pub momentum_surge: MomentumConfig,
}

impl StrategiesConfig {
    /// Explicit strategy-id → enable-flag mapping.
    pub fn enabled_ids(&self) -> BTreeSet<StrategyId> {
        let mut out = BTreeSet::new();
        if self.vwap_breakout.enabled {
            out.insert(StrategyId::VwapBreakout);
        }
        if self.opening_range.enabled {
            out.insert(StrategyId::OpeningRange);
        }
        if self.momentum_surge.enabled {
            out.insert(StrategyId::MomentumSurge);
        }
        out
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VwapConfig {
    pub enabled: bool,
    /// Maximum VWAP signals per instrument per day.
    pub max_signals_per_day: u32,
    /// Minimum gap between signals on the same instrument, minutes.
    pub min_gap_minutes: i64,
    /// Volume must exceed the trailing average by this ratio.
    pub min_volume_ratio: f64,
    /// Fractional distance from VWAP that counts as a breakout (0.002 = 0.2%).
    pub breakout_pct: Decimal,
    /// Stop buffer below/above VWAP as a fraction of VWAP.
    pub stop_buffer_pct: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrbConfig {
    pub enabled: bool,
    /// Fractional buffer beyond the range edge before a break counts.
    pub buffer_pct: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MomentumConfig {
    pub enabled: bool,
    /// Minimum percent move from the previous close.
    pub min_change_pct: f64,
    pub min_volume_ratio: f64,
    /// Initial stop distance as a fraction of entry price.
    pub stop_pct: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfirmationConfig {
    /// Trailing window for multi-strategy agreement, minutes.
    pub window_minutes: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub requests_per_sec: f64,
    #[serde(default)]
    pub per_minute_cap: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub db_path: String,
    pub cooldown_state_file: String,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

// ---------------------------------------------------------------------------
// Per-cycle settings
// ---------------------------------------------------------------------------

/// The mutable subset of configuration the pipeline consults every cycle.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub universe: Vec<String>,
    pub enabled_strategies: BTreeSet<StrategyId>,
    pub total_capital: Decimal,
    pub max_positions: u32,
    pub breaker_limit: u32,
}

/// Hands the pipeline a fresh settings snapshot each cycle.
pub trait SettingsProvider: Send + Sync {
    fn current(&self) -> CycleSettings;
}

/// Settings provider backed by an in-process snapshot.
///
/// `update` swaps the whole snapshot; readers always see a consistent view.
pub struct StaticSettings {
    inner: RwLock<CycleSettings>,
}

impl StaticSettings {
    pub fn new(settings: CycleSettings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(CycleSettings {
            universe: cfg.agent.universe.clone(),
            enabled_strategies: cfg.strategies.enabled_ids(),
            total_capital: cfg.capital.total_capital,
            max_positions: cfg.capital.max_positions,
            breaker_limit: cfg.risk.breaker_limit,
        })
    }

    /// Replace the current snapshot (picked up on the next cycle).
    pub fn update(&self, settings: CycleSettings) {
        *self.inner.write().unwrap() = settings;
    }
}

impl SettingsProvider for StaticSettings {
    fn current(&self) -> CycleSettings {
        self.inner.read().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
