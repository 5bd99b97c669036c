//! SQLite-backed persistence.
//!
//! One pool serves all three repositories. Schema is created on connect;
//! every insert is idempotent (keyed upsert) so a truncated cycle can
//! safely retry.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{info, warn};

use super::{AdaptationLog, BreakerLog, SignalHistory, StorageError};
use crate::types::{AdaptationLevel, RankedSignal, StrategyId};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS signals (
    id            TEXT PRIMARY KEY,
    symbol        TEXT NOT NULL,
    strategy      TEXT NOT NULL,
    direction     TEXT NOT NULL,
    stars         INTEGER NOT NULL,
    entry         TEXT NOT NULL,
    day           TEXT NOT NULL,
    generated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_signals_symbol_time ON signals (symbol, generated_at);
CREATE INDEX IF NOT EXISTS idx_signals_symbol_day ON signals (symbol, day);

CREATE TABLE IF NOT EXISTS breaker_log (
    day           TEXT PRIMARY KEY,
    sl_count      INTEGER NOT NULL,
    total_loss    TEXT NOT NULL,
    activated_at  TEXT NOT NULL,
    overridden_at TEXT,
    resumed_at    TEXT
);

CREATE TABLE IF NOT EXISTS adaptation_log (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    day                 TEXT NOT NULL,
    strategy            TEXT NOT NULL,
    old_level           TEXT NOT NULL,
    new_level           TEXT NOT NULL,
    consecutive_losses  INTEGER NOT NULL,
    reason              TEXT NOT NULL,
    at                  TEXT NOT NULL
);
"#;

/// SQLite store implementing all persistence collaborators.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .with_context(|| format!("Invalid sqlite path: {path}"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open sqlite database at {path}"))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(path, "SQLite store ready");
        Ok(store)
    }

    /// In-memory database for tests.
    pub async fn connect_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory sqlite database")?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply sqlite schema")?;
        }
        Ok(())
    }
}

#[async_trait]
impl SignalHistory for SqliteStore {
    async fn strategies_since(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<StrategyId>> {
        let rows = sqlx::query(
            "SELECT DISTINCT strategy FROM signals WHERE symbol = ? AND generated_at >= ?",
        )
        .bind(symbol)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .context("Failed to query signal history")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("strategy")?;
            match raw.parse::<StrategyId>() {
                Ok(id) => out.push(id),
                Err(_) => warn!(strategy = %raw, "Unknown strategy id in history — skipping row"),
            }
        }
        Ok(out)
    }

    async fn has_signal_today(&self, symbol: &str, date: NaiveDate) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM signals WHERE symbol = ? AND day = ?")
            .bind(symbol)
            .bind(date.to_string())
            .fetch_one(&self.pool)
            .await
            .context("Failed to count today's signals")?;
        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }

    async fn record_signal(&self, signal: &RankedSignal) -> Result<()> {
        let c = &signal.candidate;
        sqlx::query(
            "INSERT OR IGNORE INTO signals \
             (id, symbol, strategy, direction, stars, entry, day, generated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(c.id.to_string())
        .bind(&c.symbol)
        .bind(c.strategy.as_str())
        .bind(c.direction.to_string())
        .bind(signal.effective_stars as i64)
        .bind(c.entry.to_string())
        .bind(c.generated_at.date_naive().to_string())
        .bind(c.generated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to record signal")?;
        Ok(())
    }
}

#[async_trait]
impl BreakerLog for SqliteStore {
    async fn record_activation(
        &self,
        day: NaiveDate,
        sl_count: u32,
        total_loss: Decimal,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO breaker_log (day, sl_count, total_loss, activated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(day) DO UPDATE SET \
               sl_count = excluded.sl_count, total_loss = excluded.total_loss",
        )
        .bind(day.to_string())
        .bind(sl_count as i64)
        .bind(total_loss.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to record breaker activation")?;
        Ok(())
    }

    async fn record_override(&self, day: NaiveDate) -> Result<()> {
        let result = sqlx::query("UPDATE breaker_log SET overridden_at = ? WHERE day = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(day.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to record breaker override")?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "no breaker activation recorded for {day}"
            ))
            .into());
        }
        Ok(())
    }

    async fn record_resume(&self, day: NaiveDate) -> Result<()> {
        let result = sqlx::query("UPDATE breaker_log SET resumed_at = ? WHERE day = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(day.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to record breaker resume")?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "no breaker activation recorded for {day}"
            ))
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl AdaptationLog for SqliteStore {
    async fn record_transition(
        &self,
        day: NaiveDate,
        strategy: StrategyId,
        old_level: AdaptationLevel,
        new_level: AdaptationLevel,
        consecutive_losses: u32,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO adaptation_log \
             (day, strategy, old_level, new_level, consecutive_losses, reason, at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(day.to_string())
        .bind(strategy.as_str())
        .bind(old_level.to_string())
        .bind(new_level.to_string())
        .bind(consecutive_losses as i64)
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to record adaptation transition")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandidateSignal, Direction};
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn make_signal(symbol: &str, strategy: StrategyId, at: DateTime<Utc>) -> RankedSignal {
        RankedSignal {
            candidate: CandidateSignal {
                id: Uuid::new_v4(),
                symbol: symbol.to_string(),
                direction: Direction::Long,
                strategy,
                entry: dec!(100),
                stop: dec!(99),
                target: dec!(102),
                star_rating: 3,
                generated_at: at,
            },
            confirmation: None,
            composite: None,
            effective_stars: 3,
            size_multiplier: dec!(1.0),
            quantity: 0,
            capital_required: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn test_signal_history_round_trip() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let now = Utc::now();

        store
            .record_signal(&make_signal("ACME", StrategyId::VwapBreakout, now))
            .await
            .unwrap();
        store
            .record_signal(&make_signal("ACME", StrategyId::OpeningRange, now))
            .await
            .unwrap();
        store
            .record_signal(&make_signal(
                "ACME",
                StrategyId::MomentumSurge,
                now - Duration::hours(2),
            ))
            .await
            .unwrap();

        let recent = store
            .strategies_since("ACME", now - Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.contains(&StrategyId::VwapBreakout));
        assert!(recent.contains(&StrategyId::OpeningRange));

        assert!(store
            .has_signal_today("ACME", now.date_naive())
            .await
            .unwrap());
        assert!(!store
            .has_signal_today("GLOBEX", now.date_naive())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_record_signal_is_idempotent() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let signal = make_signal("ACME", StrategyId::VwapBreakout, Utc::now());

        store.record_signal(&signal).await.unwrap();
        store.record_signal(&signal).await.unwrap();

        let recent = store
            .strategies_since("ACME", Utc::now() - Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn test_override_without_activation_is_not_found() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let day = Utc::now().date_naive();

        let err = store.record_override(day).await.unwrap_err();
        assert!(err.downcast_ref::<StorageError>().is_some());

        store.record_activation(day, 3, dec!(-450)).await.unwrap();
        store.record_override(day).await.unwrap();
        store.record_resume(day).await.unwrap();
    }

    #[tokio::test]
    async fn test_activation_upsert_is_retry_safe() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let day = Utc::now().date_naive();

        store.record_activation(day, 3, dec!(-450)).await.unwrap();
        store.record_activation(day, 4, dec!(-600)).await.unwrap();

        let row = sqlx::query("SELECT sl_count FROM breaker_log WHERE day = ?")
            .bind(day.to_string())
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let count: i64 = row.try_get("sl_count").unwrap();
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn test_adaptation_log_insert() {
        let store = SqliteStore::connect_memory().await.unwrap();
        store
            .record_transition(
                Utc::now().date_naive(),
                StrategyId::MomentumSurge,
                AdaptationLevel::Normal,
                AdaptationLevel::Reduced,
                3,
                "3 consecutive losses",
            )
            .await
            .unwrap();
    }
}
