//! Crash-recovery state files.
//!
//! Saves and restores the VWAP cooldown tracker as a JSON file so a
//! restart mid-session does not re-arm instruments that already hit
//! their daily signal budget.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::strategy::vwap::CooldownState;

/// Save cooldown state to a JSON file.
pub fn save_cooldowns(state: &CooldownState, path: &str) -> Result<()> {
    let json =
        serde_json::to_string_pretty(state).context("Failed to serialise cooldown state")?;
    std::fs::write(path, &json)
        .with_context(|| format!("Failed to write cooldown state to {path}"))?;
    debug!(path, entries = state.entries.len(), "Cooldown state saved");
    Ok(())
}

/// Load cooldown state from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_cooldowns(path: &str) -> Result<Option<CooldownState>> {
    if !Path::new(path).exists() {
        info!(path, "No saved cooldown state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read cooldown state from {path}"))?;
    let state: CooldownState = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse cooldown state from {path}"))?;

    info!(path, day = %state.day, entries = state.entries.len(), "Cooldown state restored");
    Ok(Some(state))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::vwap::CooldownEntry;
    use chrono::Utc;

    fn temp_path() -> String {
        let mut p = std::env::temp_dir();
        p.push(format!("sentinel_test_cooldowns_{}.json", uuid::Uuid::new_v4()));
        p.to_string_lossy().to_string()
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = temp_path();
        let mut state = CooldownState {
            day: Utc::now().date_naive(),
            entries: Default::default(),
        };
        state.entries.insert(
            "ACME".to_string(),
            CooldownEntry {
                count: 2,
                last_signal_at: Utc::now(),
            },
        );

        save_cooldowns(&state, &path).unwrap();
        let loaded = load_cooldowns(&path).unwrap().unwrap();
        assert_eq!(loaded.day, state.day);
        assert_eq!(loaded.entries.get("ACME").unwrap().count, 2);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_nonexistent_is_fresh_start() {
        let loaded = load_cooldowns("/tmp/sentinel_does_not_exist_xyz.json").unwrap();
        assert!(loaded.is_none());
    }
}
