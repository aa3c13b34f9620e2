//! Engine configuration.
//!
//! Every timing and tuning value the engine uses lives in [`EngineConfig`].
//! Durations are stored in milliseconds so the struct reads naturally from
//! JSON; accessors hand out [`Duration`]s.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reward tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardSettings {
    pub base_points: u32,
    pub points_per_round: u32,
    pub base_experience: u32,
    pub experience_per_kill: u32,
    /// Experience granted immediately to whoever kills a regular mob.
    pub mob_kill_experience: u32,
    /// Experience granted immediately to whoever kills a boss.
    pub boss_kill_experience: u32,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            base_points: 100,
            points_per_round: 10,
            base_experience: 50,
            experience_per_kill: 5,
            mob_kill_experience: 10,
            boss_kill_experience: 100,
        }
    }
}

/// Configuration for the session engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds counted down between reaching min players and the start.
    pub countdown_secs: u32,

    /// Remaining-second values that trigger a "starting in" broadcast.
    pub countdown_announcements: Vec<u32>,

    /// Pause between the start and the first round.
    pub settle_delay_ms: u64,

    /// Pause between a cleared round and the next one.
    pub round_interval_ms: u64,

    /// Pause between a cleared round and its boss appearing.
    pub boss_spawn_delay_ms: u64,

    /// Delay before a completed run is torn down.
    pub completed_grace_ms: u64,

    /// Delay before a failed run is torn down.
    pub failed_grace_ms: u64,

    /// Period of the in-run status line.
    pub status_interval_ms: u64,

    /// Default cap on simultaneously alive mobs per session.
    pub mob_limit: u32,

    /// Per-dungeon overrides of `mob_limit`.
    pub mob_limits: HashMap<String, u32>,

    /// Snapshot and restore inventories around a run.
    pub save_inventory: bool,

    /// Empty the inventory on join (after the snapshot).
    pub clear_inventory: bool,

    /// Hand out the run weapon on join and revival.
    pub give_weapon: bool,

    pub rewards: RewardSettings,

    /// Fixed RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 10,
            countdown_announcements: vec![30, 10, 5, 4, 3, 2, 1],
            settle_delay_ms: 2_000,
            round_interval_ms: 5_000,
            boss_spawn_delay_ms: 2_000,
            completed_grace_ms: 5_000,
            failed_grace_ms: 3_000,
            status_interval_ms: 1_000,
            mob_limit: 8,
            mob_limits: HashMap::new(),
            save_inventory: true,
            clear_inventory: false,
            give_weapon: true,
            rewards: RewardSettings::default(),
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file. Missing keys keep defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Set the countdown length.
    pub fn with_countdown_secs(mut self, secs: u32) -> Self {
        self.countdown_secs = secs;
        self
    }

    /// Set the default mob cap.
    pub fn with_mob_limit(mut self, limit: u32) -> Self {
        self.mob_limit = limit;
        self
    }

    /// Override the mob cap for one dungeon.
    pub fn with_dungeon_mob_limit(mut self, dungeon_id: impl Into<String>, limit: u32) -> Self {
        self.mob_limits.insert(dungeon_id.into(), limit);
        self
    }

    /// Set the pause between rounds.
    pub fn with_round_interval(mut self, interval: Duration) -> Self {
        self.round_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Use a fixed RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Toggle handing out the run weapon.
    pub fn with_give_weapon(mut self, give: bool) -> Self {
        self.give_weapon = give;
        self
    }

    pub fn mob_limit_for(&self, dungeon_id: &str) -> u32 {
        self.mob_limits
            .get(dungeon_id)
            .copied()
            .unwrap_or(self.mob_limit)
    }

    pub fn is_announcement(&self, remaining: u32) -> bool {
        self.countdown_announcements.contains(&remaining)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }

    pub fn boss_spawn_delay(&self) -> Duration {
        Duration::from_millis(self.boss_spawn_delay_ms)
    }

    pub fn grace(&self, completed: bool) -> Duration {
        Duration::from_millis(if completed {
            self.completed_grace_ms
        } else {
            self.failed_grace_ms
        })
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.countdown_secs, 10);
        assert_eq!(config.round_interval(), Duration::from_secs(5));
        assert_eq!(config.grace(true), Duration::from_secs(5));
        assert_eq!(config.grace(false), Duration::from_secs(3));
        assert_eq!(config.mob_limit_for("anything"), 8);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"countdown_secs": 3, "mob_limits": {"crypt": 2}, "rewards": {"base_points": 7}}"#,
        )
        .unwrap();

        assert_eq!(config.countdown_secs, 3);
        assert_eq!(config.mob_limit_for("crypt"), 2);
        assert_eq!(config.mob_limit_for("tower"), 8);
        assert_eq!(config.rewards.base_points, 7);
        assert_eq!(config.rewards.points_per_round, 10);
        assert!(config.save_inventory);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_countdown_secs(4)
            .with_dungeon_mob_limit("crypt", 1)
            .with_seed(42);
        assert_eq!(config.countdown_secs, 4);
        assert_eq!(config.mob_limit_for("crypt"), 1);
        assert_eq!(config.rng_seed, Some(42));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_io_error() {
        let result = EngineConfig::load("/definitely/not/here.json").await;
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
