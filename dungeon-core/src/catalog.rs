//! Static dungeon, mob and boss definitions.
//!
//! A [`Catalog`] is built once (usually from JSON) and shared immutably by
//! every session. Definitions describe *what* a dungeon contains; all
//! per-run state lives in [`crate::session::DungeonSession`].

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

use crate::host::ItemStack;
use crate::rewards::RewardChance;

/// Errors from loading or validating a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid dungeon '{id}': {reason}")]
    InvalidDungeon { id: String, reason: String },

    #[error("Invalid time period '{0}', expected HH:MM-HH:MM")]
    InvalidPeriod(String),
}

// ============================================================================
// Locations
// ============================================================================

/// A point in a named world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    /// The same point shifted horizontally.
    pub fn offset(&self, dx: f64, dz: f64) -> Self {
        Self {
            x: self.x + dx,
            z: self.z + dz,
            ..self.clone()
        }
    }
}

/// Where players and creatures are placed for a dungeon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DungeonLocations {
    #[serde(default)]
    pub entries: Vec<Location>,
    #[serde(default)]
    pub exit: Option<Location>,
    #[serde(default)]
    pub mob_spawns: Vec<Location>,
    #[serde(default)]
    pub boss_spawn: Option<Location>,
}

// ============================================================================
// Schedule
// ============================================================================

/// A daily time window, written as `HH:MM-HH:MM`. The end is exclusive and
/// the window wraps past midnight when it ends before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimePeriod {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimePeriod {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

impl TryFrom<String> for TimePeriod {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (start, end) = value
            .split_once('-')
            .ok_or_else(|| CatalogError::InvalidPeriod(value.clone()))?;
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M")
                .map_err(|_| CatalogError::InvalidPeriod(value.clone()))
        };
        Ok(Self {
            start: parse(start)?,
            end: parse(end)?,
        })
    }
}

impl From<TimePeriod> for String {
    fn from(period: TimePeriod) -> Self {
        format!(
            "{}-{}",
            period.start.format("%H:%M"),
            period.end.format("%H:%M")
        )
    }
}

/// When a dungeon accepts new players.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schedule {
    /// A disabled schedule means always open.
    #[serde(default)]
    pub enabled: bool,
    /// Allowed weekdays. Empty means every day.
    #[serde(default)]
    pub days: Vec<Weekday>,
    /// Allowed time windows. Empty means all day.
    #[serde(default)]
    pub periods: Vec<TimePeriod>,
    #[serde(default)]
    pub closed_message: Option<String>,
}

impl Schedule {
    /// A schedule that never opens.
    pub fn closed() -> Self {
        let midnight = NaiveTime::MIN;
        Self {
            enabled: true,
            days: Vec::new(),
            periods: vec![TimePeriod {
                start: midnight,
                end: midnight,
            }],
            closed_message: None,
        }
    }

    pub fn is_open_at(&self, now: NaiveDateTime) -> bool {
        if !self.enabled {
            return true;
        }
        if !self.days.is_empty() && !self.days.contains(&now.weekday()) {
            return false;
        }
        self.periods.is_empty() || self.periods.iter().any(|p| p.contains(now.time()))
    }

    /// Evaluate against the local wall clock.
    pub fn is_open_now(&self) -> bool {
        self.is_open_at(chrono::Local::now().naive_local())
    }
}

// ============================================================================
// Rounds
// ============================================================================

/// One line of a round manifest: `count` copies of a mob, one every
/// `spawn_delay_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobSpawnEntry {
    pub mob_id: String,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub spawn_delay_ms: u64,
}

fn default_count() -> u32 {
    1
}

impl MobSpawnEntry {
    pub fn new(mob_id: impl Into<String>, count: u32) -> Self {
        Self {
            mob_id: mob_id.into(),
            count,
            spawn_delay_ms: 0,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.spawn_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn spawn_delay(&self) -> Duration {
        Duration::from_millis(self.spawn_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundDefinition {
    pub round: u32,
    #[serde(default)]
    pub mobs: Vec<MobSpawnEntry>,
    #[serde(default)]
    pub boss: Option<String>,
}

/// Endless mode: the same pool every round, with a boss every few rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlimitedConfig {
    #[serde(default)]
    pub mobs: Vec<MobSpawnEntry>,
    #[serde(default)]
    pub boss: Option<String>,
    #[serde(default = "default_boss_every")]
    pub boss_every: u32,
}

fn default_boss_every() -> u32 {
    5
}

impl Default for UnlimitedConfig {
    fn default() -> Self {
        Self {
            mobs: Vec::new(),
            boss: None,
            boss_every: default_boss_every(),
        }
    }
}

impl UnlimitedConfig {
    pub fn is_boss_round(&self, round: u32) -> bool {
        self.boss_every > 0 && round > 0 && round % self.boss_every == 0
    }
}

// ============================================================================
// Dungeons
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DungeonDefinition {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_min_players")]
    pub min_players: usize,
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default = "default_limited")]
    pub limited_rounds: bool,
    #[serde(default)]
    pub rounds: Vec<RoundDefinition>,
    #[serde(default)]
    pub unlimited: UnlimitedConfig,
    /// Extra rewards rolled for every member on completion.
    #[serde(default)]
    pub rewards: Vec<RewardChance>,
    #[serde(default)]
    pub locations: DungeonLocations,
}

fn default_min_players() -> usize {
    1
}

fn default_max_players() -> usize {
    4
}

fn default_limited() -> bool {
    true
}

impl DungeonDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            min_players: default_min_players(),
            max_players: default_max_players(),
            schedule: Schedule::default(),
            limited_rounds: true,
            rounds: Vec::new(),
            unlimited: UnlimitedConfig::default(),
            rewards: Vec::new(),
            locations: DungeonLocations::default(),
        }
    }

    pub fn with_players(mut self, min: usize, max: usize) -> Self {
        self.min_players = min;
        self.max_players = max;
        self
    }

    pub fn with_round(mut self, round: RoundDefinition) -> Self {
        self.rounds.push(round);
        self
    }

    pub fn with_unlimited(mut self, unlimited: UnlimitedConfig) -> Self {
        self.limited_rounds = false;
        self.unlimited = unlimited;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_locations(mut self, locations: DungeonLocations) -> Self {
        self.locations = locations;
        self
    }

    pub fn with_reward(mut self, reward: RewardChance) -> Self {
        self.rewards.push(reward);
        self
    }

    pub fn total_rounds(&self) -> u32 {
        self.rounds.len() as u32
    }

    pub fn round(&self, number: u32) -> Option<&RoundDefinition> {
        self.rounds.iter().find(|r| r.round == number)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason: &str| CatalogError::InvalidDungeon {
            id: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.min_players == 0 {
            return Err(invalid("min_players must be at least 1"));
        }
        if self.min_players > self.max_players {
            return Err(invalid("min_players exceeds max_players"));
        }
        Ok(())
    }
}

// ============================================================================
// Mobs and bosses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobAttributes {
    #[serde(default = "default_health")]
    pub health: f64,
    #[serde(default)]
    pub damage: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub knockback_resistance: f64,
}

fn default_health() -> f64 {
    20.0
}

impl Default for MobAttributes {
    fn default() -> Self {
        Self {
            health: default_health(),
            damage: 0.0,
            speed: None,
            knockback_resistance: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobDefinition {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    #[serde(default)]
    pub attributes: MobAttributes,
    #[serde(default)]
    pub equipment: Vec<ItemStack>,
    /// Rolled for the player who lands the killing blow.
    #[serde(default)]
    pub rewards: Vec<RewardChance>,
}

fn default_entity_type() -> String {
    "ZOMBIE".to_string()
}

impl MobDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            entity_type: default_entity_type(),
            attributes: MobAttributes::default(),
            equipment: Vec::new(),
            rewards: Vec::new(),
        }
    }
}

/// One boss ability: how often it fires plus free-form tuning values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BossAbility {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

fn default_interval() -> u64 {
    30
}

impl Default for BossAbility {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval(),
            params: serde_json::Map::new(),
        }
    }
}

impl BossAbility {
    pub fn enabled(interval_secs: u64) -> Self {
        Self {
            enabled: true,
            interval_secs,
            params: serde_json::Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn int_param(&self, key: &str, default: i64) -> i64 {
        self.params.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    pub fn float_param(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    pub fn str_param<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.params.get(key).and_then(|v| v.as_str()).unwrap_or(default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BossDefinition {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_boss_type")]
    pub entity_type: String,
    #[serde(default)]
    pub attributes: MobAttributes,
    #[serde(default)]
    pub equipment: Vec<ItemStack>,
    #[serde(default)]
    pub rewards: Vec<RewardChance>,
    /// Keyed by ability name; iteration order is the firing setup order.
    #[serde(default)]
    pub abilities: BTreeMap<String, BossAbility>,
}

fn default_boss_type() -> String {
    "WITHER_SKELETON".to_string()
}

impl BossDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            entity_type: default_boss_type(),
            attributes: MobAttributes {
                health: 200.0,
                ..MobAttributes::default()
            },
            equipment: Vec::new(),
            rewards: Vec::new(),
            abilities: BTreeMap::new(),
        }
    }

    pub fn with_ability(mut self, name: impl Into<String>, ability: BossAbility) -> Self {
        self.abilities.insert(name.into(), ability);
        self
    }

    pub fn enabled_abilities(&self) -> impl Iterator<Item = (&str, &BossAbility)> {
        self.abilities
            .iter()
            .filter(|(_, a)| a.enabled)
            .map(|(name, a)| (name.as_str(), a))
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// On-disk layout of a catalog file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    dungeons: Vec<DungeonDefinition>,
    #[serde(default)]
    mobs: Vec<MobDefinition>,
    #[serde(default)]
    bosses: Vec<BossDefinition>,
}

/// Immutable lookup of every static definition.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    dungeons: HashMap<String, Arc<DungeonDefinition>>,
    mobs: HashMap<String, MobDefinition>,
    bosses: BTreeMap<String, BossDefinition>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a catalog from JSON text.
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(text)?;
        let mut catalog = Self::new();
        for dungeon in file.dungeons {
            dungeon.validate()?;
            catalog = catalog.with_dungeon(dungeon);
        }
        for mob in file.mobs {
            catalog = catalog.with_mob(mob);
        }
        for boss in file.bosses {
            catalog = catalog.with_boss(boss);
        }
        Ok(catalog)
    }

    /// Load a catalog from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path).await?;
        Self::from_json(&text)
    }

    pub fn with_dungeon(mut self, dungeon: DungeonDefinition) -> Self {
        self.dungeons.insert(dungeon.id.clone(), Arc::new(dungeon));
        self
    }

    pub fn with_mob(mut self, mob: MobDefinition) -> Self {
        self.mobs.insert(mob.id.clone(), mob);
        self
    }

    pub fn with_boss(mut self, boss: BossDefinition) -> Self {
        self.bosses.insert(boss.id.clone(), boss);
        self
    }

    pub fn dungeon(&self, id: &str) -> Option<&Arc<DungeonDefinition>> {
        self.dungeons.get(id)
    }

    pub fn mob(&self, id: &str) -> Option<&MobDefinition> {
        self.mobs.get(id)
    }

    pub fn boss(&self, id: &str) -> Option<&BossDefinition> {
        self.bosses.get(id)
    }

    /// The boss with the lowest id, used when an endless dungeon names none.
    pub fn first_boss(&self) -> Option<&BossDefinition> {
        self.bosses.values().next()
    }

    pub fn dungeon_ids(&self) -> impl Iterator<Item = &str> {
        self.dungeons.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(weekday_date: (i32, u32, u32), hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(weekday_date.0, weekday_date.1, weekday_date.2)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .unwrap()
    }

    #[test]
    fn test_period_wraps_midnight() {
        let period = TimePeriod::try_from("22:00-02:00".to_string()).unwrap();
        assert!(period.contains(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(period.contains(NaiveTime::from_hms_opt(1, 59, 0).unwrap()));
        assert!(!period.contains(NaiveTime::from_hms_opt(2, 0, 0).unwrap()));
        assert!(!period.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[test]
    fn test_invalid_period_rejected() {
        assert!(TimePeriod::try_from("noon".to_string()).is_err());
        assert!(TimePeriod::try_from("25:00-26:00".to_string()).is_err());
    }

    #[test]
    fn test_schedule_days_and_periods() {
        let schedule: Schedule = serde_json::from_str(
            r#"{"enabled": true, "days": ["Sat", "Sun"], "periods": ["18:00-23:00"]}"#,
        )
        .unwrap();

        // 2024-06-01 is a Saturday, 2024-06-03 a Monday.
        assert!(schedule.is_open_at(at((2024, 6, 1), 19, 0)));
        assert!(!schedule.is_open_at(at((2024, 6, 1), 9, 0)));
        assert!(!schedule.is_open_at(at((2024, 6, 3), 19, 0)));
    }

    #[test]
    fn test_disabled_and_closed_schedules() {
        assert!(Schedule::default().is_open_at(at((2024, 6, 3), 4, 0)));
        assert!(!Schedule::closed().is_open_at(at((2024, 6, 3), 4, 0)));
    }

    #[test]
    fn test_unlimited_boss_rounds() {
        let unlimited = UnlimitedConfig {
            boss_every: 3,
            ..Default::default()
        };
        assert!(!unlimited.is_boss_round(0));
        assert!(!unlimited.is_boss_round(2));
        assert!(unlimited.is_boss_round(3));
        assert!(unlimited.is_boss_round(6));
    }

    #[test]
    fn test_catalog_from_json() {
        let catalog = Catalog::from_json(
            r#"{
                "dungeons": [{
                    "id": "crypt",
                    "min_players": 2,
                    "max_players": 4,
                    "rounds": [
                        {"round": 1, "mobs": [{"mob_id": "ghoul", "count": 3, "spawn_delay_ms": 500}]},
                        {"round": 2, "boss": "lich"}
                    ]
                }],
                "mobs": [{"id": "ghoul"}],
                "bosses": [{"id": "lich", "abilities": {
                    "ground-slam": {"enabled": true, "interval_secs": 10, "radius": 6},
                    "teleport": {}
                }}]
            }"#,
        )
        .unwrap();

        let crypt = catalog.dungeon("crypt").unwrap();
        assert_eq!(crypt.total_rounds(), 2);
        assert_eq!(crypt.round(1).unwrap().mobs[0].spawn_delay(), Duration::from_millis(500));
        assert_eq!(crypt.round(2).unwrap().boss.as_deref(), Some("lich"));

        let lich = catalog.boss("lich").unwrap();
        let enabled: Vec<_> = lich.enabled_abilities().map(|(n, _)| n).collect();
        assert_eq!(enabled, vec!["ground-slam"]);
        assert_eq!(lich.abilities["ground-slam"].int_param("radius", 5), 6);
        assert_eq!(lich.abilities["teleport"].interval_secs, 30);
    }

    #[test]
    fn test_catalog_rejects_bad_player_bounds() {
        let result = Catalog::from_json(
            r#"{"dungeons": [{"id": "broken", "min_players": 5, "max_players": 2}]}"#,
        );
        assert!(matches!(result, Err(CatalogError::InvalidDungeon { .. })));
    }
}
