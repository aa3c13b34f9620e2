//! Persistent per-player progression.
//!
//! A [`PlayerProfile`] outlives every run: lifetime counters, level and
//! experience, and the perk investments that turn into in-run attributes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::fs;

use crate::error::StoreError;
use crate::host::PlayerId;

/// Highest level a single perk can reach.
pub const MAX_PERK_LEVEL: f64 = 3.0;

/// Perk level gained per invested point.
pub const PERK_STEP: f64 = 0.5;

/// Max health every player starts from.
pub const BASE_MAX_HEALTH: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perk {
    Vitality,
    Strength,
    Agility,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Perks {
    pub vitality: f64,
    pub strength: f64,
    pub agility: f64,
}

impl Perks {
    fn level_mut(&mut self, perk: Perk) -> &mut f64 {
        match perk {
            Perk::Vitality => &mut self.vitality,
            Perk::Strength => &mut self.strength,
            Perk::Agility => &mut self.agility,
        }
    }
}

/// In-run attribute modifiers derived from perks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedAttributes {
    pub max_health: f64,
    pub damage_bonus: f64,
    pub speed_bonus: f64,
}

impl Default for DerivedAttributes {
    fn default() -> Self {
        Self {
            max_health: BASE_MAX_HEALTH,
            damage_bonus: 0.0,
            speed_bonus: 0.0,
        }
    }
}

/// Lifetime statistics and progression for one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerProfile {
    pub dungeons_completed: u32,
    pub dungeons_failed: u32,
    pub mobs_killed: u32,
    pub bosses_killed: u32,
    pub deaths: u32,
    pub play_time_ms: u64,
    /// Only ever increases.
    pub highest_round: u32,
    pub points: u64,
    pub level: u32,
    pub experience: u64,
    pub perk_points: u32,
    pub perks: Perks,
}

impl Default for PlayerProfile {
    fn default() -> Self {
        Self {
            dungeons_completed: 0,
            dungeons_failed: 0,
            mobs_killed: 0,
            bosses_killed: 0,
            deaths: 0,
            play_time_ms: 0,
            highest_round: 0,
            points: 0,
            level: 1,
            experience: 0,
            perk_points: 0,
            perks: Perks::default(),
        }
    }
}

impl PlayerProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Experience needed to go from the current level to the next.
    pub fn experience_to_next_level(&self) -> u64 {
        100 + u64::from(self.level) * 50
    }

    /// Add experience, levelling up as often as it allows. Each level
    /// grants one perk point. Returns the number of levels gained.
    pub fn add_experience(&mut self, amount: u64) -> u32 {
        self.experience += amount;
        let mut gained = 0;
        while self.experience >= self.experience_to_next_level() {
            self.experience -= self.experience_to_next_level();
            self.level += 1;
            self.perk_points += 1;
            gained += 1;
        }
        gained
    }

    pub fn add_points(&mut self, amount: u64) {
        self.points += amount;
    }

    pub fn record_round(&mut self, round: u32) {
        self.highest_round = self.highest_round.max(round);
    }

    pub fn add_play_time(&mut self, played: Duration) {
        self.play_time_ms += played.as_millis() as u64;
    }

    /// Spend a perk point. Returns false when no point is available or the
    /// perk is already maxed.
    pub fn invest(&mut self, perk: Perk) -> bool {
        if self.perk_points == 0 {
            return false;
        }
        let level = self.perks.level_mut(perk);
        if *level + PERK_STEP > MAX_PERK_LEVEL {
            return false;
        }
        *level += PERK_STEP;
        self.perk_points -= 1;
        true
    }

    pub fn derived_attributes(&self) -> DerivedAttributes {
        DerivedAttributes {
            max_health: BASE_MAX_HEALTH + self.perks.vitality * 2.0,
            damage_bonus: self.perks.strength * 0.5,
            speed_bonus: self.perks.agility * 0.1,
        }
    }
}

// ============================================================================
// Rankings
// ============================================================================

/// Longest leaderboard a ranking query returns.
pub const RANKING_SIZE: usize = 100;

/// Counters a leaderboard can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStat {
    MobsKilled,
    BossesKilled,
    DungeonsCompleted,
    Points,
    Level,
}

impl PlayerProfile {
    pub fn stat(&self, stat: RankingStat) -> u64 {
        match stat {
            RankingStat::MobsKilled => u64::from(self.mobs_killed),
            RankingStat::BossesKilled => u64::from(self.bosses_killed),
            RankingStat::DungeonsCompleted => u64::from(self.dungeons_completed),
            RankingStat::Points => self.points,
            RankingStat::Level => u64::from(self.level),
        }
    }
}

/// One leaderboard line. `position` starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub position: usize,
    pub player: PlayerId,
    pub value: u64,
}

/// Order profiles by `stat`, highest first, keeping at most `limit`
/// (never more than [`RANKING_SIZE`]). Ties go to the lower player id so
/// the order is stable.
pub fn rank<'a>(
    profiles: impl IntoIterator<Item = (&'a PlayerId, &'a PlayerProfile)>,
    stat: RankingStat,
    limit: usize,
) -> Vec<RankingEntry> {
    let mut scored: Vec<(PlayerId, u64)> = profiles
        .into_iter()
        .map(|(player, profile)| (*player, profile.stat(stat)))
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    scored
        .into_iter()
        .take(limit.min(RANKING_SIZE))
        .enumerate()
        .map(|(index, (player, value))| RankingEntry {
            position: index + 1,
            player,
            value,
        })
        .collect()
}

/// Where profiles live.
pub trait ProfileStore: Send {
    /// The player's stored profile, if any.
    fn get(&self, player: PlayerId) -> Option<PlayerProfile>;

    /// Persist a player's profile.
    fn save(&mut self, player: PlayerId, profile: &PlayerProfile) -> Result<(), StoreError>;
}

/// Profiles kept in memory. Clones share the same storage, so the host can
/// keep a handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProfiles {
    profiles: Arc<Mutex<HashMap<PlayerId, PlayerProfile>>>,
}

impl InMemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PlayerId, PlayerProfile>> {
        self.profiles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, player: PlayerId, profile: PlayerProfile) {
        self.lock().insert(player, profile);
    }

    /// Leaderboard for `stat`. Computed on demand from the stored profiles.
    pub fn rank_by(&self, stat: RankingStat, limit: usize) -> Vec<RankingEntry> {
        rank(self.lock().iter(), stat, limit)
    }

    /// A player's place on the full leaderboard, if they make it.
    pub fn position(&self, player: PlayerId, stat: RankingStat) -> Option<usize> {
        self.rank_by(stat, RANKING_SIZE)
            .into_iter()
            .find(|entry| entry.player == player)
            .map(|entry| entry.position)
    }

    /// Write every profile to a JSON file.
    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&*self.lock())?;
        fs::write(path, json).await?;
        Ok(())
    }

    /// Read profiles written by [`InMemoryProfiles::save_to`].
    pub async fn load_from(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let text = fs::read_to_string(path).await?;
        let profiles: HashMap<PlayerId, PlayerProfile> = serde_json::from_str(&text)?;
        Ok(Self {
            profiles: Arc::new(Mutex::new(profiles)),
        })
    }
}

impl ProfileStore for InMemoryProfiles {
    fn get(&self, player: PlayerId) -> Option<PlayerProfile> {
        self.lock().get(&player).cloned()
    }

    fn save(&mut self, player: PlayerId, profile: &PlayerProfile) -> Result<(), StoreError> {
        self.lock().insert(player, profile.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_curve() {
        let mut profile = PlayerProfile::new();
        assert_eq!(profile.experience_to_next_level(), 150);

        assert_eq!(profile.add_experience(149), 0);
        assert_eq!(profile.add_experience(1), 1);
        assert_eq!(profile.level, 2);
        assert_eq!(profile.experience, 0);
        assert_eq!(profile.perk_points, 1);

        // 200 for level 2 -> 3, then 250 for 3 -> 4.
        assert_eq!(profile.add_experience(460), 2);
        assert_eq!(profile.level, 4);
        assert_eq!(profile.experience, 10);
        assert_eq!(profile.perk_points, 3);
    }

    #[test]
    fn test_perk_cap() {
        let mut profile = PlayerProfile {
            perk_points: 10,
            ..Default::default()
        };
        for _ in 0..6 {
            assert!(profile.invest(Perk::Vitality));
        }
        assert!(!profile.invest(Perk::Vitality));
        assert_eq!(profile.perks.vitality, MAX_PERK_LEVEL);
        assert_eq!(profile.perk_points, 4);
    }

    #[test]
    fn test_invest_needs_points() {
        let mut profile = PlayerProfile::new();
        assert!(!profile.invest(Perk::Strength));
        assert_eq!(profile.perks.strength, 0.0);
    }

    #[test]
    fn test_derived_attributes() {
        let profile = PlayerProfile {
            perks: Perks {
                vitality: 2.0,
                strength: 1.5,
                agility: 3.0,
            },
            ..Default::default()
        };
        let attrs = profile.derived_attributes();
        assert_eq!(attrs.max_health, 24.0);
        assert_eq!(attrs.damage_bonus, 0.75);
        assert!((attrs.speed_bonus - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_store_handles_share_state() {
        let store = InMemoryProfiles::new();
        let mut engine_side = store.clone();
        let player = PlayerId::new();
        assert!(store.get(player).is_none());

        let mut profile = PlayerProfile::new();
        profile.deaths = 2;
        engine_side.save(player, &profile).unwrap();
        assert_eq!(store.get(player).map(|p| p.deaths), Some(2));
    }

    #[tokio::test]
    async fn test_profiles_json_round_trip_on_disk() {
        let path = std::env::temp_dir().join(format!("profiles-{}.json", uuid::Uuid::new_v4()));
        let store = InMemoryProfiles::new();
        let player = PlayerId::new();
        store.insert(player, PlayerProfile { highest_round: 7, ..Default::default() });

        store.save_to(&path).await.unwrap();
        let loaded = InMemoryProfiles::load_from(&path).await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;

        assert_eq!(loaded.get(player).map(|p| p.highest_round), Some(7));
    }

    #[test]
    fn test_rank_by_orders_highest_first() {
        let store = InMemoryProfiles::new();
        let low = PlayerId::new();
        let high = PlayerId::new();
        let mid = PlayerId::new();
        store.insert(low, PlayerProfile { mobs_killed: 3, level: 9, ..Default::default() });
        store.insert(high, PlayerProfile { mobs_killed: 40, ..Default::default() });
        store.insert(mid, PlayerProfile { mobs_killed: 12, bosses_killed: 1, ..Default::default() });

        let top = store.rank_by(RankingStat::MobsKilled, 2);
        assert_eq!(top.len(), 2);
        assert_eq!((top[0].player, top[0].value, top[0].position), (high, 40, 1));
        assert_eq!((top[1].player, top[1].value, top[1].position), (mid, 12, 2));

        assert_eq!(store.rank_by(RankingStat::Level, 10)[0].player, low);
        assert_eq!(store.position(mid, RankingStat::BossesKilled), Some(1));
        assert_eq!(store.position(PlayerId::new(), RankingStat::Points), None);
    }

    #[test]
    fn test_ranking_is_capped_and_stable_on_ties() {
        let profiles: HashMap<PlayerId, PlayerProfile> = (0..RANKING_SIZE + 20)
            .map(|_| (PlayerId::new(), PlayerProfile { points: 5, ..Default::default() }))
            .collect();

        let board = rank(&profiles, RankingStat::Points, usize::MAX);
        assert_eq!(board.len(), RANKING_SIZE);
        assert!(board.windows(2).all(|w| w[0].player < w[1].player));
        assert_eq!(board.last().map(|e| e.position), Some(RANKING_SIZE));
    }

    #[test]
    fn test_highest_round_only_increases() {
        let mut profile = PlayerProfile::new();
        profile.record_round(5);
        profile.record_round(3);
        assert_eq!(profile.highest_round, 5);
    }
}
