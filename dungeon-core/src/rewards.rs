//! Rewards: what a run pays out and where it is queued.
//!
//! Rewards are never handed out inside a run. Completion and drop rewards
//! are queued as [`PendingReward`]s on a [`RewardLedger`] and claimed later
//! through whatever interface the host provides.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::config::RewardSettings;
use crate::host::{ItemStack, PlayerId};

/// A single reward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewardKind {
    Item { item: ItemStack },
    Points { amount: u32 },
    Experience { amount: u32 },
    /// Console command run on claim; `{player}` is replaced with the name.
    Command { command: String },
}

impl RewardKind {
    pub fn points(amount: u32) -> Self {
        RewardKind::Points { amount }
    }

    pub fn experience(amount: u32) -> Self {
        RewardKind::Experience { amount }
    }
}

/// A reward with a probability of being granted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardChance {
    pub reward: RewardKind,
    /// Between 0 and 1.
    #[serde(default = "default_chance")]
    pub chance: f64,
}

fn default_chance() -> f64 {
    1.0
}

impl RewardChance {
    pub fn new(reward: RewardKind, chance: f64) -> Self {
        Self { reward, chance }
    }

    pub fn always(reward: RewardKind) -> Self {
        Self::new(reward, 1.0)
    }
}

/// Roll each chance independently and keep the winners.
pub fn roll<R: Rng + ?Sized>(chances: &[RewardChance], rng: &mut R) -> Vec<RewardKind> {
    chances
        .iter()
        .filter(|c| c.chance >= 1.0 || (c.chance > 0.0 && rng.gen::<f64>() < c.chance))
        .map(|c| c.reward.clone())
        .collect()
}

/// Fixed completion payout: points scale with rounds, experience with kills.
pub fn completion_rewards(settings: &RewardSettings, rounds: u32, kills: u32) -> Vec<RewardKind> {
    vec![
        RewardKind::points(
            settings
                .base_points
                .saturating_add(rounds.saturating_mul(settings.points_per_round)),
        ),
        RewardKind::experience(
            settings
                .base_experience
                .saturating_add(kills.saturating_mul(settings.experience_per_kill)),
        ),
    ]
}

/// A reward waiting to be claimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReward {
    pub id: Uuid,
    pub dungeon_id: String,
    pub kind: RewardKind,
    pub created_at: DateTime<Utc>,
}

impl PendingReward {
    pub fn new(dungeon_id: impl Into<String>, kind: RewardKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            dungeon_id: dungeon_id.into(),
            kind,
            created_at: Utc::now(),
        }
    }
}

/// Where pending rewards are queued. Fire-and-forget.
pub trait RewardLedger: Send {
    fn add_pending(&mut self, player: PlayerId, reward: PendingReward);
}

/// Ledger kept in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    pending: Arc<Mutex<HashMap<PlayerId, Vec<PendingReward>>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PlayerId, Vec<PendingReward>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending(&self, player: PlayerId) -> Vec<PendingReward> {
        self.lock().get(&player).cloned().unwrap_or_default()
    }

    /// Remove and return everything queued for a player.
    pub fn take(&self, player: PlayerId) -> Vec<PendingReward> {
        self.lock().remove(&player).unwrap_or_default()
    }
}

impl RewardLedger for InMemoryLedger {
    fn add_pending(&mut self, player: PlayerId, reward: PendingReward) {
        self.lock().entry(player).or_default().push(reward);
    }
}
