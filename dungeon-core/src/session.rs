//! DungeonSession - the state of one run.
//!
//! A session is pure bookkeeping: who is in it, who is dead, which creatures
//! it owns, which timers it holds, and where it sits in its state machine.
//! It never calls out to the host; [`crate::manager::SessionManager`] does
//! that and is the only thing that mutates sessions.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::{DungeonDefinition, Location};
use crate::host::{EntityId, InventorySnapshot, PlayerId};
use crate::presentation::ScoreboardView;
use crate::scheduler::TaskId;

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Accepting players, below the start threshold.
    Waiting,
    /// Countdown running; still accepting players.
    Starting,
    InProgress,
    /// Regular mobs cleared, boss fight under way.
    BossRound,
    /// Terminal. Waiting for teardown.
    Ended,
}

impl SessionState {
    /// The legal transitions. Anything else is a bug in the caller.
    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Waiting, Starting)
                | (Starting, Waiting)
                | (Starting, InProgress)
                | (InProgress, BossRound)
                | (BossRound, InProgress)
                | (Starting, Ended)
                | (InProgress, Ended)
                | (BossRound, Ended)
                | (Waiting, Ended)
        )
    }

    pub fn is_joinable(self) -> bool {
        matches!(self, SessionState::Waiting | SessionState::Starting)
    }

    /// In a round, regular or boss.
    pub fn is_running(self) -> bool {
        matches!(self, SessionState::InProgress | SessionState::BossRound)
    }

    pub fn is_ended(self) -> bool {
        self == SessionState::Ended
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal session transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

// ============================================================================
// DungeonSession
// ============================================================================

/// One run of one dungeon.
#[derive(Debug)]
pub struct DungeonSession {
    pub(crate) id: SessionId,
    pub(crate) dungeon: Arc<DungeonDefinition>,
    pub(crate) state: SessionState,
    pub(crate) current_round: u32,
    pub(crate) mobs_killed: u32,
    pub(crate) mobs_spawned: u32,
    pub(crate) started_at: Option<Duration>,

    /// Join order is kept for placement.
    pub(crate) members: Vec<PlayerId>,
    pub(crate) dead: HashSet<PlayerId>,
    /// Everyone who died at any point; they forfeit their run equipment.
    pub(crate) fallen: HashSet<PlayerId>,
    pub(crate) saved_inventories: HashMap<PlayerId, InventorySnapshot>,

    pub(crate) live_entities: HashSet<EntityId>,
    pub(crate) active_boss: Option<EntityId>,

    pub(crate) tasks: HashSet<TaskId>,
    pub(crate) countdown_task: Option<TaskId>,
    pub(crate) boss_tasks: Vec<TaskId>,
    pub(crate) countdown_remaining: u32,

    /// Scheduled spawns for the current round that have not fired.
    pub(crate) pending_spawns: u32,
    pub(crate) round_boss: Option<String>,
    pub(crate) round_cleared: bool,

    pub(crate) next_entry: usize,
    pub(crate) history: Vec<(SessionState, SessionState)>,
}

impl DungeonSession {
    pub fn new(dungeon: Arc<DungeonDefinition>) -> Self {
        Self {
            id: SessionId::new(),
            dungeon,
            state: SessionState::Waiting,
            current_round: 0,
            mobs_killed: 0,
            mobs_spawned: 0,
            started_at: None,
            members: Vec::new(),
            dead: HashSet::new(),
            fallen: HashSet::new(),
            saved_inventories: HashMap::new(),
            live_entities: HashSet::new(),
            active_boss: None,
            tasks: HashSet::new(),
            countdown_task: None,
            boss_tasks: Vec::new(),
            countdown_remaining: 0,
            pending_spawns: 0,
            round_boss: None,
            round_cleared: false,
            next_entry: 0,
            history: Vec::new(),
        }
    }

    // ---- read access -------------------------------------------------------

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn dungeon(&self) -> &DungeonDefinition {
        &self.dungeon
    }

    pub fn dungeon_id(&self) -> &str {
        &self.dungeon.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn mobs_killed(&self) -> u32 {
        self.mobs_killed
    }

    pub fn mobs_spawned(&self) -> u32 {
        self.mobs_spawned
    }

    pub fn members(&self) -> &[PlayerId] {
        &self.members
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_member(&self, player: PlayerId) -> bool {
        self.members.contains(&player)
    }

    pub fn is_dead(&self, player: PlayerId) -> bool {
        self.dead.contains(&player)
    }

    pub fn dead_count(&self) -> usize {
        self.dead.len()
    }

    pub fn has_fallen(&self, player: PlayerId) -> bool {
        self.fallen.contains(&player)
    }

    pub fn alive_members(&self) -> Vec<PlayerId> {
        self.members
            .iter()
            .copied()
            .filter(|p| !self.dead.contains(p))
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.members.len() - self.dead.len()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.dungeon.max_players
    }

    pub fn has_min_players(&self) -> bool {
        self.members.len() >= self.dungeon.min_players
    }

    pub fn live_entities(&self) -> &HashSet<EntityId> {
        &self.live_entities
    }

    pub fn active_boss(&self) -> Option<EntityId> {
        self.active_boss
    }

    pub fn pending_spawns(&self) -> u32 {
        self.pending_spawns
    }

    pub fn owned_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Every transition this session has made, oldest first.
    pub fn history(&self) -> &[(SessionState, SessionState)] {
        &self.history
    }

    /// Time since the first round started.
    pub fn elapsed(&self, now: Duration) -> Duration {
        self.started_at
            .map(|start| now.saturating_sub(start))
            .unwrap_or_default()
    }

    /// Rounds actually fought, for rewards and records.
    pub fn rounds_reached(&self) -> u32 {
        if self.dungeon.limited_rounds {
            self.current_round.min(self.dungeon.total_rounds())
        } else {
            self.current_round
        }
    }

    pub fn scoreboard(&self) -> ScoreboardView<'_> {
        ScoreboardView {
            session: self.id,
            dungeon: &self.dungeon.display_name,
            state: self.state,
            round: self.current_round,
            total_rounds: self
                .dungeon
                .limited_rounds
                .then(|| self.dungeon.total_rounds()),
            members: self.members.len(),
            max_players: self.dungeon.max_players,
            alive_players: self.alive_count(),
            mobs_alive: self.live_entities.len(),
            mobs_killed: self.mobs_killed,
        }
    }

    // ---- mutation ----------------------------------------------------------

    /// Move to `to`, recording the step. Illegal requests change nothing.
    pub(crate) fn transition(&mut self, to: SessionState) -> Result<SessionState, TransitionError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(TransitionError { from, to });
        }
        self.state = to;
        self.history.push((from, to));
        Ok(from)
    }

    /// Add a member. Refuses duplicates and a full session.
    pub(crate) fn add_member(&mut self, player: PlayerId) -> bool {
        if self.is_full() || self.is_member(player) {
            return false;
        }
        self.members.push(player);
        true
    }

    /// Remove a member along with their dead flag.
    pub(crate) fn remove_member(&mut self, player: PlayerId) -> bool {
        let before = self.members.len();
        self.members.retain(|p| *p != player);
        self.dead.remove(&player);
        self.members.len() != before
    }

    pub(crate) fn mark_dead(&mut self, player: PlayerId) -> bool {
        if !self.is_member(player) || !self.dead.insert(player) {
            return false;
        }
        self.fallen.insert(player);
        true
    }

    /// Clear the dead set, returning who was in it.
    pub(crate) fn take_dead(&mut self) -> Vec<PlayerId> {
        let mut revived: Vec<_> = self.dead.drain().collect();
        revived.sort();
        revived
    }

    pub(crate) fn advance_round(&mut self) -> u32 {
        self.current_round += 1;
        self.pending_spawns = 0;
        self.round_boss = None;
        self.round_cleared = false;
        self.current_round
    }

    /// Drop creatures the world no longer has. Returns how many remain.
    pub(crate) fn prune_entities(&mut self, is_alive: impl Fn(EntityId) -> bool) -> usize {
        self.live_entities.retain(|e| is_alive(*e));
        if let Some(boss) = self.active_boss {
            if !self.live_entities.contains(&boss) {
                self.active_boss = None;
            }
        }
        self.live_entities.len()
    }

    /// Next entry point, cycling through the configured ones.
    pub(crate) fn next_entry_location(&mut self) -> Option<Location> {
        let entries = &self.dungeon.locations.entries;
        if entries.is_empty() {
            return None;
        }
        let location = entries[self.next_entry % entries.len()].clone();
        self.next_entry += 1;
        Some(location)
    }

    /// Forget every owned task, returning them so they can be cancelled.
    pub(crate) fn take_tasks(&mut self) -> Vec<TaskId> {
        self.countdown_task = None;
        self.boss_tasks.clear();
        let mut tasks: Vec<_> = self.tasks.drain().collect();
        tasks.sort();
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DungeonLocations;

    fn dungeon(min: usize, max: usize) -> Arc<DungeonDefinition> {
        Arc::new(DungeonDefinition::new("crypt").with_players(min, max))
    }

    #[test]
    fn test_exactly_nine_transitions() {
        use SessionState::*;
        let all = [Waiting, Starting, InProgress, BossRound, Ended];
        let legal = all
            .iter()
            .flat_map(|from| all.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .count();
        assert_eq!(legal, 9);
        for state in all {
            assert!(!Ended.can_transition_to(state));
        }
    }

    #[test]
    fn test_illegal_transition_changes_nothing() {
        let mut session = DungeonSession::new(dungeon(1, 4));
        let err = session.transition(SessionState::BossRound).unwrap_err();
        assert_eq!(err.from, SessionState::Waiting);
        assert_eq!(session.state(), SessionState::Waiting);
        assert!(session.history().is_empty());

        session.transition(SessionState::Starting).unwrap();
        assert_eq!(session.history(), &[(SessionState::Waiting, SessionState::Starting)]);
    }

    #[test]
    fn test_membership_bounds() {
        let mut session = DungeonSession::new(dungeon(1, 2));
        let (a, b, c) = (PlayerId::new(), PlayerId::new(), PlayerId::new());
        assert!(session.add_member(a));
        assert!(!session.add_member(a));
        assert!(session.add_member(b));
        assert!(session.is_full());
        assert!(!session.add_member(c));
        assert_eq!(session.member_count(), 2);
    }

    #[test]
    fn test_dead_is_subset_of_members() {
        let mut session = DungeonSession::new(dungeon(1, 4));
        let (a, b) = (PlayerId::new(), PlayerId::new());
        session.add_member(a);
        assert!(!session.mark_dead(b));

        assert!(session.mark_dead(a));
        assert!(!session.mark_dead(a));
        assert_eq!(session.alive_count(), 0);

        session.remove_member(a);
        assert_eq!(session.dead_count(), 0);
        assert!(session.has_fallen(a));
    }

    #[test]
    fn test_revive_keeps_fallen() {
        let mut session = DungeonSession::new(dungeon(1, 4));
        let a = PlayerId::new();
        session.add_member(a);
        session.mark_dead(a);

        assert_eq!(session.take_dead(), vec![a]);
        assert!(!session.is_dead(a));
        assert!(session.has_fallen(a));
    }

    #[test]
    fn test_entry_round_robin() {
        let locations = DungeonLocations {
            entries: vec![Location::new("w", 0.0, 64.0, 0.0), Location::new("w", 10.0, 64.0, 0.0)],
            ..Default::default()
        };
        let mut session = DungeonSession::new(Arc::new(
            DungeonDefinition::new("crypt").with_locations(locations),
        ));
        let xs: Vec<_> = (0..3)
            .filter_map(|_| session.next_entry_location())
            .map(|l| l.x)
            .collect();
        assert_eq!(xs, vec![0.0, 10.0, 0.0]);
    }

    #[test]
    fn test_prune_clears_dead_boss() {
        let mut session = DungeonSession::new(dungeon(1, 4));
        let (mob, boss) = (EntityId::new(), EntityId::new());
        session.live_entities.insert(mob);
        session.live_entities.insert(boss);
        session.active_boss = Some(boss);

        assert_eq!(session.prune_entities(|e| e == mob), 1);
        assert_eq!(session.active_boss(), None);
    }
}
