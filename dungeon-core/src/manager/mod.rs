//! SessionManager - the single owner of every dungeon session.
//!
//! The manager keeps three indices (by session id, by dungeon id, by player
//! id) and is the only code that mutates sessions. Every external trigger
//! (a command, a creature dying, a timer firing) enters through one of its
//! methods. Work that has to happen later is queued on the timer queue as an
//! [`Action`] and runs when the owner advances the clock.
//!
//! The implementation is split across files:
//! - `mod.rs` - registry, queries, timer dispatch, ending and teardown
//! - `lifecycle.rs` - join, leave, death and revival
//! - `progression.rs` - countdown, rounds, kills and bosses

mod lifecycle;
mod progression;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, Location};
use crate::config::EngineConfig;
use crate::equipment::{EquipmentStore, InMemoryEquipment};
use crate::error::SessionError;
use crate::host::{GameHost, InventorySnapshot, PlayerId, PlayerMode};
use crate::messages::MessageCatalog;
use crate::presentation::{NoPresentation, Presentation};
use crate::profile::{DerivedAttributes, InMemoryProfiles, PlayerProfile, ProfileStore};
use crate::rewards::{self, InMemoryLedger, PendingReward, RewardLedger};
use crate::scheduler::{Action, TaskId, TimerQueue};
use crate::session::{DungeonSession, SessionId, SessionState};
use crate::spawner::MobSpawnCoordinator;

/// The outside world the manager talks to.
pub struct Collaborators {
    pub host: Box<dyn GameHost>,
    pub profiles: Box<dyn ProfileStore>,
    pub equipment: Box<dyn EquipmentStore>,
    pub rewards: Box<dyn RewardLedger>,
    pub presentation: Box<dyn Presentation>,
}

impl Collaborators {
    /// A host with in-memory stores and no presentation.
    pub fn new(host: impl GameHost + 'static) -> Self {
        Self {
            host: Box::new(host),
            profiles: Box::new(InMemoryProfiles::new()),
            equipment: Box::new(InMemoryEquipment::new()),
            rewards: Box::new(InMemoryLedger::new()),
            presentation: Box::new(NoPresentation),
        }
    }

    pub fn with_profiles(mut self, profiles: impl ProfileStore + 'static) -> Self {
        self.profiles = Box::new(profiles);
        self
    }

    pub fn with_equipment(mut self, equipment: impl EquipmentStore + 'static) -> Self {
        self.equipment = Box::new(equipment);
        self
    }

    pub fn with_rewards(mut self, rewards: impl RewardLedger + 'static) -> Self {
        self.rewards = Box::new(rewards);
        self
    }

    pub fn with_presentation(mut self, presentation: impl Presentation + 'static) -> Self {
        self.presentation = Box::new(presentation);
        self
    }
}

/// Registry and orchestrator for all dungeon sessions.
pub struct SessionManager {
    config: EngineConfig,
    catalog: Arc<Catalog>,
    messages: MessageCatalog,

    host: Box<dyn GameHost>,
    profiles: Box<dyn ProfileStore>,
    equipment: Box<dyn EquipmentStore>,
    rewards: Box<dyn RewardLedger>,
    presentation: Box<dyn Presentation>,

    timers: TimerQueue,
    spawner: MobSpawnCoordinator,

    sessions: HashMap<SessionId, DungeonSession>,
    by_dungeon: HashMap<String, SessionId>,
    by_player: HashMap<PlayerId, SessionId>,
}

impl SessionManager {
    pub fn new(config: EngineConfig, catalog: Arc<Catalog>, collaborators: Collaborators) -> Self {
        let spawner = MobSpawnCoordinator::new(config.rng_seed);
        Self {
            config,
            catalog,
            messages: MessageCatalog::default(),
            host: collaborators.host,
            profiles: collaborators.profiles,
            equipment: collaborators.equipment,
            rewards: collaborators.rewards,
            presentation: collaborators.presentation,
            timers: TimerQueue::new(),
            spawner,
            sessions: HashMap::new(),
            by_dungeon: HashMap::new(),
            by_player: HashMap::new(),
        }
    }

    /// Replace the message templates.
    pub fn with_messages(mut self, messages: MessageCatalog) -> Self {
        self.messages = messages;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// The active session for a dungeon, creating one if there is none.
    /// A session that has ended but not been torn down yet does not count.
    pub fn create_session(&mut self, dungeon_id: &str) -> Result<SessionId, SessionError> {
        if let Some(existing) = self.active_session_for(dungeon_id) {
            return Ok(existing);
        }
        let dungeon = self
            .catalog
            .dungeon(dungeon_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownDungeon(dungeon_id.to_string()))?;

        let session = DungeonSession::new(dungeon);
        let id = session.id();
        self.sessions.insert(id, session);
        self.by_dungeon.insert(dungeon_id.to_string(), id);
        info!(session = %id, dungeon = %dungeon_id, "session_created");
        Ok(id)
    }

    fn active_session_for(&self, dungeon_id: &str) -> Option<SessionId> {
        let id = self.by_dungeon.get(dungeon_id)?;
        let session = self.sessions.get(id)?;
        (!session.state().is_ended()).then_some(*id)
    }

    pub fn session(&self, id: SessionId) -> Option<&DungeonSession> {
        self.sessions.get(&id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &DungeonSession> {
        self.sessions.values()
    }

    pub fn get_player_session(&self, player: PlayerId) -> Option<&DungeonSession> {
        self.by_player.get(&player).and_then(|id| self.sessions.get(id))
    }

    pub fn get_session_by_dungeon(&self, dungeon_id: &str) -> Option<&DungeonSession> {
        self.by_dungeon
            .get(dungeon_id)
            .and_then(|id| self.sessions.get(id))
    }

    pub fn is_in_dungeon(&self, player: PlayerId) -> bool {
        self.by_player.contains_key(&player)
    }

    /// Sessions that have not ended.
    pub fn get_active_session_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| !s.state().is_ended())
            .count()
    }

    pub fn get_total_players_in_dungeons(&self) -> usize {
        self.by_player.len()
    }

    // ========================================================================
    // Clock
    // ========================================================================

    /// Current engine time.
    pub fn now(&self) -> Duration {
        self.timers.now()
    }

    /// When the next scheduled action is due.
    pub fn next_deadline(&mut self) -> Option<Duration> {
        self.timers.next_due()
    }

    /// Number of live timers, owned or not.
    pub fn scheduled_task_count(&self) -> usize {
        self.timers.len()
    }

    /// Fire everything due up to `now`, in order. Actions scheduled while
    /// firing run in the same call if they fall due in time.
    pub fn advance_to(&mut self, now: Duration) {
        while let Some((task, action)) = self.timers.pop_due(now) {
            self.fire(task, action);
        }
        self.timers.advance_clock(now);
    }

    pub fn advance(&mut self, by: Duration) {
        let target = self.timers.now() + by;
        self.advance_to(target);
    }

    fn fire(&mut self, task: TaskId, action: Action) {
        let id = action.session();
        if !self.timers.is_scheduled(task) {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.tasks.remove(&task);
            }
        }
        match action {
            Action::CountdownTick { session } => self.countdown_tick(task, session),
            Action::NextRound {
                session,
                after_round,
            } => {
                let current = self.sessions.get(&session).map(|s| s.current_round());
                if current == Some(after_round) {
                    self.start_next_round(session);
                } else {
                    debug!(session = %session, after_round, "stale_round_advance");
                }
            }
            Action::SpawnMob {
                session,
                round,
                mob_id,
            } => self.fire_spawn(session, round, &mob_id),
            Action::SpawnBoss {
                session,
                round,
                boss_id,
            } => self.fire_boss_spawn(session, round, &boss_id),
            Action::BossAbility {
                session,
                boss,
                ability,
            } => self.fire_ability(task, session, boss, &ability),
            Action::StatusBroadcast { session } => self.status_broadcast(task, session),
            Action::Cleanup { session } => self.cleanup_session(session),
        }
    }

    /// Cancel a task and forget it on its session.
    fn drop_task(&mut self, id: SessionId, task: TaskId) {
        self.timers.cancel(task);
        if let Some(session) = self.sessions.get_mut(&id) {
            session.tasks.remove(&task);
        }
    }

    fn own_task(&mut self, id: SessionId, delay: Duration, action: Action) {
        let task = self.timers.schedule(delay, action);
        if let Some(session) = self.sessions.get_mut(&id) {
            session.tasks.insert(task);
        }
    }

    fn cancel_owned_tasks(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        for task in session.take_tasks() {
            self.timers.cancel(task);
        }
    }

    // ========================================================================
    // Messaging helpers
    // ========================================================================

    fn tell(&mut self, player: PlayerId, key: &str, placeholders: &[(&str, String)]) {
        let text = self.messages.chat(key, placeholders);
        self.host.send_message(player, &text);
    }

    /// Send a message to every connected member.
    fn broadcast(&mut self, id: SessionId, key: &str, placeholders: &[(&str, String)]) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let text = self.messages.chat(key, placeholders);
        for player in session.members() {
            if self.host.is_online(*player) {
                self.host.send_message(*player, &text);
            }
        }
    }

    fn title_all(&mut self, id: SessionId, title_key: &str, placeholders: &[(&str, String)]) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let title = self.messages.render(title_key, placeholders);
        for player in session.members() {
            if self.host.is_online(*player) {
                self.host.send_title(*player, &title, "");
            }
        }
    }

    fn sound_all(&mut self, id: SessionId, sound: &str) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        for player in session.members() {
            if self.host.is_online(*player) {
                self.host.play_sound(*player, sound);
            }
        }
    }

    fn refresh_boards(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.get(&id) {
            self.presentation
                .refresh_boards(session.members(), &session.scoreboard());
        }
    }

    /// Apply a state transition and announce it. Each transition sends
    /// exactly one broadcast. Illegal requests are logged and ignored.
    fn set_state(
        &mut self,
        id: SessionId,
        to: SessionState,
        notice: &str,
        placeholders: &[(&str, String)],
    ) -> bool {
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        match session.transition(to) {
            Ok(from) => {
                info!(session = %id, ?from, ?to, "session_transition");
                self.presentation.state_changed(id, from, to);
                self.broadcast(id, notice, placeholders);
                true
            }
            Err(error) => {
                warn!(session = %id, error = %error, "illegal_transition");
                false
            }
        }
    }

    // ========================================================================
    // Profiles
    // ========================================================================

    fn update_profile(&mut self, player: PlayerId, update: impl FnOnce(&mut PlayerProfile)) {
        let mut profile = self.profiles.get(player).unwrap_or_default();
        update(&mut profile);
        if let Err(error) = self.profiles.save(player, &profile) {
            warn!(player = %player, error = %error, "profile_save_failed");
        }
    }

    fn derived_attributes(&self, player: PlayerId) -> DerivedAttributes {
        self.profiles
            .get(player)
            .map(|p| p.derived_attributes())
            .unwrap_or_default()
    }

    fn queue_reward(&mut self, player: PlayerId, dungeon_id: &str, kind: rewards::RewardKind) {
        self.rewards
            .add_pending(player, PendingReward::new(dungeon_id, kind));
    }

    // ========================================================================
    // Ending and teardown
    // ========================================================================

    /// End a session. Completed runs pay out rewards; failed runs count as a
    /// failure for every member. Idempotent: ending an ended session does
    /// nothing. Teardown follows after a grace delay.
    pub fn end_session(&mut self, id: SessionId, completed: bool) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        if session.state().is_ended() {
            return;
        }
        let notice = match (completed, session.state()) {
            (true, _) => "dungeon-completed",
            (false, SessionState::Waiting) => "dungeon-ended",
            (false, _) => "dungeon-failed",
        };
        if !self.set_state(id, SessionState::Ended, notice, &[]) {
            return;
        }
        self.cancel_owned_tasks(id);
        self.clear_entities(id);

        let now = self.timers.now();
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let dungeon = Arc::clone(&session.dungeon);
        let members = session.members().to_vec();
        let rounds = session.rounds_reached();
        let kills = session.mobs_killed();
        let played = session.elapsed(now);

        for player in members {
            if !self.host.is_online(player) {
                continue;
            }
            if completed {
                let mut payout = rewards::completion_rewards(&self.config.rewards, rounds, kills);
                payout.extend(rewards::roll(&dungeon.rewards, self.spawner.rng()));
                for kind in payout {
                    self.queue_reward(player, &dungeon.id, kind);
                }
                self.update_profile(player, |p| {
                    p.dungeons_completed += 1;
                    p.record_round(rounds);
                    p.add_play_time(played);
                });
            } else {
                self.update_profile(player, |p| {
                    p.dungeons_failed += 1;
                    p.record_round(rounds.saturating_sub(1));
                    p.add_play_time(played);
                });
            }
        }
        self.title_all(id, notice, &[]);

        info!(session = %id, dungeon = %dungeon.id, completed, rounds, kills, "session_ended");
        self.timers
            .schedule(self.config.grace(completed), Action::Cleanup { session: id });
    }

    /// End successfully.
    pub fn complete_dungeon(&mut self, id: SessionId) {
        self.end_session(id, true);
    }

    /// Remove every creature the session owns from the world.
    fn clear_entities(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        let mut entities: Vec<_> = session.live_entities.drain().collect();
        entities.sort();
        session.active_boss = None;
        for entity in entities {
            self.host.remove_entity(entity);
        }
        self.spawner.forget_session(id);
        self.presentation.boss_bar_removed(id);
    }

    /// Give a departing player back everything the run took.
    fn restore_player(
        &mut self,
        player: PlayerId,
        snapshot: Option<InventorySnapshot>,
        forfeit_equipment: bool,
        exit: Option<&Location>,
    ) {
        self.host.set_mode(player, PlayerMode::Participant);
        self.host.reset_attributes(player);
        if !forfeit_equipment {
            let carried = self.host.snapshot_inventory(player);
            if let Err(error) = self.equipment.sync_from_inventory(player, &carried) {
                warn!(player = %player, error = %error, "equipment_sync_failed");
            }
        }
        if let Some(snapshot) = snapshot {
            self.host.restore_inventory(player, &snapshot);
        }
        match exit {
            Some(exit) => self.host.teleport(player, exit),
            None => warn!(player = %player, "no_exit_location"),
        }
        self.presentation.clear_player(player);
    }

    /// Tear an ended session down: restore connected members, then drop it
    /// from every index.
    pub fn cleanup_session(&mut self, id: SessionId) {
        match self.sessions.get(&id) {
            None => return,
            Some(session) if !session.state().is_ended() => {
                warn!(session = %id, state = ?session.state(), "cleanup_before_end");
                return;
            }
            Some(_) => {}
        }
        self.cancel_owned_tasks(id);
        let Some(mut session) = self.sessions.remove(&id) else {
            return;
        };
        let exit = session.dungeon.locations.exit.clone();
        for player in session.members().to_vec() {
            if self.host.is_online(player) {
                let snapshot = session.saved_inventories.remove(&player);
                self.restore_player(player, snapshot, session.has_fallen(player), exit.as_ref());
            }
            if self.by_player.get(&player) == Some(&id) {
                self.by_player.remove(&player);
            }
        }
        if self.by_dungeon.get(session.dungeon_id()) == Some(&id) {
            self.by_dungeon.remove(session.dungeon_id());
        }
        self.spawner.forget_session(id);
        info!(session = %id, dungeon = %session.dungeon_id(), "session_cleaned_up");
    }

    /// Drop an empty lobby that never started. It owns nothing to restore.
    fn discard_session(&mut self, id: SessionId) {
        self.cancel_owned_tasks(id);
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };
        if self.by_dungeon.get(session.dungeon_id()) == Some(&id) {
            self.by_dungeon.remove(session.dungeon_id());
        }
        self.spawner.forget_session(id);
        debug!(session = %id, dungeon = %session.dungeon_id(), "session_discarded");
    }

    /// End every session as failed and tear it down immediately.
    pub fn shutdown(&mut self) {
        let mut ids: Vec<_> = self.sessions.keys().copied().collect();
        ids.sort();
        for id in ids {
            self.end_session(id, false);
            self.cleanup_session(id);
        }
        info!("all_sessions_ended");
    }
}
