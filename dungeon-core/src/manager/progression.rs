//! Round progression: countdown, start, rounds, kills and bosses.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::SessionManager;
use crate::abilities::AbilityOutcome;
use crate::catalog::MobSpawnEntry;
use crate::host::{EntityId, PlayerId};
use crate::rewards;
use crate::scheduler::{Action, TaskId};
use crate::session::{SessionId, SessionState};

impl SessionManager {
    // ========================================================================
    // Countdown
    // ========================================================================

    /// Start the countdown once a waiting lobby has enough players.
    pub(super) fn check_start(&mut self, id: SessionId) {
        let ready = self
            .sessions
            .get(&id)
            .is_some_and(|s| s.state() == SessionState::Waiting && s.has_min_players());
        if !ready {
            return;
        }
        let countdown = self.config.countdown_secs;
        if !self.set_state(
            id,
            SessionState::Starting,
            "countdown-started",
            &[("time", countdown.to_string())],
        ) {
            return;
        }
        let task = self.timers.schedule_repeating(
            Duration::ZERO,
            Duration::from_secs(1),
            Action::CountdownTick { session: id },
        );
        if let Some(session) = self.sessions.get_mut(&id) {
            session.countdown_remaining = countdown;
            session.countdown_task = Some(task);
            session.tasks.insert(task);
        }
    }

    pub(super) fn cancel_countdown(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if let Some(task) = session.countdown_task.take() {
            session.tasks.remove(&task);
            self.timers.cancel(task);
        }
    }

    pub(super) fn countdown_tick(&mut self, task: TaskId, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            self.timers.cancel(task);
            return;
        };
        if session.state() != SessionState::Starting {
            self.drop_task(id, task);
            return;
        }
        if !session.has_min_players() {
            self.cancel_countdown(id);
            self.set_state(id, SessionState::Waiting, "starting-cancelled", &[]);
            return;
        }
        let remaining = session.countdown_remaining;
        if remaining == 0 {
            self.cancel_countdown(id);
            self.start_dungeon(id);
            return;
        }
        session.countdown_remaining -= 1;

        self.presentation.countdown(id, remaining);
        if self.config.is_announcement(remaining) {
            self.broadcast(id, "starting-in", &[("time", remaining.to_string())]);
            self.sound_all(id, "countdown-tick");
        }
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Start a lobby right away, skipping the countdown. Works from
    /// `Waiting` as well as `Starting`. Returns false for any other state.
    pub fn force_start(&mut self, id: SessionId) -> bool {
        let Some(session) = self.sessions.get(&id) else {
            return false;
        };
        match session.state() {
            SessionState::Waiting => {
                if !self.set_state(id, SessionState::Starting, "force-start", &[]) {
                    return false;
                }
            }
            SessionState::Starting => self.cancel_countdown(id),
            _ => return false,
        }
        info!(session = %id, "force_start");
        self.start_dungeon(id)
    }

    /// Move a starting session into play: place and buff everyone, then
    /// queue the first round after the settle delay.
    fn start_dungeon(&mut self, id: SessionId) -> bool {
        if !self.set_state(id, SessionState::InProgress, "dungeon-started", &[]) {
            return false;
        }
        let now = self.timers.now();
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        session.started_at = Some(now);
        session.current_round = 0;
        let dungeon = Arc::clone(&session.dungeon);
        let members = session.members().to_vec();

        let entries = &dungeon.locations.entries;
        for (index, &player) in members.iter().enumerate() {
            let entry = if entries.is_empty() {
                None
            } else {
                Some(entries[index % entries.len()].clone())
            };
            match entry {
                Some(entry) => self.host.teleport(player, &entry),
                None => warn!(dungeon = %dungeon.id, "no_entry_locations"),
            }
            let attributes = self.derived_attributes(player);
            self.host.apply_attributes(player, &attributes);
            self.host.heal(player, attributes.max_health);
        }
        self.title_all(id, "dungeon-started", &[]);
        self.sound_all(id, "dungeon-start");
        if let Some(session) = self.sessions.get(&id) {
            let view = session.scoreboard();
            for &player in &members {
                self.presentation.show_game_board(player, &view);
            }
        }

        self.own_task(
            id,
            self.config.settle_delay(),
            Action::NextRound {
                session: id,
                after_round: 0,
            },
        );
        let period = self.config.status_interval();
        let status = self
            .timers
            .schedule_repeating(period, period, Action::StatusBroadcast { session: id });
        if let Some(session) = self.sessions.get_mut(&id) {
            session.tasks.insert(status);
        }

        info!(session = %id, dungeon = %dungeon.id, players = members.len(), "dungeon_started");
        true
    }

    // ========================================================================
    // Rounds
    // ========================================================================

    /// Advance to the next round: revive the dead, bump the counter, and
    /// either finish (limited dungeon past its last round) or queue the
    /// round's spawns. Lobbies are force-started instead.
    pub fn start_next_round(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        match session.state() {
            SessionState::Ended => return,
            SessionState::Waiting | SessionState::Starting => {
                self.force_start(id);
                return;
            }
            SessionState::InProgress | SessionState::BossRound => {}
        }

        self.revive_dead_players(id);

        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        let round = session.advance_round();
        let dungeon = Arc::clone(&session.dungeon);
        if dungeon.limited_rounds && round > dungeon.total_rounds() {
            self.complete_dungeon(id);
            return;
        }

        let (manifest, boss): (Vec<MobSpawnEntry>, Option<String>) = match dungeon.round(round) {
            Some(definition) => (definition.mobs.clone(), definition.boss.clone()),
            None if dungeon.limited_rounds => (Vec::new(), None),
            None => {
                let boss = if dungeon.unlimited.is_boss_round(round) {
                    dungeon
                        .unlimited
                        .boss
                        .clone()
                        .or_else(|| self.catalog.first_boss().map(|b| b.id.clone()))
                } else {
                    None
                };
                (dungeon.unlimited.mobs.clone(), boss)
            }
        };
        session.round_boss = boss;

        let cap = self.config.mob_limit_for(&dungeon.id);
        session.prune_entities(|e| self.host.is_entity_alive(e));
        let queued = self
            .spawner
            .schedule_round(session, &manifest, cap, &mut self.timers);

        self.broadcast(id, "round-start", &[("round", round.to_string())]);
        self.title_all(id, "round-start", &[("round", round.to_string())]);
        self.sound_all(id, "round-start");
        self.refresh_boards(id);
        info!(session = %id, round, queued, "round_started");

        self.check_round_clear(id);
    }

    /// Declare the round clear once nothing is alive, nothing is queued and
    /// no boss is up. Fires at most once per round.
    fn check_round_clear(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if session.state() != SessionState::InProgress
            || session.current_round == 0
            || session.round_cleared
            || session.pending_spawns > 0
            || session.active_boss.is_some()
        {
            return;
        }
        if session.prune_entities(|e| self.host.is_entity_alive(e)) > 0 {
            return;
        }
        session.round_cleared = true;
        let round = session.current_round;
        let boss = session.round_boss.clone();

        self.broadcast(id, "all-mobs-killed", &[]);
        self.sound_all(id, "round-clear");
        info!(session = %id, round, boss = boss.is_some(), "round_cleared");

        match boss {
            Some(boss_id) => {
                if self.set_state(id, SessionState::BossRound, "boss-round", &[]) {
                    self.own_task(
                        id,
                        self.config.boss_spawn_delay(),
                        Action::SpawnBoss {
                            session: id,
                            round,
                            boss_id,
                        },
                    );
                }
            }
            None => self.own_task(
                id,
                self.config.round_interval(),
                Action::NextRound {
                    session: id,
                    after_round: round,
                },
            ),
        }
    }

    pub(super) fn fire_spawn(&mut self, id: SessionId, round: u32, mob_id: &str) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if session.state().is_ended() || session.current_round != round {
            debug!(session = %id, round, "stale_spawn");
            return;
        }
        session.pending_spawns = session.pending_spawns.saturating_sub(1);

        let cap = self.config.mob_limit_for(session.dungeon_id());
        match self.catalog.mob(mob_id) {
            Some(mob) => {
                if let Some(spawned) = self.spawner.spawn_mob(session, mob, cap, &mut *self.host) {
                    self.presentation.spawn_effect(&spawned.location);
                }
            }
            None => warn!(session = %id, mob = %mob_id, "unknown_mob"),
        }
        self.refresh_boards(id);
        self.check_round_clear(id);
    }

    // ========================================================================
    // Kills
    // ========================================================================

    /// A creature died in the world. Routes it to its session by tag,
    /// credits the killer if they are a member, then counts the kill.
    /// Returns false for creatures this engine does not own.
    pub fn on_entity_death(&mut self, entity: EntityId, killer: Option<PlayerId>) -> bool {
        let Some(tag) = self.spawner.untag(entity) else {
            return false;
        };
        let Some(session) = self.sessions.get_mut(&tag.session) else {
            return false;
        };
        session.live_entities.remove(&entity);
        if session.state().is_ended() {
            return true;
        }
        let id = session.id();
        let is_boss = tag.is_boss && session.active_boss() == Some(entity);
        let killer = killer.filter(|k| session.is_member(*k));
        let dungeon_id = session.dungeon_id().to_string();

        if let Some(killer) = killer {
            let settings = &self.config.rewards;
            let (experience, chances) = if is_boss {
                let chances = self.catalog.boss(&tag.mob_id).map(|b| b.rewards.clone());
                (settings.boss_kill_experience, chances)
            } else {
                let chances = self.catalog.mob(&tag.mob_id).map(|m| m.rewards.clone());
                (settings.mob_kill_experience, chances)
            };
            self.update_profile(killer, |p| {
                p.mobs_killed += 1;
                if is_boss {
                    p.bosses_killed += 1;
                }
                p.add_experience(u64::from(experience));
            });
            let drops = rewards::roll(&chances.unwrap_or_default(), self.spawner.rng());
            for kind in drops {
                self.queue_reward(killer, &dungeon_id, kind);
            }
        }

        self.on_mob_killed(id, is_boss);
        true
    }

    /// Count a kill and move the round along. A boss kill finishes the boss
    /// round; a regular kill may clear the round.
    pub fn on_mob_killed(&mut self, id: SessionId, is_boss: bool) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if session.state().is_ended() {
            return;
        }
        if is_boss && session.state() != SessionState::BossRound {
            debug!(session = %id, "boss_kill_ignored");
            return;
        }
        session.mobs_killed += 1;

        if !is_boss {
            self.refresh_boards(id);
            self.check_round_clear(id);
            return;
        }

        if let Some(boss) = session.active_boss.take() {
            session.live_entities.remove(&boss);
        }
        let ability_tasks: Vec<_> = session.boss_tasks.drain(..).collect();
        for task in ability_tasks {
            session.tasks.remove(&task);
            self.timers.cancel(task);
        }
        self.presentation.boss_bar_removed(id);
        self.sound_all(id, "boss-defeated");
        info!(session = %id, "boss_defeated");
        self.finish_boss_round(id, "boss-defeated");
    }

    /// Leave the boss round: finish the dungeon if this was the last round,
    /// otherwise go back to regular play and queue the next round.
    fn finish_boss_round(&mut self, id: SessionId, notice: &str) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let round = session.current_round();
        let dungeon = session.dungeon();
        if dungeon.limited_rounds && round >= dungeon.total_rounds() {
            self.complete_dungeon(id);
            return;
        }
        if self.set_state(id, SessionState::InProgress, notice, &[]) {
            self.own_task(
                id,
                self.config.round_interval(),
                Action::NextRound {
                    session: id,
                    after_round: round,
                },
            );
        }
    }

    // ========================================================================
    // Bosses
    // ========================================================================

    pub(super) fn fire_boss_spawn(&mut self, id: SessionId, round: u32, boss_id: &str) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if session.state() != SessionState::BossRound || session.current_round != round {
            debug!(session = %id, round, "stale_boss_spawn");
            return;
        }

        let boss = self.catalog.boss(boss_id);
        let spawned = match boss {
            Some(boss) => self
                .spawner
                .spawn_boss(session, boss, &mut *self.host, &mut self.timers),
            None => None,
        };
        let (Some(boss), Some(spawned)) = (boss, spawned) else {
            warn!(session = %id, boss = %boss_id, "boss_unavailable");
            self.finish_boss_round(id, "boss-unavailable");
            return;
        };

        let viewers = session.members().to_vec();
        let name = boss.display_name.clone();
        self.presentation
            .boss_bar_shown(id, spawned.entity, &name, &viewers);
        self.presentation.spawn_effect(&spawned.location);
        self.broadcast(id, "boss-spawned", &[("boss", name.clone())]);
        self.title_all(id, "boss-spawned", &[("boss", name)]);
        self.sound_all(id, "boss-spawn");
        info!(session = %id, boss = %boss_id, entity = %spawned.entity, "boss_spawned");
    }

    pub(super) fn fire_ability(&mut self, task: TaskId, id: SessionId, boss: EntityId, name: &str) {
        let Some(session) = self.sessions.get(&id) else {
            self.timers.cancel(task);
            return;
        };
        let current = !session.state().is_ended()
            && session.active_boss() == Some(boss)
            && self.host.is_entity_alive(boss);
        if !current {
            debug!(session = %id, ability = %name, "ability_task_retired");
            self.drop_task(id, task);
            return;
        }

        let ability = self
            .spawner
            .tag(boss)
            .and_then(|tag| self.catalog.boss(&tag.mob_id))
            .and_then(|def| def.abilities.get(name));
        let outcome =
            ability.and_then(|ability| self.spawner.resolve_ability(session, boss, name, ability));
        let Some(outcome) = outcome else {
            warn!(session = %id, ability = %name, "unknown_ability");
            self.drop_task(id, task);
            return;
        };

        match outcome {
            AbilityOutcome::Cast { cast, targets } => {
                debug!(session = %id, ability = %name, targets = targets.len(), "ability_cast");
                self.host.cast_ability(boss, &cast, &targets);
            }
            AbilityOutcome::Summon { mob_id, count } => {
                let Some(mob) = self.catalog.mob(&mob_id) else {
                    warn!(session = %id, mob = %mob_id, "unknown_minion");
                    return;
                };
                let Some(near) = self.host.entity_location(boss) else {
                    return;
                };
                let Some(session) = self.sessions.get_mut(&id) else {
                    return;
                };
                let cap = self.config.mob_limit_for(session.dungeon_id());
                let spawned = self
                    .spawner
                    .summon(session, mob, count, &near, cap, &mut *self.host);
                for minion in &spawned {
                    self.presentation.spawn_effect(&minion.location);
                }
                debug!(session = %id, summoned = spawned.len(), "minions_summoned");
                self.refresh_boards(id);
            }
            AbilityOutcome::Nothing => {}
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub(super) fn status_broadcast(&mut self, task: TaskId, id: SessionId) {
        let Some(session) = self.sessions.get(&id) else {
            self.timers.cancel(task);
            return;
        };
        if !session.state().is_running() {
            return;
        }
        let elapsed = session.elapsed(self.timers.now()).as_secs();
        let text = self.messages.render(
            "status-line",
            &[
                ("round", session.current_round().to_string()),
                ("mobs", session.live_entities().len().to_string()),
                ("alive", session.alive_count().to_string()),
                ("time", format!("{:02}:{:02}", elapsed / 60, elapsed % 60)),
            ],
        );
        for &player in session.members() {
            if self.host.is_online(player) {
                self.host.send_action_bar(player, &text);
            }
        }
    }
}
