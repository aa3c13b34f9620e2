//! Player lifecycle: joining, leaving, dying and coming back.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::SessionManager;
use crate::equipment::apply_loadout;
use crate::error::{JoinRejection, SessionError};
use crate::host::{PlayerId, PlayerMode};
use crate::session::{SessionId, SessionState};

impl SessionManager {
    /// Put a player into a session. Checks, in order: not already in a
    /// session, session still accepting players, dungeon open, room left.
    /// A rejection is also sent to the player as a message.
    pub fn join_session(&mut self, player: PlayerId, id: SessionId) -> Result<(), JoinRejection> {
        if let Err(rejection) = self.check_join(player, id) {
            debug!(player = %player, session = %id, reason = %rejection, "join_rejected");
            self.tell(player, rejection.message_key(), &[]);
            return Err(rejection);
        }

        let snapshot = self
            .config
            .save_inventory
            .then(|| self.host.snapshot_inventory(player));
        if self.config.clear_inventory {
            self.host.clear_inventory(player);
        }
        if self.config.give_weapon {
            self.host.give_run_weapon(player);
        }
        apply_loadout(&*self.equipment, &mut *self.host, player);

        let Some(session) = self.sessions.get_mut(&id) else {
            return Err(JoinRejection::NoSuchSession);
        };
        if let Some(snapshot) = snapshot {
            session.saved_inventories.insert(player, snapshot);
        }
        match session.next_entry_location() {
            Some(entry) => self.host.teleport(player, &entry),
            None => warn!(dungeon = %session.dungeon_id(), "no_entry_locations"),
        }
        session.add_member(player);
        self.by_player.insert(player, id);

        let dungeon_name = session.dungeon().display_name.clone();
        let current = session.member_count().to_string();
        let max = session.dungeon().max_players.to_string();
        self.presentation.show_waiting_board(player, &session.scoreboard());

        let name = self.host.player_name(player);
        self.tell(player, "dungeon-joined", &[("dungeon", dungeon_name)]);
        self.broadcast(
            id,
            "player-joined",
            &[("player", name), ("current", current), ("max", max)],
        );
        info!(player = %player, session = %id, "player_joined");

        self.check_start(id);
        Ok(())
    }

    fn check_join(&self, player: PlayerId, id: SessionId) -> Result<(), JoinRejection> {
        if self.by_player.contains_key(&player) {
            return Err(JoinRejection::AlreadyInSession);
        }
        let session = self.sessions.get(&id).ok_or(JoinRejection::NoSuchSession)?;
        if !session.state().is_joinable() {
            return Err(JoinRejection::InProgress);
        }
        if !session.dungeon().schedule.is_open_now() {
            return Err(JoinRejection::DungeonClosed);
        }
        if session.is_full() {
            return Err(JoinRejection::DungeonFull);
        }
        Ok(())
    }

    /// Join whichever session the dungeon currently has, creating one if
    /// needed. A lobby created only for a rejected join is dropped again.
    pub fn join_dungeon(&mut self, player: PlayerId, dungeon_id: &str) -> Result<SessionId, SessionError> {
        if self.by_player.contains_key(&player) {
            self.tell(player, JoinRejection::AlreadyInSession.message_key(), &[]);
            return Err(JoinRejection::AlreadyInSession.into());
        }
        let id = self.create_session(dungeon_id)?;
        if let Err(rejection) = self.join_session(player, id) {
            let empty_lobby = self
                .sessions
                .get(&id)
                .is_some_and(|s| s.state() == SessionState::Waiting && s.member_count() == 0);
            if empty_lobby {
                self.discard_session(id);
            }
            return Err(rejection.into());
        }
        Ok(id)
    }

    /// Take a player out of their session and give back what the run took.
    /// Returns false if they were not in one.
    pub fn leave_session(&mut self, player: PlayerId) -> bool {
        let Some(id) = self.by_player.remove(&player) else {
            return false;
        };
        let Some(session) = self.sessions.get_mut(&id) else {
            warn!(player = %player, session = %id, "stale_player_index");
            return true;
        };
        let forfeit = session.has_fallen(player);
        session.remove_member(player);
        let snapshot = session.saved_inventories.remove(&player);
        let exit = session.dungeon().locations.exit.clone();
        let current = session.member_count().to_string();
        let max = session.dungeon().max_players.to_string();

        self.presentation.boss_bar_viewer_removed(id, player);
        self.restore_player(player, snapshot, forfeit, exit.as_ref());

        let name = self.host.player_name(player);
        self.tell(player, "dungeon-left", &[]);
        self.broadcast(
            id,
            "player-left",
            &[("player", name), ("current", current), ("max", max)],
        );
        self.refresh_boards(id);
        info!(player = %player, session = %id, "player_left");

        self.after_departure(id);
        true
    }

    /// What a smaller party means for the run.
    fn after_departure(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let state = session.state();
        if session.member_count() == 0 {
            if state == SessionState::Waiting {
                self.discard_session(id);
            } else {
                self.end_session(id, false);
            }
            return;
        }
        match state {
            SessionState::Starting if !session.has_min_players() => {
                self.cancel_countdown(id);
                self.set_state(id, SessionState::Waiting, "starting-cancelled", &[]);
            }
            SessionState::InProgress | SessionState::BossRound if session.alive_count() == 0 => {
                self.end_session(id, false);
            }
            _ => {}
        }
    }

    /// A member died. They lose their run equipment and watch until the
    /// next round. When nobody is left standing the run fails.
    /// Returns false when the death does not concern a running session.
    pub fn on_player_death(&mut self, player: PlayerId) -> bool {
        let Some(&id) = self.by_player.get(&player) else {
            return false;
        };
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        if !session.state().is_running() {
            debug!(player = %player, session = %id, state = ?session.state(), "death_ignored");
            return false;
        }
        if !session.mark_dead(player) {
            return false;
        }
        let alive_left = session.alive_count();

        self.update_profile(player, |p| p.deaths += 1);
        if let Err(error) = self.equipment.clear(player) {
            warn!(player = %player, error = %error, "equipment_clear_failed");
        }
        let max_health = self.derived_attributes(player).max_health;
        self.host.clear_inventory(player);
        self.host.heal(player, max_health);
        self.host.set_mode(player, PlayerMode::Observer);

        let name = self.host.player_name(player);
        self.broadcast(id, "player-died", &[("player", name)]);
        self.tell(player, "equipment-lost", &[]);
        self.tell(player, "spectator-mode", &[]);
        let title = self.messages.render("player-death", &[]);
        self.host.send_title(player, &title, "");
        self.host.play_sound(player, "player-death");
        self.refresh_boards(id);
        info!(player = %player, session = %id, alive_left, "player_died");

        if alive_left == 0 {
            self.end_session(id, false);
        }
        true
    }

    /// Bring every dead member back. Runs at the start of each round.
    /// Returns how many were revived.
    pub fn revive_dead_players(&mut self, id: SessionId) -> usize {
        let Some(session) = self.sessions.get_mut(&id) else {
            return 0;
        };
        let revived = session.take_dead();
        if revived.is_empty() {
            return 0;
        }
        let dungeon = Arc::clone(&session.dungeon);

        for &player in &revived {
            if !self.host.is_online(player) {
                continue;
            }
            let attributes = self.derived_attributes(player);
            self.host.set_mode(player, PlayerMode::Participant);
            match self.spawner.pick(&dungeon.locations.entries) {
                Some(entry) => self.host.teleport(player, &entry),
                None => warn!(dungeon = %dungeon.id, "no_entry_locations"),
            }
            self.host.heal(player, attributes.max_health);
            if self.config.give_weapon {
                self.host.give_run_weapon(player);
            }
            self.host.apply_attributes(player, &attributes);
            let title = self.messages.render("player-revived", &[]);
            self.host.send_title(player, &title, "");
            self.host.play_sound(player, "player-revived");
        }

        self.broadcast(id, "players-revived", &[("count", revived.len().to_string())]);
        info!(session = %id, count = revived.len(), "players_revived");
        revived.len()
    }
}
