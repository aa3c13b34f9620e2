//! Presentation hooks: scoreboards, boss bars, visual effects.
//!
//! All methods are fire-and-forget and default to doing nothing, so a host
//! only implements what it can display.

use crate::catalog::Location;
use crate::host::{EntityId, PlayerId};
use crate::session::{SessionId, SessionState};

/// What a scoreboard shows for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreboardView<'a> {
    pub session: SessionId,
    pub dungeon: &'a str,
    pub state: SessionState,
    pub round: u32,
    pub total_rounds: Option<u32>,
    pub members: usize,
    pub max_players: usize,
    pub alive_players: usize,
    pub mobs_alive: usize,
    pub mobs_killed: u32,
}

pub trait Presentation: Send {
    fn state_changed(&mut self, _session: SessionId, _from: SessionState, _to: SessionState) {}

    fn show_waiting_board(&mut self, _player: PlayerId, _view: &ScoreboardView<'_>) {}

    fn show_game_board(&mut self, _player: PlayerId, _view: &ScoreboardView<'_>) {}

    fn refresh_boards(&mut self, _members: &[PlayerId], _view: &ScoreboardView<'_>) {}

    /// Remove every display element this engine put on the player.
    fn clear_player(&mut self, _player: PlayerId) {}

    fn countdown(&mut self, _session: SessionId, _remaining: u32) {}

    fn boss_bar_shown(&mut self, _session: SessionId, _boss: EntityId, _name: &str, _viewers: &[PlayerId]) {}

    fn boss_bar_viewer_removed(&mut self, _session: SessionId, _player: PlayerId) {}

    fn boss_bar_removed(&mut self, _session: SessionId) {}

    fn spawn_effect(&mut self, _location: &Location) {}
}

/// Presentation that shows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPresentation;

impl Presentation for NoPresentation {}
