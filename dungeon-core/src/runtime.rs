//! Running the engine on tokio.
//!
//! The manager is single-owner and synchronous. [`DungeonRuntime::spawn`]
//! moves it into a task that owns it for the rest of its life; everything
//! else talks to it through a cloneable [`RuntimeHandle`]. The task sleeps
//! until either a command arrives or the next timer is due, then advances
//! the engine clock to the wall clock and handles whatever is ready.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::error::{RuntimeError, SessionError};
use crate::host::{EntityId, PlayerId};
use crate::manager::SessionManager;
use crate::session::{SessionId, SessionState};

/// Request sent to the engine task.
#[derive(Debug)]
pub enum Command {
    JoinDungeon {
        player: PlayerId,
        dungeon_id: String,
        reply: oneshot::Sender<Result<SessionId, SessionError>>,
    },
    Leave {
        player: PlayerId,
        reply: oneshot::Sender<bool>,
    },
    PlayerDied {
        player: PlayerId,
        reply: oneshot::Sender<bool>,
    },
    EntityDied {
        entity: EntityId,
        killer: Option<PlayerId>,
        reply: oneshot::Sender<bool>,
    },
    ForceStart {
        session: SessionId,
        reply: oneshot::Sender<bool>,
    },
    /// Admin skip to the next round; starts a lobby right away.
    StartNextRound { session: SessionId },
    /// Count a kill the host tracked itself, outside the entity tags.
    MobKilled { session: SessionId, is_boss: bool },
    /// Admin stop. Ends the session as failed.
    EndSession { session: SessionId },
    Status {
        reply: oneshot::Sender<RuntimeStatus>,
    },
    /// End everything and stop the task.
    Shutdown { reply: oneshot::Sender<()> },
}

/// One line of the status report.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub dungeon_id: String,
    pub state: SessionState,
    pub round: u32,
    pub members: Vec<PlayerId>,
    pub mobs_alive: usize,
    pub mobs_killed: u32,
}

/// Engine-wide status.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeStatus {
    pub now: Duration,
    pub active_sessions: usize,
    pub players: usize,
    pub scheduled_tasks: usize,
    pub sessions: Vec<SessionSummary>,
}

impl RuntimeStatus {
    fn capture(manager: &SessionManager) -> Self {
        let mut sessions: Vec<_> = manager
            .sessions()
            .map(|s| SessionSummary {
                id: s.id(),
                dungeon_id: s.dungeon_id().to_string(),
                state: s.state(),
                round: s.current_round(),
                members: s.members().to_vec(),
                mobs_alive: s.live_entities().len(),
                mobs_killed: s.mobs_killed(),
            })
            .collect();
        sessions.sort_by(|a, b| a.dungeon_id.cmp(&b.dungeon_id));
        Self {
            now: manager.now(),
            active_sessions: manager.get_active_session_count(),
            players: manager.get_total_players_in_dungeons(),
            scheduled_tasks: manager.scheduled_task_count(),
            sessions,
        }
    }

    pub fn session_for(&self, dungeon_id: &str) -> Option<&SessionSummary> {
        self.sessions.iter().find(|s| s.dungeon_id == dungeon_id)
    }
}

/// Spawns the engine task.
pub struct DungeonRuntime;

impl DungeonRuntime {
    /// Move `manager` into a new task. The join handle yields the manager
    /// back once the task stops.
    pub fn spawn(manager: SessionManager) -> (RuntimeHandle, JoinHandle<SessionManager>) {
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(run(manager, rx));
        (RuntimeHandle { tx }, task)
    }
}

async fn run(mut manager: SessionManager, mut rx: mpsc::Receiver<Command>) -> SessionManager {
    let epoch = Instant::now() - manager.now();
    info!("engine_started");
    loop {
        let deadline = manager.next_deadline().map(|due| epoch + due);
        tokio::select! {
            command = rx.recv() => {
                manager.advance_to(epoch.elapsed());
                match command {
                    Some(Command::Shutdown { reply }) => {
                        manager.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => handle(&mut manager, command),
                    None => {
                        debug!("all_handles_dropped");
                        manager.shutdown();
                        break;
                    }
                }
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                manager.advance_to(epoch.elapsed());
            }
        }
    }
    info!("engine_stopped");
    manager
}

fn handle(manager: &mut SessionManager, command: Command) {
    match command {
        Command::JoinDungeon {
            player,
            dungeon_id,
            reply,
        } => {
            let _ = reply.send(manager.join_dungeon(player, &dungeon_id));
        }
        Command::Leave { player, reply } => {
            let _ = reply.send(manager.leave_session(player));
        }
        Command::PlayerDied { player, reply } => {
            let _ = reply.send(manager.on_player_death(player));
        }
        Command::EntityDied {
            entity,
            killer,
            reply,
        } => {
            let _ = reply.send(manager.on_entity_death(entity, killer));
        }
        Command::ForceStart { session, reply } => {
            let _ = reply.send(manager.force_start(session));
        }
        Command::StartNextRound { session } => manager.start_next_round(session),
        Command::MobKilled { session, is_boss } => manager.on_mob_killed(session, is_boss),
        Command::EndSession { session } => manager.end_session(session, false),
        Command::Status { reply } => {
            let _ = reply.send(RuntimeStatus::capture(manager));
        }
        Command::Shutdown { .. } => {}
    }
}

/// Cloneable handle to a running engine.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    tx: mpsc::Sender<Command>,
}

impl RuntimeHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| RuntimeError::Closed)?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    pub async fn join_dungeon(
        &self,
        player: PlayerId,
        dungeon_id: impl Into<String>,
    ) -> Result<Result<SessionId, SessionError>, RuntimeError> {
        let dungeon_id = dungeon_id.into();
        self.request(|reply| Command::JoinDungeon {
            player,
            dungeon_id,
            reply,
        })
        .await
    }

    pub async fn leave(&self, player: PlayerId) -> Result<bool, RuntimeError> {
        self.request(|reply| Command::Leave { player, reply }).await
    }

    pub async fn player_died(&self, player: PlayerId) -> Result<bool, RuntimeError> {
        self.request(|reply| Command::PlayerDied { player, reply })
            .await
    }

    pub async fn entity_died(
        &self,
        entity: EntityId,
        killer: Option<PlayerId>,
    ) -> Result<bool, RuntimeError> {
        self.request(|reply| Command::EntityDied {
            entity,
            killer,
            reply,
        })
        .await
    }

    pub async fn force_start(&self, session: SessionId) -> Result<bool, RuntimeError> {
        self.request(|reply| Command::ForceStart { session, reply })
            .await
    }

    pub async fn end_session(&self, session: SessionId) -> Result<(), RuntimeError> {
        self.send(Command::EndSession { session }).await
    }

    pub async fn start_next_round(&self, session: SessionId) -> Result<(), RuntimeError> {
        self.send(Command::StartNextRound { session }).await
    }

    pub async fn mob_killed(&self, session: SessionId, is_boss: bool) -> Result<(), RuntimeError> {
        self.send(Command::MobKilled { session, is_boss }).await
    }

    async fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.tx.send(command).await.map_err(|_| RuntimeError::Closed)
    }

    pub async fn status(&self) -> Result<RuntimeStatus, RuntimeError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// End every session and stop the engine task.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
