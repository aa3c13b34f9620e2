//! Error and rejection types shared across the engine.

use thiserror::Error;

/// Why a join attempt was refused. Rejections are ordinary outcomes, shown
/// to the player as a message; they are not failures of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinRejection {
    #[error("player is already in a dungeon")]
    AlreadyInSession,

    #[error("dungeon has already started")]
    InProgress,

    #[error("dungeon is closed right now")]
    DungeonClosed,

    #[error("dungeon is full")]
    DungeonFull,

    #[error("no such session")]
    NoSuchSession,
}

impl JoinRejection {
    /// Message key used to tell the player.
    pub fn message_key(&self) -> &'static str {
        match self {
            JoinRejection::AlreadyInSession => "already-in-dungeon",
            JoinRejection::InProgress => "dungeon-in-progress",
            JoinRejection::DungeonClosed => "dungeon-closed",
            JoinRejection::DungeonFull => "dungeon-full",
            JoinRejection::NoSuchSession => "dungeon-not-found",
        }
    }
}

/// Errors from session management calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unknown dungeon '{0}'")]
    UnknownDungeon(String),

    #[error("join rejected: {0}")]
    Rejected(#[from] JoinRejection),
}

/// Errors from profile or equipment storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors from talking to a running engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("engine has shut down")]
    Closed,
}
