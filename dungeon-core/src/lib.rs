//! Session engine for cooperative wave-based dungeons.
//!
//! This crate provides:
//! - Dungeon sessions with a checked lifecycle (waiting, countdown, rounds,
//!   boss rounds, end)
//! - Round orchestration with staggered, capped mob spawns and boss abilities
//! - Player profiles, run equipment and pending rewards
//! - A deterministic timer queue, plus a tokio task to drive it in real time
//!
//! The game itself stays behind the [`GameHost`] trait: the engine decides
//! what happens and the host makes it happen in the world.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dungeon_core::{Catalog, Collaborators, DungeonRuntime, EngineConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = Catalog::load("dungeons.json").await?;
//!     let config = EngineConfig::load("engine.json").await?;
//!     let manager = SessionManager::new(config, Arc::new(catalog), Collaborators::new(MyHost::new()));
//!
//!     let (engine, task) = DungeonRuntime::spawn(manager);
//!     let session = engine.join_dungeon(player, "crypt").await??;
//!     println!("joined {session}");
//!
//!     engine.shutdown().await?;
//!     task.await?;
//!     Ok(())
//! }
//! ```

pub mod abilities;
pub mod catalog;
pub mod config;
pub mod equipment;
pub mod error;
pub mod host;
pub mod manager;
pub mod messages;
pub mod presentation;
pub mod profile;
pub mod rewards;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod spawner;
pub mod testing;

// Primary public API
pub use catalog::{BossDefinition, Catalog, DungeonDefinition, Location, MobDefinition};
pub use config::EngineConfig;
pub use error::{JoinRejection, RuntimeError, SessionError};
pub use host::{EntityId, GameHost, PlayerId};
pub use manager::{Collaborators, SessionManager};
pub use messages::MessageCatalog;
pub use presentation::Presentation;
pub use runtime::{DungeonRuntime, RuntimeHandle, RuntimeStatus};
pub use session::{DungeonSession, SessionId, SessionState};
pub use testing::{MockHost, TestHarness};
