//! Testing utilities for the dungeon engine.
//!
//! This module provides tools for integration testing:
//! - `MockHost` - an in-memory world that records everything done to it
//! - `RecordingPresentation` - captures state transitions and boss bars
//! - `TestHarness` - a manager wired to the mocks, with helpers to advance
//!   time and kill creatures
//! - `sample_catalog` - a small set of dungeons covering the common shapes

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::abilities::AbilityCast;
use crate::catalog::{
    BossAbility, BossDefinition, Catalog, DungeonDefinition, DungeonLocations, Location,
    MobDefinition, MobSpawnEntry, RoundDefinition, UnlimitedConfig,
};
use crate::config::EngineConfig;
use crate::equipment::InMemoryEquipment;
use crate::error::{JoinRejection, SessionError};
use crate::host::{
    EntityId, GameHost, InventorySnapshot, ItemStack, PlayerId, PlayerMode, SpawnKind,
    SpawnRequest, ARMOR_SLOTS, FIRST_EXTRA_SLOT, RUN_WEAPON_SLOT,
};
use crate::manager::{Collaborators, SessionManager};
use crate::presentation::{Presentation, ScoreboardView};
use crate::profile::{DerivedAttributes, InMemoryProfiles};
use crate::rewards::InMemoryLedger;
use crate::session::{SessionId, SessionState};

/// Material of the weapon handed out for runs.
pub const RUN_WEAPON: &str = "RUN_SWORD";

// ============================================================================
// MockHost
// ============================================================================

/// A creature living in the mock world.
#[derive(Debug, Clone)]
pub struct MockEntity {
    pub definition_id: String,
    pub kind: SpawnKind,
    pub location: Location,
}

/// Everything the mock world knows and everything done to it.
#[derive(Debug, Default)]
pub struct MockWorld {
    pub offline: HashSet<PlayerId>,
    pub names: HashMap<PlayerId, String>,
    pub inventories: HashMap<PlayerId, InventorySnapshot>,
    pub positions: HashMap<PlayerId, Location>,
    pub modes: HashMap<PlayerId, PlayerMode>,
    pub attributes: HashMap<PlayerId, DerivedAttributes>,
    pub health: HashMap<PlayerId, f64>,
    pub messages: Vec<(PlayerId, String)>,
    pub titles: Vec<(PlayerId, String)>,
    pub sounds: Vec<(PlayerId, String)>,
    pub action_bars: Vec<(PlayerId, String)>,
    pub entities: HashMap<EntityId, MockEntity>,
    pub spawned: Vec<EntityId>,
    pub removed: Vec<EntityId>,
    pub casts: Vec<(EntityId, AbilityCast)>,
    pub fail_spawns: bool,
}

/// In-memory [`GameHost`]. Clones share one world, so a test can keep a
/// handle after giving the host to the manager.
#[derive(Debug, Clone, Default)]
pub struct MockHost {
    world: Arc<Mutex<MockWorld>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to the recorded world.
    pub fn world(&self) -> MutexGuard<'_, MockWorld> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_name(&self, player: PlayerId, name: impl Into<String>) {
        self.world().names.insert(player, name.into());
    }

    pub fn set_online(&self, player: PlayerId, online: bool) {
        let mut world = self.world();
        if online {
            world.offline.remove(&player);
        } else {
            world.offline.insert(player);
        }
    }

    pub fn set_inventory(&self, player: PlayerId, inventory: InventorySnapshot) {
        self.world().inventories.insert(player, inventory);
    }

    pub fn inventory(&self, player: PlayerId) -> InventorySnapshot {
        self.world().inventories.get(&player).cloned().unwrap_or_default()
    }

    pub fn position(&self, player: PlayerId) -> Option<Location> {
        self.world().positions.get(&player).cloned()
    }

    pub fn mode(&self, player: PlayerId) -> Option<PlayerMode> {
        self.world().modes.get(&player).copied()
    }

    pub fn attributes(&self, player: PlayerId) -> Option<DerivedAttributes> {
        self.world().attributes.get(&player).copied()
    }

    pub fn messages_for(&self, player: PlayerId) -> Vec<String> {
        self.world()
            .messages
            .iter()
            .filter(|(p, _)| *p == player)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Whether the player received a message containing `needle`.
    pub fn was_told(&self, player: PlayerId, needle: &str) -> bool {
        self.messages_for(player).iter().any(|m| m.contains(needle))
    }

    pub fn titles_for(&self, player: PlayerId) -> Vec<String> {
        self.world()
            .titles
            .iter()
            .filter(|(p, _)| *p == player)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn heard(&self, player: PlayerId, sound: &str) -> bool {
        self.world().sounds.iter().any(|(p, s)| *p == player && s == sound)
    }

    pub fn alive_entities(&self) -> Vec<EntityId> {
        let mut alive: Vec<_> = self.world().entities.keys().copied().collect();
        alive.sort();
        alive
    }

    pub fn entity(&self, entity: EntityId) -> Option<MockEntity> {
        self.world().entities.get(&entity).cloned()
    }

    pub fn spawned_count(&self) -> usize {
        self.world().spawned.len()
    }

    pub fn casts(&self) -> Vec<(EntityId, AbilityCast)> {
        self.world().casts.clone()
    }

    /// Remove a creature from the world without telling anyone.
    pub fn kill_entity(&self, entity: EntityId) {
        self.world().entities.remove(&entity);
    }

    pub fn set_fail_spawns(&self, fail: bool) {
        self.world().fail_spawns = fail;
    }
}

impl GameHost for MockHost {
    fn is_online(&self, player: PlayerId) -> bool {
        !self.world().offline.contains(&player)
    }

    fn player_name(&self, player: PlayerId) -> String {
        self.world()
            .names
            .get(&player)
            .cloned()
            .unwrap_or_else(|| player.to_string())
    }

    fn send_message(&mut self, player: PlayerId, text: &str) {
        self.world().messages.push((player, text.to_string()));
    }

    fn send_title(&mut self, player: PlayerId, title: &str, _subtitle: &str) {
        self.world().titles.push((player, title.to_string()));
    }

    fn send_action_bar(&mut self, player: PlayerId, text: &str) {
        self.world().action_bars.push((player, text.to_string()));
    }

    fn play_sound(&mut self, player: PlayerId, sound: &str) {
        self.world().sounds.push((player, sound.to_string()));
    }

    fn snapshot_inventory(&mut self, player: PlayerId) -> InventorySnapshot {
        self.inventory(player)
    }

    fn restore_inventory(&mut self, player: PlayerId, snapshot: &InventorySnapshot) {
        self.world().inventories.insert(player, snapshot.clone());
    }

    fn clear_inventory(&mut self, player: PlayerId) {
        self.world().inventories.insert(player, InventorySnapshot::default());
    }

    fn give_run_weapon(&mut self, player: PlayerId) {
        self.world()
            .inventories
            .entry(player)
            .or_default()
            .set_slot(RUN_WEAPON_SLOT, Some(ItemStack::new(RUN_WEAPON, 1)));
    }

    fn equip(&mut self, player: PlayerId, armor: &[Option<ItemStack>; ARMOR_SLOTS], extras: &[ItemStack]) {
        let mut world = self.world();
        let inventory = world.inventories.entry(player).or_default();
        for (worn, saved) in inventory.armor.iter_mut().zip(armor) {
            if saved.is_some() {
                *worn = saved.clone();
            }
        }
        for (index, extra) in extras.iter().enumerate() {
            inventory.set_slot(FIRST_EXTRA_SLOT + index, Some(extra.clone()));
        }
    }

    fn teleport(&mut self, player: PlayerId, location: &Location) {
        self.world().positions.insert(player, location.clone());
    }

    fn heal(&mut self, player: PlayerId, max_health: f64) {
        self.world().health.insert(player, max_health);
    }

    fn set_mode(&mut self, player: PlayerId, mode: PlayerMode) {
        self.world().modes.insert(player, mode);
    }

    fn apply_attributes(&mut self, player: PlayerId, attributes: &DerivedAttributes) {
        self.world().attributes.insert(player, *attributes);
    }

    fn reset_attributes(&mut self, player: PlayerId) {
        self.world().attributes.remove(&player);
    }

    fn spawn_entity(&mut self, request: SpawnRequest<'_>) -> Option<EntityId> {
        let mut world = self.world();
        if world.fail_spawns {
            return None;
        }
        let entity = EntityId::new();
        world.entities.insert(
            entity,
            MockEntity {
                definition_id: request.definition_id.to_string(),
                kind: request.kind,
                location: request.location.clone(),
            },
        );
        world.spawned.push(entity);
        Some(entity)
    }

    fn remove_entity(&mut self, entity: EntityId) {
        let mut world = self.world();
        world.entities.remove(&entity);
        world.removed.push(entity);
    }

    fn is_entity_alive(&self, entity: EntityId) -> bool {
        self.world().entities.contains_key(&entity)
    }

    fn entity_location(&self, entity: EntityId) -> Option<Location> {
        self.world().entities.get(&entity).map(|e| e.location.clone())
    }

    fn cast_ability(&mut self, boss: EntityId, cast: &AbilityCast, _targets: &[PlayerId]) {
        self.world().casts.push((boss, cast.clone()));
    }
}

// ============================================================================
// RecordingPresentation
// ============================================================================

#[derive(Debug, Default)]
pub struct PresentationLog {
    pub transitions: Vec<(SessionId, SessionState, SessionState)>,
    pub boss_bars: Vec<(SessionId, EntityId)>,
    pub boss_bars_removed: Vec<SessionId>,
    pub cleared: Vec<PlayerId>,
    pub countdowns: Vec<(SessionId, u32)>,
    pub waiting_boards: Vec<PlayerId>,
    pub game_boards: Vec<PlayerId>,
}

/// [`Presentation`] that records what it was asked to show.
#[derive(Debug, Clone, Default)]
pub struct RecordingPresentation {
    log: Arc<Mutex<PresentationLog>>,
}

impl RecordingPresentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> MutexGuard<'_, PresentationLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transitions recorded for one session, in order.
    pub fn transitions_of(&self, session: SessionId) -> Vec<(SessionState, SessionState)> {
        self.log()
            .transitions
            .iter()
            .filter(|(s, _, _)| *s == session)
            .map(|(_, from, to)| (*from, *to))
            .collect()
    }
}

impl Presentation for RecordingPresentation {
    fn state_changed(&mut self, session: SessionId, from: SessionState, to: SessionState) {
        self.log().transitions.push((session, from, to));
    }

    fn show_waiting_board(&mut self, player: PlayerId, _view: &ScoreboardView<'_>) {
        self.log().waiting_boards.push(player);
    }

    fn show_game_board(&mut self, player: PlayerId, _view: &ScoreboardView<'_>) {
        self.log().game_boards.push(player);
    }

    fn clear_player(&mut self, player: PlayerId) {
        self.log().cleared.push(player);
    }

    fn countdown(&mut self, session: SessionId, remaining: u32) {
        self.log().countdowns.push((session, remaining));
    }

    fn boss_bar_shown(&mut self, session: SessionId, boss: EntityId, _name: &str, _viewers: &[PlayerId]) {
        self.log().boss_bars.push((session, boss));
    }

    fn boss_bar_removed(&mut self, session: SessionId) {
        self.log().boss_bars_removed.push(session);
    }
}

// ============================================================================
// Sample catalog
// ============================================================================

pub fn entry_a() -> Location {
    Location::new("dungeons", 0.0, 64.0, 0.0)
}

pub fn entry_b() -> Location {
    Location::new("dungeons", 8.0, 64.0, 0.0)
}

pub fn exit_point() -> Location {
    Location::new("world", 100.0, 70.0, 100.0)
}

fn sample_locations() -> DungeonLocations {
    DungeonLocations {
        entries: vec![entry_a(), entry_b()],
        exit: Some(exit_point()),
        mob_spawns: vec![
            Location::new("dungeons", 20.0, 64.0, 20.0),
            Location::new("dungeons", -20.0, 64.0, 20.0),
        ],
        boss_spawn: Some(Location::new("dungeons", 0.0, 64.0, 40.0)),
    }
}

/// Dungeons used across the tests:
/// - `crypt`: 2-4 players, round 1 is three ghouls one second apart,
///   round 2 is two ghouls and the lich
/// - `solo`: exactly one player, one round of a single ghoul
/// - `endless`: 1-4 players, unlimited, two ghouls per round, the lich every
///   second round
pub fn sample_catalog() -> Catalog {
    let lich = BossDefinition::new("lich")
        .with_ability(
            "ground-slam",
            BossAbility::enabled(10).with_param("damage", 6.0),
        )
        .with_ability(
            "summon-minions",
            BossAbility::enabled(15)
                .with_param("mob-type", "ghoul")
                .with_param("count", 2),
        );

    Catalog::new()
        .with_mob(MobDefinition::new("ghoul"))
        .with_boss(lich)
        .with_dungeon(
            DungeonDefinition::new("crypt")
                .with_players(2, 4)
                .with_locations(sample_locations())
                .with_round(RoundDefinition {
                    round: 1,
                    mobs: vec![MobSpawnEntry::new("ghoul", 3).with_delay(Duration::from_secs(1))],
                    boss: None,
                })
                .with_round(RoundDefinition {
                    round: 2,
                    mobs: vec![MobSpawnEntry::new("ghoul", 2)],
                    boss: Some("lich".into()),
                }),
        )
        .with_dungeon(
            DungeonDefinition::new("solo")
                .with_players(1, 1)
                .with_locations(sample_locations())
                .with_round(RoundDefinition {
                    round: 1,
                    mobs: vec![MobSpawnEntry::new("ghoul", 1)],
                    boss: None,
                }),
        )
        .with_dungeon(
            DungeonDefinition::new("endless")
                .with_players(1, 4)
                .with_locations(sample_locations())
                .with_unlimited(UnlimitedConfig {
                    mobs: vec![MobSpawnEntry::new("ghoul", 2)],
                    boss: Some("lich".into()),
                    boss_every: 2,
                }),
        )
}

// ============================================================================
// TestHarness
// ============================================================================

/// A manager wired to mocks, plus handles to inspect them.
pub struct TestHarness {
    pub manager: SessionManager,
    pub host: MockHost,
    pub presentation: RecordingPresentation,
    pub profiles: InMemoryProfiles,
    pub equipment: InMemoryEquipment,
    pub ledger: InMemoryLedger,
}

impl TestHarness {
    /// Harness over the sample catalog with a fixed seed.
    pub fn new() -> Self {
        Self::with_catalog(sample_catalog(), EngineConfig::default().with_seed(7))
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_catalog(sample_catalog(), config)
    }

    pub fn with_catalog(catalog: Catalog, config: EngineConfig) -> Self {
        let host = MockHost::new();
        let presentation = RecordingPresentation::new();
        let profiles = InMemoryProfiles::new();
        let equipment = InMemoryEquipment::new();
        let ledger = InMemoryLedger::new();
        let collaborators = Collaborators::new(host.clone())
            .with_presentation(presentation.clone())
            .with_profiles(profiles.clone())
            .with_equipment(equipment.clone())
            .with_rewards(ledger.clone());
        let manager = SessionManager::new(config, Arc::new(catalog), collaborators);
        Self {
            manager,
            host,
            presentation,
            profiles,
            equipment,
            ledger,
        }
    }

    /// A new named player.
    pub fn player(&self, name: &str) -> PlayerId {
        let player = PlayerId::new();
        self.host.set_name(player, name);
        player
    }

    pub fn join(&mut self, player: PlayerId, dungeon_id: &str) -> Result<SessionId, SessionError> {
        self.manager.join_dungeon(player, dungeon_id)
    }

    /// Join, failing the test on rejection.
    pub fn join_ok(&mut self, player: PlayerId, dungeon_id: &str) -> SessionId {
        match self.join(player, dungeon_id) {
            Ok(id) => id,
            Err(error) => panic!("join of {dungeon_id} failed: {error}"),
        }
    }

    pub fn rejection(&mut self, player: PlayerId, dungeon_id: &str) -> Option<JoinRejection> {
        match self.join(player, dungeon_id) {
            Err(SessionError::Rejected(rejection)) => Some(rejection),
            _ => None,
        }
    }

    pub fn advance_secs(&mut self, secs: u64) {
        self.manager.advance(Duration::from_secs(secs));
    }

    pub fn advance_millis(&mut self, millis: u64) {
        self.manager.advance(Duration::from_millis(millis));
    }

    pub fn state(&self, session: SessionId) -> Option<SessionState> {
        self.manager.session(session).map(|s| s.state())
    }

    pub fn round(&self, session: SessionId) -> u32 {
        self.manager
            .session(session)
            .map(|s| s.current_round())
            .unwrap_or_default()
    }

    /// Creatures the session currently tracks, sorted.
    pub fn session_entities(&self, session: SessionId) -> Vec<EntityId> {
        let mut entities: Vec<_> = self
            .manager
            .session(session)
            .map(|s| s.live_entities().iter().copied().collect())
            .unwrap_or_default();
        entities.sort();
        entities
    }

    /// Kill a creature in the world and report it to the engine.
    pub fn kill(&mut self, entity: EntityId, killer: Option<PlayerId>) -> bool {
        self.host.kill_entity(entity);
        self.manager.on_entity_death(entity, killer)
    }

    /// Kill every regular mob the session owns. Returns how many died.
    pub fn kill_mobs(&mut self, session: SessionId, killer: Option<PlayerId>) -> usize {
        let boss = self.manager.session(session).and_then(|s| s.active_boss());
        let mobs: Vec<_> = self
            .session_entities(session)
            .into_iter()
            .filter(|e| Some(*e) != boss)
            .collect();
        for &mob in &mobs {
            self.kill(mob, killer);
        }
        mobs.len()
    }

    /// Kill the session's boss, if one is up.
    pub fn kill_boss(&mut self, session: SessionId, killer: Option<PlayerId>) -> bool {
        match self.manager.session(session).and_then(|s| s.active_boss()) {
            Some(boss) => self.kill(boss, killer),
            None => false,
        }
    }

    /// Two players in `crypt`, past the countdown and settle delay, with
    /// round 1 fully spawned.
    pub fn started_crypt(&mut self) -> (SessionId, PlayerId, PlayerId) {
        let a = self.player("Ayla");
        let b = self.player("Bram");
        let session = self.join_ok(a, "crypt");
        self.join_ok(b, "crypt");
        // Countdown (10s) + settle (2s) + staggered spawns (2s).
        self.advance_secs(14);
        (session, a, b)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
