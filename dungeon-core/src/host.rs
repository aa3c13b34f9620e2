//! The game host contract.
//!
//! The engine never touches players or creatures directly. Everything it
//! needs from the surrounding game (moving players, swapping inventories,
//! spawning creatures, checking whether a creature still exists) goes
//! through the [`GameHost`] trait defined here.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::abilities::AbilityCast;
use crate::catalog::{Location, MobAttributes};
use crate::profile::DerivedAttributes;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a spawned creature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Items and inventories
// ============================================================================

/// A stack of items, as the host describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStack {
    pub material: String,
    #[serde(default = "default_amount")]
    pub amount: u32,
    #[serde(default)]
    pub display_name: Option<String>,
}

fn default_amount() -> u32 {
    1
}

impl ItemStack {
    pub fn new(material: impl Into<String>, amount: u32) -> Self {
        Self {
            material: material.into(),
            amount,
            display_name: None,
        }
    }

    /// Set a display name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Whether two stacks describe the same kind of item.
    pub fn is_similar(&self, other: &ItemStack) -> bool {
        self.material == other.material && self.display_name == other.display_name
    }
}

/// Number of armor slots a player has.
pub const ARMOR_SLOTS: usize = 4;

/// Inventory slot that holds the run weapon.
pub const RUN_WEAPON_SLOT: usize = 0;

/// First inventory slot for run extras. Extra `i` lives in slot
/// `FIRST_EXTRA_SLOT + i` for the whole run.
pub const FIRST_EXTRA_SLOT: usize = RUN_WEAPON_SLOT + 1;

/// Everything the engine saves from a player on entry and gives back on exit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// Main inventory contents, slot by slot.
    pub contents: Vec<Option<ItemStack>>,
    /// Boots, leggings, chestplate, helmet.
    pub armor: [Option<ItemStack>; ARMOR_SLOTS],
    pub experience_level: u32,
    pub experience_progress: f32,
    pub health: f64,
    pub food_level: u32,
}

impl InventorySnapshot {
    /// Total amount of items similar to `item` across the main contents.
    pub fn count_similar(&self, item: &ItemStack) -> u32 {
        self.contents
            .iter()
            .flatten()
            .filter(|stack| stack.is_similar(item))
            .map(|stack| stack.amount)
            .sum()
    }

    pub fn slot(&self, index: usize) -> Option<&ItemStack> {
        self.contents.get(index).and_then(Option::as_ref)
    }

    /// Put `item` into a slot, growing the contents if needed.
    pub fn set_slot(&mut self, index: usize, item: Option<ItemStack>) {
        if self.contents.len() <= index {
            self.contents.resize(index + 1, None);
        }
        self.contents[index] = item;
    }
}

/// How a player takes part in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerMode {
    /// Normal play.
    Participant,
    /// Dead for the current round; may watch but not interact.
    Observer,
}

// ============================================================================
// Spawning
// ============================================================================

/// What kind of creature is being spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnKind {
    Mob,
    Boss,
}

/// A request to create a creature in the world.
#[derive(Debug, Clone)]
pub struct SpawnRequest<'a> {
    pub kind: SpawnKind,
    /// Catalog id of the mob or boss.
    pub definition_id: &'a str,
    pub display_name: &'a str,
    pub entity_type: &'a str,
    pub attributes: &'a MobAttributes,
    pub equipment: &'a [ItemStack],
    pub location: &'a Location,
}

// ============================================================================
// GameHost
// ============================================================================

/// Operations the engine needs from the game it runs inside.
///
/// Implementations are called synchronously from the engine's single
/// execution stream. They must not call back into the engine; anything the
/// host wants to report (a creature dying, a player dying) is delivered
/// later as a separate call on the manager.
pub trait GameHost: Send {
    // ---- players -----------------------------------------------------------

    /// Whether the player is currently connected.
    fn is_online(&self, player: PlayerId) -> bool;

    /// Display name used in message placeholders.
    fn player_name(&self, player: PlayerId) -> String;

    fn send_message(&mut self, player: PlayerId, text: &str);

    fn send_title(&mut self, player: PlayerId, title: &str, subtitle: &str);

    fn send_action_bar(&mut self, player: PlayerId, text: &str);

    fn play_sound(&mut self, player: PlayerId, sound: &str);

    /// Capture the player's current inventory and vitals.
    fn snapshot_inventory(&mut self, player: PlayerId) -> InventorySnapshot;

    /// Put back a previously captured snapshot.
    fn restore_inventory(&mut self, player: PlayerId, snapshot: &InventorySnapshot);

    fn clear_inventory(&mut self, player: PlayerId);

    /// Give the run-only weapon, in [`RUN_WEAPON_SLOT`].
    fn give_run_weapon(&mut self, player: PlayerId);

    /// Put armor on the player and extra `i` into slot
    /// `FIRST_EXTRA_SLOT + i`. Empty armor entries leave the slot alone.
    fn equip(&mut self, player: PlayerId, armor: &[Option<ItemStack>; ARMOR_SLOTS], extras: &[ItemStack]);

    fn teleport(&mut self, player: PlayerId, location: &Location);

    /// Restore health (to `max_health`), food and clear burning/effects.
    fn heal(&mut self, player: PlayerId, max_health: f64);

    fn set_mode(&mut self, player: PlayerId, mode: PlayerMode);

    fn apply_attributes(&mut self, player: PlayerId, attributes: &DerivedAttributes);

    /// Return max health, damage and speed to their vanilla values.
    fn reset_attributes(&mut self, player: PlayerId);

    // ---- entities ----------------------------------------------------------

    /// Create a creature. `None` when the world or location is unavailable.
    fn spawn_entity(&mut self, request: SpawnRequest<'_>) -> Option<EntityId>;

    fn remove_entity(&mut self, entity: EntityId);

    /// Whether the creature still exists and is alive.
    fn is_entity_alive(&self, entity: EntityId) -> bool;

    fn entity_location(&self, entity: EntityId) -> Option<Location>;

    /// Perform a boss ability against the given participants.
    fn cast_ability(&mut self, boss: EntityId, cast: &AbilityCast, targets: &[PlayerId]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(PlayerId::new(), PlayerId::new());
        assert_ne!(EntityId::new(), EntityId::new());
    }

    #[test]
    fn test_count_similar_ignores_other_items() {
        let potion = ItemStack::new("POTION", 1).named("Healing");
        let snapshot = InventorySnapshot {
            contents: vec![
                Some(ItemStack::new("POTION", 2).named("Healing")),
                None,
                Some(ItemStack::new("POTION", 3)),
                Some(ItemStack::new("POTION", 1).named("Healing")),
            ],
            ..Default::default()
        };

        assert_eq!(snapshot.count_similar(&potion), 3);
    }
}
