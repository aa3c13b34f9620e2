//! Run equipment: the loadout a player keeps between runs.
//!
//! The loadout is applied on join, reconciled against what the player still
//! carries when they leave alive, and forfeited on death.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;
use crate::host::{GameHost, InventorySnapshot, ItemStack, PlayerId, ARMOR_SLOTS, FIRST_EXTRA_SLOT};

/// Armor plus extra items carried into runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLoadout {
    pub armor: [Option<ItemStack>; ARMOR_SLOTS],
    #[serde(default)]
    pub extras: Vec<ItemStack>,
}

impl RunLoadout {
    pub fn is_empty(&self) -> bool {
        self.armor.iter().all(Option::is_none) && self.extras.is_empty()
    }

    /// Update the loadout from what the player leaves with. Only armor
    /// slots that held saved armor are refreshed, so anything picked up
    /// during the run stays out. Each extra is read back from its own
    /// slot; an emptied or swapped slot drops the extra.
    pub fn reconcile(&mut self, inventory: &InventorySnapshot) {
        for (saved, worn) in self.armor.iter_mut().zip(&inventory.armor) {
            if saved.is_some() {
                *saved = worn.clone();
            }
        }
        let extras = std::mem::take(&mut self.extras);
        self.extras = extras
            .into_iter()
            .enumerate()
            .filter_map(|(index, extra)| {
                inventory
                    .slot(FIRST_EXTRA_SLOT + index)
                    .filter(|carried| carried.is_similar(&extra) && carried.amount > 0)
                    .cloned()
            })
            .collect();
    }
}

/// Where loadouts live.
pub trait EquipmentStore: Send {
    fn loadout(&self, player: PlayerId) -> Option<RunLoadout>;

    /// Reconcile the saved loadout with what the player still carries.
    fn sync_from_inventory(
        &mut self,
        player: PlayerId,
        inventory: &InventorySnapshot,
    ) -> Result<(), StoreError>;

    /// Forfeit the loadout.
    fn clear(&mut self, player: PlayerId) -> Result<(), StoreError>;
}

/// Put a player's saved loadout on them, if they have one.
pub fn apply_loadout(store: &dyn EquipmentStore, host: &mut dyn GameHost, player: PlayerId) {
    if let Some(loadout) = store.loadout(player).filter(|l| !l.is_empty()) {
        host.equip(player, &loadout.armor, &loadout.extras);
    }
}

/// Loadouts kept in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEquipment {
    loadouts: Arc<Mutex<HashMap<PlayerId, RunLoadout>>>,
}

impl InMemoryEquipment {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PlayerId, RunLoadout>> {
        self.loadouts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, player: PlayerId, loadout: RunLoadout) {
        self.lock().insert(player, loadout);
    }
}

impl EquipmentStore for InMemoryEquipment {
    fn loadout(&self, player: PlayerId) -> Option<RunLoadout> {
        self.lock().get(&player).cloned()
    }

    fn sync_from_inventory(
        &mut self,
        player: PlayerId,
        inventory: &InventorySnapshot,
    ) -> Result<(), StoreError> {
        if let Some(loadout) = self.lock().get_mut(&player) {
            loadout.reconcile(inventory);
        }
        Ok(())
    }

    fn clear(&mut self, player: PlayerId) -> Result<(), StoreError> {
        self.lock().remove(&player);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carrying(slots: &[(usize, ItemStack)], armor: [Option<ItemStack>; ARMOR_SLOTS]) -> InventorySnapshot {
        let mut inventory = InventorySnapshot {
            armor,
            ..Default::default()
        };
        for (index, item) in slots {
            inventory.set_slot(*index, Some(item.clone()));
        }
        inventory
    }

    #[test]
    fn test_reconcile_reads_extras_from_their_slots() {
        let helmet = ItemStack::new("IRON_HELMET", 1);
        let mut loadout = RunLoadout {
            armor: [None, None, None, Some(helmet.clone())],
            extras: vec![ItemStack::new("GOLDEN_APPLE", 4), ItemStack::new("ARROW", 16)],
        };
        let inventory = carrying(
            &[
                (FIRST_EXTRA_SLOT, ItemStack::new("GOLDEN_APPLE", 1)),
                (FIRST_EXTRA_SLOT + 1, ItemStack::new("DIRT", 64)),
            ],
            [None, None, None, Some(helmet)],
        );

        loadout.reconcile(&inventory);

        assert_eq!(loadout.extras, vec![ItemStack::new("GOLDEN_APPLE", 1)]);
        assert!(loadout.armor[3].is_some());
    }

    #[test]
    fn test_reconcile_does_not_count_shared_items_twice() {
        let mut loadout = RunLoadout {
            extras: vec![ItemStack::new("GOLDEN_APPLE", 4), ItemStack::new("GOLDEN_APPLE", 4)],
            ..Default::default()
        };
        let inventory = carrying(
            &[(FIRST_EXTRA_SLOT, ItemStack::new("GOLDEN_APPLE", 4))],
            Default::default(),
        );

        loadout.reconcile(&inventory);

        let total: u32 = loadout.extras.iter().map(|e| e.amount).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_reconcile_ignores_personal_items_elsewhere() {
        let mut loadout = RunLoadout {
            extras: vec![ItemStack::new("GOLDEN_APPLE", 4)],
            ..Default::default()
        };
        let inventory = carrying(&[(7, ItemStack::new("GOLDEN_APPLE", 10))], Default::default());

        loadout.reconcile(&inventory);

        assert!(loadout.extras.is_empty());
    }

    #[test]
    fn test_reconcile_only_touches_saved_armor_slots() {
        let mut loadout = RunLoadout {
            armor: [None, None, None, Some(ItemStack::new("IRON_HELMET", 1))],
            ..Default::default()
        };
        let worn = [
            Some(ItemStack::new("DIAMOND_BOOTS", 1)),
            None,
            None,
            None,
        ];

        loadout.reconcile(&carrying(&[], worn));

        assert_eq!(loadout.armor, [None, None, None, None]);
    }

    #[test]
    fn test_sync_ignores_players_without_loadout() {
        let mut store = InMemoryEquipment::new();
        let player = PlayerId::new();
        store
            .sync_from_inventory(player, &InventorySnapshot::default())
            .unwrap();
        assert!(store.loadout(player).is_none());
    }
}
