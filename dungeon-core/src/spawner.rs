//! MobSpawnCoordinator - turns round manifests into creatures.
//!
//! The coordinator:
//! - schedules a round's spawns as staggered [`Action::SpawnMob`] entries,
//!   never queueing more than the mob cap leaves room for
//! - re-checks the cap when each spawn actually fires
//! - tags every creature with its owning session so deaths can be routed
//! - spawns bosses and arms one repeating timer per enabled ability
//!
//! It holds the engine's random source, so placement, ability targeting and
//! reward rolls all come from one seedable stream.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::abilities::{self, AbilityContext, AbilityOutcome};
use crate::catalog::{BossAbility, BossDefinition, Location, MobDefinition, MobSpawnEntry};
use crate::host::{EntityId, GameHost, SpawnKind, SpawnRequest};
use crate::scheduler::{Action, TimerQueue};
use crate::session::{DungeonSession, SessionId};

/// Ownership record attached to every spawned creature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTag {
    pub session: SessionId,
    /// Catalog id of the mob or boss.
    pub mob_id: String,
    pub is_boss: bool,
}

/// A creature that made it into the world.
#[derive(Debug, Clone, PartialEq)]
pub struct Spawned {
    pub entity: EntityId,
    pub location: Location,
}

/// How far summoned minions land from their boss.
const SUMMON_SPREAD: f64 = 2.0;

pub struct MobSpawnCoordinator {
    rng: StdRng,
    tags: HashMap<EntityId, EntityTag>,
}

impl MobSpawnCoordinator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            tags: HashMap::new(),
        }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn tag(&self, entity: EntityId) -> Option<&EntityTag> {
        self.tags.get(&entity)
    }

    /// Remove and return a creature's tag.
    pub fn untag(&mut self, entity: EntityId) -> Option<EntityTag> {
        self.tags.remove(&entity)
    }

    /// Drop every tag belonging to a session.
    pub fn forget_session(&mut self, session: SessionId) {
        self.tags.retain(|_, tag| tag.session != session);
    }

    pub fn tagged_count(&self) -> usize {
        self.tags.len()
    }

    /// A random element of `locations`.
    pub fn pick(&mut self, locations: &[Location]) -> Option<Location> {
        locations.choose(&mut self.rng).cloned()
    }

    // ========================================================================
    // Round manifests
    // ========================================================================

    /// Queue the spawns for a round. Each entry gets up to
    /// `min(count, cap - (alive + queued))` spawns, one every
    /// `spawn_delay × index`. Returns how many were queued.
    pub fn schedule_round(
        &mut self,
        session: &mut DungeonSession,
        manifest: &[MobSpawnEntry],
        cap: u32,
        timers: &mut TimerQueue,
    ) -> u32 {
        let round = session.current_round;
        let mut queued = 0;
        for entry in manifest {
            let occupied = session.live_entities.len() as u32 + session.pending_spawns;
            let budget = cap.saturating_sub(occupied);
            let count = entry.count.min(budget);
            if count < entry.count {
                debug!(
                    session = %session.id,
                    mob = %entry.mob_id,
                    requested = entry.count,
                    queued = count,
                    "spawn_capped"
                );
            }
            for index in 0..count {
                let task = timers.schedule(
                    entry.spawn_delay() * index,
                    Action::SpawnMob {
                        session: session.id,
                        round,
                        mob_id: entry.mob_id.clone(),
                    },
                );
                session.tasks.insert(task);
                session.pending_spawns += 1;
            }
            queued += count;
        }
        queued
    }

    /// Spawn one regular mob if the cap still allows it.
    pub fn spawn_mob(
        &mut self,
        session: &mut DungeonSession,
        mob: &MobDefinition,
        cap: u32,
        host: &mut dyn GameHost,
    ) -> Option<Spawned> {
        let alive = session.prune_entities(|e| host.is_entity_alive(e));
        if alive as u32 >= cap {
            debug!(session = %session.id, mob = %mob.id, alive, cap, "spawn_skipped_cap");
            return None;
        }
        let Some(location) = self.pick(&session.dungeon.locations.mob_spawns) else {
            warn!(dungeon = %session.dungeon.id, "no_mob_spawn_locations");
            return None;
        };
        self.spawn_tagged(session, mob_request(mob, &location), &mob.id, host)
            .map(|entity| Spawned { entity, location })
    }

    /// Spawn up to `count` minions around `near`, respecting the cap.
    pub fn summon(
        &mut self,
        session: &mut DungeonSession,
        mob: &MobDefinition,
        count: u32,
        near: &Location,
        cap: u32,
        host: &mut dyn GameHost,
    ) -> Vec<Spawned> {
        let mut spawned = Vec::new();
        for _ in 0..count {
            let alive = session.prune_entities(|e| host.is_entity_alive(e));
            if alive as u32 >= cap {
                debug!(session = %session.id, mob = %mob.id, "summon_capped");
                break;
            }
            let location = near.offset(
                self.rng.gen_range(-SUMMON_SPREAD..=SUMMON_SPREAD),
                self.rng.gen_range(-SUMMON_SPREAD..=SUMMON_SPREAD),
            );
            if let Some(entity) = self.spawn_tagged(session, mob_request(mob, &location), &mob.id, host) {
                spawned.push(Spawned { entity, location });
            }
        }
        spawned
    }

    fn spawn_tagged(
        &mut self,
        session: &mut DungeonSession,
        request: SpawnRequest<'_>,
        mob_id: &str,
        host: &mut dyn GameHost,
    ) -> Option<EntityId> {
        let is_boss = request.kind == SpawnKind::Boss;
        let Some(entity) = host.spawn_entity(request) else {
            warn!(session = %session.id, mob = %mob_id, "spawn_failed");
            return None;
        };
        self.tags.insert(
            entity,
            EntityTag {
                session: session.id,
                mob_id: mob_id.to_string(),
                is_boss,
            },
        );
        session.live_entities.insert(entity);
        session.mobs_spawned += 1;
        Some(entity)
    }

    // ========================================================================
    // Bosses
    // ========================================================================

    /// Spawn the round's boss and arm its abilities. Uses the boss spawn
    /// point, falling back to a random mob spawn point.
    pub fn spawn_boss(
        &mut self,
        session: &mut DungeonSession,
        boss: &BossDefinition,
        host: &mut dyn GameHost,
        timers: &mut TimerQueue,
    ) -> Option<Spawned> {
        let location = match session.dungeon.locations.boss_spawn.clone() {
            Some(location) => location,
            None => {
                warn!(dungeon = %session.dungeon.id, boss = %boss.id, "boss_spawn_fallback");
                self.pick(&session.dungeon.locations.mob_spawns)?
            }
        };
        let request = SpawnRequest {
            kind: SpawnKind::Boss,
            definition_id: &boss.id,
            display_name: &boss.display_name,
            entity_type: &boss.entity_type,
            attributes: &boss.attributes,
            equipment: &boss.equipment,
            location: &location,
        };
        let entity = self.spawn_tagged(session, request, &boss.id, host)?;
        session.active_boss = Some(entity);

        for (name, ability) in boss.enabled_abilities() {
            let task = timers.schedule_repeating(
                ability.interval(),
                ability.interval(),
                Action::BossAbility {
                    session: session.id,
                    boss: entity,
                    ability: name.to_string(),
                },
            );
            session.tasks.insert(task);
            session.boss_tasks.push(task);
        }
        Some(Spawned { entity, location })
    }

    /// Run one ability through the handler table. `None` for unknown names.
    pub fn resolve_ability(
        &mut self,
        session: &DungeonSession,
        boss: EntityId,
        name: &str,
        ability: &BossAbility,
    ) -> Option<AbilityOutcome> {
        let handler = abilities::handler(name)?;
        let participants = session.alive_members();
        let mut ctx = AbilityContext {
            boss,
            participants: &participants,
            rng: &mut self.rng,
        };
        Some(handler(ability, &mut ctx))
    }
}

fn mob_request<'a>(mob: &'a MobDefinition, location: &'a Location) -> SpawnRequest<'a> {
    SpawnRequest {
        kind: SpawnKind::Mob,
        definition_id: &mob.id,
        display_name: &mob.display_name,
        entity_type: &mob.entity_type,
        attributes: &mob.attributes,
        equipment: &mob.equipment,
        location,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DungeonDefinition, DungeonLocations};
    use crate::testing::MockHost;
    use std::sync::Arc;
    use std::time::Duration;

    fn session() -> DungeonSession {
        let locations = DungeonLocations {
            mob_spawns: vec![Location::new("w", 5.0, 64.0, 5.0)],
            ..Default::default()
        };
        DungeonSession::new(Arc::new(
            DungeonDefinition::new("crypt").with_locations(locations),
        ))
    }

    #[test]
    fn test_schedule_respects_cap_and_stagger() {
        let mut session = session();
        let mut timers = TimerQueue::new();
        let mut coordinator = MobSpawnCoordinator::new(Some(1));
        session.current_round = 1;

        let manifest = vec![
            MobSpawnEntry::new("ghoul", 3).with_delay(Duration::from_secs(1)),
            MobSpawnEntry::new("bat", 5),
        ];
        let queued = coordinator.schedule_round(&mut session, &manifest, 4, &mut timers);

        assert_eq!(queued, 4);
        assert_eq!(session.pending_spawns(), 4);
        assert_eq!(timers.len(), 4);
        // Ghouls at 0s, 1s, 2s; the one bat that fits at 0s.
        let mut times = Vec::new();
        while let Some((_, action)) = timers.pop_due(Duration::from_secs(10)) {
            times.push((timers.now().as_secs(), action));
        }
        let bat_count = times
            .iter()
            .filter(|(_, a)| matches!(a, Action::SpawnMob { mob_id, .. } if mob_id == "bat"))
            .count();
        assert_eq!(bat_count, 1);
        assert_eq!(times.last().map(|(t, _)| *t), Some(2));
    }

    #[test]
    fn test_spawn_rechecks_cap_at_fire_time() {
        let mut session = session();
        let mut host = MockHost::new();
        let mut coordinator = MobSpawnCoordinator::new(Some(1));
        let mob = MobDefinition::new("ghoul");

        assert!(coordinator.spawn_mob(&mut session, &mob, 1, &mut host).is_some());
        assert!(coordinator.spawn_mob(&mut session, &mob, 1, &mut host).is_none());
        assert_eq!(session.live_entities().len(), 1);

        // Once the first one dies there is room again.
        let first = *session.live_entities().iter().next().unwrap();
        host.kill_entity(first);
        assert!(coordinator.spawn_mob(&mut session, &mob, 1, &mut host).is_some());
        assert_eq!(session.mobs_spawned(), 2);
    }

    #[test]
    fn test_spawned_entities_are_tagged() {
        let mut session = session();
        let mut host = MockHost::new();
        let mut coordinator = MobSpawnCoordinator::new(Some(1));

        let spawned = coordinator
            .spawn_mob(&mut session, &MobDefinition::new("ghoul"), 8, &mut host)
            .unwrap();
        let tag = coordinator.tag(spawned.entity).unwrap();
        assert_eq!(tag.session, session.id());
        assert_eq!(tag.mob_id, "ghoul");
        assert!(!tag.is_boss);

        coordinator.forget_session(session.id());
        assert_eq!(coordinator.tagged_count(), 0);
    }

    #[test]
    fn test_boss_falls_back_to_mob_spawn_and_arms_abilities() {
        let mut session = session();
        let mut host = MockHost::new();
        let mut timers = TimerQueue::new();
        let mut coordinator = MobSpawnCoordinator::new(Some(1));
        let boss = BossDefinition::new("lich")
            .with_ability("ground-slam", BossAbility::enabled(10))
            .with_ability("teleport", BossAbility::default());

        let spawned = coordinator
            .spawn_boss(&mut session, &boss, &mut host, &mut timers)
            .unwrap();

        assert_eq!(spawned.location.x, 5.0);
        assert_eq!(session.active_boss(), Some(spawned.entity));
        assert_eq!(session.boss_tasks.len(), 1);
        assert_eq!(timers.next_due(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_no_spawn_points_means_no_boss() {
        let mut session = DungeonSession::new(Arc::new(DungeonDefinition::new("empty")));
        let mut host = MockHost::new();
        let mut timers = TimerQueue::new();
        let mut coordinator = MobSpawnCoordinator::new(Some(1));

        let spawned = coordinator.spawn_boss(&mut session, &BossDefinition::new("lich"), &mut host, &mut timers);
        assert!(spawned.is_none());
        assert!(session.active_boss().is_none());
    }

    #[test]
    fn test_summon_stops_at_cap() {
        let mut session = session();
        let mut host = MockHost::new();
        let mut coordinator = MobSpawnCoordinator::new(Some(1));
        let near = Location::new("w", 0.0, 64.0, 0.0);

        let spawned = coordinator.summon(&mut session, &MobDefinition::new("minion"), 5, &near, 3, &mut host);
        assert_eq!(spawned.len(), 3);
        for s in &spawned {
            assert!((s.location.x - near.x).abs() <= SUMMON_SPREAD);
        }
    }
}
