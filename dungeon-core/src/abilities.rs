//! Boss abilities.
//!
//! Abilities are looked up by name in a fixed table. A handler reads the
//! ability's parameters and decides what happens; it never touches the world
//! itself. Casts go to the host, summons go back through the spawner so they
//! count against the mob cap like any other spawn.

use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::time::Duration;

use crate::catalog::BossAbility;
use crate::host::{EntityId, PlayerId};

/// An ability effect for the host to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum AbilityCast {
    GroundSlam { radius: f64, damage: f64 },
    ArrowRain { radius: f64, arrows: u32 },
    /// Boss jumps next to `target`.
    Teleport { target: PlayerId, range: f64 },
    WebTrap { radius: f64, duration: Duration },
    WitherStrike { duration: Duration, amplifier: u32 },
    DarkCharge { speed_boost: u32, duration: Duration },
}

/// What one firing of an ability produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AbilityOutcome {
    Cast {
        cast: AbilityCast,
        targets: Vec<PlayerId>,
    },
    Summon {
        mob_id: String,
        count: u32,
    },
    Nothing,
}

pub struct AbilityContext<'a> {
    pub boss: EntityId,
    /// Alive members of the session.
    pub participants: &'a [PlayerId],
    pub rng: &'a mut StdRng,
}

pub type AbilityHandler = fn(&BossAbility, &mut AbilityContext<'_>) -> AbilityOutcome;

lazy_static! {
    static ref HANDLERS: HashMap<&'static str, AbilityHandler> = {
        let mut table: HashMap<&'static str, AbilityHandler> = HashMap::new();
        table.insert("summon-minions", summon_minions);
        table.insert("ground-slam", ground_slam);
        table.insert("arrow-rain", arrow_rain);
        table.insert("teleport", teleport);
        table.insert("web-trap", web_trap);
        table.insert("wither-strike", wither_strike);
        table.insert("dark-charge", dark_charge);
        table
    };
}

/// Find the handler for an ability name.
pub fn handler(name: &str) -> Option<AbilityHandler> {
    HANDLERS.get(name).copied()
}

/// Every ability name the table knows, sorted.
pub fn known_abilities() -> Vec<&'static str> {
    let mut names: Vec<_> = HANDLERS.keys().copied().collect();
    names.sort_unstable();
    names
}

fn secs(ability: &BossAbility, key: &str, default: i64) -> Duration {
    Duration::from_secs(ability.int_param(key, default).max(0) as u64)
}

fn positive(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

fn cast(cast: AbilityCast, ctx: &AbilityContext<'_>) -> AbilityOutcome {
    if ctx.participants.is_empty() {
        return AbilityOutcome::Nothing;
    }
    AbilityOutcome::Cast {
        cast,
        targets: ctx.participants.to_vec(),
    }
}

fn summon_minions(ability: &BossAbility, _ctx: &mut AbilityContext<'_>) -> AbilityOutcome {
    AbilityOutcome::Summon {
        mob_id: ability.str_param("mob-type", "minion").to_string(),
        count: positive(ability.int_param("count", 3)),
    }
}

fn ground_slam(ability: &BossAbility, ctx: &mut AbilityContext<'_>) -> AbilityOutcome {
    cast(
        AbilityCast::GroundSlam {
            radius: ability.float_param("radius", 5.0),
            damage: ability.float_param("damage", 10.0),
        },
        ctx,
    )
}

fn arrow_rain(ability: &BossAbility, ctx: &mut AbilityContext<'_>) -> AbilityOutcome {
    cast(
        AbilityCast::ArrowRain {
            radius: ability.float_param("radius", 8.0),
            arrows: positive(ability.int_param("arrows", 10)),
        },
        ctx,
    )
}

fn teleport(ability: &BossAbility, ctx: &mut AbilityContext<'_>) -> AbilityOutcome {
    let Some(target) = ctx.participants.choose(&mut *ctx.rng).copied() else {
        return AbilityOutcome::Nothing;
    };
    AbilityOutcome::Cast {
        cast: AbilityCast::Teleport {
            target,
            range: ability.float_param("range", 10.0),
        },
        targets: vec![target],
    }
}

fn web_trap(ability: &BossAbility, ctx: &mut AbilityContext<'_>) -> AbilityOutcome {
    cast(
        AbilityCast::WebTrap {
            radius: ability.float_param("radius", 4.0),
            duration: secs(ability, "duration", 5),
        },
        ctx,
    )
}

fn wither_strike(ability: &BossAbility, ctx: &mut AbilityContext<'_>) -> AbilityOutcome {
    cast(
        AbilityCast::WitherStrike {
            duration: secs(ability, "duration", 5),
            amplifier: positive(ability.int_param("amplifier", 1)),
        },
        ctx,
    )
}

fn dark_charge(ability: &BossAbility, ctx: &mut AbilityContext<'_>) -> AbilityOutcome {
    cast(
        AbilityCast::DarkCharge {
            speed_boost: positive(ability.int_param("speed-boost", 2)),
            duration: secs(ability, "duration", 3),
        },
        ctx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn run(name: &str, ability: &BossAbility, participants: &[PlayerId]) -> AbilityOutcome {
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = AbilityContext {
            boss: EntityId::new(),
            participants,
            rng: &mut rng,
        };
        (handler(name).unwrap())(ability, &mut ctx)
    }

    #[test]
    fn test_table_lists_all_abilities() {
        assert_eq!(
            known_abilities(),
            vec![
                "arrow-rain",
                "dark-charge",
                "ground-slam",
                "summon-minions",
                "teleport",
                "web-trap",
                "wither-strike",
            ]
        );
        assert!(handler("meteor").is_none());
    }

    #[test]
    fn test_defaults_and_params() {
        let players = [PlayerId::new()];
        let slam = run("ground-slam", &BossAbility::enabled(10).with_param("damage", 4.0), &players);
        assert_eq!(
            slam,
            AbilityOutcome::Cast {
                cast: AbilityCast::GroundSlam {
                    radius: 5.0,
                    damage: 4.0
                },
                targets: players.to_vec(),
            }
        );
    }

    #[test]
    fn test_summon_reads_mob_type() {
        let ability = BossAbility::enabled(20)
            .with_param("mob-type", "skeleton")
            .with_param("count", 2);
        assert_eq!(
            run("summon-minions", &ability, &[]),
            AbilityOutcome::Summon {
                mob_id: "skeleton".into(),
                count: 2
            }
        );
    }

    #[test]
    fn test_no_participants_means_nothing() {
        let ability = BossAbility::enabled(5);
        assert_eq!(run("teleport", &ability, &[]), AbilityOutcome::Nothing);
        assert_eq!(run("web-trap", &ability, &[]), AbilityOutcome::Nothing);
    }

    #[test]
    fn test_teleport_picks_a_participant() {
        let players = [PlayerId::new(), PlayerId::new()];
        match run("teleport", &BossAbility::enabled(5), &players) {
            AbilityOutcome::Cast {
                cast: AbilityCast::Teleport { target, range },
                targets,
            } => {
                assert!(players.contains(&target));
                assert_eq!(targets, vec![target]);
                assert_eq!(range, 10.0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
