//! Property tests: random sequences of joins, leaves, deaths, kills, admin
//! commands and time steps must never break the session invariants.

use proptest::prelude::*;
use std::collections::HashMap;

use dungeon_core::testing::TestHarness;
use dungeon_core::{PlayerId, SessionId, SessionState};

const DUNGEONS: [&str; 3] = ["crypt", "solo", "endless"];
const PLAYERS: usize = 6;

#[derive(Debug, Clone)]
enum Op {
    Join(usize, usize),
    Leave(usize),
    Die(usize),
    Kill(usize, usize),
    Advance(u64),
    ForceStart(usize),
    End(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..PLAYERS, 0..DUNGEONS.len()).prop_map(|(p, d)| Op::Join(p, d)),
        1 => (0..PLAYERS).prop_map(Op::Leave),
        1 => (0..PLAYERS).prop_map(Op::Die),
        3 => (any::<usize>(), 0..PLAYERS).prop_map(|(e, p)| Op::Kill(e, p)),
        4 => (0u64..8_000).prop_map(Op::Advance),
        1 => (0..DUNGEONS.len()).prop_map(Op::ForceStart),
        1 => (0..DUNGEONS.len()).prop_map(Op::End),
    ]
}

/// What has been observed so far, per session.
#[derive(Default)]
struct Observed {
    rounds: HashMap<SessionId, u32>,
    transitions: HashMap<SessionId, usize>,
}

fn check(h: &TestHarness, observed: &mut Observed, explicit_end: bool) -> Result<(), TestCaseError> {
    for session in h.manager.sessions() {
        let id = session.id();
        prop_assert!(session.dead_count() <= session.member_count());
        prop_assert!(session.member_count() <= session.dungeon().max_players);

        let history = session.history();
        let from = observed.transitions.insert(id, history.len()).unwrap_or(0);
        for &(before, after) in &history[from..] {
            prop_assert!(before.can_transition_to(after), "{:?} -> {:?}", before, after);
            if (before, after) == (SessionState::Waiting, SessionState::Ended) {
                prop_assert!(explicit_end, "lobby ended without an explicit end");
            }
        }

        if !session.state().is_ended() {
            let last = observed.rounds.insert(id, session.current_round()).unwrap_or(0);
            prop_assert!(session.current_round() >= last);
        }

        for &member in session.members() {
            let indexed = h.manager.get_player_session(member).map(|s| s.id());
            prop_assert_eq!(indexed, Some(id));
        }
    }

    for dungeon in DUNGEONS {
        let live = h
            .manager
            .sessions()
            .filter(|s| s.dungeon_id() == dungeon && !s.state().is_ended())
            .count();
        prop_assert!(live <= 1, "{} live sessions for {}", live, dungeon);
    }
    Ok(())
}

fn session_of(h: &TestHarness, dungeon: &str) -> Option<SessionId> {
    h.manager.get_session_by_dungeon(dungeon).map(|s| s.id())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_random_operations_keep_invariants(ops in prop::collection::vec(op(), 1..80)) {
        let mut h = TestHarness::new();
        let players: Vec<PlayerId> = (0..PLAYERS).map(|i| h.player(&format!("p{i}"))).collect();
        let mut observed = Observed::default();

        for op in ops {
            let explicit_end = matches!(op, Op::End(_));
            match op {
                Op::Join(p, d) => {
                    let full = h
                        .manager
                        .get_session_by_dungeon(DUNGEONS[d])
                        .filter(|s| !s.state().is_ended())
                        .is_some_and(|s| s.is_full());
                    let joined = h.join(players[p], DUNGEONS[d]).is_ok();
                    prop_assert!(!(full && joined), "joined a full session");
                }
                Op::Leave(p) => {
                    let was_in = h.manager.is_in_dungeon(players[p]);
                    prop_assert_eq!(h.manager.leave_session(players[p]), was_in);
                    prop_assert!(!h.manager.leave_session(players[p]));
                }
                Op::Die(p) => {
                    h.manager.on_player_death(players[p]);
                }
                Op::Kill(e, p) => {
                    let alive = h.host.alive_entities();
                    if !alive.is_empty() {
                        h.kill(alive[e % alive.len()], Some(players[p]));
                    }
                }
                Op::Advance(ms) => h.advance_millis(ms),
                Op::ForceStart(d) => {
                    if let Some(id) = session_of(&h, DUNGEONS[d]) {
                        h.manager.force_start(id);
                    }
                }
                Op::End(d) => {
                    if let Some(id) = session_of(&h, DUNGEONS[d]) {
                        h.manager.end_session(id, false);
                    }
                }
            }
            check(&h, &mut observed, explicit_end)?;
        }

        // Shutdown leaves nothing behind.
        h.manager.shutdown();
        prop_assert_eq!(h.manager.sessions().count(), 0);
        prop_assert_eq!(h.manager.get_total_players_in_dungeons(), 0);
        prop_assert!(h.host.alive_entities().is_empty());
    }
}
