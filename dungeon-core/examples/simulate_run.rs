//! Simulate a full run of the sample crypt with two players.
//!
//! Run with: `RUST_LOG=dungeon_core=debug cargo run -p dungeon-core --example simulate_run`

use std::sync::Arc;
use std::time::Duration;

use dungeon_core::testing::{sample_catalog, MockHost};
use dungeon_core::{Collaborators, EngineConfig, PlayerId, SessionManager};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== Simulating the crypt ===\n");

    let host = MockHost::new();
    let mut manager = SessionManager::new(
        EngineConfig::default().with_seed(42),
        Arc::new(sample_catalog()),
        Collaborators::new(host.clone()),
    );

    let ayla = PlayerId::new();
    let bram = PlayerId::new();
    host.set_name(ayla, "Ayla");
    host.set_name(bram, "Bram");

    println!("1. Two players join...");
    let id = manager.join_dungeon(ayla, "crypt")?;
    manager.join_dungeon(bram, "crypt")?;
    println!("   Session {id}");

    let mut second = 0;
    while manager.session(id).is_some_and(|s| !s.state().is_ended()) && second < 300 {
        manager.advance(Duration::from_secs(1));
        second += 1;

        // Players kill whatever is up, boss included, a second after it appears.
        let entities: Vec<_> = manager
            .session(id)
            .map(|s| s.live_entities().iter().copied().collect())
            .unwrap_or_default();
        for entity in entities {
            host.kill_entity(entity);
            manager.on_entity_death(entity, Some(ayla));
        }

        if let Some(session) = manager.session(id) {
            println!(
                "   t={:>3}s  {:?} round {}  kills {}",
                second,
                session.state(),
                session.current_round(),
                session.mobs_killed()
            );
        }
    }

    println!("\n2. Messages seen by Ayla:");
    for message in host.messages_for(ayla) {
        println!("   {message}");
    }

    manager.advance(Duration::from_secs(10));
    println!("\n3. Sessions left after cleanup: {}", manager.sessions().count());
    Ok(())
}
