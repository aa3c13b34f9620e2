//! Player-facing text.
//!
//! Messages are looked up by key and filled with `{placeholder}` values.
//! An unknown key renders as the key itself so a missing translation is
//! visible in game instead of failing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const DEFAULTS: &[(&str, &str)] = &[
    ("prefix", "[Dungeons] "),
    ("dungeon-joined", "You joined {dungeon}."),
    ("dungeon-left", "You left the dungeon."),
    ("player-joined", "{player} joined ({current}/{max})."),
    ("player-left", "{player} left ({current}/{max})."),
    ("already-in-dungeon", "You are already in a dungeon."),
    ("dungeon-in-progress", "That dungeon has already started."),
    ("dungeon-closed", "That dungeon is closed right now."),
    ("dungeon-full", "That dungeon is full."),
    ("dungeon-not-found", "That dungeon no longer exists."),
    ("countdown-started", "Enough players! Starting in {time} seconds."),
    ("starting-in", "Starting in {time}..."),
    ("starting-cancelled", "Not enough players, start cancelled."),
    ("force-start", "The dungeon is being started early."),
    ("dungeon-started", "The dungeon has begun!"),
    ("round-start", "Round {round} begins!"),
    ("all-mobs-killed", "All enemies defeated!"),
    ("boss-round", "A powerful presence approaches..."),
    ("boss-spawned", "{boss} has appeared!"),
    ("boss-defeated", "The boss has fallen!"),
    ("boss-unavailable", "The boss failed to appear."),
    ("player-died", "{player} has fallen."),
    ("player-death", "You died!"),
    ("equipment-lost", "Your run equipment was lost."),
    ("spectator-mode", "You are spectating until the next round."),
    ("players-revived", "{count} fallen players return to the fight."),
    ("player-revived", "You have been revived!"),
    ("dungeon-completed", "Dungeon complete! Rewards await."),
    ("dungeon-failed", "The dungeon has been lost."),
    ("dungeon-ended", "The dungeon was closed."),
    ("status-line", "Round {round} | Enemies: {mobs} | Alive: {alive} | {time}"),
];

/// Keyed message templates with a common prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCatalog {
    templates: HashMap<String, String>,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self {
            templates: DEFAULTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl MessageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by a JSON object of `key: template`.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let overrides: HashMap<String, String> = serde_json::from_str(text)?;
        let mut catalog = Self::default();
        catalog.templates.extend(overrides);
        Ok(catalog)
    }

    pub fn set(&mut self, key: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(key.into(), template.into());
    }

    /// Render a message without the prefix.
    pub fn render(&self, key: &str, placeholders: &[(&str, String)]) -> String {
        let mut text = self
            .templates
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string());
        for (name, value) in placeholders {
            text = text.replace(&format!("{{{name}}}"), value);
        }
        text
    }

    /// Render a chat message, prefix included.
    pub fn chat(&self, key: &str, placeholders: &[(&str, String)]) -> String {
        let prefix = self.templates.get("prefix").map(String::as_str).unwrap_or("");
        format!("{prefix}{}", self.render(key, placeholders))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        let messages = MessageCatalog::new();
        let text = messages.render(
            "player-joined",
            &[("player", "Ayla".into()), ("current", "2".into()), ("max", "4".into())],
        );
        assert_eq!(text, "Ayla joined (2/4).");
    }

    #[test]
    fn test_missing_key_falls_back_to_key() {
        let messages = MessageCatalog::new();
        assert_eq!(messages.render("no-such-key", &[]), "no-such-key");
        assert_eq!(messages.chat("no-such-key", &[]), "[Dungeons] no-such-key");
    }

    #[test]
    fn test_json_overrides_keep_defaults() {
        let messages =
            MessageCatalog::from_json(r#"{"prefix": "", "dungeon-full": "Full!"}"#).unwrap();
        assert_eq!(messages.chat("dungeon-full", &[]), "Full!");
        assert_eq!(messages.render("dungeon-started", &[]), "The dungeon has begun!");
    }
}
