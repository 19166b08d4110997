//! Entity state snapshots and the in-memory state store.
//!
//! `EntityState` is an immutable snapshot of one hub entity; updates replace
//! the stored value wholesale, never mutate it in place. `StateStore` holds
//! the latest snapshot per watched entity and is written only from the engine
//! task (single writer).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::Pattern;

/// Latest known state of one hub entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Stable identifier, e.g. "switch.lamp"
    pub entity_id: String,

    /// Raw state value as reported by the hub ("on", "22.5", "unavailable", ...)
    pub state: String,

    /// Attribute map (friendly_name, device_class, unit_of_measurement, ...)
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,

    /// Hub-side change timestamp, passed through verbatim
    #[serde(default)]
    pub last_changed: Option<String>,
}

impl EntityState {
    pub fn is_on(&self) -> bool {
        self.state == "on"
    }

    /// The hub reports entities it cannot reach as "unavailable", and entities
    /// it has never seen as "unknown".
    pub fn is_unavailable(&self) -> bool {
        matches!(self.state.as_str(), "unavailable" | "unknown")
    }

    /// Numeric interpretation of the state value, if it parses
    pub fn numeric(&self) -> Option<f64> {
        self.state.parse().ok()
    }

    pub fn friendly_name(&self) -> &str {
        self.attributes
            .get("friendly_name")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.entity_id)
    }
}

/// Cache of last-known entity states, keyed by entity id.
///
/// The store only ever holds entities matched by the watch configuration, so
/// it cannot grow beyond the watched set regardless of what the hub sends.
#[derive(Debug, Default)]
pub struct StateStore {
    entities: HashMap<String, EntityState>,
    watched: Vec<Pattern>,
}

impl StateStore {
    pub fn new(watched: Vec<Pattern>) -> Self {
        Self {
            entities: HashMap::new(),
            watched,
        }
    }

    /// Replace the stored snapshot for the state's entity id.
    ///
    /// Returns false when the entity is not watched; the update is discarded.
    pub fn apply(&mut self, state: EntityState) -> bool {
        if !self.is_watched(&state.entity_id) {
            return false;
        }
        self.entities.insert(state.entity_id.clone(), state);
        true
    }

    /// Point-in-time read of one entity
    pub fn get(&self, entity_id: &str) -> Option<&EntityState> {
        self.entities.get(entity_id)
    }

    /// All watched entities with a known state. Used to rebuild a full frame
    /// after reconnection.
    pub fn snapshot(&self) -> &HashMap<String, EntityState> {
        &self.entities
    }

    pub fn is_watched(&self, entity_id: &str) -> bool {
        self.watched.iter().any(|p| p.matches(entity_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: &str, value: &str) -> EntityState {
        EntityState {
            entity_id: id.to_string(),
            state: value.to_string(),
            attributes: serde_json::Map::new(),
            last_changed: None,
        }
    }

    #[test]
    fn test_apply_then_get() {
        let mut store = StateStore::new(vec![Pattern::parse("switch.lamp")]);
        assert!(store.apply(state("switch.lamp", "on")));
        assert_eq!(store.get("switch.lamp").unwrap().state, "on");

        // Replacement, not mutation
        assert!(store.apply(state("switch.lamp", "off")));
        assert_eq!(store.get("switch.lamp").unwrap().state, "off");
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn test_applies_are_isolated_per_entity() {
        let mut store = StateStore::new(vec![Pattern::parse("sensor.*")]);
        store.apply(state("sensor.a", "1"));
        store.apply(state("sensor.b", "2"));
        store.apply(state("sensor.b", "3"));

        assert_eq!(store.get("sensor.a").unwrap().state, "1");
        assert_eq!(store.get("sensor.b").unwrap().state, "3");
    }

    #[test]
    fn test_unwatched_entities_are_ignored() {
        let mut store = StateStore::new(vec![Pattern::parse("switch.lamp")]);
        assert!(!store.apply(state("sensor.intruder", "42")));
        assert!(store.get("sensor.intruder").is_none());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_entity_state_helpers() {
        let mut s = state("sensor.temperature", "22.5");
        assert_eq!(s.numeric(), Some(22.5));
        assert!(!s.is_on());
        assert_eq!(s.friendly_name(), "sensor.temperature");

        s.attributes.insert(
            "friendly_name".to_string(),
            serde_json::Value::String("Temperature".to_string()),
        );
        assert_eq!(s.friendly_name(), "Temperature");

        assert!(state("switch.lamp", "on").is_on());
        assert!(state("switch.lamp", "unavailable").is_unavailable());
        assert!(state("switch.lamp", "unknown").is_unavailable());
    }
}
