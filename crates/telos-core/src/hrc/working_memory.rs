//! Working memory - the state a decision cycle operates on
//!
//! A flat slot map. Slots are JSON values so operator effects and production
//! conditions compose without a fixed schema; a `BTreeMap` keeps iteration
//! and state signatures deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Slot map for one decision-cycle invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemory {
    slots: BTreeMap<String, Value>,
}

impl WorkingMemory {
    /// Empty working memory
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from slot pairs
    pub fn from_slots(slots: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            slots: slots.into_iter().collect(),
        }
    }

    /// Read a slot
    pub fn get(&self, slot: &str) -> Option<&Value> {
        self.slots.get(slot)
    }

    /// Read a numeric slot
    pub fn get_f64(&self, slot: &str) -> Option<f64> {
        self.slots.get(slot).and_then(|v| v.as_f64())
    }

    /// Read a boolean slot; missing slots read as false
    pub fn get_bool(&self, slot: &str) -> bool {
        self.slots
            .get(slot)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Read a string slot
    pub fn get_str(&self, slot: &str) -> Option<&str> {
        self.slots.get(slot).and_then(|v| v.as_str())
    }

    /// Write a slot
    pub fn set(&mut self, slot: impl Into<String>, value: Value) {
        self.slots.insert(slot.into(), value);
    }

    /// Remove a slot
    pub fn remove(&mut self, slot: &str) -> Option<Value> {
        self.slots.remove(slot)
    }

    /// Merge effects into the slot map; later writes win
    pub fn merge(&mut self, effects: &BTreeMap<String, Value>) {
        for (slot, value) in effects {
            self.slots.insert(slot.clone(), value.clone());
        }
    }

    /// Number of filled slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slots are filled
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Stable snapshot of the current slots; the chunking learner uses this
    /// as a production condition
    pub fn signature(&self) -> BTreeMap<String, Value> {
        self.slots.clone()
    }

    /// Iterate slots in deterministic order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.slots.iter()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overwrites() {
        let mut wm = WorkingMemory::new();
        wm.set("a", json!(1));

        let mut effects = BTreeMap::new();
        effects.insert("a".to_string(), json!(2));
        effects.insert("b".to_string(), json!(true));
        wm.merge(&effects);

        assert_eq!(wm.get_f64("a"), Some(2.0));
        assert!(wm.get_bool("b"));
    }

    #[test]
    fn test_missing_bool_reads_false() {
        let wm = WorkingMemory::new();
        assert!(!wm.get_bool("timePressure"));
    }

    #[test]
    fn test_signature_is_stable() {
        let wm = WorkingMemory::from_slots([
            ("b".to_string(), json!(2)),
            ("a".to_string(), json!(1)),
        ]);
        let sig = wm.signature();
        let keys: Vec<&String> = sig.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
