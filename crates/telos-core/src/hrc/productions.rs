//! Production memory - learned condition/action rules (chunks)
//!
//! Productions are created only by the chunking learner at the end of a
//! successful cycle; afterwards only `strength` and `usage_count` mutate.
//! During the Elaborate phase a matching production writes its operator
//! recommendation into working memory, which the Select phase reads as a
//! preference.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::working_memory::WorkingMemory;

/// Slot the Elaborate phase writes operator recommendations into
pub const RECOMMENDATION_SLOT: &str = "recommendedOperator";

// ============================================================================
// PRODUCTION RULES
// ============================================================================

/// A learned condition -> action rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionRule {
    /// Rule id
    pub id: String,
    /// State signature the rule fires on: every pair must match exactly
    pub conditions: BTreeMap<String, Value>,
    /// Operator the rule recommends
    pub recommends: String,
    /// Rule strength, grown on re-learning and successful firing
    pub strength: f64,
    /// Times the rule has fired
    pub usage_count: u64,
}

impl ProductionRule {
    /// Whether the rule's full signature matches working memory
    pub fn matches(&self, wm: &WorkingMemory) -> bool {
        self.conditions
            .iter()
            .all(|(slot, value)| wm.get(slot) == Some(value))
    }
}

// ============================================================================
// PRODUCTION MEMORY
// ============================================================================

/// Owned by the controller; single-threaded inside a cycle
#[derive(Debug, Clone, Default)]
pub struct ProductionMemory {
    rules: Vec<ProductionRule>,
}

impl ProductionMemory {
    /// Empty production memory
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of learned rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether nothing has been learned yet
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterate learned rules
    pub fn iter(&self) -> impl Iterator<Item = &ProductionRule> {
        self.rules.iter()
    }

    /// Single elaboration pass: fire every matching rule, recording the
    /// strongest recommendation. Returns the number of rules that fired.
    pub fn elaborate(&mut self, wm: &mut WorkingMemory) -> usize {
        let mut fired = 0;
        let mut best: Option<(f64, String)> = None;

        for rule in &mut self.rules {
            if rule.matches(wm) {
                rule.usage_count += 1;
                fired += 1;
                let stronger = match &best {
                    Some((strength, _)) => rule.strength > *strength,
                    None => true,
                };
                if stronger {
                    best = Some((rule.strength, rule.recommends.clone()));
                }
            }
        }

        if let Some((_, operator)) = best {
            wm.set(RECOMMENDATION_SLOT, Value::String(operator));
        }
        fired
    }

    /// Strength of the strongest rule recommending `operator` on this state
    pub fn preference_for(&self, wm: &WorkingMemory, operator: &str) -> Option<f64> {
        self.rules
            .iter()
            .filter(|r| r.recommends == operator && r.matches(wm))
            .map(|r| r.strength)
            .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Chunk a successful cycle: condition = pre-apply state signature,
    /// action = recommend the applied operator. Re-learning an existing
    /// chunk strengthens it instead of duplicating.
    pub fn learn_chunk(
        &mut self,
        signature: BTreeMap<String, Value>,
        operator: &str,
    ) -> &ProductionRule {
        if let Some(idx) = self
            .rules
            .iter()
            .position(|r| r.recommends == operator && r.conditions == signature)
        {
            let rule = &mut self.rules[idx];
            rule.strength = (rule.strength + 0.1).min(1.0);
            return &self.rules[idx];
        }

        self.rules.push(ProductionRule {
            id: Uuid::new_v4().to_string(),
            conditions: signature,
            recommends: operator.to_string(),
            strength: 0.5,
            usage_count: 0,
        });
        self.rules.last().expect("just pushed")
    }
}

// ============================================================================
// TESTS
// ============================================================================
