//! Operators - the actions a decision cycle can take
//!
//! An operator pairs a precondition predicate with a set of effects, a base
//! utility (adjusted by reinforcement learning over time), a cost, and a
//! complexity-capability flag. The registry is read-shared across cycles;
//! utilities are the only mutable part.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::working_memory::WorkingMemory;

// ============================================================================
// CONDITIONS
// ============================================================================

/// Predicate applied to one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Slot equals the given value
    Equals,
    /// Slot exists, any value
    Exists,
    /// Slot is absent
    Absent,
    /// Numeric slot strictly greater than the given value
    GreaterThan,
    /// Numeric slot strictly less than the given value
    LessThan,
}

/// One precondition over working memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Slot under test
    pub slot: String,
    /// Predicate
    pub predicate: Predicate,
    /// Comparison value (ignored for Exists/Absent)
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    /// Equality condition
    pub fn equals(slot: impl Into<String>, value: Value) -> Self {
        Self {
            slot: slot.into(),
            predicate: Predicate::Equals,
            value,
        }
    }

    /// Existence condition
    pub fn exists(slot: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            predicate: Predicate::Exists,
            value: Value::Null,
        }
    }

    /// Absence condition
    pub fn absent(slot: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            predicate: Predicate::Absent,
            value: Value::Null,
        }
    }

    /// Numeric greater-than condition
    pub fn greater_than(slot: impl Into<String>, threshold: f64) -> Self {
        Self {
            slot: slot.into(),
            predicate: Predicate::GreaterThan,
            value: Value::from(threshold),
        }
    }

    /// Numeric less-than condition
    pub fn less_than(slot: impl Into<String>, threshold: f64) -> Self {
        Self {
            slot: slot.into(),
            predicate: Predicate::LessThan,
            value: Value::from(threshold),
        }
    }

    /// Evaluate against working memory
    pub fn matches(&self, wm: &WorkingMemory) -> bool {
        match self.predicate {
            Predicate::Equals => wm.get(&self.slot) == Some(&self.value),
            Predicate::Exists => wm.get(&self.slot).is_some(),
            Predicate::Absent => wm.get(&self.slot).is_none(),
            Predicate::GreaterThan => match (wm.get_f64(&self.slot), self.value.as_f64()) {
                (Some(actual), Some(threshold)) => actual > threshold,
                _ => false,
            },
            Predicate::LessThan => match (wm.get_f64(&self.slot), self.value.as_f64()) {
                (Some(actual), Some(threshold)) => actual < threshold,
                _ => false,
            },
        }
    }
}

// ============================================================================
// OPERATORS
// ============================================================================

/// A registered operator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    /// Unique operator name
    pub name: String,
    /// Preconditions; all must hold for the operator to be proposed
    pub preconditions: Vec<Condition>,
    /// Effects merged into working memory on apply
    pub effects: BTreeMap<String, Value>,
    /// Current utility in [0, 1]; adjusted by reinforcement
    pub utility: f64,
    /// Application cost
    pub cost: f64,
    /// Whether the operator copes with complex states
    pub handles_complexity: bool,
}

impl Operator {
    /// Create an operator with the given name and base utility
    pub fn new(name: impl Into<String>, utility: f64) -> Self {
        Self {
            name: name.into(),
            preconditions: Vec::new(),
            effects: BTreeMap::new(),
            utility: utility.clamp(0.0, 1.0),
            cost: 1.0,
            handles_complexity: false,
        }
    }

    /// Add a precondition
    pub fn when(mut self, condition: Condition) -> Self {
        self.preconditions.push(condition);
        self
    }

    /// Add an effect
    pub fn with_effect(mut self, slot: impl Into<String>, value: Value) -> Self {
        self.effects.insert(slot.into(), value);
        self
    }

    /// Set the cost
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Mark the operator as complexity-capable
    pub fn complexity_capable(mut self) -> Self {
        self.handles_complexity = true;
        self
    }

    /// Whether every precondition holds
    pub fn applicable(&self, wm: &WorkingMemory) -> bool {
        self.preconditions.iter().all(|c| c.matches(wm))
    }

    /// Reinforcement update: `u <- u + alpha * (r - u)`, clamped to [0, 1]
    pub fn reinforce(&mut self, reward: f64, learning_rate: f64) {
        self.utility = (self.utility + learning_rate * (reward - self.utility)).clamp(0.0, 1.0);
    }
}

/// Context-sensitive utility: base utility, minus a cost penalty under time
/// pressure, plus a bonus for complexity-capable operators on complex states.
pub fn situational_utility(operator: &Operator, wm: &WorkingMemory) -> f64 {
    let mut utility = operator.utility;
    if wm.get_bool("timePressure") {
        utility -= 0.1 * operator.cost;
    }
    if operator.handles_complexity && wm.get_f64("complexity").unwrap_or(0.0) > 3.0 {
        utility += 0.1;
    }
    utility
}

// ============================================================================
// PROPOSALS AND REGISTRY
// ============================================================================

/// One proposal produced by the Propose phase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    /// Proposed operator name
    pub operator: String,
    /// Situational utility at proposal time
    pub utility: f64,
    /// Operator cost, used for tie-breaking
    pub cost: f64,
}

/// Read-shared registry of operators, keyed by name
#[derive(Debug, Clone, Default)]
pub struct OperatorRegistry {
    operators: BTreeMap<String, Operator>,
}

impl OperatorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an operator
    pub fn register(&mut self, operator: Operator) {
        self.operators.insert(operator.name.clone(), operator);
    }

    /// Remove an operator by name
    pub fn unregister(&mut self, name: &str) -> Option<Operator> {
        self.operators.remove(name)
    }

    /// Read an operator
    pub fn get(&self, name: &str) -> Option<&Operator> {
        self.operators.get(name)
    }

    /// Mutable access for reinforcement updates
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Operator> {
        self.operators.get_mut(name)
    }

    /// Number of registered operators
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Whether no operators are registered
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Iterate in deterministic name order
    pub fn iter(&self) -> impl Iterator<Item = &Operator> {
        self.operators.values()
    }

    /// Proposals for every operator whose preconditions hold
    pub fn propose(&self, wm: &WorkingMemory) -> Vec<Proposal> {
        self.operators
            .values()
            .filter(|op| op.applicable(wm))
            .map(|op| Proposal {
                operator: op.name.clone(),
                utility: situational_utility(op, wm),
                cost: op.cost,
            })
            .collect()
    }
}

/// Baseline cognitive operator set registered by `serve`
pub fn default_operators() -> Vec<Operator> {
    use serde_json::json;

    vec![
        Operator::new("gather_information", 0.6)
            .when(Condition::absent("informed"))
            .with_effect("informed", json!(true))
            .with_cost(0.5),
        Operator::new("apply_strategy", 0.7)
            .when(Condition::equals("informed", json!(true)))
            .with_effect("goalAchieved", json!(true))
            .with_cost(1.0)
            .complexity_capable(),
        Operator::new("reduce_complexity", 0.5)
            .when(Condition::greater_than("complexity", 3.0))
            .with_effect("complexity", json!(2.0))
            .with_cost(0.8)
            .complexity_capable(),
    ]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_predicates() {
        let wm = WorkingMemory::from_slots([
            ("load".to_string(), json!(0.8)),
            ("phase".to_string(), json!("elaborate")),
        ]);

        assert!(Condition::equals("phase", json!("elaborate")).matches(&wm));
        assert!(Condition::exists("load").matches(&wm));
        assert!(Condition::absent("missing").matches(&wm));
        assert!(Condition::greater_than("load", 0.5).matches(&wm));
        assert!(!Condition::less_than("load", 0.5).matches(&wm));
        // Non-numeric slot never satisfies a numeric predicate
        assert!(!Condition::greater_than("phase", 0.0).matches(&wm));
    }

    #[test]
    fn test_reinforce_clamps() {
        let mut op = Operator::new("x", 0.05);
        op.reinforce(-1.0, 0.5);
        assert!(op.utility >= 0.0);

        let mut op = Operator::new("y", 0.99);
        for _ in 0..100 {
            op.reinforce(1.0, 0.5);
        }
        assert!(op.utility <= 1.0);
    }

    #[test]
    fn test_situational_utility_time_pressure() {
        let op = Operator::new("costly", 0.8).with_cost(2.0);
        let calm = WorkingMemory::new();
        let pressured =
            WorkingMemory::from_slots([("timePressure".to_string(), json!(true))]);

        assert!((situational_utility(&op, &calm) - 0.8).abs() < 1e-9);
        assert!((situational_utility(&op, &pressured) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_situational_utility_complexity_bonus() {
        let capable = Operator::new("capable", 0.5).complexity_capable();
        let plain = Operator::new("plain", 0.5);
        let complex_state = WorkingMemory::from_slots([("complexity".to_string(), json!(5.0))]);

        assert!(
            situational_utility(&capable, &complex_state)
                > situational_utility(&plain, &complex_state)
        );
    }

    #[test]
    fn test_registry_proposes_applicable_only() {
        let mut registry = OperatorRegistry::new();
        registry.register(
            Operator::new("needs_flag", 0.5).when(Condition::exists("flag")),
        );
        registry.register(Operator::new("always", 0.5));

        let proposals = registry.propose(&WorkingMemory::new());
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].operator, "always");
    }

    #[test]
    fn test_default_operators_reach_goal_shape() {
        let registry = {
            let mut r = OperatorRegistry::new();
            for op in default_operators() {
                r.register(op);
            }
            r
        };

        let wm = WorkingMemory::new();
        let proposals = registry.propose(&wm);
        assert!(proposals.iter().any(|p| p.operator == "gather_information"));
        assert!(!proposals.iter().any(|p| p.operator == "apply_strategy"));
    }
}
