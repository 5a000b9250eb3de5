//! Generative world model
//!
//! Named state variables with declared ranges, a transition model mapping
//! actions to effects with base probabilities and energy costs, an
//! observation model carrying per-variable precision, and a causal model of
//! direct cause -> effect influences. Indirect causal effects propagate at a
//! fixed 0.3 damping of the triggering direct effect.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Damping applied to indirect (second-hop) causal effects.
/// Treated as a tuned hyperparameter of the generative model.
pub const CAUSAL_DAMPING: f64 = 0.3;

/// Learning rate for transition probabilities and effect magnitudes
pub const TRANSITION_LEARNING_RATE: f64 = 0.05;

/// Learning rate for causal edge strengths
pub const CAUSAL_LEARNING_RATE: f64 = 0.1;

/// Bounds on transition probabilities under learning
pub const TRANSITION_PROB_BOUNDS: (f64, f64) = (0.1, 0.95);

/// Bounds on observation precision under learning
pub const PRECISION_BOUNDS: (f64, f64) = (0.5, 3.0);

/// Learning history bound; the oldest 100 entries drop on overflow
pub const HISTORY_LIMIT: usize = 1000;

/// Entries dropped when the history overflows
pub const HISTORY_DROP: usize = 100;

// ============================================================================
// STATE
// ============================================================================

/// Closed numeric range for one state variable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableRange {
    /// Inclusive lower bound
    pub min: f64,
    /// Inclusive upper bound
    pub max: f64,
}

impl VariableRange {
    /// Unit interval
    pub const UNIT: VariableRange = VariableRange { min: 0.0, max: 1.0 };

    /// Clamp a value into this range
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// A mapping from state variable names to values in declared ranges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldModelState {
    values: BTreeMap<String, f64>,
    ranges: BTreeMap<String, VariableRange>,
}

impl WorldModelState {
    /// Empty state; unknown variables default to the unit range
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            ranges: BTreeMap::new(),
        }
    }

    /// Declare a variable with its range and initial value
    pub fn declare(&mut self, name: impl Into<String>, range: VariableRange, initial: f64) {
        let name = name.into();
        self.ranges.insert(name.clone(), range);
        self.values.insert(name, range.clamp(initial));
    }

    /// Read a variable; declared variables fall back to their range
    /// midpoint, undeclared ones to 0.5
    pub fn get(&self, name: &str) -> f64 {
        if let Some(value) = self.values.get(name) {
            return *value;
        }
        match self.ranges.get(name) {
            Some(range) => (range.min + range.max) / 2.0,
            None => 0.5,
        }
    }

    /// Write a variable, clamping into its declared range
    pub fn set(&mut self, name: &str, value: f64) {
        let range = self
            .ranges
            .get(name)
            .copied()
            .unwrap_or(VariableRange::UNIT);
        self.values.insert(name.to_string(), range.clamp(value));
    }

    /// Add a delta to a variable, clamping into range
    pub fn nudge(&mut self, name: &str, delta: f64) {
        let current = self.get(name);
        self.set(name, current + delta);
    }

    /// The declared range for a variable, when known
    pub fn range_of(&self, name: &str) -> Option<VariableRange> {
        self.ranges.get(name).copied()
    }

    /// Iterate variable values in deterministic order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.values.iter()
    }
}

impl Default for WorldModelState {
    fn default() -> Self {
        let mut state = Self::new();
        state.declare("working_memory_load", VariableRange::UNIT, 0.3);
        state.declare("uncertainty_level", VariableRange::UNIT, 0.5);
        state.declare("goal_progress", VariableRange::UNIT, 0.0);
        state.declare("attention_focus", VariableRange::UNIT, 0.5);
        state.declare("knowledge_level", VariableRange::UNIT, 0.5);
        state.declare(
            "network_latency",
            VariableRange {
                min: 10.0,
                max: 200.0,
            },
            50.0,
        );
        state
    }
}

// ============================================================================
// TRANSITION MODEL
// ============================================================================

/// Modelled consequences of one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionModel {
    /// Variable deltas applied on success
    pub effects: BTreeMap<String, f64>,
    /// Success probability in a neutral state
    pub base_probability: f64,
    /// Energy cost of taking the action
    pub energy_cost: f64,
    /// Whether the action gathers information (epistemic bonus 0.3,
    /// no uncertainty penalty on success probability)
    #[serde(default)]
    pub info_gathering: bool,
    /// Whether the action is a learning action (epistemic bonus 0.2,
    /// filtered under time pressure)
    #[serde(default)]
    pub learning: bool,
    /// Whether the action is too heavy to attempt at extreme load
    #[serde(default)]
    pub complexity_heavy: bool,
}

/// Mapping from action identifiers to their modelled consequences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionModel {
    actions: BTreeMap<String, ActionModel>,
}

impl TransitionModel {
    /// Read an action model
    pub fn get(&self, action: &str) -> Option<&ActionModel> {
        self.actions.get(action)
    }

    /// Mutable access for learning updates
    pub fn get_mut(&mut self, action: &str) -> Option<&mut ActionModel> {
        self.actions.get_mut(action)
    }

    /// Register (or replace) an action model
    pub fn register(&mut self, name: impl Into<String>, model: ActionModel) {
        self.actions.insert(name.into(), model);
    }

    /// Action identifiers in deterministic order
    pub fn action_names(&self) -> impl Iterator<Item = &String> {
        self.actions.keys()
    }

    /// Number of modelled actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no actions are modelled
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

// ============================================================================
// OBSERVATION MODEL
// ============================================================================

/// Per-variable observation precision, adjusted by prediction error
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationModel {
    precision: BTreeMap<String, f64>,
}

impl ObservationModel {
    /// Precision for a variable; defaults to 1.0
    pub fn precision(&self, variable: &str) -> f64 {
        self.precision.get(variable).copied().unwrap_or(1.0)
    }

    /// Shift precision by `delta`, clamped into [0.5, 3.0]
    pub fn adjust(&mut self, variable: &str, delta: f64) {
        let current = self.precision(variable);
        let (lo, hi) = PRECISION_BOUNDS;
        self.precision
            .insert(variable.to_string(), (current + delta).clamp(lo, hi));
    }
}

// ============================================================================
// CAUSAL MODEL
// ============================================================================

/// One direct causal influence between state variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalInfluence {
    /// Affected variable
    pub target: String,
    /// Influence weight; sign carries direction
    pub weight: f64,
}

/// A learned causal edge between named phenomena
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalEdgeStat {
    /// Learned strength in [0, 1]
    pub strength: f64,
    /// Times this edge has been observed
    pub observations: u64,
}

/// Direct and indirect cause -> effect structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalModel {
    /// Direct influences between state variables
    direct: BTreeMap<String, Vec<CausalInfluence>>,
    /// Learned edges, keyed `cause->effect`
    edges: BTreeMap<String, CausalEdgeStat>,
    /// Temporal index, keyed `cause->effect@delay`
    temporal: BTreeMap<String, CausalEdgeStat>,
    /// Observation counters per phenomenon
    node_observations: BTreeMap<String, u64>,
}

fn edge_key(cause: &str, effect: &str) -> String {
    format!("{cause}->{effect}")
}

impl CausalModel {
    /// Register a direct influence between state variables
    pub fn register_influence(&mut self, cause: impl Into<String>, influence: CausalInfluence) {
        self.direct.entry(cause.into()).or_default().push(influence);
    }

    /// Direct influences of a variable
    pub fn influences_of(&self, cause: &str) -> &[CausalInfluence] {
        self.direct.get(cause).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Learned edge stat, if observed before
    pub fn edge(&self, cause: &str, effect: &str) -> Option<&CausalEdgeStat> {
        self.edges.get(&edge_key(cause, effect))
    }

    /// Temporal edge stat for a specific delay
    pub fn temporal_edge(&self, cause: &str, effect: &str, delay: u32) -> Option<&CausalEdgeStat> {
        self.temporal
            .get(&format!("{}@{delay}", edge_key(cause, effect)))
    }

    /// Observation counter for a phenomenon
    pub fn node_observations(&self, node: &str) -> u64 {
        self.node_observations.get(node).copied().unwrap_or(0)
    }

    /// Update (or create) an edge toward an observed strength:
    /// `s <- s + alpha * (strength - s)`; bumps both node counters and the
    /// temporal index when a delay is supplied.
    pub fn observe_edge(&mut self, cause: &str, effect: &str, strength: f64, delay: Option<u32>) {
        let strength = strength.clamp(0.0, 1.0);
        let entry = self.edges.entry(edge_key(cause, effect)).or_default();
        entry.strength += CAUSAL_LEARNING_RATE * (strength - entry.strength);
        entry.observations += 1;

        *self
            .node_observations
            .entry(cause.to_string())
            .or_default() += 1;
        *self
            .node_observations
            .entry(effect.to_string())
            .or_default() += 1;

        if let Some(delay) = delay {
            let temporal = self
                .temporal
                .entry(format!("{}@{delay}", edge_key(cause, effect)))
                .or_default();
            temporal.strength += CAUSAL_LEARNING_RATE * (strength - temporal.strength);
            temporal.observations += 1;
        }
    }
}

// ============================================================================
// LEARNING HISTORY
// ============================================================================

/// One observed `(action, outcome)` pair retained for inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningEvent {
    /// The executed action
    pub action: String,
    /// Whether it succeeded
    pub success: bool,
    /// When the outcome was observed
    pub at: DateTime<Utc>,
}

// ============================================================================
// WORLD MODEL
// ============================================================================

/// The complete generative model: state, transitions, observation precision,
/// causal structure and a bounded learning history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldModel {
    /// Current believed state
    pub state: WorldModelState,
    /// Action consequences
    pub transitions: TransitionModel,
    /// Observation precision
    pub observation: ObservationModel,
    /// Causal structure
    pub causal: CausalModel,
    /// Bounded learning history
    #[serde(default)]
    pub history: VecDeque<LearningEvent>,
}

impl WorldModel {
    /// Empty model with the default state variables
    pub fn new() -> Self {
        Self {
            state: WorldModelState::default(),
            transitions: TransitionModel::default(),
            observation: ObservationModel::default(),
            causal: CausalModel::default(),
            history: VecDeque::new(),
        }
    }

    /// The baseline cognitive action set and causal structure
    pub fn with_default_actions() -> Self {
        let mut model = Self::new();

        let effects = |pairs: &[(&str, f64)]| -> BTreeMap<String, f64> {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect()
        };

        model.transitions.register(
            "gather_information",
            ActionModel {
                effects: effects(&[
                    ("uncertainty_level", -0.3),
                    ("knowledge_level", 0.2),
                    ("working_memory_load", 0.1),
                ]),
                base_probability: 0.9,
                energy_cost: 0.2,
                info_gathering: true,
                learning: false,
                complexity_heavy: false,
            },
        );
        model.transitions.register(
            "apply_strategy",
            ActionModel {
                effects: effects(&[("goal_progress", 0.6), ("working_memory_load", 0.2)]),
                base_probability: 0.7,
                energy_cost: 0.5,
                info_gathering: false,
                learning: false,
                complexity_heavy: true,
            },
        );
        model.transitions.register(
            "focus_attention",
            ActionModel {
                effects: effects(&[("attention_focus", 0.4), ("working_memory_load", -0.1)]),
                base_probability: 0.8,
                energy_cost: 0.3,
                info_gathering: false,
                learning: false,
                complexity_heavy: false,
            },
        );
        model.transitions.register(
            "reduce_complexity",
            ActionModel {
                effects: effects(&[("working_memory_load", -0.3), ("goal_progress", 0.1)]),
                base_probability: 0.8,
                energy_cost: 0.4,
                info_gathering: false,
                learning: false,
                complexity_heavy: false,
            },
        );
        model.transitions.register(
            "learn_pattern",
            ActionModel {
                effects: effects(&[("knowledge_level", 0.3), ("uncertainty_level", -0.2)]),
                base_probability: 0.75,
                energy_cost: 0.6,
                info_gathering: false,
                learning: true,
                complexity_heavy: false,
            },
        );

        model.causal.register_influence(
            "uncertainty_level",
            CausalInfluence::new("goal_progress", -0.1),
        );
        model.causal.register_influence(
            "working_memory_load",
            CausalInfluence::new("goal_progress", -0.1),
        );
        model.causal.register_influence(
            "knowledge_level",
            CausalInfluence::new("uncertainty_level", -0.2),
        );

        model
    }

    /// Success probability of `action` in `state`: the base probability,
    /// penalised by uncertainty (except for info-gathering actions) and by
    /// extreme load, clamped to [0.05, 0.95].
    pub fn success_probability(&self, action: &ActionModel, state: &WorldModelState) -> f64 {
        let mut p = action.base_probability;
        if !action.info_gathering {
            p -= 0.3 * state.get("uncertainty_level");
        }
        p -= 0.2 * (state.get("working_memory_load") - 0.7).max(0.0);
        p.clamp(0.05, 0.95)
    }

    /// Expected next state after `action`: success-weighted direct effects,
    /// then indirect causal propagation at [`CAUSAL_DAMPING`], all clamped
    /// into declared ranges.
    pub fn apply_expected_transition(
        &self,
        action_name: &str,
        state: &WorldModelState,
    ) -> WorldModelState {
        let Some(action) = self.transitions.get(action_name) else {
            return state.clone();
        };

        let p = self.success_probability(action, state);
        let mut next = state.clone();
        let mut applied: Vec<(String, f64)> = Vec::new();

        for (variable, effect) in &action.effects {
            let delta = effect * p;
            next.nudge(variable, delta);
            applied.push((variable.clone(), delta));
        }

        for (variable, delta) in applied {
            for influence in self.causal.influences_of(&variable) {
                next.nudge(&influence.target, delta * influence.weight * CAUSAL_DAMPING);
            }
        }

        next
    }

    /// Record a learning event, enforcing the history bound
    pub fn push_history(&mut self, event: LearningEvent) {
        self.history.push_back(event);
        if self.history.len() > HISTORY_LIMIT {
            self.history.drain(..HISTORY_DROP);
        }
    }
}

impl Default for WorldModel {
    fn default() -> Self {
        Self::with_default_actions()
    }
}

impl CausalInfluence {
    /// Create an influence, keeping the weight in [-1, 1]
    pub fn new(target: impl Into<String>, weight: f64) -> Self {
        Self {
            target: target.into(),
            weight: weight.clamp(-1.0, 1.0),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_clamps_into_declared_range() {
        let mut state = WorldModelState::default();
        state.set("working_memory_load", 1.7);
        assert_eq!(state.get("working_memory_load"), 1.0);

        state.set("network_latency", 5.0);
        assert_eq!(state.get("network_latency"), 10.0);
        state.set("network_latency", 900.0);
        assert_eq!(state.get("network_latency"), 200.0);
    }

    #[test]
    fn test_undeclared_variable_defaults() {
        let state = WorldModelState::new();
        assert_eq!(state.get("mystery"), 0.5);
    }

    #[test]
    fn test_success_probability_modulation() {
        let model = WorldModel::with_default_actions();
        let mut state = WorldModelState::default();
        state.set("uncertainty_level", 0.85);
        state.set("working_memory_load", 0.2);

        let apply = model.transitions.get("apply_strategy").unwrap();
        let gather = model.transitions.get("gather_information").unwrap();

        // Uncertainty penalises ordinary actions but not info gathering
        assert!((model.success_probability(apply, &state) - 0.445).abs() < 1e-9);
        assert!((model.success_probability(gather, &state) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_expected_transition_weights_by_success() {
        let model = WorldModel::with_default_actions();
        let mut state = WorldModelState::default();
        state.set("uncertainty_level", 0.85);

        let next = model.apply_expected_transition("gather_information", &state);
        // 0.9 success probability scales the -0.3 effect
        assert!((next.get("uncertainty_level") - (0.85 - 0.27)).abs() < 0.02);
    }

    #[test]
    fn test_indirect_effects_damped() {
        let mut model = WorldModel::new();
        model.transitions.register(
            "push",
            ActionModel {
                effects: [("working_memory_load".to_string(), 0.5)].into_iter().collect(),
                base_probability: 0.95,
                energy_cost: 0.1,
                info_gathering: true,
                learning: false,
                complexity_heavy: false,
            },
        );
        model.causal.register_influence(
            "working_memory_load",
            CausalInfluence::new("goal_progress", -1.0),
        );
        let mut state = WorldModelState::default();
        state.set("goal_progress", 0.5);

        let next = model.apply_expected_transition("push", &state);
        let direct_delta = 0.5 * 0.95;
        let expected = 0.5 - direct_delta * 1.0 * CAUSAL_DAMPING;
        assert!((next.get("goal_progress") - expected).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_action_transition_is_identity() {
        let model = WorldModel::with_default_actions();
        let state = WorldModelState::default();
        let next = model.apply_expected_transition("summon_demon", &state);
        assert_eq!(next, state);
    }

    #[test]
    fn test_causal_edge_learning() {
        let mut causal = CausalModel::default();
        causal.observe_edge("latency_injection", "query_slowdown", 0.8, Some(2));

        let edge = causal.edge("latency_injection", "query_slowdown").unwrap();
        assert!((edge.strength - 0.08).abs() < 1e-9);
        assert_eq!(edge.observations, 1);
        assert_eq!(causal.node_observations("latency_injection"), 1);
        assert!(causal
            .temporal_edge("latency_injection", "query_slowdown", 2)
            .is_some());
    }

    #[test]
    fn test_precision_clamped() {
        let mut observation = ObservationModel::default();
        for _ in 0..100 {
            observation.adjust("goal_progress", 0.1);
        }
        assert_eq!(observation.precision("goal_progress"), 3.0);
        for _ in 0..100 {
            observation.adjust("goal_progress", -0.1);
        }
        assert_eq!(observation.precision("goal_progress"), 0.5);
    }

    #[test]
    fn test_history_bound() {
        let mut model = WorldModel::new();
        for i in 0..(HISTORY_LIMIT + 1) {
            model.push_history(LearningEvent {
                action: format!("a{i}"),
                success: true,
                at: Utc::now(),
            });
        }
        assert_eq!(model.history.len(), HISTORY_LIMIT + 1 - HISTORY_DROP);
        // The oldest entries are the ones dropped
        assert_eq!(model.history.front().unwrap().action, "a100");
    }

    #[test]
    fn test_model_serializes_for_snapshot() {
        let model = WorldModel::with_default_actions();
        let json = serde_json::to_string(&model).unwrap();
        let restored: WorldModel = serde_json::from_str(&json).unwrap();
        assert_eq!(model, restored);
    }
}
