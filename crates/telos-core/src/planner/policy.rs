//! Policies and candidate generation
//!
//! The candidate set is built from the domain of the transition model:
//! single-action policies for every applicable action, info-gather ->
//! apply compositions for complex goals, and two context heuristics (high
//! uncertainty, high memory load). Applicability filters remove actions
//! that would be no-ops for the current state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::world_model::{ActionModel, WorldModel, WorldModelState};

// ============================================================================
// GOALS AND CONSTRAINTS
// ============================================================================

/// Planning goal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    /// Goal name
    pub name: String,
    /// Goal complexity in [0, 1]; above 0.6 unlocks compositions
    pub complexity: f64,
    /// Goal priority, scales the preference prior
    pub priority: f64,
}

impl Goal {
    /// A goal with the given name and complexity, priority 1.0
    pub fn new(name: impl Into<String>, complexity: f64) -> Self {
        Self {
            name: name.into(),
            complexity: complexity.clamp(0.0, 1.0),
            priority: 1.0,
        }
    }
}

/// Constraints the caller places on planning
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningConstraints {
    /// Force multi-step planning even for simple goals
    #[serde(default)]
    pub require_planning: bool,
    /// Under time pressure learning actions are filtered out
    #[serde(default)]
    pub time_pressure: bool,
}

// ============================================================================
// POLICIES
// ============================================================================

/// One execution record appended when a policy runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyExecution {
    /// When the policy was executed
    pub at: DateTime<Utc>,
    /// Coarse outcome label
    pub outcome: String,
}

/// Ordered action sequence bound to a goal, plus execution history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Goal this policy serves
    pub goal: String,
    /// Ordered action identifiers
    pub actions: Vec<String>,
    /// Execution history
    #[serde(default)]
    pub executions: Vec<PolicyExecution>,
}

impl Policy {
    /// A fresh policy for `goal`
    pub fn new(goal: impl Into<String>, actions: Vec<String>) -> Self {
        Self {
            goal: goal.into(),
            actions,
            executions: Vec::new(),
        }
    }

    /// Record one execution
    pub fn record_execution(&mut self, outcome: impl Into<String>) {
        self.executions.push(PolicyExecution {
            at: Utc::now(),
            outcome: outcome.into(),
        });
    }

    /// Policy length
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the policy is empty
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

// ============================================================================
// APPLICABILITY
// ============================================================================

/// Whether `action` would do useful work in `state`.
/// No-ops are filtered from candidate generation:
/// - focusing when attention is already high
/// - gathering information when uncertainty is already low
/// - learning actions under time pressure
/// - complexity-heavy actions at extreme memory load
pub fn is_applicable(
    name: &str,
    action: &ActionModel,
    state: &WorldModelState,
    constraints: &PlanningConstraints,
) -> bool {
    if name == "focus_attention" && state.get("attention_focus") > 0.8 {
        return false;
    }
    if action.info_gathering && state.get("uncertainty_level") < 0.2 {
        return false;
    }
    if action.learning && constraints.time_pressure {
        return false;
    }
    if action.complexity_heavy && state.get("working_memory_load") > 0.9 {
        return false;
    }
    true
}

// ============================================================================
// CANDIDATE GENERATION
// ============================================================================

/// Generate the candidate policies for one planning request
pub fn generate_candidates(
    model: &WorldModel,
    state: &WorldModelState,
    goal: &Goal,
    constraints: &PlanningConstraints,
) -> Vec<Vec<String>> {
    let applicable: Vec<&String> = model
        .transitions
        .action_names()
        .filter(|name| {
            model
                .transitions
                .get(name)
                .map(|action| is_applicable(name, action, state, constraints))
                .unwrap_or(false)
        })
        .collect();

    let mut candidates: Vec<Vec<String>> = Vec::new();

    // Single-action policies for every applicable action
    for name in &applicable {
        candidates.push(vec![(*name).clone()]);
    }

    // Info-gather -> apply compositions for complex goals
    if goal.complexity > 0.6 || constraints.require_planning {
        let gatherers: Vec<&String> = applicable
            .iter()
            .copied()
            .filter(|name| {
                model
                    .transitions
                    .get(name)
                    .map(|a| a.info_gathering)
                    .unwrap_or(false)
            })
            .collect();
        for gatherer in &gatherers {
            for name in &applicable {
                let is_info = model
                    .transitions
                    .get(*name)
                    .map(|a| a.info_gathering)
                    .unwrap_or(false);
                if !is_info {
                    candidates.push(vec![(*gatherer).clone(), (*name).clone()]);
                }
            }
        }
    }

    // Context heuristics
    if state.get("uncertainty_level") > 0.7 {
        push_if_modelled(
            model,
            &mut candidates,
            &["gather_information", "focus_attention"],
        );
    }
    if state.get("working_memory_load") > 0.7 {
        push_if_modelled(
            model,
            &mut candidates,
            &["reduce_complexity", "apply_strategy"],
        );
    }

    candidates.sort();
    candidates.dedup();
    candidates
}

fn push_if_modelled(model: &WorldModel, candidates: &mut Vec<Vec<String>>, actions: &[&str]) {
    if actions
        .iter()
        .all(|name| model.transitions.get(name).is_some())
    {
        candidates.push(actions.iter().map(|s| s.to_string()).collect());
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(pairs: &[(&str, f64)]) -> WorldModelState {
        let mut state = WorldModelState::default();
        for (name, value) in pairs {
            state.set(name, *value);
        }
        state
    }

    #[test]
    fn test_singles_for_applicable_actions() {
        let model = WorldModel::with_default_actions();
        let state = WorldModelState::default();
        let goal = Goal::new("simple", 0.2);

        let candidates =
            generate_candidates(&model, &state, &goal, &PlanningConstraints::default());
        assert!(candidates.contains(&vec!["gather_information".to_string()]));
        assert!(candidates.contains(&vec!["apply_strategy".to_string()]));
        // Simple goal, no forced planning: no compositions
        assert!(candidates.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn test_complex_goal_adds_compositions() {
        let model = WorldModel::with_default_actions();
        let state = WorldModelState::default();
        let goal = Goal::new("complex", 0.8);

        let candidates =
            generate_candidates(&model, &state, &goal, &PlanningConstraints::default());
        assert!(candidates
            .contains(&vec!["gather_information".to_string(), "apply_strategy".to_string()]));
    }

    #[test]
    fn test_high_uncertainty_heuristic() {
        let model = WorldModel::with_default_actions();
        let state = state_with(&[("uncertainty_level", 0.85)]);
        let goal = Goal::new("any", 0.1);

        let candidates =
            generate_candidates(&model, &state, &goal, &PlanningConstraints::default());
        assert!(candidates
            .contains(&vec!["gather_information".to_string(), "focus_attention".to_string()]));
    }

    #[test]
    fn test_high_load_heuristic_and_complexity_filter() {
        let model = WorldModel::with_default_actions();
        let state = state_with(&[("working_memory_load", 0.95)]);
        let goal = Goal::new("any", 0.1);

        let candidates =
            generate_candidates(&model, &state, &goal, &PlanningConstraints::default());
        // The heuristic pair is still proposed
        assert!(candidates
            .contains(&vec!["reduce_complexity".to_string(), "apply_strategy".to_string()]));
        // But the single complexity-heavy action is filtered at this load
        assert!(!candidates.contains(&vec!["apply_strategy".to_string()]));
    }

    #[test]
    fn test_informed_state_filters_gathering() {
        let model = WorldModel::with_default_actions();
        let state = state_with(&[("uncertainty_level", 0.1)]);
        let goal = Goal::new("any", 0.9);

        let candidates =
            generate_candidates(&model, &state, &goal, &PlanningConstraints::default());
        assert!(!candidates
            .iter()
            .any(|c| c.contains(&"gather_information".to_string())));
    }

    #[test]
    fn test_time_pressure_filters_learning() {
        let model = WorldModel::with_default_actions();
        let state = WorldModelState::default();
        let goal = Goal::new("any", 0.1);
        let constraints = PlanningConstraints {
            time_pressure: true,
            ..Default::default()
        };

        let candidates = generate_candidates(&model, &state, &goal, &constraints);
        assert!(!candidates.contains(&vec!["learn_pattern".to_string()]));
    }

    #[test]
    fn test_focused_state_filters_focus() {
        let model = WorldModel::with_default_actions();
        let state = state_with(&[("attention_focus", 0.9)]);
        let goal = Goal::new("any", 0.1);

        let candidates =
            generate_candidates(&model, &state, &goal, &PlanningConstraints::default());
        assert!(!candidates.contains(&vec!["focus_attention".to_string()]));
    }
}
