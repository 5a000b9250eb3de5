//! Expected Free Energy scoring
//!
//! EFE = expected surprise - epistemic value, lower is better. Expected
//! surprise decomposes the active-inference way: ambiguity (outcome
//! self-information accumulated over the rollout) plus risk (divergence of
//! the predicted terminal state from the goal prior). The epistemic bonus
//! rewards information-gathering and learning actions, scaled by how much
//! uncertainty there is to resolve.
//!
//! Everything here is a pure function of the world-model snapshot: the same
//! policy evaluated twice on the same snapshot scores identically.

use serde::{Deserialize, Serialize};

use super::policy::Goal;
use super::world_model::{WorldModel, WorldModelState};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Precision of the goal prior; scales the risk term
pub const GOAL_PRECISION: f64 = 2.0;

/// Epistemic bonus for information-gathering actions
const INFO_BONUS: f64 = 0.3;

/// Epistemic bonus for learning actions
const LEARNING_BONUS: f64 = 0.2;

/// Epistemic bonus per extra step in a multi-step policy
const STEP_BONUS: f64 = 0.1;

/// Whole-step surprise modulation above this uncertainty
const HIGH_UNCERTAINTY: f64 = 0.7;

/// Overload surprise doubles below this load (an unexpected overload)
const LOW_LOAD: f64 = 0.3;

// ============================================================================
// OUTCOMES
// ============================================================================

/// Predicted outcomes of one action step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictedOutcome {
    /// The action lands its modelled effects
    Success,
    /// Working memory saturates mid-action
    CognitiveOverload,
    /// Attention drifts and the action misfires
    DistractionFailure,
    /// Plain failure
    Failure,
    /// The model cannot say
    Unknown,
}

impl PredictedOutcome {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictedOutcome::Success => "success",
            PredictedOutcome::CognitiveOverload => "cognitive_overload",
            PredictedOutcome::DistractionFailure => "distraction_failure",
            PredictedOutcome::Failure => "failure",
            PredictedOutcome::Unknown => "unknown",
        }
    }
}

/// State-modulated outcome distribution for one action step.
/// Unknown actions yield a spread dominated by `Unknown` - surprising, but
/// never an error.
pub fn outcome_distribution(
    model: &WorldModel,
    action_name: &str,
    state: &WorldModelState,
) -> Vec<(PredictedOutcome, f64)> {
    let Some(action) = model.transitions.get(action_name) else {
        return vec![
            (PredictedOutcome::Unknown, 0.6),
            (PredictedOutcome::Failure, 0.4),
        ];
    };

    let p_success = model.success_probability(action, state);
    let residual = 1.0 - p_success;

    let load = state.get("working_memory_load");
    let focus = state.get("attention_focus");

    let w_overload = 0.1 + 0.5 * (load - 0.5).max(0.0);
    let w_distraction = 0.1 + 0.5 * (0.5 - focus).max(0.0);
    let w_failure = 0.2;
    let w_unknown = 0.05;
    let w_total = w_overload + w_distraction + w_failure + w_unknown;

    vec![
        (PredictedOutcome::Success, p_success),
        (
            PredictedOutcome::CognitiveOverload,
            residual * w_overload / w_total,
        ),
        (
            PredictedOutcome::DistractionFailure,
            residual * w_distraction / w_total,
        ),
        (PredictedOutcome::Failure, residual * w_failure / w_total),
        (PredictedOutcome::Unknown, residual * w_unknown / w_total),
    ]
}

// ============================================================================
// EVALUATION
// ============================================================================

/// Full scoring of one candidate policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvaluation {
    /// The evaluated action sequence
    pub actions: Vec<String>,
    /// Accumulated outcome ambiguity (base-10 self-information)
    pub expected_surprise: f64,
    /// Accumulated outcome entropy (nats)
    pub entropy: f64,
    /// Divergence of the predicted terminal state from the goal prior
    pub risk: f64,
    /// Epistemic bonus
    pub epistemic_value: f64,
    /// Total EFE; lower is better
    pub expected_free_energy: f64,
    /// Most probable outcome of the final step
    pub predicted_outcome: PredictedOutcome,
    /// Predicted terminal state
    pub predicted_state: WorldModelState,
    /// Forecast drop in uncertainty over the rollout
    pub uncertainty_reduction: f64,
}

/// Simulate a policy forward from `state` and score it
pub fn evaluate_policy(
    model: &WorldModel,
    actions: &[String],
    state: &WorldModelState,
    goal: &Goal,
) -> PolicyEvaluation {
    let mut sim = state.clone();
    let mut surprise = 0.0;
    let mut entropy = 0.0;
    let mut epistemic_base = 0.0;
    let mut final_outcome = PredictedOutcome::Unknown;

    for action_name in actions {
        let distribution = outcome_distribution(model, action_name, &sim);

        let load = sim.get("working_memory_load");
        let mut step_surprise = 0.0;
        for (outcome, p) in &distribution {
            if *p <= 0.0 {
                continue;
            }
            let mut term = p * (-p.log10());
            // An overload in a lightly-loaded state is doubly surprising
            if *outcome == PredictedOutcome::CognitiveOverload && load < LOW_LOAD {
                term *= 2.0;
            }
            step_surprise += term;
            entropy += p * (-p.ln());
        }
        if sim.get("uncertainty_level") > HIGH_UNCERTAINTY {
            step_surprise *= 1.5;
        }
        surprise += step_surprise;

        if let Some(action) = model.transitions.get(action_name) {
            if action.info_gathering {
                epistemic_base += INFO_BONUS;
            }
            if action.learning {
                epistemic_base += LEARNING_BONUS;
            }
        }

        final_outcome = distribution
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(outcome, _)| *outcome)
            .unwrap_or(PredictedOutcome::Unknown);

        sim = model.apply_expected_transition(action_name, &sim);
    }

    if actions.len() > 1 {
        epistemic_base += STEP_BONUS * (actions.len() - 1) as f64;
    }

    let uncertainty_reduction =
        (state.get("uncertainty_level") - sim.get("uncertainty_level")).max(0.0);
    let epistemic_value =
        epistemic_base * (state.get("uncertainty_level") + uncertainty_reduction);

    let risk =
        GOAL_PRECISION * goal.priority * (1.0 - sim.get("goal_progress")).clamp(0.0, 1.0);

    PolicyEvaluation {
        actions: actions.to_vec(),
        expected_surprise: surprise,
        entropy,
        risk,
        epistemic_value,
        expected_free_energy: surprise + risk - epistemic_value,
        predicted_outcome: final_outcome,
        predicted_state: sim,
        uncertainty_reduction,
    }
}

/// Confidence in a chosen policy: 0.5 base, bonuses for very low EFE and
/// short policies, a penalty for long ones, clamped to [0, 1]
pub fn policy_confidence(efe: f64, policy_len: usize) -> f64 {
    let mut confidence: f64 = 0.5;
    if efe < 0.1 {
        confidence += 0.3;
    }
    if efe < 0.05 {
        confidence += 0.2;
    }
    if policy_len <= 2 {
        confidence += 0.1;
    }
    if policy_len > 4 {
        confidence -= 0.1;
    }
    confidence.clamp(0.0, 1.0)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn uncertain_state() -> WorldModelState {
        let mut state = WorldModelState::default();
        state.set("uncertainty_level", 0.85);
        state.set("working_memory_load", 0.2);
        state.set("goal_progress", 0.0);
        state
    }

    #[test]
    fn test_distribution_sums_to_one() {
        let model = WorldModel::with_default_actions();
        let dist = outcome_distribution(&model, "apply_strategy", &uncertain_state());
        let total: f64 = dist.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_action_distribution() {
        let model = WorldModel::with_default_actions();
        let dist = outcome_distribution(&model, "summon_demon", &WorldModelState::default());
        assert_eq!(dist[0].0, PredictedOutcome::Unknown);
        assert!(dist[0].1 > 0.5);
    }

    #[test]
    fn test_efe_is_deterministic() {
        let model = WorldModel::with_default_actions();
        let state = uncertain_state();
        let goal = Goal::new("g", 0.8);
        let actions = vec![
            "gather_information".to_string(),
            "apply_strategy".to_string(),
        ];

        let a = evaluate_policy(&model, &actions, &state, &goal);
        let b = evaluate_policy(&model, &actions, &state, &goal);
        assert_eq!(a.expected_free_energy, b.expected_free_energy);
        assert_eq!(a.predicted_state, b.predicted_state);
    }

    #[test]
    fn test_info_gathering_beats_blind_apply_when_uncertain() {
        let model = WorldModel::with_default_actions();
        let state = uncertain_state();
        let goal = Goal::new("g", 0.8);

        let two_step = evaluate_policy(
            &model,
            &[
                "gather_information".to_string(),
                "apply_strategy".to_string(),
            ],
            &state,
            &goal,
        );
        let single = evaluate_policy(&model, &["apply_strategy".to_string()], &state, &goal);

        assert!(two_step.expected_free_energy < single.expected_free_energy);
        assert!(two_step.uncertainty_reduction > 0.0);
    }

    #[test]
    fn test_high_uncertainty_modulates_surprise() {
        let model = WorldModel::with_default_actions();
        let goal = Goal::new("g", 0.5);

        let mut calm = WorldModelState::default();
        calm.set("uncertainty_level", 0.5);
        let mut tense = WorldModelState::default();
        tense.set("uncertainty_level", 0.85);

        let calm_eval =
            evaluate_policy(&model, &["focus_attention".to_string()], &calm, &goal);
        let tense_eval =
            evaluate_policy(&model, &["focus_attention".to_string()], &tense, &goal);

        assert!(tense_eval.expected_surprise > calm_eval.expected_surprise);
    }

    #[test]
    fn test_epistemic_bonus_scales_with_uncertainty() {
        let model = WorldModel::with_default_actions();
        let goal = Goal::new("g", 0.5);
        let actions = vec!["gather_information".to_string()];

        let mut low = WorldModelState::default();
        low.set("uncertainty_level", 0.3);
        let mut high = WorldModelState::default();
        high.set("uncertainty_level", 0.9);

        let low_eval = evaluate_policy(&model, &actions, &low, &goal);
        let high_eval = evaluate_policy(&model, &actions, &high, &goal);

        assert!(high_eval.epistemic_value > low_eval.epistemic_value);
    }

    #[test]
    fn test_risk_falls_with_predicted_progress() {
        let model = WorldModel::with_default_actions();
        let goal = Goal::new("g", 0.5);
        let state = WorldModelState::default();

        let progressing =
            evaluate_policy(&model, &["apply_strategy".to_string()], &state, &goal);
        let stalling =
            evaluate_policy(&model, &["focus_attention".to_string()], &state, &goal);

        assert!(progressing.risk < stalling.risk);
    }

    #[test]
    fn test_confidence_shape() {
        assert!((policy_confidence(0.5, 2) - 0.6).abs() < 1e-9);
        assert!((policy_confidence(0.04, 2) - 1.0_f64.min(0.5 + 0.3 + 0.2 + 0.1)).abs() < 1e-9);
        assert!((policy_confidence(0.5, 5) - 0.4).abs() < 1e-9);
    }
}
