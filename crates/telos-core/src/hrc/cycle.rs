//! The decision cycle: Elaborate -> Propose -> Select -> Apply -> Learn
//!
//! Working memory, productions and the impasse history are owned by the
//! cycle invocation; the operator registry is read-shared, written only for
//! reinforcement updates. Missing operators are never an error - a cycle
//! that cannot progress reports an impasse instead.

use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::impasse::{GoalStack, Impasse, ImpasseKind};
use super::operators::{OperatorRegistry, Proposal};
use super::productions::{ProductionMemory, RECOMMENDATION_SLOT};
use super::working_memory::WorkingMemory;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Utilities closer than this count as tied
const UTILITY_EPSILON: f64 = 1e-9;

/// Slot naming the problem space of the active subgoal
pub const PROBLEM_SPACE_SLOT: &str = "problemSpace";

/// Slot the controller checks for goal satisfaction
pub const GOAL_SLOT: &str = "goalAchieved";

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Decision cycle parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HrcConfig {
    /// Upper bound on cycles per invocation
    pub max_elaboration_cycles: u32,
    /// Reinforcement learning rate (alpha)
    pub learning_rate: f64,
    /// Goal stack bound
    pub max_subgoals: usize,
    /// Whether the Learn phase synthesises chunks
    pub chunking_enabled: bool,
    /// Minimum slot count for a state to be worth chunking
    pub min_chunk_slots: usize,
}

impl Default for HrcConfig {
    fn default() -> Self {
        Self {
            max_elaboration_cycles: 100,
            learning_rate: 0.1,
            max_subgoals: 10,
            chunking_enabled: true,
            min_chunk_slots: 4,
        }
    }
}

// ============================================================================
// OUTCOME
// ============================================================================

/// Result of one `run_decision_cycle` invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleOutcome {
    /// Working memory after the final cycle
    pub final_state: WorkingMemory,
    /// Cycles executed
    pub cycles: u32,
    /// First impasse encountered, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impasse: Option<Impasse>,
    /// Last successfully applied operator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_operator: Option<String>,
}

/// Learning query emitted by the chaos conductor after a failed experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningQuery {
    /// Experiment that revealed the weakness
    pub experiment_id: String,
    /// Observed failure mode
    pub failure_mode: String,
    /// When the query was raised
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct AccuracyCounters {
    resolved_impasses: u64,
    unresolved_impasses: u64,
}

// ============================================================================
// CONTROLLER
// ============================================================================

/// The hierarchical cognitive controller
pub struct HrcController {
    config: HrcConfig,
    registry: RwLock<OperatorRegistry>,
    productions: Mutex<ProductionMemory>,
    impasse_history: Mutex<Vec<Impasse>>,
    accuracy: Mutex<AccuracyCounters>,
    learning_queries: Mutex<Vec<LearningQuery>>,
}

impl Default for HrcController {
    fn default() -> Self {
        Self::new(HrcConfig::default())
    }
}

impl HrcController {
    /// Create a controller with an empty registry
    pub fn new(config: HrcConfig) -> Self {
        Self {
            config,
            registry: RwLock::new(OperatorRegistry::new()),
            productions: Mutex::new(ProductionMemory::new()),
            impasse_history: Mutex::new(Vec::new()),
            accuracy: Mutex::new(AccuracyCounters::default()),
            learning_queries: Mutex::new(Vec::new()),
        }
    }

    /// Register an operator
    pub fn register_operator(&self, operator: super::operators::Operator) {
        if let Ok(mut registry) = self.registry.write() {
            registry.register(operator);
        }
    }

    /// Remove an operator by name
    pub fn unregister_operator(&self, name: &str) {
        if let Ok(mut registry) = self.registry.write() {
            registry.unregister(name);
        }
    }

    /// Current utility of a registered operator
    pub fn operator_utility(&self, name: &str) -> Option<f64> {
        self.registry.read().ok()?.get(name).map(|op| op.utility)
    }

    /// Number of learned productions
    pub fn production_count(&self) -> usize {
        self.productions.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Snapshot of the impasse history
    pub fn impasse_history(&self) -> Vec<Impasse> {
        self.impasse_history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Fraction of impasses that were resolved by subgoaling; 1.0 before
    /// any impasse has occurred. Read by the chaos metric provider.
    pub fn reasoning_accuracy(&self) -> f64 {
        let counters = match self.accuracy.lock() {
            Ok(c) => c,
            Err(_) => return 1.0,
        };
        let total = counters.resolved_impasses + counters.unresolved_impasses;
        if total == 0 {
            1.0
        } else {
            counters.resolved_impasses as f64 / total as f64
        }
    }

    /// Record a learning query (chaos conductor weakness report)
    pub fn enqueue_learning_query(&self, experiment_id: &str, failure_mode: &str) {
        tracing::info!(experiment_id, failure_mode, "learning query enqueued");
        if let Ok(mut queries) = self.learning_queries.lock() {
            queries.push(LearningQuery {
                experiment_id: experiment_id.to_string(),
                failure_mode: failure_mode.to_string(),
                at: Utc::now(),
            });
        }
    }

    /// Pending learning queries
    pub fn learning_queries(&self) -> Vec<LearningQuery> {
        self.learning_queries
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }

    /// Run the five-phase decision loop from `initial_state`
    pub fn run_decision_cycle(&self, initial_state: WorkingMemory) -> CycleOutcome {
        let mut wm = initial_state;
        let mut goal_stack = GoalStack::new(self.config.max_subgoals);
        let mut first_impasse: Option<Impasse> = None;
        let mut selected: Option<String> = None;
        let mut cycles = 0;

        // Productions are owned by the invocation
        let mut productions = match self.productions.lock() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        };

        for cycle in 1..=self.config.max_elaboration_cycles {
            cycles = cycle;

            if wm.get_bool(GOAL_SLOT) {
                break;
            }

            // Phase 1: Elaborate (single pass)
            productions.elaborate(&mut wm);

            // Phase 2: Propose
            let proposals = match self.registry.read() {
                Ok(registry) => registry.propose(&wm),
                Err(_) => Vec::new(),
            };

            if proposals.is_empty() {
                let resolved = self.raise_impasse(
                    ImpasseKind::OperatorNoChange,
                    cycle,
                    "no operator proposed".to_string(),
                    &mut goal_stack,
                    &mut wm,
                    &mut first_impasse,
                );
                if !resolved {
                    break;
                }
                continue;
            }

            // Phase 3: Select
            let chosen = match self.select(&proposals, &wm, &productions) {
                Selection::Operator(name) => name,
                Selection::Tie(tied) => {
                    let names: Vec<&str> = tied.iter().map(|p| p.operator.as_str()).collect();
                    let detail = format!("tied operators: {}", names.join(", "));
                    let resolved = self.raise_impasse(
                        ImpasseKind::OperatorTie,
                        cycle,
                        detail,
                        &mut goal_stack,
                        &mut wm,
                        &mut first_impasse,
                    );
                    if !resolved {
                        break;
                    }
                    // Inside the subgoal, break the tie deterministically:
                    // operator name order, then lowest cost
                    let mut sorted = tied;
                    sorted.sort_by(|a, b| {
                        a.operator.cmp(&b.operator).then_with(|| {
                            a.cost
                                .partial_cmp(&b.cost)
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                    });
                    sorted
                        .into_iter()
                        .next()
                        .map(|p| p.operator)
                        .expect("tie requires at least two proposals")
                }
            };

            // Phase 4: Apply
            let pre_apply = wm.signature();
            let effects = self
                .registry
                .read()
                .ok()
                .and_then(|r| r.get(&chosen).map(|op| op.effects.clone()));
            let Some(effects) = effects else {
                // Operator vanished between propose and apply; not an error
                continue;
            };
            wm.merge(&effects);
            let changed = wm.signature() != pre_apply;

            let reward = if changed { 0.1 } else { -0.1 };
            if let Ok(mut registry) = self.registry.write() {
                if let Some(op) = registry.get_mut(&chosen) {
                    op.reinforce(reward, self.config.learning_rate);
                }
            }

            if !changed {
                let resolved = self.raise_impasse(
                    ImpasseKind::StateNoChange,
                    cycle,
                    format!("applying '{chosen}' changed nothing"),
                    &mut goal_stack,
                    &mut wm,
                    &mut first_impasse,
                );
                if !resolved {
                    break;
                }
                continue;
            }

            selected = Some(chosen.clone());
            debug!(operator = %chosen, cycle, "operator applied");

            // Phase 5: Learn
            if self.config.chunking_enabled && pre_apply.len() >= self.config.min_chunk_slots {
                productions.learn_chunk(pre_apply, &chosen);
            }

            if wm.get_bool(GOAL_SLOT) {
                break;
            }
        }

        CycleOutcome {
            final_state: wm,
            cycles,
            impasse: first_impasse,
            selected_operator: selected,
        }
    }

    fn select(
        &self,
        proposals: &[Proposal],
        wm: &WorkingMemory,
        productions: &ProductionMemory,
    ) -> Selection {
        let best_utility = proposals
            .iter()
            .map(|p| p.utility)
            .fold(f64::NEG_INFINITY, f64::max);
        let mut candidates: Vec<&Proposal> = proposals
            .iter()
            .filter(|p| (best_utility - p.utility).abs() < UTILITY_EPSILON)
            .collect();

        if candidates.len() == 1 {
            return Selection::Operator(candidates[0].operator.clone());
        }

        // A preference can break the tie: either the elaboration slot or a
        // production recommending one of the candidates on this state
        if let Some(recommended) = wm.get_str(RECOMMENDATION_SLOT) {
            if let Some(p) = candidates.iter().find(|p| p.operator == recommended) {
                return Selection::Operator(p.operator.clone());
            }
        }
        let mut preferred: Option<(f64, &Proposal)> = None;
        for candidate in &candidates {
            if let Some(strength) = productions.preference_for(wm, &candidate.operator) {
                let better = preferred.map(|(s, _)| strength > s).unwrap_or(true);
                if better {
                    preferred = Some((strength, *candidate));
                }
            }
        }
        if let Some((_, p)) = preferred {
            return Selection::Operator(p.operator.clone());
        }

        candidates.sort_by(|a, b| {
            a.operator.cmp(&b.operator).then_with(|| {
                a.cost
                    .partial_cmp(&b.cost)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
        Selection::Tie(candidates.into_iter().cloned().collect())
    }

    /// Record an impasse and push its subgoal. Returns whether the cycle
    /// can continue (subgoal accepted).
    fn raise_impasse(
        &self,
        kind: ImpasseKind,
        cycle: u32,
        detail: String,
        goal_stack: &mut GoalStack,
        wm: &mut WorkingMemory,
        first_impasse: &mut Option<Impasse>,
    ) -> bool {
        let pushed = goal_stack.push_for(kind);
        let impasse = Impasse {
            kind,
            cycle,
            detail,
            at: Utc::now(),
            resolved: pushed,
        };

        debug!(kind = %kind, cycle, resolved = pushed, "impasse");

        // Report the first impasse, unless the goal-stack bound was hit -
        // an unresolved impasse is what the caller needs to see
        if first_impasse.is_none() || !pushed {
            *first_impasse = Some(impasse.clone());
        }
        if let Ok(mut history) = self.impasse_history.lock() {
            history.push(impasse);
        }
        if let Ok(mut counters) = self.accuracy.lock() {
            if pushed {
                counters.resolved_impasses += 1;
            } else {
                counters.unresolved_impasses += 1;
            }
        }

        if pushed {
            wm.set(PROBLEM_SPACE_SLOT, json!(kind.problem_space()));
        }
        pushed
    }
}

enum Selection {
    Operator(String),
    Tie(Vec<Proposal>),
}

// ============================================================================
// TESTS
// ============================================================================
