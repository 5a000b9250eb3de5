//! Hierarchical Cognitive Controller (HRC)
//!
//! A State/Operator/Result decision cycle with utility-weighted operator
//! selection, impasse-driven subgoaling and chunking. Each invocation runs
//! Elaborate -> Propose -> Select -> Apply -> Learn up to a bounded number
//! of cycles; impasses push subgoals onto a bounded goal stack instead of
//! raising errors.

mod cycle;
mod impasse;
mod operators;
mod productions;
mod working_memory;

pub use cycle::{
    CycleOutcome, HrcConfig, HrcController, LearningQuery, GOAL_SLOT, PROBLEM_SPACE_SLOT,
};
pub use impasse::{GoalStack, Impasse, ImpasseKind, Subgoal};
pub use operators::{
    default_operators, situational_utility, Condition, Operator, OperatorRegistry, Predicate,
    Proposal,
};
pub use productions::{ProductionMemory, ProductionRule, RECOMMENDATION_SLOT};
pub use working_memory::WorkingMemory;
