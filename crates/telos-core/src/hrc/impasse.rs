//! Impasses and the subgoal stack
//!
//! An impasse is a cycle that cannot make progress: no operator proposed,
//! tied operators with no preference to break them, or a selected operator
//! whose application changed nothing. Each impasse type maps to a problem
//! space pushed as a subgoal; the stack is bounded and overflow ends the
//! cycle unresolved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// IMPASSE TYPES
// ============================================================================

/// Why the cycle could not make progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpasseKind {
    /// Propose returned nothing
    OperatorNoChange,
    /// Multiple proposals with equal utility and no preference to break them
    OperatorTie,
    /// The applied operator left working memory unchanged
    StateNoChange,
}

impl ImpasseKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpasseKind::OperatorNoChange => "operator_no_change",
            ImpasseKind::OperatorTie => "operator_tie",
            ImpasseKind::StateNoChange => "state_no_change",
        }
    }

    /// Problem space a subgoal for this impasse works in
    pub fn problem_space(&self) -> &'static str {
        match self {
            ImpasseKind::OperatorNoChange => "find_new_operators",
            ImpasseKind::OperatorTie => "break_tie_with_preferences",
            ImpasseKind::StateNoChange => "elaborate_state_further",
        }
    }
}

impl std::fmt::Display for ImpasseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recorded impasse
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Impasse {
    /// Impasse type
    pub kind: ImpasseKind,
    /// Cycle number it occurred in
    pub cycle: u32,
    /// Human-readable detail
    pub detail: String,
    /// When it occurred
    pub at: DateTime<Utc>,
    /// Whether a subgoal resolved it
    pub resolved: bool,
}

// ============================================================================
// SUBGOALS
// ============================================================================

/// A subgoal pushed in response to an impasse
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subgoal {
    /// Problem space the subgoal works in
    pub problem_space: String,
    /// Impasse that spawned it
    pub impasse: ImpasseKind,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Bounded goal stack
#[derive(Debug, Clone)]
pub struct GoalStack {
    stack: Vec<Subgoal>,
    max_subgoals: usize,
}

impl GoalStack {
    /// Empty stack bounded at `max_subgoals`
    pub fn new(max_subgoals: usize) -> Self {
        Self {
            stack: Vec::new(),
            max_subgoals,
        }
    }

    /// Push a subgoal for the given impasse; `false` when the bound is hit
    pub fn push_for(&mut self, kind: ImpasseKind) -> bool {
        if self.stack.len() >= self.max_subgoals {
            return false;
        }
        self.stack.push(Subgoal {
            problem_space: kind.problem_space().to_string(),
            impasse: kind,
            created_at: Utc::now(),
        });
        true
    }

    /// Pop the most recent subgoal
    pub fn pop(&mut self) -> Option<Subgoal> {
        self.stack.pop()
    }

    /// Current stack depth
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Whether no subgoals are pending
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// The active (innermost) subgoal
    pub fn current(&self) -> Option<&Subgoal> {
        self.stack.last()
    }

    /// Bound on stack depth
    pub fn capacity(&self) -> usize {
        self.max_subgoals
    }
}

// ============================================================================
// TESTS
// ============================================================================
