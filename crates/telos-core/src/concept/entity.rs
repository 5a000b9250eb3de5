//! Concept entity and causal-edge metadata
//!
//! Concepts reference each other by oid, never by direct pointer; lookups go
//! through the repository. The in-memory entity serializes camelCase for the
//! API surface; the canonical persisted form is a snake_case flat record
//! with one row per causal edge (see [`ConceptRecord`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// RELATIONSHIPS
// ============================================================================

/// Typed (non-causal) relationship lists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Relationships {
    /// Taxonomic parents
    pub is_a: Vec<String>,
    /// Containing wholes
    pub part_of: Vec<String>,
    /// Concepts this one abstracts
    pub abstraction_of: Vec<String>,
    /// Concepts this one instantiates
    pub instance_of: Vec<String>,
    /// Loose associations
    pub associated_with: Vec<String>,
}

impl Relationships {
    /// All referenced oids, across every relationship type
    pub fn targets(&self) -> impl Iterator<Item = &String> {
        self.is_a
            .iter()
            .chain(self.part_of.iter())
            .chain(self.abstraction_of.iter())
            .chain(self.instance_of.iter())
            .chain(self.associated_with.iter())
    }

    /// Whether no relationships are recorded
    pub fn is_empty(&self) -> bool {
        self.targets().next().is_none()
    }
}

// ============================================================================
// CAUSAL EDGES
// ============================================================================

/// Causal edge types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalKind {
    /// Direct causation
    Causes,
    /// Necessary enabler
    Enables,
    /// Inhibition
    Prevents,
    /// Precondition
    Requires,
    /// Reverse causation marker
    CausedBy,
}

impl CausalKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CausalKind::Causes => "causes",
            CausalKind::Enables => "enables",
            CausalKind::Prevents => "prevents",
            CausalKind::Requires => "requires",
            CausalKind::CausedBy => "caused_by",
        }
    }
}

/// A causal edge to another concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalEdge {
    /// Edge type
    pub kind: CausalKind,
    /// Target concept oid
    pub target: String,
    /// Causal strength in [0, 1]
    pub strength: f64,
    /// Confidence in the edge in [0, 1]
    pub confidence: f64,
    /// Temporal delay between cause and effect (ticks)
    pub delay: u32,
}

impl CausalEdge {
    /// Create an edge, clamping strength and confidence into range
    pub fn new(kind: CausalKind, target: impl Into<String>, strength: f64, confidence: f64) -> Self {
        Self {
            kind,
            target: target.into(),
            strength: strength.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            delay: 0,
        }
    }

    /// Set the temporal delay
    pub fn with_delay(mut self, delay: u32) -> Self {
        self.delay = delay;
        self
    }

    /// Re-clamp after any in-place mutation
    pub fn clamp_ranges(&mut self) {
        self.strength = self.strength.clamp(0.0, 1.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
    }
}

// ============================================================================
// CONCEPT
// ============================================================================

/// A concept in the knowledge substrate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    /// Unique identifier (UUID v4), assigned by the repository
    pub oid: String,
    /// Human-readable label
    pub label: String,
    /// Confidence in the concept itself, [0, 1]
    pub confidence: f64,
    /// Times the concept has been loaded
    pub usage_count: u64,
    /// Name of the symbolic hypervector embedding, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbolic_name: Option<String>,
    /// Name of the geometric vector embedding, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometric_name: Option<String>,
    /// Typed relationships to other concepts
    #[serde(default)]
    pub relationships: Relationships,
    /// Causal edges to other concepts
    #[serde(default)]
    pub causal_edges: Vec<CausalEdge>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last repository mutation
    pub last_modified: DateTime<Utc>,
}

impl Concept {
    /// Create a concept with the given label; oid assigned at persist time
    pub fn new(label: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            oid: String::new(),
            label: label.into(),
            confidence: 1.0,
            usage_count: 0,
            symbolic_name: None,
            geometric_name: None,
            relationships: Relationships::default(),
            causal_edges: Vec::new(),
            created_at: now,
            last_modified: now,
        }
    }

    /// Clamp every bounded field into its declared range
    pub fn clamp_ranges(&mut self) {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        for edge in &mut self.causal_edges {
            edge.clamp_ranges();
        }
    }

    /// All oids this concept references
    pub fn referenced_oids(&self) -> Vec<&String> {
        self.relationships
            .targets()
            .chain(self.causal_edges.iter().map(|e| &e.target))
            .collect()
    }

    /// Causal edges of a given kind
    pub fn causal_edges_of(&self, kind: CausalKind) -> impl Iterator<Item = &CausalEdge> {
        self.causal_edges.iter().filter(move |e| e.kind == kind)
    }

    /// Equality up to bookkeeping fields (`usage_count`, `last_modified`)
    pub fn same_content(&self, other: &Concept) -> bool {
        self.oid == other.oid
            && self.label == other.label
            && (self.confidence - other.confidence).abs() < f64::EPSILON
            && self.symbolic_name == other.symbolic_name
            && self.geometric_name == other.geometric_name
            && self.relationships == other.relationships
            && self.causal_edges == other.causal_edges
    }
}

// ============================================================================
// CANONICAL PERSISTED RECORD
// ============================================================================

/// One flat causal-edge row in the persisted form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalEdgeRecord {
    /// Edge type as its snake_case name
    pub kind: String,
    /// Target concept oid
    pub target: String,
    /// Causal strength in [0, 1]
    pub strength: f64,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Temporal delay (ticks)
    pub delay: u32,
}

/// Canonical persisted representation: snake_case keys, flat edge records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptRecord {
    /// Unique identifier
    pub oid: String,
    /// Human-readable label
    pub label: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Times loaded
    pub usage_count: u64,
    /// Symbolic hypervector name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbolic_name: Option<String>,
    /// Geometric vector name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometric_name: Option<String>,
    /// Taxonomic parents
    #[serde(default)]
    pub is_a: Vec<String>,
    /// Containing wholes
    #[serde(default)]
    pub part_of: Vec<String>,
    /// Abstracted concepts
    #[serde(default)]
    pub abstraction_of: Vec<String>,
    /// Instantiated concepts
    #[serde(default)]
    pub instance_of: Vec<String>,
    /// Loose associations
    #[serde(default)]
    pub associated_with: Vec<String>,
    /// Flat causal-edge rows
    #[serde(default)]
    pub causal_edges: Vec<CausalEdgeRecord>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last repository mutation
    pub last_modified: DateTime<Utc>,
}

fn parse_causal_kind(name: &str) -> Option<CausalKind> {
    match name {
        "causes" => Some(CausalKind::Causes),
        "enables" => Some(CausalKind::Enables),
        "prevents" => Some(CausalKind::Prevents),
        "requires" => Some(CausalKind::Requires),
        "caused_by" => Some(CausalKind::CausedBy),
        _ => None,
    }
}

impl ConceptRecord {
    /// Canonical record for a concept
    pub fn from_concept(concept: &Concept) -> Self {
        Self {
            oid: concept.oid.clone(),
            label: concept.label.clone(),
            confidence: concept.confidence,
            usage_count: concept.usage_count,
            symbolic_name: concept.symbolic_name.clone(),
            geometric_name: concept.geometric_name.clone(),
            is_a: concept.relationships.is_a.clone(),
            part_of: concept.relationships.part_of.clone(),
            abstraction_of: concept.relationships.abstraction_of.clone(),
            instance_of: concept.relationships.instance_of.clone(),
            associated_with: concept.relationships.associated_with.clone(),
            causal_edges: concept
                .causal_edges
                .iter()
                .map(|e| CausalEdgeRecord {
                    kind: e.kind.as_str().to_string(),
                    target: e.target.clone(),
                    strength: e.strength,
                    confidence: e.confidence,
                    delay: e.delay,
                })
                .collect(),
            created_at: concept.created_at,
            last_modified: concept.last_modified,
        }
    }

    /// Hydrate the canonical record into the in-memory entity.
    /// Edge rows with an unknown kind are dropped; ranges are re-clamped.
    pub fn into_concept(self) -> Concept {
        let mut concept = Concept {
            oid: self.oid,
            label: self.label,
            confidence: self.confidence,
            usage_count: self.usage_count,
            symbolic_name: self.symbolic_name,
            geometric_name: self.geometric_name,
            relationships: Relationships {
                is_a: self.is_a,
                part_of: self.part_of,
                abstraction_of: self.abstraction_of,
                instance_of: self.instance_of,
                associated_with: self.associated_with,
            },
            causal_edges: self
                .causal_edges
                .into_iter()
                .filter_map(|row| {
                    parse_causal_kind(&row.kind).map(|kind| {
                        CausalEdge::new(kind, row.target, row.strength, row.confidence)
                            .with_delay(row.delay)
                    })
                })
                .collect(),
            created_at: self.created_at,
            last_modified: self.last_modified,
        };
        concept.clamp_ranges();
        concept
    }
}

// ============================================================================
// TESTS
// ============================================================================
