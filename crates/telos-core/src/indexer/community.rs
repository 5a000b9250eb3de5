//! Hierarchical community detection over the concept graph
//!
//! Greedy modularity agglomeration, Leiden-style: two communities merge iff
//! their node sets are connected by at least one edge and the modularity
//! delta `(internal_edges - expected) / total_edges * resolution` is
//! strictly positive, with `expected = deg_a * deg_b / (2 * total_edges)`.
//! A level that produces no merges converges and detection stops.
//!
//! Invariant: at every emitted level the community node sets are disjoint
//! and cover the full node set, and each community is a union of
//! communities from the level below.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::concept::Concept;

// ============================================================================
// GRAPH
// ============================================================================

/// Undirected concept graph extracted from the repository
#[derive(Debug, Clone, Default)]
pub struct ConceptGraph {
    nodes: BTreeSet<String>,
    adjacency: BTreeMap<String, BTreeSet<String>>,
    edge_count: usize,
}

impl ConceptGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from concepts: every relationship and causal edge whose both
    /// endpoints are present becomes an undirected edge
    pub fn from_concepts(concepts: &[Concept]) -> Self {
        let mut graph = Self::new();
        for concept in concepts {
            graph.add_node(&concept.oid);
        }
        for concept in concepts {
            for target in concept.referenced_oids() {
                if graph.nodes.contains(target.as_str()) {
                    graph.add_edge(&concept.oid, target);
                }
            }
        }
        graph
    }

    /// Add a node
    pub fn add_node(&mut self, node: &str) {
        self.nodes.insert(node.to_string());
        self.adjacency.entry(node.to_string()).or_default();
    }

    /// Add an undirected edge (idempotent; self-loops ignored)
    pub fn add_edge(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        self.add_node(a);
        self.add_node(b);
        let inserted = self
            .adjacency
            .get_mut(a)
            .map(|n| n.insert(b.to_string()))
            .unwrap_or(false);
        if let Some(neighbours) = self.adjacency.get_mut(b) {
            neighbours.insert(a.to_string());
        }
        if inserted {
            self.edge_count += 1;
        }
    }

    /// Node count
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Undirected edge count
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Degree of a node
    pub fn degree(&self, node: &str) -> usize {
        self.adjacency.get(node).map(BTreeSet::len).unwrap_or(0)
    }

    /// All nodes in deterministic order
    pub fn nodes(&self) -> impl Iterator<Item = &String> {
        self.nodes.iter()
    }

    /// Neighbours of a node
    pub fn neighbours(&self, node: &str) -> impl Iterator<Item = &String> {
        self.adjacency.get(node).into_iter().flatten()
    }

    /// Edges between two disjoint node sets
    fn edges_between(&self, a: &BTreeSet<String>, b: &BTreeSet<String>) -> usize {
        a.iter()
            .map(|node| self.neighbours(node).filter(|n| b.contains(*n)).count())
            .sum()
    }

    /// Sum of node degrees over a set
    fn set_degree(&self, set: &BTreeSet<String>) -> usize {
        set.iter().map(|n| self.degree(n)).sum()
    }
}

// ============================================================================
// COMMUNITIES
// ============================================================================

/// A detected community at one level
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    /// Stable community id
    pub id: String,
    /// Hierarchy level, 1-based
    pub level: u32,
    /// Member concept oids
    pub nodes: Vec<String>,
    /// Member count
    pub size: usize,
}

/// Detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionConfig {
    /// Maximum hierarchy levels
    pub max_levels: u32,
    /// Modularity resolution
    pub resolution: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_levels: 3,
            resolution: 1.0,
        }
    }
}

/// Modularity delta for merging communities `a` and `b`
fn modularity_delta(
    graph: &ConceptGraph,
    a: &BTreeSet<String>,
    b: &BTreeSet<String>,
    resolution: f64,
) -> Option<f64> {
    let total_edges = graph.edge_count() as f64;
    if total_edges == 0.0 {
        return None;
    }
    let internal = graph.edges_between(a, b) as f64;
    if internal == 0.0 {
        // Disconnected communities never merge
        return None;
    }
    let expected = (graph.set_degree(a) as f64) * (graph.set_degree(b) as f64) / (2.0 * total_edges);
    Some((internal - expected) / total_edges * resolution)
}

/// One greedy pass: repeatedly merge the best positive-delta pair until no
/// pair qualifies. Returns the merged partition.
fn merge_until_stable(
    graph: &ConceptGraph,
    mut partition: Vec<BTreeSet<String>>,
    resolution: f64,
) -> Vec<BTreeSet<String>> {
    loop {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..partition.len() {
            for j in (i + 1)..partition.len() {
                if let Some(delta) =
                    modularity_delta(graph, &partition[i], &partition[j], resolution)
                {
                    if delta > 0.0 && best.map(|(_, _, d)| delta > d).unwrap_or(true) {
                        best = Some((i, j, delta));
                    }
                }
            }
        }

        match best {
            Some((i, j, _)) => {
                let absorbed = partition.remove(j);
                partition[i].extend(absorbed);
            }
            None => return partition,
        }
    }
}

/// Run hierarchical detection; returns one `Vec<Community>` per emitted
/// level, coarsest last
pub fn detect_communities(graph: &ConceptGraph, config: &DetectionConfig) -> Vec<Vec<Community>> {
    let mut current: Vec<BTreeSet<String>> = graph
        .nodes()
        .map(|n| {
            let mut set = BTreeSet::new();
            set.insert(n.clone());
            set
        })
        .collect();

    let mut levels = Vec::new();

    for level in 1..=config.max_levels {
        let merged = merge_until_stable(graph, current.clone(), config.resolution);
        if merged.len() == current.len() {
            // Convergence: no merges at this level
            break;
        }

        let mut ordered = merged.clone();
        ordered.sort_by(|a, b| a.iter().next().cmp(&b.iter().next()));

        levels.push(
            ordered
                .iter()
                .enumerate()
                .map(|(idx, set)| Community {
                    id: format!("community/l{level}/{idx}"),
                    level,
                    nodes: set.iter().cloned().collect(),
                    size: set.len(),
                })
                .collect(),
        );

        current = ordered;
    }

    levels
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Five triangles in a chain, bridged by single edges
    fn five_triangles() -> ConceptGraph {
        let mut graph = ConceptGraph::new();
        for t in 0..5 {
            let a = format!("t{t}a");
            let b = format!("t{t}b");
            let c = format!("t{t}c");
            graph.add_edge(&a, &b);
            graph.add_edge(&b, &c);
            graph.add_edge(&c, &a);
        }
        for t in 0..4 {
            graph.add_edge(&format!("t{t}a"), &format!("t{}b", t + 1));
        }
        graph
    }

    #[test]
    fn test_triangle_chain_detects_five_communities() {
        let graph = five_triangles();
        assert_eq!(graph.node_count(), 15);
        assert_eq!(graph.edge_count(), 19);

        let levels = detect_communities(&graph, &DetectionConfig::default());

        // Level 1 merges each triangle; level 2 finds nothing to merge and
        // detection stops emitting levels
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].len(), 5);
        for community in &levels[0] {
            assert_eq!(community.size, 3);
            // Every community is one triangle
            let triangle: BTreeSet<char> = community
                .nodes
                .iter()
                .map(|n| n.chars().nth(1).unwrap())
                .collect();
            assert_eq!(triangle.len(), 1);
        }
    }

    #[test]
    fn test_levels_partition_the_node_set() {
        let graph = five_triangles();
        let levels = detect_communities(&graph, &DetectionConfig::default());

        for level in &levels {
            let mut seen = BTreeSet::new();
            for community in level {
                for node in &community.nodes {
                    assert!(seen.insert(node.clone()), "node {node} appears twice");
                }
            }
            assert_eq!(seen.len(), graph.node_count());
        }
    }

    #[test]
    fn test_disconnected_nodes_never_merge()  {
        let mut graph = ConceptGraph::new();
        graph.add_node("alone");
        graph.add_edge("a", "b");

        let levels = detect_communities(&graph, &DetectionConfig::default());
        if let Some(level) = levels.first() {
            let alone = level
                .iter()
                .find(|c| c.nodes.contains(&"alone".to_string()))
                .unwrap();
            assert_eq!(alone.size, 1);
        }
    }

    #[test]
    fn test_empty_graph_yields_no_levels() {
        let graph = ConceptGraph::new();
        assert!(detect_communities(&graph, &DetectionConfig::default()).is_empty());
    }

    #[test]
    fn test_two_dense_clusters_merge_at_level_one() {
        let mut graph = ConceptGraph::new();
        // Clique of 4 + clique of 4, single bridge
        for cluster in ["x", "y"] {
            for i in 0..4 {
                for j in (i + 1)..4 {
                    graph.add_edge(&format!("{cluster}{i}"), &format!("{cluster}{j}"));
                }
            }
        }
        graph.add_edge("x0", "y0");

        let levels = detect_communities(&graph, &DetectionConfig::default());
        assert!(!levels.is_empty());
        assert_eq!(levels[0].len(), 2);
    }

    #[test]
    fn test_graph_from_concepts_respects_endpoints() {
        use crate::concept::{CausalEdge, CausalKind};

        let mut a = Concept::new("a");
        a.oid = "oid-a".to_string();
        let mut b = Concept::new("b");
        b.oid = "oid-b".to_string();
        a.causal_edges
            .push(CausalEdge::new(CausalKind::Causes, "oid-b", 0.5, 0.5));
        // Dangling reference: dropped at graph build
        b.relationships.is_a.push("oid-missing".to_string());

        let graph = ConceptGraph::from_concepts(&[a, b]);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }
}
