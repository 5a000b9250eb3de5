//! Graph indexer end-to-end scenarios: community detection convergence on
//! the five-triangle graph and global semantic search over cached
//! summaries.

use telos_core::indexer::{detect_communities, ConceptGraph, DetectionConfig};
use telos_core::{CausalEdge, CausalKind, Concept};
use telos_e2e_tests::harness::TestCore;

/// Persist five triangles of concepts bridged by single association edges.
/// Returns the oids grouped by triangle.
fn persist_five_triangles(h: &TestCore) -> Vec<Vec<String>> {
    let repo = h.core.repository();
    let mut triangles = Vec::new();

    for t in 0..5 {
        let mut oids = Vec::new();
        for i in 0..3 {
            let mut concept = Concept::new(format!("t{t}-concept{i}"));
            repo.persist(&mut concept).unwrap();
            oids.push(concept.oid);
        }
        // Close the triangle
        for i in 0..3 {
            let mut concept = repo.peek(&oids[i]).unwrap();
            concept.causal_edges.push(CausalEdge::new(
                CausalKind::Enables,
                oids[(i + 1) % 3].clone(),
                0.8,
                0.9,
            ));
            repo.persist(&mut concept).unwrap();
        }
        triangles.push(oids);
    }

    // Single bridging edges between consecutive triangles
    for t in 0..4usize {
        let from = triangles[t][0].clone();
        let to = triangles[t + 1][1].clone();
        let mut concept = repo.peek(&from).unwrap();
        concept.relationships.associated_with.push(to);
        repo.persist(&mut concept).unwrap();
    }

    triangles
}

#[tokio::test]
async fn five_triangles_converge_to_five_communities() {
    let h = TestCore::open();
    let triangles = persist_five_triangles(&h);

    let repo = h.core.repository();
    let concepts: Vec<Concept> = repo.list(100, 0).unwrap();
    assert_eq!(concepts.len(), 15);

    let graph = ConceptGraph::from_concepts(&concepts);
    assert_eq!(graph.node_count(), 15);
    assert_eq!(graph.edge_count(), 19);

    let levels = detect_communities(
        &graph,
        &DetectionConfig {
            max_levels: 3,
            resolution: 1.0,
        },
    );

    // Level 1 merges each triangle; level 2 finds no positive-delta merge,
    // so the indexer stops emitting levels
    assert_eq!(levels.len(), 1);
    assert_eq!(levels[0].len(), 5);
    for community in &levels[0] {
        assert_eq!(community.size, 3);
        let home = triangles
            .iter()
            .position(|t| t.contains(&community.nodes[0]))
            .unwrap();
        for node in &community.nodes {
            assert!(triangles[home].contains(node), "community mixes triangles");
        }
    }
}

#[tokio::test]
async fn indexing_cycle_caches_searchable_summaries() {
    let h = TestCore::open();
    persist_five_triangles(&h);

    let report = h.core.indexer().run_indexing_cycle().await.unwrap();
    assert_eq!(report.concepts, 15);
    assert_eq!(report.levels, 1);
    assert_eq!(report.communities, 5);
    assert_eq!(report.summaries, 5);

    let results = h
        .core
        .indexer()
        .global_semantic_search("t0 concept association", 3)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert!(results.len() <= 3);
    for (summary, _) in &results {
        assert_eq!(summary.level, 1);
        assert!(!summary.title.is_empty());
    }
}

#[tokio::test]
async fn reindexing_is_idempotent_on_a_static_graph() {
    let h = TestCore::open();
    persist_five_triangles(&h);

    let first = h.core.indexer().run_indexing_cycle().await.unwrap();
    let second = h.core.indexer().run_indexing_cycle().await.unwrap();

    assert_eq!(first.communities, second.communities);
    assert_eq!(first.summaries, second.summaries);
}
