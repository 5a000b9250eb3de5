//! Community summaries
//!
//! Each detected community gets a summary generated through the LLM
//! transducer (title, summary text, key concepts, relationships), embedded
//! by the embedding provider and cached in L2 under the community id with
//! `type = community_summary` metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::concept::Concept;

/// Metadata `type` tag summaries carry in the cache
pub const SUMMARY_TYPE: &str = "community_summary";

/// A generated community summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunitySummary {
    /// The summarised community
    pub community_id: String,
    /// Hierarchy level of the community
    pub level: u32,
    /// Generated title
    pub title: String,
    /// Generated summary text
    pub summary_text: String,
    /// Key concept labels
    pub key_concepts: Vec<String>,
    /// Salient relationships, rendered as text
    pub relationships: Vec<String>,
    /// Summary embedding
    pub embedding: Vec<f32>,
    /// Generation timestamp
    pub generated_at: DateTime<Utc>,
}

impl CommunitySummary {
    /// The cache value stored under the community id
    pub fn to_cache_value(&self) -> Value {
        json!({
            "type": SUMMARY_TYPE,
            "level": self.level,
            "communityId": self.community_id,
            "title": self.title,
            "summaryText": self.summary_text,
            "keyConcepts": self.key_concepts,
            "relationships": self.relationships,
            "generatedAt": self.generated_at,
        })
    }

    /// Parse a cache value back into a summary (without the embedding,
    /// which lives in the tier's vector index)
    pub fn from_cache_value(value: &Value) -> Option<Self> {
        if value.get("type")?.as_str()? != SUMMARY_TYPE {
            return None;
        }
        Some(Self {
            community_id: value.get("communityId")?.as_str()?.to_string(),
            level: value.get("level")?.as_u64()? as u32,
            title: value.get("title")?.as_str()?.to_string(),
            summary_text: value.get("summaryText")?.as_str()?.to_string(),
            key_concepts: string_array(value.get("keyConcepts")?),
            relationships: string_array(value.get("relationships")?),
            embedding: Vec::new(),
            generated_at: value
                .get("generatedAt")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_else(Utc::now),
        })
    }
}

fn string_array(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// The schema handed to the transducer for summary generation
pub fn summary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "summary": { "type": "string" },
            "key_concepts": { "type": "array" },
            "relationships": { "type": "array" }
        }
    })
}

/// Render a community's member concepts into the source text for the
/// transducer: labels first, then relationship and causal-edge lines
pub fn render_community_text(members: &[&Concept]) -> String {
    let mut lines = Vec::new();

    let labels: Vec<&str> = members.iter().map(|c| c.label.as_str()).collect();
    lines.push(format!("Concepts: {}", labels.join(", ")));

    for concept in members {
        for target in concept.relationships.is_a.iter() {
            lines.push(format!("{} is a {}", concept.label, short_oid(target)));
        }
        for target in concept.relationships.part_of.iter() {
            lines.push(format!("{} is part of {}", concept.label, short_oid(target)));
        }
        for edge in &concept.causal_edges {
            lines.push(format!(
                "{} {} {} (strength {:.2})",
                concept.label,
                edge.kind.as_str().replace('_', " "),
                short_oid(&edge.target),
                edge.strength
            ));
        }
    }

    lines.join("\n")
}

fn short_oid(oid: &str) -> &str {
    &oid[..oid.len().min(8)]
}

// ============================================================================
// TESTS
// ============================================================================
