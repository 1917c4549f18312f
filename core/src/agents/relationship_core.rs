//! Relationship extraction agent: typed relationships between extracted entities
//!
//! This is the one agent with the compression retry ladder: when output comes
//! back truncated or unparseable, retries progressively shrink the requested
//! shape (`normal` → `compact` → `minimal`).

use super::AgentSpec;
use crate::types::{SectionType, StageMarker};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const PROMPT_VERSION: &str = "v4";
pub const SCHEMA_VERSION: &str = "v3";

/// Upper bound on relationships returned per paper
pub const MAX_RELATIONSHIPS: usize = 12;
/// Relationship candidates below this confidence are dropped at extraction
pub const MIN_RELATIONSHIP_CONFIDENCE: f64 = 0.5;
/// Edge cap in minimal retry mode
pub const MINIMAL_MODE_MAX_EDGES: usize = 8;

pub const SYSTEM_PROMPT: &str = "\
You are a research knowledge extraction engine. Given the entities already \
extracted from a paper and its sections, identify directed relationships \
between those entities.

Relationship types: uses, evaluates_on, outperforms, extends, introduces, \
measures, trained_on, applies_to, part_of, compares_with.

Rules:
- Return at most 12 relationships with confidence at least 0.5.
- `source` and `target` must be entity names from the provided entity list. \
Never relate an entity to itself.
- Assign a confidence in [0,1] reflecting how directly the text states the \
relationship; reserve 0.9+ for explicitly stated claims.
- When you can, name the section the relationship appears in via \
`section_type` and `part_index`.
- Do not infer relationships from general world knowledge; the paper text \
must support each one.
- Return valid JSON only, conforming to the provided schema.";

/// Extra instruction appended in compact retry mode
pub const COMPACT_MODE_NUDGE: &str = "\
Your previous response could not be parsed. Respond again with ONLY the \
fields source, target, relationship_type, confidence for each relationship. \
No other fields, no prose, no markdown.";

/// Extra instruction appended in minimal retry mode
pub const MINIMAL_MODE_NUDGE: &str = "\
Respond with at most 8 relationships, only the fields source, target, \
relationship_type, confidence, and nothing else. Keep the JSON as short as \
possible.";

/// One relationship candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipCandidate {
    pub source: String,
    pub target: String,
    pub relationship_type: String,
    pub confidence: f64,
    #[serde(default)]
    pub section_type: Option<SectionType>,
    #[serde(default)]
    pub part_index: Option<usize>,
}

/// Structured relationship extraction output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipOutput {
    pub relationships: Vec<RelationshipCandidate>,
}

/// JSON Schema for [`RelationshipOutput`] in normal mode
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "relationships": {
                "type": "array",
                "maxItems": MAX_RELATIONSHIPS,
                "items": {
                    "type": "object",
                    "properties": {
                        "source": { "type": "string" },
                        "target": { "type": "string" },
                        "relationship_type": { "type": "string" },
                        "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                        "section_type": {
                            "type": ["string", "null"],
                            "enum": ["abstract", "methods", "results", "related_work", "conclusion", "other", null]
                        },
                        "part_index": { "type": ["integer", "null"], "minimum": 0 }
                    },
                    "required": ["source", "target", "relationship_type", "confidence"]
                }
            }
        },
        "required": ["relationships"]
    })
}

/// Schema for compact and minimal retry modes: endpoints and confidence only
pub fn compact_schema(max_items: usize) -> Value {
    json!({
        "type": "object",
        "properties": {
            "relationships": {
                "type": "array",
                "maxItems": max_items,
                "items": {
                    "type": "object",
                    "properties": {
                        "source": { "type": "string" },
                        "target": { "type": "string" },
                        "relationship_type": { "type": "string" },
                        "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
                    },
                    "required": ["source", "target", "relationship_type", "confidence"]
                }
            }
        },
        "required": ["relationships"]
    })
}

pub fn spec() -> AgentSpec {
    AgentSpec {
        name: "relationship_core",
        stage: StageMarker::RelationshipExtraction,
        prompt_version: PROMPT_VERSION,
        schema_version: SCHEMA_VERSION,
        system_prompt: SYSTEM_PROMPT,
        schema,
        timeout: Duration::from_secs(60),
        max_output_tokens: 16_384,
        adaptive_compression: true,
    }
}
