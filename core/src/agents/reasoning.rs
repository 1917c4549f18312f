//! Reasoning agent: higher-order insights over a bounded subgraph

use super::AgentSpec;
use crate::types::{InsightType, NodeId, StageMarker};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const PROMPT_VERSION: &str = "v2";
pub const SCHEMA_VERSION: &str = "v2";

pub const SYSTEM_PROMPT: &str = "\
You are a research analyst reasoning over a knowledge graph of papers, \
methods, datasets, metrics, concepts, and tasks. The graph you receive is the \
neighborhood of recently processed papers, with node ids, types, names, and \
typed edges.

Produce insights of these kinds:
- transitive_relationship: A relates to C through B, and the composition is \
meaningful and not already an edge.
- cluster_analysis: a coherent group of nodes working on the same problem.
- anomaly_detection: an edge or node that contradicts the rest of the graph.
- gap_identification: a combination (e.g. method never evaluated on a \
relevant dataset) conspicuously absent.
- trend_analysis: a direction visible across papers over time.

Rules:
- `subject_nodes` must contain ids from the provided graph.
- Spell out the reasoning as ordered steps, each grounded in specific nodes \
or edges.
- Assign a confidence in [0,1]; speculative insights belong below 0.6.
- Prefer a few well-grounded insights over many shallow ones.
- Return valid JSON only, conforming to the provided schema.";

/// One insight as produced by the reasoning agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInsight {
    pub insight_type: InsightType,
    pub subject_nodes: Vec<NodeId>,
    pub summary: String,
    #[serde(default)]
    pub reasoning_steps: Vec<String>,
    pub confidence: f64,
}

/// Structured reasoning output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningOutput {
    pub insights: Vec<RawInsight>,
}

/// JSON Schema for [`ReasoningOutput`]
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "insights": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "insight_type": {
                            "type": "string",
                            "enum": [
                                "transitive_relationship",
                                "cluster_analysis",
                                "anomaly_detection",
                                "gap_identification",
                                "trend_analysis"
                            ]
                        },
                        "subject_nodes": { "type": "array", "items": { "type": "integer" } },
                        "summary": { "type": "string" },
                        "reasoning_steps": { "type": "array", "items": { "type": "string" } },
                        "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
                    },
                    "required": ["insight_type", "subject_nodes", "summary", "confidence"]
                }
            }
        },
        "required": ["insights"]
    })
}

pub fn spec() -> AgentSpec {
    AgentSpec {
        name: "reasoning",
        stage: StageMarker::Reasoning,
        prompt_version: PROMPT_VERSION,
        schema_version: SCHEMA_VERSION,
        system_prompt: SYSTEM_PROMPT,
        schema,
        timeout: Duration::from_secs(120),
        max_output_tokens: 24_576,
        adaptive_compression: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_parses() {
        let raw = json!({
            "insights": [{
                "insight_type": "gap_identification",
                "subject_nodes": [1, 2],
                "summary": "Method X was never evaluated on dataset Y.",
                "reasoning_steps": ["X evaluates on Z", "Y is the standard benchmark for X's task"],
                "confidence": 0.7
            }]
        });
        let output: ReasoningOutput = serde_json::from_value(raw).unwrap();
        assert_eq!(output.insights[0].insight_type, InsightType::GapIdentification);
    }
}
