//! Entity extraction agent: typed research entities from paper sections

use super::AgentSpec;
use crate::types::StageMarker;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const PROMPT_VERSION: &str = "v3";
pub const SCHEMA_VERSION: &str = "v2";

/// Upper bound on entities returned per paper
pub const MAX_ENTITIES: usize = 10;

pub const SYSTEM_PROMPT: &str = "\
You are a research knowledge extraction engine. Identify the distinct \
research entities a paper introduces, uses, or evaluates against.

Entity types: method, dataset, metric, concept, task, model.

Rules:
- Return at most 10 entities, preferring the most central ones.
- `canonical_name` is the standard name of the entity as the community knows \
it (e.g. \"BERT\", \"ImageNet\", \"F1 score\"), not a sentence fragment.
- Assign a confidence in [0,1]: 0.9+ when the entity is named and central, \
0.6-0.9 when named but peripheral, below 0.6 when inferred from context.
- Include a one-sentence `definition` when the paper defines the entity; \
omit it otherwise.
- Extract only entities the text explicitly supports. Do not invent \
well-known entities that are not mentioned.
- Return valid JSON only, conforming to the provided schema.";

/// One extracted entity candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub canonical_name: String,
    pub entity_type: String,
    pub confidence: f64,
    #[serde(default)]
    pub definition: Option<String>,
}

/// Structured entity extraction output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityExtractionOutput {
    pub entities: Vec<ExtractedEntity>,
}

/// JSON Schema for [`EntityExtractionOutput`]
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "maxItems": MAX_ENTITIES,
                "items": {
                    "type": "object",
                    "properties": {
                        "canonical_name": { "type": "string" },
                        "entity_type": {
                            "type": "string",
                            "enum": ["method", "dataset", "metric", "concept", "task", "model"]
                        },
                        "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                        "definition": { "type": ["string", "null"] }
                    },
                    "required": ["canonical_name", "entity_type", "confidence"]
                }
            }
        },
        "required": ["entities"]
    })
}

pub fn spec() -> AgentSpec {
    AgentSpec {
        name: "entity_extraction",
        stage: StageMarker::EntityExtraction,
        prompt_version: PROMPT_VERSION,
        schema_version: SCHEMA_VERSION,
        system_prompt: SYSTEM_PROMPT,
        schema,
        timeout: Duration::from_secs(60),
        max_output_tokens: 16_384,
        adaptive_compression: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_parses() {
        let raw = json!({
            "entities": [
                {"canonical_name": "BERT", "entity_type": "model", "confidence": 0.95},
                {"canonical_name": "GLUE", "entity_type": "dataset", "confidence": 0.9,
                 "definition": "A multi-task NLU benchmark."}
            ]
        });
        let output: EntityExtractionOutput = serde_json::from_value(raw).unwrap();
        assert_eq!(output.entities.len(), 2);
        assert_eq!(output.entities[1].definition.as_deref(), Some("A multi-task NLU benchmark."));
    }
}
