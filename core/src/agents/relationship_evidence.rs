//! Evidence agent: one supporting sentence per surviving relationship

use super::AgentSpec;
use crate::types::StageMarker;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const PROMPT_VERSION: &str = "v2";
pub const SCHEMA_VERSION: &str = "v1";

pub const SYSTEM_PROMPT: &str = "\
You are a research claim verifier. Given a relationship between two research \
entities and the paper sections it was extracted from, produce the single \
sentence that best supports the relationship.

Rules:
- Quote or closely paraphrase the paper; never fabricate a claim.
- At most 300 characters. Trim citations and figure references.
- If no sentence supports the relationship, return an empty string.
- Return valid JSON only, conforming to the provided schema.";

/// Structured evidence output for one edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceOutput {
    pub evidence: String,
}

/// JSON Schema for [`EvidenceOutput`]
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "evidence": { "type": "string", "maxLength": 300 }
        },
        "required": ["evidence"]
    })
}

pub fn spec() -> AgentSpec {
    AgentSpec {
        name: "relationship_evidence",
        stage: StageMarker::Evidence,
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
        let output: EvidenceOutput =
            serde_json::from_value(json!({"evidence": "BERT achieves 80.5 on GLUE."})).unwrap();
        assert!(!output.evidence.is_empty());
    }
}
