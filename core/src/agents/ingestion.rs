//! Ingestion agent: raw paper text to typed sections and bibliographic fields

use super::AgentSpec;
use crate::types::{SectionType, StageMarker};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const PROMPT_VERSION: &str = "v2";
pub const SCHEMA_VERSION: &str = "v2";

/// Raw text beyond this many characters is truncated before ingestion
pub const MAX_INGEST_CHARS: usize = 60_000;

pub const SYSTEM_PROMPT: &str = "\
You are a scientific document analyst. Split the provided research paper text \
into typed sections and extract bibliographic metadata.

Rules:
- Assign each section one type: abstract, methods, results, related_work, \
conclusion, or other. Use `other` for introductions, appendices, and anything \
that does not fit cleanly.
- Preserve the original text of each section verbatim; do not summarize.
- Keep sections in document order.
- Extract the author list as written. If no authors are present, return an \
empty list.
- Extract the publication year only if it is stated or unambiguous; otherwise \
omit it.
- Record a warning for any anomaly: missing abstract, truncated text, \
non-English content, references-only input.
- Return valid JSON only, conforming to the provided schema.";

/// One typed section from the ingestion agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedSection {
    pub section_type: SectionType,
    pub content: String,
}

/// Structured ingestion output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionOutput {
    pub sections: Vec<IngestedSection>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// JSON Schema for [`IngestionOutput`]
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sections": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "section_type": {
                            "type": "string",
                            "enum": ["abstract", "methods", "results", "related_work", "conclusion", "other"]
                        },
                        "content": { "type": "string" }
                    },
                    "required": ["section_type", "content"]
                }
            },
            "authors": { "type": "array", "items": { "type": "string" } },
            "year": { "type": ["integer", "null"] },
            "warnings": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["sections"]
    })
}

pub fn spec() -> AgentSpec {
    AgentSpec {
        name: "ingestion",
        stage: StageMarker::Ingestion,
        prompt_version: PROMPT_VERSION,
        schema_version: SCHEMA_VERSION,
        system_prompt: SYSTEM_PROMPT,
        schema,
        timeout: Duration::from_secs(180),
        max_output_tokens: 24_576,
        adaptive_compression: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_parses_from_schema_shaped_json() {
        let raw = json!({
            "sections": [
                {"section_type": "abstract", "content": "We study things."},
                {"section_type": "methods", "content": "We used a model."}
            ],
            "authors": ["A. Author"],
            "year": 2023,
            "warnings": []
        });
        let output: IngestionOutput = serde_json::from_value(raw).unwrap();
        assert_eq!(output.sections.len(), 2);
        assert_eq!(output.sections[0].section_type, SectionType::Abstract);
        assert_eq!(output.year, Some(2023));
    }

    #[test]
    fn test_optional_fields_default() {
        let raw = json!({"sections": []});
        let output: IngestionOutput = serde_json::from_value(raw).unwrap();
        assert!(output.authors.is_empty());
        assert!(output.year.is_none());
    }
}
