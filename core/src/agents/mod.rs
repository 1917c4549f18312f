//! Versioned agent definitions
//!
//! Each agent is a named LLM invocation with a fixed rubric prompt, a JSON
//! Schema for its output, and a retry policy. Prompt and schema versions are
//! part of every cache key: bumping prompt text without bumping its version
//! would serve stale cached results.

use crate::types::StageMarker;
use serde_json::Value;
use std::time::Duration;

pub mod entity_extraction;
pub mod ingestion;
pub mod reasoning;
pub mod relationship_core;
pub mod relationship_evidence;

/// Static description of one agent
#[derive(Debug, Clone)]
pub struct AgentSpec {
    /// Stable agent name, used in cache keys and error payloads
    pub name: &'static str,
    /// Pipeline stage recorded on usage rows
    pub stage: StageMarker,
    pub prompt_version: &'static str,
    pub schema_version: &'static str,
    pub system_prompt: &'static str,
    /// JSON Schema the model output must conform to
    pub schema: fn() -> Value,
    /// Runner-side timeout raced against the provider call
    pub timeout: Duration,
    pub max_output_tokens: u32,
    /// Whether the compression retry ladder applies (relationship extractor only)
    pub adaptive_compression: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_specs_are_consistent() {
        let specs = [
            ingestion::spec(),
            entity_extraction::spec(),
            relationship_core::spec(),
            relationship_evidence::spec(),
            reasoning::spec(),
        ];
        let mut names = std::collections::HashSet::new();
        for spec in &specs {
            assert!(names.insert(spec.name), "duplicate agent name {}", spec.name);
            assert!(!spec.prompt_version.is_empty());
            assert!(!spec.schema_version.is_empty());
            let schema = (spec.schema)();
            assert!(schema.is_object(), "{} schema must be an object", spec.name);
        }
        // Only the relationship extractor compresses on retry
        assert!(relationship_core::spec().adaptive_compression);
        assert!(!ingestion::spec().adaptive_compression);
        assert!(!reasoning::spec().adaptive_compression);
    }

    #[test]
    fn test_per_stage_timeouts() {
        assert_eq!(ingestion::spec().timeout, Duration::from_secs(180));
        assert_eq!(reasoning::spec().timeout, Duration::from_secs(120));
        assert_eq!(entity_extraction::spec().timeout, Duration::from_secs(60));
    }
}
