//! Tenant settings and bounds

use crate::types::ExecutionMode;
use serde::{Deserialize, Serialize};

/// Lowest reasoning depth a tenant may configure
pub const MIN_REASONING_DEPTH: u32 = 1;
/// Highest reasoning depth a tenant may configure
pub const MAX_REASONING_DEPTH: u32 = 20;

/// Per-tenant configuration read once per job and cached for its duration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSettings {
    /// Billing mode for LLM calls
    pub execution_mode: ExecutionMode,
    /// Sealed tenant API key (base64 blob, see crate::crypto), required for byo_key
    pub encrypted_api_key: Option<String>,
    /// BFS depth bound for reasoning, clamped to [1, 20]
    pub max_reasoning_depth: u32,
    /// Cosine similarity required before the semantic resolver links entities
    pub semantic_gating_threshold: f64,
    /// Whether low-confidence speculative edges may be persisted as flagged
    pub allow_speculative_edges: bool,
    /// Relationship types to keep; empty means all
    pub enabled_relationship_types: Vec<String>,
    pub monthly_cost_limit: Option<f64>,
    pub monthly_token_limit: Option<u64>,
    pub daily_cost_limit: Option<f64>,
    pub daily_token_limit: Option<u64>,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Hosted,
            encrypted_api_key: None,
            max_reasoning_depth: 2,
            semantic_gating_threshold: 0.85,
            allow_speculative_edges: true,
            enabled_relationship_types: Vec::new(),
            monthly_cost_limit: None,
            monthly_token_limit: None,
            daily_cost_limit: None,
            daily_token_limit: None,
        }
    }
}

impl TenantSettings {
    /// Reasoning depth with the [1, 20] bound applied
    pub fn clamped_reasoning_depth(&self) -> u32 {
        self.max_reasoning_depth
            .clamp(MIN_REASONING_DEPTH, MAX_REASONING_DEPTH)
    }

    /// Gating threshold clamped into [0, 1]
    pub fn clamped_gating_threshold(&self) -> f64 {
        self.semantic_gating_threshold.clamp(0.0, 1.0)
    }

    /// True when the given relationship type survives the tenant filter
    pub fn relationship_type_enabled(&self, relationship_type: &str) -> bool {
        self.enabled_relationship_types.is_empty()
            || self
                .enabled_relationship_types
                .iter()
                .any(|t| t == relationship_type)
    }

    /// Set the execution mode
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Set the sealed API key blob
    pub fn with_encrypted_api_key(mut self, blob: impl Into<String>) -> Self {
        self.encrypted_api_key = Some(blob.into());
        self
    }

    /// Set the reasoning depth (clamped on read)
    pub fn with_max_reasoning_depth(mut self, depth: u32) -> Self {
        self.max_reasoning_depth = depth;
        self
    }

    /// Restrict extraction to the given relationship types
    pub fn with_enabled_relationship_types(mut self, types: Vec<String>) -> Self {
        self.enabled_relationship_types = types;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_clamped() {
        let settings = TenantSettings::default().with_max_reasoning_depth(0);
        assert_eq!(settings.clamped_reasoning_depth(), 1);

        let settings = TenantSettings::default().with_max_reasoning_depth(50);
        assert_eq!(settings.clamped_reasoning_depth(), 20);

        let settings = TenantSettings::default().with_max_reasoning_depth(7);
        assert_eq!(settings.clamped_reasoning_depth(), 7);
    }

    #[test]
    fn test_relationship_filter_empty_means_all() {
        let settings = TenantSettings::default();
        assert!(settings.relationship_type_enabled("uses"));

        let settings = settings.with_enabled_relationship_types(vec!["uses".to_string()]);
        assert!(settings.relationship_type_enabled("uses"));
        assert!(!settings.relationship_type_enabled("outperforms"));
    }
}
