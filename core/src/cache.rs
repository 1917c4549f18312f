//! Content-addressed caches for LLM calls and derived artifacts
//!
//! Keys are SHA-256 digests over canonical JSON, always including the tenant
//! id and the prompt/schema versions, so a version bump or a tenant switch
//! can never return a stale or foreign entry.

use crate::canonical::canonical_json;
use crate::types::TenantId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Key into the per-LLM-call cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallCacheKey(pub String);

impl CallCacheKey {
    /// Derive the key for one agent invocation
    #[allow(clippy::too_many_arguments)]
    pub fn derive(
        agent: &str,
        model: &str,
        provider: &str,
        prompt_version: &str,
        schema_version: &str,
        input: &Value,
        tenant: &TenantId,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(agent.as_bytes());
        hasher.update([0]);
        hasher.update(model.as_bytes());
        hasher.update([0]);
        hasher.update(provider.as_bytes());
        hasher.update([0]);
        hasher.update(prompt_version.as_bytes());
        hasher.update([0]);
        hasher.update(schema_version.as_bytes());
        hasher.update([0]);
        hasher.update(canonical_json(input).as_bytes());
        hasher.update([0]);
        hasher.update(tenant.as_str().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }
}

/// A cached LLM call result with its production metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedCall {
    /// Parsed agent output
    pub value: Value,
    pub prompt_version: String,
    pub schema_version: String,
    pub duration_ms: u64,
    pub finish_reason: Option<String>,
}

/// Per-LLM-call memoization store
#[async_trait]
pub trait CallCache: Send + Sync {
    async fn get(&self, key: &CallCacheKey) -> Option<CachedCall>;

    /// Writes are idempotent: the same key always maps to the same value
    async fn put(&self, key: CallCacheKey, entry: CachedCall);
}

/// Kinds of intermediate artifacts memoized between stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedArtifactKind {
    Sections,
    Entities,
    RelationshipCandidates,
    GraphSnapshot,
}

impl DerivedArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivedArtifactKind::Sections => "sections",
            DerivedArtifactKind::Entities => "entities",
            DerivedArtifactKind::RelationshipCandidates => "relationship_candidates",
            DerivedArtifactKind::GraphSnapshot => "graph_snapshot",
        }
    }
}

/// Key into the derived-artifact cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivedCacheKey(pub String);

impl DerivedCacheKey {
    /// Derive the key for one artifact
    pub fn derive(
        kind: DerivedArtifactKind,
        prompt_version: &str,
        schema_version: &str,
        input: &Value,
        tenant: &TenantId,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(prompt_version.as_bytes());
        hasher.update([0]);
        hasher.update(schema_version.as_bytes());
        hasher.update([0]);
        hasher.update(canonical_json(input).as_bytes());
        hasher.update([0]);
        hasher.update(tenant.as_str().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }
}

/// Store for intermediate pipeline artifacts
#[async_trait]
pub trait DerivedCache: Send + Sync {
    async fn get(&self, key: &DerivedCacheKey) -> Option<Value>;

    async fn put(&self, key: DerivedCacheKey, value: Value);
}

/// SHA-256 hex digest of a canonical-JSON payload; used for graph snapshots
pub fn content_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_key_stable_under_field_order() {
        let tenant = TenantId::new("t1");
        let a = CallCacheKey::derive(
            "entity_extraction",
            "m",
            "gemini",
            "v1",
            "v1",
            &json!({"b": 2, "a": 1}),
            &tenant,
        );
        let b = CallCacheKey::derive(
            "entity_extraction",
            "m",
            "gemini",
            "v1",
            "v1",
            &json!({"a": 1, "b": 2}),
            &tenant,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_call_key_tenant_scoped() {
        let input = json!({"text": "same"});
        let a = CallCacheKey::derive("x", "m", "p", "v1", "v1", &input, &TenantId::new("t1"));
        let b = CallCacheKey::derive("x", "m", "p", "v1", "v1", &input, &TenantId::new("t2"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_call_key_version_scoped() {
        let tenant = TenantId::new("t1");
        let input = json!({"text": "same"});
        let a = CallCacheKey::derive("x", "m", "p", "v1", "v1", &input, &tenant);
        let b = CallCacheKey::derive("x", "m", "p", "v2", "v1", &input, &tenant);
        assert_ne!(a, b);
    }

    #[test]
    fn test_derived_key_kind_scoped() {
        let tenant = TenantId::new("t1");
        let input = json!({"paper": "p1"});
        let a = DerivedCacheKey::derive(DerivedArtifactKind::Sections, "v1", "v1", &input, &tenant);
        let b = DerivedCacheKey::derive(DerivedArtifactKind::Entities, "v1", "v1", &input, &tenant);
        assert_ne!(a, b);
    }

    #[test]
    fn test_content_hash_deterministic() {
        let a = content_hash(&json!({"nodes": [1, 2], "edges": []}));
        let b = content_hash(&json!({"edges": [], "nodes": [1, 2]}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
