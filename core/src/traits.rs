//! Core traits defining the seams between the pipeline and its collaborators

use crate::errors::{FetchError, GraphError, LlmError};
use crate::tenant::TenantSettings;
use crate::types::{
    EdgeId, EntityAlias, EntityLink, EntityMention, GraphEdge, GraphNode, InferredInsight,
    JobStatus, NewEdge, NewNode, NodeId, Paper, PipelineJob, Section, StageMarker, TenantId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Key for batched canonical-name lookups: `canonical_name|node_type`
pub fn node_lookup_key(canonical_name: &str, node_type: &str) -> String {
    format!("{}|{}", canonical_name, node_type)
}

/// Tenant-scoped persistent store for all graph rows.
///
/// Every operation carries the tenant id; implementations must never return
/// rows belonging to another tenant.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn paper_exists(&self, tenant: &TenantId, paper_id: &str) -> Result<bool, GraphError>;

    async fn upsert_paper(&self, tenant: &TenantId, paper: Paper) -> Result<(), GraphError>;

    /// Replace the stored embedding for a paper
    async fn upsert_paper_embedding(
        &self,
        tenant: &TenantId,
        paper_id: &str,
        embedding: Vec<f32>,
    ) -> Result<(), GraphError>;

    /// Insert sections for a paper, replacing any prior set
    async fn insert_paper_sections(
        &self,
        tenant: &TenantId,
        sections: Vec<Section>,
    ) -> Result<usize, GraphError>;

    async fn find_node_by_canonical_name(
        &self,
        tenant: &TenantId,
        canonical_name: &str,
        node_type: &str,
    ) -> Result<Option<GraphNode>, GraphError>;

    /// Batched lookup; the result map is keyed by [`node_lookup_key`]
    async fn find_nodes_by_canonical_names(
        &self,
        tenant: &TenantId,
        keys: &[(String, String)],
    ) -> Result<HashMap<String, GraphNode>, GraphError>;

    /// Insert a node; on a `(canonical_name, node_type)` conflict the
    /// existing row's id is returned so concurrent jobs converge.
    async fn insert_node(&self, tenant: &TenantId, node: NewNode) -> Result<NodeId, GraphError>;

    /// Batch insert; ids are returned in input order
    async fn insert_nodes(
        &self,
        tenant: &TenantId,
        nodes: Vec<NewNode>,
    ) -> Result<Vec<NodeId>, GraphError>;

    async fn get_nodes_by_ids(
        &self,
        tenant: &TenantId,
        ids: &[NodeId],
    ) -> Result<Vec<GraphNode>, GraphError>;

    /// Accumulate mention counts; duplicate `(node_id, paper_id)` rows merge
    async fn insert_entity_mentions(
        &self,
        tenant: &TenantId,
        mentions: Vec<EntityMention>,
    ) -> Result<usize, GraphError>;

    /// Insert an alias; returns false when the row already existed
    async fn insert_entity_alias(
        &self,
        tenant: &TenantId,
        alias: EntityAlias,
    ) -> Result<bool, GraphError>;

    async fn insert_entity_link(&self, tenant: &TenantId, link: EntityLink)
        -> Result<(), GraphError>;

    /// For each given node id, the approved canonical head it aliases, if any
    async fn get_approved_alias_targets_for_nodes(
        &self,
        tenant: &TenantId,
        node_ids: &[NodeId],
    ) -> Result<HashMap<NodeId, NodeId>, GraphError>;

    /// Batch insert; ids are returned in input order
    async fn insert_edges(
        &self,
        tenant: &TenantId,
        edges: Vec<NewEdge>,
    ) -> Result<Vec<EdgeId>, GraphError>;

    async fn update_edges_evidence(
        &self,
        tenant: &TenantId,
        updates: Vec<(EdgeId, String)>,
    ) -> Result<usize, GraphError>;

    async fn insert_insights(
        &self,
        tenant: &TenantId,
        insights: Vec<InferredInsight>,
    ) -> Result<usize, GraphError>;

    /// Nodes mentioned in the given paper
    async fn get_nodes_for_paper(
        &self,
        tenant: &TenantId,
        paper_id: &str,
    ) -> Result<Vec<GraphNode>, GraphError>;

    /// Edges whose provenance names the given paper
    async fn get_edges_for_paper(
        &self,
        tenant: &TenantId,
        paper_id: &str,
    ) -> Result<Vec<GraphEdge>, GraphError>;

    async fn get_edges_by_source_nodes(
        &self,
        tenant: &TenantId,
        node_ids: &[NodeId],
    ) -> Result<Vec<GraphEdge>, GraphError>;

    async fn get_edges_by_target_nodes(
        &self,
        tenant: &TenantId,
        node_ids: &[NodeId],
    ) -> Result<Vec<GraphEdge>, GraphError>;

    async fn get_papers_by_ids(
        &self,
        tenant: &TenantId,
        paper_ids: &[String],
    ) -> Result<Vec<Paper>, GraphError>;

    /// The whole tenant graph, for full-graph reasoning
    async fn get_graph_data(
        &self,
        tenant: &TenantId,
    ) -> Result<(Vec<GraphNode>, Vec<GraphEdge>), GraphError>;

    async fn get_total_paper_count(&self, tenant: &TenantId) -> Result<u64, GraphError>;

    async fn create_pipeline_job(
        &self,
        tenant: &TenantId,
        job: PipelineJob,
    ) -> Result<(), GraphError>;

    async fn update_pipeline_job(
        &self,
        tenant: &TenantId,
        job: PipelineJob,
    ) -> Result<(), GraphError>;

    async fn get_pipeline_job(
        &self,
        tenant: &TenantId,
        job_id: Uuid,
    ) -> Result<Option<PipelineJob>, GraphError>;

    async fn list_pipeline_jobs(
        &self,
        tenant: &TenantId,
        page: u32,
        limit: u32,
        status: Option<JobStatus>,
    ) -> Result<Vec<PipelineJob>, GraphError>;

    /// Pipeline jobs created at or after `since`, for the rate window
    async fn count_pipeline_jobs_since(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
    ) -> Result<u64, GraphError>;

    /// `processing` jobs whose last update is older than the cutoff
    async fn list_processing_jobs_older_than(
        &self,
        tenant: &TenantId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PipelineJob>, GraphError>;

    async fn get_tenant_settings(&self, tenant: &TenantId) -> Result<TenantSettings, GraphError>;

    async fn update_tenant_settings(
        &self,
        tenant: &TenantId,
        settings: TenantSettings,
    ) -> Result<(), GraphError>;
}

/// Token counts reported by a provider for one call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Options for one structured generation call
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Provider-side timeout; the runner additionally races its own
    pub timeout: Option<Duration>,
    /// Tenant key for byo_key execution; the provider's configured key otherwise
    pub api_key_override: Option<String>,
}

/// Raw outcome of a structured generation call
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// Model output text; expected to be JSON conforming to the schema
    pub text: String,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
}

/// An LLM provider that produces JSON constrained by a schema.
///
/// The provider is opaque to the pipeline: it must honor the supplied
/// response schema and timeout, and report token usage.
#[async_trait]
pub trait StructuredLlm: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        schema: &serde_json::Value,
        options: &GenerateOptions,
    ) -> Result<GenerationOutcome, LlmError>;

    /// Provider name used in usage rows and pricing lookups
    fn provider(&self) -> &str;
}

/// Produces embedding vectors for entity contexts and papers
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// Raw and index-normalized embedding for one entity context
#[derive(Debug, Clone)]
pub struct EmbeddingPair {
    pub raw: Vec<f32>,
    /// Unit-normalized copy used for cosine comparison
    pub index: Vec<f32>,
}

impl EmbeddingPair {
    /// Build a pair from a raw vector, normalizing the index copy
    pub fn from_raw(raw: Vec<f32>) -> Self {
        let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        let index = if norm > 0.0 {
            raw.iter().map(|v| v / norm).collect()
        } else {
            raw.clone()
        };
        Self { raw, index }
    }
}

/// Context handed to the semantic resolver for one unmatched entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityContext {
    pub name: String,
    pub entity_type: String,
    pub definition: Option<String>,
    pub paper_title: String,
    pub evidence: Option<String>,
}

/// What the semantic resolver decided for an unmatched entity
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionDecision {
    /// The context names an existing node outright
    ExactMatch { node_id: NodeId },
    /// Similar enough to link immediately
    AutoApprove { node_id: NodeId, confidence: f64 },
    /// Similar enough to propose for review
    ProposeLink { node_id: NodeId, confidence: f64 },
    /// No plausible existing node
    New,
}

/// Optional semantic resolver over node embeddings
#[async_trait]
pub trait AliasResolver: Send + Sync {
    async fn resolve_entity(
        &self,
        tenant: &TenantId,
        context: &EntityContext,
        embedding: &EmbeddingPair,
        gating_threshold: f64,
    ) -> Result<ResolutionDecision, GraphError>;
}

/// A document fetched or uploaded for ingestion, reduced to plain text
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub paper_id: Option<String>,
    pub title: Option<String>,
    pub text: String,
    pub metadata: serde_json::Value,
}

/// Kind of source document, decided by content-type dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Json,
    Html,
    PlainText,
}

/// Turns raw document bytes into plain text plus metadata.
///
/// Binary formats (PDF, DOCX) live behind this seam; the core ships a basic
/// implementation for text-bearing kinds only.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(
        &self,
        kind: DocumentKind,
        bytes: &[u8],
        source_url: Option<&str>,
    ) -> Result<ParsedDocument, FetchError>;
}

/// Receives stage transitions from the pipeline driver
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_stage(&self, stage: StageMarker);
}

/// Progress sink that discards all markers
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn on_stage(&self, _stage: StageMarker) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_lookup_key() {
        assert_eq!(node_lookup_key("bert", "method"), "bert|method");
    }

    #[test]
    fn test_embedding_pair_normalizes() {
        let pair = EmbeddingPair::from_raw(vec![3.0, 4.0]);
        assert_eq!(pair.raw, vec![3.0, 4.0]);
        assert!((pair.index[0] - 0.6).abs() < 1e-6);
        assert!((pair.index[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_embedding_pair_zero_vector() {
        let pair = EmbeddingPair::from_raw(vec![0.0, 0.0]);
        assert_eq!(pair.index, vec![0.0, 0.0]);
    }
}
