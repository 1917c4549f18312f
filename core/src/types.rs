//! Core data types for litgraph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a tenant in the multi-tenant system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    /// Create a new TenantId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Integer identifier for a graph node, unique within a tenant
pub type NodeId = i64;

/// Integer identifier for a graph edge, unique within a tenant
pub type EdgeId = i64;

/// Maximum length of an evidence sentence stored on an edge
pub const MAX_EVIDENCE_CHARS: usize = 300;

/// A research paper as stored in the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    /// Tenant-unique paper identifier (e.g. an arXiv id or a caller-supplied key)
    pub paper_id: String,
    /// Paper title
    pub title: String,
    /// Publication year, when known
    pub year: Option<i32>,
    /// Abstract text
    pub abstract_text: String,
    /// Free-form metadata bag (authors, external ids, source_url, resolved_url, ...)
    pub metadata: serde_json::Value,
    /// Optional embedding over title + abstract
    pub embedding: Option<Vec<f32>>,
}

impl Paper {
    /// Create a new paper with the given id and title
    pub fn new(paper_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            title: title.into(),
            year: None,
            abstract_text: String::new(),
            metadata: serde_json::Value::Object(Default::default()),
            embedding: None,
        }
    }

    /// Set the publication year
    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    /// Set the abstract text
    pub fn with_abstract(mut self, abstract_text: impl Into<String>) -> Self {
        self.abstract_text = abstract_text.into();
        self
    }

    /// Add a single metadata key
    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        if let serde_json::Value::Object(ref mut map) = self.metadata {
            map.insert(key.into(), value);
        }
        self
    }
}

/// Section type assigned during ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Abstract,
    Methods,
    Results,
    RelatedWork,
    Conclusion,
    Other,
}

impl std::fmt::Display for SectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SectionType::Abstract => write!(f, "abstract"),
            SectionType::Methods => write!(f, "methods"),
            SectionType::Results => write!(f, "results"),
            SectionType::RelatedWork => write!(f, "related_work"),
            SectionType::Conclusion => write!(f, "conclusion"),
            SectionType::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for SectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abstract" => Ok(SectionType::Abstract),
            "methods" => Ok(SectionType::Methods),
            "results" => Ok(SectionType::Results),
            "related_work" => Ok(SectionType::RelatedWork),
            "conclusion" => Ok(SectionType::Conclusion),
            "other" => Ok(SectionType::Other),
            _ => Err(format!("Unknown section type: {}", s)),
        }
    }
}

/// A typed slice of a paper's text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    /// Owning paper
    pub paper_id: String,
    /// Section classification
    pub section_type: SectionType,
    /// Section text
    pub content: String,
    /// Word count of `content`
    pub word_count: usize,
    /// 0-based dense index within the paper
    pub part_index: usize,
}

impl Section {
    /// Create a section, computing the word count from the content
    pub fn new(
        paper_id: impl Into<String>,
        section_type: SectionType,
        content: impl Into<String>,
        part_index: usize,
    ) -> Self {
        let content = content.into();
        let word_count = content.split_whitespace().count();
        Self {
            paper_id: paper_id.into(),
            section_type,
            content,
            word_count,
            part_index,
        }
    }
}

/// Durable review decision on a node or edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    Flagged,
    Rejected,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewStatus::Approved => write!(f, "approved"),
            ReviewStatus::Flagged => write!(f, "flagged"),
            ReviewStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// A node (entity) candidate ready for insertion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNode {
    /// Entity type (method, dataset, metric, concept, task, model, paper)
    pub node_type: String,
    /// Canonicalized name; `(canonical_name, node_type)` is tenant-unique
    pub canonical_name: String,
    /// Free-form metadata (display name, definition, year)
    pub metadata: serde_json::Value,
    /// Confidence as reported by extraction
    pub original_confidence: f64,
    /// Confidence after deterministic adjustments
    pub adjusted_confidence: f64,
    /// Validation decision
    pub review_status: ReviewStatus,
    /// Semicolon-joined reason codes ("ok" when clean)
    pub review_reasons: String,
    /// Raw embedding over the entity context
    pub embedding_raw: Option<Vec<f32>>,
    /// Unit-normalized embedding for similarity search
    pub embedding_index: Option<Vec<f32>>,
}

impl NewNode {
    /// Create a new node candidate with approved status and no reasons
    pub fn new(node_type: impl Into<String>, canonical_name: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            canonical_name: canonical_name.into(),
            metadata: serde_json::Value::Object(Default::default()),
            original_confidence: 1.0,
            adjusted_confidence: 1.0,
            review_status: ReviewStatus::Approved,
            review_reasons: "ok".to_string(),
            embedding_raw: None,
            embedding_index: None,
        }
    }

    /// Set original and adjusted confidence together
    pub fn with_confidence(mut self, original: f64, adjusted: f64) -> Self {
        self.original_confidence = original;
        self.adjusted_confidence = adjusted;
        self
    }

    /// Set the review decision and reasons
    pub fn with_review(mut self, status: ReviewStatus, reasons: impl Into<String>) -> Self {
        self.review_status = status;
        self.review_reasons = reasons.into();
        self
    }

    /// Set the metadata bag
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach an embedding pair
    pub fn with_embeddings(mut self, raw: Vec<f32>, index: Vec<f32>) -> Self {
        self.embedding_raw = Some(raw);
        self.embedding_index = Some(index);
        self
    }
}

/// A stored graph node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub node_type: String,
    pub canonical_name: String,
    pub metadata: serde_json::Value,
    pub original_confidence: f64,
    pub adjusted_confidence: f64,
    pub review_status: ReviewStatus,
    pub review_reasons: String,
    pub embedding_raw: Option<Vec<f32>>,
    pub embedding_index: Option<Vec<f32>>,
}

impl GraphNode {
    /// Assemble a stored node from an insertion candidate and its assigned id
    pub fn from_new(id: NodeId, node: NewNode) -> Self {
        Self {
            id,
            node_type: node.node_type,
            canonical_name: node.canonical_name,
            metadata: node.metadata,
            original_confidence: node.original_confidence,
            adjusted_confidence: node.adjusted_confidence,
            review_status: node.review_status,
            review_reasons: node.review_reasons,
            embedding_raw: node.embedding_raw,
            embedding_index: node.embedding_index,
        }
    }
}

/// Provenance record carried by every edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeProvenance {
    /// Section the relationship was observed in, when known
    pub section_type: Option<SectionType>,
    /// Part index of that section
    pub part_index: Option<usize>,
    /// Section row id, when known
    pub section_id: Option<i64>,
    /// Paper the relationship was extracted from
    pub source_paper_id: Option<String>,
    /// Validation decision at extraction time
    pub validation_status: ReviewStatus,
    /// Semicolon-joined validation reason codes
    pub validation_reasons: String,
}

impl EdgeProvenance {
    /// Provenance carrying only a validation decision
    pub fn from_validation(status: ReviewStatus, reasons: impl Into<String>) -> Self {
        Self {
            section_type: None,
            part_index: None,
            section_id: None,
            source_paper_id: None,
            validation_status: status,
            validation_reasons: reasons.into(),
        }
    }

    /// Set the source paper
    pub fn with_source_paper(mut self, paper_id: impl Into<String>) -> Self {
        self.source_paper_id = Some(paper_id.into());
        self
    }

    /// Set the originating section
    pub fn with_section(mut self, section_type: SectionType, part_index: usize) -> Self {
        self.section_type = Some(section_type);
        self.part_index = Some(part_index);
        self
    }
}

/// An edge candidate ready for insertion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEdge {
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub relationship_type: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Evidence sentence, at most [`MAX_EVIDENCE_CHARS`] characters
    pub evidence: Option<String>,
    pub provenance: EdgeProvenance,
    pub review_status: ReviewStatus,
}

/// A stored graph edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: EdgeId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub relationship_type: String,
    pub confidence: f64,
    pub evidence: Option<String>,
    pub provenance: EdgeProvenance,
    pub review_status: ReviewStatus,
}

impl GraphEdge {
    /// Assemble a stored edge from an insertion candidate and its assigned id
    pub fn from_new(id: EdgeId, edge: NewEdge) -> Self {
        Self {
            id,
            source_node_id: edge.source_node_id,
            target_node_id: edge.target_node_id,
            relationship_type: edge.relationship_type,
            confidence: edge.confidence,
            evidence: edge.evidence,
            provenance: edge.provenance,
            review_status: edge.review_status,
        }
    }
}

/// Truncate an evidence sentence to the storage bound
pub fn clamp_evidence(evidence: &str) -> String {
    if evidence.chars().count() <= MAX_EVIDENCE_CHARS {
        evidence.to_string()
    } else {
        evidence.chars().take(MAX_EVIDENCE_CHARS).collect()
    }
}

/// A node's observed presence in a paper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMention {
    pub node_id: NodeId,
    pub paper_id: String,
    pub mention_count: u32,
}

/// A non-canonical surface form observed for a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityAlias {
    pub node_id: NodeId,
    pub alias_name: String,
    pub source_paper_id: String,
}

/// Status of an alias link proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Proposed,
    Approved,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkStatus::Proposed => write!(f, "proposed"),
            LinkStatus::Approved => write!(f, "approved"),
        }
    }
}

/// A semantic link from a node to its canonical head
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityLink {
    pub node_id: NodeId,
    pub canonical_node_id: NodeId,
    /// Always "alias_of" for links produced by the resolver
    pub link_type: String,
    pub confidence: f64,
    pub status: LinkStatus,
    pub evidence: Option<String>,
}

impl EntityLink {
    /// Create an alias_of link
    pub fn alias_of(
        node_id: NodeId,
        canonical_node_id: NodeId,
        confidence: f64,
        status: LinkStatus,
    ) -> Self {
        Self {
            node_id,
            canonical_node_id,
            link_type: "alias_of".to_string(),
            confidence,
            status,
            evidence: None,
        }
    }
}

/// Category of a reasoning-derived insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    TransitiveRelationship,
    ClusterAnalysis,
    AnomalyDetection,
    GapIdentification,
    TrendAnalysis,
}

impl std::fmt::Display for InsightType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InsightType::TransitiveRelationship => write!(f, "transitive_relationship"),
            InsightType::ClusterAnalysis => write!(f, "cluster_analysis"),
            InsightType::AnomalyDetection => write!(f, "anomaly_detection"),
            InsightType::GapIdentification => write!(f, "gap_identification"),
            InsightType::TrendAnalysis => write!(f, "trend_analysis"),
        }
    }
}

/// The scope a reasoning batch ran over
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightScope {
    pub paper_ids: Vec<String>,
    pub depth: u32,
}

/// A higher-order finding derived by reasoning over a subgraph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferredInsight {
    pub insight_type: InsightType,
    /// Nodes this insight is about
    pub subject_nodes: Vec<NodeId>,
    /// Human-readable summary
    pub summary: String,
    /// Ordered reasoning steps behind the conclusion
    pub reasoning_steps: Vec<String>,
    pub confidence: f64,
    /// Reasoning batch this insight belongs to
    pub batch_id: Uuid,
    /// Hash of the subgraph snapshot the reasoning ran over
    pub graph_snapshot_hash: String,
    pub scope: InsightScope,
}

/// Lifecycle status of a pipeline job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Progress markers emitted by the pipeline driver, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMarker {
    Ingestion,
    EntityExtraction,
    RelationshipExtraction,
    Validation,
    PersistEntitiesEdges,
    Evidence,
    Reasoning,
    Completed,
}

impl StageMarker {
    /// Stable snake_case name used in job progress and usage rows
    pub fn as_str(&self) -> &'static str {
        match self {
            StageMarker::Ingestion => "ingestion",
            StageMarker::EntityExtraction => "entity_extraction",
            StageMarker::RelationshipExtraction => "relationship_extraction",
            StageMarker::Validation => "validation",
            StageMarker::PersistEntitiesEdges => "persist_entities_edges",
            StageMarker::Evidence => "evidence",
            StageMarker::Reasoning => "reasoning",
            StageMarker::Completed => "completed",
        }
    }
}

impl std::fmt::Display for StageMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters accumulated over one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub sections_inserted: u64,
    pub entities_extracted: u64,
    pub relationships_extracted: u64,
    pub nodes_created: u64,
    pub nodes_reused: u64,
    pub aliases_recorded: u64,
    pub links_created: u64,
    pub mentions_recorded: u64,
    pub edges_created: u64,
    pub edges_skipped: u64,
    pub evidence_updates: u64,
    pub insights_created: u64,
    pub llm_calls: u64,
    pub cache_hits: u64,
}

/// Progress sub-record of a job result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub stage: String,
}

/// Freeform job result persisted on the job row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Latest stage reached
    pub progress: JobProgress,
    /// Final counters, present once the run completes
    pub stats: Option<JobStats>,
    /// Non-fatal warnings accumulated during the run
    pub warnings: Vec<String>,
}

impl JobResult {
    /// Result at a given stage with no stats yet
    pub fn at_stage(stage: StageMarker) -> Self {
        Self {
            progress: JobProgress {
                stage: stage.as_str().to_string(),
            },
            stats: None,
            warnings: Vec::new(),
        }
    }
}

/// An asynchronous per-paper pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    pub id: Uuid,
    pub paper_id: Option<String>,
    pub status: JobStatus,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineJob {
    /// Create a pending job
    pub fn pending(id: Uuid, paper_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            paper_id,
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once the job reached a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}

/// How LLM calls are billed for a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Platform key with hosted markup
    Hosted,
    /// Tenant-supplied key, unmarked cost
    ByoKey,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Hosted => write!(f, "hosted"),
            ExecutionMode::ByoKey => write!(f, "byo_key"),
        }
    }
}

/// One metered LLM call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub tenant_id: TenantId,
    pub user_id: Option<String>,
    pub pipeline_stage: String,
    pub agent_name: Option<String>,
    pub model: String,
    pub provider: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
    pub execution_mode: ExecutionMode,
    pub job_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl UsageEvent {
    /// Total tokens for ceiling checks
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_display() {
        let tenant = TenantId::new("acme");
        assert_eq!(tenant.to_string(), "acme");
        assert_eq!(tenant.as_str(), "acme");
    }

    #[test]
    fn test_section_word_count() {
        let section = Section::new("p1", SectionType::Methods, "we train a large model", 0);
        assert_eq!(section.word_count, 5);
        assert_eq!(section.part_index, 0);
    }

    #[test]
    fn test_section_type_round_trip() {
        for s in ["abstract", "methods", "results", "related_work", "conclusion", "other"] {
            let parsed: SectionType = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("introduction".parse::<SectionType>().is_err());
    }

    #[test]
    fn test_clamp_evidence() {
        assert_eq!(clamp_evidence("fits"), "fits");

        let long = "x".repeat(500);
        assert_eq!(clamp_evidence(&long).chars().count(), MAX_EVIDENCE_CHARS);
    }

    #[test]
    fn test_stage_marker_names() {
        assert_eq!(StageMarker::PersistEntitiesEdges.as_str(), "persist_entities_edges");
        assert_eq!(StageMarker::Completed.to_string(), "completed");
    }

    #[test]
    fn test_job_terminal() {
        let mut job = PipelineJob::pending(Uuid::new_v4(), Some("p1".to_string()));
        assert!(!job.is_terminal());
        job.status = JobStatus::Processing;
        assert!(!job.is_terminal());
        job.status = JobStatus::Failed;
        assert!(job.is_terminal());
    }

    #[test]
    fn test_review_status_serde() {
        let json = serde_json::to_string(&ReviewStatus::Flagged).unwrap();
        assert_eq!(json, "\"flagged\"");
    }
}
