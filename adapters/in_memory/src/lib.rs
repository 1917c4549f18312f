//! In-memory implementations of the litgraph storage seams
//!
//! Backs tests and local development: a tenant-indexed [`GraphStore`], an
//! append-only usage ledger, both caches, a deterministic embedder, and a
//! cosine-similarity alias resolver. All state lives behind a single RwLock'd
//! store struct with explicit indexes, mirroring what a row store would keep.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use litgraph_core::cache::{
    CachedCall, CallCache, CallCacheKey, DerivedCache, DerivedCacheKey,
};
use litgraph_core::canonical::canonicalize;
use litgraph_core::prelude::*;
use litgraph_core::usage::{UsageLedger, UsageStats};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Composite key used by the canonical-name index
fn name_key(tenant: &TenantId, canonical_name: &str, node_type: &str) -> (TenantId, String) {
    (tenant.clone(), format!("{}|{}", canonical_name, node_type))
}

/// All rows and indexes for every tenant
#[derive(Debug, Default)]
struct MemoryStore {
    papers: HashMap<(TenantId, String), Paper>,
    sections: HashMap<(TenantId, String), Vec<Section>>,

    next_node_id: HashMap<TenantId, NodeId>,
    nodes: HashMap<(TenantId, NodeId), GraphNode>,
    /// Index: (tenant, canonical|type) -> node id
    nodes_by_name: HashMap<(TenantId, String), NodeId>,

    next_edge_id: HashMap<TenantId, EdgeId>,
    edges: HashMap<(TenantId, EdgeId), GraphEdge>,
    edges_by_source: HashMap<(TenantId, NodeId), Vec<EdgeId>>,
    edges_by_target: HashMap<(TenantId, NodeId), Vec<EdgeId>>,
    edges_by_paper: HashMap<(TenantId, String), Vec<EdgeId>>,

    /// (tenant, node, paper) -> accumulated mention count
    mentions: HashMap<(TenantId, NodeId, String), u32>,
    mentions_by_paper: HashMap<(TenantId, String), BTreeSet<NodeId>>,

    aliases: HashSet<(TenantId, NodeId, String, String)>,
    links: Vec<(TenantId, EntityLink)>,
    insights: HashMap<TenantId, Vec<InferredInsight>>,

    jobs: HashMap<(TenantId, Uuid), PipelineJob>,
    settings: HashMap<TenantId, TenantSettings>,
}

impl MemoryStore {
    fn alloc_node_id(&mut self, tenant: &TenantId) -> NodeId {
        let next = self.next_node_id.entry(tenant.clone()).or_insert(1);
        let id = *next;
        *next += 1;
        id
    }

    fn alloc_edge_id(&mut self, tenant: &TenantId) -> EdgeId {
        let next = self.next_edge_id.entry(tenant.clone()).or_insert(1);
        let id = *next;
        *next += 1;
        id
    }

    /// Insert or converge on an existing node for the same (name, type)
    fn upsert_node(&mut self, tenant: &TenantId, node: NewNode) -> NodeId {
        let key = name_key(tenant, &node.canonical_name, &node.node_type);
        if let Some(&id) = self.nodes_by_name.get(&key) {
            return id;
        }
        let id = self.alloc_node_id(tenant);
        self.nodes_by_name.insert(key, id);
        self.nodes
            .insert((tenant.clone(), id), GraphNode::from_new(id, node));
        id
    }

    fn insert_edge_row(&mut self, tenant: &TenantId, edge: NewEdge) -> EdgeId {
        let id = self.alloc_edge_id(tenant);
        let stored = GraphEdge::from_new(id, edge);
        self.edges_by_source
            .entry((tenant.clone(), stored.source_node_id))
            .or_default()
            .push(id);
        self.edges_by_target
            .entry((tenant.clone(), stored.target_node_id))
            .or_default()
            .push(id);
        if let Some(paper_id) = &stored.provenance.source_paper_id {
            self.edges_by_paper
                .entry((tenant.clone(), paper_id.clone()))
                .or_default()
                .push(id);
        }
        self.edges.insert((tenant.clone(), id), stored);
        id
    }
}

/// In-memory [`GraphStore`] for testing and development
#[derive(Default)]
pub struct InMemoryGraphStore {
    store: RwLock<MemoryStore>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total node count for one tenant (test observability)
    pub async fn node_count(&self, tenant: &TenantId) -> usize {
        let store = self.store.read().await;
        store.nodes.keys().filter(|(t, _)| t == tenant).count()
    }

    /// Total edge count for one tenant (test observability)
    pub async fn edge_count(&self, tenant: &TenantId) -> usize {
        let store = self.store.read().await;
        store.edges.keys().filter(|(t, _)| t == tenant).count()
    }

    /// Total mention row count for one tenant (test observability)
    pub async fn mention_count(&self, tenant: &TenantId) -> usize {
        let store = self.store.read().await;
        store.mentions.keys().filter(|(t, _, _)| t == tenant).count()
    }

    /// All insights for one tenant (test observability)
    pub async fn insights(&self, tenant: &TenantId) -> Vec<InferredInsight> {
        let store = self.store.read().await;
        store.insights.get(tenant).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn paper_exists(&self, tenant: &TenantId, paper_id: &str) -> Result<bool, GraphError> {
        let store = self.store.read().await;
        Ok(store.papers.contains_key(&(tenant.clone(), paper_id.to_string())))
    }

    async fn upsert_paper(&self, tenant: &TenantId, paper: Paper) -> Result<(), GraphError> {
        let mut store = self.store.write().await;
        store
            .papers
            .insert((tenant.clone(), paper.paper_id.clone()), paper);
        Ok(())
    }

    async fn upsert_paper_embedding(
        &self,
        tenant: &TenantId,
        paper_id: &str,
        embedding: Vec<f32>,
    ) -> Result<(), GraphError> {
        let mut store = self.store.write().await;
        match store.papers.get_mut(&(tenant.clone(), paper_id.to_string())) {
            Some(paper) => {
                paper.embedding = Some(embedding);
                Ok(())
            }
            None => Err(GraphError::NodeNotFound(format!("paper {}", paper_id))),
        }
    }

    async fn insert_paper_sections(
        &self,
        tenant: &TenantId,
        sections: Vec<Section>,
    ) -> Result<usize, GraphError> {
        if sections.is_empty() {
            return Ok(0);
        }
        let paper_id = sections[0].paper_id.clone();
        let count = sections.len();
        let mut store = self.store.write().await;
        store.sections.insert((tenant.clone(), paper_id), sections);
        Ok(count)
    }

    async fn find_node_by_canonical_name(
        &self,
        tenant: &TenantId,
        canonical_name: &str,
        node_type: &str,
    ) -> Result<Option<GraphNode>, GraphError> {
        let store = self.store.read().await;
        let key = name_key(tenant, canonical_name, node_type);
        Ok(store
            .nodes_by_name
            .get(&key)
            .and_then(|id| store.nodes.get(&(tenant.clone(), *id)))
            .cloned())
    }

    async fn find_nodes_by_canonical_names(
        &self,
        tenant: &TenantId,
        keys: &[(String, String)],
    ) -> Result<HashMap<String, GraphNode>, GraphError> {
        let store = self.store.read().await;
        let mut found = HashMap::new();
        for (canonical, node_type) in keys {
            let key = name_key(tenant, canonical, node_type);
            if let Some(node) = store
                .nodes_by_name
                .get(&key)
                .and_then(|id| store.nodes.get(&(tenant.clone(), *id)))
            {
                found.insert(node_lookup_key(canonical, node_type), node.clone());
            }
        }
        Ok(found)
    }

    async fn insert_node(&self, tenant: &TenantId, node: NewNode) -> Result<NodeId, GraphError> {
        let mut store = self.store.write().await;
        Ok(store.upsert_node(tenant, node))
    }

    async fn insert_nodes(
        &self,
        tenant: &TenantId,
        nodes: Vec<NewNode>,
    ) -> Result<Vec<NodeId>, GraphError> {
        let mut store = self.store.write().await;
        Ok(nodes
            .into_iter()
            .map(|node| store.upsert_node(tenant, node))
            .collect())
    }

    async fn get_nodes_by_ids(
        &self,
        tenant: &TenantId,
        ids: &[NodeId],
    ) -> Result<Vec<GraphNode>, GraphError> {
        let store = self.store.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| store.nodes.get(&(tenant.clone(), *id)))
            .cloned()
            .collect())
    }

    async fn insert_entity_mentions(
        &self,
        tenant: &TenantId,
        mentions: Vec<EntityMention>,
    ) -> Result<usize, GraphError> {
        let mut store = self.store.write().await;
        let mut inserted = 0;
        for mention in mentions {
            let key = (tenant.clone(), mention.node_id, mention.paper_id.clone());
            match store.mentions.get_mut(&key) {
                // Duplicate rows for the same (node, paper) merge
                Some(count) => *count = (*count).max(mention.mention_count),
                None => {
                    store.mentions.insert(key, mention.mention_count);
                    inserted += 1;
                }
            }
            store
                .mentions_by_paper
                .entry((tenant.clone(), mention.paper_id))
                .or_default()
                .insert(mention.node_id);
        }
        Ok(inserted)
    }

    async fn insert_entity_alias(
        &self,
        tenant: &TenantId,
        alias: EntityAlias,
    ) -> Result<bool, GraphError> {
        let mut store = self.store.write().await;
        Ok(store.aliases.insert((
            tenant.clone(),
            alias.node_id,
            alias.alias_name,
            alias.source_paper_id,
        )))
    }

    async fn insert_entity_link(
        &self,
        tenant: &TenantId,
        link: EntityLink,
    ) -> Result<(), GraphError> {
        let mut store = self.store.write().await;
        store.links.push((tenant.clone(), link));
        Ok(())
    }

    async fn get_approved_alias_targets_for_nodes(
        &self,
        tenant: &TenantId,
        node_ids: &[NodeId],
    ) -> Result<HashMap<NodeId, NodeId>, GraphError> {
        let store = self.store.read().await;
        let wanted: HashSet<NodeId> = node_ids.iter().copied().collect();
        let mut targets = HashMap::new();
        for (link_tenant, link) in &store.links {
            if link_tenant == tenant
                && link.status == LinkStatus::Approved
                && link.link_type == "alias_of"
                && wanted.contains(&link.node_id)
            {
                targets.insert(link.node_id, link.canonical_node_id);
            }
        }
        Ok(targets)
    }

    async fn insert_edges(
        &self,
        tenant: &TenantId,
        edges: Vec<NewEdge>,
    ) -> Result<Vec<EdgeId>, GraphError> {
        let mut store = self.store.write().await;
        Ok(edges
            .into_iter()
            .map(|edge| store.insert_edge_row(tenant, edge))
            .collect())
    }

    async fn update_edges_evidence(
        &self,
        tenant: &TenantId,
        updates: Vec<(EdgeId, String)>,
    ) -> Result<usize, GraphError> {
        let mut store = self.store.write().await;
        let mut updated = 0;
        for (edge_id, evidence) in updates {
            if let Some(edge) = store.edges.get_mut(&(tenant.clone(), edge_id)) {
                edge.evidence = Some(evidence);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn insert_insights(
        &self,
        tenant: &TenantId,
        insights: Vec<InferredInsight>,
    ) -> Result<usize, GraphError> {
        let mut store = self.store.write().await;
        let count = insights.len();
        store
            .insights
            .entry(tenant.clone())
            .or_default()
            .extend(insights);
        Ok(count)
    }

    async fn get_nodes_for_paper(
        &self,
        tenant: &TenantId,
        paper_id: &str,
    ) -> Result<Vec<GraphNode>, GraphError> {
        let store = self.store.read().await;
        let ids = store
            .mentions_by_paper
            .get(&(tenant.clone(), paper_id.to_string()));
        Ok(ids
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| store.nodes.get(&(tenant.clone(), *id)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_edges_for_paper(
        &self,
        tenant: &TenantId,
        paper_id: &str,
    ) -> Result<Vec<GraphEdge>, GraphError> {
        let store = self.store.read().await;
        Ok(store
            .edges_by_paper
            .get(&(tenant.clone(), paper_id.to_string()))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| store.edges.get(&(tenant.clone(), *id)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_edges_by_source_nodes(
        &self,
        tenant: &TenantId,
        node_ids: &[NodeId],
    ) -> Result<Vec<GraphEdge>, GraphError> {
        let store = self.store.read().await;
        let mut found = Vec::new();
        for node_id in node_ids {
            if let Some(ids) = store.edges_by_source.get(&(tenant.clone(), *node_id)) {
                found.extend(
                    ids.iter()
                        .filter_map(|id| store.edges.get(&(tenant.clone(), *id)))
                        .cloned(),
                );
            }
        }
        Ok(found)
    }

    async fn get_edges_by_target_nodes(
        &self,
        tenant: &TenantId,
        node_ids: &[NodeId],
    ) -> Result<Vec<GraphEdge>, GraphError> {
        let store = self.store.read().await;
        let mut found = Vec::new();
        for node_id in node_ids {
            if let Some(ids) = store.edges_by_target.get(&(tenant.clone(), *node_id)) {
                found.extend(
                    ids.iter()
                        .filter_map(|id| store.edges.get(&(tenant.clone(), *id)))
                        .cloned(),
                );
            }
        }
        Ok(found)
    }

    async fn get_papers_by_ids(
        &self,
        tenant: &TenantId,
        paper_ids: &[String],
    ) -> Result<Vec<Paper>, GraphError> {
        let store = self.store.read().await;
        Ok(paper_ids
            .iter()
            .filter_map(|id| store.papers.get(&(tenant.clone(), id.clone())))
            .cloned()
            .collect())
    }

    async fn get_graph_data(
        &self,
        tenant: &TenantId,
    ) -> Result<(Vec<GraphNode>, Vec<GraphEdge>), GraphError> {
        let store = self.store.read().await;
        let mut nodes: Vec<GraphNode> = store
            .nodes
            .iter()
            .filter(|((t, _), _)| t == tenant)
            .map(|(_, n)| n.clone())
            .collect();
        nodes.sort_by_key(|n| n.id);
        let mut edges: Vec<GraphEdge> = store
            .edges
            .iter()
            .filter(|((t, _), _)| t == tenant)
            .map(|(_, e)| e.clone())
            .collect();
        edges.sort_by_key(|e| e.id);
        Ok((nodes, edges))
    }

    async fn get_total_paper_count(&self, tenant: &TenantId) -> Result<u64, GraphError> {
        let store = self.store.read().await;
        Ok(store.papers.keys().filter(|(t, _)| t == tenant).count() as u64)
    }

    async fn create_pipeline_job(
        &self,
        tenant: &TenantId,
        job: PipelineJob,
    ) -> Result<(), GraphError> {
        let mut store = self.store.write().await;
        store.jobs.insert((tenant.clone(), job.id), job);
        Ok(())
    }

    async fn update_pipeline_job(
        &self,
        tenant: &TenantId,
        job: PipelineJob,
    ) -> Result<(), GraphError> {
        let mut store = self.store.write().await;
        let key = (tenant.clone(), job.id);
        if !store.jobs.contains_key(&key) {
            return Err(GraphError::NodeNotFound(format!("job {}", job.id)));
        }
        store.jobs.insert(key, job);
        Ok(())
    }

    async fn get_pipeline_job(
        &self,
        tenant: &TenantId,
        job_id: Uuid,
    ) -> Result<Option<PipelineJob>, GraphError> {
        let store = self.store.read().await;
        Ok(store.jobs.get(&(tenant.clone(), job_id)).cloned())
    }

    async fn list_pipeline_jobs(
        &self,
        tenant: &TenantId,
        page: u32,
        limit: u32,
        status: Option<JobStatus>,
    ) -> Result<Vec<PipelineJob>, GraphError> {
        let store = self.store.read().await;
        let mut jobs: Vec<PipelineJob> = store
            .jobs
            .iter()
            .filter(|((t, _), _)| t == tenant)
            .map(|(_, j)| j.clone())
            .filter(|j| status.map_or(true, |s| j.status == s))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let page = page.max(1);
        let start = ((page - 1) * limit) as usize;
        Ok(jobs.into_iter().skip(start).take(limit as usize).collect())
    }

    async fn count_pipeline_jobs_since(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
    ) -> Result<u64, GraphError> {
        let store = self.store.read().await;
        Ok(store
            .jobs
            .iter()
            .filter(|((t, _), job)| t == tenant && job.created_at >= since)
            .count() as u64)
    }

    async fn list_processing_jobs_older_than(
        &self,
        tenant: &TenantId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PipelineJob>, GraphError> {
        let store = self.store.read().await;
        Ok(store
            .jobs
            .iter()
            .filter(|((t, _), job)| {
                t == tenant && job.status == JobStatus::Processing && job.updated_at < cutoff
            })
            .map(|(_, j)| j.clone())
            .collect())
    }

    async fn get_tenant_settings(&self, tenant: &TenantId) -> Result<TenantSettings, GraphError> {
        let store = self.store.read().await;
        Ok(store.settings.get(tenant).cloned().unwrap_or_default())
    }

    async fn update_tenant_settings(
        &self,
        tenant: &TenantId,
        settings: TenantSettings,
    ) -> Result<(), GraphError> {
        let mut store = self.store.write().await;
        store.settings.insert(tenant.clone(), settings);
        Ok(())
    }
}

/// Append-only in-memory usage ledger
#[derive(Default)]
pub struct InMemoryUsageLedger {
    events: RwLock<Vec<UsageEvent>>,
}

impl InMemoryUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded events for a tenant (test observability)
    pub async fn event_count(&self, tenant: &TenantId) -> usize {
        let events = self.events.read().await;
        events.iter().filter(|e| &e.tenant_id == tenant).count()
    }
}

#[async_trait]
impl UsageLedger for InMemoryUsageLedger {
    async fn record(&self, event: UsageEvent) -> Result<(), GraphError> {
        let mut events = self.events.write().await;
        events.push(event);
        Ok(())
    }

    async fn stats_since(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
    ) -> Result<UsageStats, GraphError> {
        let events = self.events.read().await;
        let mut stats = UsageStats::default();
        for event in events.iter() {
            if &event.tenant_id == tenant && event.timestamp >= since {
                stats.absorb(event);
            }
        }
        Ok(stats)
    }
}

/// In-memory per-call cache
#[derive(Default)]
pub struct InMemoryCallCache {
    entries: RwLock<HashMap<CallCacheKey, CachedCall>>,
}

impl InMemoryCallCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CallCache for InMemoryCallCache {
    async fn get(&self, key: &CallCacheKey) -> Option<CachedCall> {
        self.entries.read().await.get(key).cloned()
    }

    async fn put(&self, key: CallCacheKey, entry: CachedCall) {
        self.entries.write().await.insert(key, entry);
    }
}

/// In-memory derived-artifact cache
#[derive(Default)]
pub struct InMemoryDerivedCache {
    entries: RwLock<HashMap<DerivedCacheKey, serde_json::Value>>,
}

impl InMemoryDerivedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl DerivedCache for InMemoryDerivedCache {
    async fn get(&self, key: &DerivedCacheKey) -> Option<serde_json::Value> {
        self.entries.read().await.get(key).cloned()
    }

    async fn put(&self, key: DerivedCacheKey, value: serde_json::Value) {
        self.entries.write().await.insert(key, value);
    }
}

/// Deterministic embedder: folds bytes into a fixed-width vector.
///
/// Not semantically meaningful; it exists so the embedding code paths run in
/// tests without a provider.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut vector = vec![0.0f32; self.dimensions];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % self.dimensions] += byte as f32 / 255.0;
        }
        Ok(vector)
    }
}

/// Cosine-similarity alias resolver over stored node embeddings
pub struct CosineAliasResolver {
    store: Arc<InMemoryGraphStore>,
}

impl CosineAliasResolver {
    pub fn new(store: Arc<InMemoryGraphStore>) -> Self {
        Self { store }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

#[async_trait]
impl AliasResolver for CosineAliasResolver {
    async fn resolve_entity(
        &self,
        tenant: &TenantId,
        context: &EntityContext,
        embedding: &EmbeddingPair,
        gating_threshold: f64,
    ) -> Result<ResolutionDecision, GraphError> {
        let (nodes, _) = self.store.get_graph_data(tenant).await?;
        let canonical = canonicalize(&context.name);

        let mut best: Option<(NodeId, f64)> = None;
        for node in nodes {
            if node.node_type != context.entity_type {
                continue;
            }
            if node.canonical_name == canonical {
                return Ok(ResolutionDecision::ExactMatch { node_id: node.id });
            }
            let Some(index) = &node.embedding_index else {
                continue;
            };
            let similarity = cosine(&embedding.index, index);
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((node.id, similarity));
            }
        }

        let Some((node_id, similarity)) = best else {
            return Ok(ResolutionDecision::New);
        };
        debug!(
            "Resolver best match for '{}': node {} at {:.3}",
            context.name, node_id, similarity
        );
        if similarity >= 0.98 {
            Ok(ResolutionDecision::ExactMatch { node_id })
        } else if similarity >= gating_threshold {
            Ok(ResolutionDecision::AutoApprove {
                node_id,
                confidence: similarity,
            })
        } else if similarity >= gating_threshold - 0.10 {
            Ok(ResolutionDecision::ProposeLink {
                node_id,
                confidence: similarity,
            })
        } else {
            Ok(ResolutionDecision::New)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(name: &str) -> TenantId {
        TenantId::new(name)
    }

    fn new_node(name: &str, node_type: &str) -> NewNode {
        NewNode::new(node_type, name)
    }

    #[tokio::test]
    async fn test_node_upsert_converges_on_conflict() {
        let store = InMemoryGraphStore::new();
        let t = tenant("t1");
        let a = store.insert_node(&t, new_node("bert", "model")).await.unwrap();
        let b = store.insert_node(&t, new_node("bert", "model")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.node_count(&t).await, 1);

        let c = store.insert_node(&t, new_node("bert", "dataset")).await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_batched_lookup_keys() {
        let store = InMemoryGraphStore::new();
        let t = tenant("t1");
        store.insert_node(&t, new_node("bert", "model")).await.unwrap();

        let found = store
            .find_nodes_by_canonical_names(
                &t,
                &[
                    ("bert".to_string(), "model".to_string()),
                    ("glue".to_string(), "dataset".to_string()),
                ],
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("bert|model"));
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let store = InMemoryGraphStore::new();
        let a = tenant("a");
        let b = tenant("b");
        store.insert_node(&a, new_node("bert", "model")).await.unwrap();

        assert_eq!(store.node_count(&a).await, 1);
        assert_eq!(store.node_count(&b).await, 0);
        let found = store
            .find_node_by_canonical_name(&b, "bert", "model")
            .await
            .unwrap();
        assert!(found.is_none());
        let (nodes, edges) = store.get_graph_data(&b).await.unwrap();
        assert!(nodes.is_empty() && edges.is_empty());
    }

    #[tokio::test]
    async fn test_mentions_merge_not_duplicate() {
        let store = InMemoryGraphStore::new();
        let t = tenant("t1");
        let id = store.insert_node(&t, new_node("bert", "model")).await.unwrap();

        let mention = EntityMention {
            node_id: id,
            paper_id: "p1".to_string(),
            mention_count: 2,
        };
        let first = store
            .insert_entity_mentions(&t, vec![mention.clone()])
            .await
            .unwrap();
        let second = store.insert_entity_mentions(&t, vec![mention]).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(store.mention_count(&t).await, 1);
    }

    #[tokio::test]
    async fn test_alias_unique_per_paper() {
        let store = InMemoryGraphStore::new();
        let t = tenant("t1");
        let id = store.insert_node(&t, new_node("bert", "model")).await.unwrap();
        let alias = EntityAlias {
            node_id: id,
            alias_name: "BERT".to_string(),
            source_paper_id: "p1".to_string(),
        };
        assert!(store.insert_entity_alias(&t, alias.clone()).await.unwrap());
        assert!(!store.insert_entity_alias(&t, alias).await.unwrap());
    }

    #[tokio::test]
    async fn test_edge_indexes_cover_both_endpoints() {
        let store = InMemoryGraphStore::new();
        let t = tenant("t1");
        let a = store.insert_node(&t, new_node("a", "method")).await.unwrap();
        let b = store.insert_node(&t, new_node("b", "method")).await.unwrap();
        let ids = store
            .insert_edges(
                &t,
                vec![NewEdge {
                    source_node_id: a,
                    target_node_id: b,
                    relationship_type: "uses".to_string(),
                    confidence: 0.8,
                    evidence: None,
                    provenance: EdgeProvenance::from_validation(ReviewStatus::Approved, "ok")
                        .with_source_paper("p1"),
                    review_status: ReviewStatus::Approved,
                }],
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);

        let by_source = store.get_edges_by_source_nodes(&t, &[a]).await.unwrap();
        let by_target = store.get_edges_by_target_nodes(&t, &[b]).await.unwrap();
        let by_paper = store.get_edges_for_paper(&t, "p1").await.unwrap();
        assert_eq!(by_source.len(), 1);
        assert_eq!(by_target.len(), 1);
        assert_eq!(by_paper.len(), 1);
    }

    #[tokio::test]
    async fn test_job_listing_pages_newest_first() {
        let store = InMemoryGraphStore::new();
        let t = tenant("t1");
        for _ in 0..5 {
            let job = PipelineJob::pending(Uuid::new_v4(), None);
            store.create_pipeline_job(&t, job).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let page1 = store.list_pipeline_jobs(&t, 1, 2, None).await.unwrap();
        let page3 = store.list_pipeline_jobs(&t, 3, 2, None).await.unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page3.len(), 1);
        assert!(page1[0].created_at >= page1[1].created_at);
    }

    #[tokio::test]
    async fn test_ledger_windows_by_tenant_and_time() {
        let ledger = InMemoryUsageLedger::new();
        let t = tenant("t1");
        let event = UsageEvent {
            tenant_id: t.clone(),
            user_id: None,
            pipeline_stage: "ingestion".to_string(),
            agent_name: None,
            model: "m".to_string(),
            provider: "gemini".to_string(),
            input_tokens: 10,
            output_tokens: 5,
            estimated_cost_usd: 0.001,
            execution_mode: ExecutionMode::Hosted,
            job_id: None,
            metadata: serde_json::Value::Null,
            timestamp: Utc::now(),
        };
        ledger.record(event.clone()).await.unwrap();
        let mut other = event;
        other.tenant_id = tenant("t2");
        ledger.record(other).await.unwrap();

        let stats = ledger
            .stats_since(&t, Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_cosine_resolver_thresholds() {
        let store = Arc::new(InMemoryGraphStore::new());
        let t = tenant("t1");
        let mut node = NewNode::new("method", "existing method");
        node.embedding_raw = Some(vec![1.0, 0.0]);
        node.embedding_index = Some(vec![1.0, 0.0]);
        store.insert_node(&t, node).await.unwrap();

        let resolver = CosineAliasResolver::new(Arc::clone(&store));
        let context = EntityContext {
            name: "candidate".to_string(),
            entity_type: "method".to_string(),
            definition: None,
            paper_title: "p".to_string(),
            evidence: None,
        };

        // Identical direction: exact match
        let identical = EmbeddingPair::from_raw(vec![5.0, 0.0]);
        let decision = resolver
            .resolve_entity(&t, &context, &identical, 0.9)
            .await
            .unwrap();
        assert!(matches!(decision, ResolutionDecision::ExactMatch { .. }));

        // Similar but not identical: auto approve above the gate
        let similar = EmbeddingPair::from_raw(vec![1.0, 0.25]);
        let decision = resolver
            .resolve_entity(&t, &context, &similar, 0.9)
            .await
            .unwrap();
        assert!(matches!(decision, ResolutionDecision::AutoApprove { .. }));

        // Orthogonal: new
        let orthogonal = EmbeddingPair::from_raw(vec![0.0, 1.0]);
        let decision = resolver
            .resolve_entity(&t, &context, &orthogonal, 0.9)
            .await
            .unwrap();
        assert!(matches!(decision, ResolutionDecision::New));
    }
}
