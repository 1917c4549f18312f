//! The per-paper processing pipeline
//!
//! Stages run in strict order, each emitting a progress marker before it
//! starts: ingestion, entity_extraction, relationship_extraction, validation,
//! persist_entities_edges, evidence, reasoning, completed. The first
//! unrecoverable error aborts the run; completed side-effect stages keep
//! their writes.

use crate::agents::{
    entity_extraction, ingestion, reasoning as reasoning_agent, relationship_core,
    relationship_evidence,
};
use crate::cache::{DerivedArtifactKind, DerivedCache, DerivedCacheKey};
use crate::config::Config;
use crate::crypto::open_api_key;
use crate::errors::{PipelineError, PipelineResult};
use crate::persist::GraphPersister;
use crate::runner::{AgentRunner, RunContext};
use crate::subgraph::SubgraphBuilder;
use crate::tenant::{TenantSettings, MAX_REASONING_DEPTH, MIN_REASONING_DEPTH};
use crate::traits::{EmbeddingProvider, GraphStore, ProgressSink};
use crate::types::{
    clamp_evidence, ExecutionMode, InferredInsight, JobStats, Paper, ReviewStatus, Section,
    StageMarker, TenantId,
};
use crate::validation::{self, EdgeCandidate, EntityCandidate};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Raw paper material entering the pipeline
#[derive(Debug, Clone)]
pub struct PaperInput {
    pub paper_id: String,
    pub title: Option<String>,
    pub raw_text: String,
    pub metadata: serde_json::Value,
}

/// Per-run options layered over tenant settings and process config
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub force_reingest: bool,
    pub reasoning_enabled: Option<bool>,
    pub reasoning_depth: Option<u32>,
    pub full_graph: Option<bool>,
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineRunResult {
    pub stats: JobStats,
    pub warnings: Vec<String>,
}

/// Composes the stages for one paper
pub struct PipelineDriver {
    store: Arc<dyn GraphStore>,
    runner: Arc<AgentRunner>,
    derived_cache: Arc<dyn DerivedCache>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    persister: GraphPersister,
    subgraph_builder: SubgraphBuilder,
    config: Arc<Config>,
}

impl PipelineDriver {
    pub fn new(
        store: Arc<dyn GraphStore>,
        runner: Arc<AgentRunner>,
        derived_cache: Arc<dyn DerivedCache>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        persister: GraphPersister,
        config: Arc<Config>,
    ) -> Self {
        Self {
            subgraph_builder: SubgraphBuilder::new(Arc::clone(&store)),
            store,
            runner,
            derived_cache,
            embedder,
            persister,
            config,
        }
    }

    /// Run the full pipeline for one paper.
    pub async fn run(
        &self,
        tenant: &TenantId,
        input: &PaperInput,
        settings: &TenantSettings,
        options: &PipelineOptions,
        job_id: Option<Uuid>,
        progress: &dyn ProgressSink,
    ) -> PipelineResult<PipelineRunResult> {
        let mut result = PipelineRunResult::default();

        // Idempotency gate: an already-ingested paper is a successful no-op
        let force = options.force_reingest || self.config.force_reingest;
        if !force && self.store.paper_exists(tenant, &input.paper_id).await? {
            info!(
                "Paper {} already ingested for tenant {}; skipping",
                input.paper_id, tenant
            );
            progress.on_stage(StageMarker::Completed).await;
            return Ok(result);
        }

        let ctx = self.run_context(tenant, settings, job_id)?;

        // Ingestion
        progress.on_stage(StageMarker::Ingestion).await;
        let (paper, sections, ingest_warnings) =
            self.ingest(tenant, input, &ctx, &mut result.stats).await?;
        result.warnings.extend(ingest_warnings);

        // Entity extraction
        progress.on_stage(StageMarker::EntityExtraction).await;
        let entities = self
            .extract_entities(tenant, &paper, &sections, &ctx, &mut result.stats)
            .await?;

        // Relationship-core extraction
        progress.on_stage(StageMarker::RelationshipExtraction).await;
        let relationships = self
            .extract_relationships(tenant, &paper, &sections, &entities, settings, &ctx, &mut result.stats)
            .await?;

        // Validation
        progress.on_stage(StageMarker::Validation).await;
        let entity_candidates: Vec<EntityCandidate> = entities
            .iter()
            .map(|e| EntityCandidate {
                name: e.canonical_name.clone(),
                entity_type: e.entity_type.clone(),
                confidence: e.confidence,
                definition: e.definition.clone(),
            })
            .collect();
        let edge_candidates: Vec<EdgeCandidate> = relationships
            .iter()
            .map(|r| EdgeCandidate {
                source: r.source.clone(),
                target: r.target.clone(),
                relationship_type: r.relationship_type.clone(),
                confidence: r.confidence,
                section_type: r.section_type,
                part_index: r.part_index,
            })
            .collect();
        let outcome = validation::validate(&entity_candidates, &edge_candidates);
        if self.config.validation_debug {
            validation::debug_report(&outcome);
        }

        // Persistence: all decisions are written, including rejected ones
        progress.on_stage(StageMarker::PersistEntitiesEdges).await;
        let entity_outcome = self
            .persister
            .persist_entities(
                tenant,
                &paper,
                &outcome.entities,
                settings.clamped_gating_threshold(),
            )
            .await?;
        result.stats.nodes_created = entity_outcome.nodes_created;
        result.stats.nodes_reused = entity_outcome.nodes_reused;
        result.stats.aliases_recorded = entity_outcome.aliases_recorded;
        result.stats.links_created = entity_outcome.links_created;
        result.stats.mentions_recorded = entity_outcome.mentions_recorded;

        let edge_outcome = self
            .persister
            .persist_edges(tenant, &paper, &outcome.edges, &entity_outcome.entity_map)
            .await?;
        result.stats.edges_created = edge_outcome.edges_created;
        result.stats.edges_skipped = edge_outcome.edges_skipped;
        result.warnings.extend(edge_outcome.warnings);

        // Evidence enrichment for surviving edges
        progress.on_stage(StageMarker::Evidence).await;
        self.enrich_evidence(
            tenant,
            &sections,
            &outcome.edges,
            &edge_outcome.edge_ids,
            &ctx,
            &mut result,
        )
        .await?;

        // Reasoning over the bounded subgraph
        let reasoning_on = options.reasoning_enabled.unwrap_or(self.config.reasoning_enabled);
        if reasoning_on {
            progress.on_stage(StageMarker::Reasoning).await;
            self.reason(tenant, &paper, settings, options, &ctx, &mut result)
                .await?;
        }

        self.consistency_audit(tenant, &paper, &mut result).await?;

        progress.on_stage(StageMarker::Completed).await;
        info!(
            "Pipeline completed for paper {} (tenant {}): {:?}",
            paper.paper_id, tenant, result.stats
        );
        Ok(result)
    }

    fn run_context(
        &self,
        tenant: &TenantId,
        settings: &TenantSettings,
        job_id: Option<Uuid>,
    ) -> PipelineResult<RunContext> {
        let api_key = match settings.execution_mode {
            ExecutionMode::ByoKey => {
                let blob = settings.encrypted_api_key.as_ref().ok_or_else(|| {
                    PipelineError::InvalidInput(
                        "byo_key execution requires an encrypted API key".to_string(),
                    )
                })?;
                let master = self.config.master_key.as_ref().ok_or_else(|| {
                    PipelineError::InvalidInput(
                        "platform master key is not configured".to_string(),
                    )
                })?;
                Some(open_api_key(blob, master).map_err(|e| {
                    PipelineError::InvalidInput(format!("tenant API key unsealing failed: {}", e))
                })?)
            }
            ExecutionMode::Hosted => None,
        };
        Ok(RunContext {
            tenant: tenant.clone(),
            job_id,
            execution_mode: settings.execution_mode,
            api_key,
            model: self.config.default_model.clone(),
        })
    }

    async fn ingest(
        &self,
        tenant: &TenantId,
        input: &PaperInput,
        ctx: &RunContext,
        stats: &mut JobStats,
    ) -> PipelineResult<(Paper, Vec<Section>, Vec<String>)> {
        let mut text = input.raw_text.clone();
        if text.chars().count() > ingestion::MAX_INGEST_CHARS {
            text = text.chars().take(ingestion::MAX_INGEST_CHARS).collect();
        }

        let agent_input = json!({
            "paper_id": input.paper_id,
            "text": text,
        });
        let derived_key = DerivedCacheKey::derive(
            DerivedArtifactKind::Sections,
            ingestion::PROMPT_VERSION,
            ingestion::SCHEMA_VERSION,
            &agent_input,
            tenant,
        );

        let output: ingestion::IngestionOutput = match self.derived_cache.get(&derived_key).await {
            Some(cached) => {
                stats.cache_hits += 1;
                serde_json::from_value(cached).map_err(|e| PipelineError::AgentExecution {
                    agent: "ingestion".to_string(),
                    cause: format!("cached sections no longer deserialize: {}", e),
                })?
            }
            None => {
                let run = self
                    .runner
                    .run::<ingestion::IngestionOutput>(&ingestion::spec(), &agent_input, ctx)
                    .await?;
                if run.cache_hit {
                    stats.cache_hits += 1;
                } else {
                    stats.llm_calls += 1;
                }
                let value = serde_json::to_value(&run.value)
                    .map_err(|e| PipelineError::AgentExecution {
                        agent: "ingestion".to_string(),
                        cause: e.to_string(),
                    })?;
                self.derived_cache.put(derived_key, value).await;
                run.value
            }
        };

        let abstract_text = output
            .sections
            .iter()
            .find(|s| s.section_type == crate::types::SectionType::Abstract)
            .map(|s| s.content.clone())
            .unwrap_or_default();
        let title = input
            .title
            .clone()
            .unwrap_or_else(|| input.paper_id.clone());

        let mut paper = Paper::new(&input.paper_id, &title).with_abstract(abstract_text.clone());
        paper.year = output.year;
        paper.metadata = input.metadata.clone();
        if let serde_json::Value::Object(ref mut map) = paper.metadata {
            map.insert("authors".to_string(), json!(output.authors));
        }
        self.store.upsert_paper(tenant, paper.clone()).await?;

        // Paper embedding is best-effort: failure is logged, never fatal
        if let Some(embedder) = &self.embedder {
            let embed_text = format!("{}\n{}", title, abstract_text);
            match embedder.embed(&embed_text).await {
                Ok(embedding) => {
                    if let Err(e) = self
                        .store
                        .upsert_paper_embedding(tenant, &input.paper_id, embedding)
                        .await
                    {
                        warn!("Paper embedding upsert failed for {}: {}", input.paper_id, e);
                    }
                }
                Err(e) => warn!("Paper embedding failed for {}: {}", input.paper_id, e),
            }
        }

        let sections: Vec<Section> = output
            .sections
            .iter()
            .enumerate()
            .map(|(idx, s)| Section::new(&input.paper_id, s.section_type, &s.content, idx))
            .collect();
        stats.sections_inserted = self
            .store
            .insert_paper_sections(tenant, sections.clone())
            .await? as u64;

        Ok((paper, sections, output.warnings))
    }

    async fn extract_entities(
        &self,
        tenant: &TenantId,
        paper: &Paper,
        sections: &[Section],
        ctx: &RunContext,
        stats: &mut JobStats,
    ) -> PipelineResult<Vec<entity_extraction::ExtractedEntity>> {
        let agent_input = json!({
            "paper_id": paper.paper_id,
            "title": paper.title,
            "sections": sections.iter().map(|s| json!({
                "section_type": s.section_type,
                "part_index": s.part_index,
                "content": s.content,
            })).collect::<Vec<_>>(),
        });
        let derived_key = DerivedCacheKey::derive(
            DerivedArtifactKind::Entities,
            entity_extraction::PROMPT_VERSION,
            entity_extraction::SCHEMA_VERSION,
            &agent_input,
            tenant,
        );
        if let Some(cached) = self.derived_cache.get(&derived_key).await {
            stats.cache_hits += 1;
            let entities: Vec<entity_extraction::ExtractedEntity> = serde_json::from_value(cached)
                .map_err(|e| PipelineError::AgentExecution {
                    agent: "entity_extraction".to_string(),
                    cause: format!("cached entities no longer deserialize: {}", e),
                })?;
            stats.entities_extracted = entities.len() as u64;
            return Ok(entities);
        }

        let run = self
            .runner
            .run::<entity_extraction::EntityExtractionOutput>(
                &entity_extraction::spec(),
                &agent_input,
                ctx,
            )
            .await?;
        if run.cache_hit {
            stats.cache_hits += 1;
        } else {
            stats.llm_calls += 1;
        }

        let mut entities = run.value.entities;
        entities.truncate(entity_extraction::MAX_ENTITIES);
        stats.entities_extracted = entities.len() as u64;

        let value = serde_json::to_value(&entities).map_err(|e| PipelineError::AgentExecution {
            agent: "entity_extraction".to_string(),
            cause: e.to_string(),
        })?;
        self.derived_cache.put(derived_key, value).await;

        Ok(entities)
    }

    #[allow(clippy::too_many_arguments)]
    async fn extract_relationships(
        &self,
        tenant: &TenantId,
        paper: &Paper,
        sections: &[Section],
        entities: &[entity_extraction::ExtractedEntity],
        settings: &TenantSettings,
        ctx: &RunContext,
        stats: &mut JobStats,
    ) -> PipelineResult<Vec<relationship_core::RelationshipCandidate>> {
        let agent_input = json!({
            "paper_id": paper.paper_id,
            "entities": entities.iter().map(|e| json!({
                "name": e.canonical_name,
                "type": e.entity_type,
            })).collect::<Vec<_>>(),
            "sections": sections.iter().map(|s| json!({
                "section_type": s.section_type,
                "part_index": s.part_index,
                "content": s.content,
            })).collect::<Vec<_>>(),
        });
        let derived_key = DerivedCacheKey::derive(
            DerivedArtifactKind::RelationshipCandidates,
            relationship_core::PROMPT_VERSION,
            relationship_core::SCHEMA_VERSION,
            &agent_input,
            tenant,
        );

        if let Some(cached) = self.derived_cache.get(&derived_key).await {
            stats.cache_hits += 1;
            let candidates: Vec<relationship_core::RelationshipCandidate> =
                serde_json::from_value(cached).map_err(|e| PipelineError::AgentExecution {
                    agent: "relationship_core".to_string(),
                    cause: format!("cached candidates no longer deserialize: {}", e),
                })?;
            stats.relationships_extracted = candidates.len() as u64;
            return Ok(candidates);
        }

        let run = self
            .runner
            .run::<relationship_core::RelationshipOutput>(
                &relationship_core::spec(),
                &agent_input,
                ctx,
            )
            .await?;
        if run.cache_hit {
            stats.cache_hits += 1;
        } else {
            stats.llm_calls += 1;
        }

        let speculative_floor = if settings.allow_speculative_edges {
            relationship_core::MIN_RELATIONSHIP_CONFIDENCE
        } else {
            crate::validation::CONFIDENCE_REVIEW
        };
        let mut candidates: Vec<relationship_core::RelationshipCandidate> = run
            .value
            .relationships
            .into_iter()
            .filter(|r| r.confidence >= speculative_floor)
            .filter(|r| settings.relationship_type_enabled(&r.relationship_type))
            .collect();
        // Canonical sort keeps downstream cache keys order-invariant
        candidates.sort_by(|a, b| {
            (&a.source, &a.relationship_type, &a.target)
                .cmp(&(&b.source, &b.relationship_type, &b.target))
        });
        candidates.truncate(relationship_core::MAX_RELATIONSHIPS);
        stats.relationships_extracted = candidates.len() as u64;

        let value = serde_json::to_value(&candidates).map_err(|e| {
            PipelineError::AgentExecution {
                agent: "relationship_core".to_string(),
                cause: e.to_string(),
            }
        })?;
        self.derived_cache.put(derived_key, value).await;

        Ok(candidates)
    }

    async fn enrich_evidence(
        &self,
        tenant: &TenantId,
        sections: &[Section],
        edges: &[crate::validation::ValidatedEdge],
        edge_ids: &HashMap<String, i64>,
        ctx: &RunContext,
        result: &mut PipelineRunResult,
    ) -> PipelineResult<()> {
        let section_payload: Vec<serde_json::Value> = sections
            .iter()
            .map(|s| {
                json!({
                    "section_type": s.section_type,
                    "content": s.content,
                })
            })
            .collect();

        let mut updates: Vec<(i64, String)> = Vec::new();
        for edge in edges {
            if !matches!(edge.decision, ReviewStatus::Approved | ReviewStatus::Flagged) {
                continue;
            }
            let Some(&edge_id) = edge_ids.get(&edge.edge_key) else {
                continue;
            };
            let agent_input = json!({
                "edge_key": edge.edge_key,
                "source": edge.source_canonical,
                "target": edge.target_canonical,
                "relationship_type": edge.relationship_type,
                "sections": section_payload,
            });
            match self
                .runner
                .run::<relationship_evidence::EvidenceOutput>(
                    &relationship_evidence::spec(),
                    &agent_input,
                    ctx,
                )
                .await
            {
                Ok(run) => {
                    if run.cache_hit {
                        result.stats.cache_hits += 1;
                    } else {
                        result.stats.llm_calls += 1;
                    }
                    let evidence = run.value.evidence.trim().to_string();
                    if !evidence.is_empty() {
                        updates.push((edge_id, clamp_evidence(&evidence)));
                    }
                }
                // Evidence is per-edge best-effort
                Err(e) => {
                    let message = format!("Evidence failed for {}: {}", edge.edge_key, e);
                    warn!("{}", message);
                    result.warnings.push(message);
                }
            }
        }

        if !updates.is_empty() {
            result.stats.evidence_updates =
                self.store.update_edges_evidence(tenant, updates).await? as u64;
        }
        Ok(())
    }

    async fn reason(
        &self,
        tenant: &TenantId,
        paper: &Paper,
        settings: &TenantSettings,
        options: &PipelineOptions,
        ctx: &RunContext,
        result: &mut PipelineRunResult,
    ) -> PipelineResult<()> {
        let depth = options
            .reasoning_depth
            .unwrap_or_else(|| settings.clamped_reasoning_depth())
            .clamp(MIN_REASONING_DEPTH, MAX_REASONING_DEPTH);
        let full_graph = options.full_graph.unwrap_or(self.config.reason_full_graph);

        let paper_ids = vec![paper.paper_id.clone()];
        let (subgraph, scope) = self
            .subgraph_builder
            .build(tenant, &paper_ids, depth, full_graph)
            .await?;
        if subgraph.nodes.is_empty() {
            debug!("Empty subgraph for paper {}; skipping reasoning", paper.paper_id);
            return Ok(());
        }
        let snapshot_hash = subgraph.snapshot_hash();

        // Snapshots are stored as derived artifacts so review surfaces can
        // recover exactly what a batch reasoned over.
        let snapshot_key = DerivedCacheKey::derive(
            DerivedArtifactKind::GraphSnapshot,
            reasoning_agent::PROMPT_VERSION,
            reasoning_agent::SCHEMA_VERSION,
            &json!({ "paper_ids": scope.paper_ids, "depth": scope.depth, "hash": snapshot_hash }),
            tenant,
        );
        self.derived_cache.put(snapshot_key, subgraph.to_payload()).await;

        let agent_input = json!({
            "graph": subgraph.to_payload(),
            "scope": { "paper_ids": scope.paper_ids, "depth": scope.depth },
        });
        let run = self
            .runner
            .run::<reasoning_agent::ReasoningOutput>(&reasoning_agent::spec(), &agent_input, ctx)
            .await?;
        if run.cache_hit {
            result.stats.cache_hits += 1;
        } else {
            result.stats.llm_calls += 1;
        }

        let known_nodes: std::collections::HashSet<i64> =
            subgraph.nodes.iter().map(|n| n.id).collect();
        let batch_id = Uuid::new_v4();
        let mut insights: Vec<InferredInsight> = Vec::new();
        for raw in run.value.insights {
            if raw.subject_nodes.iter().any(|id| !known_nodes.contains(id)) {
                let message = format!(
                    "Insight '{}' references nodes outside the subgraph; dropped",
                    raw.summary
                );
                warn!("{}", message);
                result.warnings.push(message);
                continue;
            }
            insights.push(InferredInsight {
                insight_type: raw.insight_type,
                subject_nodes: raw.subject_nodes,
                summary: raw.summary,
                reasoning_steps: raw.reasoning_steps,
                confidence: raw.confidence.clamp(0.0, 1.0),
                batch_id,
                graph_snapshot_hash: snapshot_hash.clone(),
                scope: scope.clone(),
            });
        }
        if !insights.is_empty() {
            result.stats.insights_created =
                self.store.insert_insights(tenant, insights).await? as u64;
        }
        Ok(())
    }

    /// Every approved edge must reference two approved nodes; violations are
    /// logged and surfaced as warnings, never fatal.
    async fn consistency_audit(
        &self,
        tenant: &TenantId,
        paper: &Paper,
        result: &mut PipelineRunResult,
    ) -> PipelineResult<()> {
        let edges = self.store.get_edges_for_paper(tenant, &paper.paper_id).await?;
        let approved: Vec<_> = edges
            .iter()
            .filter(|e| e.review_status == ReviewStatus::Approved)
            .collect();
        if approved.is_empty() {
            return Ok(());
        }
        let mut node_ids: Vec<i64> = approved
            .iter()
            .flat_map(|e| [e.source_node_id, e.target_node_id])
            .collect();
        node_ids.sort_unstable();
        node_ids.dedup();
        let nodes = self.store.get_nodes_by_ids(tenant, &node_ids).await?;
        let status_by_id: HashMap<i64, ReviewStatus> =
            nodes.iter().map(|n| (n.id, n.review_status)).collect();

        for edge in approved {
            for endpoint in [edge.source_node_id, edge.target_node_id] {
                match status_by_id.get(&endpoint) {
                    Some(ReviewStatus::Approved) => {}
                    other => {
                        let message = format!(
                            "Approved edge {} references node {} with status {:?}",
                            edge.id, endpoint, other
                        );
                        warn!("{}", message);
                        result.warnings.push(message);
                    }
                }
            }
        }
        Ok(())
    }
}
