//! Persistence of validated entities and edges
//!
//! Batch-first: one canonical-name lookup round-trip, then batched inserts
//! for nodes, aliases, mentions, and edges. Re-running the same paper with
//! identical inputs must not create additional rows; edges are inserted in
//! stable edge-key order so returned ids align with the evidence phase.

use crate::errors::GraphError;
use crate::traits::{
    node_lookup_key, AliasResolver, EmbeddingPair, EmbeddingProvider, EntityContext, GraphStore,
    ResolutionDecision,
};
use crate::types::{
    EdgeProvenance, EntityAlias, EntityLink, EntityMention, LinkStatus, NewEdge, NewNode, NodeId,
    Paper,
};
use crate::validation::{ValidatedEdge, ValidatedEntity};
use crate::TenantId;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Node type used for paper nodes
pub const PAPER_NODE_TYPE: &str = "paper";

/// Counters and the entity map produced by entity persistence
#[derive(Debug, Default)]
pub struct EntityPersistOutcome {
    /// canonical name -> node id, used to resolve edge endpoints
    pub entity_map: HashMap<String, NodeId>,
    pub nodes_created: u64,
    pub nodes_reused: u64,
    pub aliases_recorded: u64,
    pub links_created: u64,
    pub mentions_recorded: u64,
}

/// Counters and the edge-key map produced by edge persistence
#[derive(Debug, Default)]
pub struct EdgePersistOutcome {
    /// edge_key -> edge row id, used by the evidence phase
    pub edge_ids: HashMap<String, i64>,
    pub edges_created: u64,
    pub edges_skipped: u64,
    pub warnings: Vec<String>,
}

/// Persists validation output into the graph store
pub struct GraphPersister {
    store: Arc<dyn GraphStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    resolver: Option<Arc<dyn AliasResolver>>,
}

impl GraphPersister {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        resolver: Option<Arc<dyn AliasResolver>>,
    ) -> Self {
        Self {
            store,
            embedder,
            resolver,
        }
    }

    /// Persist validated entities for one paper.
    ///
    /// All decisions are persisted, including rejected ones, so they remain
    /// reviewable. The paper's own node is ensured and entered into the
    /// entity map under its canonical paper id.
    pub async fn persist_entities(
        &self,
        tenant: &TenantId,
        paper: &Paper,
        entities: &[ValidatedEntity],
        gating_threshold: f64,
    ) -> Result<EntityPersistOutcome, GraphError> {
        let mut outcome = EntityPersistOutcome::default();

        // One batched lookup for every (canonical, type) pair
        let keys: Vec<(String, String)> = entities
            .iter()
            .map(|e| (e.canonical_name.clone(), e.entity_type.clone()))
            .collect();
        let existing = self.store.find_nodes_by_canonical_names(tenant, &keys).await?;

        let mut alias_queue: Vec<EntityAlias> = Vec::new();
        let mut to_insert: Vec<NewNode> = Vec::new();
        let mut to_insert_names: Vec<String> = Vec::new();

        for entity in entities {
            let lookup = node_lookup_key(&entity.canonical_name, &entity.entity_type);
            if let Some(node) = existing.get(&lookup) {
                outcome.nodes_reused += 1;
                outcome
                    .entity_map
                    .entry(entity.canonical_name.clone())
                    .or_insert(node.id);
                if entity.display_name.to_lowercase() != entity.canonical_name {
                    alias_queue.push(EntityAlias {
                        node_id: node.id,
                        alias_name: entity.display_name.clone(),
                        source_paper_id: paper.paper_id.clone(),
                    });
                }
                continue;
            }

            // No exact match: give the semantic resolver a chance before
            // minting a new node.
            let embedding = self.embed_entity(paper, entity).await;
            if let (Some(resolver), Some(embedding)) = (self.resolver.as_ref(), embedding.as_ref())
            {
                let context = EntityContext {
                    name: entity.display_name.clone(),
                    entity_type: entity.entity_type.clone(),
                    definition: entity.definition.clone(),
                    paper_title: paper.title.clone(),
                    evidence: None,
                };
                match resolver
                    .resolve_entity(tenant, &context, embedding, gating_threshold)
                    .await
                {
                    Ok(ResolutionDecision::ExactMatch { node_id }) => {
                        outcome.nodes_reused += 1;
                        outcome
                            .entity_map
                            .entry(entity.canonical_name.clone())
                            .or_insert(node_id);
                        continue;
                    }
                    Ok(ResolutionDecision::AutoApprove { node_id, confidence }) => {
                        let head = self.canonical_head(tenant, node_id).await?;
                        let link_node = self
                            .insert_resolved_node(tenant, paper, entity, embedding, &mut outcome)
                            .await?;
                        self.store
                            .insert_entity_link(
                                tenant,
                                EntityLink::alias_of(link_node, head, confidence, LinkStatus::Approved),
                            )
                            .await?;
                        outcome.links_created += 1;
                        continue;
                    }
                    Ok(ResolutionDecision::ProposeLink { node_id, confidence }) => {
                        let head = self.canonical_head(tenant, node_id).await?;
                        let link_node = self
                            .insert_resolved_node(tenant, paper, entity, embedding, &mut outcome)
                            .await?;
                        self.store
                            .insert_entity_link(
                                tenant,
                                EntityLink::alias_of(link_node, head, confidence, LinkStatus::Proposed),
                            )
                            .await?;
                        outcome.links_created += 1;
                        continue;
                    }
                    Ok(ResolutionDecision::New) => {}
                    Err(e) => {
                        // Semantic resolution is best-effort
                        warn!("Alias resolution failed for '{}': {}", entity.display_name, e);
                    }
                }
            }

            to_insert.push(build_node(entity, embedding));
            to_insert_names.push(entity.canonical_name.clone());
        }

        // Batch insert the new nodes and extend the entity map in order
        if !to_insert.is_empty() {
            let display_names: Vec<(String, String)> = entities
                .iter()
                .filter(|e| to_insert_names.contains(&e.canonical_name))
                .map(|e| (e.canonical_name.clone(), e.display_name.clone()))
                .collect();
            let ids = self.store.insert_nodes(tenant, to_insert).await?;
            outcome.nodes_created += ids.len() as u64;
            for (canonical, id) in to_insert_names.iter().zip(ids.iter()) {
                outcome.entity_map.entry(canonical.clone()).or_insert(*id);
                if let Some((_, display)) = display_names.iter().find(|(c, _)| c == canonical) {
                    if display.to_lowercase() != *canonical {
                        alias_queue.push(EntityAlias {
                            node_id: *id,
                            alias_name: display.clone(),
                            source_paper_id: paper.paper_id.clone(),
                        });
                    }
                }
            }
        }

        // Ensure the paper node exists and lands in the entity map
        let paper_canonical = crate::canonical::canonicalize(&paper.paper_id);
        let (paper_node_id, paper_node_created) =
            self.ensure_paper_node(tenant, paper, &paper_canonical).await?;
        if paper_node_created {
            outcome.nodes_created += 1;
        }
        outcome.entity_map.insert(paper_canonical, paper_node_id);

        // Aliases: duplicates are ignored by the store
        for alias in alias_queue {
            match self.store.insert_entity_alias(tenant, alias).await {
                Ok(true) => outcome.aliases_recorded += 1,
                Ok(false) => {}
                Err(e) => warn!("Alias insert failed: {}", e),
            }
        }

        // One mention per distinct node id touched by this paper
        let mut mentions: Vec<EntityMention> = Vec::new();
        let mut seen: std::collections::HashSet<NodeId> = std::collections::HashSet::new();
        for entity in entities {
            if let Some(&node_id) = outcome.entity_map.get(&entity.canonical_name) {
                if seen.insert(node_id) {
                    mentions.push(EntityMention {
                        node_id,
                        paper_id: paper.paper_id.clone(),
                        mention_count: entity.mention_count,
                    });
                }
            }
        }
        if seen.insert(paper_node_id) {
            mentions.push(EntityMention {
                node_id: paper_node_id,
                paper_id: paper.paper_id.clone(),
                mention_count: 1,
            });
        }
        outcome.mentions_recorded = self.store.insert_entity_mentions(tenant, mentions).await? as u64;

        debug!(
            "Persisted entities for paper {}: {} created, {} reused, {} aliases",
            paper.paper_id, outcome.nodes_created, outcome.nodes_reused, outcome.aliases_recorded
        );
        Ok(outcome)
    }

    /// Persist validated edges in stable edge-key order.
    ///
    /// Every decision is persisted, including rejected edges. Edges whose
    /// endpoints are missing from the entity map are skipped with a warning.
    pub async fn persist_edges(
        &self,
        tenant: &TenantId,
        paper: &Paper,
        edges: &[ValidatedEdge],
        entity_map: &HashMap<String, NodeId>,
    ) -> Result<EdgePersistOutcome, GraphError> {
        let mut outcome = EdgePersistOutcome::default();

        // Stable sort by edge key keeps returned ids aligned to keys
        let mut ordered: Vec<&ValidatedEdge> = edges.iter().collect();
        ordered.sort_by(|a, b| a.edge_key.cmp(&b.edge_key));

        let mut rows: Vec<NewEdge> = Vec::new();
        let mut row_keys: Vec<String> = Vec::new();
        for edge in ordered {
            let (source_id, target_id) = match (
                entity_map.get(&edge.source_canonical),
                entity_map.get(&edge.target_canonical),
            ) {
                (Some(&s), Some(&t)) => (s, t),
                _ => {
                    let message = format!(
                        "Edge {} skipped: endpoint missing from entity map",
                        edge.edge_key
                    );
                    warn!("{}", message);
                    outcome.warnings.push(message);
                    outcome.edges_skipped += 1;
                    continue;
                }
            };

            let mut provenance =
                EdgeProvenance::from_validation(edge.decision, edge.joined_reasons())
                    .with_source_paper(&paper.paper_id);
            if let (Some(section_type), Some(part_index)) = (edge.section_type, edge.part_index) {
                provenance = provenance.with_section(section_type, part_index);
            }

            rows.push(NewEdge {
                source_node_id: source_id,
                target_node_id: target_id,
                relationship_type: edge.relationship_type.clone(),
                confidence: edge.confidence,
                evidence: None,
                provenance,
                review_status: edge.decision,
            });
            row_keys.push(edge.edge_key.clone());
        }

        if !rows.is_empty() {
            let ids = self.store.insert_edges(tenant, rows).await?;
            outcome.edges_created += ids.len() as u64;
            for (key, id) in row_keys.into_iter().zip(ids.into_iter()) {
                outcome.edge_ids.insert(key, id);
            }
        }

        Ok(outcome)
    }

    async fn embed_entity(
        &self,
        paper: &Paper,
        entity: &ValidatedEntity,
    ) -> Option<EmbeddingPair> {
        let embedder = self.embedder.as_ref()?;
        let mut text = format!("{} ({})", entity.display_name, entity.entity_type);
        if let Some(definition) = &entity.definition {
            text.push_str(": ");
            text.push_str(definition);
        }
        text.push_str(" [from: ");
        text.push_str(&paper.title);
        text.push(']');
        match embedder.embed(&text).await {
            Ok(raw) => Some(EmbeddingPair::from_raw(raw)),
            Err(e) => {
                warn!("Embedding failed for '{}': {}", entity.display_name, e);
                None
            }
        }
    }

    async fn insert_resolved_node(
        &self,
        tenant: &TenantId,
        paper: &Paper,
        entity: &ValidatedEntity,
        embedding: &EmbeddingPair,
        outcome: &mut EntityPersistOutcome,
    ) -> Result<NodeId, GraphError> {
        let node = build_node(entity, Some(embedding.clone()));
        let id = self.store.insert_node(tenant, node).await?;
        outcome.nodes_created += 1;
        outcome
            .entity_map
            .entry(entity.canonical_name.clone())
            .or_insert(id);
        if entity.display_name.to_lowercase() != entity.canonical_name {
            let inserted = self
                .store
                .insert_entity_alias(
                    tenant,
                    EntityAlias {
                        node_id: id,
                        alias_name: entity.display_name.clone(),
                        source_paper_id: paper.paper_id.clone(),
                    },
                )
                .await?;
            if inserted {
                outcome.aliases_recorded += 1;
            }
        }
        Ok(id)
    }

    /// Follow an approved alias chain to its canonical head, one hop.
    ///
    /// If the selected target is itself an alias of an approved head, the
    /// link is retargeted to that head.
    async fn canonical_head(&self, tenant: &TenantId, node_id: NodeId) -> Result<NodeId, GraphError> {
        let targets = self
            .store
            .get_approved_alias_targets_for_nodes(tenant, &[node_id])
            .await?;
        Ok(targets.get(&node_id).copied().unwrap_or(node_id))
    }

    async fn ensure_paper_node(
        &self,
        tenant: &TenantId,
        paper: &Paper,
        paper_canonical: &str,
    ) -> Result<(NodeId, bool), GraphError> {
        if let Some(node) = self
            .store
            .find_node_by_canonical_name(tenant, paper_canonical, PAPER_NODE_TYPE)
            .await?
        {
            return Ok((node.id, false));
        }
        // Paper nodes are approved by construction
        let mut node = NewNode::new(PAPER_NODE_TYPE, paper_canonical);
        node.metadata = json!({
            "title": paper.title,
            "year": paper.year,
        });
        let id = self.store.insert_node(tenant, node).await?;
        Ok((id, true))
    }
}

fn build_node(entity: &ValidatedEntity, embedding: Option<EmbeddingPair>) -> NewNode {
    let mut node = NewNode::new(&entity.entity_type, &entity.canonical_name)
        .with_confidence(entity.original_confidence, entity.adjusted_confidence)
        .with_review(entity.decision, entity.joined_reasons())
        .with_metadata(json!({
            "display_name": entity.display_name,
            "definition": entity.definition,
        }));
    if let Some(pair) = embedding {
        node = node.with_embeddings(pair.raw, pair.index);
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReviewStatus;

    #[test]
    fn test_build_node_carries_decision() {
        let entity = ValidatedEntity {
            canonical_name: "bert".to_string(),
            display_name: "BERT".to_string(),
            entity_type: "model".to_string(),
            original_confidence: 0.9,
            adjusted_confidence: 0.8,
            mention_count: 1,
            decision: ReviewStatus::Flagged,
            reasons: vec!["orphan_entity:single_mention".to_string()],
            definition: None,
        };
        let node = build_node(&entity, None);
        assert_eq!(node.review_status, ReviewStatus::Flagged);
        assert_eq!(node.review_reasons, "orphan_entity:single_mention");
        assert_eq!(node.metadata["display_name"], "BERT");
        assert!((node.adjusted_confidence - 0.8).abs() < 1e-9);
    }
}
