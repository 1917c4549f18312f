//! Bounded subgraph construction around affected papers
//!
//! Reasoning never sees the whole tenant graph unless explicitly asked to:
//! the builder BFS-expands from the papers a job touched, with paired
//! parallel edge fetches per hop and an early stop when the frontier dries up.

use crate::cache::content_hash;
use crate::errors::GraphError;
use crate::traits::GraphStore;
use crate::types::{GraphEdge, GraphNode, InsightScope, NodeId, Paper, TenantId};
use futures::future::try_join_all;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// The induced graph handed to the reasoning stage
#[derive(Debug, Clone)]
pub struct Subgraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Rows for the affected papers
    pub papers: Vec<Paper>,
    /// Corpus size, for proportion-aware reasoning
    pub total_papers_in_corpus: u64,
}

impl Subgraph {
    /// Canonical JSON payload serialized for the reasoning prompt
    pub fn to_payload(&self) -> serde_json::Value {
        json!({
            "nodes": self.nodes.iter().map(|n| json!({
                "id": n.id,
                "type": n.node_type,
                "name": n.canonical_name,
                "review_status": n.review_status,
                "confidence": n.adjusted_confidence,
            })).collect::<Vec<_>>(),
            "edges": self.edges.iter().map(|e| json!({
                "id": e.id,
                "source": e.source_node_id,
                "target": e.target_node_id,
                "type": e.relationship_type,
                "confidence": e.confidence,
                "review_status": e.review_status,
            })).collect::<Vec<_>>(),
            "papers": self.papers.iter().map(|p| json!({
                "paper_id": p.paper_id,
                "title": p.title,
                "year": p.year,
            })).collect::<Vec<_>>(),
            "total_papers_in_corpus": self.total_papers_in_corpus,
        })
    }

    /// Content hash attached to every insight produced from this snapshot
    pub fn snapshot_hash(&self) -> String {
        content_hash(&self.to_payload())
    }
}

/// BFS subgraph builder over the graph store
pub struct SubgraphBuilder {
    store: Arc<dyn GraphStore>,
}

impl SubgraphBuilder {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Build the subgraph for the affected papers.
    ///
    /// With `full_graph` the whole tenant graph is loaded and `depth` only
    /// labels the scope. Otherwise the frontier expands for `1..=depth` hops,
    /// stopping early when no new nodes are admitted; depth 0 yields exactly
    /// the direct nodes and edges of the affected papers.
    pub async fn build(
        &self,
        tenant: &TenantId,
        paper_ids: &[String],
        depth: u32,
        full_graph: bool,
    ) -> Result<(Subgraph, InsightScope), GraphError> {
        let scope = InsightScope {
            paper_ids: paper_ids.to_vec(),
            depth,
        };

        if full_graph {
            let (nodes, edges) = self.store.get_graph_data(tenant).await?;
            let papers = self.store.get_papers_by_ids(tenant, paper_ids).await?;
            let total = self.store.get_total_paper_count(tenant).await?;
            return Ok((
                Subgraph {
                    nodes,
                    edges,
                    papers,
                    total_papers_in_corpus: total,
                },
                scope,
            ));
        }

        // Seed: per-paper node and edge fetches, papers in parallel
        let seeds = try_join_all(paper_ids.iter().map(|paper_id| {
            let store = Arc::clone(&self.store);
            let tenant = tenant.clone();
            let paper_id = paper_id.clone();
            async move {
                let (nodes, edges) = futures::join!(
                    store.get_nodes_for_paper(&tenant, &paper_id),
                    store.get_edges_for_paper(&tenant, &paper_id)
                );
                Ok::<_, GraphError>((nodes?, edges?))
            }
        }))
        .await?;

        let mut node_ids: HashSet<NodeId> = HashSet::new();
        let mut edge_ids: HashSet<i64> = HashSet::new();
        let mut frontier: Vec<NodeId> = Vec::new();
        for (nodes, edges) in seeds {
            for node in nodes {
                if node_ids.insert(node.id) {
                    frontier.push(node.id);
                }
            }
            for edge in edges {
                edge_ids.insert(edge.id);
                for endpoint in [edge.source_node_id, edge.target_node_id] {
                    if node_ids.insert(endpoint) {
                        frontier.push(endpoint);
                    }
                }
            }
        }

        for hop in 1..=depth {
            if frontier.is_empty() {
                break;
            }
            let (outgoing, incoming) = futures::join!(
                self.store.get_edges_by_source_nodes(tenant, &frontier),
                self.store.get_edges_by_target_nodes(tenant, &frontier)
            );
            let mut next_frontier: Vec<NodeId> = Vec::new();
            for edge in outgoing?.into_iter().chain(incoming?.into_iter()) {
                if !edge_ids.insert(edge.id) {
                    continue;
                }
                for endpoint in [edge.source_node_id, edge.target_node_id] {
                    if node_ids.insert(endpoint) {
                        next_frontier.push(endpoint);
                    }
                }
            }
            debug!(
                "Subgraph hop {}/{}: {} nodes, {} edges",
                hop,
                depth,
                node_ids.len(),
                edge_ids.len()
            );
            frontier = next_frontier;
        }

        // Bulk fetch of the final rows; sorted ids keep snapshots stable
        let mut final_node_ids: Vec<NodeId> = node_ids.into_iter().collect();
        final_node_ids.sort_unstable();
        let (nodes, papers, total) = futures::join!(
            self.store.get_nodes_by_ids(tenant, &final_node_ids),
            self.store.get_papers_by_ids(tenant, paper_ids),
            self.store.get_total_paper_count(tenant)
        );
        let mut nodes = nodes?;
        nodes.sort_by_key(|n| n.id);

        let edges = self
            .store
            .get_edges_by_source_nodes(tenant, &final_node_ids)
            .await?;
        let mut edges: Vec<GraphEdge> = edges
            .into_iter()
            .filter(|e| edge_ids.contains(&e.id))
            .collect();
        edges.sort_by_key(|e| e.id);

        Ok((
            Subgraph {
                nodes,
                edges,
                papers: papers?,
                total_papers_in_corpus: total?,
            },
            scope,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EdgeProvenance, ReviewStatus};

    fn node(id: NodeId, name: &str) -> GraphNode {
        GraphNode {
            id,
            node_type: "method".to_string(),
            canonical_name: name.to_string(),
            metadata: serde_json::Value::Null,
            original_confidence: 0.9,
            adjusted_confidence: 0.9,
            review_status: ReviewStatus::Approved,
            review_reasons: "ok".to_string(),
            embedding_raw: None,
            embedding_index: None,
        }
    }

    fn edge(id: i64, source: NodeId, target: NodeId) -> GraphEdge {
        GraphEdge {
            id,
            source_node_id: source,
            target_node_id: target,
            relationship_type: "uses".to_string(),
            confidence: 0.8,
            evidence: None,
            provenance: EdgeProvenance::from_validation(ReviewStatus::Approved, "ok"),
            review_status: ReviewStatus::Approved,
        }
    }

    #[test]
    fn test_snapshot_hash_is_order_stable() {
        let subgraph = Subgraph {
            nodes: vec![node(1, "a"), node(2, "b")],
            edges: vec![edge(1, 1, 2)],
            papers: vec![],
            total_papers_in_corpus: 5,
        };
        let a = subgraph.snapshot_hash();
        let b = subgraph.snapshot_hash();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_snapshot_hash_changes_with_content() {
        let base = Subgraph {
            nodes: vec![node(1, "a")],
            edges: vec![],
            papers: vec![],
            total_papers_in_corpus: 1,
        };
        let mut grown = base.clone();
        grown.nodes.push(node(2, "b"));
        assert_ne!(base.snapshot_hash(), grown.snapshot_hash());
    }
}
