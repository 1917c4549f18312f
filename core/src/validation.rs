//! Deterministic validation of extracted entities and relationships
//!
//! A pure function over extraction output: no I/O, no LLM, and the same
//! inputs always produce the same decisions and reason codes. Decisions feed
//! straight into persisted review statuses, so the rules here are load-bearing
//! for everything downstream.

use crate::canonical::{canonicalize, edge_key};
use crate::types::{ReviewStatus, SectionType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Entities below this adjusted confidence are rejected
pub const CONFIDENCE_REJECT: f64 = 0.3;
/// Entities below this adjusted confidence are flagged for review
pub const CONFIDENCE_REVIEW: f64 = 0.6;
/// Confidence subtracted from entities mentioned only once
pub const ORPHAN_PENALTY: f64 = 0.10;
/// Names within a bucket closer than this Levenshtein distance are duplicates
const DUPLICATE_DISTANCE: usize = 3;

/// An entity candidate as produced by extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub name: String,
    pub entity_type: String,
    pub confidence: f64,
    pub definition: Option<String>,
}

/// A relationship candidate as produced by extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeCandidate {
    pub source: String,
    pub target: String,
    pub relationship_type: String,
    pub confidence: f64,
    pub section_type: Option<SectionType>,
    pub part_index: Option<usize>,
}

/// A validated entity with its decision and provenance of that decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedEntity {
    /// Canonical form used for identity
    pub canonical_name: String,
    /// Highest-confidence surface form observed
    pub display_name: String,
    pub entity_type: String,
    pub original_confidence: f64,
    pub adjusted_confidence: f64,
    pub mention_count: u32,
    pub decision: ReviewStatus,
    pub reasons: Vec<String>,
    pub definition: Option<String>,
}

impl ValidatedEntity {
    /// Semicolon-joined reason codes; "ok" when clean
    pub fn joined_reasons(&self) -> String {
        if self.reasons.is_empty() {
            "ok".to_string()
        } else {
            self.reasons.join(";")
        }
    }
}

/// A validated edge with its decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedEdge {
    pub source_canonical: String,
    pub target_canonical: String,
    pub relationship_type: String,
    pub confidence: f64,
    pub decision: ReviewStatus,
    pub reasons: Vec<String>,
    /// Stable `source::rtype::target` key aligning rows and evidence
    pub edge_key: String,
    pub section_type: Option<SectionType>,
    pub part_index: Option<usize>,
}

impl ValidatedEdge {
    /// Semicolon-joined reason codes; "ok" when clean
    pub fn joined_reasons(&self) -> String {
        if self.reasons.is_empty() {
            "ok".to_string()
        } else {
            self.reasons.join(";")
        }
    }
}

/// Result of one validation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub entities: Vec<ValidatedEntity>,
    pub edges: Vec<ValidatedEdge>,
}

/// Decision for an adjusted confidence, with the reason it carries, if any
fn confidence_decision(adjusted: f64) -> (ReviewStatus, Option<String>) {
    if adjusted < CONFIDENCE_REJECT {
        (
            ReviewStatus::Rejected,
            Some(format!("confidence_too_low:{:.2}", adjusted)),
        )
    } else if adjusted < CONFIDENCE_REVIEW {
        (
            ReviewStatus::Flagged,
            Some(format!("low_confidence:{:.2}", adjusted)),
        )
    } else {
        (ReviewStatus::Approved, None)
    }
}

/// Validate extracted entities and edges.
///
/// Entity pipeline: collapse identical canonical names, apply the orphan
/// penalty, resolve duplicate groups, then decide on adjusted confidence.
/// Edge pipeline: self-reference check, endpoint existence, then the same
/// confidence thresholds.
pub fn validate(entities: &[EntityCandidate], edges: &[EdgeCandidate]) -> ValidationOutcome {
    let validated_entities = validate_entities(entities);

    let known_names: HashSet<&str> = validated_entities
        .iter()
        .map(|e| e.canonical_name.as_str())
        .collect();
    let validated_edges = validate_edges(edges, &known_names);

    ValidationOutcome {
        entities: validated_entities,
        edges: validated_edges,
    }
}

fn validate_entities(entities: &[EntityCandidate]) -> Vec<ValidatedEntity> {
    // Collapse identical canonical names per type, counting multiplicity.
    // BTreeMap keeps iteration order independent of input order.
    let mut collapsed: BTreeMap<(String, String), ValidatedEntity> = BTreeMap::new();
    for candidate in entities {
        let canonical = canonicalize(&candidate.name);
        if canonical.is_empty() {
            continue;
        }
        let key = (candidate.entity_type.clone(), canonical.clone());
        match collapsed.get_mut(&key) {
            Some(existing) => {
                existing.mention_count += 1;
                if candidate.confidence > existing.original_confidence {
                    existing.original_confidence = candidate.confidence;
                    existing.display_name = candidate.name.trim().to_string();
                }
                if existing.definition.is_none() {
                    existing.definition = candidate.definition.clone();
                }
            }
            None => {
                collapsed.insert(
                    key,
                    ValidatedEntity {
                        canonical_name: canonical,
                        display_name: candidate.name.trim().to_string(),
                        entity_type: candidate.entity_type.clone(),
                        original_confidence: candidate.confidence,
                        adjusted_confidence: candidate.confidence,
                        mention_count: 1,
                        decision: ReviewStatus::Approved,
                        reasons: Vec::new(),
                        definition: candidate.definition.clone(),
                    },
                );
            }
        }
    }

    let mut validated: Vec<ValidatedEntity> = collapsed.into_values().collect();

    // Orphan penalty for single-mention entities
    for entity in &mut validated {
        if entity.mention_count <= 1 {
            entity.adjusted_confidence = (entity.original_confidence - ORPHAN_PENALTY).max(0.0);
            entity
                .reasons
                .push("orphan_entity:single_mention".to_string());
        }
    }

    // Duplicate groups: per type, bucket by the first three characters of the
    // canonical name; within a bucket any two names with Levenshtein distance
    // below the threshold share a group.
    let groups = duplicate_groups(&validated);
    let mut loser_overrides: HashMap<usize, (String, bool)> = HashMap::new();
    for group in groups {
        if group.len() < 2 {
            continue;
        }
        let Some(&winner_idx) = group.iter().min_by(|&&a, &&b| {
            validated[b]
                .adjusted_confidence
                .partial_cmp(&validated[a].adjusted_confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| validated[a].canonical_name.cmp(&validated[b].canonical_name))
        }) else {
            continue;
        };
        let winner_name = validated[winner_idx].canonical_name.clone();
        let (winner_decision, _) = confidence_decision(validated[winner_idx].adjusted_confidence);
        let winner_approved = winner_decision == ReviewStatus::Approved;
        for &idx in &group {
            if idx != winner_idx {
                loser_overrides.insert(idx, (winner_name.clone(), winner_approved));
            }
        }
    }

    // Confidence decision, with duplicate losers overridden
    for (idx, entity) in validated.iter_mut().enumerate() {
        if let Some((winner_name, winner_approved)) = loser_overrides.get(&idx) {
            entity.reasons.push(format!("duplicate_of:{}", winner_name));
            if *winner_approved {
                entity.decision = ReviewStatus::Flagged;
                entity.reasons.push("duplicate_loser:flagged".to_string());
            } else {
                entity.decision = ReviewStatus::Rejected;
                entity.reasons.push("duplicate_loser:rejected".to_string());
            }
            continue;
        }
        let (decision, reason) = confidence_decision(entity.adjusted_confidence);
        entity.decision = decision;
        if let Some(reason) = reason {
            entity.reasons.push(reason);
        }
    }

    validated
}

/// Union-find duplicate grouping, deterministic regardless of input order
fn duplicate_groups(entities: &[ValidatedEntity]) -> Vec<Vec<usize>> {
    let mut buckets: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
    for (idx, entity) in entities.iter().enumerate() {
        let prefix: String = entity.canonical_name.chars().take(3).collect();
        buckets
            .entry((entity.entity_type.clone(), prefix))
            .or_default()
            .push(idx);
    }

    let mut parent: Vec<usize> = (0..entities.len()).collect();
    fn find(parent: &mut Vec<usize>, x: usize) -> usize {
        if parent[x] != x {
            let root = find(parent, parent[x]);
            parent[x] = root;
        }
        parent[x]
    }

    for bucket in buckets.values() {
        for i in 0..bucket.len() {
            for j in (i + 1)..bucket.len() {
                let a = &entities[bucket[i]].canonical_name;
                let b = &entities[bucket[j]].canonical_name;
                if strsim::levenshtein(a, b) < DUPLICATE_DISTANCE {
                    let ra = find(&mut parent, bucket[i]);
                    let rb = find(&mut parent, bucket[j]);
                    if ra != rb {
                        // Union toward the smaller root index for determinism
                        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
                        parent[hi] = lo;
                    }
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for idx in 0..entities.len() {
        let root = find(&mut parent, idx);
        groups.entry(root).or_default().push(idx);
    }
    groups.into_values().collect()
}

fn validate_edges(edges: &[EdgeCandidate], known_names: &HashSet<&str>) -> Vec<ValidatedEdge> {
    edges
        .iter()
        .map(|candidate| {
            let source = canonicalize(&candidate.source);
            let target = canonicalize(&candidate.target);
            let key = edge_key(&candidate.source, &candidate.relationship_type, &candidate.target);

            let mut reasons = Vec::new();
            let decision = if source == target {
                reasons.push("self_reference".to_string());
                ReviewStatus::Rejected
            } else {
                let mut unknown = false;
                if !known_names.contains(source.as_str()) {
                    reasons.push(format!("unknown_endpoint:source:{}", source));
                    unknown = true;
                }
                if !known_names.contains(target.as_str()) {
                    reasons.push(format!("unknown_endpoint:target:{}", target));
                    unknown = true;
                }
                if unknown {
                    ReviewStatus::Rejected
                } else {
                    let (decision, reason) = confidence_decision(candidate.confidence);
                    if let Some(reason) = reason {
                        reasons.push(reason);
                    }
                    decision
                }
            };

            ValidatedEdge {
                source_canonical: source,
                target_canonical: target,
                relationship_type: candidate.relationship_type.clone(),
                confidence: candidate.confidence,
                decision,
                reasons,
                edge_key: key,
                section_type: candidate.section_type,
                part_index: candidate.part_index,
            }
        })
        .collect()
}

/// Distribution summary over one confidence series
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceDistribution {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
}

fn distribution(values: &[f64]) -> Option<ConfidenceDistribution> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let percentile = |p: f64| {
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    };
    Some(ConfidenceDistribution {
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean: sorted.iter().sum::<f64>() / sorted.len() as f64,
        p50: percentile(0.5),
        p90: percentile(0.9),
    })
}

/// Log distribution statistics and per-decision counts for a validation pass
pub fn debug_report(outcome: &ValidationOutcome) {
    let originals: Vec<f64> = outcome.entities.iter().map(|e| e.original_confidence).collect();
    let adjusted: Vec<f64> = outcome.entities.iter().map(|e| e.adjusted_confidence).collect();

    let mut entity_counts: BTreeMap<String, usize> = BTreeMap::new();
    for entity in &outcome.entities {
        *entity_counts.entry(entity.decision.to_string()).or_insert(0) += 1;
    }
    let mut edge_counts: BTreeMap<String, usize> = BTreeMap::new();
    for edge in &outcome.edges {
        *edge_counts.entry(edge.decision.to_string()).or_insert(0) += 1;
    }

    debug!(
        "validation: original confidence {:?}, adjusted {:?}, entity decisions {:?}, edge decisions {:?}",
        distribution(&originals),
        distribution(&adjusted),
        entity_counts,
        edge_counts
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, entity_type: &str, confidence: f64) -> EntityCandidate {
        EntityCandidate {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            confidence,
            definition: None,
        }
    }

    fn edge(source: &str, target: &str, confidence: f64) -> EdgeCandidate {
        EdgeCandidate {
            source: source.to_string(),
            target: target.to_string(),
            relationship_type: "uses".to_string(),
            confidence,
            section_type: None,
            part_index: None,
        }
    }

    fn by_name<'a>(outcome: &'a ValidationOutcome, name: &str) -> &'a ValidatedEntity {
        outcome
            .entities
            .iter()
            .find(|e| e.canonical_name == name)
            .unwrap_or_else(|| panic!("entity {} missing", name))
    }

    #[test]
    fn test_orphan_penalty_applied_to_single_mention() {
        let outcome = validate(&[entity("BERT", "method", 0.4)], &[]);
        let e = by_name(&outcome, "bert");
        assert!((e.adjusted_confidence - 0.30).abs() < 1e-9);
        assert_eq!(e.decision, ReviewStatus::Flagged);
        assert!(e.reasons.iter().any(|r| r == "orphan_entity:single_mention"));
    }

    #[test]
    fn test_repeat_mentions_avoid_orphan_penalty() {
        let outcome = validate(
            &[entity("BERT", "method", 0.9), entity("bert", "method", 0.7)],
            &[],
        );
        assert_eq!(outcome.entities.len(), 1);
        let e = by_name(&outcome, "bert");
        assert_eq!(e.mention_count, 2);
        assert!((e.adjusted_confidence - 0.9).abs() < 1e-9);
        assert_eq!(e.decision, ReviewStatus::Approved);
        assert_eq!(e.joined_reasons(), "ok");
    }

    #[test]
    fn test_adjusted_never_exceeds_original() {
        let outcome = validate(
            &[entity("a", "method", 0.05), entity("something", "dataset", 0.95)],
            &[],
        );
        for e in &outcome.entities {
            assert!(e.adjusted_confidence <= e.original_confidence);
            assert!((0.0..=1.0).contains(&e.adjusted_confidence));
        }
    }

    #[test]
    fn test_distance_four_names_are_not_grouped() {
        // "neural network" vs "neural netw": distance 3, not a duplicate pair
        let outcome = validate(
            &[
                entity("Neural Network", "method", 0.9),
                entity("Neural Netw", "method", 0.85),
            ],
            &[],
        );
        let a = by_name(&outcome, "neural network");
        let b = by_name(&outcome, "neural netw");
        assert_eq!(a.decision, ReviewStatus::Approved);
        assert_eq!(b.decision, ReviewStatus::Approved);
        assert!((a.adjusted_confidence - 0.80).abs() < 1e-9);
        assert!((b.adjusted_confidence - 0.75).abs() < 1e-9);
        assert!(a.reasons.iter().all(|r| !r.starts_with("duplicate_of")));
    }

    #[test]
    fn test_true_duplicate_pair_resolves_deterministically() {
        let outcome = validate(
            &[
                entity("transformer", "method", 0.9),
                entity("transformr", "method", 0.85),
            ],
            &[],
        );
        let winner = by_name(&outcome, "transformer");
        let loser = by_name(&outcome, "transformr");

        assert!((winner.adjusted_confidence - 0.80).abs() < 1e-9);
        assert_eq!(winner.decision, ReviewStatus::Approved);

        assert_eq!(loser.decision, ReviewStatus::Flagged);
        assert!(loser.reasons.iter().any(|r| r == "duplicate_of:transformer"));
        assert!(loser.reasons.iter().any(|r| r == "duplicate_loser:flagged"));
    }

    #[test]
    fn test_duplicate_loser_rejected_when_winner_not_approved() {
        let outcome = validate(
            &[
                entity("transformer", "method", 0.5),
                entity("transformr", "method", 0.45),
            ],
            &[],
        );
        let loser = by_name(&outcome, "transformr");
        assert_eq!(loser.decision, ReviewStatus::Rejected);
        assert!(loser.reasons.iter().any(|r| r == "duplicate_loser:rejected"));
    }

    #[test]
    fn test_duplicate_tie_breaks_lexicographically() {
        let outcome = validate(
            &[
                entity("transformr", "method", 0.9),
                entity("transformer", "method", 0.9),
            ],
            &[],
        );
        // Same adjusted confidence; "transformer" < "transformr" wins
        let loser = by_name(&outcome, "transformr");
        assert!(loser.reasons.iter().any(|r| r == "duplicate_of:transformer"));
    }

    #[test]
    fn test_different_types_never_group() {
        let outcome = validate(
            &[
                entity("transformer", "method", 0.9),
                entity("transformr", "dataset", 0.85),
            ],
            &[],
        );
        for e in &outcome.entities {
            assert!(e.reasons.iter().all(|r| !r.starts_with("duplicate_of")));
        }
    }

    #[test]
    fn test_self_reference_rejected() {
        let outcome = validate(
            &[entity("A", "method", 0.9), entity("A", "method", 0.9)],
            &[edge("A", "a", 0.9)],
        );
        let e = &outcome.edges[0];
        assert_eq!(e.decision, ReviewStatus::Rejected);
        assert_eq!(e.reasons, vec!["self_reference"]);
    }

    #[test]
    fn test_unknown_endpoint_rejected() {
        let outcome = validate(
            &[entity("A", "method", 0.9), entity("A", "method", 0.9)],
            &[edge("A", "B", 0.9)],
        );
        let e = &outcome.edges[0];
        assert_eq!(e.decision, ReviewStatus::Rejected);
        assert_eq!(e.reasons, vec!["unknown_endpoint:target:b"]);
    }

    #[test]
    fn test_edge_confidence_thresholds() {
        let entities = vec![
            entity("A", "method", 0.9),
            entity("A", "method", 0.9),
            entity("B", "method", 0.9),
            entity("B", "method", 0.9),
        ];
        let edges = vec![
            edge("A", "B", 0.29),
            edge("A", "B", 0.30),
            edge("A", "B", 0.59),
            edge("A", "B", 0.60),
        ];
        let outcome = validate(&entities, &edges);
        let decisions: Vec<ReviewStatus> = outcome.edges.iter().map(|e| e.decision).collect();
        assert_eq!(
            decisions,
            vec![
                ReviewStatus::Rejected,
                ReviewStatus::Flagged,
                ReviewStatus::Flagged,
                ReviewStatus::Approved,
            ]
        );
        assert_eq!(outcome.edges[0].joined_reasons(), "confidence_too_low:0.29");
        assert_eq!(outcome.edges[1].joined_reasons(), "low_confidence:0.30");
        assert_eq!(outcome.edges[2].joined_reasons(), "low_confidence:0.59");
        assert_eq!(outcome.edges[3].joined_reasons(), "ok");
    }

    #[test]
    fn test_entity_boundary_values() {
        // Multi-mention entities dodge the orphan penalty, so the raw
        // confidence hits the threshold directly.
        let outcome = validate(
            &[
                entity("exactly review", "method", 0.6),
                entity("exactly review", "method", 0.6),
                entity("exactly reject", "concept", 0.3),
                entity("exactly reject", "concept", 0.3),
            ],
            &[],
        );
        assert_eq!(by_name(&outcome, "exactly review").decision, ReviewStatus::Approved);
        assert_eq!(by_name(&outcome, "exactly reject").decision, ReviewStatus::Flagged);
    }

    #[test]
    fn test_determinism_under_input_order() {
        let forward = vec![
            entity("transformer", "method", 0.9),
            entity("transformr", "method", 0.85),
            entity("GLUE", "dataset", 0.7),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = validate(&forward, &[]);
        let b = validate(&reversed, &[]);
        let names_a: Vec<_> = a.entities.iter().map(|e| (&e.canonical_name, e.decision)).collect();
        let names_b: Vec<_> = b.entities.iter().map(|e| (&e.canonical_name, e.decision)).collect();
        assert_eq!(names_a, names_b);
    }

    #[test]
    fn test_edge_key_alignment() {
        let outcome = validate(
            &[
                entity("A", "method", 0.9),
                entity("A", "method", 0.9),
                entity("B", "method", 0.9),
                entity("B", "method", 0.9),
            ],
            &[edge("A", "B", 0.8)],
        );
        assert_eq!(outcome.edges[0].edge_key, "a::uses::b");
    }
}
