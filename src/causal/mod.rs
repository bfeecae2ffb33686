//! Causal graph — why one message followed another.
//!
//! Each message becomes a [`CausalNode`] classified by the rule table in
//! [`rules`]. Directed, confidence-weighted edges are inferred two ways:
//! explicitly, when the rule table allows the successor and the combined
//! temporal/role/lexical signal clears `inference_threshold`; and
//! implicitly, by scanning a bounded window of recent nodes for lexical
//! overlap discounted by temporal decay. [`CausalGraph::apply_decay`] is the
//! graph's only garbage collection: confidences decay exponentially with age
//! and edges below `min_confidence` are dropped.

pub mod rules;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CausalConfig;
use crate::engine::message::{Message, Role};
use crate::error::{EngineError, EngineResult};
use crate::text;

pub use rules::{classify, DiscourseType};

/// A message mirrored into the graph with its classified discourse role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalNode {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub discourse: DiscourseType,
    pub timestamp: DateTime<Utc>,
    /// Cached ≥4-letter content words for overlap scoring.
    words: HashSet<String>,
}

/// How an edge was inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Rule-table successor with combined confidence ≥ `inference_threshold`.
    Explicit,
    /// Lexical-overlap window match ≥ `min_confidence` after decay.
    Implicit,
}

/// A directed cause → effect edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalEdge {
    pub from_id: String,
    pub to_id: String,
    pub kind: LinkKind,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Result of adding a message to the graph.
#[derive(Debug, Clone, Serialize)]
pub struct AddOutcome {
    pub node_id: String,
    pub discourse: DiscourseType,
    /// Edges created by this add, explicit first.
    pub causality: Vec<CausalEdge>,
}

/// One step of a causal chain, deepest cause first.
#[derive(Debug, Clone, Serialize)]
pub struct ChainEntry {
    pub node_id: String,
    pub discourse: DiscourseType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Immediate causes of this node: (cause id, confidence).
    pub causes: Vec<(String, f64)>,
}

/// Counts reported by a decay pass.
#[derive(Debug, Clone, Serialize)]
pub struct DecayOutcome {
    pub decayed: usize,
    pub pruned: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalGraph {
    config: CausalConfig,
    nodes: HashMap<String, CausalNode>,
    /// Insertion order, the implicit-scan window source.
    order: Vec<String>,
    /// Incoming edges keyed by effect id.
    incoming: HashMap<String, Vec<CausalEdge>>,
}

impl CausalGraph {
    pub fn new(config: CausalConfig) -> Self {
        Self {
            config,
            nodes: HashMap::new(),
            order: Vec::new(),
            incoming: HashMap::new(),
        }
    }

    // ── Ingestion ────────────────────────────────────────────────────────────

    /// Classify a message, add its node, and infer edges to prior nodes.
    pub fn add_message(
        &mut self,
        message: &Message,
        previous_id: Option<&str>,
    ) -> EngineResult<AddOutcome> {
        message.validate()?;

        let discourse = rules::classify(&message.content);
        let node = CausalNode {
            id: message.id.clone(),
            role: message.role,
            content: message.content.clone(),
            discourse,
            timestamp: message.timestamp,
            words: text::significant_words(&message.content),
        };

        let mut causality = Vec::new();
        if let Some(prev_id) = previous_id {
            if let Some(edge) = self.infer_explicit(&node, prev_id) {
                causality.push(edge);
            }
        }
        causality.extend(self.infer_implicit(&node, &causality));

        for edge in &causality {
            self.incoming
                .entry(edge.to_id.clone())
                .or_default()
                .push(edge.clone());
        }
        debug!(
            node = %node.id,
            discourse = %discourse,
            edges = causality.len(),
            "causal node added"
        );

        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);

        Ok(AddOutcome {
            node_id: message.id.clone(),
            discourse,
            causality,
        })
    }

    /// Explicit inference against the declared predecessor.
    ///
    /// Confidence = 0.5 base, + up to 0.3 for temporal proximity, + 0.2 for
    /// role alternation, + up to 0.2 for lexical overlap; capped at 1.0. The
    /// edge exists only when the rule table allows the succession and the
    /// confidence clears `inference_threshold`.
    fn infer_explicit(&self, node: &CausalNode, prev_id: &str) -> Option<CausalEdge> {
        let prev = self.nodes.get(prev_id)?;
        if !rules::allows_successor(prev.discourse, node.discourse) {
            return None;
        }

        let minutes = (node.timestamp - prev.timestamp).num_seconds() as f64 / 60.0;
        let temporal = if minutes < 5.0 {
            0.3
        } else if minutes < 30.0 {
            0.2
        } else if minutes < 60.0 {
            0.1
        } else {
            0.0
        };
        let alternation = if node.role != prev.role { 0.2 } else { 0.0 };
        let lexical = 0.2 * text::jaccard(&node.words, &prev.words);

        let confidence = (0.5 + temporal + alternation + lexical).min(1.0);
        if confidence < self.config.inference_threshold {
            return None;
        }
        Some(CausalEdge {
            from_id: prev.id.clone(),
            to_id: node.id.clone(),
            kind: LinkKind::Explicit,
            confidence,
            timestamp: node.timestamp,
        })
    }

    /// Implicit inference: scan up to `implicit_window` recent nodes not
    /// already linked, keep lexical overlap ≥ the floor, discount by
    /// `exp(-minutes/60)`, and emit edges that still clear `min_confidence`.
    fn infer_implicit(&self, node: &CausalNode, existing: &[CausalEdge]) -> Vec<CausalEdge> {
        let linked: HashSet<&str> = existing.iter().map(|e| e.from_id.as_str()).collect();
        let mut edges = Vec::new();

        for prior_id in self.order.iter().rev().take(self.config.implicit_window) {
            if linked.contains(prior_id.as_str()) || *prior_id == node.id {
                continue;
            }
            let Some(prior) = self.nodes.get(prior_id) else {
                continue;
            };
            let overlap = text::jaccard(&node.words, &prior.words);
            if prior.words.is_empty() || overlap < self.config.implicit_overlap_floor {
                continue;
            }
            let minutes = (node.timestamp - prior.timestamp).num_seconds() as f64 / 60.0;
            let confidence = overlap * (-minutes.max(0.0) / 60.0).exp();
            if confidence >= self.config.min_confidence {
                edges.push(CausalEdge {
                    from_id: prior.id.clone(),
                    to_id: node.id.clone(),
                    kind: LinkKind::Implicit,
                    confidence,
                    timestamp: node.timestamp,
                });
            }
        }
        edges
    }

    // ── Traversal ────────────────────────────────────────────────────────────

    /// Depth-bounded reverse walk from `node_id`, following the highest-
    /// confidence incoming edge at each step. Returns entries ordered from
    /// the deepest cause to the queried node, each annotated with its
    /// immediate causes.
    pub fn causal_chain(&self, node_id: &str, max_depth: usize) -> EngineResult<Vec<ChainEntry>> {
        if !self.nodes.contains_key(node_id) {
            return Err(EngineError::UnknownNode {
                id: node_id.to_string(),
            });
        }

        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut cursor = Some(node_id.to_string());

        while let Some(id) = cursor {
            if chain.len() > max_depth || !visited.insert(id.clone()) {
                break;
            }
            let node = &self.nodes[&id];
            let mut causes: Vec<(String, f64)> = self
                .incoming
                .get(&id)
                .map(|edges| {
                    edges
                        .iter()
                        .map(|e| (e.from_id.clone(), e.confidence))
                        .collect()
                })
                .unwrap_or_default();
            causes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

            cursor = causes.first().map(|(from, _)| from.clone());
            chain.push(ChainEntry {
                node_id: id,
                discourse: node.discourse,
                content: node.content.clone(),
                timestamp: node.timestamp,
                causes,
            });
        }

        chain.reverse();
        Ok(chain)
    }

    /// Incoming edges of a node, highest confidence first.
    pub fn causes_of(&self, node_id: &str) -> Vec<&CausalEdge> {
        let mut edges: Vec<&CausalEdge> = self
            .incoming
            .get(node_id)
            .map(|v| v.iter().collect())
            .unwrap_or_default();
        edges.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        edges
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// Multiply every edge's confidence by `exp(-decay_rate · days_old)` and
    /// drop edges (and empty adjacency entries) below `min_confidence`.
    pub fn apply_decay(&mut self, now: DateTime<Utc>) -> DecayOutcome {
        let rate = self.config.decay_rate;
        let floor = self.config.min_confidence;
        let mut decayed = 0usize;
        let mut pruned = 0usize;

        self.incoming.retain(|_, edges| {
            let before = edges.len();
            for edge in edges.iter_mut() {
                let days = (now - edge.timestamp).num_seconds() as f64 / 86_400.0;
                edge.confidence *= (-rate * days.max(0.0)).exp();
                decayed += 1;
            }
            edges.retain(|e| e.confidence >= floor);
            pruned += before - edges.len();
            !edges.is_empty()
        });

        if pruned > 0 {
            info!(decayed, pruned, "causal decay pass");
        }
        DecayOutcome { decayed, pruned }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn node(&self, id: &str) -> Option<&CausalNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &CausalNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.incoming.values().map(|v| v.len()).sum()
    }

    pub fn edges(&self) -> impl Iterator<Item = &CausalEdge> {
        self.incoming.values().flatten()
    }

    pub fn min_confidence(&self) -> f64 {
        self.config.min_confidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn graph() -> CausalGraph {
        CausalGraph::new(CausalConfig::default())
    }

    fn msg_at(role: Role, content: &str, ts: DateTime<Utc>) -> Message {
        let mut m = Message::new(role, content);
        m.timestamp = ts;
        m
    }

    #[test]
    fn question_then_answer_links_explicitly() {
        let mut g = graph();
        let t0 = Utc::now();
        let q = msg_at(Role::User, "Why does the build fail on CI?", t0);
        let a = msg_at(
            Role::Assistant,
            "The build fails because the cache key changed; decided to pin it.",
            t0 + Duration::minutes(1),
        );

        let q_out = g.add_message(&q, None).unwrap();
        assert_eq!(q_out.discourse, DiscourseType::Question);
        assert!(q_out.causality.is_empty());

        let a_out = g.add_message(&a, Some(&q.id)).unwrap();
        let explicit: Vec<_> = a_out
            .causality
            .iter()
            .filter(|e| e.kind == LinkKind::Explicit)
            .collect();
        assert_eq!(explicit.len(), 1);
        assert_eq!(explicit[0].from_id, q.id);
        assert!(explicit[0].confidence >= 0.6);
        assert!(explicit[0].confidence <= 1.0);
    }

    #[test]
    fn disallowed_succession_makes_no_explicit_edge() {
        let mut g = graph();
        let t0 = Utc::now();
        // Decision → Hypothesis is not in the successor table.
        let d = msg_at(Role::User, "We decided and agreed: going with Rust, final.", t0);
        let h = msg_at(
            Role::User,
            "Maybe I suspect the compiler might be probably slow though",
            t0 + Duration::minutes(1),
        );
        g.add_message(&d, None).unwrap();
        let out = g.add_message(&h, Some(&d.id)).unwrap();
        assert!(out
            .causality
            .iter()
            .all(|e| e.kind != LinkKind::Explicit));
    }

    #[test]
    fn implicit_links_need_overlap_and_recency() {
        let mut g = graph();
        let t0 = Utc::now();
        let a = msg_at(
            Role::User,
            "The websocket connection drops under heavy load",
            t0,
        );
        let b = msg_at(
            Role::User,
            "Something entirely different about gardening tulips",
            t0 + Duration::minutes(2),
        );
        let c = msg_at(
            Role::Assistant,
            "websocket connection drops correlate with heavy load spikes",
            t0 + Duration::minutes(4),
        );
        g.add_message(&a, None).unwrap();
        g.add_message(&b, None).unwrap();
        let out = g.add_message(&c, None).unwrap();

        let implicit: Vec<_> = out
            .causality
            .iter()
            .filter(|e| e.kind == LinkKind::Implicit)
            .collect();
        assert!(implicit.iter().any(|e| e.from_id == a.id));
        assert!(implicit.iter().all(|e| e.from_id != b.id));
    }

    #[test]
    fn stale_overlap_is_discounted_below_threshold() {
        let mut g = graph();
        let t0 = Utc::now();
        let a = msg_at(Role::User, "database migration script ordering matters", t0);
        let c = msg_at(
            Role::User,
            "database migration script ordering broke again",
            t0 + Duration::hours(6),
        );
        g.add_message(&a, None).unwrap();
        let out = g.add_message(&c, None).unwrap();
        // exp(-360/60) ≈ 0.0025 — far below min_confidence.
        assert!(out.causality.iter().all(|e| e.kind != LinkKind::Implicit));
    }

    #[test]
    fn chain_runs_deepest_cause_first() {
        let mut g = graph();
        let t0 = Utc::now();
        let m1 = msg_at(Role::User, "Why is the deployment pipeline failing?", t0);
        let m2 = msg_at(
            Role::Assistant,
            "The deployment pipeline is failing because credentials expired",
            t0 + Duration::minutes(1),
        );
        let m3 = msg_at(
            Role::User,
            "Decided: rotate the deployment pipeline credentials weekly, final",
            t0 + Duration::minutes(2),
        );
        g.add_message(&m1, None).unwrap();
        g.add_message(&m2, Some(&m1.id)).unwrap();
        g.add_message(&m3, Some(&m2.id)).unwrap();

        let chain = g.causal_chain(&m3.id, 5).unwrap();
        assert!(chain.len() >= 2);
        assert_eq!(chain.last().unwrap().node_id, m3.id);
        for pair in chain.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn chain_for_unknown_node_errors() {
        let g = graph();
        assert!(matches!(
            g.causal_chain("nope", 3),
            Err(EngineError::UnknownNode { .. })
        ));
    }

    #[test]
    fn decay_prunes_below_min_confidence() {
        let mut g = graph();
        let t0 = Utc::now() - Duration::days(120);
        let q = msg_at(Role::User, "Why does the cache return stale entries?", t0);
        let a = msg_at(
            Role::Assistant,
            "The cache returns stale entries because TTL is unset",
            t0 + Duration::minutes(1),
        );
        g.add_message(&q, None).unwrap();
        g.add_message(&a, Some(&q.id)).unwrap();
        assert!(g.edge_count() > 0);

        let outcome = g.apply_decay(Utc::now());
        assert!(outcome.decayed > 0);
        let floor = g.min_confidence();
        assert!(g.edges().all(|e| e.confidence >= floor));
        // 120 days at rate 0.05 → factor exp(-6) ≈ 0.0025, everything pruned.
        assert_eq!(g.edge_count(), 0);
    }
}
