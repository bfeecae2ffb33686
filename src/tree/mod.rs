//! Hierarchical topic index over a conversation transcript.
//!
//! Every message becomes a [`TreeNode`] attached either to the tip of the
//! current path or, on a topic shift, to the best-scoring ancestor. The tree
//! owns all nodes; a node is destroyed only by [`TopicTree::prune`].
//!
//! Invariants: exactly one root (`depth` 0, no parent); `children` is the
//! exact inverse of `parent_id`; `depth = parent.depth + 1`; the current path
//! starts at the root and is bounded by `max_path_span`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TreeConfig;
use crate::engine::message::{Message, Role};
use crate::error::EngineResult;
use crate::text;

const ROOT_ID: &str = "root";

static DECISION_KEYWORDS: &[&str] = &[
    "decided", "decision", "chose", "choose", "agreed", "conclusion",
    "will use", "should use", "must", "final",
];

/// One node of the topic tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    /// `None` only for the root.
    pub parent_id: Option<String>,
    /// Ordered child ids, in insertion order.
    pub children: Vec<String>,
    pub role: Role,
    pub content: String,
    pub depth: usize,
    /// Bounded additive score in [0, 1].
    pub importance: f64,
    /// Ranked keyword terms for this node's content.
    pub topic_keywords: Vec<String>,
    /// Stable hash of the keyword set, for cheap topic comparison.
    pub semantic_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Where an insert landed.
#[derive(Debug, Clone, Serialize)]
pub struct InsertOutcome {
    pub node_id: String,
    pub parent_id: String,
    /// `true` when the message branched away from the path tip.
    pub topic_shift: bool,
}

/// A retrieved node, in the shape the host consumes.
#[derive(Debug, Clone, Serialize)]
pub struct ContextNode {
    pub role: Role,
    pub content: String,
    pub depth: usize,
    pub importance: f64,
    pub timestamp: DateTime<Utc>,
}

/// The topic hierarchy for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicTree {
    config: TreeConfig,
    nodes: HashMap<String, TreeNode>,
    root_id: String,
    /// Root-to-tip ids; re-pointed (never cleared) on a topic shift.
    current_path: Vec<String>,
}

impl TopicTree {
    pub fn new(config: TreeConfig) -> Self {
        let root = TreeNode {
            id: ROOT_ID.to_string(),
            parent_id: None,
            children: Vec::new(),
            role: Role::System,
            content: String::new(),
            depth: 0,
            importance: 0.0,
            topic_keywords: Vec::new(),
            semantic_hash: String::new(),
            timestamp: Utc::now(),
        };
        let mut nodes = HashMap::new();
        nodes.insert(root.id.clone(), root);
        Self {
            config,
            nodes,
            root_id: ROOT_ID.to_string(),
            current_path: vec![ROOT_ID.to_string()],
        }
    }

    // ── Insertion ────────────────────────────────────────────────────────────

    /// Place a message in the tree, detecting topic shifts.
    ///
    /// The only failure is a malformed message; no valid insert can fail.
    pub fn insert(&mut self, message: &Message) -> EngineResult<InsertOutcome> {
        message.validate()?;

        let keywords = text::keywords(&message.content, self.config.keywords_per_node);
        let importance = score_importance(&message.content);
        let (parent_id, topic_shift) = self.choose_parent(&keywords);

        let node_id = message.id.clone();
        let depth = self.nodes[&parent_id].depth + 1;
        let node = TreeNode {
            id: node_id.clone(),
            parent_id: Some(parent_id.clone()),
            children: Vec::new(),
            role: message.role,
            content: message.content.clone(),
            depth,
            importance,
            semantic_hash: semantic_hash(&keywords),
            topic_keywords: keywords,
            timestamp: message.timestamp,
        };

        if let Some(parent) = self.nodes.get_mut(&parent_id) {
            parent.children.push(node_id.clone());
        }
        self.nodes.insert(node_id.clone(), node);
        self.repoint_path(&parent_id, &node_id);

        if topic_shift {
            debug!(node = %node_id, parent = %parent_id, "topic shift branch");
        }

        Ok(InsertOutcome {
            node_id,
            parent_id,
            topic_shift,
        })
    }

    /// Parent selection: stay on the path tip unless the average keyword
    /// similarity against the recent path window falls below the shift
    /// threshold, in which case re-attach to the best-scoring ancestor
    /// (0.7·similarity + 0.3·recency), falling back to the root.
    fn choose_parent(&self, keywords: &[String]) -> (String, bool) {
        let tip = self
            .current_path
            .last()
            .cloned()
            .unwrap_or_else(|| self.root_id.clone());

        // Path nodes with actual content (skip the synthetic root).
        let recent: Vec<&TreeNode> = self
            .current_path
            .iter()
            .filter(|id| **id != self.root_id)
            .filter_map(|id| self.nodes.get(id))
            .collect();

        if recent.is_empty() {
            return (tip, false);
        }

        let window = recent
            .iter()
            .rev()
            .take(self.config.recent_window)
            .collect::<Vec<_>>();
        let avg_similarity = window
            .iter()
            .map(|n| text::keyword_similarity(keywords, &n.topic_keywords))
            .sum::<f64>()
            / window.len() as f64;

        if avg_similarity >= self.config.topic_shift_threshold {
            return (tip, false);
        }

        // Topic shift: branch from the best ancestor on the current path.
        let path_len = recent.len() as f64;
        let best = recent
            .iter()
            .enumerate()
            .map(|(idx, node)| {
                let similarity =
                    text::keyword_similarity(keywords, &node.topic_keywords);
                let recency = (idx + 1) as f64 / path_len;
                (node.id.clone(), 0.7 * similarity + 0.3 * recency)
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((id, score)) if score > self.config.ancestor_min_score => (id, true),
            _ => (self.root_id.clone(), true),
        }
    }

    /// Re-point the current path at the new tip, root first, bounded by
    /// `max_path_span` (the root is always kept).
    fn repoint_path(&mut self, parent_id: &str, node_id: &str) {
        let mut path = self.path_to(parent_id);
        path.push(node_id.to_string());
        // Root plus at least one tail entry; smaller configured spans clamp.
        let span = self.config.max_path_span.max(2);
        if path.len() > span {
            let keep_tail = span - 1;
            let tail_start = path.len() - keep_tail;
            let mut bounded = vec![self.root_id.clone()];
            bounded.extend_from_slice(&path[tail_start..]);
            path = bounded;
        }
        self.current_path = path;
    }

    /// Root-to-node id sequence by walking parent links.
    fn path_to(&self, id: &str) -> Vec<String> {
        let mut path = Vec::new();
        let mut cursor = Some(id.to_string());
        while let Some(current) = cursor {
            cursor = self
                .nodes
                .get(&current)
                .and_then(|n| n.parent_id.clone());
            path.push(current);
        }
        path.reverse();
        path
    }

    // ── Retrieval ────────────────────────────────────────────────────────────

    /// Token-budgeted retrieval: ≈60% of the budget goes to the highest-
    /// importance nodes on the current path, ≈40% to the best nodes elsewhere.
    /// The result is ordered by timestamp and never exceeds the budget.
    pub fn retrieve(&self, max_nodes: usize, max_token_budget: usize) -> Vec<ContextNode> {
        let path_budget = max_token_budget * 6 / 10;
        let other_budget = max_token_budget - path_budget;
        let path_slots = (max_nodes * 6 / 10 + 1).min(max_nodes);

        let on_path: Vec<&TreeNode> = self
            .current_path
            .iter()
            .filter(|id| **id != self.root_id)
            .filter_map(|id| self.nodes.get(id))
            .collect();
        let off_path: Vec<&TreeNode> = self
            .nodes
            .values()
            .filter(|n| n.id != self.root_id && !self.current_path.contains(&n.id))
            .collect();

        let mut picked = pick_by_importance(on_path, path_slots, path_budget);
        let used: usize = picked
            .iter()
            .map(|n| text::estimate_tokens(&n.content))
            .sum();
        let remaining_budget = other_budget + path_budget.saturating_sub(used);
        let remaining_slots = max_nodes.saturating_sub(picked.len());
        picked.extend(pick_by_importance(off_path, remaining_slots, remaining_budget));

        picked.sort_by_key(|n| n.timestamp);
        picked
            .into_iter()
            .map(|n| ContextNode {
                role: n.role,
                content: n.content.clone(),
                depth: n.depth,
                importance: n.importance,
                timestamp: n.timestamp,
            })
            .collect()
    }

    /// All nodes of the subtree rooted at `id` (including it), by timestamp.
    pub fn subtree(&self, id: &str) -> Vec<&TreeNode> {
        let mut out = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().cloned());
                if node.id != self.root_id {
                    out.push(node);
                }
            }
        }
        out.sort_by_key(|n| n.timestamp);
        out
    }

    /// Node whose keywords best match the given set, if any overlap at all.
    pub fn best_keyword_match(&self, keywords: &[String]) -> Option<&TreeNode> {
        self.nodes
            .values()
            .filter(|n| n.id != self.root_id)
            .map(|n| (n, text::keyword_similarity(keywords, &n.topic_keywords)))
            .filter(|(_, score)| *score > 0.0)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(n, _)| n)
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// Remove leaf nodes older than the configured age with importance below
    /// the floor. Nodes on the current path and the root are never pruned.
    /// Returns the number of removed nodes.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(self.config.prune_max_age_days);
        let floor = self.config.prune_importance_floor;

        let victims: Vec<String> = self
            .nodes
            .values()
            .filter(|n| {
                n.id != self.root_id
                    && n.children.is_empty()
                    && n.timestamp < cutoff
                    && n.importance < floor
                    && !self.current_path.contains(&n.id)
            })
            .map(|n| n.id.clone())
            .collect();

        for id in &victims {
            if let Some(node) = self.nodes.remove(id) {
                if let Some(parent_id) = node.parent_id {
                    if let Some(parent) = self.nodes.get_mut(&parent_id) {
                        parent.children.retain(|c| c != id);
                    }
                }
            }
        }

        if !victims.is_empty() {
            info!(pruned = victims.len(), "topic tree pruned");
        }
        victims.len()
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn node(&self, id: &str) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values().filter(move |n| n.id != self.root_id)
    }

    /// Node count excluding the synthetic root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn current_path(&self) -> &[String] {
        &self.current_path
    }

    pub fn max_depth(&self) -> usize {
        self.nodes.values().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Structural self-check: parent/child inversion and depth arithmetic.
    pub fn check_invariants(&self) -> Result<(), String> {
        let roots = self
            .nodes
            .values()
            .filter(|n| n.parent_id.is_none())
            .count();
        if roots != 1 {
            return Err(format!("expected exactly one root, found {roots}"));
        }
        for node in self.nodes.values() {
            if let Some(parent_id) = &node.parent_id {
                let parent = self
                    .nodes
                    .get(parent_id)
                    .ok_or_else(|| format!("dangling parent {parent_id}"))?;
                let links = parent.children.iter().filter(|c| **c == node.id).count();
                if links != 1 {
                    return Err(format!(
                        "node {} appears {links} times in parent {} children",
                        node.id, parent_id
                    ));
                }
                if node.depth != parent.depth + 1 {
                    return Err(format!(
                        "node {} depth {} != parent depth {} + 1",
                        node.id, node.depth, parent.depth
                    ));
                }
            }
            for child in &node.children {
                let child_node = self
                    .nodes
                    .get(child)
                    .ok_or_else(|| format!("dangling child {child}"))?;
                if child_node.parent_id.as_deref() != Some(node.id.as_str()) {
                    return Err(format!("child {child} does not point back to {}", node.id));
                }
            }
        }
        match self.current_path.first() {
            Some(first) if *first == self.root_id => Ok(()),
            _ => Err("current path does not start at root".into()),
        }
    }
}

/// Greedy pick: highest importance first, stopping the moment the running
/// token estimate would exceed the budget or the slot count is reached.
fn pick_by_importance(
    mut candidates: Vec<&TreeNode>,
    max_nodes: usize,
    token_budget: usize,
) -> Vec<&TreeNode> {
    candidates.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });
    let mut picked = Vec::new();
    let mut used = 0usize;
    for node in candidates {
        if picked.len() >= max_nodes {
            break;
        }
        let tokens = text::estimate_tokens(&node.content);
        if used + tokens > token_budget {
            break;
        }
        used += tokens;
        picked.push(node);
    }
    picked
}

/// Bounded additive importance: base 0.5, bonuses for question marks,
/// decision language, code fences, and moderate length. Capped at 1.0.
fn score_importance(content: &str) -> f64 {
    let mut score: f64 = 0.5;
    if content.contains('?') {
        score += 0.15;
    }
    let lower = content.to_lowercase();
    if DECISION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        score += 0.2;
    }
    if content.contains("```") {
        score += 0.15;
    }
    if (100..2000).contains(&content.len()) {
        score += 0.1;
    }
    score.min(1.0)
}

/// FNV-1a over the sorted keyword set, 16 hex digits.
fn semantic_hash(keywords: &[String]) -> String {
    let mut sorted: Vec<&String> = keywords.iter().collect();
    sorted.sort();
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for word in sorted {
        for b in word.as_bytes() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash ^= 0x1f;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::message::{Message, Role};

    fn tree() -> TopicTree {
        TopicTree::new(TreeConfig::default())
    }

    fn msg(role: Role, content: &str) -> Message {
        Message::new(role, content)
    }

    #[test]
    fn empty_message_is_rejected_without_mutation() {
        let mut t = tree();
        assert!(t.insert(&msg(Role::User, "")).is_err());
        assert_eq!(t.len(), 0);
    }

    #[test]
    fn related_messages_chain_linearly() {
        let mut t = tree();
        t.insert(&msg(Role::User, "How do JavaScript arrays work?"))
            .unwrap();
        t.insert(&msg(
            Role::Assistant,
            "JavaScript arrays work as ordered lists with indexed access.",
        ))
        .unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.max_depth(), 2);
        t.check_invariants().unwrap();
    }

    #[test]
    fn unrelated_message_triggers_topic_shift() {
        let mut t = tree();
        t.insert(&msg(Role::User, "How do JavaScript arrays work exactly?"))
            .unwrap();
        t.insert(&msg(
            Role::Assistant,
            "JavaScript arrays work as ordered indexed lists.",
        ))
        .unwrap();
        let outcome = t
            .insert(&msg(Role::User, "Recommend a pasta recipe for dinner tonight"))
            .unwrap();
        assert!(outcome.topic_shift);
        t.check_invariants().unwrap();
    }

    #[test]
    fn importance_bonuses_are_capped() {
        let long_block = format!("Decided: we will use Rust. {} ```code```?", "x".repeat(150));
        let score = score_importance(&long_block);
        assert!(score <= 1.0);
        assert!(score > 0.9);
        assert_eq!(score_importance("plain statement"), 0.5);
    }

    #[test]
    fn retrieve_orders_by_timestamp_and_respects_budget() {
        let mut t = tree();
        t.insert(&msg(Role::User, "What is JavaScript?")).unwrap();
        t.insert(&msg(Role::Assistant, "JS is a language.")).unwrap();
        t.insert(&msg(Role::User, "How do arrays work?")).unwrap();

        let all = t.retrieve(10, 1000);
        assert_eq!(all.len(), 3);
        for pair in all.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }

        // A one-token budget returns at most one tiny node.
        let tight = t.retrieve(10, 1);
        assert!(tight.len() <= 1);
    }

    #[test]
    fn zero_max_nodes_returns_nothing() {
        let mut t = tree();
        t.insert(&msg(Role::User, "What is JavaScript?")).unwrap();
        t.insert(&msg(Role::Assistant, "JS is a language.")).unwrap();
        assert!(t.retrieve(0, 1000).is_empty());
    }

    #[test]
    fn tiny_path_span_is_clamped() {
        let config = crate::config::TreeConfig {
            max_path_span: 0,
            ..crate::config::TreeConfig::default()
        };
        let mut t = TopicTree::new(config);
        for i in 0..4 {
            t.insert(&msg(Role::User, &format!("message number {i} about rust")))
                .unwrap();
        }
        assert_eq!(t.current_path()[0], "root");
        assert_eq!(t.current_path().len(), 2);
        t.check_invariants().unwrap();
    }

    #[test]
    fn prune_removes_old_unimportant_leaves() {
        let config = crate::config::TreeConfig {
            prune_importance_floor: 0.6,
            ..crate::config::TreeConfig::default()
        };
        let mut t = TopicTree::new(config);

        let mut old = msg(Role::User, "stale remark");
        old.timestamp = Utc::now() - Duration::days(90);
        let old_id = t.insert(&old).unwrap().node_id;
        // A second, unrelated message branches away so the stale node leaves
        // the current path and becomes a prunable leaf.
        t.insert(&msg(Role::User, "Recommend an unrelated dinner recipe please"))
            .unwrap();
        assert!(!t.current_path().contains(&old_id));

        let removed = t.prune(Utc::now());
        assert_eq!(removed, 1);
        assert!(t.node(&old_id).is_none());
        t.check_invariants().unwrap();
    }

    #[test]
    fn path_always_starts_at_root() {
        let mut t = tree();
        for i in 0..10 {
            t.insert(&msg(Role::User, &format!("message number {i} about rust")))
                .unwrap();
        }
        assert_eq!(t.current_path()[0], "root");
        t.check_invariants().unwrap();
    }

    #[test]
    fn serde_round_trip_preserves_structure() {
        let mut t = tree();
        t.insert(&msg(Role::User, "What is JavaScript?")).unwrap();
        t.insert(&msg(Role::Assistant, "JS is a language.")).unwrap();

        let json = serde_json::to_string(&t).unwrap();
        let restored: TopicTree = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), 2);
        restored.check_invariants().unwrap();
    }
}
