//! Query engine — intent classification and ranked retrieval across the
//! tree, causal graph, and fingerprint index.
//!
//! [`run`] parses and classifies the query, dispatches to the matching
//! handler, then funnels every handler through the same post-processing:
//! fingerprint dedup, rank-derived relevance, and a relevance floor.
//! [`format_for_consumption`] renders the one required output format, a
//! plain-markdown block per result plus a metadata footer.

pub mod parse;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::causal::CausalGraph;
use crate::config::QueryConfig;
use crate::fingerprint::FingerprintIndex;
use crate::tree::{TopicTree, TreeNode};
use crate::engine::message::Role;

pub use parse::{ParsedQuery, QueryKind, Timeframe};

/// Per-call options; unset fields fall back to the configured defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryOptions {
    pub max_results: Option<usize>,
    pub min_relevance: Option<f64>,
    /// Reverse-traversal bound for causal chains.
    pub max_chain_depth: Option<usize>,
}

/// One ranked result.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub node_id: String,
    pub role: Role,
    pub content: String,
    pub importance: f64,
    pub timestamp: DateTime<Utc>,
    /// `1 − rank/total` within the handler's match set.
    pub relevance: f64,
    /// Causal annotation, present for causal queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryMetadata {
    pub kind: QueryKind,
    pub total_matched: usize,
    pub returned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<Timeframe>,
    /// Degradation notice (e.g. an uninstalled image collaborator).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub results: Vec<QueryResult>,
    pub metadata: QueryMetadata,
}

static IMAGE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)!\[[^\]]*\]\(|\.(png|jpe?g|gif|webp|svg)\b|data:image/")
        .expect("image marker pattern must compile")
});

/// Classify, dispatch, post-process.
pub fn run(
    tree: &TopicTree,
    graph: &CausalGraph,
    index: &FingerprintIndex,
    config: &QueryConfig,
    raw: &str,
    options: &QueryOptions,
    now: DateTime<Utc>,
    image_collaborator_installed: bool,
) -> QueryResponse {
    let parsed = parse::parse(raw, now);
    debug!(kind = %parsed.kind, keywords = parsed.keywords.len(), "query dispatch");

    let mut warning = None;
    let matched: Vec<QueryResult> = match parsed.kind {
        QueryKind::Temporal => handle_temporal(tree, &parsed),
        QueryKind::Causal => handle_causal(tree, graph, &parsed, options, config),
        QueryKind::Contextual => handle_contextual(tree, &parsed, config),
        QueryKind::Code => handle_code(tree, &parsed),
        QueryKind::Summary => handle_summary(tree, config),
        QueryKind::Image => {
            if !image_collaborator_installed {
                warning = Some("module unavailable: image enrichment".to_string());
            }
            handle_image(tree)
        }
    };

    let total_matched = matched.len();
    let max_results = options.max_results.unwrap_or(config.max_results);
    let min_relevance = options.min_relevance.unwrap_or(config.min_relevance);
    let results = post_process(matched, index, max_results, min_relevance);

    QueryResponse {
        metadata: QueryMetadata {
            kind: parsed.kind,
            total_matched,
            returned: results.len(),
            timeframe: parsed.timeframe,
            warning,
        },
        results,
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// Timeframe filter, then keyword-match ranking.
fn handle_temporal(tree: &TopicTree, parsed: &ParsedQuery) -> Vec<QueryResult> {
    let mut scored: Vec<(&TreeNode, f64)> = tree
        .nodes()
        .filter(|n| {
            parsed
                .timeframe
                .map(|tf| tf.contains(n.timestamp))
                .unwrap_or(true)
        })
        .map(|n| (n, keyword_hits(n, &parsed.keywords)))
        .collect();
    rank(&mut scored);
    scored.into_iter().map(|(n, _)| to_result(n, None)).collect()
}

/// Causal chains and immediate-cause explanations for keyword-matched nodes.
fn handle_causal(
    tree: &TopicTree,
    graph: &CausalGraph,
    parsed: &ParsedQuery,
    options: &QueryOptions,
    config: &QueryConfig,
) -> Vec<QueryResult> {
    let max_depth = options.max_chain_depth.unwrap_or(5);
    let max_anchors = options.max_results.unwrap_or(config.max_results);
    let mut anchors: Vec<(&TreeNode, f64)> = tree
        .nodes()
        .map(|n| (n, keyword_hits(n, &parsed.keywords)))
        .filter(|(_, score)| *score > 0.0)
        .collect();
    rank(&mut anchors);

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for (anchor, _) in anchors.into_iter().take(max_anchors) {
        let Ok(chain) = graph.causal_chain(&anchor.id, max_depth) else {
            continue;
        };
        for entry in chain {
            if !seen.insert(entry.node_id.clone()) {
                continue;
            }
            let explanation = if entry.causes.is_empty() {
                None
            } else {
                let causes: Vec<String> = entry
                    .causes
                    .iter()
                    .map(|(id, conf)| format!("{id} ({conf:.2})"))
                    .collect();
                Some(format!("caused by {}", causes.join(", ")))
            };
            if let Some(node) = tree.node(&entry.node_id) {
                out.push(to_result(node, explanation));
            }
        }
    }
    out
}

/// Token-budgeted retrieval anchored at the best keyword match; with no
/// anchor the current-path retrieval stands in.
fn handle_contextual(
    tree: &TopicTree,
    parsed: &ParsedQuery,
    config: &QueryConfig,
) -> Vec<QueryResult> {
    if let Some(anchor) = tree.best_keyword_match(&parsed.keywords) {
        let mut used = 0usize;
        let mut out = Vec::new();
        for node in tree.subtree(&anchor.id) {
            let tokens = crate::text::estimate_tokens(&node.content);
            if used + tokens > config.context_token_budget {
                break;
            }
            used += tokens;
            out.push(to_result(node, None));
        }
        out
    } else {
        tree.retrieve(config.max_results, config.context_token_budget)
            .into_iter()
            .enumerate()
            .map(|(i, n)| QueryResult {
                node_id: format!("context-{i}"),
                role: n.role,
                content: n.content,
                importance: n.importance,
                timestamp: n.timestamp,
                relevance: 0.0,
                explanation: None,
            })
            .collect()
    }
}

/// Content heuristics: fenced blocks and code-dense lines.
fn handle_code(tree: &TopicTree, parsed: &ParsedQuery) -> Vec<QueryResult> {
    let mut scored: Vec<(&TreeNode, f64)> = tree
        .nodes()
        .filter(|n| looks_like_code(&n.content))
        .map(|n| (n, keyword_hits(n, &parsed.keywords)))
        .collect();
    rank(&mut scored);
    scored.into_iter().map(|(n, _)| to_result(n, None)).collect()
}

/// Importance threshold filter, chronological.
fn handle_summary(tree: &TopicTree, config: &QueryConfig) -> Vec<QueryResult> {
    let mut nodes: Vec<&TreeNode> = tree
        .nodes()
        .filter(|n| n.importance >= config.summary_importance_threshold)
        .collect();
    nodes.sort_by_key(|n| n.timestamp);
    nodes.into_iter().map(|n| to_result(n, None)).collect()
}

/// Nodes that reference image content. Pixel inspection stays with the host
/// collaborator; this only surfaces where images were mentioned.
fn handle_image(tree: &TopicTree) -> Vec<QueryResult> {
    let mut nodes: Vec<&TreeNode> = tree
        .nodes()
        .filter(|n| IMAGE_MARKER.is_match(&n.content))
        .collect();
    nodes.sort_by_key(|n| n.timestamp);
    nodes.into_iter().map(|n| to_result(n, None)).collect()
}

// ── Shared post-processing ───────────────────────────────────────────────────

/// Dedup by fingerprint equality, assign `relevance = 1 − rank/total`, drop
/// below the floor, truncate to `max_results`.
fn post_process(
    matched: Vec<QueryResult>,
    index: &FingerprintIndex,
    max_results: usize,
    min_relevance: f64,
) -> Vec<QueryResult> {
    let mut seen = HashSet::new();
    let deduped: Vec<QueryResult> = matched
        .into_iter()
        .filter(|r| seen.insert(index.fingerprint(&r.content)))
        .collect();

    let total = deduped.len().max(1);
    deduped
        .into_iter()
        .enumerate()
        .map(|(rank, mut r)| {
            r.relevance = 1.0 - rank as f64 / total as f64;
            r
        })
        .filter(|r| r.relevance >= min_relevance)
        .take(max_results)
        .collect()
}

fn keyword_hits(node: &TreeNode, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let lower = node.content.to_lowercase();
    keywords.iter().filter(|k| lower.contains(k.as_str())).count() as f64
}

fn rank(scored: &mut [(&TreeNode, f64)]) {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.0.importance.partial_cmp(&a.0.importance).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.0.timestamp.cmp(&b.0.timestamp))
    });
}

fn to_result(node: &TreeNode, explanation: Option<String>) -> QueryResult {
    QueryResult {
        node_id: node.id.clone(),
        role: node.role,
        content: node.content.clone(),
        importance: node.importance,
        timestamp: node.timestamp,
        relevance: 0.0,
        explanation,
    }
}

/// Whether content reads as code: a fence, or a dense sprinkling of
/// structural characters.
fn looks_like_code(content: &str) -> bool {
    if content.contains("```") {
        return true;
    }
    let len = content.chars().count().max(1);
    let structural = content
        .chars()
        .filter(|c| matches!(c, '{' | '}' | '(' | ')' | ';' | '=' | '<' | '>'))
        .count();
    structural as f64 / len as f64 > 0.05
}

// ── Rendering ────────────────────────────────────────────────────────────────

/// The one required output format: a markdown block per result plus a
/// metadata footer. Richer renderings are a host concern.
pub fn format_for_consumption(response: &QueryResponse) -> String {
    let mut out = String::new();
    for result in &response.results {
        out.push_str(&format!(
            "### {} · {} · importance {:.2}\n{}\n",
            result.timestamp.to_rfc3339(),
            result.role,
            result.importance,
            result.content
        ));
        if let Some(explanation) = &result.explanation {
            out.push_str(&format!("> {explanation}\n"));
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "---\nquery: {} | matched: {} | returned: {}\n",
        response.metadata.kind, response.metadata.total_matched, response.metadata.returned
    ));
    if let Some(warning) = &response.metadata.warning {
        out.push_str(&format!("warning: {warning}\n"));
    }
    out
}
