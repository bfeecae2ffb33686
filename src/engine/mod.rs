//! Orchestrator — per-conversation sequencing and the host-facing surface.
//!
//! A [`ConversationEngine`] owns one instance of every subsystem for one
//! conversation and sequences per-message processing: duplicate check →
//! tree insert → causal link → version snapshot. [`EngineRegistry`] is the
//! factory keyed by conversation id; engine state is never a process-wide
//! global. Persistence and image decoding stay with host collaborators
//! behind [`ConversationEngine::serialize`] and [`ImageEnrichment`].

pub mod message;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::causal::{CausalEdge, CausalGraph, DiscourseType};
use crate::config::MnemaConfig;
use crate::error::{EngineError, EngineResult};
use crate::fingerprint::FingerprintIndex;
use crate::query::{self, QueryOptions, QueryResponse};
use crate::tree::{ContextNode, TopicTree};
use crate::version::{CommitResult, SnapshotNodes, VersionStore};

use message::Message;

// ── Host-facing result shapes ────────────────────────────────────────────────

/// Envelope returned from one ingest call.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    /// Hex perceptual hash of the message content.
    pub fingerprint: String,
    /// Tree node id (same id as the message).
    pub node_id: String,
    /// Causal node id (same id as the message).
    pub causal_node_id: String,
    pub discourse: DiscourseType,
    /// Edges inferred for this message.
    pub causality: Vec<CausalEdge>,
    /// `true` when the content near-duplicates earlier content. The message
    /// is still recorded so the transcript stays faithful.
    pub duplicate: bool,
    pub topic_shift: bool,
    /// Version recorded by the post-insert snapshot.
    pub version: u64,
}

/// Sync-boundary change record; the host drains these and performs all
/// networking itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

/// Counters from one maintenance pass.
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceReport {
    pub nodes_pruned: usize,
    pub edges_decayed: usize,
    pub edges_pruned: usize,
}

// ── Image boundary ───────────────────────────────────────────────────────────

/// Input to the image collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Url(String),
    Bytes(Vec<u8>),
}

/// Opaque enrichment the collaborator returns; the engine never inspects
/// pixels itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEnrichmentData {
    pub thumbnail: Option<String>,
    pub fingerprint: Option<String>,
    pub ocr_text: Option<String>,
    pub content_type: String,
    pub colors: Vec<String>,
}

/// Host-installed collaborator for image decoding/OCR.
pub trait ImageEnrichment: Send {
    fn enrich(&self, source: &ImageSource) -> anyhow::Result<ImageEnrichmentData>;
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// All state for one conversation. Single-writer: `&mut self` on every
/// mutating call serializes ingestion and maintenance for the context.
#[derive(Serialize, Deserialize)]
pub struct ConversationEngine {
    config: MnemaConfig,
    tree: TopicTree,
    graph: CausalGraph,
    index: FingerprintIndex,
    versions: VersionStore,
    last_message_id: Option<String>,
    outbox: Vec<ChangeRecord>,
    #[serde(skip)]
    image: Option<Box<dyn ImageEnrichment>>,
}

impl ConversationEngine {
    pub fn new(config: MnemaConfig) -> Self {
        Self {
            tree: TopicTree::new(config.tree.clone()),
            graph: CausalGraph::new(config.causal.clone()),
            index: FingerprintIndex::new(config.fingerprint.clone()),
            versions: VersionStore::new(config.versioning.clone()),
            last_message_id: None,
            outbox: Vec::new(),
            image: None,
            config,
        }
    }

    /// Install the host's image collaborator.
    pub fn install_image_collaborator(&mut self, collaborator: Box<dyn ImageEnrichment>) {
        self.image = Some(collaborator);
    }

    // ── Ingest ───────────────────────────────────────────────────────────────

    /// Full ingest pipeline for one message.
    ///
    /// `previous_id` overrides the implicit predecessor (the last ingested
    /// message). A near-duplicate is flagged but still recorded.
    pub fn process_message(
        &mut self,
        message: &Message,
        previous_id: Option<&str>,
    ) -> EngineResult<ProcessResult> {
        message.validate()?;

        // 1. Duplicate check, before any mutation.
        let dup = self.index.check_duplicate(&message.content, None);

        // 2. Topic tree insert.
        let insert = self.tree.insert(message)?;

        // 3. Causal link against the declared or implicit predecessor.
        let prev = previous_id
            .map(str::to_string)
            .or_else(|| self.last_message_id.clone());
        let causal = self.graph.add_message(message, prev.as_deref())?;

        // 4. Record the content and snapshot the tree state.
        self.index.insert(&message.content);
        let state = serde_json::to_value(&self.tree)?;
        let commit = self.versions.commit(&state);

        self.outbox.push(ChangeRecord {
            id: message.id.clone(),
            record_type: "message".to_string(),
            data: serde_json::to_value(message)?,
            timestamp: message.timestamp,
            version: commit.version,
        });
        self.last_message_id = Some(message.id.clone());

        Ok(ProcessResult {
            fingerprint: dup.fingerprint.as_hex().to_string(),
            node_id: insert.node_id,
            causal_node_id: causal.node_id,
            discourse: causal.discourse,
            causality: causal.causality,
            duplicate: dup.is_duplicate,
            topic_shift: insert.topic_shift,
            version: commit.version,
        })
    }

    /// Attach image enrichment to an already-ingested message. Without an
    /// installed collaborator this degrades to [`EngineError::ModuleUnavailable`].
    pub fn enrich_image(
        &mut self,
        message_id: &str,
        source: &ImageSource,
    ) -> EngineResult<ImageEnrichmentData> {
        if self.tree.node(message_id).is_none() {
            return Err(EngineError::UnknownNode {
                id: message_id.to_string(),
            });
        }
        let Some(collaborator) = self.image.as_ref() else {
            return Err(EngineError::ModuleUnavailable {
                module: "image enrichment".to_string(),
            });
        };
        let data = collaborator.enrich(source).map_err(|err| {
            warn!(%err, "image collaborator failed");
            EngineError::ModuleUnavailable {
                module: "image enrichment".to_string(),
            }
        })?;
        self.outbox.push(ChangeRecord {
            id: message_id.to_string(),
            record_type: "image_enrichment".to_string(),
            data: serde_json::to_value(&data)?,
            timestamp: Utc::now(),
            version: self.versions.current_version(),
        });
        Ok(data)
    }

    // ── Retrieve / query ─────────────────────────────────────────────────────

    /// Token-budgeted context window, ordered by time.
    pub fn get_context(&self, max_nodes: usize, max_tokens: usize) -> Vec<ContextNode> {
        self.tree.retrieve(max_nodes, max_tokens)
    }

    /// Natural-language query across all subsystems.
    pub fn query(&self, text: &str, options: &QueryOptions) -> QueryResponse {
        query::run(
            &self.tree,
            &self.graph,
            &self.index,
            &self.config.query,
            text,
            options,
            Utc::now(),
            self.image.is_some(),
        )
    }

    /// Render query results into the plain-markdown consumable form.
    pub fn format_for_consumption(&self, response: &QueryResponse) -> String {
        query::format_for_consumption(response)
    }

    // ── Versioning ───────────────────────────────────────────────────────────

    /// Host-triggered snapshot of the current tree state.
    pub fn snapshot(&mut self) -> EngineResult<CommitResult> {
        let state = serde_json::to_value(&self.tree)?;
        Ok(self.versions.commit(&state))
    }

    /// Rebuild the flattened node state at a past version.
    pub fn reconstruct(&self, version: u64) -> EngineResult<SnapshotNodes> {
        self.versions.reconstruct(version)
    }

    pub fn current_version(&self) -> u64 {
        self.versions.current_version()
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// Decay causal confidences and prune stale tree leaves. Runs on the
    /// same `&mut self` as ingestion, so the two are always serialized.
    pub fn maintenance(&mut self, now: DateTime<Utc>) -> MaintenanceReport {
        let decay = self.graph.apply_decay(now);
        let pruned = self.tree.prune(now);
        info!(
            nodes_pruned = pruned,
            edges_pruned = decay.pruned,
            "maintenance pass complete"
        );
        MaintenanceReport {
            nodes_pruned: pruned,
            edges_decayed: decay.decayed,
            edges_pruned: decay.pruned,
        }
    }

    // ── Persistence boundary ─────────────────────────────────────────────────

    /// Serialize the whole engine state. The host owns the storage medium.
    pub fn serialize(&self) -> EngineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Resume a conversation from a serialized blob.
    pub fn deserialize(blob: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(blob)?)
    }

    // ── Sync boundary ────────────────────────────────────────────────────────

    /// Drain accumulated change records for the host's sync layer.
    pub fn drain_changes(&mut self) -> Vec<ChangeRecord> {
        std::mem::take(&mut self.outbox)
    }

    // ── Introspection ────────────────────────────────────────────────────────

    pub fn tree(&self) -> &TopicTree {
        &self.tree
    }

    pub fn graph(&self) -> &CausalGraph {
        &self.graph
    }

    pub fn fingerprints(&self) -> &FingerprintIndex {
        &self.index
    }

    pub fn config(&self) -> &MnemaConfig {
        &self.config
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Factory and owner of per-conversation engines.
///
/// Each conversation id maps to its own subsystem instances; concurrent
/// work on different conversations never shares mutable state.
pub struct EngineRegistry {
    config: MnemaConfig,
    engines: HashMap<String, ConversationEngine>,
}

impl EngineRegistry {
    pub fn new(config: MnemaConfig) -> Self {
        Self {
            config,
            engines: HashMap::new(),
        }
    }

    /// Get or create the engine for a conversation.
    pub fn engine(&mut self, conversation_id: &str) -> &mut ConversationEngine {
        self.engines
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationEngine::new(self.config.clone()))
    }

    /// Resume a conversation from a serialized blob.
    pub fn restore(&mut self, conversation_id: &str, blob: &str) -> EngineResult<()> {
        let engine = ConversationEngine::deserialize(blob)?;
        self.engines.insert(conversation_id.to_string(), engine);
        Ok(())
    }

    /// Drop a conversation's state entirely.
    pub fn remove(&mut self, conversation_id: &str) -> bool {
        self.engines.remove(conversation_id).is_some()
    }

    pub fn conversation_ids(&self) -> Vec<&str> {
        self.engines.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::message::Role;

    fn engine() -> ConversationEngine {
        ConversationEngine::new(MnemaConfig::default())
    }

    #[test]
    fn process_message_returns_full_envelope() {
        let mut e = engine();
        let msg = Message::new(Role::User, "What is JavaScript?");
        let result = e.process_message(&msg, None).unwrap();

        assert_eq!(result.node_id, msg.id);
        assert_eq!(result.causal_node_id, msg.id);
        assert_eq!(result.fingerprint.len(), 64 / 4);
        assert!(!result.duplicate);
        assert!(result.version >= 2);
    }

    #[test]
    fn repeated_content_is_flagged_duplicate() {
        let mut e = engine();
        let first = Message::new(Role::User, "Hello world");
        let second = Message::new(Role::User, "Hello world");
        assert!(!e.process_message(&first, None).unwrap().duplicate);
        let result = e.process_message(&second, None).unwrap();
        assert!(result.duplicate);
        // Still recorded: the transcript stays faithful.
        assert_eq!(e.tree().len(), 2);
    }

    #[test]
    fn invalid_message_mutates_nothing() {
        let mut e = engine();
        let bad = Message::new(Role::User, "  ");
        assert!(e.process_message(&bad, None).is_err());
        assert_eq!(e.tree().len(), 0);
        assert_eq!(e.graph().len(), 0);
        assert!(e.drain_changes().is_empty());
    }

    #[test]
    fn implicit_predecessor_is_last_message() {
        let mut e = engine();
        let q = Message::new(Role::User, "Why does the cache miss so often?");
        let a = Message::new(
            Role::Assistant,
            "The cache misses because keys include timestamps",
        );
        e.process_message(&q, None).unwrap();
        let result = e.process_message(&a, None).unwrap();
        assert!(result.causality.iter().any(|edge| edge.from_id == q.id));
    }

    #[test]
    fn enrich_image_without_collaborator_is_unavailable() {
        let mut e = engine();
        let msg = Message::new(Role::User, "see screenshot.png");
        e.process_message(&msg, None).unwrap();
        let err = e
            .enrich_image(&msg.id, &ImageSource::Url("x.png".into()))
            .unwrap_err();
        assert!(matches!(err, EngineError::ModuleUnavailable { .. }));
    }

    #[test]
    fn serialize_round_trip_resumes_state() {
        let mut e = engine();
        e.process_message(&Message::new(Role::User, "What is Rust ownership?"), None)
            .unwrap();
        e.process_message(
            &Message::new(Role::Assistant, "Rust ownership moves values by default"),
            None,
        )
        .unwrap();

        let blob = e.serialize().unwrap();
        let resumed = ConversationEngine::deserialize(&blob).unwrap();
        assert_eq!(resumed.tree().len(), 2);
        assert_eq!(resumed.current_version(), e.current_version());
        resumed.tree().check_invariants().unwrap();
    }

    #[test]
    fn registry_isolates_conversations() {
        let mut registry = EngineRegistry::new(MnemaConfig::default());
        registry
            .engine("alpha")
            .process_message(&Message::new(Role::User, "alpha topic"), None)
            .unwrap();
        registry
            .engine("beta")
            .process_message(&Message::new(Role::User, "beta topic"), None)
            .unwrap();

        assert_eq!(registry.engine("alpha").tree().len(), 1);
        assert_eq!(registry.engine("beta").tree().len(), 1);
        assert_eq!(registry.len(), 2);
        assert!(registry.remove("alpha"));
        assert_eq!(registry.len(), 1);
    }
}
