//! Differential version store — structural diffs, patch chains, and
//! compression-ratio-driven snapshotting.
//!
//! The canonical snapshot form is a deterministic id → node map
//! ([`SnapshotNodes`]); [`flatten`] lifts an arbitrary nested JSON state blob
//! into that form. A store owns exactly one chain: a base [`Snapshot`] plus
//! an ordered list of [`Patch`]es. Replaying the chain from its base must
//! reproduce the target state; once the chain outgrows
//! `max_patch_chain_length` it collapses into a fresh base with no patches,
//! which bounds worst-case reconstruction cost.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::VersioningConfig;
use crate::error::{EngineError, EngineResult};

/// Deterministically ordered id → node map, the unit of diffing.
pub type SnapshotNodes = BTreeMap<String, Value>;

/// A full materialized state at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub nodes: SnapshotNodes,
}

impl Snapshot {
    pub fn new(version: u64, nodes: SnapshotNodes) -> Self {
        Self {
            version,
            timestamp: Utc::now(),
            nodes,
        }
    }

    /// Serialized byte size, used for strategy decisions.
    pub fn byte_size(&self) -> usize {
        serde_json::to_string(&self.nodes).map(|s| s.len()).unwrap_or(0)
    }
}

/// One field-level change within a modified node.
///
/// `removed` distinguishes a field deleted from the node from a field set to
/// an explicit `null`; both carry `after: Value::Null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub id: String,
    pub field: String,
    pub before: Value,
    pub after: Value,
    pub removed: bool,
}

/// Structural diff between two snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diff {
    /// Nodes present only in the new state.
    pub added: Vec<(String, Value)>,
    /// Per-field before/after changes for nodes present in both.
    pub modified: Vec<FieldChange>,
    /// Ids present only in the old state.
    pub deleted: Vec<String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// JSON-Patch-like operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Add,
    Replace,
    Remove,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Remove => "remove",
        }
    }
}

/// A single patch operation. Paths address the flattened map: `/<id>` for
/// whole nodes, `/<id>/<field>` for one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: OpKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchStats {
    pub operations: usize,
    /// Serialized size of the patch, for compression accounting.
    pub bytes: usize,
    /// Node count of the state this patch produces, checked on reconstruct.
    pub expected_nodes: usize,
}

/// An incremental step from `base_version` to `version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub version: u64,
    pub base_version: u64,
    pub timestamp: DateTime<Utc>,
    pub operations: Vec<PatchOp>,
    pub stats: PatchStats,
}

/// How a commit was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Full,
    Delta,
}

/// Result envelope for a commit.
#[derive(Debug, Clone, Serialize)]
pub struct CommitResult {
    pub version: u64,
    pub strategy: Strategy,
    /// Serialized size of whatever was persisted (patch or full snapshot).
    pub size: usize,
    /// `true` when the commit collapsed the chain into a new base.
    pub collapsed: bool,
}

/// Outcome of applying one patch: the new state plus skipped-operation count.
#[derive(Debug)]
pub struct ApplyReport {
    pub nodes: SnapshotNodes,
    pub skipped: usize,
}

// ── Flattening ───────────────────────────────────────────────────────────────

/// Flatten an arbitrary nested state blob into an id → node map. Any JSON
/// object carrying a string `"id"` field becomes an entry; containers
/// (objects and arrays) are walked recursively.
pub fn flatten(state: &Value) -> SnapshotNodes {
    let mut nodes = SnapshotNodes::new();
    walk(state, &mut nodes);
    nodes
}

fn walk(value: &Value, nodes: &mut SnapshotNodes) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("id") {
                nodes.insert(id.clone(), value.clone());
            }
            for child in map.values() {
                walk(child, nodes);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, nodes);
            }
        }
        _ => {}
    }
}

// ── Diff / patch construction ────────────────────────────────────────────────

/// Set-compare two flattened states: added, per-field modified, deleted.
pub fn diff(old: &SnapshotNodes, new: &SnapshotNodes) -> Diff {
    let mut added = Vec::new();
    let mut modified = Vec::new();
    let mut deleted = Vec::new();

    for (id, node) in new {
        match old.get(id) {
            None => added.push((id.clone(), node.clone())),
            Some(old_node) if old_node != node => {
                modified.extend(field_changes(id, old_node, node));
            }
            Some(_) => {}
        }
    }
    for id in old.keys() {
        if !new.contains_key(id) {
            deleted.push(id.clone());
        }
    }

    Diff {
        added,
        modified,
        deleted,
    }
}

/// Per-field before/after values for one modified node.
fn field_changes(id: &str, old: &Value, new: &Value) -> Vec<FieldChange> {
    let (Some(old_map), Some(new_map)) = (old.as_object(), new.as_object()) else {
        // Non-object node changed wholesale.
        return vec![FieldChange {
            id: id.to_string(),
            field: String::new(),
            before: old.clone(),
            after: new.clone(),
            removed: false,
        }];
    };

    let mut changes = Vec::new();
    for (field, new_value) in new_map {
        let missing = !old_map.contains_key(field);
        let before = old_map.get(field).cloned().unwrap_or(Value::Null);
        if missing || &before != new_value {
            changes.push(FieldChange {
                id: id.to_string(),
                field: field.clone(),
                before,
                after: new_value.clone(),
                removed: false,
            });
        }
    }
    for (field, old_value) in old_map {
        if !new_map.contains_key(field) {
            changes.push(FieldChange {
                id: id.to_string(),
                field: field.clone(),
                before: old_value.clone(),
                after: Value::Null,
                removed: true,
            });
        }
    }
    changes
}

/// Lower a diff into ordered patch operations: `add` per new node,
/// `replace` per changed field (explicit `null` values included verbatim),
/// `remove` per deleted field or node id.
pub fn to_operations(diff: &Diff) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    for (id, node) in &diff.added {
        ops.push(PatchOp {
            op: OpKind::Add,
            path: format!("/{id}"),
            value: Some(node.clone()),
        });
    }
    for change in &diff.modified {
        let path = if change.field.is_empty() {
            format!("/{}", change.id)
        } else {
            format!("/{}/{}", change.id, change.field)
        };
        if change.removed {
            ops.push(PatchOp {
                op: OpKind::Remove,
                path,
                value: None,
            });
        } else {
            ops.push(PatchOp {
                op: OpKind::Replace,
                path,
                value: Some(change.after.clone()),
            });
        }
    }
    for id in &diff.deleted {
        ops.push(PatchOp {
            op: OpKind::Remove,
            path: format!("/{id}"),
            value: None,
        });
    }
    ops
}

// ── Patch application ────────────────────────────────────────────────────────

/// Deep-copy `base` and apply operations path-by-path.
///
/// An operation referencing a missing path is a [`EngineError::PatchApply`]
/// for that operation only: it is skipped and logged, the rest of the patch
/// still applies. Callers treating `skipped > 0` states as best-effort
/// should re-snapshot.
pub fn apply_patch(base: &SnapshotNodes, patch: &Patch) -> ApplyReport {
    let mut nodes = base.clone();
    let mut skipped = 0usize;

    for op in &patch.operations {
        if let Err(err) = apply_op(&mut nodes, op) {
            warn!(version = patch.version, %err, "skipping patch operation");
            skipped += 1;
        }
    }

    ApplyReport { nodes, skipped }
}

fn apply_op(nodes: &mut SnapshotNodes, op: &PatchOp) -> EngineResult<()> {
    let mut segments = op.path.trim_start_matches('/').splitn(2, '/');
    let id = segments.next().unwrap_or_default().to_string();
    let field = segments.next();

    let missing = || EngineError::PatchApply {
        op: op.op.as_str().to_string(),
        path: op.path.clone(),
    };

    match (op.op, field) {
        (OpKind::Add, None) => {
            nodes.insert(id, op.value.clone().unwrap_or(Value::Null));
            Ok(())
        }
        (OpKind::Remove, None) => {
            nodes.remove(&id).map(|_| ()).ok_or_else(missing)
        }
        (OpKind::Replace, None) => {
            let slot = nodes.get_mut(&id).ok_or_else(missing)?;
            *slot = op.value.clone().unwrap_or(Value::Null);
            Ok(())
        }
        (OpKind::Replace, Some(field)) => {
            let node = nodes.get_mut(&id).ok_or_else(missing)?;
            let map = node.as_object_mut().ok_or_else(missing)?;
            // An explicit `null` is a value like any other; removal is a
            // distinct operation.
            let value = op.value.clone().ok_or_else(missing)?;
            map.insert(field.to_string(), value);
            Ok(())
        }
        (OpKind::Remove, Some(field)) => {
            let node = nodes.get_mut(&id).ok_or_else(missing)?;
            let map = node.as_object_mut().ok_or_else(missing)?;
            map.remove(field).map(|_| ()).ok_or_else(missing)
        }
        // Field-level add never appears in generated patches.
        _ => Err(missing()),
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

/// One per-conversation version chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionStore {
    config: VersioningConfig,
    base: Snapshot,
    patches: Vec<Patch>,
    current_version: u64,
    /// Cached current state so commits diff against the tip cheaply.
    current: SnapshotNodes,
}

impl VersionStore {
    pub fn new(config: VersioningConfig) -> Self {
        let base = Snapshot::new(1, SnapshotNodes::new());
        let current = base.nodes.clone();
        Self {
            config,
            base,
            patches: Vec::new(),
            current_version: 1,
            current,
        }
    }

    pub fn current_version(&self) -> u64 {
        self.current_version
    }

    pub fn chain_length(&self) -> usize {
        self.patches.len()
    }

    /// Decide full vs delta persistence for a transition.
    ///
    /// Delta only pays off while `patch_bytes / full_bytes` stays under the
    /// compression threshold; an empty old state always snapshots full.
    pub fn decide_strategy(&self, ops: &[PatchOp], new: &SnapshotNodes) -> Strategy {
        let full_size = serde_json::to_string(new).map(|s| s.len()).unwrap_or(0);
        if full_size == 0 {
            return Strategy::Full;
        }
        let patch_size = serde_json::to_string(ops).map(|s| s.len()).unwrap_or(0);
        let ratio = patch_size as f64 / full_size as f64;
        if ratio < self.config.compression_threshold {
            Strategy::Delta
        } else {
            Strategy::Full
        }
    }

    /// Record a new state. Persists a delta patch when compression wins,
    /// otherwise collapses into a fresh full base. A chain grown past
    /// `max_patch_chain_length` is collapsed regardless.
    pub fn commit(&mut self, state: &Value) -> CommitResult {
        let new_nodes = flatten(state);
        let delta = diff(&self.current, &new_nodes);
        let ops = to_operations(&delta);
        let strategy = self.decide_strategy(&ops, &new_nodes);
        let version = self.current_version + 1;

        let result = match strategy {
            Strategy::Delta => {
                let patch_bytes =
                    serde_json::to_string(&ops).map(|s| s.len()).unwrap_or(0);
                self.patches.push(Patch {
                    version,
                    base_version: self.current_version,
                    timestamp: Utc::now(),
                    stats: PatchStats {
                        operations: ops.len(),
                        bytes: patch_bytes,
                        expected_nodes: new_nodes.len(),
                    },
                    operations: ops,
                });
                debug!(version, bytes = patch_bytes, "delta patch recorded");
                CommitResult {
                    version,
                    strategy,
                    size: patch_bytes,
                    collapsed: false,
                }
            }
            Strategy::Full => {
                let snapshot = Snapshot::new(version, new_nodes.clone());
                let size = snapshot.byte_size();
                self.base = snapshot;
                self.patches.clear();
                debug!(version, bytes = size, "full snapshot recorded");
                CommitResult {
                    version,
                    strategy,
                    size,
                    collapsed: true,
                }
            }
        };

        self.current = new_nodes;
        self.current_version = version;

        if self.patches.len() > self.config.max_patch_chain_length {
            self.collapse_chain();
            return CommitResult {
                collapsed: true,
                ..result
            };
        }
        result
    }

    /// Replace the chain with a single base snapshot of the current state.
    /// Replaying zero patches from the new base yields exactly the state the
    /// old chain reconstructed to.
    pub fn collapse_chain(&mut self) {
        info!(
            version = self.current_version,
            patches = self.patches.len(),
            "collapsing patch chain"
        );
        self.base = Snapshot::new(self.current_version, self.current.clone());
        self.patches.clear();
    }

    /// Rebuild the state at `version` by folding patches over the base.
    ///
    /// Out-of-range versions fail with [`EngineError::VersionOutOfRange`];
    /// versions older than the current base are no longer reachable after a
    /// collapse. A node-count deviation from the patch stats is logged as a
    /// [`EngineError::ReconstructionMismatch`] warning, not a failure.
    pub fn reconstruct(&self, version: u64) -> EngineResult<SnapshotNodes> {
        if version < self.base.version || version > self.current_version {
            return Err(EngineError::VersionOutOfRange {
                requested: version,
                earliest: self.base.version,
                current: self.current_version,
            });
        }

        let mut nodes = self.base.nodes.clone();
        let mut expected = None;
        for patch in &self.patches {
            if patch.version > version {
                break;
            }
            let report = apply_patch(&nodes, patch);
            if report.skipped > 0 {
                warn!(
                    version = patch.version,
                    skipped = report.skipped,
                    "patch applied best-effort"
                );
            }
            nodes = report.nodes;
            expected = Some(patch.stats.expected_nodes);
        }

        if let Some(expected) = expected {
            if expected != nodes.len() {
                let mismatch = EngineError::ReconstructionMismatch {
                    version,
                    expected,
                    actual: nodes.len(),
                };
                warn!(%mismatch, "reconstructed state deviates from patch stats");
            }
        }
        Ok(nodes)
    }

    /// The live (tip) state.
    pub fn head(&self) -> &SnapshotNodes {
        &self.current
    }
}
