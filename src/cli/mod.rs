//! CLI subcommands — the host-side collaborator in this repo.
//!
//! The CLI owns files on disk and calls the engine's persistence boundary
//! (`serialize`/`deserialize`) only at session edges: load state, run the
//! command, save state. The engine itself never touches storage.

pub mod context;
pub mod ingest;
pub mod query;
pub mod stats;

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::config::MnemaConfig;
use crate::engine::ConversationEngine;

/// Load a serialized engine, or start a fresh one when no state file exists.
pub fn load_engine(config: &MnemaConfig, path: &Path) -> Result<ConversationEngine> {
    if path.exists() {
        let blob = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read state file: {}", path.display()))?;
        let engine = ConversationEngine::deserialize(&blob)
            .with_context(|| format!("failed to parse state file: {}", path.display()))?;
        info!(path = %path.display(), "resumed engine state");
        Ok(engine)
    } else {
        info!(path = %path.display(), "no state file, starting fresh");
        Ok(ConversationEngine::new(config.clone()))
    }
}

/// Persist the engine atomically (tmp + rename).
pub fn save_engine(engine: &ConversationEngine, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create state dir: {}", parent.display()))?;
    }
    let blob = engine.serialize().context("failed to serialize engine")?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, blob)
        .with_context(|| format!("failed to write temp state: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to rename state into place: {}", path.display()))?;
    Ok(())
}
