use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

use crate::config::MnemaConfig;
use crate::engine::message::{Message, Role};

/// One entry of a transcript file: a JSON array of these.
#[derive(Debug, Deserialize)]
struct TranscriptEntry {
    #[serde(default)]
    id: Option<String>,
    role: Role,
    content: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// Ingest a transcript JSON file into the engine state.
pub fn ingest(config: &MnemaConfig, transcript_path: &Path, state_path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(transcript_path)
        .with_context(|| format!("failed to read transcript: {}", transcript_path.display()))?;
    let entries: Vec<TranscriptEntry> =
        serde_json::from_str(&raw).context("failed to parse transcript JSON")?;

    let mut engine = super::load_engine(config, state_path)?;

    let mut processed = 0usize;
    let mut duplicates = 0usize;
    let mut shifts = 0usize;
    let mut rejected = 0usize;

    for entry in entries {
        let mut message = Message::new(entry.role, entry.content);
        if let Some(id) = entry.id {
            message.id = id;
        }
        if let Some(ts) = entry.timestamp {
            message.timestamp = ts;
        }
        message.metadata = entry.metadata;

        match engine.process_message(&message, None) {
            Ok(result) => {
                processed += 1;
                if result.duplicate {
                    duplicates += 1;
                }
                if result.topic_shift {
                    shifts += 1;
                }
            }
            Err(err) => {
                rejected += 1;
                eprintln!("rejected message: {err}");
            }
        }
    }

    super::save_engine(&engine, state_path)?;

    println!("Ingest complete");
    println!("{}", "=".repeat(40));
    println!("  Processed:      {processed}");
    println!("  Duplicates:     {duplicates}");
    println!("  Topic shifts:   {shifts}");
    println!("  Rejected:       {rejected}");
    println!("  Tree nodes:     {}", engine.tree().len());
    println!("  Version:        {}", engine.current_version());
    println!("  State saved to: {}", state_path.display());

    Ok(())
}
