#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use mnema::config::MnemaConfig;
use mnema::engine::message::{Message, Role};
use mnema::engine::ConversationEngine;

/// Fresh engine with default configuration.
pub fn engine() -> ConversationEngine {
    ConversationEngine::new(MnemaConfig::default())
}

/// Message with a fresh id and the current time.
pub fn msg(role: Role, content: &str) -> Message {
    Message::new(role, content)
}

/// Message with an explicit timestamp.
pub fn msg_at(role: Role, content: &str, timestamp: DateTime<Utc>) -> Message {
    let mut m = Message::new(role, content);
    m.timestamp = timestamp;
    m
}

/// Ingest a scripted conversation, one turn per minute ending now.
/// Returns the message ids in order.
pub fn run_conversation(engine: &mut ConversationEngine, turns: &[(Role, &str)]) -> Vec<String> {
    let start = Utc::now() - Duration::minutes(turns.len() as i64);
    let mut ids = Vec::new();
    for (i, (role, content)) in turns.iter().enumerate() {
        let m = msg_at(*role, content, start + Duration::minutes(i as i64 + 1));
        engine.process_message(&m, None).unwrap();
        ids.push(m.id);
    }
    ids
}
