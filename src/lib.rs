//! Local-first memory engine for long-running conversational text streams.
//!
//! `mnema` organizes incoming messages into a navigable topic hierarchy,
//! deduplicates near-identical content, tracks why one message followed
//! another, compresses successive snapshots of the evolving state, and
//! answers natural-language queries over all of the above. Capturing text
//! from a host UI, persisting bytes, rendering, and cross-device sync are
//! host concerns reachable only through the narrow boundaries on
//! [`engine::ConversationEngine`].
//!
//! # Architecture
//!
//! - [`tree`] — hierarchical topic index with topic-shift detection and
//!   token-budgeted retrieval
//! - [`version`] — git-style patch chains with compression-ratio-driven
//!   snapshotting
//! - [`fingerprint`] — perceptual hashing, Bloom gating, Hamming similarity
//! - [`causal`] — rule-based and statistical causal link inference with
//!   temporal decay
//! - [`query`] — intent classification and ranked retrieval across the rest
//! - [`engine`] — per-conversation orchestration and the host-facing surface
//! - [`cli`] — host-side commands that own persistence at session edges
//! - [`config`] — TOML configuration with environment overrides
//! - [`error`] — the engine error taxonomy

pub mod causal;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod query;
pub mod text;
pub mod tree;
pub mod version;
