use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level configuration, one section per subsystem.
///
/// Loaded from TOML with every field defaulted, then overridden by `MNEMA_*`
/// environment variables. Engine state serialization embeds the config so a
/// resumed conversation keeps the thresholds it was built with.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MnemaConfig {
    pub engine: EngineConfig,
    pub tree: TreeConfig,
    pub versioning: VersioningConfig,
    pub fingerprint: FingerprintConfig,
    pub causal: CausalConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub log_level: String,
    /// Default path for the serialized engine state used by the CLI.
    pub state_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TreeConfig {
    /// Average path similarity below this marks a topic shift.
    pub topic_shift_threshold: f64,
    /// How many trailing path nodes the similarity average covers.
    pub recent_window: usize,
    /// Ancestor re-attachment requires a weighted score above this.
    pub ancestor_min_score: f64,
    /// Hard bound on the current-path length.
    pub max_path_span: usize,
    /// Keywords kept per node.
    pub keywords_per_node: usize,
    pub prune_max_age_days: i64,
    pub prune_importance_floor: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct VersioningConfig {
    /// Delta persistence only when `patch_bytes / full_bytes` is below this.
    pub compression_threshold: f64,
    /// Chain collapses into a new base once it grows past this.
    pub max_patch_chain_length: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Perceptual hash width in bits; hex width is `hash_size / 4`.
    pub hash_size: usize,
    pub bloom_bits: usize,
    pub bloom_hashes: u32,
    /// Hamming similarity at or above this counts as a near-duplicate.
    pub similarity_threshold: f64,
    /// LRU capacity of the exact fingerprint cache.
    pub cache_capacity: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CausalConfig {
    /// Explicit (rule-driven) edges require at least this confidence.
    pub inference_threshold: f64,
    /// Edges below this are pruned; implicit edges must start above it.
    pub min_confidence: f64,
    /// How many prior nodes the implicit-cause scan covers.
    pub implicit_window: usize,
    /// Minimum lexical overlap for an implicit edge, before temporal decay.
    pub implicit_overlap_floor: f64,
    /// Per-day exponential decay rate applied by `apply_decay`.
    pub decay_rate: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct QueryConfig {
    pub max_results: usize,
    /// Results with relevance below this are dropped.
    pub min_relevance: f64,
    /// Token budget for contextual retrieval.
    pub context_token_budget: usize,
    /// Importance floor for summary queries.
    pub summary_importance_threshold: f64,
}

impl Default for MnemaConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            tree: TreeConfig::default(),
            versioning: VersioningConfig::default(),
            fingerprint: FingerprintConfig::default(),
            causal: CausalConfig::default(),
            query: QueryConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let state_path = default_mnema_dir()
            .join("state.json")
            .to_string_lossy()
            .into_owned();
        Self {
            log_level: "info".into(),
            state_path,
        }
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            topic_shift_threshold: 0.3,
            recent_window: 5,
            ancestor_min_score: 0.3,
            max_path_span: 50,
            keywords_per_node: 10,
            prune_max_age_days: 30,
            prune_importance_floor: 0.3,
        }
    }
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            compression_threshold: 0.6,
            max_patch_chain_length: 20,
        }
    }
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            hash_size: 64,
            bloom_bits: 4096,
            bloom_hashes: 3,
            similarity_threshold: 0.85,
            cache_capacity: 10_000,
        }
    }
}

impl Default for CausalConfig {
    fn default() -> Self {
        Self {
            inference_threshold: 0.6,
            min_confidence: 0.3,
            implicit_window: 10,
            implicit_overlap_floor: 0.3,
            decay_rate: 0.05,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            min_relevance: 0.2,
            context_token_budget: 2000,
            summary_importance_threshold: 0.7,
        }
    }
}

/// Returns `~/.mnema/`
pub fn default_mnema_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".mnema")
}

/// Returns the default config file path: `~/.mnema/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnema_dir().join("config.toml")
}

impl MnemaConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemaConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (MNEMA_STATE, MNEMA_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMA_STATE") {
            self.engine.state_path = val;
        }
        if let Ok(val) = std::env::var("MNEMA_LOG_LEVEL") {
            self.engine.log_level = val;
        }
    }

    /// Resolve the state file path, expanding `~` if needed.
    pub fn resolved_state_path(&self) -> PathBuf {
        expand_tilde(&self.engine.state_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MnemaConfig::default();
        assert_eq!(config.engine.log_level, "info");
        assert_eq!(config.tree.recent_window, 5);
        assert_eq!(config.causal.implicit_window, 10);
        assert_eq!(config.fingerprint.hash_size % 4, 0);
        assert!(config.engine.state_path.ends_with("state.json"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[engine]
log_level = "debug"

[tree]
topic_shift_threshold = 0.5

[fingerprint]
similarity_threshold = 0.9
"#;
        let config: MnemaConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.log_level, "debug");
        assert_eq!(config.tree.topic_shift_threshold, 0.5);
        assert_eq!(config.fingerprint.similarity_threshold, 0.9);
        // defaults still apply for unset fields
        assert_eq!(config.versioning.max_patch_chain_length, 20);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = MnemaConfig::default();
        std::env::set_var("MNEMA_STATE", "/tmp/override.json");
        std::env::set_var("MNEMA_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.engine.state_path, "/tmp/override.json");
        assert_eq!(config.engine.log_level, "trace");

        // Clean up
        std::env::remove_var("MNEMA_STATE");
        std::env::remove_var("MNEMA_LOG_LEVEL");
    }
}
