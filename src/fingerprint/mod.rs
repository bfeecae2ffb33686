//! Near-duplicate detection — perceptual hashing, Bloom gating, Hamming scan.
//!
//! [`FingerprintIndex::check_duplicate`] is the read path: exact-text repeats
//! short-circuit at similarity 1.0, a Bloom-negative returns clean without
//! touching the cache, and only a Bloom hit pays for the linear Hamming scan.
//! The exact cache is LRU-bounded; the Bloom filter keeps its bits after an
//! eviction, which trades a rising false-positive rate for bounded memory.

pub mod bloom;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::FingerprintConfig;
use bloom::BloomFilter;

// ── Fingerprint ───────────────────────────────────────────────────────────────

/// Fixed-width perceptual hash, canonically a hex string of
/// `hash_size / 4` digits. Similar texts hash to nearby bit patterns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    pub fn bit_len(&self) -> usize {
        self.0.len() * 4
    }

    /// Hamming similarity: matching bits over total bits. Symmetric, and
    /// `similarity(fp, fp) == 1.0`. Fingerprints of different widths are
    /// incomparable and score 0.0.
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return if self == other { 1.0 } else { 0.0 };
        }
        let total_bits = self.bit_len() as f64;
        let differing: u32 = self
            .0
            .bytes()
            .zip(other.0.bytes())
            .map(|(a, b)| {
                let xa = hex_nibble(a);
                let xb = hex_nibble(b);
                (xa ^ xb).count_ones()
            })
            .sum();
        (total_bits - differing as f64) / total_bits
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_nibble(c: u8) -> u32 {
    match c {
        b'0'..=b'9' => (c - b'0') as u32,
        b'a'..=b'f' => (c - b'a' + 10) as u32,
        b'A'..=b'F' => (c - b'A' + 10) as u32,
        _ => 0,
    }
}

// ── Feature extraction ────────────────────────────────────────────────────────

const TECH_KEYWORDS: &[&str] = &[
    "function", "variable", "array", "object", "class", "method", "error",
    "debug", "server", "client", "database", "query", "api", "code", "type",
    "string", "number", "async", "await", "return", "import", "struct",
];

const VERB_SUFFIXES: &[&str] = &["ed", "ing", "ate", "ize", "ise", "ify"];

/// Lightweight syntactic/semantic feature vector, each value in [0, 1].
fn extract_features(text: &str) -> Vec<f64> {
    let chars = text.chars().count().max(1);
    let words: Vec<&str> = text.split_whitespace().collect();
    let word_count = words.len().max(1);

    let lower = text.to_lowercase();
    let punct = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    let questions = text.chars().filter(|&c| c == '?').count();
    let uppercase = text.chars().filter(|c| c.is_uppercase()).count();
    let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
    let code_chars = text
        .chars()
        .filter(|c| matches!(c, '{' | '}' | '(' | ')' | ';' | '=' | '<' | '>'))
        .count();

    let avg_word_len =
        words.iter().map(|w| w.len()).sum::<usize>() as f64 / word_count as f64;

    // Crude subject-verb-object signal: words carrying a verb-like suffix.
    let verb_like = words
        .iter()
        .filter(|w| {
            let w = w.to_lowercase();
            w.len() > 3 && VERB_SUFFIXES.iter().any(|s| w.ends_with(s))
        })
        .count();

    let tech_hits = TECH_KEYWORDS
        .iter()
        .filter(|k| lower.contains(*k))
        .count();

    let unique: std::collections::HashSet<&&str> = words.iter().collect();

    vec![
        clamp01(word_count as f64 / 200.0),
        clamp01(chars as f64 / 1000.0),
        clamp01(avg_word_len / 10.0),
        clamp01(punct as f64 / chars as f64 * 5.0),
        clamp01(questions as f64 / 5.0),
        clamp01(verb_like as f64 / word_count as f64 * 3.0),
        clamp01(tech_hits as f64 / 8.0),
        clamp01(code_chars as f64 / chars as f64 * 10.0),
        clamp01(uppercase as f64 / chars as f64 * 10.0),
        clamp01(digits as f64 / chars as f64 * 10.0),
        clamp01(unique.len() as f64 / word_count as f64),
    ]
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Derive a perceptual hash of `hash_size` bits from the feature vector:
/// a bit is set where its driving feature exceeds the feature mean, and
/// strongly-above-mean features contribute a second entropy bit.
fn perceptual_hash(features: &[f64], hash_size: usize) -> Fingerprint {
    let mean = features.iter().sum::<f64>() / features.len().max(1) as f64;
    let mut bits = vec![false; hash_size];

    for pos in 0..hash_size {
        let value = features[pos % features.len()];
        if value > mean {
            bits[pos] = true;
        }
        if value > mean + 0.25 {
            // Entropy bit at a decorrelated position.
            bits[(pos * 31 + 7) % hash_size] = true;
        }
    }

    let hex: String = bits
        .chunks(4)
        .map(|chunk| {
            let mut nibble = 0u8;
            for (i, &bit) in chunk.iter().enumerate() {
                if bit {
                    nibble |= 1 << (3 - i);
                }
            }
            char::from_digit(nibble as u32, 16).unwrap_or('0')
        })
        .collect();

    Fingerprint(hex)
}

// ── Duplicate check results ───────────────────────────────────────────────────

/// One near-duplicate match from the cache scan.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateMatch {
    pub fingerprint: Fingerprint,
    pub similarity: f64,
}

/// Outcome of a duplicate check.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCheck {
    pub fingerprint: Fingerprint,
    pub is_duplicate: bool,
    /// Matches at or above the threshold, sorted by descending similarity.
    pub matches: Vec<DuplicateMatch>,
}

// ── LRU cache ─────────────────────────────────────────────────────────────────

/// Exact text → fingerprint cache with least-recently-used eviction.
///
/// Reads bump a logical clock per entry; eviction drops the stalest entry
/// once capacity is exceeded. Evicted entries leave their bits in the Bloom
/// filter — soundness (no false negatives) still holds for everything the
/// cache retains.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FingerprintCache {
    entries: HashMap<String, CacheEntry>,
    capacity: usize,
    clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    fingerprint: Fingerprint,
    last_used: u64,
}

impl FingerprintCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    fn get(&mut self, text: &str) -> Option<Fingerprint> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(text).map(|e| {
            e.last_used = clock;
            e.fingerprint.clone()
        })
    }

    fn peek(&self, text: &str) -> Option<&Fingerprint> {
        self.entries.get(text).map(|e| &e.fingerprint)
    }

    fn insert(&mut self, text: String, fingerprint: Fingerprint) {
        self.clock += 1;
        self.entries.insert(
            text,
            CacheEntry {
                fingerprint,
                last_used: self.clock,
            },
        );
        if self.entries.len() > self.capacity {
            self.evict_stalest();
        }
    }

    fn evict_stalest(&mut self) {
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone())
        {
            tracing::debug!(evicted = %crate::text::truncate(&key, 40), "fingerprint cache eviction");
            self.entries.remove(&key);
        }
    }

    fn iter_fingerprints(&self) -> impl Iterator<Item = &Fingerprint> {
        self.entries.values().map(|e| &e.fingerprint)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ── Index ─────────────────────────────────────────────────────────────────────

/// The near-duplicate detector: perceptual hasher + Bloom gate + exact cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintIndex {
    config: FingerprintConfig,
    bloom: BloomFilter,
    cache: FingerprintCache,
}

impl FingerprintIndex {
    pub fn new(config: FingerprintConfig) -> Self {
        let bloom = BloomFilter::new(config.bloom_bits, config.bloom_hashes);
        let cache = FingerprintCache::new(config.cache_capacity);
        Self {
            config,
            bloom,
            cache,
        }
    }

    /// Pure hash of a text; identical input always yields the identical hex.
    pub fn fingerprint(&self, text: &str) -> Fingerprint {
        let features = extract_features(text);
        perceptual_hash(&features, self.config.hash_size)
    }

    /// Record a text in the filter and cache, returning its fingerprint.
    pub fn insert(&mut self, text: &str) -> Fingerprint {
        let fp = self.fingerprint(text);
        self.bloom.insert(fp.as_hex());
        self.cache.insert(text.to_string(), fp.clone());
        fp
    }

    /// Duplicate check at `threshold` (defaults to the configured one).
    ///
    /// Exact repeats report a single match at similarity 1.0. A Bloom miss
    /// is definitive — the cache holds nothing with this hash. A Bloom hit
    /// pays for a linear Hamming scan of the cache, O(cache size).
    pub fn check_duplicate(&mut self, text: &str, threshold: Option<f64>) -> DuplicateCheck {
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);
        let fp = self.fingerprint(text);

        // Exact-text repeat: similarity 1.0, no scan needed.
        if self.cache.get(text).is_some() {
            return DuplicateCheck {
                fingerprint: fp.clone(),
                is_duplicate: true,
                matches: vec![DuplicateMatch {
                    fingerprint: fp,
                    similarity: 1.0,
                }],
            };
        }

        // Bloom gate: a negative means no cached fingerprint equals this hash.
        if !self.bloom.contains(fp.as_hex()) {
            return DuplicateCheck {
                fingerprint: fp,
                is_duplicate: false,
                matches: Vec::new(),
            };
        }

        let mut matches: Vec<DuplicateMatch> = self
            .cache
            .iter_fingerprints()
            .map(|cached| DuplicateMatch {
                fingerprint: cached.clone(),
                similarity: fp.similarity(cached),
            })
            .filter(|m| m.similarity >= threshold)
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        DuplicateCheck {
            is_duplicate: !matches.is_empty(),
            fingerprint: fp,
            matches,
        }
    }

    /// Whether this exact text has been inserted (and not yet evicted).
    pub fn contains_text(&self, text: &str) -> bool {
        self.cache.peek(text).is_some()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn bloom_fill_ratio(&self) -> f64 {
        self.bloom.fill_ratio()
    }
}
