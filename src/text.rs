//! Shared text helpers used by the tree, causal graph, and query engine.
//!
//! Everything here is deterministic and allocation-light: lowercase word
//! tokenization, stop-word filtering, keyword ranking by frequency, Jaccard
//! similarity, and the `⌈len/4⌉` token estimate used for budget enforcement.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

/// English stop words filtered out of keyword sets.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can",
        "did", "do", "does", "for", "from", "had", "has", "have", "how", "i",
        "if", "in", "into", "is", "it", "its", "me", "my", "no", "not", "of",
        "on", "or", "our", "so", "than", "that", "the", "their", "them",
        "then", "there", "these", "they", "this", "to", "was", "we", "were",
        "what", "when", "where", "which", "who", "why", "will", "with", "you",
        "your",
    ]
    .into_iter()
    .collect()
});

/// Lowercase alphanumeric tokens, splitting on everything else.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Non-stop-word tokens, preserving order and duplicates.
pub fn content_words(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|w| !STOP_WORDS.contains(w.as_str()))
        .collect()
}

/// Top `limit` keywords ranked by frequency, then alphabetically for
/// determinism. Single-character tokens are dropped.
pub fn keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in content_words(text) {
        if word.len() > 1 {
            *counts.entry(word).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(w, _)| w).collect()
}

/// Content words of at least four letters — the lexical-overlap vocabulary
/// used by causal inference.
pub fn significant_words(text: &str) -> HashSet<String> {
    content_words(text).into_iter().filter(|w| w.len() >= 4).collect()
}

/// Jaccard similarity of two string sets. Two empty sets are identical (1.0).
pub fn jaccard<S: std::hash::BuildHasher>(
    a: &HashSet<String, S>,
    b: &HashSet<String, S>,
) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Jaccard similarity over slices of keywords.
pub fn keyword_similarity(a: &[String], b: &[String]) -> f64 {
    let set_a: HashSet<String> = a.iter().cloned().collect();
    let set_b: HashSet<String> = b.iter().cloned().collect();
    jaccard(&set_a, &set_b)
}

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Truncate to `max_chars` on a char boundary, appending "..." if truncated.
pub fn truncate(content: &str, max_chars: usize) -> String {
    if content.len() <= max_chars {
        content.to_string()
    } else {
        let end = content
            .char_indices()
            .take_while(|(i, _)| *i < max_chars)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(max_chars);
        format!("{}...", &content[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_punctuation() {
        assert_eq!(
            tokenize("Hello, world! It's Rust."),
            vec!["hello", "world", "it", "s", "rust"]
        );
    }

    #[test]
    fn keywords_filter_stop_words() {
        let kw = keywords("the quick brown fox jumps over the lazy dog", 10);
        assert!(!kw.contains(&"the".to_string()));
        assert!(kw.contains(&"quick".to_string()));
    }

    #[test]
    fn keywords_rank_by_frequency() {
        let kw = keywords("rust rust rust memory memory engine", 2);
        assert_eq!(kw, vec!["rust", "memory"]);
    }

    #[test]
    fn jaccard_identical_and_disjoint() {
        let a: HashSet<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        let b: HashSet<String> = ["z"].iter().map(|s| s.to_string()).collect();
        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = truncate(s, 4);
        assert!(t.ends_with("..."));
    }
}
