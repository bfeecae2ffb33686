//! Query parsing and intent classification.
//!
//! Parsing pulls out tokens, entities (capitalized, quoted, technical), a
//! keyword-driven timeframe, and stop-word-filtered keywords. Classification
//! scores the query against six pattern families by trigger hit count; ties
//! resolve toward `Contextual`.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::text;

/// The six query intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Temporal,
    Causal,
    Contextual,
    Image,
    Code,
    Summary,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::Causal => "causal",
            Self::Contextual => "contextual",
            Self::Image => "image",
            Self::Code => "code",
            Self::Summary => "summary",
        }
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete `[start, end)` time range resolved from timeframe keywords.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timeframe {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Timeframe {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// A parsed query, ready for dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedQuery {
    pub raw: String,
    pub kind: QueryKind,
    pub tokens: Vec<String>,
    pub keywords: Vec<String>,
    /// Capitalized, quoted, and technical terms.
    pub entities: Vec<String>,
    pub timeframe: Option<Timeframe>,
}

struct KindRule {
    kind: QueryKind,
    triggers: Vec<Regex>,
}

fn rx(pattern: &str) -> Regex {
    Regex::new(pattern).expect("query pattern must compile")
}

static KIND_RULES: Lazy<Vec<KindRule>> = Lazy::new(|| {
    vec![
        KindRule {
            kind: QueryKind::Temporal,
            triggers: vec![
                rx(r"(?i)\b(today|yesterday|this week|last week|this month|recently|earlier)\b"),
                rx(r"(?i)\b(when did|what time|how long ago)\b"),
            ],
        },
        KindRule {
            kind: QueryKind::Causal,
            triggers: vec![
                rx(r"(?i)\b(why|because|reason|caused?|led to|resulted? in)\b"),
                rx(r"(?i)\b(how did .* happen|what made)\b"),
            ],
        },
        KindRule {
            kind: QueryKind::Image,
            triggers: vec![
                rx(r"(?i)\b(image|picture|photo|screenshot|diagram|chart)\b"),
            ],
        },
        KindRule {
            kind: QueryKind::Code,
            triggers: vec![
                rx(r"(?i)\b(code|function|snippet|implement(ation)?|class|method|script)\b"),
                rx(r"```"),
            ],
        },
        KindRule {
            kind: QueryKind::Summary,
            triggers: vec![
                rx(r"(?i)\b(summar(y|ize|ise)|overview|recap|key points|tl;?dr|main ideas)\b"),
            ],
        },
        KindRule {
            kind: QueryKind::Contextual,
            triggers: vec![
                rx(r"(?i)\b(about|discuss(ed)?|mention(ed)?|said|talk(ed)?|context)\b"),
            ],
        },
    ]
});

static QUOTED: Lazy<Regex> = Lazy::new(|| rx(r#""([^"]+)"|'([^']+)'"#));
static CAPITALIZED: Lazy<Regex> = Lazy::new(|| rx(r"\b[A-Z][a-zA-Z0-9]{2,}\b"));
static TECHNICAL: Lazy<Regex> =
    Lazy::new(|| rx(r"\b[a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]+|\(\)|::[a-zA-Z_]+)"));

/// Parse and classify a raw query string.
pub fn parse(raw: &str, now: DateTime<Utc>) -> ParsedQuery {
    ParsedQuery {
        raw: raw.to_string(),
        kind: classify(raw),
        tokens: text::tokenize(raw),
        keywords: text::keywords(raw, 10),
        entities: extract_entities(raw),
        timeframe: resolve_timeframe(raw, now),
    }
}

/// Most trigger hits wins; ties (and no hits at all) go to `Contextual`.
pub fn classify(raw: &str) -> QueryKind {
    let mut best = QueryKind::Contextual;
    let mut best_hits = 0usize;
    let mut tied = false;
    for rule in KIND_RULES.iter() {
        let hits = rule.triggers.iter().filter(|re| re.is_match(raw)).count();
        if hits > best_hits {
            best_hits = hits;
            best = rule.kind;
            tied = false;
        } else if hits == best_hits && hits > 0 && rule.kind != best {
            tied = true;
        }
    }
    if tied {
        QueryKind::Contextual
    } else {
        best
    }
}

/// Quoted phrases, capitalized terms, and technical identifiers.
fn extract_entities(raw: &str) -> Vec<String> {
    let mut entities = Vec::new();
    for cap in QUOTED.captures_iter(raw) {
        if let Some(m) = cap.get(1).or_else(|| cap.get(2)) {
            entities.push(m.as_str().to_string());
        }
    }
    for m in CAPITALIZED.find_iter(raw) {
        entities.push(m.as_str().to_string());
    }
    for m in TECHNICAL.find_iter(raw) {
        entities.push(m.as_str().to_string());
    }
    entities.dedup();
    entities
}

/// Keyword-driven timeframe resolution against a reference instant.
fn resolve_timeframe(raw: &str, now: DateTime<Utc>) -> Option<Timeframe> {
    let lower = raw.to_lowercase();
    let today = start_of_day(now);

    if lower.contains("yesterday") {
        return Some(Timeframe {
            start: today - Duration::days(1),
            end: today,
        });
    }
    if lower.contains("today") {
        return Some(Timeframe {
            start: today,
            end: today + Duration::days(1),
        });
    }
    if lower.contains("last week") {
        let this_week = start_of_week(now);
        return Some(Timeframe {
            start: this_week - Duration::weeks(1),
            end: this_week,
        });
    }
    if lower.contains("this week") {
        return Some(Timeframe {
            start: start_of_week(now),
            end: today + Duration::days(1),
        });
    }
    if lower.contains("this month") {
        return Some(Timeframe {
            start: start_of_month(now),
            end: today + Duration::days(1),
        });
    }
    None
}

fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(ts.year(), ts.month(), ts.day(), 0, 0, 0)
        .single()
        .unwrap_or(ts)
}

fn start_of_week(ts: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = ts.weekday().num_days_from_monday() as i64;
    start_of_day(ts) - Duration::days(days_from_monday)
}

fn start_of_month(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(ts.year(), ts.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(ts)
}
