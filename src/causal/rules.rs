//! Declarative discourse classification rules.
//!
//! Each [`DiscourseType`] owns a set of regex triggers and an allowed-
//! successor set. Classification counts trigger hits per type and takes the
//! winner; ties (including zero hits everywhere) resolve to `General`. New
//! discourse types are additive data here, not code changes elsewhere.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// The conversational role a message plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscourseType {
    Question,
    Problem,
    Request,
    Decision,
    Hypothesis,
    General,
}

impl DiscourseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Problem => "problem",
            Self::Request => "request",
            Self::Decision => "decision",
            Self::Hypothesis => "hypothesis",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for DiscourseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DiscourseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "question" => Ok(Self::Question),
            "problem" => Ok(Self::Problem),
            "request" => Ok(Self::Request),
            "decision" => Ok(Self::Decision),
            "hypothesis" => Ok(Self::Hypothesis),
            "general" => Ok(Self::General),
            _ => Err(format!("unknown discourse type: {s}")),
        }
    }
}

/// One row of the rule table.
pub struct DiscourseRule {
    pub discourse: DiscourseType,
    pub triggers: Vec<Regex>,
    /// Discourse types that may explicitly follow this one.
    pub successors: &'static [DiscourseType],
}

fn rx(pattern: &str) -> Regex {
    Regex::new(pattern).expect("rule table pattern must compile")
}

/// The full rule table, ordered by specificity.
pub static RULES: Lazy<Vec<DiscourseRule>> = Lazy::new(|| {
    use DiscourseType::*;
    vec![
        DiscourseRule {
            discourse: Question,
            triggers: vec![
                rx(r"(?i)^\s*(what|how|why|when|where|who|which|can|could|would|should|is|are|does|do)\b"),
                rx(r"\?"),
                rx(r"(?i)\b(explain|tell me|wondering)\b"),
            ],
            successors: &[Decision, General, Hypothesis, Problem],
        },
        DiscourseRule {
            discourse: Problem,
            triggers: vec![
                rx(r"(?i)\b(error|bug|fail(s|ed|ing)?|broken|crash(es|ed)?|doesn'?t work|not working|issue|exception)\b"),
                rx(r"(?i)\b(stack\s*trace|panic|segfault)\b"),
            ],
            successors: &[Hypothesis, Request, Decision, Question],
        },
        DiscourseRule {
            discourse: Request,
            triggers: vec![
                rx(r"(?i)\b(please|can you|could you|would you|implement|create|build|write|add|make|generate|fix)\b"),
                rx(r"(?i)^\s*(let'?s|we need|i need|i want)\b"),
            ],
            successors: &[Decision, General, Question],
        },
        DiscourseRule {
            discourse: Decision,
            triggers: vec![
                rx(r"(?i)\b(decided|decision|chose|choose|going with|we('| wi)ll use|agreed|settled on|final)\b"),
                rx(r"(?i)\b(conclusion|resolved to)\b"),
            ],
            successors: &[Request, General, Question],
        },
        DiscourseRule {
            discourse: Hypothesis,
            triggers: vec![
                rx(r"(?i)\b(maybe|perhaps|might be|could be|i (think|suspect|guess|believe)|probably|possibly)\b"),
                rx(r"(?i)\b(what if|suppose|hypothes)\b"),
            ],
            successors: &[Question, Decision, Problem],
        },
        DiscourseRule {
            discourse: General,
            triggers: Vec::new(),
            successors: &[Question, Problem, Request, Decision, Hypothesis, General],
        },
    ]
});

/// Classify a text by trigger hit count; ties (including zero hits
/// everywhere) favor `General`.
pub fn classify(text: &str) -> DiscourseType {
    let mut best = DiscourseType::General;
    let mut best_hits = 0usize;
    let mut tied = false;
    for rule in RULES.iter() {
        let hits = rule
            .triggers
            .iter()
            .filter(|re| re.is_match(text))
            .count();
        if hits > best_hits {
            best_hits = hits;
            best = rule.discourse;
            tied = false;
        } else if hits == best_hits && hits > 0 && rule.discourse != best {
            tied = true;
        }
    }
    if tied {
        DiscourseType::General
    } else {
        best
    }
}

/// Whether `next` is an allowed explicit successor of `prior`.
pub fn allows_successor(prior: DiscourseType, next: DiscourseType) -> bool {
    RULES
        .iter()
        .find(|r| r.discourse == prior)
        .map(|r| r.successors.contains(&next))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn questions_are_detected() {
        assert_eq!(classify("What is JavaScript?"), DiscourseType::Question);
        assert_eq!(classify("How do arrays work?"), DiscourseType::Question);
    }

    #[test]
    fn problems_are_detected() {
        assert_eq!(
            classify("The build fails with a segfault and a stack trace"),
            DiscourseType::Problem
        );
    }

    #[test]
    fn requests_are_detected() {
        assert_eq!(
            classify("Please implement the login form and add validation"),
            DiscourseType::Request
        );
    }

    #[test]
    fn decisions_are_detected() {
        assert_eq!(
            classify("We agreed and decided: going with PostgreSQL, final"),
            DiscourseType::Decision
        );
    }

    #[test]
    fn hypotheses_are_detected() {
        assert_eq!(
            classify("Maybe the cache is stale, I suspect the TTL is wrong"),
            DiscourseType::Hypothesis
        );
    }

    #[test]
    fn plain_statements_fall_back_to_general() {
        assert_eq!(classify("The sky was clear this morning."), DiscourseType::General);
    }

    #[test]
    fn successor_table_is_directional() {
        assert!(allows_successor(
            DiscourseType::Question,
            DiscourseType::Decision
        ));
        assert!(!allows_successor(
            DiscourseType::Decision,
            DiscourseType::Hypothesis
        ));
    }
}
