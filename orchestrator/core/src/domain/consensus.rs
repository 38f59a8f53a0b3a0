// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Consensus Analysis
//!
//! Reduces independent model answers to an agreement score, a list of
//! flagged contradictions and the points they share or do not share.
//!
//! This is a heuristic. Similarity is character-level and conflict
//! detection only knows a fixed antonym table plus a numeric check, so two
//! answers that clearly disagree in other words ("will rise" / "will fall")
//! are not flagged.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure function over a response list; no state, no I/O

use regex::Regex;
use serde::{Deserialize, Serialize};
use similar::{Algorithm, TextDiff};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use crate::domain::llm::ProviderResponse;

/// Minimum average similarity for consensus
pub const AGREEMENT_THRESHOLD: f64 = 0.7;

/// Characters of each answer compared for similarity
pub const SIMILARITY_MAX_CHARS: usize = 2_000;

/// Per-pair diff budget; past it the diff is approximate
pub const SIMILARITY_DEADLINE: Duration = Duration::from_millis(5);

const MIN_POINT_CHARS: usize = 20;
const POINTS_PER_RESPONSE: usize = 5;
const MAX_REPORTED_POINTS: usize = 3;

/// (affirmative, negated)
const ANTONYMS: &[(&str, &str)] = &[
    ("yes", "no"),
    ("buy", "sell"),
    ("always", "never"),
    ("true", "false"),
    ("safe", "unsafe"),
    ("increase", "decrease"),
    ("recommended", "not recommended"),
    ("possible", "impossible"),
    ("correct", "incorrect"),
    ("legal", "illegal"),
    ("should", "should not"),
];

struct AntonymPattern {
    affirmative: &'static str,
    negated: &'static str,
    affirmative_re: Regex,
    negated_re: Regex,
}

static ANTONYM_PATTERNS: LazyLock<Vec<AntonymPattern>> = LazyLock::new(|| {
    ANTONYMS
        .iter()
        .map(|&(affirmative, negated)| AntonymPattern {
            affirmative,
            negated,
            affirmative_re: word_pattern(affirmative),
            negated_re: word_pattern(negated),
        })
        .collect()
});

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("number pattern is valid"));

fn word_pattern(phrase: &str) -> Regex {
    let body = phrase
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    Regex::new(&format!(r"(?i)\b{body}\b")).expect("antonym phrases are plain words")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// One side uses a phrase, the other its opposite
    Contradiction,
    /// Both sides cite numbers and none of them match
    NumericDiscrepancy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub model_a: String,
    pub model_b: String,
    pub kind: ConflictKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub has_consensus: bool,
    pub agreement_level: f64,
    pub conflicts: Vec<Conflict>,
    pub common_points: Vec<String>,
    pub divergent_points: Vec<String>,
    pub models_analyzed: usize,
}

impl ConsensusResult {
    fn insufficient(valid: usize) -> Self {
        Self {
            has_consensus: false,
            agreement_level: if valid == 0 { 0.0 } else { 1.0 },
            conflicts: Vec::new(),
            common_points: Vec::new(),
            divergent_points: Vec::new(),
            models_analyzed: valid,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusAnalyzer;

impl ConsensusAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, responses: &[ProviderResponse]) -> ConsensusResult {
        let valid: Vec<&ProviderResponse> = responses.iter().filter(|r| r.is_valid()).collect();
        if valid.len() < 2 {
            return ConsensusResult::insufficient(valid.len());
        }

        let mut total_similarity = 0.0;
        let mut pairs = 0usize;
        let mut conflicts = Vec::new();

        for (i, a) in valid.iter().enumerate() {
            for b in &valid[i + 1..] {
                total_similarity += similarity(a.response_text(), b.response_text());
                pairs += 1;

                if let Some((kind, detail)) = detect_conflict(a.response_text(), b.response_text()) {
                    conflicts.push(Conflict {
                        model_a: a.provider().to_string(),
                        model_b: b.provider().to_string(),
                        kind,
                        detail,
                    });
                }
            }
        }

        let agreement_level = total_similarity / pairs as f64;
        let (common_points, divergent_points) = key_points(&valid);

        ConsensusResult {
            has_consensus: agreement_level > AGREEMENT_THRESHOLD && conflicts.is_empty(),
            agreement_level,
            conflicts,
            common_points,
            divergent_points,
            models_analyzed: valid.len(),
        }
    }
}

/// `2 * LCS / (|a| + |b|)` over lowercased, trimmed characters.
///
/// Only the first [`SIMILARITY_MAX_CHARS`] of each answer are compared, and
/// the diff stops refining after [`SIMILARITY_DEADLINE`]. An interrupted
/// diff is still valid, so the ratio can only come out lower, never higher.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = leading_chars(a);
    let b = leading_chars(b);
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .deadline(Instant::now() + SIMILARITY_DEADLINE)
        .diff_chars(a.as_str(), b.as_str());
    f64::from(diff.ratio())
}

fn leading_chars(text: &str) -> String {
    text.trim()
        .chars()
        .take(SIMILARITY_MAX_CHARS)
        .collect::<String>()
        .to_lowercase()
}

/// At most one conflict per pair; antonyms take priority over numbers
fn detect_conflict(a: &str, b: &str) -> Option<(ConflictKind, String)> {
    for pattern in ANTONYM_PATTERNS.iter() {
        let opposed = (has_affirmative(a, pattern) && pattern.negated_re.is_match(b))
            || (pattern.negated_re.is_match(a) && has_affirmative(b, pattern));
        if opposed {
            return Some((
                ConflictKind::Contradiction,
                format!("'{}' vs '{}'", pattern.affirmative, pattern.negated),
            ));
        }
    }

    let numbers_a = numbers(a);
    let numbers_b = numbers(b);
    if !numbers_a.is_empty() && !numbers_b.is_empty() && numbers_a.is_disjoint(&numbers_b) {
        let mut left: Vec<_> = numbers_a.into_iter().collect();
        let mut right: Vec<_> = numbers_b.into_iter().collect();
        left.sort();
        right.sort();
        return Some((
            ConflictKind::NumericDiscrepancy,
            format!("{} vs {}", left.join(", "), right.join(", ")),
        ));
    }

    None
}

/// Affirmative occurrence that is not part of the negated phrase
/// ("recommended" inside "not recommended" does not count)
fn has_affirmative(text: &str, pattern: &AntonymPattern) -> bool {
    let negated_spans: Vec<(usize, usize)> = pattern
        .negated_re
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();

    pattern.affirmative_re.find_iter(text).any(|m| {
        !negated_spans
            .iter()
            .any(|&(start, end)| m.start() >= start && m.end() <= end)
    })
}

fn numbers(text: &str) -> HashSet<&str> {
    NUMBER.find_iter(text).map(|m| m.as_str()).collect()
}

fn candidate_points(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| s.chars().count() > MIN_POINT_CHARS)
        .take(POINTS_PER_RESPONSE)
        .filter(|s| seen.insert(s.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Points shared by at least half the responses (and at least two), and
/// points only one response makes, each in first-seen order
fn key_points(valid: &[&ProviderResponse]) -> (Vec<String>, Vec<String>) {
    let mut order: Vec<String> = Vec::new();
    let mut display: HashMap<String, String> = HashMap::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    for response in valid {
        for point in candidate_points(response.response_text()) {
            let key = point.to_lowercase();
            if !display.contains_key(&key) {
                order.push(key.clone());
                display.insert(key.clone(), point);
            }
            *counts.entry(key).or_insert(0) += 1;
        }
    }

    let required = 2.max(valid.len().div_ceil(2));
    let pick = |keep: &dyn Fn(usize) -> bool| -> Vec<String> {
        order
            .iter()
            .filter(|key| keep(counts[*key]))
            .take(MAX_REPORTED_POINTS)
            .map(|key| display[key].clone())
            .collect()
    };

    (pick(&|count| count >= required), pick(&|count| count == 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::ProviderName;

    fn ok(provider: ProviderName, text: &str) -> ProviderResponse {
        ProviderResponse::success(provider, "model", text, None)
    }

    fn long_answer(seed: usize) -> String {
        (0..120)
            .map(|i| format!("Point {} covers aspect {} of the question in detail.", i * seed, i + seed))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_long_answers_are_analyzed_quickly() {
        let providers = [
            ProviderName::OpenAI,
            ProviderName::Claude,
            ProviderName::Gemini,
            ProviderName::Grok,
            ProviderName::Ollama,
        ];
        let responses: Vec<ProviderResponse> = providers
            .iter()
            .enumerate()
            .map(|(i, p)| ok(*p, &long_answer(i + 3)))
            .collect();
        assert!(responses[0].response_text().len() > 5_000);

        let started = std::time::Instant::now();
        let result = ConsensusAnalyzer::new().analyze(&responses);

        // ten pairs, each bounded by the length cap and diff deadline
        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
        assert_eq!(result.models_analyzed, 5);
        assert!((0.0..=1.0).contains(&result.agreement_level));
    }

    #[test]
    fn test_similarity_ignores_text_past_the_cap() {
        let shared = "a".repeat(SIMILARITY_MAX_CHARS);
        let a = format!("{shared} first tail");
        let b = format!("{shared} a completely different ending");
        assert_eq!(similarity(&a, &b), 1.0);
    }

    #[test]
    fn test_yes_no_is_a_conflict() {
        let result = ConsensusAnalyzer::new().analyze(&[
            ok(ProviderName::OpenAI, "Yes"),
            ok(ProviderName::Claude, "No"),
        ]);

        assert!(!result.has_consensus);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].kind, ConflictKind::Contradiction);
        assert_eq!(result.conflicts[0].model_a, "openai");
        assert_eq!(result.conflicts[0].model_b, "claude");
    }

    #[test]
    fn test_near_identical_answers_agree() {
        let result = ConsensusAnalyzer::new().analyze(&[
            ok(ProviderName::OpenAI, "X is risky"),
            ok(ProviderName::Gemini, "X is risky too"),
        ]);

        assert!(result.agreement_level > 0.7);
        assert!(result.conflicts.is_empty());
        assert!(result.has_consensus);
        assert_eq!(result.models_analyzed, 2);
    }

    #[test]
    fn test_fewer_than_two_valid_responses() {
        let analyzer = ConsensusAnalyzer::new();

        let none = analyzer.analyze(&[
            ProviderResponse::failure(ProviderName::OpenAI, "m", "API error: 500"),
            ok(ProviderName::Claude, "   "),
        ]);
        assert!(!none.has_consensus);
        assert_eq!(none.agreement_level, 0.0);
        assert_eq!(none.models_analyzed, 0);

        let one = analyzer.analyze(&[
            ok(ProviderName::OpenAI, "Only answer"),
            ProviderResponse::failure(ProviderName::Grok, "m", "Request timeout (30s)"),
        ]);
        assert!(!one.has_consensus);
        assert_eq!(one.agreement_level, 1.0);
        assert_eq!(one.models_analyzed, 1);
    }

    #[test]
    fn test_word_boundaries_prevent_substring_matches() {
        assert!(detect_conflict("I saw it yesterday", "There is no way").is_none());
        assert!(detect_conflict("Nothing is certain", "Yes indeed").is_none());
        assert!(detect_conflict("It is unsafe", "It is unsafe").is_none());
    }

    #[test]
    fn test_negated_phrase_masks_affirmative() {
        let (kind, _) = detect_conflict("This is not recommended", "This is recommended").unwrap();
        assert_eq!(kind, ConflictKind::Contradiction);

        assert!(detect_conflict("This is not recommended", "It is also not recommended").is_none());
    }

    #[test]
    fn test_numeric_discrepancy() {
        let (kind, detail) = detect_conflict("The answer is 42", "The answer is 17").unwrap();
        assert_eq!(kind, ConflictKind::NumericDiscrepancy);
        assert_eq!(detail, "42 vs 17");

        assert!(detect_conflict("The answer is 42", "Either 42 or 17").is_none());
        assert!(detect_conflict("The answer is 42", "Unknown").is_none());
    }

    #[test]
    fn test_antonym_takes_priority_over_numbers() {
        let (kind, _) = detect_conflict("Yes, about 10 units", "No, about 20 units").unwrap();
        assert_eq!(kind, ConflictKind::Contradiction);
    }

    #[test]
    fn test_unlisted_opposites_are_not_flagged() {
        assert!(detect_conflict("The market will rise", "The market will fall").is_none());
    }

    #[test]
    fn test_common_and_divergent_points() {
        let shared = "Diversification reduces portfolio risk over time";
        let result = ConsensusAnalyzer::new().analyze(&[
            ok(ProviderName::OpenAI, &format!("{shared}. Bonds are steadier than equities.")),
            ok(ProviderName::Claude, &format!("{}. Index funds keep costs very low.", shared.to_uppercase())),
            ok(ProviderName::Gemini, "Crypto assets carry extreme volatility."),
        ]);

        assert_eq!(result.common_points, vec![shared.to_string()]);
        assert_eq!(
            result.divergent_points,
            vec![
                "Bonds are steadier than equities".to_string(),
                "Index funds keep costs very low".to_string(),
                "Crypto assets carry extreme volatility".to_string(),
            ]
        );
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("Same Text", "same text  "), 1.0);
        assert!(similarity("abc", "xyz") < 0.01);
    }
}
