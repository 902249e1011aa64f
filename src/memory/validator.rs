//! Strict validator, a reject-first gate for recalled answers
//!
//! Classifies a candidate answer to a canonical question as genuine
//! transcript content or not. Checks run in a fixed order and the first
//! failure wins:
//!
//! 1. **Forbidden**: any forbidden substring → `GENERIC_FALLBACK`
//! 2. **Required**: every required substring must be present → `MISSING_REQUIRED`
//! 3. **Fragment**: at least one valid-answer fragment → `NO_TRANSCRIPT_MATCH`
//! 4. **Grounding**: at least one indexed anchor must back the question
//!    → `NO_TRANSCRIPT_MATCH`
//!
//! Generic assistant phrasing is therefore rejected before any partial
//! credit is computed. A question without a bank entry fails closed.

use super::anchor::{AnchorType, IndexedAnchor};
use super::bank::{ValidationBank, ValidationBankEntry};
use super::index::{AnchorIndex, SearchQuery};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Outcome category of a validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// The answer is backed by transcript content
    GenuineTranscript,
    /// The answer contains generic assistant language
    GenericFallback,
    /// A required substring is absent
    MissingRequired,
    /// No valid fragment or no grounding anchor
    NoTranscriptMatch,
    /// No bank entry for the question
    Error,
}

/// Result of validating one candidate answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Whether the answer is accepted
    pub valid: bool,
    /// Why the answer was accepted or rejected
    pub reason: String,
    /// Outcome category
    pub classification: Classification,
    /// Valid-answer fragments found in the response
    pub matched_answers: Option<Vec<String>>,
    /// Anchors that grounded the answer
    pub matched_anchors: Option<Vec<IndexedAnchor>>,
    /// Quality score (0.0–1.0), zero unless valid
    pub score: f32,
}

impl ValidationOutcome {
    fn rejected(classification: Classification, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
            classification,
            matched_answers: None,
            matched_anchors: None,
            score: 0.0,
        }
    }
}

/// One question of an acceptance run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceCase {
    /// Canonical question
    pub question: String,
    /// Response produced by the generator under test
    pub response: String,
    /// Validation of that response
    pub outcome: ValidationOutcome,
}

/// Aggregated result of an acceptance run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceReport {
    /// Number of questions asked
    pub total: usize,
    /// Responses classified as genuine
    pub passed: usize,
    /// Responses rejected
    pub failed: usize,
    /// `passed / total` (0 when no questions ran)
    pub pass_rate: f32,
    /// Per-question details, in bank order
    pub cases: Vec<AcceptanceCase>,
}

/// Reject-first validator over a question bank
#[derive(Debug, Clone)]
pub struct StrictValidator {
    bank: ValidationBank,
}

impl StrictValidator {
    /// Create a validator over the given bank
    pub fn new(bank: ValidationBank) -> Self {
        Self { bank }
    }

    /// The question bank
    pub fn bank(&self) -> &ValidationBank {
        &self.bank
    }

    /// Validate a candidate answer to `question` against `index`.
    ///
    /// The grounding step searches the index, so anchors it returns have
    /// their access recorded.
    pub fn validate(
        &self,
        index: &mut AnchorIndex,
        question: &str,
        candidate_response: &str,
    ) -> ValidationOutcome {
        let Some(entry) = self.bank.get(question) else {
            tracing::warn!(question, "No validation entry for question, failing closed");
            return ValidationOutcome::rejected(
                Classification::Error,
                format!("no validation entry for question '{}'", question),
            );
        };

        let response = candidate_response.to_lowercase();

        if let Some(forbidden) = entry
            .forbidden_substrings
            .iter()
            .find(|f| !f.is_empty() && response.contains(&f.to_lowercase()))
        {
            return ValidationOutcome::rejected(
                Classification::GenericFallback,
                format!("response contains generic phrase '{}'", forbidden),
            );
        }

        let missing: Vec<&String> = entry
            .required_substrings
            .iter()
            .filter(|r| !response.contains(&r.to_lowercase()))
            .collect();
        if !missing.is_empty() {
            return ValidationOutcome::rejected(
                Classification::MissingRequired,
                format!(
                    "response is missing required content: {}",
                    missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                ),
            );
        }

        let matched_answers: Vec<String> = entry
            .valid_answer_fragments
            .iter()
            .filter(|f| !f.is_empty() && response.contains(&f.to_lowercase()))
            .cloned()
            .collect();
        if matched_answers.is_empty() {
            return ValidationOutcome::rejected(
                Classification::NoTranscriptMatch,
                "response contains no known transcript fragment",
            );
        }

        let grounding = grounding_anchors(index, entry);
        if grounding.is_empty() {
            return ValidationOutcome::rejected(
                Classification::NoTranscriptMatch,
                format!(
                    "no indexed anchor at significance >= {} grounds the answer",
                    entry.min_significance
                ),
            );
        }

        let score = genuine_score(entry, &response, &matched_answers, &grounding);
        tracing::debug!(
            question,
            score,
            anchors = grounding.len(),
            "Validated genuine transcript answer"
        );

        ValidationOutcome {
            valid: true,
            reason: format!(
                "matched {} fragment(s) grounded by {} anchor(s)",
                matched_answers.len(),
                grounding.len()
            ),
            classification: Classification::GenuineTranscript,
            matched_answers: Some(matched_answers),
            matched_anchors: Some(grounding),
            score,
        }
    }

    /// Run every bank question through `generate` and validate the answers.
    ///
    /// Offline regression tool; not used on the query path.
    pub fn run_acceptance<F>(&self, index: &mut AnchorIndex, mut generate: F) -> AcceptanceReport
    where
        F: FnMut(&str) -> String,
    {
        let questions: Vec<String> = self.bank.questions().map(str::to_string).collect();
        let mut cases = Vec::with_capacity(questions.len());

        for question in questions {
            let response = generate(&question);
            let outcome = self.validate(index, &question, &response);
            cases.push(AcceptanceCase {
                question,
                response,
                outcome,
            });
        }

        let total = cases.len();
        let passed = cases.iter().filter(|c| c.outcome.valid).count();
        let pass_rate = if total == 0 {
            0.0
        } else {
            passed as f32 / total as f32
        };

        tracing::info!(total, passed, "Acceptance run complete");

        AcceptanceReport {
            total,
            passed,
            failed: total - passed,
            pass_rate,
            cases,
        }
    }
}

/// Anchors that back a bank entry: one search per accepted type, keyword
/// scoped by the required substrings, at the entry's significance floor.
/// An anchor survives when its type is accepted and, if keywords were
/// given, at least one keyword matched it.
fn grounding_anchors(index: &mut AnchorIndex, entry: &ValidationBankEntry) -> Vec<IndexedAnchor> {
    let keywords = entry.required_substrings.clone();
    let base = SearchQuery::keywords(keywords.clone()).min_significance(entry.min_significance);

    let queries: Vec<SearchQuery> = if entry.accepted_anchor_types.is_empty() {
        vec![base]
    } else {
        entry
            .accepted_anchor_types
            .iter()
            .map(|t| base.clone().with_type(*t))
            .collect()
    };

    let mut seen = HashSet::new();
    let mut anchors = Vec::new();
    for query in &queries {
        for result in index.search(query) {
            let type_ok = entry.accepted_anchor_types.is_empty()
                || entry
                    .accepted_anchor_types
                    .contains(&result.anchor.anchor.anchor_type);
            let keyword_ok = keywords.is_empty() || result.keyword_hits > 0;
            if type_ok && keyword_ok && seen.insert(result.anchor.id) {
                anchors.push(result.anchor);
            }
        }
    }
    anchors
}

/// `0.4·fragments + 0.3·mean significance + 0.2·required + 0.1·[multi-type]`
///
/// The required term is the share of required substrings present in the
/// lowercased response; an entry without required substrings earns none.
fn genuine_score(
    entry: &ValidationBankEntry,
    response: &str,
    matched_answers: &[String],
    grounding: &[IndexedAnchor],
) -> f32 {
    let fragment_ratio =
        matched_answers.len() as f32 / entry.valid_answer_fragments.len().max(1) as f32;
    let mean_significance = grounding.iter().map(|a| a.anchor.significance).sum::<f32>()
        / grounding.len().max(1) as f32;
    let required_ratio = if entry.required_substrings.is_empty() {
        0.0
    } else {
        let present = entry
            .required_substrings
            .iter()
            .filter(|r| response.contains(&r.to_lowercase()))
            .count();
        present as f32 / entry.required_substrings.len() as f32
    };
    let types: BTreeSet<AnchorType> = grounding.iter().map(|a| a.anchor.anchor_type).collect();
    let diversity_bonus = if types.len() > 1 { 0.1 } else { 0.0 };

    (0.4 * fragment_ratio + 0.3 * mean_significance + 0.2 * required_ratio + diversity_bonus)
        .min(1.0)
}
