//! Rule-based extraction of memory anchors from conversation pairs
//!
//! The Extractor runs a fixed rule table over every complete pair of a
//! transcript. Extraction is deterministic (no LLM):
//!
//! 1. Each pattern rule is matched against the user turn and the assistant
//!    turn independently; every match becomes an anchor.
//! 2. Each cross-message heuristic looks at both turns together and produces
//!    at most one anchor per pair.
//! 3. Anchors are deduplicated on (type, lowercase first 50 chars), keeping
//!    the first occurrence in discovery order.
//! 4. The survivors are stably sorted by significance, highest first.

use super::anchor::{ConversationPair, ExtractedAnchor};
use super::rules::{default_rules, ExtractionRule};
use crate::error::{Error, Result};
use std::collections::HashSet;

/// Default width of the context snippet around a match
pub const DEFAULT_CONTEXT_WINDOW: usize = 100;

/// Rule-based extractor that produces anchors from conversation pairs.
#[derive(Debug, Clone)]
pub struct Extractor {
    rules: Vec<ExtractionRule>,
    context_window: usize,
}

impl Extractor {
    /// Create an extractor over an explicit rule table.
    pub fn new(rules: Vec<ExtractionRule>, context_window: usize) -> Result<Self> {
        if rules.is_empty() {
            return Err(Error::Rule("extractor requires at least one rule".to_string()));
        }
        Ok(Self {
            rules,
            context_window,
        })
    }

    /// Create an extractor over the built-in rule table.
    pub fn with_default_rules(context_window: usize) -> Result<Self> {
        Self::new(default_rules()?, context_window)
    }

    /// The rule table, in evaluation order
    pub fn rules(&self) -> &[ExtractionRule] {
        &self.rules
    }

    /// Extract anchors from an ordered sequence of pairs.
    ///
    /// Pairs with a missing side produce nothing. The result is deduplicated
    /// and sorted by significance descending; ties keep discovery order.
    pub fn extract(&self, pairs: &[ConversationPair]) -> Vec<ExtractedAnchor> {
        let mut discovered = Vec::new();

        for (pair_index, pair) in pairs.iter().enumerate() {
            if !pair.is_complete() {
                tracing::debug!(pair_index, "Skipping incomplete conversation pair");
                continue;
            }
            for rule in &self.rules {
                discovered.extend(rule.apply(pair, pair_index, self.context_window));
            }
        }

        let found = discovered.len();
        let mut anchors = dedup_first(discovered);
        anchors.sort_by(|a, b| {
            b.significance
                .partial_cmp(&a.significance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!(
            pairs = pairs.len(),
            matches = found,
            anchors = anchors.len(),
            "Anchor extraction complete"
        );
        anchors
    }
}

/// Keep the first anchor for each dedup key, preserving order.
fn dedup_first(anchors: Vec<ExtractedAnchor>) -> Vec<ExtractedAnchor> {
    let mut seen = HashSet::new();
    anchors
        .into_iter()
        .filter(|a| seen.insert(a.dedup_key()))
        .collect()
}
