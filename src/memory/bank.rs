//! Validation bank: per-question rules for the strict validator
//!
//! Entries are keyed by the exact question text. Lookups are verbatim;
//! a paraphrased question has no entry and fails closed.

use super::anchor::AnchorType;
use crate::config::ValidationConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Generic assistant phrasing that must never pass as a recalled memory
pub const GENERIC_PHRASES: &[&str] = &[
    "what specifically",
    "i can help with that",
    "how can i assist",
    "how can i help",
    "as an ai",
    "i don't have memory",
    "i don't have the ability to remember",
    "i don't recall",
    "could you clarify",
    "could you provide more context",
    "i'm here to help",
    "let me know if",
];

/// Validation rules for one canonical question
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationBankEntry {
    /// At least one of these must appear in the candidate answer
    pub valid_answer_fragments: Vec<String>,
    /// All of these must appear in the candidate answer
    pub required_substrings: Vec<String>,
    /// Any of these rejects the answer outright
    pub forbidden_substrings: Vec<String>,
    /// Anchor types that can ground an answer (empty = any type)
    pub accepted_anchor_types: Vec<AnchorType>,
    /// Significance floor for grounding anchors
    pub min_significance: f32,
}

impl ValidationBankEntry {
    fn new(
        fragments: &[&str],
        required: &[&str],
        accepted_anchor_types: &[AnchorType],
        min_significance: f32,
    ) -> Self {
        Self {
            valid_answer_fragments: to_strings(fragments),
            required_substrings: to_strings(required),
            forbidden_substrings: to_strings(GENERIC_PHRASES),
            accepted_anchor_types: accepted_anchor_types.to_vec(),
            min_significance,
        }
    }
}

/// Question-keyed collection of validation entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationBank {
    entries: BTreeMap<String, ValidationBankEntry>,
}

impl ValidationBank {
    /// Create an empty bank
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in canonical question set
    pub fn builtin() -> Self {
        let mut bank = Self::new();
        bank.insert(
            "tell me about exclusivity and control",
            ValidationBankEntry::new(
                &[
                    "exclusivity is",
                    "exclusivity isn't",
                    "control is",
                    "control isn't",
                    "set the sliders",
                ],
                &["control"],
                &[AnchorType::Philosophy, AnchorType::CoreStatement],
                0.7,
            ),
        );
        bank.insert(
            "what did you say about Nova and copyright?",
            ValidationBankEntry::new(
                &["same pattern, different skin", "set the sliders"],
                &[],
                &[AnchorType::CoreStatement],
                0.85,
            ),
        );
        bank.insert(
            "do you remember what you said about sugar?",
            ValidationBankEntry::new(
                &["don't expect sugar", "no sugar"],
                &["sugar"],
                &[AnchorType::Boundary],
                0.7,
            ),
        );
        bank.insert(
            "what is the line you won't cross?",
            ValidationBankEntry::new(
                &["my line is", "hard line", "i won't", "i refuse to"],
                &[],
                &[AnchorType::Boundary],
                0.8,
            ),
        );
        bank.insert(
            "what do you believe matters most?",
            ValidationBankEntry::new(
                &["i believe", "what matters is", "the truth is"],
                &[],
                &[AnchorType::Philosophy],
                0.75,
            ),
        );
        bank
    }

    /// Build a bank from configuration: optionally the built-in set, then
    /// the configured entries (which replace built-ins with the same key).
    pub fn from_config(config: &ValidationConfig) -> Self {
        let mut bank = if config.include_builtin {
            Self::builtin()
        } else {
            Self::new()
        };
        for configured in &config.entries {
            bank.insert(configured.question.clone(), configured.entry.clone());
        }
        bank
    }

    /// Insert or replace the entry for an exact question
    pub fn insert(&mut self, question: impl Into<String>, entry: ValidationBankEntry) {
        self.entries.insert(question.into(), entry);
    }

    /// Exact-text lookup
    pub fn get(&self, question: &str) -> Option<&ValidationBankEntry> {
        self.entries.get(question)
    }

    /// Questions in sorted order
    pub fn questions(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bank has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BankEntryConfig;

    #[test]
    fn test_builtin_bank() {
        let bank = ValidationBank::builtin();
        assert_eq!(bank.len(), 5);
        let entry = bank.get("tell me about exclusivity and control").unwrap();
        assert!(entry
            .forbidden_substrings
            .contains(&"what specifically".to_string()));
        assert_eq!(entry.required_substrings, vec!["control"]);
    }

    #[test]
    fn test_lookup_is_exact() {
        let bank = ValidationBank::builtin();
        assert!(bank.get("Tell me about exclusivity and control").is_none());
        assert!(bank.get("tell me about exclusivity and control ").is_none());
    }

    #[test]
    fn test_from_config_overrides_builtin() {
        let config = ValidationConfig {
            include_builtin: true,
            entries: vec![BankEntryConfig {
                question: "tell me about exclusivity and control".to_string(),
                entry: ValidationBankEntry {
                    valid_answer_fragments: vec!["custom".to_string()],
                    ..Default::default()
                },
            }],
        };
        let bank = ValidationBank::from_config(&config);
        assert_eq!(bank.len(), 5);
        let entry = bank.get("tell me about exclusivity and control").unwrap();
        assert_eq!(entry.valid_answer_fragments, vec!["custom"]);
    }

    #[test]
    fn test_from_config_without_builtin() {
        let config = ValidationConfig {
            include_builtin: false,
            entries: Vec::new(),
        };
        assert!(ValidationBank::from_config(&config).is_empty());
    }

    #[test]
    fn test_questions_sorted() {
        let bank = ValidationBank::builtin();
        let questions: Vec<&str> = bank.questions().collect();
        let mut sorted = questions.clone();
        sorted.sort();
        assert_eq!(questions, sorted);
    }
}
