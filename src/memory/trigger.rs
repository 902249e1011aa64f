//! Recall-intent detection
//!
//! Decides whether a user message asks for memory at all. Phrase patterns
//! are matched case-insensitively as substrings; topical keywords are
//! matched against the message's normalized tokens. A message with no
//! trigger never reaches the index.

use super::anchor::tokenize;
use serde::{Deserialize, Serialize};

/// Kind of memory request a trigger signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// The user explicitly asks what was said before
    DirectRecall,
    /// The message mentions a tracked topic
    Topical,
    /// The user asks about beliefs or worldview
    Philosophical,
}

impl TriggerKind {
    /// Snake-case name used in rationales
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::DirectRecall => "direct_recall",
            TriggerKind::Topical => "topical",
            TriggerKind::Philosophical => "philosophical",
        }
    }
}

/// Phrases that ask for something said earlier
const RECALL_PATTERNS: &[&str] = &[
    "do you remember",
    "remember when",
    "remember what",
    "what did you say",
    "what did you tell me",
    "you said",
    "you told me",
    "last time",
    "earlier you",
    "we talked about",
    "what did we",
    "remind me",
];

/// Phrases that ask about beliefs
const PHILOSOPHICAL_PATTERNS: &[&str] = &[
    "what do you believe",
    "what's your philosophy",
    "what is your philosophy",
    "what matters",
    "why do you",
    "meaning of",
    "what's the point",
];

/// Topics worth a keyword-scoped lookup, in singular form. Plural message
/// tokens map back to these.
const TOPICAL_KEYWORDS: &[&str] = &[
    "nova",
    "copyright",
    "exclusivity",
    "control",
    "sugar",
    "slider",
    "boundary",
    "trust",
    "loyalty",
];

/// A matched trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Kind of request
    pub kind: TriggerKind,
    /// The phrase or keyword that matched
    pub pattern: String,
    /// Byte offset of the match in the lowercased message
    pub position: usize,
}

/// Result of scanning a message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDetection {
    /// Matches in table order
    pub triggers: Vec<Trigger>,
}

impl TriggerDetection {
    /// Whether anything matched
    pub fn is_triggered(&self) -> bool {
        !self.triggers.is_empty()
    }

    /// Distinct kinds, in `TriggerKind` order
    pub fn kinds(&self) -> Vec<TriggerKind> {
        let mut kinds: Vec<TriggerKind> = self.triggers.iter().map(|t| t.kind).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// Topical keywords that matched
    pub fn topical_keywords(&self) -> Vec<String> {
        self.triggers
            .iter()
            .filter(|t| t.kind == TriggerKind::Topical)
            .map(|t| t.pattern.clone())
            .collect()
    }
}

/// Scans user messages for recall intent
#[derive(Debug, Clone, Default)]
pub struct TriggerDetector;

impl TriggerDetector {
    /// Create a detector over the built-in tables
    pub fn new() -> Self {
        Self
    }

    /// Scan a message
    pub fn detect(&self, message: &str) -> TriggerDetection {
        let lower = message.to_lowercase();
        let mut triggers = Vec::new();

        for (patterns, kind) in [
            (RECALL_PATTERNS, TriggerKind::DirectRecall),
            (PHILOSOPHICAL_PATTERNS, TriggerKind::Philosophical),
        ] {
            for pattern in patterns {
                if let Some(position) = lower.find(pattern) {
                    triggers.push(Trigger {
                        kind,
                        pattern: pattern.to_string(),
                        position,
                    });
                }
            }
        }

        let tokens = tokenize(&lower);
        for keyword in TOPICAL_KEYWORDS {
            if let Some(token) = tokens.iter().find(|t| singular_matches(t, keyword)) {
                triggers.push(Trigger {
                    kind: TriggerKind::Topical,
                    pattern: keyword.to_string(),
                    position: lower.find(token.as_str()).unwrap_or(0),
                });
            }
        }

        if !triggers.is_empty() {
            tracing::debug!(count = triggers.len(), "Memory triggers detected");
        }

        TriggerDetection { triggers }
    }
}

/// Whether `token` is `singular` or one of its regular plurals
fn singular_matches(token: &str, singular: &str) -> bool {
    if token == singular {
        return true;
    }
    if let Some(stem) = token.strip_suffix("ies") {
        if singular.strip_suffix('y') == Some(stem) {
            return true;
        }
    }
    token.strip_suffix('s') == Some(singular)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_trigger() {
        let detection = TriggerDetector::new().detect("What's the weather today?");
        assert!(!detection.is_triggered());
        assert!(detection.kinds().is_empty());
    }

    #[test]
    fn test_direct_recall_case_insensitive() {
        let detection = TriggerDetector::new().detect("Do You Remember the first night?");
        assert_eq!(detection.kinds(), vec![TriggerKind::DirectRecall]);
        assert_eq!(detection.triggers[0].pattern, "do you remember");
        assert_eq!(detection.triggers[0].position, 0);
    }

    #[test]
    fn test_topical_keywords_are_whole_words() {
        let detector = TriggerDetector::new();
        let detection = detector.detect("Tell me about Nova and copyright");
        assert_eq!(detection.kinds(), vec![TriggerKind::Topical]);
        assert_eq!(detection.topical_keywords(), vec!["nova", "copyright"]);

        assert!(!detector.detect("The supernova was bright").is_triggered());
    }

    #[test]
    fn test_topical_plurals_map_to_singular() {
        let detector = TriggerDetector::new();
        let detection = detector.detect("What are your boundaries around the sliders?");
        assert_eq!(detection.topical_keywords(), vec!["slider", "boundary"]);
        assert_eq!(detection.triggers[1].position, "what are your ".len());

        assert!(!detector.detect("The boundless sky").is_triggered());
    }

    #[test]
    fn test_philosophical() {
        let detection = TriggerDetector::new().detect("What do you believe about people?");
        assert_eq!(detection.kinds(), vec![TriggerKind::Philosophical]);
    }

    #[test]
    fn test_multiple_kinds() {
        let detection =
            TriggerDetector::new().detect("What did you say about sugar, and what matters to you?");
        assert_eq!(
            detection.kinds(),
            vec![
                TriggerKind::DirectRecall,
                TriggerKind::Topical,
                TriggerKind::Philosophical
            ]
        );
    }
}
