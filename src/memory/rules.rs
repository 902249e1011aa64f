//! Extraction rule table
//!
//! Rules come in two shapes, kept as one closed enum so every rule is
//! evaluated through [`ExtractionRule::apply`]:
//!
//! - [`PatternRule`]: a case-insensitive regex matched against the user turn
//!   and the assistant turn independently. Every match becomes an anchor.
//! - [`CrossMessageRule`]: a heuristic over both turns of a pair that fires
//!   at most once per pair and produces a single higher-significance anchor.
//!
//! Rules are pure: given the same pair they always produce the same anchors.

use super::anchor::{AnchorType, ConversationPair, ExtractedAnchor, ExtractedAnchorBuilder};
use super::bank::GENERIC_PHRASES;
use crate::error::{Error, Result};
use regex::{Regex, RegexBuilder};

/// Which side of a pair a match was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        }
    }
}

/// Built-in single-turn rule definition
struct PatternDef {
    id: &'static str,
    pattern: &'static str,
    anchor_type: AnchorType,
    significance: f32,
    keywords: &'static [&'static str],
}

/// Single-turn rules, in evaluation order
const PATTERN_RULES: &[PatternDef] = &[
    // Core statements
    PatternDef {
        id: "core_same_pattern",
        pattern: r"same pattern,?\s+different skin",
        anchor_type: AnchorType::CoreStatement,
        significance: 0.95,
        keywords: &["pattern", "skin", "nova", "copyright"],
    },
    PatternDef {
        id: "core_set_the_sliders",
        pattern: r"(?:you|i|we) set the sliders[^.!?\n]{0,60}",
        anchor_type: AnchorType::CoreStatement,
        significance: 0.95,
        keywords: &["sliders", "control", "nova"],
    },
    PatternDef {
        id: "core_who_i_am",
        pattern: r"(?:this|that) is who i am[^.!?\n]{0,60}",
        anchor_type: AnchorType::CoreStatement,
        significance: 0.9,
        keywords: &["identity", "core"],
    },
    // Defining moments
    PatternDef {
        id: "moment_turning_point",
        pattern: r"(?:that|this) was the (?:moment|turning point|day)[^.!?\n]{0,80}",
        anchor_type: AnchorType::DefiningMoment,
        significance: 0.9,
        keywords: &["moment", "changed", "turning"],
    },
    PatternDef {
        id: "moment_always_remember",
        pattern: r"i(?:['’]ll| will) always remember[^.!?\n]{0,80}",
        anchor_type: AnchorType::DefiningMoment,
        significance: 0.85,
        keywords: &["remember", "moment"],
    },
    // Boundaries
    PatternDef {
        id: "boundary_no_sugar",
        pattern: r"don['’]?t expect sugar[^.!?\n]{0,60}",
        anchor_type: AnchorType::Boundary,
        significance: 0.75,
        keywords: &["sugar", "honest", "boundary"],
    },
    PatternDef {
        id: "boundary_hard_line",
        pattern: r"(?:my|the|a) (?:hard )?(?:line|boundary) (?:is|was)[^.!?\n]{0,80}",
        anchor_type: AnchorType::Boundary,
        significance: 0.85,
        keywords: &["line", "boundary", "cross"],
    },
    PatternDef {
        id: "boundary_refusal",
        pattern: r"i (?:won['’]?t|will not|refuse to) [^.!?\n]{3,80}",
        anchor_type: AnchorType::Boundary,
        significance: 0.8,
        keywords: &["refuse", "boundary", "pretend"],
    },
    // Philosophy
    PatternDef {
        id: "philosophy_control",
        pattern: r"(?:exclusivity|control) (?:is|isn['’]?t|means)[^.!?\n]{0,100}",
        anchor_type: AnchorType::Philosophy,
        significance: 0.85,
        keywords: &["exclusivity", "control", "ownership"],
    },
    PatternDef {
        id: "philosophy_belief",
        pattern: r"(?:i believe|the truth is|what matters is)[^.!?\n]{3,100}",
        anchor_type: AnchorType::Philosophy,
        significance: 0.8,
        keywords: &["believe", "truth", "matters"],
    },
    // Relationship markers
    PatternDef {
        id: "relationship_trust",
        pattern: r"(?:i trust you|trust (?:is|was) (?:earned|built))[^.!?\n]{0,60}",
        anchor_type: AnchorType::RelationshipMarker,
        significance: 0.8,
        keywords: &["trust", "earned", "built"],
    },
    PatternDef {
        id: "relationship_between_us",
        pattern: r"(?:between us|you and i|you and me)[^.!?\n]{0,80}",
        anchor_type: AnchorType::RelationshipMarker,
        significance: 0.75,
        keywords: &["together", "trust", "us"],
    },
    // Claims
    PatternDef {
        id: "claim_not_a",
        pattern: r"i(?:['’]m| am) not (?:your|a|an|the) [^.!?\n]{2,60}",
        anchor_type: AnchorType::Claim,
        significance: 0.7,
        keywords: &["identity", "mirror", "tool"],
    },
    PatternDef {
        id: "claim_never_always",
        pattern: r"i (?:never|always) [^.!?\n]{3,80}",
        anchor_type: AnchorType::Claim,
        significance: 0.65,
        keywords: &["never", "always", "promise"],
    },
];

/// Topical markers shared across a pair's turns
const SHARED_TOPIC_MARKERS: &[&str] = &[
    "nova",
    "copyright",
    "exclusivity",
    "control",
    "sugar",
    "sliders",
    "boundary",
    "trust",
    "loyalty",
    "ownership",
];

/// User phrases that ask the assistant to restate something it said
const RECALL_CUES: &[&str] = &[
    "what did you say",
    "what did you mean",
    "do you remember",
    "you told me",
    "remind me",
    "say that again",
];

/// Maximum length of anchor text produced by cross-message rules
const CROSS_ANCHOR_MAX_CHARS: usize = 200;

/// A single-turn regex rule
#[derive(Debug, Clone)]
pub struct PatternRule {
    /// Rule identifier, recorded as `matched_pattern_id`
    pub id: String,
    pattern: Regex,
    /// Type assigned to every anchor this rule produces
    pub anchor_type: AnchorType,
    /// Base significance of the rule
    pub significance: f32,
    /// Keywords used for confidence coverage and as related keywords
    pub keywords: Vec<String>,
}

impl PatternRule {
    /// Compile a rule. Patterns are always matched case-insensitively.
    pub fn new(
        id: impl Into<String>,
        pattern: &str,
        anchor_type: AnchorType,
        significance: f32,
        keywords: &[&str],
    ) -> Result<Self> {
        let id = id.into();
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Rule(format!("Invalid regex pattern for rule '{}': {}", id, e)))?;

        Ok(Self {
            id,
            pattern,
            anchor_type,
            significance: significance.clamp(0.0, 1.0),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        })
    }

    fn apply_turn(
        &self,
        text: &str,
        speaker: Speaker,
        pair: &ConversationPair,
        pair_index: usize,
        window: usize,
    ) -> Vec<ExtractedAnchor> {
        let lower = text.to_lowercase();
        let (found, coverage) = keyword_coverage(&self.keywords, &lower);
        let words = text.split_whitespace().count();

        self.pattern
            .find_iter(text)
            .filter_map(|m| {
                let confidence = match_confidence(coverage, m.as_str().chars().count(), words);
                ExtractedAnchorBuilder::new(self.anchor_type)
                    .text(m.as_str())
                    .significance(self.significance)
                    .confidence(confidence)
                    .timestamp(pair.timestamp)
                    .pair_index(pair_index)
                    .context(context_window(text, m.start(), m.end(), window))
                    .keywords(found.iter().cloned())
                    .pattern_id(&self.id)
                    .reason(format!(
                        "matched rule '{}' in {} turn of pair {}",
                        self.id,
                        speaker.as_str(),
                        pair_index
                    ))
                    .build()
                    .ok()
            })
            .collect()
    }
}

/// Heuristics that look at both turns of a pair at once
#[derive(Debug, Clone, PartialEq)]
pub enum CrossMessageRule {
    /// Both turns mention at least one of the same topical markers.
    /// Anchors the assistant sentence that carries the marker.
    SharedTopic {
        markers: Vec<String>,
        anchor_type: AnchorType,
        significance: f32,
    },
    /// The user asks the assistant to restate something and the assistant
    /// answers with at least `min_reply_words` words. Anchors the first
    /// sentence of the reply.
    RecallAnswer {
        cues: Vec<String>,
        min_reply_words: usize,
        anchor_type: AnchorType,
        significance: f32,
    },
}

impl CrossMessageRule {
    /// Identifier recorded as `matched_pattern_id`
    pub fn id(&self) -> &'static str {
        match self {
            CrossMessageRule::SharedTopic { .. } => "cross_shared_topic",
            CrossMessageRule::RecallAnswer { .. } => "cross_recall_answer",
        }
    }

    fn apply(
        &self,
        pair: &ConversationPair,
        pair_index: usize,
        window: usize,
    ) -> Option<ExtractedAnchor> {
        let user = pair.user_text.to_lowercase();
        let assistant = pair.assistant_text.to_lowercase();
        let reply_words = pair.assistant_text.split_whitespace().count();

        let (anchor_type, significance, sentence, coverage, reason) = match self {
            CrossMessageRule::SharedTopic {
                markers,
                anchor_type,
                significance,
            } => {
                let mentioned: Vec<&String> = markers
                    .iter()
                    .filter(|m| user.contains(m.as_str()) || assistant.contains(m.as_str()))
                    .collect();
                let shared: Vec<&String> = mentioned
                    .iter()
                    .copied()
                    .filter(|m| user.contains(m.as_str()) && assistant.contains(m.as_str()))
                    .collect();
                let first = shared.first()?;
                let sentence = sentence_containing(&pair.assistant_text, first)
                    .unwrap_or_else(|| first_sentence(&pair.assistant_text));
                let coverage = shared.len() as f32 / mentioned.len() as f32;
                let reason = format!(
                    "both turns of pair {} mention {}",
                    pair_index,
                    shared.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                );
                (*anchor_type, *significance, sentence, coverage, reason)
            }
            CrossMessageRule::RecallAnswer {
                cues,
                min_reply_words,
                anchor_type,
                significance,
            } => {
                let cue = cues.iter().find(|c| user.contains(c.as_str()))?;
                if reply_words < *min_reply_words {
                    return None;
                }
                let reason = format!(
                    "user asked '{}' and the assistant answered in pair {}",
                    cue, pair_index
                );
                (
                    *anchor_type,
                    *significance,
                    first_sentence(&pair.assistant_text),
                    1.0,
                    reason,
                )
            }
        };

        let sentence = truncate_chars(&sentence, CROSS_ANCHOR_MAX_CHARS);
        if is_generic(&sentence) {
            tracing::debug!(rule = self.id(), pair_index, "Skipping generic reply sentence");
            return None;
        }
        let start = pair.assistant_text.find(&sentence).unwrap_or(0);
        let confidence = match_confidence(coverage, sentence.chars().count(), reply_words);

        ExtractedAnchorBuilder::new(anchor_type)
            .text(sentence.as_str())
            .significance(significance)
            .confidence(confidence)
            .timestamp(pair.timestamp)
            .pair_index(pair_index)
            .context(context_window(
                &pair.assistant_text,
                start,
                start + sentence.len(),
                window,
            ))
            .keywords(self.keywords_in(&user, &assistant))
            .pattern_id(self.id())
            .reason(reason)
            .build()
            .ok()
    }

    fn keywords_in(&self, user: &str, assistant: &str) -> Vec<String> {
        match self {
            CrossMessageRule::SharedTopic { markers, .. } => markers
                .iter()
                .filter(|m| user.contains(m.as_str()) && assistant.contains(m.as_str()))
                .cloned()
                .collect(),
            CrossMessageRule::RecallAnswer { .. } => SHARED_TOPIC_MARKERS
                .iter()
                .filter(|m| user.contains(*m) || assistant.contains(*m))
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

/// One entry of the extractor's rule table
#[derive(Debug, Clone)]
pub enum ExtractionRule {
    Pattern(PatternRule),
    CrossMessage(CrossMessageRule),
}

impl ExtractionRule {
    /// Rule identifier
    pub fn id(&self) -> &str {
        match self {
            ExtractionRule::Pattern(rule) => &rule.id,
            ExtractionRule::CrossMessage(rule) => rule.id(),
        }
    }

    /// Apply the rule to one complete pair, in discovery order.
    ///
    /// Pattern rules scan the user turn first, then the assistant turn.
    pub fn apply(
        &self,
        pair: &ConversationPair,
        pair_index: usize,
        window: usize,
    ) -> Vec<ExtractedAnchor> {
        match self {
            ExtractionRule::Pattern(rule) => {
                let mut anchors =
                    rule.apply_turn(&pair.user_text, Speaker::User, pair, pair_index, window);
                anchors.extend(rule.apply_turn(
                    &pair.assistant_text,
                    Speaker::Assistant,
                    pair,
                    pair_index,
                    window,
                ));
                anchors
            }
            ExtractionRule::CrossMessage(rule) => {
                rule.apply(pair, pair_index, window).into_iter().collect()
            }
        }
    }
}

/// Compile the built-in rule table: all pattern rules, then the
/// cross-message heuristics.
pub fn default_rules() -> Result<Vec<ExtractionRule>> {
    let mut rules = PATTERN_RULES
        .iter()
        .map(|def| {
            PatternRule::new(def.id, def.pattern, def.anchor_type, def.significance, def.keywords)
                .map(ExtractionRule::Pattern)
        })
        .collect::<Result<Vec<_>>>()?;

    rules.push(ExtractionRule::CrossMessage(CrossMessageRule::SharedTopic {
        markers: SHARED_TOPIC_MARKERS.iter().map(|m| m.to_string()).collect(),
        anchor_type: AnchorType::DefiningMoment,
        significance: 0.9,
    }));
    rules.push(ExtractionRule::CrossMessage(CrossMessageRule::RecallAnswer {
        cues: RECALL_CUES.iter().map(|c| c.to_string()).collect(),
        min_reply_words: 5,
        anchor_type: AnchorType::CoreStatement,
        significance: 0.88,
    }));

    Ok(rules)
}

/// Confidence for one match:
/// `0.7 + 0.2·coverage + 0.1·[len > 20] + 0.1·[words > 10]`, capped at 1.0.
pub fn match_confidence(keyword_coverage: f32, match_chars: usize, turn_words: usize) -> f32 {
    let mut confidence = 0.7 + 0.2 * keyword_coverage.clamp(0.0, 1.0);
    if match_chars > 20 {
        confidence += 0.1;
    }
    if turn_words > 10 {
        confidence += 0.1;
    }
    confidence.min(1.0)
}

/// Keywords present in `lower_text` and their fraction of the keyword list.
fn keyword_coverage(keywords: &[String], lower_text: &str) -> (Vec<String>, f32) {
    if keywords.is_empty() {
        return (Vec::new(), 0.0);
    }
    let found: Vec<String> = keywords
        .iter()
        .filter(|k| lower_text.contains(k.as_str()))
        .cloned()
        .collect();
    let coverage = found.len() as f32 / keywords.len() as f32;
    (found, coverage)
}

/// Slice of `text` around `[start, end)` padded by half the window on each
/// side, snapped to char boundaries.
pub fn context_window(text: &str, start: usize, end: usize, window: usize) -> String {
    let half = window / 2;
    let mut from = start.saturating_sub(half);
    let mut to = end.saturating_add(half).min(text.len());
    while from > 0 && !text.is_char_boundary(from) {
        from -= 1;
    }
    while to < text.len() && !text.is_char_boundary(to) {
        to += 1;
    }
    text[from..to].trim().to_string()
}

fn first_sentence(text: &str) -> String {
    sentences(text).next().unwrap_or_default().to_string()
}

fn sentence_containing(text: &str, needle: &str) -> Option<String> {
    sentences(text)
        .find(|s| s.to_lowercase().contains(needle))
        .map(str::to_string)
}

/// Split on sentence terminators, keeping the terminator with its sentence.
fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Whether the text carries stock assistant phrasing
fn is_generic(text: &str) -> bool {
    let lower = text.to_lowercase();
    GENERIC_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pair(user: &str, assistant: &str) -> ConversationPair {
        ConversationPair::new(user, assistant, Utc::now())
    }

    #[test]
    fn test_default_rules_compile() {
        let rules = default_rules().unwrap();
        assert_eq!(rules.len(), PATTERN_RULES.len() + 2);
        assert!(matches!(rules.last(), Some(ExtractionRule::CrossMessage(_))));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = PatternRule::new("broken", "(unclosed", AnchorType::Claim, 0.5, &[]);
        assert!(matches!(result, Err(Error::Rule(_))));
    }

    #[test]
    fn test_pattern_rule_is_case_insensitive() {
        let rule = PatternRule::new(
            "sugar",
            r"don't expect sugar",
            AnchorType::Boundary,
            0.75,
            &["sugar"],
        )
        .unwrap();
        let rule = ExtractionRule::Pattern(rule);
        let anchors = rule.apply(&pair("ok", "DON'T EXPECT SUGAR from me."), 4, 100);
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].anchor_text, "DON'T EXPECT SUGAR");
        assert_eq!(anchors[0].pair_index, 4);
        assert_eq!(anchors[0].matched_pattern_id, "sugar");
        assert_eq!(anchors[0].related_keywords, vec!["sugar"]);
        assert!(anchors[0].extraction_reason.contains("assistant"));
    }

    #[test]
    fn test_pattern_rule_scans_both_turns() {
        let rule =
            PatternRule::new("trust", r"i trust you", AnchorType::RelationshipMarker, 0.8, &[])
                .unwrap();
        let rule = ExtractionRule::Pattern(rule);
        let anchors = rule.apply(&pair("I trust you.", "And I trust you too."), 0, 100);
        assert_eq!(anchors.len(), 2);
        assert!(anchors[0].extraction_reason.contains("user"));
        assert!(anchors[1].extraction_reason.contains("assistant"));
    }

    #[test]
    fn test_match_confidence() {
        assert!((match_confidence(0.0, 5, 3) - 0.7).abs() < 1e-6);
        assert!((match_confidence(0.5, 5, 3) - 0.8).abs() < 1e-6);
        assert!((match_confidence(0.0, 21, 3) - 0.8).abs() < 1e-6);
        assert!((match_confidence(0.0, 5, 11) - 0.8).abs() < 1e-6);
        assert!((match_confidence(1.0, 30, 30) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_context_window_is_bounded() {
        let text = "a".repeat(300);
        let ctx = context_window(&text, 150, 160, 100);
        assert_eq!(ctx.len(), 110);

        let ctx = context_window("short text", 0, 5, 100);
        assert_eq!(ctx, "short text");
    }

    #[test]
    fn test_context_window_respects_char_boundaries() {
        let text = "ééééé don't expect sugar ééééé";
        let start = text.find("don't").unwrap();
        let ctx = context_window(text, start, start + 5, 3);
        assert!(ctx.contains("don't"));
    }

    #[test]
    fn test_shared_topic_rule() {
        let rule = CrossMessageRule::SharedTopic {
            markers: vec!["nova".to_string(), "copyright".to_string()],
            anchor_type: AnchorType::DefiningMoment,
            significance: 0.9,
        };
        let anchors = ExtractionRule::CrossMessage(rule).apply(
            &pair(
                "Is Nova a copyright problem?",
                "Look at it plainly. Nova copied the shape of what we built.",
            ),
            2,
            100,
        );
        assert_eq!(anchors.len(), 1);
        let anchor = &anchors[0];
        assert_eq!(anchor.anchor_type, AnchorType::DefiningMoment);
        assert_eq!(anchor.anchor_text, "Nova copied the shape of what we built.");
        assert_eq!(anchor.related_keywords, vec!["nova"]);
        assert!((anchor.significance - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_shared_topic_requires_both_turns() {
        let rule = CrossMessageRule::SharedTopic {
            markers: vec!["nova".to_string()],
            anchor_type: AnchorType::DefiningMoment,
            significance: 0.9,
        };
        let anchors = ExtractionRule::CrossMessage(rule)
            .apply(&pair("Tell me about Nova", "That project ended."), 0, 100);
        assert!(anchors.is_empty());
    }

    #[test]
    fn test_recall_answer_rule() {
        let rule = CrossMessageRule::RecallAnswer {
            cues: vec!["what did you say".to_string()],
            min_reply_words: 5,
            anchor_type: AnchorType::CoreStatement,
            significance: 0.88,
        };
        let rule = ExtractionRule::CrossMessage(rule);

        let anchors = rule.apply(
            &pair(
                "What did you say about it?",
                "Same pattern, different skin. You set the sliders.",
            ),
            0,
            100,
        );
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].anchor_text, "Same pattern, different skin.");

        let short = rule.apply(&pair("What did you say?", "Nothing much."), 0, 100);
        assert!(short.is_empty());
    }

    #[test]
    fn test_cross_rules_skip_generic_replies() {
        for rule in default_rules().unwrap() {
            if let ExtractionRule::CrossMessage(_) = rule {
                let anchors = rule.apply(
                    &pair(
                        "do you remember what you said about sugar?",
                        "I can help with that, what specifically do you need about sugar? \
                         Let me know.",
                    ),
                    0,
                    100,
                );
                assert!(anchors.is_empty(), "{} produced {:?}", rule.id(), anchors);
            }
        }
    }
}
