//! Anchor data types
//!
//! A memory anchor is a short excerpt of a conversation turn that matched an
//! extraction rule. `ExtractedAnchor` is the immutable extraction record;
//! `IndexedAnchor` wraps it with a stable identifier, normalized search
//! tokens and access bookkeeping owned by the [`AnchorIndex`].
//!
//! [`AnchorIndex`]: super::index::AnchorIndex

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Number of leading anchor-text characters that participate in identity.
pub const IDENTITY_PREFIX_CHARS: usize = 50;

/// One user/assistant exchange from a transcript, in transcript order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPair {
    /// What the user said (empty when the side is missing)
    pub user_text: String,
    /// What the assistant replied (empty when the side is missing)
    pub assistant_text: String,
    /// When the exchange happened
    pub timestamp: DateTime<Utc>,
}

impl ConversationPair {
    /// Create a pair from both turns
    pub fn new(
        user_text: impl Into<String>,
        assistant_text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_text: user_text.into(),
            assistant_text: assistant_text.into(),
            timestamp,
        }
    }

    /// A pair is complete when both sides carry text.
    pub fn is_complete(&self) -> bool {
        !self.user_text.trim().is_empty() && !self.assistant_text.trim().is_empty()
    }
}

/// Semantic category of an anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnchorType {
    /// A statement the assistant asserted about itself or the world
    Claim,
    /// A limit the speaker set
    Boundary,
    /// A belief or worldview statement
    Philosophy,
    /// A statement about the relationship between the speakers
    RelationshipMarker,
    /// A moment one of the speakers marked as pivotal
    DefiningMoment,
    /// A signature line that captures the assistant's core stance
    CoreStatement,
}

impl AnchorType {
    /// All anchor types, in declaration order
    pub const ALL: [AnchorType; 6] = [
        AnchorType::Claim,
        AnchorType::Boundary,
        AnchorType::Philosophy,
        AnchorType::RelationshipMarker,
        AnchorType::DefiningMoment,
        AnchorType::CoreStatement,
    ];

    /// Kebab-case name, identical to the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorType::Claim => "claim",
            AnchorType::Boundary => "boundary",
            AnchorType::Philosophy => "philosophy",
            AnchorType::RelationshipMarker => "relationship-marker",
            AnchorType::DefiningMoment => "defining-moment",
            AnchorType::CoreStatement => "core-statement",
        }
    }

    /// Parse a kebab-case or snake_case name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|t| t.as_str() == normalized)
    }
}

impl std::fmt::Display for AnchorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single rule match extracted from a conversation pair. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedAnchor {
    /// The excerpt itself
    pub anchor_text: String,
    /// Semantic category
    #[serde(rename = "type")]
    pub anchor_type: AnchorType,
    /// Static importance of the rule that produced it (0.0–1.0)
    pub significance: f32,
    /// Timestamp of the source pair
    pub timestamp: DateTime<Utc>,
    /// Position of the source pair in the transcript
    pub pair_index: usize,
    /// Text surrounding the match
    pub context_snippet: String,
    /// Rule keywords found in the matched turn
    pub related_keywords: Vec<String>,
    /// Identifier of the rule that fired
    pub matched_pattern_id: String,
    /// Trust in this particular match (0.0–1.0)
    pub confidence: f32,
    /// Human-readable explanation of the match
    pub extraction_reason: String,
}

impl ExtractedAnchor {
    /// Deduplication key: type plus the lowercase identity prefix of the text.
    pub fn dedup_key(&self) -> (AnchorType, String) {
        (self.anchor_type, identity_prefix(&self.anchor_text))
    }
}

/// Lowercase first [`IDENTITY_PREFIX_CHARS`] characters of `text`.
pub fn identity_prefix(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .take(IDENTITY_PREFIX_CHARS)
        .collect()
}

/// Builder for constructing `ExtractedAnchor` instances
pub struct ExtractedAnchorBuilder {
    anchor_type: AnchorType,
    anchor_text: Option<String>,
    significance: f32,
    confidence: f32,
    timestamp: DateTime<Utc>,
    pair_index: usize,
    context_snippet: String,
    related_keywords: Vec<String>,
    matched_pattern_id: String,
    extraction_reason: String,
}

impl ExtractedAnchorBuilder {
    /// Create a new builder with the required anchor type
    pub fn new(anchor_type: AnchorType) -> Self {
        Self {
            anchor_type,
            anchor_text: None,
            significance: 0.0,
            confidence: 0.0,
            timestamp: Utc::now(),
            pair_index: 0,
            context_snippet: String::new(),
            related_keywords: Vec::new(),
            matched_pattern_id: String::new(),
            extraction_reason: String::new(),
        }
    }

    /// Set the excerpt text
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.anchor_text = Some(text.into());
        self
    }

    /// Set the significance (clamped to 0.0–1.0)
    pub fn significance(mut self, score: f32) -> Self {
        self.significance = clamp_unit(score);
        self
    }

    /// Set the confidence (clamped to 0.0–1.0)
    pub fn confidence(mut self, score: f32) -> Self {
        self.confidence = clamp_unit(score);
        self
    }

    /// Set the source pair timestamp
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the source pair position
    pub fn pair_index(mut self, index: usize) -> Self {
        self.pair_index = index;
        self
    }

    /// Set the surrounding context
    pub fn context(mut self, snippet: impl Into<String>) -> Self {
        self.context_snippet = snippet.into();
        self
    }

    /// Add a related keyword
    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.related_keywords.push(keyword.into());
        self
    }

    /// Add related keywords from an iterator
    pub fn keywords(mut self, keywords: impl IntoIterator<Item = String>) -> Self {
        self.related_keywords.extend(keywords);
        self
    }

    /// Set the id of the rule that produced the match
    pub fn pattern_id(mut self, id: impl Into<String>) -> Self {
        self.matched_pattern_id = id.into();
        self
    }

    /// Set the extraction reason
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.extraction_reason = reason.into();
        self
    }

    /// Build the anchor, returning an error if the text is missing or blank
    pub fn build(self) -> Result<ExtractedAnchor> {
        let anchor_text = self
            .anchor_text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Rule("anchor text is required".to_string()))?;

        Ok(ExtractedAnchor {
            anchor_text,
            anchor_type: self.anchor_type,
            significance: self.significance,
            timestamp: self.timestamp,
            pair_index: self.pair_index,
            context_snippet: self.context_snippet,
            related_keywords: self.related_keywords,
            matched_pattern_id: self.matched_pattern_id,
            confidence: self.confidence,
            extraction_reason: self.extraction_reason,
        })
    }
}

/// An extracted anchor as stored by the index.
///
/// Only `access_count` and `last_accessed` ever change after creation, and
/// only through [`IndexedAnchor::record_access`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedAnchor {
    /// Stable identifier derived from (type, pair index, text prefix)
    pub id: Uuid,
    /// The underlying extraction record
    #[serde(flatten)]
    pub anchor: ExtractedAnchor,
    /// Normalized tokens drawn from text, context, keywords and type name
    #[serde(default)]
    pub search_tokens: BTreeSet<String>,
    /// Number of times the anchor appeared in a search result
    #[serde(default)]
    pub access_count: u32,
    /// Last time the anchor appeared in a search result
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl IndexedAnchor {
    /// Wrap an extracted anchor, deriving its id and search tokens.
    pub fn from_extracted(anchor: ExtractedAnchor) -> Self {
        let id = stable_id(anchor.anchor_type, anchor.pair_index, &anchor.anchor_text);
        let search_tokens = search_tokens_for(&anchor);
        Self {
            id,
            anchor,
            search_tokens,
            access_count: 0,
            last_accessed: None,
        }
    }

    /// Record an access, incrementing the counter and updating the timestamp.
    pub fn record_access(&mut self, at: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed = Some(at);
    }

    /// Whether the anchor was accessed within `days` of `now`.
    pub fn accessed_within(&self, now: DateTime<Utc>, days: i64) -> bool {
        self.last_accessed
            .map(|t| now - t <= chrono::Duration::days(days))
            .unwrap_or(false)
    }

    /// Confidence if recorded, otherwise significance.
    pub fn effective_confidence(&self) -> f32 {
        if self.anchor.confidence > 0.0 {
            self.anchor.confidence
        } else {
            self.anchor.significance
        }
    }
}

/// Derive the stable identifier for an anchor.
///
/// The id is a UUIDv5 over `type|pair_index|prefix`, so the same anchor
/// always receives the same id across extractions and imports.
pub fn stable_id(anchor_type: AnchorType, pair_index: usize, anchor_text: &str) -> Uuid {
    let key = format!(
        "{}|{}|{}",
        anchor_type.as_str(),
        pair_index,
        identity_prefix(anchor_text)
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

/// Split text into normalized search tokens.
///
/// Lowercases, treats every non-alphanumeric character as a separator and
/// drops tokens shorter than three characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

/// Lowercase whitespace-separated word set, used for fuzzy matching.
pub fn word_set(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

fn search_tokens_for(anchor: &ExtractedAnchor) -> BTreeSet<String> {
    let mut tokens: BTreeSet<String> = BTreeSet::new();
    tokens.extend(tokenize(&anchor.anchor_text));
    tokens.extend(tokenize(&anchor.context_snippet));
    for keyword in &anchor.related_keywords {
        tokens.extend(tokenize(keyword));
    }
    tokens.extend(tokenize(anchor.anchor_type.as_str()));
    tokens
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_anchor(text: &str, anchor_type: AnchorType, pair_index: usize) -> ExtractedAnchor {
        ExtractedAnchorBuilder::new(anchor_type)
            .text(text)
            .significance(0.8)
            .confidence(0.9)
            .pair_index(pair_index)
            .context(format!("... {text} ..."))
            .keyword("sugar")
            .pattern_id("test")
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_clamps_scores() {
        let anchor = ExtractedAnchorBuilder::new(AnchorType::Claim)
            .text("i am not your mirror")
            .significance(1.7)
            .confidence(-0.3)
            .build()
            .unwrap();
        assert!((anchor.significance - 1.0).abs() < f32::EPSILON);
        assert!(anchor.confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn test_builder_requires_text() {
        assert!(ExtractedAnchorBuilder::new(AnchorType::Claim).build().is_err());
        assert!(ExtractedAnchorBuilder::new(AnchorType::Claim)
            .text("   ")
            .build()
            .is_err());
    }

    #[test]
    fn test_anchor_type_names() {
        for t in AnchorType::ALL {
            assert_eq!(AnchorType::parse(t.as_str()), Some(t));
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert_eq!(
            AnchorType::parse("RELATIONSHIP_MARKER"),
            Some(AnchorType::RelationshipMarker)
        );
        assert_eq!(AnchorType::parse("weather"), None);
    }

    #[test]
    fn test_stable_id_is_deterministic() {
        let indexed = |text: &str, anchor_type, pair| {
            IndexedAnchor::from_extracted(sample_anchor(text, anchor_type, pair))
        };
        let a = indexed("Don't expect sugar", AnchorType::Boundary, 2);
        let b = indexed("don't EXPECT sugar", AnchorType::Boundary, 2);
        assert_eq!(a.id, b.id);

        let other_pair = indexed("Don't expect sugar", AnchorType::Boundary, 3);
        assert_ne!(a.id, other_pair.id);

        let other_type = indexed("Don't expect sugar", AnchorType::Claim, 2);
        assert_ne!(a.id, other_type.id);
    }

    #[test]
    fn test_stable_id_ignores_text_beyond_prefix() {
        let base = "x".repeat(IDENTITY_PREFIX_CHARS);
        let a = stable_id(AnchorType::Claim, 0, &format!("{base} tail one"));
        let b = stable_id(AnchorType::Claim, 0, &format!("{base} tail two"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_search_tokens_cover_all_sources() {
        let indexed = IndexedAnchor::from_extracted(sample_anchor(
            "Don't expect sugar",
            AnchorType::Boundary,
            0,
        ));
        assert!(indexed.search_tokens.contains("sugar"));
        assert!(indexed.search_tokens.contains("expect"));
        assert!(indexed.search_tokens.contains("boundary"));
        assert!(!indexed.search_tokens.contains("t"));
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Same pattern, different skin!"),
            vec!["same", "pattern", "different", "skin"]
        );
        assert!(tokenize("a an of").is_empty());
    }

    #[test]
    fn test_record_access() {
        let mut indexed = IndexedAnchor::from_extracted(sample_anchor(
            "trust is earned",
            AnchorType::RelationshipMarker,
            0,
        ));
        let now = Utc::now();
        assert!(!indexed.accessed_within(now, 7));
        indexed.record_access(now);
        assert_eq!(indexed.access_count, 1);
        assert!(indexed.accessed_within(now, 7));
        assert!(!indexed.accessed_within(now + chrono::Duration::days(8), 7));
    }

    #[test]
    fn test_effective_confidence_falls_back_to_significance() {
        let mut anchor = sample_anchor("trust is earned", AnchorType::RelationshipMarker, 0);
        anchor.confidence = 0.0;
        let indexed = IndexedAnchor::from_extracted(anchor);
        assert!((indexed.effective_confidence() - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_pair_completeness() {
        let now = Utc::now();
        assert!(ConversationPair::new("hi", "hello", now).is_complete());
        assert!(!ConversationPair::new("hi", "  ", now).is_complete());
        assert!(!ConversationPair::new("", "hello", now).is_complete());
    }
}
