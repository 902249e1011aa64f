//! In-memory anchor index
//!
//! Owns one subject's anchor corpus and answers scored multi-criterion
//! searches. Besides the corpus itself the index keeps four lookup maps:
//! by type, by normalized token, by exact lowercase anchor text and by
//! significance bucket (rounded to 0.1).
//!
//! The index is a plain owned value: callers hold it by handle and must not
//! search it concurrently with `clear`/`import_anchors`. Searching records
//! an access on every returned anchor; that bookkeeping never affects ids.

use super::anchor::{tokenize, word_set, AnchorType, ExtractedAnchor, IndexedAnchor};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use uuid::Uuid;

const TYPE_MATCH_WEIGHT: f32 = 0.3;
const QUERY_TOKEN_WEIGHT: f32 = 0.4;
const LITERAL_MATCH_WEIGHT: f32 = 0.5;
const KEYWORD_WEIGHT: f32 = 0.3;
const FUZZY_WEIGHT: f32 = 0.2;
const FUZZY_THRESHOLD: f32 = 0.6;
const SIGNIFICANCE_WEIGHT: f32 = 0.1;
const RECENCY_BONUS: f32 = 0.05;
const RECENCY_DAYS: i64 = 7;

/// A scored search request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free-text query
    pub text: String,
    /// Restrict candidates to (and reward) one anchor type
    #[serde(rename = "type")]
    pub anchor_type: Option<AnchorType>,
    /// Explicit keywords
    pub keywords: Vec<String>,
    /// Anchors below this significance are never returned
    pub min_significance: Option<f32>,
    /// Truncate the ranked list to this many results
    pub max_results: Option<usize>,
    /// Enable Jaccard fuzzy matching on the free text
    pub fuzzy: bool,
}

impl SearchQuery {
    /// Free-text query
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Keyword-only query
    pub fn keywords(keywords: impl IntoIterator<Item = String>) -> Self {
        Self {
            keywords: keywords.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Type-only query
    pub fn of_type(anchor_type: AnchorType) -> Self {
        Self {
            anchor_type: Some(anchor_type),
            ..Default::default()
        }
    }

    /// Set the type filter
    pub fn with_type(mut self, anchor_type: AnchorType) -> Self {
        self.anchor_type = Some(anchor_type);
        self
    }

    /// Set the type filter by name. Unknown names leave the filter unset.
    pub fn with_type_name(mut self, name: &str) -> Self {
        self.anchor_type = AnchorType::parse(name);
        if self.anchor_type.is_none() {
            tracing::debug!(type_name = name, "Ignoring unknown anchor type filter");
        }
        self
    }

    /// Replace the keyword list
    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = String>) -> Self {
        self.keywords = keywords.into_iter().collect();
        self
    }

    /// Set the significance floor
    pub fn min_significance(mut self, min: f32) -> Self {
        self.min_significance = Some(min);
        self
    }

    /// Set the result limit
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Enable or disable fuzzy matching
    pub fn fuzzy(mut self, enabled: bool) -> Self {
        self.fuzzy = enabled;
        self
    }
}

/// One ranked search hit. Holds a snapshot of the anchor taken after its
/// access was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matched anchor
    pub anchor: IndexedAnchor,
    /// Relevance score (higher is better)
    pub score: f32,
    /// Which scoring terms contributed
    pub match_reason: String,
    /// Query tokens and keywords that matched the anchor
    pub matched_tokens: Vec<String>,
    /// Number of query keywords that matched the anchor
    #[serde(default)]
    pub keyword_hits: usize,
}

/// Corpus statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Number of anchors in the corpus
    pub total_anchors: usize,
    /// Anchor count per type name
    pub by_type: BTreeMap<String, usize>,
    /// Number of distinct search tokens
    pub unique_tokens: usize,
    /// Sum of access counts
    pub total_accesses: u64,
    /// Mean significance (0 for an empty corpus)
    pub average_significance: f32,
    /// Anchor count per significance bucket, keyed "0.0".."1.0"
    pub significance_buckets: BTreeMap<String, usize>,
}

/// Owned, searchable anchor corpus for one subject.
#[derive(Debug, Default)]
pub struct AnchorIndex {
    anchors: Vec<IndexedAnchor>,
    by_id: HashMap<Uuid, usize>,
    by_type: HashMap<AnchorType, Vec<usize>>,
    by_token: HashMap<String, BTreeSet<usize>>,
    by_text: HashMap<String, Vec<usize>>,
    by_bucket: BTreeMap<u8, Vec<usize>>,
}

impl AnchorIndex {
    /// Create a new empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of anchors in the corpus
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// Whether the corpus is empty
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Append extracted anchors, returning how many were added.
    ///
    /// Anchors whose stable id is already present are skipped.
    pub fn add(&mut self, anchors: Vec<ExtractedAnchor>) -> usize {
        let mut added = 0;
        for anchor in anchors {
            if self.insert(IndexedAnchor::from_extracted(anchor)) {
                added += 1;
            }
        }
        tracing::debug!(added, total = self.anchors.len(), "Anchors indexed");
        added
    }

    /// Look up an anchor by id without recording an access
    pub fn get(&self, id: &Uuid) -> Option<&IndexedAnchor> {
        self.by_id.get(id).map(|&pos| &self.anchors[pos])
    }

    /// All anchors of a type, in insertion order
    pub fn by_type(&self, anchor_type: AnchorType) -> Vec<&IndexedAnchor> {
        self.by_type
            .get(&anchor_type)
            .map(|positions| positions.iter().map(|&p| &self.anchors[p]).collect())
            .unwrap_or_default()
    }

    /// Anchors with significance at or above `threshold`, highest first
    pub fn high_significance(&self, threshold: f32) -> Vec<&IndexedAnchor> {
        let lowest_bucket = significance_bucket(threshold).saturating_sub(1);
        let mut hits: Vec<&IndexedAnchor> = self
            .by_bucket
            .range(lowest_bucket..)
            .flat_map(|(_, positions)| positions.iter().map(|&p| &self.anchors[p]))
            .filter(|a| a.anchor.significance >= threshold)
            .collect();
        hits.sort_by(|a, b| {
            b.anchor
                .significance
                .partial_cmp(&a.anchor.significance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.by_id[&a.id].cmp(&self.by_id[&b.id]))
        });
        hits
    }

    /// Drop every anchor and lookup entry
    pub fn clear(&mut self) {
        self.anchors.clear();
        self.by_id.clear();
        self.by_type.clear();
        self.by_token.clear();
        self.by_text.clear();
        self.by_bucket.clear();
    }

    /// Scored search, recording an access on every returned anchor.
    pub fn search(&mut self, query: &SearchQuery) -> Vec<SearchResult> {
        self.search_at(query, Utc::now())
    }

    /// [`search`](Self::search) with an explicit clock.
    pub fn search_at(&mut self, query: &SearchQuery, now: DateTime<Utc>) -> Vec<SearchResult> {
        let candidates = self.candidates(query);
        let query_tokens: BTreeSet<String> = tokenize(&query.text).into_iter().collect();
        let keywords: Vec<String> = query
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let query_words = word_set(&query.text);
        let literal = query.text.trim().to_lowercase();
        let min_significance = query.min_significance.unwrap_or(0.0);

        let mut scored: Vec<(usize, f32, String, Vec<String>, usize)> = Vec::new();
        for &pos in &candidates {
            let anchor = &self.anchors[pos];
            if anchor.anchor.significance < min_significance {
                continue;
            }

            let mut score = 0.0;
            let mut reasons = Vec::new();
            let mut matched = Vec::new();
            let mut keyword_hits = 0;

            if query.anchor_type == Some(anchor.anchor.anchor_type) {
                score += TYPE_MATCH_WEIGHT;
                reasons.push("type match".to_string());
            }

            if !query_tokens.is_empty() {
                let hits: Vec<&String> = query_tokens
                    .iter()
                    .filter(|t| anchor.search_tokens.contains(*t))
                    .collect();
                if !hits.is_empty() {
                    score += QUERY_TOKEN_WEIGHT * hits.len() as f32 / query_tokens.len() as f32;
                    reasons.push(format!("{}/{} query tokens", hits.len(), query_tokens.len()));
                    matched.extend(hits.into_iter().cloned());
                }
            }

            if !literal.is_empty() && anchor.anchor.anchor_text.to_lowercase().contains(&literal) {
                score += LITERAL_MATCH_WEIGHT;
                reasons.push("literal text".to_string());
            }

            if !keywords.is_empty() {
                let hits: Vec<&String> = keywords
                    .iter()
                    .filter(|k| keyword_matches(k, &anchor.search_tokens))
                    .collect();
                if !hits.is_empty() {
                    keyword_hits = hits.len();
                    score += KEYWORD_WEIGHT * hits.len() as f32 / keywords.len() as f32;
                    reasons.push(format!("{}/{} keywords", hits.len(), keywords.len()));
                    for k in hits {
                        if !matched.contains(k) {
                            matched.push(k.clone());
                        }
                    }
                }
            }

            if query.fuzzy && !query_words.is_empty() {
                let similarity = jaccard(&query_words, &word_set(&anchor.anchor.anchor_text));
                if similarity > FUZZY_THRESHOLD {
                    score += FUZZY_WEIGHT * similarity;
                    reasons.push(format!("fuzzy {:.2}", similarity));
                }
            }

            score += SIGNIFICANCE_WEIGHT * anchor.anchor.significance;

            if anchor.accessed_within(now, RECENCY_DAYS) {
                score += RECENCY_BONUS;
                reasons.push("recently accessed".to_string());
            }

            if score > 0.0 {
                if reasons.is_empty() {
                    reasons.push("significance only".to_string());
                }
                scored.push((pos, score, reasons.join(", "), matched, keyword_hits));
            }
        }

        // Stable sort: equal scores keep corpus order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(max) = query.max_results {
            scored.truncate(max);
        }

        tracing::debug!(
            candidates = candidates.len(),
            results = scored.len(),
            "Anchor search complete"
        );

        scored
            .into_iter()
            .map(|(pos, score, match_reason, matched_tokens, keyword_hits)| {
                let anchor = &mut self.anchors[pos];
                anchor.record_access(now);
                SearchResult {
                    anchor: anchor.clone(),
                    score,
                    match_reason,
                    matched_tokens,
                    keyword_hits,
                }
            })
            .collect()
    }

    /// Corpus statistics
    pub fn stats(&self) -> IndexStats {
        let mut by_type = BTreeMap::new();
        for (anchor_type, positions) in &self.by_type {
            by_type.insert(anchor_type.as_str().to_string(), positions.len());
        }
        let significance_buckets = self
            .by_bucket
            .iter()
            .map(|(bucket, positions)| (format!("{:.1}", *bucket as f32 / 10.0), positions.len()))
            .collect();
        let average_significance = if self.anchors.is_empty() {
            0.0
        } else {
            self.anchors.iter().map(|a| a.anchor.significance).sum::<f32>()
                / self.anchors.len() as f32
        };

        IndexStats {
            total_anchors: self.anchors.len(),
            by_type,
            unique_tokens: self.by_token.len(),
            total_accesses: self.anchors.iter().map(|a| a.access_count as u64).sum(),
            average_significance,
            significance_buckets,
        }
    }

    /// Copy of the corpus as plain data, in insertion order
    pub fn export_anchors(&self) -> Vec<IndexedAnchor> {
        self.anchors.clone()
    }

    /// Load previously exported anchors, keeping their ids and bookkeeping.
    ///
    /// Returns how many were added; ids already present are skipped. A
    /// snapshot with any out-of-range score is rejected as a whole and the
    /// corpus is left unchanged.
    pub fn import_anchors(&mut self, anchors: Vec<IndexedAnchor>) -> Result<usize> {
        // Reject the whole snapshot before touching the corpus.
        for anchor in &anchors {
            let sig = anchor.anchor.significance;
            let conf = anchor.anchor.confidence;
            if !(0.0..=1.0).contains(&sig) || !(0.0..=1.0).contains(&conf) {
                return Err(Error::Index(format!(
                    "anchor {} has out-of-range scores (significance {}, confidence {})",
                    anchor.id, sig, conf
                )));
            }
        }

        let mut added = 0;
        for mut anchor in anchors {
            if anchor.search_tokens.is_empty() {
                anchor.search_tokens =
                    IndexedAnchor::from_extracted(anchor.anchor.clone()).search_tokens;
            }
            if self.insert(anchor) {
                added += 1;
            }
        }
        tracing::info!(added, total = self.anchors.len(), "Imported anchors");
        Ok(added)
    }

    /// Write the corpus snapshot as JSON
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.anchors)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Build an index from a JSON snapshot written by [`save_json`](Self::save_json)
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let anchors: Vec<IndexedAnchor> = serde_json::from_str(&content)?;
        let mut index = Self::new();
        index.import_anchors(anchors)?;
        Ok(index)
    }

    fn insert(&mut self, anchor: IndexedAnchor) -> bool {
        if self.by_id.contains_key(&anchor.id) {
            tracing::warn!(id = %anchor.id, "Skipping anchor with duplicate id");
            return false;
        }
        let pos = self.anchors.len();
        self.by_id.insert(anchor.id, pos);
        self.by_type
            .entry(anchor.anchor.anchor_type)
            .or_default()
            .push(pos);
        for token in &anchor.search_tokens {
            self.by_token.entry(token.clone()).or_default().insert(pos);
        }
        self.by_text
            .entry(anchor.anchor.anchor_text.to_lowercase())
            .or_default()
            .push(pos);
        self.by_bucket
            .entry(significance_bucket(anchor.anchor.significance))
            .or_default()
            .push(pos);
        self.anchors.push(anchor);
        true
    }

    /// Union of type, token, keyword and exact-text hits. An empty union
    /// falls back to the whole corpus so small corpora are never starved.
    fn candidates(&self, query: &SearchQuery) -> BTreeSet<usize> {
        let mut candidates = BTreeSet::new();

        if let Some(anchor_type) = query.anchor_type {
            if let Some(positions) = self.by_type.get(&anchor_type) {
                candidates.extend(positions.iter().copied());
            }
        }

        let keyword_tokens = query.keywords.iter().flat_map(|k| tokenize(k));
        for token in tokenize(&query.text).into_iter().chain(keyword_tokens) {
            if let Some(positions) = self.by_token.get(&token) {
                candidates.extend(positions.iter().copied());
            }
        }

        if let Some(positions) = self.by_text.get(&query.text.trim().to_lowercase()) {
            candidates.extend(positions.iter().copied());
        }

        if candidates.is_empty() {
            candidates.extend(0..self.anchors.len());
        }
        candidates
    }
}

/// Either-direction substring containment against the anchor's tokens.
fn keyword_matches(keyword: &str, tokens: &BTreeSet<String>) -> bool {
    tokens
        .iter()
        .any(|t| t.contains(keyword) || keyword.contains(t.as_str()))
}

/// Jaccard similarity of two word sets
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

fn significance_bucket(significance: f32) -> u8 {
    (significance.clamp(0.0, 1.0) * 10.0).round() as u8
}
