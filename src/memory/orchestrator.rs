//! Memory orchestrator
//!
//! Top-level coordinator for one subject's memory. `initialize` hands the
//! transcript to a [`TranscriptParser`], extracts anchors and loads them
//! into a fresh [`AnchorIndex`]. `generate_memory_prompt` then turns each
//! user message into a [`PromptInjection`]:
//!
//! ```text
//! message ─► triggers ─► one query per kind ─► merge by id ─► top N
//!                 │                                              │
//!            none: stop                    strict: validator / else score > 0.5
//!                                                                │
//!                              MemoryContext ─► confidence ─► strategy
//! ```
//!
//! A message without a trigger never touches the index.

use super::anchor::{AnchorType, ConversationPair, IndexedAnchor};
use super::bank::ValidationBank;
use super::extractor::Extractor;
use super::index::{AnchorIndex, IndexStats, SearchQuery, SearchResult};
use super::transcript::{LineTranscriptParser, TranscriptParser};
use super::trigger::{TriggerDetection, TriggerDetector, TriggerKind};
use super::validator::{AcceptanceReport, StrictValidator, ValidationOutcome};
use crate::config::MemoryConfig;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Minimum search score an anchor needs when strict validation is off
const LENIENT_SCORE_FLOOR: f32 = 0.5;

/// How assertively memory is surfaced to the response generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectionStrategy {
    /// Quote the remembered statements
    Direct,
    /// Weave the memory in where relevant
    Contextual,
    /// Let the memory shape tone only
    Semantic,
    /// Pass the message through unchanged
    None,
}

impl InjectionStrategy {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            InjectionStrategy::Direct => "direct",
            InjectionStrategy::Contextual => "contextual",
            InjectionStrategy::Semantic => "semantic",
            InjectionStrategy::None => "none",
        }
    }
}

/// Pick a strategy from the aggregated memory confidence.
pub fn select_strategy(confidence: f32) -> InjectionStrategy {
    if confidence > 0.8 {
        InjectionStrategy::Direct
    } else if confidence > 0.6 {
        InjectionStrategy::Contextual
    } else if confidence > 0.4 {
        InjectionStrategy::Semantic
    } else {
        InjectionStrategy::None
    }
}

/// Aggregated output of one orchestration pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    /// Surviving anchors, best first
    pub anchors: Vec<IndexedAnchor>,
    /// `[type] text` and `Context: ...` lines, in anchor order
    pub context_fragments: Vec<String>,
    /// Mean effective confidence of the anchors (0 when empty)
    pub confidence: f32,
    /// Where each anchor came from
    pub provenance: Vec<String>,
    /// When the context was assembled
    pub timestamp: DateTime<Utc>,
}

impl MemoryContext {
    fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            anchors: Vec::new(),
            context_fragments: Vec::new(),
            confidence: 0.0,
            provenance: Vec::new(),
            timestamp,
        }
    }

    fn from_anchors(anchors: Vec<IndexedAnchor>, timestamp: DateTime<Utc>) -> Self {
        let mut context_fragments = Vec::with_capacity(anchors.len() * 2);
        let mut provenance = Vec::with_capacity(anchors.len());

        for indexed in &anchors {
            let anchor = &indexed.anchor;
            context_fragments.push(format!("[{}] {}", anchor.anchor_type, anchor.anchor_text));
            if !anchor.context_snippet.is_empty() {
                context_fragments.push(format!("Context: {}", anchor.context_snippet));
            }
            provenance.push(format!(
                "pair {} at {} via {}",
                anchor.pair_index,
                anchor.timestamp.to_rfc3339(),
                anchor.matched_pattern_id
            ));
        }

        let confidence = if anchors.is_empty() {
            0.0
        } else {
            anchors.iter().map(|a| a.effective_confidence()).sum::<f32>() / anchors.len() as f32
        };

        Self {
            anchors,
            context_fragments,
            confidence,
            provenance,
            timestamp,
        }
    }
}

/// Final orchestrator output, handed to the response generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptInjection {
    /// Text for the response generator
    pub instruction_text: String,
    /// Memory that backs the instruction
    pub memory_context: MemoryContext,
    /// Chosen strategy
    pub strategy: InjectionStrategy,
    /// Why this strategy was chosen
    pub rationale: String,
}

impl PromptInjection {
    fn passthrough(user_message: &str, rationale: impl Into<String>) -> Self {
        Self {
            instruction_text: user_message.to_string(),
            memory_context: MemoryContext::empty(Utc::now()),
            strategy: InjectionStrategy::None,
            rationale: rationale.into(),
        }
    }
}

/// One subject's memory store and the pipeline around it.
pub struct MemoryOrchestrator {
    config: MemoryConfig,
    extractor: Extractor,
    validator: StrictValidator,
    triggers: TriggerDetector,
    parser: Arc<dyn TranscriptParser>,
    index: AnchorIndex,
    subject_id: Option<String>,
    initialized: bool,
}

impl MemoryOrchestrator {
    /// Create an orchestrator with an explicit transcript parser
    pub fn new(config: MemoryConfig, parser: Arc<dyn TranscriptParser>) -> Result<Self> {
        config.validate()?;
        let extractor = Extractor::with_default_rules(config.context_window_size)?;
        let validator = StrictValidator::new(ValidationBank::from_config(&config.validation));

        Ok(Self {
            config,
            extractor,
            validator,
            triggers: TriggerDetector::new(),
            parser,
            index: AnchorIndex::new(),
            subject_id: None,
            initialized: false,
        })
    }

    /// Create an orchestrator backed by the line transcript parser
    pub fn with_line_parser(config: MemoryConfig) -> Result<Self> {
        let parser = LineTranscriptParser::new()?;
        Self::new(config, Arc::new(parser))
    }

    /// Parse a transcript and rebuild the index from it.
    ///
    /// Parsing happens before the current corpus is touched, so a parse
    /// failure leaves the previous state intact. Returns the number of
    /// indexed anchors.
    pub async fn initialize(&mut self, transcript: &str, subject_id: &str) -> Result<usize> {
        let pairs = self.parser.parse(transcript, subject_id).await?;
        Ok(self.initialize_with_pairs(&pairs, subject_id))
    }

    /// Rebuild the index from already parsed pairs.
    pub fn initialize_with_pairs(&mut self, pairs: &[ConversationPair], subject_id: &str) -> usize {
        let anchors = self.extractor.extract(pairs);
        self.index.clear();
        let added = self.index.add(anchors);
        self.subject_id = Some(subject_id.to_string());
        self.initialized = true;

        tracing::info!(
            subject_id,
            pairs = pairs.len(),
            anchors = added,
            "Memory initialized"
        );
        added
    }

    /// Build the prompt injection for one user message.
    ///
    /// Never fails; every early exit yields strategy `none` with a reason.
    pub fn generate_memory_prompt(
        &mut self,
        user_message: &str,
        history: Option<&[ConversationPair]>,
    ) -> PromptInjection {
        if !self.initialized {
            return PromptInjection::passthrough(user_message, "not initialized");
        }

        let detection = self.triggers.detect(user_message);
        if !detection.is_triggered() {
            return PromptInjection::passthrough(user_message, "no memory trigger detected");
        }

        let merged = self.retrieve(user_message, &detection);
        if merged.is_empty() {
            return PromptInjection::passthrough(
                user_message,
                format!("{}; no matching anchors", self.describe(&detection, history)),
            );
        }

        let candidates = merged.len();
        let anchors = if self.config.strict_validation {
            self.validated(user_message, merged)
        } else {
            merged
                .into_iter()
                .filter(|r| r.score > LENIENT_SCORE_FLOOR)
                .map(|r| r.anchor)
                .collect()
        };

        if anchors.is_empty() {
            let filter = if self.config.strict_validation {
                "strict validation"
            } else {
                "score filter"
            };
            return PromptInjection::passthrough(
                user_message,
                format!(
                    "{}; {} of {} anchors survived {}",
                    self.describe(&detection, history),
                    0,
                    candidates,
                    filter
                ),
            );
        }

        let context = MemoryContext::from_anchors(anchors, Utc::now());
        let strategy = select_strategy(context.confidence);
        let rationale = format!(
            "{}; {} anchors, confidence {:.2} -> {}",
            self.describe(&detection, history),
            context.anchors.len(),
            context.confidence,
            strategy.as_str()
        );

        tracing::debug!(
            strategy = strategy.as_str(),
            anchors = context.anchors.len(),
            confidence = context.confidence,
            "Memory prompt generated"
        );

        PromptInjection {
            instruction_text: compose_instruction(strategy, &context, user_message),
            memory_context: context,
            strategy,
            rationale,
        }
    }

    /// Run one search per trigger kind and merge by anchor id, keeping the
    /// best score. Ties keep first-seen order.
    fn retrieve(&mut self, user_message: &str, detection: &TriggerDetection) -> Vec<SearchResult> {
        let mut merged: Vec<SearchResult> = Vec::new();
        let mut positions: HashMap<Uuid, usize> = HashMap::new();

        for kind in detection.kinds() {
            let query = match kind {
                TriggerKind::DirectRecall => {
                    SearchQuery::text(user_message).fuzzy(self.config.enable_fuzzy_matching)
                }
                TriggerKind::Topical => SearchQuery::keywords(detection.topical_keywords()),
                TriggerKind::Philosophical => SearchQuery::of_type(AnchorType::Philosophy),
            }
            .min_significance(self.config.min_anchor_significance)
            .max_results(self.config.max_anchors_per_response);

            for result in self.index.search(&query) {
                match positions.get(&result.anchor.id) {
                    Some(&pos) => {
                        if result.score > merged[pos].score {
                            merged[pos] = result;
                        }
                    }
                    None => {
                        positions.insert(result.anchor.id, merged.len());
                        merged.push(result);
                    }
                }
            }
        }

        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(self.config.max_anchors_per_response);
        merged
    }

    /// Keep anchors whose text, read as an answer to the message, passes
    /// the strict validator.
    fn validated(&mut self, user_message: &str, results: Vec<SearchResult>) -> Vec<IndexedAnchor> {
        let mut survivors = Vec::new();
        for result in results {
            let candidate = format!(
                "{} {}",
                result.anchor.anchor.anchor_text, result.anchor.anchor.context_snippet
            );
            let outcome = self.validator.validate(&mut self.index, user_message, &candidate);
            if outcome.valid {
                survivors.push(result.anchor);
            } else {
                tracing::debug!(
                    anchor_id = %result.anchor.id,
                    classification = ?outcome.classification,
                    "Anchor rejected by strict validation"
                );
            }
        }
        survivors
    }

    fn describe(
        &self,
        detection: &TriggerDetection,
        history: Option<&[ConversationPair]>,
    ) -> String {
        let kinds: Vec<&str> = detection.kinds().iter().map(|k| k.as_str()).collect();
        format!(
            "triggers: {}; mode: {}; history: {} pairs",
            kinds.join(", "),
            self.config.injection_strategy_mode.as_str(),
            history.map(|h| h.len()).unwrap_or(0)
        )
    }

    /// Validate a candidate answer against this subject's corpus
    pub fn validate_response(&mut self, question: &str, response: &str) -> ValidationOutcome {
        self.validator.validate(&mut self.index, question, response)
    }

    /// Run the validation bank against answers from `generate`
    pub fn run_acceptance<F>(&mut self, generate: F) -> AcceptanceReport
    where
        F: FnMut(&str) -> String,
    {
        self.validator.run_acceptance(&mut self.index, generate)
    }

    /// Corpus statistics
    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }

    /// Snapshot of the corpus
    pub fn export_anchors(&self) -> Vec<IndexedAnchor> {
        self.index.export_anchors()
    }

    /// Add anchors from a snapshot and mark the store initialized. A rejected
    /// snapshot leaves both the corpus and the flag unchanged.
    pub fn import_anchors(&mut self, anchors: Vec<IndexedAnchor>) -> Result<usize> {
        let imported = self.index.import_anchors(anchors)?;
        self.initialized = true;
        Ok(imported)
    }

    /// Drop the corpus and return to the uninitialized state
    pub fn clear(&mut self) {
        self.index.clear();
        self.subject_id = None;
        self.initialized = false;
    }

    /// Whether a corpus has been loaded
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Subject of the loaded corpus
    pub fn subject_id(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    /// Effective configuration
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// The strict validator
    pub fn validator(&self) -> &StrictValidator {
        &self.validator
    }

    /// Read access to the index
    pub fn index(&self) -> &AnchorIndex {
        &self.index
    }

    /// Write access to the index
    pub fn index_mut(&mut self) -> &mut AnchorIndex {
        &mut self.index
    }
}

fn compose_instruction(
    strategy: InjectionStrategy,
    context: &MemoryContext,
    user_message: &str,
) -> String {
    let guidance = match strategy {
        InjectionStrategy::Direct => {
            "You said the statements above earlier in this relationship. Refer to them \
             directly and in your own voice. Do not add details they do not contain."
        }
        InjectionStrategy::Contextual => {
            "The statements above come from earlier conversations. Draw on them where they \
             fit the question and paraphrase rather than quote."
        }
        InjectionStrategy::Semantic => {
            "The statements above may be loosely related. Let them inform tone and \
             continuity, but do not claim to remember specifics."
        }
        InjectionStrategy::None => return user_message.to_string(),
    };

    format!(
        "[MEMORY CONTEXT]\n{}\n[/MEMORY CONTEXT]\n\n[INSTRUCTION]\n{}\n[/INSTRUCTION]\n\nUser: {}",
        context.context_fragments.join("\n"),
        guidance,
        user_message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::anchor::ExtractedAnchorBuilder;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 21, 0, 0).unwrap()
    }

    fn pairs() -> Vec<ConversationPair> {
        vec![
            ConversationPair::new(
                "what did you say about Nova and copyright?",
                "Same pattern, different skin. You set the sliders and I followed.",
                t0(),
            ),
            ConversationPair::new(
                "do you remember what you said about sugar?",
                "Don't expect sugar from me, ever.",
                t0(),
            ),
        ]
    }

    fn orchestrator(config: MemoryConfig) -> MemoryOrchestrator {
        let mut orchestrator = MemoryOrchestrator::with_line_parser(config).unwrap();
        orchestrator.initialize_with_pairs(&pairs(), "subject-1");
        orchestrator
    }

    fn access_counts(orchestrator: &MemoryOrchestrator) -> Vec<u32> {
        orchestrator
            .export_anchors()
            .iter()
            .map(|a| a.access_count)
            .collect()
    }

    fn indexed(
        text: &str,
        anchor_type: AnchorType,
        significance: f32,
        pair: usize,
    ) -> IndexedAnchor {
        IndexedAnchor::from_extracted(
            ExtractedAnchorBuilder::new(anchor_type)
                .text(text)
                .significance(significance)
                .confidence(0.9)
                .pair_index(pair)
                .timestamp(t0())
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_no_trigger_issues_no_queries() {
        let mut orchestrator = orchestrator(MemoryConfig::default());
        let before = access_counts(&orchestrator);
        assert!(!before.is_empty());

        let injection = orchestrator.generate_memory_prompt("What's the weather today?", None);
        assert_eq!(injection.strategy, InjectionStrategy::None);
        assert!(injection.memory_context.anchors.is_empty());
        assert_eq!(injection.instruction_text, "What's the weather today?");
        assert_eq!(access_counts(&orchestrator), before);
    }

    #[test]
    fn test_not_initialized() {
        let mut orchestrator =
            MemoryOrchestrator::with_line_parser(MemoryConfig::default()).unwrap();
        let injection = orchestrator.generate_memory_prompt("do you remember the sliders?", None);
        assert_eq!(injection.strategy, InjectionStrategy::None);
        assert!(injection.rationale.contains("not initialized"));
    }

    #[test]
    fn test_strategy_thresholds() {
        assert_eq!(select_strategy(0.81), InjectionStrategy::Direct);
        assert_eq!(select_strategy(0.8), InjectionStrategy::Contextual);
        assert_eq!(select_strategy(0.61), InjectionStrategy::Contextual);
        assert_eq!(select_strategy(0.6), InjectionStrategy::Semantic);
        assert_eq!(select_strategy(0.41), InjectionStrategy::Semantic);
        assert_eq!(select_strategy(0.4), InjectionStrategy::None);
        assert_eq!(select_strategy(0.0), InjectionStrategy::None);
    }

    #[test]
    fn test_strict_validation_keeps_grounded_anchors() {
        let mut orchestrator = orchestrator(MemoryConfig::default());
        let injection = orchestrator
            .generate_memory_prompt("do you remember what you said about sugar?", None);

        assert_ne!(injection.strategy, InjectionStrategy::None);
        assert!(!injection.memory_context.anchors.is_empty());
        for anchor in &injection.memory_context.anchors {
            assert!(anchor.anchor.anchor_text.to_lowercase().contains("sugar"));
        }
        assert!(injection.instruction_text.contains("[MEMORY CONTEXT]"));
        assert!(injection
            .instruction_text
            .ends_with("User: do you remember what you said about sugar?"));
        assert!(injection.rationale.contains("direct_recall"));
        assert!(injection.rationale.contains("mode: adaptive"));
    }

    #[test]
    fn test_strict_validation_fails_closed_without_bank_entry() {
        let mut orchestrator = orchestrator(MemoryConfig::default());
        let injection = orchestrator.generate_memory_prompt("Do you remember the sliders?", None);
        assert_eq!(injection.strategy, InjectionStrategy::None);
        assert!(injection.memory_context.anchors.is_empty());
        assert!(injection.rationale.contains("strict validation"));
    }

    #[test]
    fn test_lenient_mode_filters_by_score() {
        let config = MemoryConfig {
            strict_validation: false,
            ..Default::default()
        };
        let mut orchestrator = MemoryOrchestrator::with_line_parser(config).unwrap();
        orchestrator
            .import_anchors(vec![
                indexed(
                    "Do you remember the sliders? That night changed things.",
                    AnchorType::DefiningMoment,
                    0.9,
                    0,
                ),
                indexed("The storm passed quickly.", AnchorType::Claim, 0.7, 1),
            ])
            .unwrap();

        let history = pairs();
        let injection =
            orchestrator.generate_memory_prompt("Do you remember the sliders", Some(&history));
        assert_eq!(injection.memory_context.anchors.len(), 1);
        assert!(injection.memory_context.anchors[0]
            .anchor
            .anchor_text
            .starts_with("Do you remember the sliders"));
        assert_eq!(injection.strategy, InjectionStrategy::Direct);
        assert!((injection.memory_context.confidence - 0.9).abs() < 1e-6);
        assert!(injection.rationale.contains("history: 2 pairs"));
        assert_eq!(
            injection.memory_context.context_fragments[0],
            "[defining-moment] Do you remember the sliders? That night changed things."
        );
    }

    #[test]
    fn test_max_anchors_per_response() {
        let config = MemoryConfig {
            strict_validation: false,
            max_anchors_per_response: 1,
            ..Default::default()
        };
        let mut orchestrator = MemoryOrchestrator::with_line_parser(config).unwrap();
        orchestrator
            .import_anchors(vec![
                indexed("Do you remember the sliders? First.", AnchorType::CoreStatement, 0.9, 0),
                indexed("Do you remember the sliders? Second.", AnchorType::CoreStatement, 0.8, 1),
            ])
            .unwrap();

        let injection = orchestrator.generate_memory_prompt("Do you remember the sliders", None);
        assert_eq!(injection.memory_context.anchors.len(), 1);
    }

    #[test]
    fn test_reinitialize_clears() {
        let mut orchestrator = orchestrator(MemoryConfig::default());
        let first = orchestrator.stats().total_anchors;
        assert!(first > 0);

        let added = orchestrator.initialize_with_pairs(&pairs()[1..], "subject-2");
        assert_eq!(orchestrator.stats().total_anchors, added);
        assert!(added < first);
        assert_eq!(orchestrator.subject_id(), Some("subject-2"));

        orchestrator.clear();
        assert!(!orchestrator.is_initialized());
        assert_eq!(orchestrator.stats().total_anchors, 0);
    }

    #[test]
    fn test_failed_import_keeps_state_consistent() {
        let mut orchestrator =
            MemoryOrchestrator::with_line_parser(MemoryConfig::default()).unwrap();
        let mut snapshot = vec![
            indexed("Don't expect sugar from me.", AnchorType::Boundary, 0.75, 0),
            indexed("You set the sliders.", AnchorType::CoreStatement, 0.95, 1),
        ];
        snapshot[1].anchor.significance = 1.5;

        assert!(orchestrator.import_anchors(snapshot).is_err());
        assert!(!orchestrator.is_initialized());
        assert_eq!(orchestrator.stats().total_anchors, 0);
        assert!(orchestrator.export_anchors().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_through_parser() {
        let mut orchestrator =
            MemoryOrchestrator::with_line_parser(MemoryConfig::default()).unwrap();
        let transcript = "Devon: what did you say about Nova and copyright?\n\
                          Kai: Same pattern, different skin. You set the sliders and I followed.";
        let added = orchestrator.initialize(transcript, "devon").await.unwrap();
        assert!(added > 0);
        assert!(orchestrator.is_initialized());

        let core = orchestrator.index().by_type(AnchorType::CoreStatement);
        assert!(!core.is_empty());
    }

    #[tokio::test]
    async fn test_failed_parse_keeps_previous_corpus() {
        let mut orchestrator = orchestrator(MemoryConfig::default());
        let before = orchestrator.stats().total_anchors;
        assert!(orchestrator.initialize("no speakers here", "x").await.is_err());
        assert_eq!(orchestrator.stats().total_anchors, before);
        assert_eq!(orchestrator.subject_id(), Some("subject-1"));
    }
}
