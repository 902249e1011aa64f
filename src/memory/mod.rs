//! Memory system: anchor extraction, retrieval and validation
//!
//! Extractor → Index → Validator → Orchestrator. Each stage consumes only
//! the outputs of the stages before it.

pub mod anchor;
pub mod bank;
pub mod extractor;
pub mod index;
pub mod orchestrator;
pub mod rules;
pub mod transcript;
pub mod trigger;
pub mod validator;

pub use anchor::{
    AnchorType, ConversationPair, ExtractedAnchor, ExtractedAnchorBuilder, IndexedAnchor,
};
pub use bank::{ValidationBank, ValidationBankEntry};
pub use extractor::Extractor;
pub use index::{AnchorIndex, IndexStats, SearchQuery, SearchResult};
pub use orchestrator::{InjectionStrategy, MemoryContext, MemoryOrchestrator, PromptInjection};
pub use rules::{CrossMessageRule, ExtractionRule, PatternRule};
pub use transcript::{LineTranscriptParser, TranscriptParser};
pub use trigger::{TriggerDetection, TriggerDetector, TriggerKind};
pub use validator::{AcceptanceReport, Classification, StrictValidator, ValidationOutcome};
