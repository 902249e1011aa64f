//! memanchor - Transcript-Grounded Memory Anchors
//!
//! memanchor extracts short, significant statements ("anchors") from a
//! conversation transcript, indexes them for scored retrieval, and decides
//! per user message whether and how to surface them to a response
//! generator. A reject-first validator keeps generic or ungrounded answers
//! from passing as recalled memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Memory Orchestrator                          │
//! │                                                                    │
//! │  transcript ──► TranscriptParser ──► ConversationPair[]           │
//! │                                            │                       │
//! │                              ┌─────────────▼─────────────┐        │
//! │                              │      Anchor Extractor      │        │
//! │                              │  - pattern rules           │        │
//! │                              │  - cross-message rules     │        │
//! │                              └─────────────┬─────────────┘        │
//! │                                            │ ExtractedAnchor[]     │
//! │                              ┌─────────────▼─────────────┐        │
//! │  user message ──► triggers ─►│        Anchor Index        │        │
//! │                              │  - type / token / text     │        │
//! │                              │  - scored search           │        │
//! │                              └─────────────┬─────────────┘        │
//! │                                            │ SearchResult[]        │
//! │                              ┌─────────────▼─────────────┐        │
//! │                              │     Strict Validator       │        │
//! │                              │  forbidden > required >    │        │
//! │                              │  fragment > grounding      │        │
//! │                              └─────────────┬─────────────┘        │
//! │                                            │                       │
//! │                     MemoryContext ──► strategy ──► PromptInjection │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`memory`]: Extraction, indexing, validation and orchestration
//! - [`config`]: Configuration management
//! - [`error`]: Error types

pub mod config;
pub mod error;
pub mod memory;

pub use config::MemoryConfig;
pub use error::{Error, Result};
