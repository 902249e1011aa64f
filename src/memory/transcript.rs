//! Transcript parsing seam
//!
//! The orchestrator receives raw transcript text and hands it to a
//! [`TranscriptParser`]. Real deployments may plug in an LLM-backed parser;
//! [`LineTranscriptParser`] is a heuristic line parser that covers the
//! common dialects:
//!
//! ```text
//! [2024-03-01 21:14] Devon: do you remember what you said about sugar?
//! Devon said: and what about Nova?
//! Assistant: Don't expect sugar from me.
//! continuation lines are appended to the previous turn
//! ```

use super::anchor::ConversationPair;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

/// Speaker names always treated as the user
const USER_ALIASES: &[&str] = &["user", "you", "me", "human"];

/// Speaker names always treated as the assistant
const ASSISTANT_ALIASES: &[&str] = &["assistant", "ai", "bot", "chatgpt", "model"];

/// Timestamp formats tried after RFC 3339
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M",
];

/// Turns raw transcript text into ordered conversation pairs
#[async_trait]
pub trait TranscriptParser: Send + Sync {
    /// Parse a transcript belonging to `subject_id`
    async fn parse(&self, transcript: &str, subject_id: &str) -> Result<Vec<ConversationPair>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    User,
    Assistant,
}

#[derive(Debug)]
struct Turn {
    role: Role,
    text: String,
    timestamp: DateTime<Utc>,
}

/// Heuristic line-based transcript parser
#[derive(Debug, Clone)]
pub struct LineTranscriptParser {
    header: Regex,
    speaker: Regex,
}

impl LineTranscriptParser {
    /// Compile the line patterns
    pub fn new() -> Result<Self> {
        let header = Regex::new(r"^\[([^\]]+)\]\s*(.*)$")
            .map_err(|e| Error::Parse(format!("invalid header pattern: {}", e)))?;
        let speaker = Regex::new(r"^([A-Za-z][\w .'-]{0,40}?)(?:\s+said)?:\s*(.*)$")
            .map_err(|e| Error::Parse(format!("invalid speaker pattern: {}", e)))?;
        Ok(Self { header, speaker })
    }

    /// Parse transcript text synchronously.
    ///
    /// Blank input yields no pairs; non-blank input without a single speaker
    /// line is an error.
    pub fn parse_text(&self, transcript: &str) -> Result<Vec<ConversationPair>> {
        if transcript.trim().is_empty() {
            return Ok(Vec::new());
        }

        let parsed_at = Utc::now();
        let mut current_time = parsed_at;
        let mut first_speaker: Option<String> = None;
        let mut turns: Vec<Turn> = Vec::new();

        for raw in transcript.lines() {
            let mut line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(caps) = self.header.captures(line) {
                if let Some(ts) = caps.get(1).and_then(|m| parse_timestamp(m.as_str())) {
                    current_time = ts;
                }
                let rest = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
                if rest.is_empty() {
                    continue;
                }
                line = rest;
            }

            if let Some(caps) = self.speaker.captures(line) {
                let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                let text = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
                let role = classify_speaker(name, &mut first_speaker);

                match turns.last_mut() {
                    Some(last) if last.role == role => push_line(&mut last.text, text),
                    _ => turns.push(Turn {
                        role,
                        text: text.to_string(),
                        timestamp: current_time,
                    }),
                }
            } else if let Some(last) = turns.last_mut() {
                push_line(&mut last.text, line);
            }
        }

        if turns.is_empty() {
            return Err(Error::Parse("transcript contains no speaker lines".to_string()));
        }

        Ok(pair_turns(turns))
    }
}

#[async_trait]
impl TranscriptParser for LineTranscriptParser {
    async fn parse(&self, transcript: &str, subject_id: &str) -> Result<Vec<ConversationPair>> {
        let pairs = self.parse_text(transcript)?;
        tracing::debug!(subject_id, pairs = pairs.len(), "Parsed transcript");
        Ok(pairs)
    }
}

fn classify_speaker(name: &str, first_speaker: &mut Option<String>) -> Role {
    let lower = name.to_lowercase();
    if USER_ALIASES.contains(&lower.as_str()) {
        return Role::User;
    }
    if ASSISTANT_ALIASES.contains(&lower.as_str()) {
        return Role::Assistant;
    }
    match first_speaker {
        Some(first) if *first == lower => Role::User,
        Some(_) => Role::Assistant,
        None => {
            *first_speaker = Some(lower);
            Role::User
        }
    }
}

fn push_line(text: &mut String, line: &str) {
    if line.is_empty() {
        return;
    }
    if !text.is_empty() {
        text.push('\n');
    }
    text.push_str(line);
}

/// Pair each user turn with the assistant turn that follows it. An
/// unanswered user turn or an unprompted assistant turn becomes a pair
/// with one empty side.
fn pair_turns(turns: Vec<Turn>) -> Vec<ConversationPair> {
    let mut pairs = Vec::new();
    let mut pending: Option<Turn> = None;

    for turn in turns {
        match (turn.role, pending.take()) {
            (Role::User, previous) => {
                if let Some(user) = previous {
                    pairs.push(ConversationPair::new(user.text, "", user.timestamp));
                }
                pending = Some(turn);
            }
            (Role::Assistant, Some(user)) => {
                pairs.push(ConversationPair::new(user.text, turn.text, user.timestamp));
            }
            (Role::Assistant, None) => {
                pairs.push(ConversationPair::new("", turn.text, turn.timestamp));
            }
        }
    }
    if let Some(user) = pending {
        pairs.push(ConversationPair::new(user.text, "", user.timestamp));
    }
    pairs
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
