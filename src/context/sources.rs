//! Collaborator contracts and in-memory implementations
//!
//! The allocator only reads from these. Conversation storage, example
//! retrieval and vector search live behind the traits.

use super::models::{HistoryTurn, RetrievedChunk};
use crate::config::RetrievalConfig;
use crate::error::{ContextError, Result, SourceError};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Ordered conversation turns, oldest first
pub trait HistorySource {
    fn turns(&self) -> std::result::Result<Vec<String>, SourceError>;
}

/// Style example blocks, most illustrative first
pub trait ExampleSource {
    fn examples(&self, query: &str) -> std::result::Result<Vec<String>, SourceError>;
}

/// Ranked similarity search returning at most `k` chunks
#[cfg_attr(test, mockall::automock)]
pub trait RetrievalSource {
    fn retrieve(&self, query: &str, k: usize)
        -> std::result::Result<Vec<RetrievedChunk>, SourceError>;
}

impl HistorySource for Vec<String> {
    fn turns(&self) -> std::result::Result<Vec<String>, SourceError> {
        Ok(self.clone())
    }
}

impl ExampleSource for Vec<String> {
    fn examples(&self, _query: &str) -> std::result::Result<Vec<String>, SourceError> {
        Ok(self.clone())
    }
}

impl RetrievalSource for Vec<RetrievedChunk> {
    fn retrieve(
        &self,
        _query: &str,
        k: usize,
    ) -> std::result::Result<Vec<RetrievedChunk>, SourceError> {
        Ok(self.iter().take(k).cloned().collect())
    }
}

/// Bounded in-memory conversation log
#[derive(Debug, Clone)]
pub struct ConversationLog {
    character_name: String,
    capacity: usize,
    turns: VecDeque<HistoryTurn>,
}

impl ConversationLog {
    pub fn new(character_name: impl Into<String>, capacity: usize) -> Self {
        Self {
            character_name: character_name.into(),
            capacity,
            turns: VecDeque::with_capacity(capacity),
        }
    }

    /// Rebuild a log from a flat `User:`-delimited transcript
    pub fn from_transcript(
        character_name: impl Into<String>,
        transcript: &str,
        capacity: usize,
    ) -> Self {
        let mut log = Self::new(character_name, capacity);
        let reply_prefix = format!("{}:", log.character_name);

        for raw in split_transcript(transcript) {
            let mut user = Vec::new();
            let mut reply = Vec::new();
            let mut in_reply = false;

            for line in raw.lines() {
                if in_reply {
                    reply.push(line);
                } else if let Some(rest) = line.strip_prefix(&reply_prefix) {
                    in_reply = true;
                    reply.push(rest.trim_start());
                } else {
                    user.push(line.strip_prefix("User:").map_or(line, str::trim_start));
                }
            }

            log.push(user.join("\n"), reply.join("\n"));
        }

        log
    }

    /// Append a completed exchange, evicting the oldest past capacity
    pub fn push(&mut self, user: impl Into<String>, reply: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(HistoryTurn::new(user, reply));
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryTurn> {
        self.turns.iter()
    }

    pub fn character_name(&self) -> &str {
        &self.character_name
    }

    /// The whole log as one transcript
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .map(|t| t.render(&self.character_name))
            .collect()
    }
}

impl HistorySource for ConversationLog {
    fn turns(&self) -> std::result::Result<Vec<String>, SourceError> {
        Ok(self
            .turns
            .iter()
            .map(|t| t.render(&self.character_name))
            .collect())
    }
}

/// Split a transcript into turns; each `User:` line opens a new turn
pub fn split_transcript(transcript: &str) -> Vec<String> {
    let mut turns = Vec::new();
    let mut current = String::new();

    for line in transcript.lines() {
        if line.trim_start().starts_with("User:") && !current.trim().is_empty() {
            turns.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        turns.push(current);
    }

    turns
}

static START_MARKER: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"<start>")
        .case_insensitive(true)
        .build()
        .expect("static regex")
});

static BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").expect("static regex"));

/// Example dialogue from a character card
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardExamples {
    blocks: Vec<String>,
}

impl CardExamples {
    /// Split card example text into blocks on `<START>` markers, or on blank
    /// lines when there are none, substituting `{{char}}` and `{{user}}`.
    pub fn from_card_text(text: &str, character_name: &str, user_name: &str) -> Self {
        let text = text
            .replace("{{char}}", character_name)
            .replace("{{Char}}", character_name)
            .replace("{{user}}", user_name)
            .replace("{{User}}", user_name);

        let pieces: Vec<&str> = if START_MARKER.is_match(&text) {
            START_MARKER.split(&text).collect()
        } else {
            BLANK_LINE.split(&text).collect()
        };

        let blocks = pieces
            .into_iter()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect();

        Self { blocks }
    }

    pub fn blocks(&self) -> &[String] {
        &self.blocks
    }
}

impl ExampleSource for CardExamples {
    fn examples(&self, _query: &str) -> std::result::Result<Vec<String>, SourceError> {
        Ok(self.blocks.clone())
    }
}

/// Drops blank, duplicate and boilerplate chunks, preserving rank order
#[derive(Debug, Clone)]
pub struct ChunkFilter {
    dedup: bool,
    patterns: Vec<Regex>,
}

impl Default for ChunkFilter {
    fn default() -> Self {
        Self {
            dedup: true,
            patterns: Vec::new(),
        }
    }
}

impl ChunkFilter {
    pub fn from_config(config: &RetrievalConfig) -> Result<Self> {
        let patterns = config
            .low_quality_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ContextError::Configuration(format!("invalid pattern {:?}: {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dedup: config.dedup,
            patterns,
        })
    }

    pub fn is_low_quality(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }

    pub fn filter(&self, chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
        let before = chunks.len();
        let mut seen = HashSet::new();

        let kept: Vec<RetrievedChunk> = chunks
            .into_iter()
            .filter_map(|mut chunk| {
                let trimmed = chunk.text.trim();
                if trimmed.is_empty() || self.is_low_quality(trimmed) {
                    return None;
                }
                if self.dedup && !seen.insert(fingerprint(trimmed)) {
                    return None;
                }
                chunk.text = trimmed.to_string();
                Some(chunk)
            })
            .collect();

        if kept.len() < before {
            debug!(before, after = kept.len(), "Filtered retrieved chunks");
        }

        kept
    }
}

/// SHA-256 hex digest used for duplicate detection
pub fn fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_log_evicts_oldest() {
        let mut log = ConversationLog::new("Mara", 2);
        log.push("one", "1");
        log.push("two", "2");
        log.push("three", "3");

        assert_eq!(log.len(), 2);
        let turns = log.turns().unwrap();
        assert_eq!(turns[0], "User: two\nMara: 2\n");
        assert_eq!(turns[1], "User: three\nMara: 3\n");
    }

    #[test]
    fn test_conversation_log_zero_capacity() {
        let mut log = ConversationLog::new("Mara", 0);
        log.push("one", "1");
        assert!(log.is_empty());
    }

    #[test]
    fn test_split_transcript() {
        let transcript = "User: hi\nMara: hello\nUser: how are you?\nMara: well.\nStill well.\n";
        let turns = split_transcript(transcript);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], "User: hi\nMara: hello\n");
        assert_eq!(turns[1], "User: how are you?\nMara: well.\nStill well.\n");
    }

    #[test]
    fn test_log_from_transcript_round_trips() {
        let transcript = "User: hi\nMara: hello\nUser: how are you?\nMara: well.\nStill well.\n";
        let log = ConversationLog::from_transcript("Mara", transcript, 8);

        assert_eq!(log.len(), 2);
        let last = log.iter().last().unwrap();
        assert_eq!(last.user, "how are you?");
        assert_eq!(last.reply, "well.\nStill well.");
        assert_eq!(log.transcript(), transcript);
    }

    #[test]
    fn test_card_examples_split_on_start() {
        let text = "<START>\n{{user}}: hi\n{{char}}: *nods*\n<START>\n{{user}}: bye\n{{char}}: farewell";
        let examples = CardExamples::from_card_text(text, "Mara", "Ash");

        assert_eq!(examples.blocks().len(), 2);
        assert_eq!(examples.blocks()[0], "Ash: hi\nMara: *nods*");
        assert_eq!(examples.examples("ignored").unwrap().len(), 2);
    }

    #[test]
    fn test_card_examples_split_on_blank_lines() {
        let text = "Mara: first\n\n  \nMara: second\n\nMara: third";
        let examples = CardExamples::from_card_text(text, "Mara", "User");
        assert_eq!(examples.blocks(), ["Mara: first", "Mara: second", "Mara: third"]);
    }

    #[test]
    fn test_chunk_filter_dedup_and_patterns() {
        let filter = ChunkFilter::from_config(&RetrievalConfig {
            dedup: true,
            low_quality_patterns: vec![r"\bsits before user\b".to_string()],
        })
        .unwrap();

        let chunks = vec![
            RetrievedChunk::new("The lighthouse stands on the cliff."),
            RetrievedChunk::new("  "),
            RetrievedChunk::new("  The lighthouse stands on the cliff.  "),
            RetrievedChunk::new("Mara SITS BEFORE USER in silence."),
            RetrievedChunk::new("The lamp burns whale oil.").with_score(0.4),
        ];

        let kept = filter.filter(chunks);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].text, "The lighthouse stands on the cliff.");
        assert_eq!(kept[1].text, "The lamp burns whale oil.");
        assert_eq!(kept[1].score, Some(0.4));
    }

    #[test]
    fn test_chunk_filter_without_dedup() {
        let filter = ChunkFilter::from_config(&RetrievalConfig {
            dedup: false,
            low_quality_patterns: Vec::new(),
        })
        .unwrap();
        let kept = filter.filter(vec![RetrievedChunk::new("same"), RetrievedChunk::new("same")]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
        assert_eq!(fingerprint("abc").len(), 64);
    }
}
