//! Conversation analysis heuristics.
//!
//! Topic and entity extraction here is intentionally cheap and
//! non-authoritative: its only consumer is the summary string for truncated
//! windows. The heuristic sits behind `ConversationAnalyzer` so it can be
//! replaced without touching the window manager's control flow.

use std::collections::BTreeMap;

use regex::Regex;

use crate::domain::records::SourceType;
use crate::domain::thread::{Message, MessageRole};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityMention {
    pub kind: SourceType,
    pub text: String,
}

/// Best-effort digest of a message window. Never a source of truth.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationContext {
    pub key_topics: Vec<String>,
    pub entity_mentions: Vec<EntityMention>,
    pub message_count: usize,
    pub user_message_count: usize,
}

pub trait ConversationAnalyzer: Send + Sync {
    fn analyze(&self, messages: &[Message]) -> ConversationContext;
}

const MAX_TOPICS: usize = 5;
const MIN_TOPIC_LEN: usize = 4;
const MIN_TOPIC_COUNT: usize = 2;

const STOP_WORDS: &[&str] = &[
    "about", "after", "again", "been", "before", "being", "could", "does", "doing", "down",
    "from", "have", "having", "here", "into", "just", "like", "make", "more", "most", "need",
    "only", "other", "over", "please", "should", "show", "some", "tell", "than", "that", "their",
    "them", "then", "there", "these", "they", "this", "want", "what", "when", "where", "which",
    "will", "with", "would", "your",
];

pub struct HeuristicAnalyzer {
    patterns: Vec<(SourceType, Regex)>,
}

impl Default for HeuristicAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        // Title-case spans after a trigger word, capped at three words. A
        // pattern that fails to compile is skipped rather than panicking;
        // the extraction contract is best-effort either way.
        let sources = [
            (
                SourceType::Company,
                r"\b(?:company|Company|at|At|from|From)\s+([A-Z][\w&'-]*(?:\s+[A-Z][\w&'-]*){0,2})",
            ),
            (
                SourceType::Contact,
                r"\b(?:contact|Contact|call|Call|email|Email|meet|Meet)\s+([A-Z][a-z'-]+(?:\s+[A-Z][a-z'-]+)?)",
            ),
            (
                SourceType::Deal,
                r"\b(?:deal|Deal|opportunity|Opportunity)\s+(?:with\s+|for\s+)?([A-Z][\w&'-]*(?:\s+[A-Z][\w&'-]*){0,2})",
            ),
            (SourceType::Task, r#"\b(?:task|Task)\s+(?:to\s+)?"([^"]{1,60})""#),
        ];

        let patterns = sources
            .into_iter()
            .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|regex| (kind, regex)))
            .collect();

        Self { patterns }
    }
}

impl ConversationAnalyzer for HeuristicAnalyzer {
    fn analyze(&self, messages: &[Message]) -> ConversationContext {
        let mut mentions: Vec<EntityMention> = Vec::new();
        let mut term_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut user_message_count = 0usize;

        for message in messages {
            if message.role == MessageRole::User {
                user_message_count += 1;
            }

            for (kind, regex) in &self.patterns {
                for capture in regex.captures_iter(&message.content) {
                    if let Some(matched) = capture.get(1) {
                        let text = matched.as_str().trim().to_string();
                        let duplicate = mentions
                            .iter()
                            .any(|existing| existing.kind == *kind && existing.text == text);
                        if !duplicate {
                            mentions.push(EntityMention { kind: *kind, text });
                        }
                    }
                }
            }

            for token in tokenize(&message.content) {
                *term_counts.entry(token).or_insert(0) += 1;
            }
        }

        let mut frequent: Vec<(String, usize)> = term_counts
            .into_iter()
            .filter(|(_, count)| *count >= MIN_TOPIC_COUNT)
            .collect();
        frequent.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        ConversationContext {
            key_topics: frequent.into_iter().take(MAX_TOPICS).map(|(term, _)| term).collect(),
            entity_mentions: mentions,
            message_count: messages.len(),
            user_message_count,
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|character: char| !character.is_alphanumeric())
        .map(|token| token.to_ascii_lowercase())
        .filter(|token| token.len() >= MIN_TOPIC_LEN && !STOP_WORDS.contains(&token.as_str()))
        .collect()
}
