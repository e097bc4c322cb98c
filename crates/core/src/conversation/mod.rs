//! Conversation windowing and thread health.
//!
//! Long dialogues are bounded before every model call: recent messages ride
//! along verbatim, everything older is compressed into a single synthetic
//! system message that is never persisted.

use chrono::{DateTime, Duration, Utc};

use crate::domain::thread::{Message, MessageId, MessageRole};

pub mod analysis;

pub use analysis::{ConversationAnalyzer, ConversationContext, EntityMention, HeuristicAnalyzer};

/// Windowing kicks in once a thread reaches this many messages.
pub const WINDOW_THRESHOLD: usize = 15;
/// How many of the newest messages survive verbatim once windowing kicks in.
pub const RECENT_WINDOW: usize = 20;
/// Hard cap on the synthetic summary message, in characters.
pub const SUMMARY_MAX_CHARS: usize = 500;

const INACTIVITY_LIMIT_HOURS: i64 = 24;
const LENGTH_LIMIT: usize = 50;
const QUESTION_WINDOW: usize = 10;
const QUESTION_BURST: usize = 5;

#[derive(Clone, Debug)]
pub struct ManagedWindow {
    pub messages: Vec<Message>,
    pub context: ConversationContext,
    pub summarized: bool,
    pub summary_text: Option<String>,
}

/// Advisory thread diagnostics; never blocks or alters a turn.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThreadHealth {
    pub needs_attention: bool,
    pub reasons: Vec<String>,
    pub suggestions: Vec<String>,
}

pub struct WindowManager<A = HeuristicAnalyzer> {
    analyzer: A,
}

impl Default for WindowManager<HeuristicAnalyzer> {
    fn default() -> Self {
        Self::new(HeuristicAnalyzer::new())
    }
}

impl<A> WindowManager<A>
where
    A: ConversationAnalyzer,
{
    pub fn new(analyzer: A) -> Self {
        Self { analyzer }
    }

    /// Bounds `messages` for the next model call. Below the threshold the
    /// history passes through untouched; at or above it, only the newest
    /// [`RECENT_WINDOW`] messages survive verbatim and everything older is
    /// folded into one leading synthetic system message.
    pub fn manage(&self, messages: &[Message]) -> ManagedWindow {
        let context = self.analyzer.analyze(messages);

        if messages.len() < WINDOW_THRESHOLD || messages.len() <= RECENT_WINDOW {
            return ManagedWindow {
                messages: messages.to_vec(),
                context,
                summarized: false,
                summary_text: None,
            };
        }

        let split = messages.len() - RECENT_WINDOW;
        let (older, recent) = messages.split_at(split);
        let older_context = self.analyzer.analyze(older);
        let summary = build_summary(&older_context);

        let mut windowed = Vec::with_capacity(RECENT_WINDOW + 1);
        windowed.push(synthetic_summary_message(older, &summary));
        windowed.extend_from_slice(recent);

        ManagedWindow { messages: windowed, context, summarized: true, summary_text: Some(summary) }
    }

    pub fn health(&self, messages: &[Message]) -> ThreadHealth {
        self.health_at(messages, Utc::now())
    }

    pub fn health_at(&self, messages: &[Message], now: DateTime<Utc>) -> ThreadHealth {
        let mut health = ThreadHealth::default();
        let Some(last) = messages.last() else {
            return health;
        };

        if now - last.created_at > Duration::hours(INACTIVITY_LIMIT_HOURS) {
            health.reasons.push("no activity in over 24 hours".to_string());
            health.suggestions.push("consider a follow-up or closing the thread".to_string());
        }

        if messages.len() > LENGTH_LIMIT {
            health.reasons.push(format!("thread has {} messages", messages.len()));
            health.suggestions.push("start a fresh thread for new topics".to_string());
        }

        let unanswered = unanswered_questions(messages);
        if unanswered >= QUESTION_BURST {
            health
                .reasons
                .push(format!("{unanswered} unanswered questions in the recent window"));
            health.suggestions.push("answer pending questions before continuing".to_string());
        }

        health.needs_attention = !health.reasons.is_empty();
        health
    }
}

fn unanswered_questions(messages: &[Message]) -> usize {
    let start = messages.len().saturating_sub(QUESTION_WINDOW);
    let window = &messages[start..];

    window
        .iter()
        .enumerate()
        .filter(|(index, message)| {
            message.role == MessageRole::User
                && message.content.contains('?')
                && window
                    .get(index + 1)
                    .map(|next| next.role != MessageRole::Assistant)
                    .unwrap_or(true)
        })
        .count()
}

fn build_summary(context: &ConversationContext) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !context.key_topics.is_empty() {
        parts.push(format!("Topics discussed: {}.", context.key_topics.join(", ")));
    }
    if !context.entity_mentions.is_empty() {
        let names: Vec<String> = context
            .entity_mentions
            .iter()
            .map(|mention| format!("{} ({})", mention.text, mention.kind.as_str()))
            .collect();
        parts.push(format!("Mentioned: {}.", names.join(", ")));
    }
    parts.push(format!(
        "{} earlier messages ({} from the user).",
        context.message_count, context.user_message_count
    ));

    let summary = format!("Previous conversation summary: {}", parts.join(" "));
    truncate_chars(&summary, SUMMARY_MAX_CHARS)
}

fn synthetic_summary_message(older: &[Message], summary: &str) -> Message {
    // Anchored to the newest compressed message so ordering stays sane.
    // This message exists only in the outgoing window, never in storage.
    let anchor = older.last();
    Message {
        id: MessageId("window-summary".to_string()),
        thread_id: older
            .first()
            .map(|message| message.thread_id.clone())
            .unwrap_or_else(|| crate::domain::thread::ThreadId(String::new())),
        role: MessageRole::System,
        content: summary.to_string(),
        created_at: anchor.map(|message| message.created_at).unwrap_or_else(Utc::now),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars.saturating_sub(1)).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{ManagedWindow, ThreadHealth, WindowManager, RECENT_WINDOW, SUMMARY_MAX_CHARS};
    use crate::domain::thread::{Message, MessageId, MessageRole, ThreadId};

    fn thread_messages(count: usize) -> Vec<Message> {
        let start = Utc::now() - Duration::minutes(count as i64);
        (0..count)
            .map(|index| Message {
                id: MessageId(format!("m-{index}")),
                thread_id: ThreadId("t-1".to_string()),
                role: if index % 2 == 0 { MessageRole::User } else { MessageRole::Assistant },
                content: format!("message number {index} about the pipeline"),
                created_at: start + Duration::minutes(index as i64),
            })
            .collect()
    }

    #[test]
    fn short_thread_passes_through_unmodified() {
        let manager = WindowManager::default();
        let messages = thread_messages(14);

        let window = manager.manage(&messages);
        assert!(!window.summarized);
        assert_eq!(window.messages, messages);
        assert!(window.summary_text.is_none());
    }

    #[test]
    fn thread_at_threshold_but_under_window_is_untouched() {
        let manager = WindowManager::default();
        let messages = thread_messages(16);

        let window = manager.manage(&messages);
        // 16 messages all fit in the 20-message verbatim window, so there
        // is nothing older to compress yet.
        assert!(!window.summarized);
        assert_eq!(window.messages.len(), 16);
    }

    #[test]
    fn long_thread_keeps_newest_twenty_plus_leading_summary() {
        let manager = WindowManager::default();
        let messages = thread_messages(36);

        let window = manager.manage(&messages);
        assert!(window.summarized);
        assert_eq!(window.messages.len(), RECENT_WINDOW + 1);

        let summary = &window.messages[0];
        assert_eq!(summary.role, MessageRole::System);
        assert!(summary.content.starts_with("Previous conversation summary:"));
        assert!(summary.content.chars().count() <= SUMMARY_MAX_CHARS);

        // The verbatim tail is exactly the newest twenty, in order.
        assert_eq!(window.messages[1], messages[16]);
        assert_eq!(window.messages[RECENT_WINDOW], messages[35]);
    }

    #[test]
    fn summary_stays_under_the_cap_for_noisy_history() {
        let manager = WindowManager::default();
        let mut messages = thread_messages(40);
        for (index, message) in messages.iter_mut().enumerate() {
            message.content = format!(
                "Call Contact{index} Surname{index} about deal Deal{index} Codename{index} regarding renewals renewals renewals"
            );
        }

        let ManagedWindow { summary_text, .. } = manager.manage(&messages);
        let summary = summary_text.expect("summary present");
        assert!(summary.chars().count() <= SUMMARY_MAX_CHARS);
    }

    #[test]
    fn quiet_healthy_thread_reports_nothing() {
        let manager = WindowManager::default();
        let messages = thread_messages(6);
        let health = manager.health_at(&messages, Utc::now());
        assert_eq!(health, ThreadHealth::default());
    }

    #[test]
    fn stale_thread_flags_inactivity() {
        let manager = WindowManager::default();
        let messages = thread_messages(6);
        let later = Utc::now() + Duration::hours(30);

        let health = manager.health_at(&messages, later);
        assert!(health.needs_attention);
        assert!(health.reasons.iter().any(|reason| reason.contains("24 hours")));
    }

    #[test]
    fn oversized_thread_flags_length() {
        let manager = WindowManager::default();
        let messages = thread_messages(55);
        let health = manager.health_at(&messages, Utc::now());
        assert!(health.needs_attention);
        assert!(health.reasons.iter().any(|reason| reason.contains("55 messages")));
    }

    #[test]
    fn question_burst_flags_attention() {
        let manager = WindowManager::default();
        let mut messages = thread_messages(4);
        let base = Utc::now();
        for index in 0..5 {
            messages.push(Message {
                id: MessageId(format!("q-{index}")),
                thread_id: ThreadId("t-1".to_string()),
                role: MessageRole::User,
                content: format!("Question {index}: any update?"),
                created_at: base + Duration::seconds(index as i64),
            });
        }

        let health = manager.health_at(&messages, Utc::now());
        assert!(health.needs_attention);
        assert!(health.reasons.iter().any(|reason| reason.contains("unanswered")));
    }
}
