use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::records::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub id: ThreadId,
    pub owner_user_id: UserId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted thread message. Append-only; ordering is creation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

const TITLE_MAX_CHARS: usize = 60;

/// Derives a thread title from the first user message. Generated once and
/// then frozen; truncation respects word boundaries where possible.
pub fn title_from_first_message(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "New conversation".to_string();
    }
    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return collapsed;
    }

    let truncated: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
    let cut = truncated.rfind(' ').filter(|index| *index >= TITLE_MAX_CHARS / 2);
    let base = match cut {
        Some(index) => &truncated[..index],
        None => truncated.as_str(),
    };
    format!("{}…", base.trim_end())
}

#[cfg(test)]
mod tests {
    use super::{title_from_first_message, MessageRole};

    #[test]
    fn message_role_round_trips_from_storage_encoding() {
        for role in [MessageRole::User, MessageRole::Assistant, MessageRole::System] {
            assert_eq!(MessageRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(MessageRole::parse("bot"), None);
    }

    #[test]
    fn short_first_message_becomes_title_verbatim() {
        assert_eq!(title_from_first_message("What deals close this month?"), "What deals close this month?");
    }

    #[test]
    fn long_first_message_is_truncated_at_a_word_boundary() {
        let text = "Please give me a complete rundown of every open deal we have with Acme Corporation including stages";
        let title = title_from_first_message(text);
        assert!(title.chars().count() <= 61, "title too long: {title}");
        assert!(title.ends_with('…'));
        assert!(!title.contains("  "));
    }

    #[test]
    fn blank_first_message_falls_back_to_default_title() {
        assert_eq!(title_from_first_message("   \n"), "New conversation");
    }
}
