//! Structured-reply parsing.
//!
//! Model output is free text that may embed one structured object, either a
//! plain-text reply with citations or an action proposal. Extraction is
//! strictly best-effort: anything that fails to decode, names an unknown
//! action type, or carries an invalid payload is treated as plain text.
//! `parse_reply` therefore returns `Option` and never errors.

use serde::Deserialize;
use serde_json::Value;

use crate::domain::action::ActionType;
use crate::domain::records::SourceType;

pub mod payloads;

pub use payloads::{validate_payload, ActionPayload, PayloadError};

/// Reference to a cited record as the model emits it. Resolved against the
/// owner's live records before anything reaches the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CitationRef {
    pub id: String,
    pub source_type: SourceType,
}

/// The two reply shapes the assistant understands, exhaustively matched by
/// the orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub enum LlmReply {
    Text {
        content: String,
        citations: Vec<CitationRef>,
    },
    ActionProposal {
        action_type: ActionType,
        payload: Value,
        summary: String,
        confirmation_message: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplyWire {
    Text {
        content: String,
        #[serde(default)]
        citations: Vec<CitationWire>,
    },
    ActionProposal {
        #[serde(rename = "actionType")]
        action_type: String,
        payload: Value,
        summary: String,
        #[serde(rename = "confirmationMessage")]
        confirmation_message: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct CitationWire {
    id: String,
    #[serde(rename = "type")]
    source_type: String,
}

/// Extracts and decodes the structured reply embedded in raw model output.
///
/// Extraction order: first fenced code block, then the first balanced
/// top-level `{...}` object. Returns `None` for anything that is not a
/// well-formed reply of a known shape.
pub fn parse_reply(raw: &str) -> Option<LlmReply> {
    let candidate = extract_fenced_block(raw).or_else(|| extract_braced_object(raw))?;
    let wire: ReplyWire = serde_json::from_str(candidate).ok()?;

    match wire {
        ReplyWire::Text { content, citations } => {
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return None;
            }
            let citations = citations
                .into_iter()
                .filter_map(|citation| {
                    let source_type = SourceType::parse(&citation.source_type)?;
                    let id = citation.id.trim().to_string();
                    (!id.is_empty()).then_some(CitationRef { id, source_type })
                })
                .collect();
            Some(LlmReply::Text { content: trimmed.to_string(), citations })
        }
        ReplyWire::ActionProposal { action_type, payload, summary, confirmation_message } => {
            let action_type = ActionType::parse(&action_type)?;
            validate_payload(action_type, &payload).ok()?;
            let summary = summary.trim().to_string();
            if summary.is_empty() {
                return None;
            }
            Some(LlmReply::ActionProposal {
                action_type,
                payload,
                summary,
                confirmation_message: confirmation_message
                    .map(|message| message.trim().to_string())
                    .filter(|message| !message.is_empty()),
            })
        }
    }
}

/// Removes the span that carried structured-reply markup from raw output so
/// plain-text rendering never shows the user a JSON blob. Returns the text
/// unchanged when no structured span is present.
pub fn strip_reply_markup(raw: &str) -> String {
    if let Some((start, end)) = fenced_block_span(raw) {
        let mut stripped = String::with_capacity(raw.len());
        stripped.push_str(&raw[..start]);
        stripped.push_str(&raw[end..]);
        return collapse_blank_runs(stripped.trim());
    }
    if let Some(candidate) = extract_braced_object(raw) {
        if serde_json::from_str::<Value>(candidate).is_ok() {
            let stripped = raw.replacen(candidate, "", 1);
            return collapse_blank_runs(stripped.trim());
        }
    }
    raw.trim().to_string()
}

fn extract_fenced_block(raw: &str) -> Option<&str> {
    let (start, end) = fenced_block_span(raw)?;
    let inner = &raw[start..end];
    let body_start = inner.find('\n').map(|index| index + 1).unwrap_or(inner.len());
    let body = inner.get(body_start..)?;
    let body = body.strip_suffix("```")?;
    let body = body.trim();
    (!body.is_empty()).then_some(body)
}

fn fenced_block_span(raw: &str) -> Option<(usize, usize)> {
    let start = raw.find("```")?;
    let after_fence = start + 3;
    let close_offset = raw.get(after_fence..)?.find("```")?;
    let end = after_fence + close_offset + 3;
    Some((start, end))
}

fn extract_braced_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let bytes = raw.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in bytes[start..].iter().enumerate() {
        match byte {
            _ if escaped => escaped = false,
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

fn collapse_blank_runs(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(line.trim_end());
    }
    output
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_reply, strip_reply_markup, LlmReply};
    use crate::domain::action::ActionType;
    use crate::domain::records::SourceType;

    #[test]
    fn prose_without_json_parses_to_none() {
        assert_eq!(parse_reply("Sure, I can help. No JSON here."), None);
    }

    #[test]
    fn fenced_action_proposal_is_extracted() {
        let raw = concat!(
            "I'll set that up for you.\n\n",
            "```json\n",
            "{\"type\":\"action_proposal\",\"actionType\":\"create_task\",",
            "\"payload\":{\"title\":\"Call John\"},",
            "\"summary\":\"Create a task to call John\"}\n",
            "```\n",
        );

        let reply = parse_reply(raw).expect("proposal");
        let LlmReply::ActionProposal { action_type, summary, confirmation_message, .. } = reply
        else {
            panic!("expected an action proposal");
        };
        assert_eq!(action_type, ActionType::CreateTask);
        assert_eq!(summary, "Create a task to call John");
        assert_eq!(confirmation_message, None);
    }

    #[test]
    fn loose_braced_object_is_extracted_when_no_fence_exists() {
        let raw = r#"Here you go: {"type":"text","content":"Acme has 3 open deals.","citations":[{"id":"deal-1","type":"deal"}]}"#;
        let reply = parse_reply(raw).expect("text reply");
        let LlmReply::Text { content, citations } = reply else {
            panic!("expected a text reply");
        };
        assert_eq!(content, "Acme has 3 open deals.");
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].source_type, SourceType::Deal);
    }

    #[test]
    fn fenced_block_is_preferred_over_loose_braces() {
        let raw = concat!(
            "{\"type\":\"text\",\"content\":\"outer\"}\n",
            "```json\n",
            "{\"type\":\"text\",\"content\":\"fenced\"}\n",
            "```",
        );
        // The fenced block appears later in the text but still wins.
        let reply = parse_reply(raw).expect("text reply");
        assert!(matches!(reply, LlmReply::Text { ref content, .. } if content == "fenced"));
    }

    #[test]
    fn proposal_with_invalid_payload_is_plain_text() {
        let raw = concat!(
            "```json\n",
            "{\"type\":\"action_proposal\",\"actionType\":\"create_task\",",
            "\"payload\":{\"description\":\"missing title\"},",
            "\"summary\":\"Create a task\"}\n",
            "```",
        );
        assert_eq!(parse_reply(raw), None);
    }

    #[test]
    fn proposal_with_unknown_action_type_is_plain_text() {
        let raw = r#"{"type":"action_proposal","actionType":"launch_rocket","payload":{},"summary":"boom"}"#;
        assert_eq!(parse_reply(raw), None);
    }

    #[test]
    fn truncated_json_is_plain_text() {
        let raw = r#"{"type":"text","content":"cut off"#;
        assert_eq!(parse_reply(raw), None);
    }

    #[test]
    fn invalid_citations_are_dropped_not_fatal() {
        let raw = json!({
            "type": "text",
            "content": "Two deals found.",
            "citations": [
                {"id": "deal-1", "type": "deal"},
                {"id": "x", "type": "spaceship"},
                {"id": "  ", "type": "deal"}
            ]
        })
        .to_string();

        let reply = parse_reply(&raw).expect("text reply");
        let LlmReply::Text { citations, .. } = reply else {
            panic!("expected text");
        };
        assert_eq!(citations.len(), 1);
    }

    #[test]
    fn strip_removes_the_fenced_block_and_keeps_prose() {
        let raw = "Before text.\n```json\n{\"type\":\"action_proposal\"}\n```\nAfter text.";
        let stripped = strip_reply_markup(raw);
        assert_eq!(stripped, "Before text.\n\nAfter text.");
    }

    #[test]
    fn strip_leaves_plain_prose_untouched() {
        assert_eq!(strip_reply_markup("Just an answer."), "Just an answer.");
    }
}
