//! System prompt assembly for a chat turn.

use atrium_core::domain::action::ActionType;
use atrium_core::domain::embedding::RetrievalResult;

const INSTRUCTIONS: &str = "\
You are a CRM assistant. You answer questions about the user's companies, \
contacts, deals, tasks, and notes, and you can propose record changes.

Reply with exactly one JSON object inside a fenced ```json block.

To answer a question, emit:
{\"type\": \"text\", \"content\": \"...\", \"citations\": [{\"id\": \"...\", \"type\": \"deal\"}]}
Cite only records listed in the evidence below, by their exact id and type.

To propose a change, emit:
{\"type\": \"action_proposal\", \"actionType\": \"...\", \"payload\": {...}, \
\"summary\": \"...\", \"confirmationMessage\": \"...\"}
Never claim a change has been made. Every proposal waits for explicit user \
confirmation before anything is written.";

/// Builds the per-turn system prompt: fixed instructions, the closed action
/// vocabulary, and the retrieved evidence the model may cite.
pub fn system_prompt(evidence: &[RetrievalResult]) -> String {
    let mut prompt = String::from(INSTRUCTIONS);

    prompt.push_str("\n\nAvailable actionType values:\n");
    for action_type in ActionType::ALL {
        prompt.push_str("- ");
        prompt.push_str(action_type.as_str());
        prompt.push('\n');
    }

    if evidence.is_empty() {
        prompt.push_str("\nNo CRM records matched this request. Say so rather than guessing.\n");
    } else {
        prompt.push_str("\nRelevant CRM records:\n");
        for result in evidence {
            prompt.push_str(&format!(
                "[{} {}] {}\n",
                result.source_type.as_str(),
                result.source_id,
                result.content_text.replace('\n', " | "),
            ));
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use atrium_core::domain::embedding::RetrievalResult;
    use atrium_core::domain::records::SourceType;

    use super::system_prompt;

    #[test]
    fn empty_evidence_tells_the_model_not_to_guess() {
        let prompt = system_prompt(&[]);
        assert!(prompt.contains("No CRM records matched"));
        assert!(prompt.contains("- bulk_delete_tasks"));
    }

    #[test]
    fn evidence_lines_carry_id_and_flattened_text() {
        let evidence = vec![RetrievalResult {
            source_type: SourceType::Deal,
            source_id: "deal-1".to_string(),
            score: 0.9,
            content_text: "Deal: Acme renewal\nStage: proposal".to_string(),
            entity: None,
        }];

        let prompt = system_prompt(&evidence);
        assert!(prompt.contains("[deal deal-1] Deal: Acme renewal | Stage: proposal"));
    }
}
