//! One chat turn, end to end.
//!
//! The orchestrator persists the user message, retrieves evidence, windows
//! the history, streams the model reply as events, and settles the turn by
//! persisting the assistant message and any action proposal. Callers consume
//! a plain event channel; a dropped receiver stops streaming but never loses
//! the persisted transcript.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use atrium_core::conversation::WindowManager;
use atrium_core::domain::action::{ActionProposalId, ActionType};
use atrium_core::domain::embedding::Citation;
use atrium_core::domain::records::UserId;
use atrium_core::domain::thread::{
    title_from_first_message, ConversationThread, Message, MessageId, MessageRole, ThreadId,
};
use atrium_core::reply::{parse_reply, strip_reply_markup, LlmReply};
use atrium_db::repositories::{RepositoryError, ThreadRepository};

use crate::actions::ActionService;
use crate::llm::{ChatMessage, LanguageModelProvider};
use crate::prompt::system_prompt;
use crate::retrieval::RetrievalEngine;

/// Liveness timeout: fires only if the model has produced no delta at all.
/// Once the first delta lands the turn may take as long as it needs.
pub const STREAM_WATCHDOG: Duration = Duration::from_secs(60);

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("conversation thread not found")]
    ThreadNotFound,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub owner: UserId,
    pub thread_id: Option<ThreadId>,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Thinking,
    Searching,
    Generating,
}

/// The streamed turn protocol, one JSON object per event. On success `Done`
/// is the final event; `Error` is terminal and replaces it.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Status {
        phase: TurnPhase,
    },
    Chunk {
        content: String,
    },
    ActionProposal {
        #[serde(rename = "actionId")]
        action_id: ActionProposalId,
        #[serde(rename = "actionType")]
        action_type: ActionType,
        payload: Value,
        summary: String,
        #[serde(rename = "confirmationMessage", skip_serializing_if = "Option::is_none")]
        confirmation_message: Option<String>,
    },
    Citations {
        citations: Vec<Citation>,
    },
    Done {
        #[serde(rename = "threadId")]
        thread_id: ThreadId,
    },
    Error {
        message: String,
    },
}

pub struct Orchestrator {
    provider: Arc<dyn LanguageModelProvider>,
    threads: Arc<dyn ThreadRepository>,
    retrieval: Arc<RetrievalEngine>,
    windows: Arc<WindowManager>,
    actions: Arc<ActionService>,
    watchdog: Duration,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LanguageModelProvider>,
        threads: Arc<dyn ThreadRepository>,
        retrieval: Arc<RetrievalEngine>,
        actions: Arc<ActionService>,
    ) -> Self {
        Self {
            provider,
            threads,
            retrieval,
            windows: Arc::new(WindowManager::default()),
            actions,
            watchdog: STREAM_WATCHDOG,
        }
    }

    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// Starts a turn. The user message is persisted before this returns, so
    /// an abandoned stream still leaves a complete transcript; everything
    /// after that streams through the returned channel.
    pub async fn run(
        self: &Arc<Self>,
        request: TurnRequest,
    ) -> Result<mpsc::Receiver<TurnEvent>, OrchestratorError> {
        let thread = self.resolve_thread(&request).await?;
        self.threads
            .append_message(Message {
                id: MessageId(Uuid::new_v4().to_string()),
                thread_id: thread.id.clone(),
                role: MessageRole::User,
                content: request.message.clone(),
                created_at: Utc::now(),
            })
            .await?;

        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.drive_turn(request, thread, sender).await;
        });
        Ok(receiver)
    }

    async fn resolve_thread(
        &self,
        request: &TurnRequest,
    ) -> Result<ConversationThread, OrchestratorError> {
        let now = Utc::now();
        match &request.thread_id {
            Some(thread_id) => {
                let mut thread = self
                    .threads
                    .find_thread(&request.owner, thread_id)
                    .await?
                    .ok_or(OrchestratorError::ThreadNotFound)?;
                thread.updated_at = now;
                self.threads.save_thread(thread.clone()).await?;
                Ok(thread)
            }
            None => {
                let thread = ConversationThread {
                    id: ThreadId(Uuid::new_v4().to_string()),
                    owner_user_id: request.owner.clone(),
                    title: title_from_first_message(&request.message),
                    created_at: now,
                    updated_at: now,
                };
                self.threads.save_thread(thread.clone()).await?;
                Ok(thread)
            }
        }
    }

    async fn drive_turn(
        &self,
        request: TurnRequest,
        thread: ConversationThread,
        sender: mpsc::Sender<TurnEvent>,
    ) {
        emit(&sender, TurnEvent::Status { phase: TurnPhase::Thinking }).await;

        emit(&sender, TurnEvent::Status { phase: TurnPhase::Searching }).await;
        let evidence = match self.retrieval.retrieve(&request.owner, &request.message).await {
            Ok(evidence) => evidence,
            Err(error) => {
                self.fail(&sender, format!("retrieval failed: {error}")).await;
                return;
            }
        };

        let history = match self.threads.list_messages(&thread.id).await {
            Ok(history) => history,
            Err(error) => {
                self.fail(&sender, format!("could not load thread history: {error}")).await;
                return;
            }
        };
        let window = self.windows.manage(&history);

        let mut outgoing = Vec::with_capacity(window.messages.len() + 1);
        outgoing.push(ChatMessage::new("system", system_prompt(&evidence)));
        outgoing.extend(
            window
                .messages
                .iter()
                .map(|message| ChatMessage::new(message.role.as_str(), message.content.clone())),
        );

        let mut stream = match self.provider.stream_chat(outgoing).await {
            Ok(stream) => stream,
            Err(error) => {
                self.fail(&sender, format!("model request failed: {error}")).await;
                return;
            }
        };

        // Forward deltas until the stream ends. The watchdog guards only the
        // wait for the first delta; a dropped receiver stops forwarding while
        // the full reply is still collected and persisted.
        let mut raw = String::new();
        loop {
            let received = if raw.is_empty() {
                match tokio::time::timeout(self.watchdog, stream.recv()).await {
                    Ok(received) => received,
                    Err(_) => {
                        warn!(
                            event_name = "assistant.orchestrator.watchdog_fired",
                            thread_id = %thread.id.0,
                        );
                        self.fail(&sender, "model response timed out".to_string()).await;
                        return;
                    }
                }
            } else {
                stream.recv().await
            };

            match received {
                Some(Ok(delta)) => {
                    if raw.is_empty() {
                        emit(&sender, TurnEvent::Status { phase: TurnPhase::Generating }).await;
                    }
                    raw.push_str(&delta);
                    emit(&sender, TurnEvent::Chunk { content: delta }).await;
                }
                Some(Err(error)) => {
                    self.fail(&sender, format!("model stream failed: {error}")).await;
                    return;
                }
                None => break,
            }
        }

        self.settle_turn(&request.owner, &thread, raw, &sender).await;
    }

    /// Interprets the finished reply, persists the assistant message, and
    /// emits the closing events.
    async fn settle_turn(
        &self,
        owner: &UserId,
        thread: &ConversationThread,
        raw: String,
        sender: &mpsc::Sender<TurnEvent>,
    ) {
        let mut assistant_text = strip_reply_markup(&raw);

        match parse_reply(&raw) {
            Some(LlmReply::Text { content, citations }) => {
                if assistant_text.is_empty() {
                    assistant_text = content;
                }
                match self.retrieval.resolve_citations(owner, &citations).await {
                    Ok(resolved) if !resolved.is_empty() => {
                        emit(sender, TurnEvent::Citations { citations: resolved }).await;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(
                            event_name = "assistant.orchestrator.citations_failed",
                            error = %error,
                        );
                    }
                }
            }
            Some(LlmReply::ActionProposal {
                action_type,
                payload,
                summary,
                confirmation_message,
            }) => {
                if assistant_text.is_empty() {
                    assistant_text =
                        confirmation_message.clone().unwrap_or_else(|| summary.clone());
                }
                match self.actions.propose(thread.id.clone(), action_type, payload).await {
                    Ok(proposal) => {
                        emit(
                            sender,
                            TurnEvent::ActionProposal {
                                action_id: proposal.id,
                                action_type: proposal.action_type,
                                payload: proposal.payload,
                                summary,
                                confirmation_message,
                            },
                        )
                        .await;
                    }
                    Err(error) => {
                        self.fail(sender, format!("could not record the proposal: {error}"))
                            .await;
                        return;
                    }
                }
            }
            None => {
                if assistant_text.is_empty() {
                    assistant_text = raw.trim().to_string();
                }
            }
        }

        if !assistant_text.is_empty() {
            let persisted = self
                .threads
                .append_message(Message {
                    id: MessageId(Uuid::new_v4().to_string()),
                    thread_id: thread.id.clone(),
                    role: MessageRole::Assistant,
                    content: assistant_text,
                    created_at: Utc::now(),
                })
                .await;
            if let Err(error) = persisted {
                self.fail(sender, format!("could not persist the reply: {error}")).await;
                return;
            }
        }

        info!(event_name = "assistant.orchestrator.turn_done", thread_id = %thread.id.0);
        emit(sender, TurnEvent::Done { thread_id: thread.id.clone() }).await;
    }

    async fn fail(&self, sender: &mpsc::Sender<TurnEvent>, message: String) {
        warn!(event_name = "assistant.orchestrator.turn_failed", error = %message);
        emit(sender, TurnEvent::Error { message }).await;
    }
}

// A closed client makes every remaining send a no-op, never an error.
async fn emit(sender: &mpsc::Sender<TurnEvent>, event: TurnEvent) {
    let _ = sender.send(event).await;
}
