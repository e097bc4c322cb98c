//! Atrium core - domain model and pure assistant logic
//!
//! This crate holds everything the assistant needs that does not touch I/O:
//!
//! - The CRM domain model (companies, contacts, deals, tasks, notes) and the
//!   conversation/action records layered on top of it.
//! - The action vocabulary: every mutation the assistant may propose, its
//!   payload schema, and the validation registry.
//! - The reply parser that turns raw model output into a typed `LlmReply`.
//! - Conversation windowing, summarization, and thread health heuristics.
//! - Layered configuration and the shared error taxonomy.
//!
//! # Safety Principle
//!
//! The language model is strictly a proposer. It never mutates records
//! directly; everything it suggests passes through payload validation here
//! and an explicit user confirmation before any write happens.

pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod reply;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions};
pub use conversation::{ManagedWindow, ThreadHealth, WindowManager};
pub use domain::action::{ActionProposal, ActionProposalId, ActionStatus, ActionType};
pub use domain::embedding::{Citation, DocumentEmbedding, EntityDetails, RetrievalResult};
pub use domain::records::{
    Company, CompanyId, Contact, ContactId, Deal, DealId, DealStage, Note, NoteId, RelatedRef,
    SourceType, Task, TaskId, TaskStatus, UserId,
};
pub use domain::thread::{ConversationThread, Message, MessageId, MessageRole, ThreadId};
pub use errors::DomainError;
pub use reply::{
    parse_reply, strip_reply_markup, validate_payload, ActionPayload, CitationRef, LlmReply,
    PayloadError,
};
