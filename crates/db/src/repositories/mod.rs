use async_trait::async_trait;
use thiserror::Error;

use atrium_core::domain::action::{ActionProposal, ActionProposalId, ActionStatus};
use atrium_core::domain::embedding::DocumentEmbedding;
use atrium_core::domain::records::{
    Company, CompanyId, Contact, ContactId, Deal, DealId, Note, NoteId, SourceType, Task, TaskId,
    UserId,
};
use atrium_core::domain::thread::{ConversationThread, Message, ThreadId};
use chrono::{DateTime, Utc};

pub mod actions;
pub mod embeddings;
pub mod memory;
pub mod records;
pub mod threads;

pub use actions::SqlActionRepository;
pub use embeddings::SqlEmbeddingRepository;
pub use memory::{
    InMemoryActionRepository, InMemoryEmbeddingRepository, InMemoryRecordRepository,
    InMemoryThreadRepository,
};
pub use records::SqlRecordRepository;
pub use threads::SqlThreadRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Storage for the five CRM record kinds. Every read and mutation is
/// owner-scoped: an id belonging to another owner behaves exactly like an id
/// that does not exist.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn find_company(
        &self,
        owner: &UserId,
        id: &CompanyId,
    ) -> Result<Option<Company>, RepositoryError>;
    async fn save_company(&self, company: Company) -> Result<(), RepositoryError>;
    async fn delete_company(&self, owner: &UserId, id: &CompanyId)
        -> Result<bool, RepositoryError>;

    async fn find_contact(
        &self,
        owner: &UserId,
        id: &ContactId,
    ) -> Result<Option<Contact>, RepositoryError>;
    async fn save_contact(&self, contact: Contact) -> Result<(), RepositoryError>;
    async fn delete_contact(&self, owner: &UserId, id: &ContactId)
        -> Result<bool, RepositoryError>;

    async fn find_deal(&self, owner: &UserId, id: &DealId)
        -> Result<Option<Deal>, RepositoryError>;
    async fn save_deal(&self, deal: Deal) -> Result<(), RepositoryError>;
    async fn delete_deal(&self, owner: &UserId, id: &DealId) -> Result<bool, RepositoryError>;

    async fn find_task(&self, owner: &UserId, id: &TaskId)
        -> Result<Option<Task>, RepositoryError>;
    async fn save_task(&self, task: Task) -> Result<(), RepositoryError>;
    async fn delete_task(&self, owner: &UserId, id: &TaskId) -> Result<bool, RepositoryError>;
    /// Sets `status` on every task in `ids` that the owner holds, in one
    /// statement. Returns how many rows changed; callers enforce the
    /// all-or-nothing precondition before calling.
    async fn update_task_statuses(
        &self,
        owner: &UserId,
        ids: &[TaskId],
        status: atrium_core::domain::records::TaskStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
    async fn delete_tasks(&self, owner: &UserId, ids: &[TaskId]) -> Result<u64, RepositoryError>;

    async fn find_note(&self, owner: &UserId, id: &NoteId)
        -> Result<Option<Note>, RepositoryError>;
    async fn save_note(&self, note: Note) -> Result<(), RepositoryError>;
    async fn delete_note(&self, owner: &UserId, id: &NoteId) -> Result<bool, RepositoryError>;

    async fn update_deal_stages(
        &self,
        owner: &UserId,
        ids: &[DealId],
        stage: atrium_core::domain::records::DealStage,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}

/// The retrieval store. Vectors are written by the indexing pipeline and read
/// in bulk by the retrieval engine, which scores in process.
#[async_trait]
pub trait EmbeddingRepository: Send + Sync {
    async fn upsert(&self, document: DocumentEmbedding) -> Result<(), RepositoryError>;
    async fn delete(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<bool, RepositoryError>;
    async fn list_for_owner(
        &self,
        owner: &UserId,
    ) -> Result<Vec<DocumentEmbedding>, RepositoryError>;
    /// Case-insensitive substring match over `content_text`, newest first.
    async fn keyword_search(
        &self,
        owner: &UserId,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<DocumentEmbedding>, RepositoryError>;
}

#[async_trait]
pub trait ThreadRepository: Send + Sync {
    async fn find_thread(
        &self,
        owner: &UserId,
        id: &ThreadId,
    ) -> Result<Option<ConversationThread>, RepositoryError>;
    async fn save_thread(&self, thread: ConversationThread) -> Result<(), RepositoryError>;
    async fn list_threads(
        &self,
        owner: &UserId,
    ) -> Result<Vec<ConversationThread>, RepositoryError>;
    async fn append_message(&self, message: Message) -> Result<(), RepositoryError>;
    async fn list_messages(&self, thread_id: &ThreadId) -> Result<Vec<Message>, RepositoryError>;
}

#[async_trait]
pub trait ActionRepository: Send + Sync {
    /// Loads a proposal only when its thread belongs to `owner`.
    async fn find_for_owner(
        &self,
        owner: &UserId,
        id: &ActionProposalId,
    ) -> Result<Option<ActionProposal>, RepositoryError>;
    async fn save(&self, proposal: ActionProposal) -> Result<(), RepositoryError>;
    /// Compare-and-set status transition. Returns false when the row was not
    /// in `from` anymore, which callers surface as a conflict.
    async fn transition_status(&self, update: StatusTransition) -> Result<bool, RepositoryError>;
}

/// One CAS update against `action_proposals`.
#[derive(Clone, Debug)]
pub struct StatusTransition {
    pub id: ActionProposalId,
    pub from: ActionStatus,
    pub to: ActionStatus,
    pub error_msg: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
