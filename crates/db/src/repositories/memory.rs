//! In-memory repository implementations backing unit tests in downstream
//! crates. Same contracts as the SQL implementations, including owner
//! scoping and the CAS transition.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use atrium_core::domain::action::ActionProposal;
use atrium_core::domain::action::ActionProposalId;
use atrium_core::domain::embedding::DocumentEmbedding;
use atrium_core::domain::records::{
    Company, CompanyId, Contact, ContactId, Deal, DealId, DealStage, Note, NoteId, SourceType,
    Task, TaskId, TaskStatus, UserId,
};
use atrium_core::domain::thread::{ConversationThread, Message, ThreadId};

use super::{
    ActionRepository, EmbeddingRepository, RecordRepository, RepositoryError, StatusTransition,
    ThreadRepository,
};

#[derive(Default)]
pub struct InMemoryRecordRepository {
    companies: RwLock<HashMap<String, Company>>,
    contacts: RwLock<HashMap<String, Contact>>,
    deals: RwLock<HashMap<String, Deal>>,
    tasks: RwLock<HashMap<String, Task>>,
    notes: RwLock<HashMap<String, Note>>,
}

#[async_trait::async_trait]
impl RecordRepository for InMemoryRecordRepository {
    async fn find_company(
        &self,
        owner: &UserId,
        id: &CompanyId,
    ) -> Result<Option<Company>, RepositoryError> {
        let companies = self.companies.read().await;
        Ok(companies.get(&id.0).filter(|company| company.owner_user_id == *owner).cloned())
    }

    async fn save_company(&self, company: Company) -> Result<(), RepositoryError> {
        let mut companies = self.companies.write().await;
        companies.insert(company.id.0.clone(), company);
        Ok(())
    }

    async fn delete_company(
        &self,
        owner: &UserId,
        id: &CompanyId,
    ) -> Result<bool, RepositoryError> {
        let mut companies = self.companies.write().await;
        let owned = companies
            .get(&id.0)
            .map(|company| company.owner_user_id == *owner)
            .unwrap_or(false);
        if owned {
            companies.remove(&id.0);
        }
        Ok(owned)
    }

    async fn find_contact(
        &self,
        owner: &UserId,
        id: &ContactId,
    ) -> Result<Option<Contact>, RepositoryError> {
        let contacts = self.contacts.read().await;
        Ok(contacts.get(&id.0).filter(|contact| contact.owner_user_id == *owner).cloned())
    }

    async fn save_contact(&self, contact: Contact) -> Result<(), RepositoryError> {
        let mut contacts = self.contacts.write().await;
        contacts.insert(contact.id.0.clone(), contact);
        Ok(())
    }

    async fn delete_contact(
        &self,
        owner: &UserId,
        id: &ContactId,
    ) -> Result<bool, RepositoryError> {
        let mut contacts = self.contacts.write().await;
        let owned = contacts
            .get(&id.0)
            .map(|contact| contact.owner_user_id == *owner)
            .unwrap_or(false);
        if owned {
            contacts.remove(&id.0);
        }
        Ok(owned)
    }

    async fn find_deal(
        &self,
        owner: &UserId,
        id: &DealId,
    ) -> Result<Option<Deal>, RepositoryError> {
        let deals = self.deals.read().await;
        Ok(deals.get(&id.0).filter(|deal| deal.owner_user_id == *owner).cloned())
    }

    async fn save_deal(&self, deal: Deal) -> Result<(), RepositoryError> {
        let mut deals = self.deals.write().await;
        deals.insert(deal.id.0.clone(), deal);
        Ok(())
    }

    async fn delete_deal(&self, owner: &UserId, id: &DealId) -> Result<bool, RepositoryError> {
        let mut deals = self.deals.write().await;
        let owned = deals.get(&id.0).map(|deal| deal.owner_user_id == *owner).unwrap_or(false);
        if owned {
            deals.remove(&id.0);
        }
        Ok(owned)
    }

    async fn find_task(
        &self,
        owner: &UserId,
        id: &TaskId,
    ) -> Result<Option<Task>, RepositoryError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(&id.0).filter(|task| task.owner_user_id == *owner).cloned())
    }

    async fn save_task(&self, task: Task) -> Result<(), RepositoryError> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id.0.clone(), task);
        Ok(())
    }

    async fn delete_task(&self, owner: &UserId, id: &TaskId) -> Result<bool, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        let owned = tasks.get(&id.0).map(|task| task.owner_user_id == *owner).unwrap_or(false);
        if owned {
            tasks.remove(&id.0);
        }
        Ok(owned)
    }

    async fn update_task_statuses(
        &self,
        owner: &UserId,
        ids: &[TaskId],
        status: TaskStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        let mut changed = 0u64;
        for id in ids {
            if let Some(task) = tasks.get_mut(&id.0) {
                if task.owner_user_id == *owner {
                    task.status = status;
                    task.updated_at = updated_at;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn delete_tasks(&self, owner: &UserId, ids: &[TaskId]) -> Result<u64, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        let mut removed = 0u64;
        for id in ids {
            let owned =
                tasks.get(&id.0).map(|task| task.owner_user_id == *owner).unwrap_or(false);
            if owned {
                tasks.remove(&id.0);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn find_note(
        &self,
        owner: &UserId,
        id: &NoteId,
    ) -> Result<Option<Note>, RepositoryError> {
        let notes = self.notes.read().await;
        Ok(notes.get(&id.0).filter(|note| note.owner_user_id == *owner).cloned())
    }

    async fn save_note(&self, note: Note) -> Result<(), RepositoryError> {
        let mut notes = self.notes.write().await;
        notes.insert(note.id.0.clone(), note);
        Ok(())
    }

    async fn delete_note(&self, owner: &UserId, id: &NoteId) -> Result<bool, RepositoryError> {
        let mut notes = self.notes.write().await;
        let owned = notes.get(&id.0).map(|note| note.owner_user_id == *owner).unwrap_or(false);
        if owned {
            notes.remove(&id.0);
        }
        Ok(owned)
    }

    async fn update_deal_stages(
        &self,
        owner: &UserId,
        ids: &[DealId],
        stage: DealStage,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut deals = self.deals.write().await;
        let mut changed = 0u64;
        for id in ids {
            if let Some(deal) = deals.get_mut(&id.0) {
                if deal.owner_user_id == *owner {
                    deal.stage = stage;
                    deal.updated_at = updated_at;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}

#[derive(Default)]
pub struct InMemoryEmbeddingRepository {
    documents: RwLock<HashMap<(SourceType, String), DocumentEmbedding>>,
}

#[async_trait::async_trait]
impl EmbeddingRepository for InMemoryEmbeddingRepository {
    async fn upsert(&self, document: DocumentEmbedding) -> Result<(), RepositoryError> {
        let mut documents = self.documents.write().await;
        documents.insert((document.source_type, document.source_id.clone()), document);
        Ok(())
    }

    async fn delete(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<bool, RepositoryError> {
        let mut documents = self.documents.write().await;
        Ok(documents.remove(&(source_type, source_id.to_string())).is_some())
    }

    async fn list_for_owner(
        &self,
        owner: &UserId,
    ) -> Result<Vec<DocumentEmbedding>, RepositoryError> {
        let documents = self.documents.read().await;
        let mut owned: Vec<DocumentEmbedding> = documents
            .values()
            .filter(|document| document.owner_user_id == *owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(owned)
    }

    async fn keyword_search(
        &self,
        owner: &UserId,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<DocumentEmbedding>, RepositoryError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let lowered: Vec<String> = terms.iter().map(|term| term.to_lowercase()).collect();

        let documents = self.documents.read().await;
        let mut hits: Vec<DocumentEmbedding> = documents
            .values()
            .filter(|document| {
                document.owner_user_id == *owner && {
                    let text = document.content_text.to_lowercase();
                    lowered.iter().any(|term| text.contains(term.as_str()))
                }
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[derive(Default)]
pub struct InMemoryThreadRepository {
    threads: RwLock<HashMap<String, ConversationThread>>,
    messages: RwLock<Vec<Message>>,
}

#[async_trait::async_trait]
impl ThreadRepository for InMemoryThreadRepository {
    async fn find_thread(
        &self,
        owner: &UserId,
        id: &ThreadId,
    ) -> Result<Option<ConversationThread>, RepositoryError> {
        let threads = self.threads.read().await;
        Ok(threads.get(&id.0).filter(|thread| thread.owner_user_id == *owner).cloned())
    }

    async fn save_thread(&self, thread: ConversationThread) -> Result<(), RepositoryError> {
        let mut threads = self.threads.write().await;
        threads.insert(thread.id.0.clone(), thread);
        Ok(())
    }

    async fn list_threads(
        &self,
        owner: &UserId,
    ) -> Result<Vec<ConversationThread>, RepositoryError> {
        let threads = self.threads.read().await;
        let mut owned: Vec<ConversationThread> =
            threads.values().filter(|thread| thread.owner_user_id == *owner).cloned().collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(owned)
    }

    async fn append_message(&self, message: Message) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        messages.push(message);
        Ok(())
    }

    async fn list_messages(&self, thread_id: &ThreadId) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut in_thread: Vec<Message> =
            messages.iter().filter(|message| message.thread_id == *thread_id).cloned().collect();
        in_thread.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(in_thread)
    }
}

/// Mirrors the SQL repository's join against thread ownership, so the
/// in-memory variant needs the thread store it shares with the test.
pub struct InMemoryActionRepository {
    threads: std::sync::Arc<InMemoryThreadRepository>,
    proposals: RwLock<HashMap<String, ActionProposal>>,
}

impl InMemoryActionRepository {
    pub fn new(threads: std::sync::Arc<InMemoryThreadRepository>) -> Self {
        Self { threads, proposals: RwLock::new(HashMap::new()) }
    }
}

#[async_trait::async_trait]
impl ActionRepository for InMemoryActionRepository {
    async fn find_for_owner(
        &self,
        owner: &UserId,
        id: &ActionProposalId,
    ) -> Result<Option<ActionProposal>, RepositoryError> {
        let proposals = self.proposals.read().await;
        let Some(proposal) = proposals.get(&id.0).cloned() else {
            return Ok(None);
        };
        let thread = self.threads.find_thread(owner, &proposal.thread_id).await?;
        Ok(thread.map(|_| proposal))
    }

    async fn save(&self, proposal: ActionProposal) -> Result<(), RepositoryError> {
        let mut proposals = self.proposals.write().await;
        proposals.insert(proposal.id.0.clone(), proposal);
        Ok(())
    }

    async fn transition_status(&self, update: StatusTransition) -> Result<bool, RepositoryError> {
        let mut proposals = self.proposals.write().await;
        let Some(proposal) = proposals.get_mut(&update.id.0) else {
            return Ok(false);
        };
        if proposal.status != update.from {
            return Ok(false);
        }
        proposal.status = update.to;
        proposal.error_msg = update.error_msg;
        proposal.executed_at = update.executed_at;
        proposal.updated_at = update.updated_at;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;

    use atrium_core::domain::action::{
        ActionProposal, ActionProposalId, ActionStatus, ActionType,
    };
    use atrium_core::domain::records::UserId;
    use atrium_core::domain::thread::{ConversationThread, ThreadId};

    use crate::repositories::{
        ActionRepository, InMemoryActionRepository, InMemoryThreadRepository, StatusTransition,
        ThreadRepository,
    };

    #[tokio::test]
    async fn in_memory_cas_matches_sql_semantics() {
        let threads = Arc::new(InMemoryThreadRepository::default());
        threads
            .save_thread(ConversationThread {
                id: ThreadId("thread-1".to_string()),
                owner_user_id: UserId("user-1".to_string()),
                title: "t".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .expect("thread");

        let repo = InMemoryActionRepository::new(threads);
        repo.save(ActionProposal {
            id: ActionProposalId("action-1".to_string()),
            thread_id: ThreadId("thread-1".to_string()),
            action_type: ActionType::CreateNote,
            payload: json!({"content": "note body"}),
            status: ActionStatus::Proposed,
            error_msg: None,
            executed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .expect("save");

        let transition = StatusTransition {
            id: ActionProposalId("action-1".to_string()),
            from: ActionStatus::Proposed,
            to: ActionStatus::Cancelled,
            error_msg: None,
            executed_at: None,
            updated_at: Utc::now(),
        };
        assert!(repo.transition_status(transition.clone()).await.expect("first"));
        assert!(!repo.transition_status(transition).await.expect("second"));

        let owner = UserId("user-1".to_string());
        let proposal = repo
            .find_for_owner(&owner, &ActionProposalId("action-1".to_string()))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(proposal.status, ActionStatus::Cancelled);
    }
}
