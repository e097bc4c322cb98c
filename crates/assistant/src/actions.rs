//! The action proposal state machine and the typed executor.
//!
//! Proposals are persisted at `proposed` and move only through
//! `proposed -> confirmed -> executed|failed` or `proposed -> cancelled`.
//! Every transition is a compare-and-set in storage, so a double-confirm or a
//! confirm racing a cancel loses cleanly instead of executing twice.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use atrium_core::domain::action::{ActionProposal, ActionProposalId, ActionStatus, ActionType};
use atrium_core::domain::records::{
    Company, CompanyId, Contact, ContactId, Deal, DealStage, Note, SourceType, Task, TaskStatus,
    UserId,
};
use atrium_core::domain::thread::ThreadId;
use atrium_core::reply::payloads as payload;
use atrium_core::reply::{validate_payload, ActionPayload, PayloadError};
use atrium_db::repositories::{
    ActionRepository, RecordRepository, RepositoryError, StatusTransition,
};

use crate::embeddings::{
    company_document, contact_document, deal_document, note_document, task_document, IndexJob,
    Indexer,
};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action proposal not found")]
    ProposalNotFound,
    #[error("action is already {0}")]
    AlreadySettled(&'static str),
    #[error("action was modified concurrently")]
    Conflict,
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("{0}")]
    Execution(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ActionError {
    fn missing(kind: &str, id: &str) -> Self {
        Self::Execution(format!("{kind} `{id}` not found"))
    }
}

pub struct ActionService {
    actions: Arc<dyn ActionRepository>,
    records: Arc<dyn RecordRepository>,
    indexer: Arc<dyn Indexer>,
}

impl ActionService {
    pub fn new(
        actions: Arc<dyn ActionRepository>,
        records: Arc<dyn RecordRepository>,
        indexer: Arc<dyn Indexer>,
    ) -> Self {
        Self { actions, records, indexer }
    }

    /// Persists a new proposal in `proposed`. The payload has already passed
    /// validation during reply parsing; it is stored raw and re-validated at
    /// confirm time because records can change in between.
    pub async fn propose(
        &self,
        thread_id: ThreadId,
        action_type: ActionType,
        payload: serde_json::Value,
    ) -> Result<ActionProposal, ActionError> {
        let now = Utc::now();
        let proposal = ActionProposal {
            id: ActionProposalId(Uuid::new_v4().to_string()),
            thread_id,
            action_type,
            payload,
            status: ActionStatus::Proposed,
            error_msg: None,
            executed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.actions.save(proposal.clone()).await?;

        info!(
            event_name = "assistant.actions.proposed",
            action_id = %proposal.id.0,
            action_type = proposal.action_type.as_str(),
        );
        Ok(proposal)
    }

    pub async fn cancel(
        &self,
        owner: &UserId,
        id: &ActionProposalId,
    ) -> Result<ActionProposal, ActionError> {
        let proposal =
            self.actions.find_for_owner(owner, id).await?.ok_or(ActionError::ProposalNotFound)?;
        proposal
            .status
            .transition_to(ActionStatus::Cancelled)
            .map_err(|_| ActionError::AlreadySettled(proposal.status.as_str()))?;

        let moved = self
            .actions
            .transition_status(StatusTransition {
                id: id.clone(),
                from: ActionStatus::Proposed,
                to: ActionStatus::Cancelled,
                error_msg: None,
                executed_at: None,
                updated_at: Utc::now(),
            })
            .await?;
        if !moved {
            return Err(ActionError::Conflict);
        }

        info!(event_name = "assistant.actions.cancelled", action_id = %id.0);
        self.reload(owner, id).await
    }

    /// Confirms and executes a proposal. The confirm CAS is the single gate:
    /// whichever request wins it owns execution, every other concurrent
    /// request observes a conflict.
    pub async fn confirm(
        &self,
        owner: &UserId,
        id: &ActionProposalId,
    ) -> Result<ActionProposal, ActionError> {
        let proposal =
            self.actions.find_for_owner(owner, id).await?.ok_or(ActionError::ProposalNotFound)?;
        proposal
            .status
            .transition_to(ActionStatus::Confirmed)
            .map_err(|_| ActionError::AlreadySettled(proposal.status.as_str()))?;

        let confirmed = self
            .actions
            .transition_status(StatusTransition {
                id: id.clone(),
                from: ActionStatus::Proposed,
                to: ActionStatus::Confirmed,
                error_msg: None,
                executed_at: None,
                updated_at: Utc::now(),
            })
            .await?;
        if !confirmed {
            return Err(ActionError::Conflict);
        }

        let outcome = match validate_payload(proposal.action_type, &proposal.payload) {
            Ok(typed) => self.execute(owner, typed).await,
            Err(error) => Err(ActionError::Payload(error)),
        };

        let (to, error_msg, executed_at) = match &outcome {
            Ok(()) => (ActionStatus::Executed, None, Some(Utc::now())),
            Err(error) => (ActionStatus::Failed, Some(error.to_string()), None),
        };
        self.actions
            .transition_status(StatusTransition {
                id: id.clone(),
                from: ActionStatus::Confirmed,
                to,
                error_msg,
                executed_at,
                updated_at: Utc::now(),
            })
            .await?;

        info!(
            event_name = "assistant.actions.settled",
            action_id = %id.0,
            action_type = proposal.action_type.as_str(),
            status = to.as_str(),
        );
        self.reload(owner, id).await
    }

    async fn reload(
        &self,
        owner: &UserId,
        id: &ActionProposalId,
    ) -> Result<ActionProposal, ActionError> {
        self.actions.find_for_owner(owner, id).await?.ok_or(ActionError::ProposalNotFound)
    }

    async fn execute(&self, owner: &UserId, typed: ActionPayload) -> Result<(), ActionError> {
        match typed {
            ActionPayload::CreateTask(create) => self.create_task(owner, create).await,
            ActionPayload::UpdateTask(update) => self.update_task(owner, update).await,
            ActionPayload::DeleteTask(delete) => {
                let removed = self.records.delete_task(owner, &delete.task_id).await?;
                if !removed {
                    return Err(ActionError::missing("task", &delete.task_id.0));
                }
                self.indexer.schedule(IndexJob::Delete {
                    source_type: SourceType::Task,
                    source_id: delete.task_id.0,
                });
                Ok(())
            }
            ActionPayload::CreateNote(create) => self.create_note(owner, create).await,
            ActionPayload::UpdateNote(update) => self.update_note(owner, update).await,
            ActionPayload::DeleteNote(delete) => {
                let removed = self.records.delete_note(owner, &delete.note_id).await?;
                if !removed {
                    return Err(ActionError::missing("note", &delete.note_id.0));
                }
                self.indexer.schedule(IndexJob::Delete {
                    source_type: SourceType::Note,
                    source_id: delete.note_id.0,
                });
                Ok(())
            }
            ActionPayload::CreateDeal(create) => self.create_deal(owner, create).await,
            ActionPayload::UpdateDeal(update) => self.update_deal(owner, update).await,
            ActionPayload::DeleteDeal(delete) => {
                let removed = self.records.delete_deal(owner, &delete.deal_id).await?;
                if !removed {
                    return Err(ActionError::missing("deal", &delete.deal_id.0));
                }
                self.indexer.schedule(IndexJob::Delete {
                    source_type: SourceType::Deal,
                    source_id: delete.deal_id.0,
                });
                Ok(())
            }
            ActionPayload::UpdateDealStage(update) => {
                let mut deal = self
                    .records
                    .find_deal(owner, &update.deal_id)
                    .await?
                    .ok_or_else(|| ActionError::missing("deal", &update.deal_id.0))?;
                deal.stage = update.stage;
                deal.updated_at = Utc::now();
                self.records.save_deal(deal.clone()).await?;
                self.reindex_deal(owner, &deal).await?;
                Ok(())
            }
            ActionPayload::CreateContact(create) => self.create_contact(owner, create).await,
            ActionPayload::UpdateContact(update) => self.update_contact(owner, update).await,
            ActionPayload::DeleteContact(delete) => {
                let removed = self.records.delete_contact(owner, &delete.contact_id).await?;
                if !removed {
                    return Err(ActionError::missing("contact", &delete.contact_id.0));
                }
                self.indexer.schedule(IndexJob::Delete {
                    source_type: SourceType::Contact,
                    source_id: delete.contact_id.0,
                });
                Ok(())
            }
            ActionPayload::CreateCompany(create) => self.create_company(owner, create).await,
            ActionPayload::UpdateCompany(update) => self.update_company(owner, update).await,
            ActionPayload::DeleteCompany(delete) => {
                let removed = self.records.delete_company(owner, &delete.company_id).await?;
                if !removed {
                    return Err(ActionError::missing("company", &delete.company_id.0));
                }
                self.indexer.schedule(IndexJob::Delete {
                    source_type: SourceType::Company,
                    source_id: delete.company_id.0,
                });
                Ok(())
            }
            ActionPayload::BulkUpdateTaskStatus(bulk) => {
                self.bulk_update_task_status(owner, bulk).await
            }
            ActionPayload::BulkUpdateDealStage(bulk) => {
                self.bulk_update_deal_stage(owner, bulk).await
            }
            ActionPayload::BulkDeleteTasks(bulk) => self.bulk_delete_tasks(owner, bulk).await,
        }
    }

    async fn create_task(
        &self,
        owner: &UserId,
        create: payload::CreateTask,
    ) -> Result<(), ActionError> {
        self.check_related(owner, create.related.as_ref()).await?;

        let now = Utc::now();
        let task = Task {
            id: atrium_core::domain::records::TaskId(Uuid::new_v4().to_string()),
            owner_user_id: owner.clone(),
            title: create.title,
            description: create.description,
            status: TaskStatus::Open,
            due_date: create.due_date,
            related: create.related,
            created_at: now,
            updated_at: now,
        };
        self.records.save_task(task.clone()).await?;
        self.indexer.schedule(IndexJob::Upsert(task_document(&task)));
        Ok(())
    }

    async fn update_task(
        &self,
        owner: &UserId,
        update: payload::UpdateTask,
    ) -> Result<(), ActionError> {
        let mut task = self
            .records
            .find_task(owner, &update.task_id)
            .await?
            .ok_or_else(|| ActionError::missing("task", &update.task_id.0))?;

        if let Some(title) = update.title {
            task.title = title;
        }
        if let Some(description) = update.description {
            task.description = Some(description);
        }
        if let Some(status) = update.status {
            task.status = status;
        }
        if let Some(due_date) = update.due_date {
            task.due_date = Some(due_date);
        }
        task.updated_at = Utc::now();

        self.records.save_task(task.clone()).await?;
        self.indexer.schedule(IndexJob::Upsert(task_document(&task)));
        Ok(())
    }

    async fn create_note(
        &self,
        owner: &UserId,
        create: payload::CreateNote,
    ) -> Result<(), ActionError> {
        self.check_related(owner, create.related.as_ref()).await?;

        let now = Utc::now();
        let note = Note {
            id: atrium_core::domain::records::NoteId(Uuid::new_v4().to_string()),
            owner_user_id: owner.clone(),
            body: create.body,
            related: create.related,
            created_at: now,
            updated_at: now,
        };
        self.records.save_note(note.clone()).await?;
        self.indexer.schedule(IndexJob::Upsert(note_document(&note)));
        Ok(())
    }

    async fn update_note(
        &self,
        owner: &UserId,
        update: payload::UpdateNote,
    ) -> Result<(), ActionError> {
        let mut note = self
            .records
            .find_note(owner, &update.note_id)
            .await?
            .ok_or_else(|| ActionError::missing("note", &update.note_id.0))?;

        note.body = update.body;
        note.updated_at = Utc::now();

        self.records.save_note(note.clone()).await?;
        self.indexer.schedule(IndexJob::Upsert(note_document(&note)));
        Ok(())
    }

    async fn create_deal(
        &self,
        owner: &UserId,
        create: payload::CreateDeal,
    ) -> Result<(), ActionError> {
        if let Some(company_id) = &create.company_id {
            self.require_company(owner, company_id).await?;
        }
        if let Some(contact_id) = &create.contact_id {
            self.require_contact(owner, contact_id).await?;
        }

        let now = Utc::now();
        let deal = Deal {
            id: atrium_core::domain::records::DealId(Uuid::new_v4().to_string()),
            owner_user_id: owner.clone(),
            title: create.title,
            amount_cents: create.amount_cents,
            stage: create.stage.unwrap_or(DealStage::Lead),
            close_date: create.close_date,
            company_id: create.company_id,
            contact_id: create.contact_id,
            created_at: now,
            updated_at: now,
        };
        self.records.save_deal(deal.clone()).await?;
        self.reindex_deal(owner, &deal).await?;
        Ok(())
    }

    async fn update_deal(
        &self,
        owner: &UserId,
        update: payload::UpdateDeal,
    ) -> Result<(), ActionError> {
        let mut deal = self
            .records
            .find_deal(owner, &update.deal_id)
            .await?
            .ok_or_else(|| ActionError::missing("deal", &update.deal_id.0))?;

        if let Some(title) = update.title {
            deal.title = title;
        }
        if let Some(amount_cents) = update.amount_cents {
            deal.amount_cents = Some(amount_cents);
        }
        if let Some(close_date) = update.close_date {
            deal.close_date = Some(close_date);
        }
        if let Some(company_id) = update.company_id {
            self.require_company(owner, &company_id).await?;
            deal.company_id = Some(company_id);
        }
        if let Some(contact_id) = update.contact_id {
            self.require_contact(owner, &contact_id).await?;
            deal.contact_id = Some(contact_id);
        }
        deal.updated_at = Utc::now();

        self.records.save_deal(deal.clone()).await?;
        self.reindex_deal(owner, &deal).await?;
        Ok(())
    }

    async fn create_contact(
        &self,
        owner: &UserId,
        create: payload::CreateContact,
    ) -> Result<(), ActionError> {
        if let Some(company_id) = &create.company_id {
            self.require_company(owner, company_id).await?;
        }

        let now = Utc::now();
        let contact = Contact {
            id: atrium_core::domain::records::ContactId(Uuid::new_v4().to_string()),
            owner_user_id: owner.clone(),
            first_name: create.first_name,
            last_name: create.last_name,
            email: create.email,
            phone: create.phone,
            title: create.title,
            company_id: create.company_id,
            created_at: now,
            updated_at: now,
        };
        self.records.save_contact(contact.clone()).await?;
        self.reindex_contact(owner, &contact).await?;
        Ok(())
    }

    async fn update_contact(
        &self,
        owner: &UserId,
        update: payload::UpdateContact,
    ) -> Result<(), ActionError> {
        let mut contact = self
            .records
            .find_contact(owner, &update.contact_id)
            .await?
            .ok_or_else(|| ActionError::missing("contact", &update.contact_id.0))?;

        if let Some(first_name) = update.first_name {
            contact.first_name = first_name;
        }
        if let Some(last_name) = update.last_name {
            contact.last_name = last_name;
        }
        if let Some(email) = update.email {
            contact.email = Some(email);
        }
        if let Some(phone) = update.phone {
            contact.phone = Some(phone);
        }
        if let Some(title) = update.title {
            contact.title = Some(title);
        }
        if let Some(company_id) = update.company_id {
            self.require_company(owner, &company_id).await?;
            contact.company_id = Some(company_id);
        }
        contact.updated_at = Utc::now();

        self.records.save_contact(contact.clone()).await?;
        self.reindex_contact(owner, &contact).await?;
        Ok(())
    }

    async fn create_company(
        &self,
        owner: &UserId,
        create: payload::CreateCompany,
    ) -> Result<(), ActionError> {
        let now = Utc::now();
        let company = Company {
            id: CompanyId(Uuid::new_v4().to_string()),
            owner_user_id: owner.clone(),
            name: create.name,
            domain: create.domain,
            industry: create.industry,
            notes: create.notes,
            created_at: now,
            updated_at: now,
        };
        self.records.save_company(company.clone()).await?;
        self.indexer.schedule(IndexJob::Upsert(company_document(&company)));
        Ok(())
    }

    async fn update_company(
        &self,
        owner: &UserId,
        update: payload::UpdateCompany,
    ) -> Result<(), ActionError> {
        let mut company = self
            .records
            .find_company(owner, &update.company_id)
            .await?
            .ok_or_else(|| ActionError::missing("company", &update.company_id.0))?;

        if let Some(name) = update.name {
            company.name = name;
        }
        if let Some(domain) = update.domain {
            company.domain = Some(domain);
        }
        if let Some(industry) = update.industry {
            company.industry = Some(industry);
        }
        if let Some(notes) = update.notes {
            company.notes = Some(notes);
        }
        company.updated_at = Utc::now();

        self.records.save_company(company.clone()).await?;
        self.indexer.schedule(IndexJob::Upsert(company_document(&company)));
        Ok(())
    }

    /// Bulk operations are all-or-nothing: if any target id is missing or
    /// foreign, nothing changes.
    async fn bulk_update_task_status(
        &self,
        owner: &UserId,
        bulk: payload::BulkUpdateTaskStatus,
    ) -> Result<(), ActionError> {
        for task_id in &bulk.task_ids {
            if self.records.find_task(owner, task_id).await?.is_none() {
                return Err(ActionError::missing("task", &task_id.0));
            }
        }

        self.records
            .update_task_statuses(owner, &bulk.task_ids, bulk.status, Utc::now())
            .await?;
        for task_id in &bulk.task_ids {
            if let Some(task) = self.records.find_task(owner, task_id).await? {
                self.indexer.schedule(IndexJob::Upsert(task_document(&task)));
            }
        }
        Ok(())
    }

    async fn bulk_update_deal_stage(
        &self,
        owner: &UserId,
        bulk: payload::BulkUpdateDealStage,
    ) -> Result<(), ActionError> {
        for deal_id in &bulk.deal_ids {
            if self.records.find_deal(owner, deal_id).await?.is_none() {
                return Err(ActionError::missing("deal", &deal_id.0));
            }
        }

        self.records.update_deal_stages(owner, &bulk.deal_ids, bulk.stage, Utc::now()).await?;
        for deal_id in &bulk.deal_ids {
            if let Some(deal) = self.records.find_deal(owner, deal_id).await? {
                self.reindex_deal(owner, &deal).await?;
            }
        }
        Ok(())
    }

    async fn bulk_delete_tasks(
        &self,
        owner: &UserId,
        bulk: payload::BulkDeleteTasks,
    ) -> Result<(), ActionError> {
        for task_id in &bulk.task_ids {
            if self.records.find_task(owner, task_id).await?.is_none() {
                return Err(ActionError::missing("task", &task_id.0));
            }
        }

        self.records.delete_tasks(owner, &bulk.task_ids).await?;
        for task_id in &bulk.task_ids {
            self.indexer.schedule(IndexJob::Delete {
                source_type: SourceType::Task,
                source_id: task_id.0.clone(),
            });
        }
        Ok(())
    }

    async fn require_company(
        &self,
        owner: &UserId,
        company_id: &CompanyId,
    ) -> Result<(), ActionError> {
        if self.records.find_company(owner, company_id).await?.is_none() {
            return Err(ActionError::missing("company", &company_id.0));
        }
        Ok(())
    }

    async fn require_contact(
        &self,
        owner: &UserId,
        contact_id: &ContactId,
    ) -> Result<(), ActionError> {
        if self.records.find_contact(owner, contact_id).await?.is_none() {
            return Err(ActionError::missing("contact", &contact_id.0));
        }
        Ok(())
    }

    /// Deal documents carry the counterpart names, so reindexing a deal
    /// re-reads the linked company and contact.
    async fn reindex_deal(&self, owner: &UserId, deal: &Deal) -> Result<(), ActionError> {
        let company_name = match &deal.company_id {
            Some(company_id) => {
                self.records.find_company(owner, company_id).await?.map(|company| company.name)
            }
            None => None,
        };
        let contact_name = match &deal.contact_id {
            Some(contact_id) => self
                .records
                .find_contact(owner, contact_id)
                .await?
                .map(|contact| contact.full_name()),
            None => None,
        };
        self.indexer.schedule(IndexJob::Upsert(deal_document(
            deal,
            company_name.as_deref(),
            contact_name.as_deref(),
        )));
        Ok(())
    }

    async fn reindex_contact(&self, owner: &UserId, contact: &Contact) -> Result<(), ActionError> {
        let company_name = match &contact.company_id {
            Some(company_id) => {
                self.records.find_company(owner, company_id).await?.map(|company| company.name)
            }
            None => None,
        };
        self.indexer
            .schedule(IndexJob::Upsert(contact_document(contact, company_name.as_deref())));
        Ok(())
    }

    /// A related target must exist and belong to the owner before a task or
    /// note may point at it.
    async fn check_related(
        &self,
        owner: &UserId,
        related: Option<&atrium_core::domain::records::RelatedRef>,
    ) -> Result<(), ActionError> {
        let Some(related) = related else {
            return Ok(());
        };
        let id = related.related_id.clone();
        let exists = match related.related_type {
            SourceType::Company => {
                self.records.find_company(owner, &CompanyId(id.clone())).await?.is_some()
            }
            SourceType::Contact => self
                .records
                .find_contact(owner, &atrium_core::domain::records::ContactId(id.clone()))
                .await?
                .is_some(),
            SourceType::Deal => self
                .records
                .find_deal(owner, &atrium_core::domain::records::DealId(id.clone()))
                .await?
                .is_some(),
            // Validation already rejects task/note targets.
            SourceType::Task | SourceType::Note => false,
        };
        if !exists {
            return Err(ActionError::missing(related.related_type.as_str(), &id));
        }
        Ok(())
    }
}
