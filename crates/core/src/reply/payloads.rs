//! Per-action payload schemas and the validation registry.
//!
//! Every `ActionType` maps to exactly one schema here. Raw model JSON is
//! decoded into a wire struct (camelCase, tolerant of extra fields), then
//! checked field-by-field into a typed `ActionPayload` variant. Adding an
//! action type means adding one wire struct, one typed struct, and one arm
//! in `validate_payload`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::action::ActionType;
use crate::domain::records::{
    CompanyId, ContactId, DealId, DealStage, NoteId, RelatedRef, SourceType, TaskId, TaskStatus,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload does not match the `{action_type}` schema: {reason}")]
    Decode { action_type: &'static str, reason: String },
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("`{0}` must not be empty")]
    Empty(&'static str),
}

/// A fully validated, typed mutation request. Exhaustively matched by the
/// action executors; no executor ever re-reads the raw JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ActionPayload {
    CreateTask(CreateTask),
    UpdateTask(UpdateTask),
    DeleteTask(DeleteTask),
    CreateNote(CreateNote),
    UpdateNote(UpdateNote),
    DeleteNote(DeleteNote),
    CreateDeal(CreateDeal),
    UpdateDeal(UpdateDeal),
    DeleteDeal(DeleteDeal),
    UpdateDealStage(UpdateDealStage),
    CreateContact(CreateContact),
    UpdateContact(UpdateContact),
    DeleteContact(DeleteContact),
    CreateCompany(CreateCompany),
    UpdateCompany(UpdateCompany),
    DeleteCompany(DeleteCompany),
    BulkUpdateTaskStatus(BulkUpdateTaskStatus),
    BulkUpdateDealStage(BulkUpdateDealStage),
    BulkDeleteTasks(BulkDeleteTasks),
}

impl ActionPayload {
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::CreateTask(_) => ActionType::CreateTask,
            Self::UpdateTask(_) => ActionType::UpdateTask,
            Self::DeleteTask(_) => ActionType::DeleteTask,
            Self::CreateNote(_) => ActionType::CreateNote,
            Self::UpdateNote(_) => ActionType::UpdateNote,
            Self::DeleteNote(_) => ActionType::DeleteNote,
            Self::CreateDeal(_) => ActionType::CreateDeal,
            Self::UpdateDeal(_) => ActionType::UpdateDeal,
            Self::DeleteDeal(_) => ActionType::DeleteDeal,
            Self::UpdateDealStage(_) => ActionType::UpdateDealStage,
            Self::CreateContact(_) => ActionType::CreateContact,
            Self::UpdateContact(_) => ActionType::UpdateContact,
            Self::DeleteContact(_) => ActionType::DeleteContact,
            Self::CreateCompany(_) => ActionType::CreateCompany,
            Self::UpdateCompany(_) => ActionType::UpdateCompany,
            Self::DeleteCompany(_) => ActionType::DeleteCompany,
            Self::BulkUpdateTaskStatus(_) => ActionType::BulkUpdateTaskStatus,
            Self::BulkUpdateDealStage(_) => ActionType::BulkUpdateDealStage,
            Self::BulkDeleteTasks(_) => ActionType::BulkDeleteTasks,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub related: Option<RelatedRef>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateTask {
    pub task_id: TaskId,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteTask {
    pub task_id: TaskId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateNote {
    pub body: String,
    pub related: Option<RelatedRef>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateNote {
    pub note_id: NoteId,
    pub body: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteNote {
    pub note_id: NoteId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateDeal {
    pub title: String,
    pub amount_cents: Option<i64>,
    pub stage: Option<DealStage>,
    pub close_date: Option<DateTime<Utc>>,
    pub company_id: Option<CompanyId>,
    pub contact_id: Option<ContactId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateDeal {
    pub deal_id: DealId,
    pub title: Option<String>,
    pub amount_cents: Option<i64>,
    pub close_date: Option<DateTime<Utc>>,
    pub company_id: Option<CompanyId>,
    pub contact_id: Option<ContactId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteDeal {
    pub deal_id: DealId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateDealStage {
    pub deal_id: DealId,
    pub stage: DealStage,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateContact {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub company_id: Option<CompanyId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateContact {
    pub contact_id: ContactId,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub company_id: Option<CompanyId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteContact {
    pub contact_id: ContactId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateCompany {
    pub name: String,
    pub domain: Option<String>,
    pub industry: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateCompany {
    pub company_id: CompanyId,
    pub name: Option<String>,
    pub domain: Option<String>,
    pub industry: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteCompany {
    pub company_id: CompanyId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkUpdateTaskStatus {
    pub task_ids: Vec<TaskId>,
    pub status: TaskStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkUpdateDealStage {
    pub deal_ids: Vec<DealId>,
    pub stage: DealStage,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkDeleteTasks {
    pub task_ids: Vec<TaskId>,
}

// Wire shapes as the model emits them: camelCase keys, enum values and
// timestamps as loose strings. Extra fields are ignored on purpose.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TaskWire {
    task_id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    status: Option<String>,
    due_date: Option<String>,
    related_type: Option<String>,
    related_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct NoteWire {
    note_id: Option<String>,
    body: Option<String>,
    related_type: Option<String>,
    related_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DealWire {
    deal_id: Option<String>,
    title: Option<String>,
    amount_cents: Option<i64>,
    stage: Option<String>,
    close_date: Option<String>,
    company_id: Option<String>,
    contact_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ContactWire {
    contact_id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    title: Option<String>,
    company_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CompanyWire {
    company_id: Option<String>,
    name: Option<String>,
    domain: Option<String>,
    industry: Option<String>,
    notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BulkWire {
    task_ids: Option<Vec<String>>,
    deal_ids: Option<Vec<String>>,
    status: Option<String>,
    stage: Option<String>,
}

/// Validates `payload` against the schema registered for `action_type`.
pub fn validate_payload(action_type: ActionType, payload: &Value) -> Result<ActionPayload, PayloadError> {
    match action_type {
        ActionType::CreateTask => {
            let wire: TaskWire = decode(action_type, payload)?;
            Ok(ActionPayload::CreateTask(CreateTask {
                title: required(wire.title, "title")?,
                description: non_blank(wire.description),
                due_date: optional_datetime(wire.due_date, "dueDate")?,
                related: related_ref(wire.related_type, wire.related_id)?,
            }))
        }
        ActionType::UpdateTask => {
            let wire: TaskWire = decode(action_type, payload)?;
            Ok(ActionPayload::UpdateTask(UpdateTask {
                task_id: TaskId(required(wire.task_id, "taskId")?),
                title: non_blank(wire.title),
                description: non_blank(wire.description),
                status: optional_task_status(wire.status)?,
                due_date: optional_datetime(wire.due_date, "dueDate")?,
            }))
        }
        ActionType::DeleteTask => {
            let wire: TaskWire = decode(action_type, payload)?;
            Ok(ActionPayload::DeleteTask(DeleteTask {
                task_id: TaskId(required(wire.task_id, "taskId")?),
            }))
        }
        ActionType::CreateNote => {
            let wire: NoteWire = decode(action_type, payload)?;
            Ok(ActionPayload::CreateNote(CreateNote {
                body: required(wire.body, "body")?,
                related: related_ref(wire.related_type, wire.related_id)?,
            }))
        }
        ActionType::UpdateNote => {
            let wire: NoteWire = decode(action_type, payload)?;
            Ok(ActionPayload::UpdateNote(UpdateNote {
                note_id: NoteId(required(wire.note_id, "noteId")?),
                body: required(wire.body, "body")?,
            }))
        }
        ActionType::DeleteNote => {
            let wire: NoteWire = decode(action_type, payload)?;
            Ok(ActionPayload::DeleteNote(DeleteNote {
                note_id: NoteId(required(wire.note_id, "noteId")?),
            }))
        }
        ActionType::CreateDeal => {
            let wire: DealWire = decode(action_type, payload)?;
            Ok(ActionPayload::CreateDeal(CreateDeal {
                title: required(wire.title, "title")?,
                amount_cents: optional_amount(wire.amount_cents)?,
                stage: optional_deal_stage(wire.stage)?,
                close_date: optional_datetime(wire.close_date, "closeDate")?,
                company_id: non_blank(wire.company_id).map(CompanyId),
                contact_id: non_blank(wire.contact_id).map(ContactId),
            }))
        }
        ActionType::UpdateDeal => {
            let wire: DealWire = decode(action_type, payload)?;
            Ok(ActionPayload::UpdateDeal(UpdateDeal {
                deal_id: DealId(required(wire.deal_id, "dealId")?),
                title: non_blank(wire.title),
                amount_cents: optional_amount(wire.amount_cents)?,
                close_date: optional_datetime(wire.close_date, "closeDate")?,
                company_id: non_blank(wire.company_id).map(CompanyId),
                contact_id: non_blank(wire.contact_id).map(ContactId),
            }))
        }
        ActionType::DeleteDeal => {
            let wire: DealWire = decode(action_type, payload)?;
            Ok(ActionPayload::DeleteDeal(DeleteDeal {
                deal_id: DealId(required(wire.deal_id, "dealId")?),
            }))
        }
        ActionType::UpdateDealStage => {
            let wire: DealWire = decode(action_type, payload)?;
            let stage_raw = required(wire.stage, "stage")?;
            let stage = DealStage::parse(&stage_raw).ok_or_else(|| PayloadError::Invalid {
                field: "stage",
                reason: format!("unknown deal stage `{stage_raw}`"),
            })?;
            Ok(ActionPayload::UpdateDealStage(UpdateDealStage {
                deal_id: DealId(required(wire.deal_id, "dealId")?),
                stage,
            }))
        }
        ActionType::CreateContact => {
            let wire: ContactWire = decode(action_type, payload)?;
            Ok(ActionPayload::CreateContact(CreateContact {
                first_name: required(wire.first_name, "firstName")?,
                last_name: required(wire.last_name, "lastName")?,
                email: optional_email(wire.email)?,
                phone: non_blank(wire.phone),
                title: non_blank(wire.title),
                company_id: non_blank(wire.company_id).map(CompanyId),
            }))
        }
        ActionType::UpdateContact => {
            let wire: ContactWire = decode(action_type, payload)?;
            Ok(ActionPayload::UpdateContact(UpdateContact {
                contact_id: ContactId(required(wire.contact_id, "contactId")?),
                first_name: non_blank(wire.first_name),
                last_name: non_blank(wire.last_name),
                email: optional_email(wire.email)?,
                phone: non_blank(wire.phone),
                title: non_blank(wire.title),
                company_id: non_blank(wire.company_id).map(CompanyId),
            }))
        }
        ActionType::DeleteContact => {
            let wire: ContactWire = decode(action_type, payload)?;
            Ok(ActionPayload::DeleteContact(DeleteContact {
                contact_id: ContactId(required(wire.contact_id, "contactId")?),
            }))
        }
        ActionType::CreateCompany => {
            let wire: CompanyWire = decode(action_type, payload)?;
            Ok(ActionPayload::CreateCompany(CreateCompany {
                name: required(wire.name, "name")?,
                domain: non_blank(wire.domain),
                industry: non_blank(wire.industry),
                notes: non_blank(wire.notes),
            }))
        }
        ActionType::UpdateCompany => {
            let wire: CompanyWire = decode(action_type, payload)?;
            Ok(ActionPayload::UpdateCompany(UpdateCompany {
                company_id: CompanyId(required(wire.company_id, "companyId")?),
                name: non_blank(wire.name),
                domain: non_blank(wire.domain),
                industry: non_blank(wire.industry),
                notes: non_blank(wire.notes),
            }))
        }
        ActionType::DeleteCompany => {
            let wire: CompanyWire = decode(action_type, payload)?;
            Ok(ActionPayload::DeleteCompany(DeleteCompany {
                company_id: CompanyId(required(wire.company_id, "companyId")?),
            }))
        }
        ActionType::BulkUpdateTaskStatus => {
            let wire: BulkWire = decode(action_type, payload)?;
            let status_raw = required(wire.status, "status")?;
            let status = TaskStatus::parse(&status_raw).ok_or_else(|| PayloadError::Invalid {
                field: "status",
                reason: format!("unknown task status `{status_raw}`"),
            })?;
            Ok(ActionPayload::BulkUpdateTaskStatus(BulkUpdateTaskStatus {
                task_ids: id_list(wire.task_ids, "taskIds")?.into_iter().map(TaskId).collect(),
                status,
            }))
        }
        ActionType::BulkUpdateDealStage => {
            let wire: BulkWire = decode(action_type, payload)?;
            let stage_raw = required(wire.stage, "stage")?;
            let stage = DealStage::parse(&stage_raw).ok_or_else(|| PayloadError::Invalid {
                field: "stage",
                reason: format!("unknown deal stage `{stage_raw}`"),
            })?;
            Ok(ActionPayload::BulkUpdateDealStage(BulkUpdateDealStage {
                deal_ids: id_list(wire.deal_ids, "dealIds")?.into_iter().map(DealId).collect(),
                stage,
            }))
        }
        ActionType::BulkDeleteTasks => {
            let wire: BulkWire = decode(action_type, payload)?;
            Ok(ActionPayload::BulkDeleteTasks(BulkDeleteTasks {
                task_ids: id_list(wire.task_ids, "taskIds")?.into_iter().map(TaskId).collect(),
            }))
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    action_type: ActionType,
    payload: &Value,
) -> Result<T, PayloadError> {
    serde_json::from_value(payload.clone()).map_err(|source| PayloadError::Decode {
        action_type: action_type.as_str(),
        reason: source.to_string(),
    })
}

fn required(value: Option<String>, field: &'static str) -> Result<String, PayloadError> {
    match value {
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Err(PayloadError::Empty(field))
            } else {
                Ok(trimmed.to_string())
            }
        }
        None => Err(PayloadError::Empty(field)),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|raw| raw.trim().to_string()).filter(|trimmed| !trimmed.is_empty())
}

fn optional_task_status(value: Option<String>) -> Result<Option<TaskStatus>, PayloadError> {
    match non_blank(value) {
        Some(raw) => TaskStatus::parse(&raw).map(Some).ok_or_else(|| PayloadError::Invalid {
            field: "status",
            reason: format!("unknown task status `{raw}`"),
        }),
        None => Ok(None),
    }
}

fn optional_deal_stage(value: Option<String>) -> Result<Option<DealStage>, PayloadError> {
    match non_blank(value) {
        Some(raw) => DealStage::parse(&raw).map(Some).ok_or_else(|| PayloadError::Invalid {
            field: "stage",
            reason: format!("unknown deal stage `{raw}`"),
        }),
        None => Ok(None),
    }
}

fn optional_amount(value: Option<i64>) -> Result<Option<i64>, PayloadError> {
    match value {
        Some(cents) if cents < 0 => Err(PayloadError::Invalid {
            field: "amountCents",
            reason: format!("must be non-negative, got {cents}"),
        }),
        other => Ok(other),
    }
}

fn optional_email(value: Option<String>) -> Result<Option<String>, PayloadError> {
    match non_blank(value) {
        Some(raw) if raw.contains('@') => Ok(Some(raw)),
        Some(raw) => Err(PayloadError::Invalid {
            field: "email",
            reason: format!("`{raw}` is not an email address"),
        }),
        None => Ok(None),
    }
}

fn optional_datetime(
    value: Option<String>,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, PayloadError> {
    let Some(raw) = non_blank(value) else {
        return Ok(None);
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    if let Ok(date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        if let Some(at_midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Some(at_midnight.and_utc()));
        }
    }

    Err(PayloadError::Invalid {
        field,
        reason: format!("`{raw}` is not an RFC 3339 timestamp or YYYY-MM-DD date"),
    })
}

/// Tasks and notes may point at a company, contact, or deal. Both halves of
/// the reference are required together.
fn related_ref(
    related_type: Option<String>,
    related_id: Option<String>,
) -> Result<Option<RelatedRef>, PayloadError> {
    match (non_blank(related_type), non_blank(related_id)) {
        (None, None) => Ok(None),
        (Some(type_raw), Some(related_id)) => {
            let related_type =
                SourceType::parse(&type_raw).ok_or_else(|| PayloadError::Invalid {
                    field: "relatedType",
                    reason: format!("unknown related type `{type_raw}`"),
                })?;
            if matches!(related_type, SourceType::Task | SourceType::Note) {
                return Err(PayloadError::Invalid {
                    field: "relatedType",
                    reason: format!("`{type_raw}` records cannot be related targets"),
                });
            }
            Ok(Some(RelatedRef { related_type, related_id }))
        }
        (Some(_), None) => Err(PayloadError::Empty("relatedId")),
        (None, Some(_)) => Err(PayloadError::Empty("relatedType")),
    }
}

fn id_list(value: Option<Vec<String>>, field: &'static str) -> Result<Vec<String>, PayloadError> {
    let ids: Vec<String> = value
        .unwrap_or_default()
        .into_iter()
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
        .collect();
    if ids.is_empty() {
        return Err(PayloadError::Empty(field));
    }
    Ok(ids)
}
