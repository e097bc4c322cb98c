use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::thread::ThreadId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionProposalId(pub String);

/// The fixed action vocabulary. Every mutation the assistant can propose is
/// one of these; there is no open-ended tool invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    CreateTask,
    UpdateTask,
    DeleteTask,
    CreateNote,
    UpdateNote,
    DeleteNote,
    CreateDeal,
    UpdateDeal,
    DeleteDeal,
    UpdateDealStage,
    CreateContact,
    UpdateContact,
    DeleteContact,
    CreateCompany,
    UpdateCompany,
    DeleteCompany,
    BulkUpdateTaskStatus,
    BulkUpdateDealStage,
    BulkDeleteTasks,
}

impl ActionType {
    pub const ALL: [ActionType; 19] = [
        Self::CreateTask,
        Self::UpdateTask,
        Self::DeleteTask,
        Self::CreateNote,
        Self::UpdateNote,
        Self::DeleteNote,
        Self::CreateDeal,
        Self::UpdateDeal,
        Self::DeleteDeal,
        Self::UpdateDealStage,
        Self::CreateContact,
        Self::UpdateContact,
        Self::DeleteContact,
        Self::CreateCompany,
        Self::UpdateCompany,
        Self::DeleteCompany,
        Self::BulkUpdateTaskStatus,
        Self::BulkUpdateDealStage,
        Self::BulkDeleteTasks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTask => "create_task",
            Self::UpdateTask => "update_task",
            Self::DeleteTask => "delete_task",
            Self::CreateNote => "create_note",
            Self::UpdateNote => "update_note",
            Self::DeleteNote => "delete_note",
            Self::CreateDeal => "create_deal",
            Self::UpdateDeal => "update_deal",
            Self::DeleteDeal => "delete_deal",
            Self::UpdateDealStage => "update_deal_stage",
            Self::CreateContact => "create_contact",
            Self::UpdateContact => "update_contact",
            Self::DeleteContact => "delete_contact",
            Self::CreateCompany => "create_company",
            Self::UpdateCompany => "update_company",
            Self::DeleteCompany => "delete_company",
            Self::BulkUpdateTaskStatus => "bulk_update_task_status",
            Self::BulkUpdateDealStage => "bulk_update_deal_stage",
            Self::BulkDeleteTasks => "bulk_delete_tasks",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|action_type| action_type.as_str() == normalized)
    }
}

/// Proposal lifecycle. `Proposed` is the only initial state; `Executed`,
/// `Cancelled`, and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Proposed,
    Confirmed,
    Executed,
    Cancelled,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Confirmed => "confirmed",
            Self::Executed => "executed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "proposed" => Some(Self::Proposed),
            "confirmed" => Some(Self::Confirmed),
            "executed" => Some(Self::Executed),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Cancelled | Self::Failed)
    }

    /// One-way transition check: the only legal edges are
    /// proposed -> confirmed, proposed -> cancelled, confirmed -> executed,
    /// and confirmed -> failed.
    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Proposed, Self::Confirmed)
                | (Self::Proposed, Self::Cancelled)
                | (Self::Confirmed, Self::Executed)
                | (Self::Confirmed, Self::Failed)
        )
    }

    pub fn transition_to(&self, next: ActionStatus) -> Result<ActionStatus, DomainError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidActionTransition { from: *self, to: next })
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub id: ActionProposalId,
    pub thread_id: ThreadId,
    pub action_type: ActionType,
    pub payload: Value,
    pub status: ActionStatus,
    pub error_msg: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{ActionStatus, ActionType};

    #[test]
    fn action_type_round_trips_from_wire_encoding() {
        for action_type in ActionType::ALL {
            assert_eq!(ActionType::parse(action_type.as_str()), Some(action_type));
        }
        assert_eq!(ActionType::parse("send_email"), None);
    }

    #[test]
    fn terminal_statuses_accept_no_transitions() {
        for terminal in [ActionStatus::Executed, ActionStatus::Cancelled, ActionStatus::Failed] {
            assert!(terminal.is_terminal());
            for next in [
                ActionStatus::Proposed,
                ActionStatus::Confirmed,
                ActionStatus::Executed,
                ActionStatus::Cancelled,
                ActionStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn proposed_can_only_be_confirmed_or_cancelled() {
        assert!(ActionStatus::Proposed.can_transition_to(ActionStatus::Confirmed));
        assert!(ActionStatus::Proposed.can_transition_to(ActionStatus::Cancelled));
        assert!(!ActionStatus::Proposed.can_transition_to(ActionStatus::Executed));
        assert!(!ActionStatus::Proposed.can_transition_to(ActionStatus::Failed));
    }

    #[test]
    fn transition_to_reports_illegal_edges() {
        let error = ActionStatus::Executed.transition_to(ActionStatus::Confirmed);
        assert!(error.is_err());
    }
}
