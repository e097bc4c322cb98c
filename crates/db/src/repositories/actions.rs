use sqlx::{sqlite::SqliteRow, Row};

use atrium_core::domain::action::{ActionProposal, ActionProposalId, ActionStatus, ActionType};
use atrium_core::domain::records::UserId;
use atrium_core::domain::thread::ThreadId;

use super::records::{parse_optional_timestamp, parse_timestamp};
use super::{ActionRepository, RepositoryError, StatusTransition};
use crate::DbPool;

pub struct SqlActionRepository {
    pool: DbPool,
}

impl SqlActionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ActionRepository for SqlActionRepository {
    async fn find_for_owner(
        &self,
        owner: &UserId,
        id: &ActionProposalId,
    ) -> Result<Option<ActionProposal>, RepositoryError> {
        let row = sqlx::query(
            "SELECT p.id, p.thread_id, p.action_type, p.payload_json, p.status, p.error_msg,
                    p.executed_at, p.created_at, p.updated_at
             FROM action_proposals p
             JOIN conversation_threads t ON t.id = p.thread_id
             WHERE p.id = ? AND t.owner_user_id = ?",
        )
        .bind(&id.0)
        .bind(&owner.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(proposal_from_row).transpose()
    }

    async fn save(&self, proposal: ActionProposal) -> Result<(), RepositoryError> {
        let payload_json = serde_json::to_string(&proposal.payload)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO action_proposals (
                id, thread_id, action_type, payload_json, status, error_msg, executed_at,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                error_msg = excluded.error_msg,
                executed_at = excluded.executed_at,
                updated_at = excluded.updated_at",
        )
        .bind(&proposal.id.0)
        .bind(&proposal.thread_id.0)
        .bind(proposal.action_type.as_str())
        .bind(&payload_json)
        .bind(proposal.status.as_str())
        .bind(proposal.error_msg.as_deref())
        .bind(proposal.executed_at.map(|value| value.to_rfc3339()))
        .bind(proposal.created_at.to_rfc3339())
        .bind(proposal.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn transition_status(&self, update: StatusTransition) -> Result<bool, RepositoryError> {
        // Single-statement CAS: the row must still be in `from` when the
        // update lands, otherwise zero rows change and the caller sees a
        // conflict.
        let result = sqlx::query(
            "UPDATE action_proposals
             SET status = ?, error_msg = ?, executed_at = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(update.to.as_str())
        .bind(update.error_msg.as_deref())
        .bind(update.executed_at.map(|value| value.to_rfc3339()))
        .bind(update.updated_at.to_rfc3339())
        .bind(&update.id.0)
        .bind(update.from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn proposal_from_row(row: SqliteRow) -> Result<ActionProposal, RepositoryError> {
    let action_type_raw = row.try_get::<String, _>("action_type")?;
    let action_type = ActionType::parse(&action_type_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown action type `{action_type_raw}`"))
    })?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = ActionStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown action status `{status_raw}`")))?;

    let payload_json = row.try_get::<String, _>("payload_json")?;
    let payload = serde_json::from_str(&payload_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid payload_json: {error}")))?;

    Ok(ActionProposal {
        id: ActionProposalId(row.try_get("id")?),
        thread_id: ThreadId(row.try_get("thread_id")?),
        action_type,
        payload,
        status,
        error_msg: row.try_get("error_msg")?,
        executed_at: parse_optional_timestamp("executed_at", row.try_get("executed_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use atrium_core::domain::action::{
        ActionProposal, ActionProposalId, ActionStatus, ActionType,
    };
    use atrium_core::domain::records::UserId;
    use atrium_core::domain::thread::{ConversationThread, ThreadId};

    use super::SqlActionRepository;
    use crate::migrations;
    use crate::repositories::{ActionRepository, SqlThreadRepository, StatusTransition, ThreadRepository};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    fn timestamp(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("timestamp").with_timezone(&Utc)
    }

    async fn seed_thread(pool: &DbPool, owner: &str) {
        SqlThreadRepository::new(pool.clone())
            .save_thread(ConversationThread {
                id: ThreadId("thread-1".to_string()),
                owner_user_id: UserId(owner.to_string()),
                title: "Pipeline".to_string(),
                created_at: timestamp("2026-08-01T09:00:00Z"),
                updated_at: timestamp("2026-08-01T09:00:00Z"),
            })
            .await
            .expect("seed thread");
    }

    fn proposal(id: &str) -> ActionProposal {
        ActionProposal {
            id: ActionProposalId(id.to_string()),
            thread_id: ThreadId("thread-1".to_string()),
            action_type: ActionType::CreateTask,
            payload: json!({"title": "Call John"}),
            status: ActionStatus::Proposed,
            error_msg: None,
            executed_at: None,
            created_at: timestamp("2026-08-01T10:00:00Z"),
            updated_at: timestamp("2026-08-01T10:00:00Z"),
        }
    }

    #[tokio::test]
    async fn proposal_round_trips_through_the_thread_owner() {
        let pool = setup_pool().await;
        seed_thread(&pool, "user-1").await;
        let repo = SqlActionRepository::new(pool);

        repo.save(proposal("action-1")).await.expect("save");

        let owner = UserId("user-1".to_string());
        let loaded = repo
            .find_for_owner(&owner, &ActionProposalId("action-1".to_string()))
            .await
            .expect("find")
            .expect("proposal present");
        assert_eq!(loaded.action_type, ActionType::CreateTask);
        assert_eq!(loaded.status, ActionStatus::Proposed);

        let other = UserId("user-2".to_string());
        let hidden = repo
            .find_for_owner(&other, &ActionProposalId("action-1".to_string()))
            .await
            .expect("find");
        assert!(hidden.is_none());
    }

    #[tokio::test]
    async fn cas_transition_succeeds_once_then_conflicts() {
        let pool = setup_pool().await;
        seed_thread(&pool, "user-1").await;
        let repo = SqlActionRepository::new(pool);

        repo.save(proposal("action-1")).await.expect("save");

        let transition = StatusTransition {
            id: ActionProposalId("action-1".to_string()),
            from: ActionStatus::Proposed,
            to: ActionStatus::Confirmed,
            error_msg: None,
            executed_at: None,
            updated_at: timestamp("2026-08-01T10:01:00Z"),
        };

        assert!(repo.transition_status(transition.clone()).await.expect("first"));
        // Second identical CAS must lose: the row left `proposed` already.
        assert!(!repo.transition_status(transition).await.expect("second"));
    }

    #[tokio::test]
    async fn failed_transition_records_the_error() {
        let pool = setup_pool().await;
        seed_thread(&pool, "user-1").await;
        let repo = SqlActionRepository::new(pool);

        repo.save(proposal("action-1")).await.expect("save");
        let owner = UserId("user-1".to_string());

        repo.transition_status(StatusTransition {
            id: ActionProposalId("action-1".to_string()),
            from: ActionStatus::Proposed,
            to: ActionStatus::Confirmed,
            error_msg: None,
            executed_at: None,
            updated_at: timestamp("2026-08-01T10:01:00Z"),
        })
        .await
        .expect("confirm");

        repo.transition_status(StatusTransition {
            id: ActionProposalId("action-1".to_string()),
            from: ActionStatus::Confirmed,
            to: ActionStatus::Failed,
            error_msg: Some("task not found".to_string()),
            executed_at: None,
            updated_at: timestamp("2026-08-01T10:02:00Z"),
        })
        .await
        .expect("fail");

        let loaded = repo
            .find_for_owner(&owner, &ActionProposalId("action-1".to_string()))
            .await
            .expect("find")
            .expect("proposal present");
        assert_eq!(loaded.status, ActionStatus::Failed);
        assert_eq!(loaded.error_msg.as_deref(), Some("task not found"));
        assert!(loaded.executed_at.is_none());
    }
}
