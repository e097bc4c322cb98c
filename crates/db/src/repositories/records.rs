use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use atrium_core::domain::records::{
    Company, CompanyId, Contact, ContactId, Deal, DealId, DealStage, Note, NoteId, RelatedRef,
    SourceType, Task, TaskId, TaskStatus, UserId,
};

use super::{RecordRepository, RepositoryError};
use crate::DbPool;

pub struct SqlRecordRepository {
    pool: DbPool,
}

impl SqlRecordRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RecordRepository for SqlRecordRepository {
    async fn find_company(
        &self,
        owner: &UserId,
        id: &CompanyId,
    ) -> Result<Option<Company>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, owner_user_id, name, domain, industry, notes, created_at, updated_at
             FROM companies
             WHERE id = ? AND owner_user_id = ?",
        )
        .bind(&id.0)
        .bind(&owner.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(company_from_row).transpose()
    }

    async fn save_company(&self, company: Company) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO companies (
                id, owner_user_id, name, domain, industry, notes, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                domain = excluded.domain,
                industry = excluded.industry,
                notes = excluded.notes,
                updated_at = excluded.updated_at
             WHERE companies.owner_user_id = excluded.owner_user_id",
        )
        .bind(&company.id.0)
        .bind(&company.owner_user_id.0)
        .bind(&company.name)
        .bind(company.domain.as_deref())
        .bind(company.industry.as_deref())
        .bind(company.notes.as_deref())
        .bind(company.created_at.to_rfc3339())
        .bind(company.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_company(
        &self,
        owner: &UserId,
        id: &CompanyId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM companies WHERE id = ? AND owner_user_id = ?")
            .bind(&id.0)
            .bind(&owner.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_contact(
        &self,
        owner: &UserId,
        id: &ContactId,
    ) -> Result<Option<Contact>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, owner_user_id, first_name, last_name, email, phone, title, company_id,
                    created_at, updated_at
             FROM contacts
             WHERE id = ? AND owner_user_id = ?",
        )
        .bind(&id.0)
        .bind(&owner.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(contact_from_row).transpose()
    }

    async fn save_contact(&self, contact: Contact) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO contacts (
                id, owner_user_id, first_name, last_name, email, phone, title, company_id,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                email = excluded.email,
                phone = excluded.phone,
                title = excluded.title,
                company_id = excluded.company_id,
                updated_at = excluded.updated_at
             WHERE contacts.owner_user_id = excluded.owner_user_id",
        )
        .bind(&contact.id.0)
        .bind(&contact.owner_user_id.0)
        .bind(&contact.first_name)
        .bind(&contact.last_name)
        .bind(contact.email.as_deref())
        .bind(contact.phone.as_deref())
        .bind(contact.title.as_deref())
        .bind(contact.company_id.as_ref().map(|id| id.0.as_str()))
        .bind(contact.created_at.to_rfc3339())
        .bind(contact.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_contact(
        &self,
        owner: &UserId,
        id: &ContactId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM contacts WHERE id = ? AND owner_user_id = ?")
            .bind(&id.0)
            .bind(&owner.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_deal(
        &self,
        owner: &UserId,
        id: &DealId,
    ) -> Result<Option<Deal>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, owner_user_id, title, amount_cents, stage, close_date, company_id,
                    contact_id, created_at, updated_at
             FROM deals
             WHERE id = ? AND owner_user_id = ?",
        )
        .bind(&id.0)
        .bind(&owner.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(deal_from_row).transpose()
    }

    async fn save_deal(&self, deal: Deal) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO deals (
                id, owner_user_id, title, amount_cents, stage, close_date, company_id,
                contact_id, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                amount_cents = excluded.amount_cents,
                stage = excluded.stage,
                close_date = excluded.close_date,
                company_id = excluded.company_id,
                contact_id = excluded.contact_id,
                updated_at = excluded.updated_at
             WHERE deals.owner_user_id = excluded.owner_user_id",
        )
        .bind(&deal.id.0)
        .bind(&deal.owner_user_id.0)
        .bind(&deal.title)
        .bind(deal.amount_cents)
        .bind(deal.stage.as_str())
        .bind(deal.close_date.map(|value| value.to_rfc3339()))
        .bind(deal.company_id.as_ref().map(|id| id.0.as_str()))
        .bind(deal.contact_id.as_ref().map(|id| id.0.as_str()))
        .bind(deal.created_at.to_rfc3339())
        .bind(deal.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_deal(&self, owner: &UserId, id: &DealId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM deals WHERE id = ? AND owner_user_id = ?")
            .bind(&id.0)
            .bind(&owner.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_task(
        &self,
        owner: &UserId,
        id: &TaskId,
    ) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, owner_user_id, title, description, status, due_date, related_type,
                    related_id, created_at, updated_at
             FROM tasks
             WHERE id = ? AND owner_user_id = ?",
        )
        .bind(&id.0)
        .bind(&owner.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(task_from_row).transpose()
    }

    async fn save_task(&self, task: Task) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tasks (
                id, owner_user_id, title, description, status, due_date, related_type,
                related_id, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                status = excluded.status,
                due_date = excluded.due_date,
                related_type = excluded.related_type,
                related_id = excluded.related_id,
                updated_at = excluded.updated_at
             WHERE tasks.owner_user_id = excluded.owner_user_id",
        )
        .bind(&task.id.0)
        .bind(&task.owner_user_id.0)
        .bind(&task.title)
        .bind(task.description.as_deref())
        .bind(task.status.as_str())
        .bind(task.due_date.map(|value| value.to_rfc3339()))
        .bind(task.related.as_ref().map(|related| related.related_type.as_str()))
        .bind(task.related.as_ref().map(|related| related.related_id.as_str()))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_task(&self, owner: &UserId, id: &TaskId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ? AND owner_user_id = ?")
            .bind(&id.0)
            .bind(&owner.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_task_statuses(
        &self,
        owner: &UserId,
        ids: &[TaskId],
        status: TaskStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE tasks SET status = ?, updated_at = ?
             WHERE owner_user_id = ? AND id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(updated_at.to_rfc3339())
            .bind(&owner.0);
        for id in ids {
            query = query.bind(&id.0);
        }

        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    async fn delete_tasks(&self, owner: &UserId, ids: &[TaskId]) -> Result<u64, RepositoryError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "DELETE FROM tasks WHERE owner_user_id = ? AND id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql).bind(&owner.0);
        for id in ids {
            query = query.bind(&id.0);
        }

        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    async fn find_note(
        &self,
        owner: &UserId,
        id: &NoteId,
    ) -> Result<Option<Note>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, owner_user_id, body, related_type, related_id, created_at, updated_at
             FROM notes
             WHERE id = ? AND owner_user_id = ?",
        )
        .bind(&id.0)
        .bind(&owner.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(note_from_row).transpose()
    }

    async fn save_note(&self, note: Note) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO notes (
                id, owner_user_id, body, related_type, related_id, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                body = excluded.body,
                related_type = excluded.related_type,
                related_id = excluded.related_id,
                updated_at = excluded.updated_at
             WHERE notes.owner_user_id = excluded.owner_user_id",
        )
        .bind(&note.id.0)
        .bind(&note.owner_user_id.0)
        .bind(&note.body)
        .bind(note.related.as_ref().map(|related| related.related_type.as_str()))
        .bind(note.related.as_ref().map(|related| related.related_id.as_str()))
        .bind(note.created_at.to_rfc3339())
        .bind(note.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_note(&self, owner: &UserId, id: &NoteId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM notes WHERE id = ? AND owner_user_id = ?")
            .bind(&id.0)
            .bind(&owner.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_deal_stages(
        &self,
        owner: &UserId,
        ids: &[DealId],
        stage: DealStage,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE deals SET stage = ?, updated_at = ?
             WHERE owner_user_id = ? AND id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql)
            .bind(stage.as_str())
            .bind(updated_at.to_rfc3339())
            .bind(&owner.0);
        for id in ids {
            query = query.bind(&id.0);
        }

        Ok(query.execute(&self.pool).await?.rows_affected())
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn company_from_row(row: SqliteRow) -> Result<Company, RepositoryError> {
    Ok(Company {
        id: CompanyId(row.try_get("id")?),
        owner_user_id: UserId(row.try_get("owner_user_id")?),
        name: row.try_get("name")?,
        domain: row.try_get("domain")?,
        industry: row.try_get("industry")?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn contact_from_row(row: SqliteRow) -> Result<Contact, RepositoryError> {
    Ok(Contact {
        id: ContactId(row.try_get("id")?),
        owner_user_id: UserId(row.try_get("owner_user_id")?),
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        title: row.try_get("title")?,
        company_id: row.try_get::<Option<String>, _>("company_id")?.map(CompanyId),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn deal_from_row(row: SqliteRow) -> Result<Deal, RepositoryError> {
    let stage_raw = row.try_get::<String, _>("stage")?;
    let stage = DealStage::parse(&stage_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown deal stage `{stage_raw}`")))?;

    Ok(Deal {
        id: DealId(row.try_get("id")?),
        owner_user_id: UserId(row.try_get("owner_user_id")?),
        title: row.try_get("title")?,
        amount_cents: row.try_get("amount_cents")?,
        stage,
        close_date: parse_optional_timestamp("close_date", row.try_get("close_date")?)?,
        company_id: row.try_get::<Option<String>, _>("company_id")?.map(CompanyId),
        contact_id: row.try_get::<Option<String>, _>("contact_id")?.map(ContactId),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn task_from_row(row: SqliteRow) -> Result<Task, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task status `{status_raw}`")))?;

    Ok(Task {
        id: TaskId(row.try_get("id")?),
        owner_user_id: UserId(row.try_get("owner_user_id")?),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status,
        due_date: parse_optional_timestamp("due_date", row.try_get("due_date")?)?,
        related: related_from_row(&row)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn note_from_row(row: SqliteRow) -> Result<Note, RepositoryError> {
    Ok(Note {
        id: NoteId(row.try_get("id")?),
        owner_user_id: UserId(row.try_get("owner_user_id")?),
        body: row.try_get("body")?,
        related: related_from_row(&row)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn related_from_row(row: &SqliteRow) -> Result<Option<RelatedRef>, RepositoryError> {
    let related_type = row.try_get::<Option<String>, _>("related_type")?;
    let related_id = row.try_get::<Option<String>, _>("related_id")?;

    match (related_type, related_id) {
        (Some(kind_raw), Some(related_id)) => {
            let related_type = SourceType::parse(&kind_raw).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown related_type `{kind_raw}`"))
            })?;
            Ok(Some(RelatedRef { related_type, related_id }))
        }
        _ => Ok(None),
    }
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
