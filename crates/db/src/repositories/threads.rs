use sqlx::{sqlite::SqliteRow, Row};

use atrium_core::domain::records::UserId;
use atrium_core::domain::thread::{ConversationThread, Message, MessageId, MessageRole, ThreadId};

use super::records::parse_timestamp;
use super::{RepositoryError, ThreadRepository};
use crate::DbPool;

pub struct SqlThreadRepository {
    pool: DbPool,
}

impl SqlThreadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ThreadRepository for SqlThreadRepository {
    async fn find_thread(
        &self,
        owner: &UserId,
        id: &ThreadId,
    ) -> Result<Option<ConversationThread>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, owner_user_id, title, created_at, updated_at
             FROM conversation_threads
             WHERE id = ? AND owner_user_id = ?",
        )
        .bind(&id.0)
        .bind(&owner.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(thread_from_row).transpose()
    }

    async fn save_thread(&self, thread: ConversationThread) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation_threads (id, owner_user_id, title, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                updated_at = excluded.updated_at
             WHERE conversation_threads.owner_user_id = excluded.owner_user_id",
        )
        .bind(&thread.id.0)
        .bind(&thread.owner_user_id.0)
        .bind(&thread.title)
        .bind(thread.created_at.to_rfc3339())
        .bind(thread.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_threads(
        &self,
        owner: &UserId,
    ) -> Result<Vec<ConversationThread>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, owner_user_id, title, created_at, updated_at
             FROM conversation_threads
             WHERE owner_user_id = ?
             ORDER BY updated_at DESC",
        )
        .bind(&owner.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(thread_from_row).collect()
    }

    async fn append_message(&self, message: Message) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation_messages (id, thread_id, role, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(&message.thread_id.0)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_messages(&self, thread_id: &ThreadId) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, thread_id, role, content, created_at
             FROM conversation_messages
             WHERE thread_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(&thread_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }
}

fn thread_from_row(row: SqliteRow) -> Result<ConversationThread, RepositoryError> {
    Ok(ConversationThread {
        id: ThreadId(row.try_get("id")?),
        owner_user_id: UserId(row.try_get("owner_user_id")?),
        title: row.try_get("title")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        thread_id: ThreadId(row.try_get("thread_id")?),
        role,
        content: row.try_get("content")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use atrium_core::domain::records::UserId;
    use atrium_core::domain::thread::{
        ConversationThread, Message, MessageId, MessageRole, ThreadId,
    };

    use super::SqlThreadRepository;
    use crate::migrations;
    use crate::repositories::ThreadRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    fn timestamp(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("timestamp").with_timezone(&Utc)
    }

    fn thread(id: &str, owner: &str) -> ConversationThread {
        ConversationThread {
            id: ThreadId(id.to_string()),
            owner_user_id: UserId(owner.to_string()),
            title: "Pipeline review".to_string(),
            created_at: timestamp("2026-08-01T09:00:00Z"),
            updated_at: timestamp("2026-08-01T09:00:00Z"),
        }
    }

    #[tokio::test]
    async fn thread_round_trips_and_is_owner_scoped() {
        let pool = setup_pool().await;
        let repo = SqlThreadRepository::new(pool);
        let owner = UserId("user-1".to_string());

        repo.save_thread(thread("thread-1", "user-1")).await.expect("save");

        let loaded = repo
            .find_thread(&owner, &ThreadId("thread-1".to_string()))
            .await
            .expect("find")
            .expect("thread present");
        assert_eq!(loaded.title, "Pipeline review");

        let other = UserId("user-2".to_string());
        let hidden = repo
            .find_thread(&other, &ThreadId("thread-1".to_string()))
            .await
            .expect("find");
        assert!(hidden.is_none());
    }

    #[tokio::test]
    async fn messages_come_back_in_creation_order() {
        let pool = setup_pool().await;
        let repo = SqlThreadRepository::new(pool);

        repo.save_thread(thread("thread-1", "user-1")).await.expect("save thread");

        let base = timestamp("2026-08-01T10:00:00Z");
        for index in 0..3i64 {
            repo.append_message(Message {
                id: MessageId(format!("m-{index}")),
                thread_id: ThreadId("thread-1".to_string()),
                role: if index % 2 == 0 { MessageRole::User } else { MessageRole::Assistant },
                content: format!("message {index}"),
                created_at: base + Duration::seconds(index),
            })
            .await
            .expect("append");
        }

        let messages =
            repo.list_messages(&ThreadId("thread-1".to_string())).await.expect("list");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "message 0");
        assert_eq!(messages[2].content, "message 2");
    }

    #[tokio::test]
    async fn threads_list_newest_first() {
        let pool = setup_pool().await;
        let repo = SqlThreadRepository::new(pool);
        let owner = UserId("user-1".to_string());

        let mut older = thread("thread-1", "user-1");
        older.updated_at = timestamp("2026-08-01T09:00:00Z");
        let mut newer = thread("thread-2", "user-1");
        newer.updated_at = timestamp("2026-08-02T09:00:00Z");

        repo.save_thread(older).await.expect("save");
        repo.save_thread(newer).await.expect("save");

        let threads = repo.list_threads(&owner).await.expect("list");
        assert_eq!(threads[0].id, ThreadId("thread-2".to_string()));
        assert_eq!(threads[1].id, ThreadId("thread-1".to_string()));
    }
}
