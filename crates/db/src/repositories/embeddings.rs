use sqlx::{sqlite::SqliteRow, Row};

use atrium_core::domain::embedding::DocumentEmbedding;
use atrium_core::domain::records::{SourceType, UserId};

use super::records::parse_timestamp;
use super::{EmbeddingRepository, RepositoryError};
use crate::DbPool;

pub struct SqlEmbeddingRepository {
    pool: DbPool,
}

impl SqlEmbeddingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EmbeddingRepository for SqlEmbeddingRepository {
    async fn upsert(&self, document: DocumentEmbedding) -> Result<(), RepositoryError> {
        let embedding_json = document
            .embedding
            .as_ref()
            .map(|vector| {
                serde_json::to_string(vector)
                    .map_err(|error| RepositoryError::Decode(error.to_string()))
            })
            .transpose()?;

        sqlx::query(
            "INSERT INTO document_embeddings (
                source_type, source_id, owner_user_id, content_text, embedding, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(source_type, source_id) DO UPDATE SET
                owner_user_id = excluded.owner_user_id,
                content_text = excluded.content_text,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at",
        )
        .bind(document.source_type.as_str())
        .bind(&document.source_id)
        .bind(&document.owner_user_id.0)
        .bind(&document.content_text)
        .bind(embedding_json.as_deref())
        .bind(document.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM document_embeddings WHERE source_type = ? AND source_id = ?",
        )
        .bind(source_type.as_str())
        .bind(source_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_for_owner(
        &self,
        owner: &UserId,
    ) -> Result<Vec<DocumentEmbedding>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT source_type, source_id, owner_user_id, content_text, embedding, updated_at
             FROM document_embeddings
             WHERE owner_user_id = ?
             ORDER BY updated_at DESC",
        )
        .bind(&owner.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(document_from_row).collect()
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

        let clauses =
            vec!["instr(lower(content_text), ?) > 0"; terms.len()].join(" OR ");
        let sql = format!(
            "SELECT source_type, source_id, owner_user_id, content_text, embedding, updated_at
             FROM document_embeddings
             WHERE owner_user_id = ? AND ({clauses})
             ORDER BY updated_at DESC
             LIMIT ?"
        );

        let mut query = sqlx::query(&sql).bind(&owner.0);
        for term in terms {
            query = query.bind(term.to_lowercase());
        }
        query = query.bind(limit as i64);

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(document_from_row).collect()
    }
}

fn document_from_row(row: SqliteRow) -> Result<DocumentEmbedding, RepositoryError> {
    let source_type_raw = row.try_get::<String, _>("source_type")?;
    let source_type = SourceType::parse(&source_type_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown source_type `{source_type_raw}`"))
    })?;

    let embedding = row
        .try_get::<Option<String>, _>("embedding")?
        .map(|json| {
            serde_json::from_str::<Vec<f32>>(&json).map_err(|error| {
                RepositoryError::Decode(format!("invalid embedding vector: {error}"))
            })
        })
        .transpose()?;

    Ok(DocumentEmbedding {
        source_type,
        source_id: row.try_get("source_id")?,
        owner_user_id: UserId(row.try_get("owner_user_id")?),
        content_text: row.try_get("content_text")?,
        embedding,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use atrium_core::domain::embedding::DocumentEmbedding;
    use atrium_core::domain::records::{SourceType, UserId};

    use super::SqlEmbeddingRepository;
    use crate::migrations;
    use crate::repositories::EmbeddingRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    fn timestamp(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("timestamp").with_timezone(&Utc)
    }

    fn document(source_id: &str, owner: &str, text: &str) -> DocumentEmbedding {
        DocumentEmbedding {
            source_type: SourceType::Deal,
            source_id: source_id.to_string(),
            owner_user_id: UserId(owner.to_string()),
            content_text: text.to_string(),
            embedding: Some(vec![0.1, 0.2, 0.3]),
            updated_at: timestamp("2026-08-10T12:00:00Z"),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_vector_and_text() {
        let pool = setup_pool().await;
        let repo = SqlEmbeddingRepository::new(pool);
        let owner = UserId("user-1".to_string());

        repo.upsert(document("deal-1", "user-1", "old text")).await.expect("insert");
        let mut updated = document("deal-1", "user-1", "new text");
        updated.embedding = None;
        repo.upsert(updated).await.expect("update");

        let rows = repo.list_for_owner(&owner).await.expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content_text, "new text");
        assert!(rows[0].embedding.is_none());
    }

    #[tokio::test]
    async fn keyword_search_is_case_insensitive_and_owner_scoped() {
        let pool = setup_pool().await;
        let repo = SqlEmbeddingRepository::new(pool);
        let owner = UserId("user-1".to_string());

        repo.upsert(document("deal-1", "user-1", "Acme renewal negotiation"))
            .await
            .expect("insert");
        repo.upsert(document("deal-2", "user-2", "Acme expansion")).await.expect("insert");

        let hits = repo
            .keyword_search(&owner, &["acme".to_string()], 10)
            .await
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_id, "deal-1");
    }

    #[tokio::test]
    async fn delete_removes_the_indexed_row() {
        let pool = setup_pool().await;
        let repo = SqlEmbeddingRepository::new(pool);
        let owner = UserId("user-1".to_string());

        repo.upsert(document("deal-1", "user-1", "text")).await.expect("insert");
        assert!(repo.delete(SourceType::Deal, "deal-1").await.expect("delete"));
        assert!(!repo.delete(SourceType::Deal, "deal-1").await.expect("delete again"));
        assert!(repo.list_for_owner(&owner).await.expect("list").is_empty());
    }
}
