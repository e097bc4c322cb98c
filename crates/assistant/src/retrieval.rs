//! Retrieval over the per-owner document index.
//!
//! Scoring blends cosine similarity against a freshness signal; rows without
//! a vector, or owners whose provider cannot embed the query, fall back to
//! keyword search with a fixed score. Entity details are always re-read from
//! the live record so results never leak stale titles.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use atrium_core::domain::embedding::{Citation, DocumentEmbedding, EntityDetails, RetrievalResult};
use atrium_core::domain::records::{
    CompanyId, ContactId, DealId, NoteId, SourceType, TaskId, UserId,
};
use atrium_core::reply::CitationRef;
use atrium_db::repositories::{EmbeddingRepository, RecordRepository, RepositoryError};

use crate::llm::LanguageModelProvider;

pub const TOP_K: usize = 8;
pub const MIN_SCORE: f64 = 0.3;
pub const KEYWORD_FALLBACK_SCORE: f64 = 0.7;

/// Per-call search knobs. `source_types: None` searches every record type;
/// `min_similarity` applies to the blended score, not raw cosine.
#[derive(Clone, Debug)]
pub struct SearchOptions {
    pub top_k: usize,
    pub source_types: Option<Vec<SourceType>>,
    pub min_similarity: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { top_k: TOP_K, source_types: None, min_similarity: MIN_SCORE }
    }
}

impl SearchOptions {
    fn allows(&self, source_type: SourceType) -> bool {
        self.source_types.as_ref().map_or(true, |types| types.contains(&source_type))
    }
}

const SIMILARITY_WEIGHT: f64 = 0.85;
const FRESHNESS_WEIGHT: f64 = 0.15;
const FRESHNESS_WINDOW_SECS: f64 = 30.0 * 24.0 * 3600.0;
const MIN_KEYWORD_TERM_LEN: usize = 3;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct RetrievalEngine {
    provider: Arc<dyn LanguageModelProvider>,
    embeddings: Arc<dyn EmbeddingRepository>,
    records: Arc<dyn RecordRepository>,
}

impl RetrievalEngine {
    pub fn new(
        provider: Arc<dyn LanguageModelProvider>,
        embeddings: Arc<dyn EmbeddingRepository>,
        records: Arc<dyn RecordRepository>,
    ) -> Self {
        Self { provider, embeddings, records }
    }

    pub async fn retrieve(
        &self,
        owner: &UserId,
        query: &str,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        self.search(owner, query, SearchOptions::default()).await
    }

    pub async fn search(
        &self,
        owner: &UserId,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        self.search_at(owner, query, options, Utc::now()).await
    }

    pub async fn search_at(
        &self,
        owner: &UserId,
        query: &str,
        options: SearchOptions,
        now: DateTime<Utc>,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let mut scored = if self.provider.supports_embeddings() {
            match self.provider.embed(query).await {
                Ok(query_vector) => {
                    self.score_by_similarity(owner, &query_vector, &options, now).await?
                }
                Err(error) => {
                    // A dead embedding endpoint must not kill the turn.
                    warn!(
                        event_name = "assistant.retrieval.query_embed_failed",
                        error = %error,
                    );
                    self.keyword_fallback(owner, query, &options).await?
                }
            }
        } else {
            self.keyword_fallback(owner, query, &options).await?
        };

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(options.top_k);

        let mut results = Vec::with_capacity(scored.len());
        for (document, score) in scored {
            // A row whose source record is gone is stale: drop it from the
            // results and from the index.
            let Some(entity) =
                self.resolve_entity(owner, document.source_type, &document.source_id).await?
            else {
                warn!(
                    event_name = "assistant.retrieval.stale_row_dropped",
                    source_type = document.source_type.as_str(),
                    source_id = %document.source_id,
                );
                self.embeddings.delete(document.source_type, &document.source_id).await?;
                continue;
            };
            results.push(RetrievalResult {
                source_type: document.source_type,
                source_id: document.source_id,
                score,
                content_text: document.content_text,
                entity: Some(entity),
            });
        }
        Ok(results)
    }

    /// Resolves model-emitted citation refs against the owner's live records.
    /// Unknown ids and foreign ids are dropped silently.
    pub async fn resolve_citations(
        &self,
        owner: &UserId,
        refs: &[CitationRef],
    ) -> Result<Vec<Citation>, RetrievalError> {
        let mut citations = Vec::new();
        for reference in refs {
            if let Some(entity) =
                self.resolve_entity(owner, reference.source_type, &reference.id).await?
            {
                citations.push(Citation {
                    id: reference.id.clone(),
                    source_type: reference.source_type,
                    title: entity.title,
                    url: entity.url,
                });
            }
        }
        Ok(citations)
    }

    async fn score_by_similarity(
        &self,
        owner: &UserId,
        query_vector: &[f32],
        options: &SearchOptions,
        now: DateTime<Utc>,
    ) -> Result<Vec<(DocumentEmbedding, f64)>, RetrievalError> {
        let documents = self.embeddings.list_for_owner(owner).await?;

        Ok(documents
            .into_iter()
            .filter(|document| options.allows(document.source_type))
            .filter_map(|document| {
                let vector = document.embedding.as_deref()?;
                let similarity = cosine_similarity(query_vector, vector);
                let blended = similarity * SIMILARITY_WEIGHT
                    + freshness(document.updated_at, now) * FRESHNESS_WEIGHT;
                (blended >= options.min_similarity).then_some((document, blended))
            })
            .collect())
    }

    async fn keyword_fallback(
        &self,
        owner: &UserId,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<(DocumentEmbedding, f64)>, RetrievalError> {
        let terms = keyword_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let documents = self.embeddings.keyword_search(owner, &terms, options.top_k).await?;
        Ok(documents
            .into_iter()
            .filter(|document| options.allows(document.source_type))
            .map(|document| (document, KEYWORD_FALLBACK_SCORE))
            .collect())
    }

    async fn resolve_entity(
        &self,
        owner: &UserId,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<Option<EntityDetails>, RetrievalError> {
        let entity = match source_type {
            SourceType::Company => self
                .records
                .find_company(owner, &CompanyId(source_id.to_string()))
                .await?
                .map(|company| EntityDetails {
                    title: company.name,
                    subtitle: company.industry,
                    url: format!("/app/companies/{source_id}"),
                    metadata: json!({ "domain": company.domain }),
                }),
            SourceType::Contact => self
                .records
                .find_contact(owner, &ContactId(source_id.to_string()))
                .await?
                .map(|contact| EntityDetails {
                    title: contact.full_name(),
                    subtitle: contact.title.clone(),
                    url: format!("/app/contacts/{source_id}"),
                    metadata: json!({ "email": contact.email }),
                }),
            SourceType::Deal => self
                .records
                .find_deal(owner, &DealId(source_id.to_string()))
                .await?
                .map(|deal| EntityDetails {
                    title: deal.title,
                    subtitle: Some(deal.stage.as_str().to_string()),
                    url: format!("/app/deals/{source_id}"),
                    metadata: json!({ "amount_cents": deal.amount_cents }),
                }),
            SourceType::Task => self
                .records
                .find_task(owner, &TaskId(source_id.to_string()))
                .await?
                .map(|task| EntityDetails {
                    title: task.title,
                    subtitle: Some(task.status.as_str().to_string()),
                    url: format!("/app/tasks/{source_id}"),
                    metadata: json!({ "due_date": task.due_date }),
                }),
            SourceType::Note => self
                .records
                .find_note(owner, &NoteId(source_id.to_string()))
                .await?
                .map(|note| EntityDetails {
                    title: snippet(&note.body, 60),
                    subtitle: None,
                    url: format!("/app/notes/{source_id}"),
                    metadata: json!({}),
                }),
        };
        Ok(entity)
    }
}

/// Cosine similarity; dimension mismatch and zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Linear decay from 1.0 (updated now) to 0.0 at thirty days; clock skew in
/// the future clamps to 1.0.
pub fn freshness(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_secs = (now - updated_at).num_seconds().max(0) as f64;
    1.0 - (age_secs / FRESHNESS_WINDOW_SECS).min(1.0)
}

fn keyword_terms(query: &str) -> Vec<String> {
    query
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| token.chars().count() >= MIN_KEYWORD_TERM_LEN)
        .map(|token| token.to_lowercase())
        .collect()
}

fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars.saturating_sub(1)).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, Utc};

    use atrium_core::domain::embedding::DocumentEmbedding;
    use atrium_core::domain::records::{
        Deal, DealId, DealStage, SourceType, UserId,
    };
    use atrium_core::reply::CitationRef;
    use atrium_db::repositories::{
        EmbeddingRepository, InMemoryEmbeddingRepository, InMemoryRecordRepository,
        RecordRepository,
    };

    use super::{
        cosine_similarity, freshness, RetrievalEngine, SearchOptions, KEYWORD_FALLBACK_SCORE,
    };
    use crate::llm::ScriptedProvider;

    fn document(
        source_id: &str,
        embedding: Option<Vec<f32>>,
        updated_at: DateTime<Utc>,
    ) -> DocumentEmbedding {
        typed_document(SourceType::Deal, source_id, embedding, updated_at)
    }

    fn typed_document(
        source_type: SourceType,
        source_id: &str,
        embedding: Option<Vec<f32>>,
        updated_at: DateTime<Utc>,
    ) -> DocumentEmbedding {
        DocumentEmbedding {
            source_type,
            source_id: source_id.to_string(),
            owner_user_id: UserId("user-1".to_string()),
            content_text: format!("{}: {source_id} renewal", source_type.as_str()),
            embedding,
            updated_at,
        }
    }

    fn deal(id: &str, owner: &str) -> Deal {
        Deal {
            id: DealId(id.to_string()),
            owner_user_id: UserId(owner.to_string()),
            title: format!("{id} renewal"),
            amount_cents: Some(500_000),
            stage: DealStage::Proposal,
            close_date: None,
            company_id: None,
            contact_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn freshness_decays_over_thirty_days() {
        let now = Utc::now();
        assert_eq!(freshness(now, now), 1.0);
        assert!(freshness(now - Duration::days(15), now) < 0.51);
        assert!(freshness(now - Duration::days(15), now) > 0.49);
        assert_eq!(freshness(now - Duration::days(90), now), 0.0);
        assert_eq!(freshness(now + Duration::days(1), now), 1.0);
    }

    #[tokio::test]
    async fn similar_fresh_documents_outrank_stale_ones() {
        let provider =
            Arc::new(ScriptedProvider::streaming(Vec::new()).with_embedding(vec![1.0, 0.0]));
        let embeddings = Arc::new(InMemoryEmbeddingRepository::default());
        let records = Arc::new(InMemoryRecordRepository::default());
        let now = Utc::now();

        embeddings
            .upsert(document("deal-fresh", Some(vec![1.0, 0.0]), now))
            .await
            .expect("upsert");
        embeddings
            .upsert(document("deal-stale", Some(vec![1.0, 0.0]), now - Duration::days(29)))
            .await
            .expect("upsert");
        records.save_deal(deal("deal-fresh", "user-1")).await.expect("save");
        records.save_deal(deal("deal-stale", "user-1")).await.expect("save");

        let engine = RetrievalEngine::new(provider, embeddings, records);
        let owner = UserId("user-1".to_string());
        let results = engine
            .search_at(&owner, "renewal", SearchOptions::default(), now)
            .await
            .expect("retrieve");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_id, "deal-fresh");
        assert!(results[0].score > results[1].score);
        assert_eq!(results[0].entity.as_ref().map(|e| e.title.as_str()), Some("deal-fresh renewal"));
    }

    #[tokio::test]
    async fn dissimilar_documents_fall_below_the_floor() {
        let provider =
            Arc::new(ScriptedProvider::streaming(Vec::new()).with_embedding(vec![1.0, 0.0]));
        let embeddings = Arc::new(InMemoryEmbeddingRepository::default());
        let records = Arc::new(InMemoryRecordRepository::default());
        let now = Utc::now();

        // Orthogonal vector: similarity 0, blended score capped at 0.15.
        embeddings
            .upsert(document("deal-1", Some(vec![0.0, 1.0]), now))
            .await
            .expect("upsert");

        let engine = RetrievalEngine::new(provider, embeddings, records);
        let owner = UserId("user-1".to_string());
        let results = engine
            .search_at(&owner, "renewal", SearchOptions::default(), now)
            .await
            .expect("retrieve");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn embed_failure_falls_back_to_keyword_search() {
        let provider = Arc::new(ScriptedProvider::streaming(Vec::new()).failing_embeds());
        let embeddings = Arc::new(InMemoryEmbeddingRepository::default());
        let records = Arc::new(InMemoryRecordRepository::default());
        let now = Utc::now();

        embeddings.upsert(document("deal-1", None, now)).await.expect("upsert");
        records.save_deal(deal("deal-1", "user-1")).await.expect("save");

        let engine = RetrievalEngine::new(provider, embeddings, records);
        let owner = UserId("user-1".to_string());
        let results = engine
            .search_at(&owner, "renewal status", SearchOptions::default(), now)
            .await
            .expect("retrieve");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, KEYWORD_FALLBACK_SCORE);
    }

    #[tokio::test]
    async fn source_type_filter_restricts_the_result_set() {
        let provider = Arc::new(ScriptedProvider::streaming(Vec::new()).without_embeddings());
        let embeddings = Arc::new(InMemoryEmbeddingRepository::default());
        let records = Arc::new(InMemoryRecordRepository::default());
        let now = Utc::now();

        embeddings
            .upsert(typed_document(SourceType::Deal, "deal-1", None, now))
            .await
            .expect("upsert");
        embeddings
            .upsert(typed_document(SourceType::Task, "task-1", None, now))
            .await
            .expect("upsert");
        records.save_deal(deal("deal-1", "user-1")).await.expect("save");

        let engine = RetrievalEngine::new(provider, embeddings, records);
        let owner = UserId("user-1".to_string());
        let options =
            SearchOptions { source_types: Some(vec![SourceType::Deal]), ..SearchOptions::default() };
        let results = engine.search_at(&owner, "renewal", options, now).await.expect("search");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_type, SourceType::Deal);
    }

    #[tokio::test]
    async fn rows_for_deleted_records_are_dropped_and_pruned() {
        let provider = Arc::new(ScriptedProvider::streaming(Vec::new()).without_embeddings());
        let embeddings = Arc::new(InMemoryEmbeddingRepository::default());
        let records = Arc::new(InMemoryRecordRepository::default());
        let now = Utc::now();

        // Indexed row survives its record.
        embeddings.upsert(document("deal-gone", None, now)).await.expect("upsert");

        let engine = RetrievalEngine::new(provider, embeddings.clone(), records);
        let owner = UserId("user-1".to_string());
        let results = engine
            .search_at(&owner, "renewal", SearchOptions::default(), now)
            .await
            .expect("search");

        assert!(results.is_empty());
        let remaining = embeddings.list_for_owner(&owner).await.expect("list");
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn citations_resolve_owner_scoped_and_drop_unknown_ids() {
        let provider = Arc::new(ScriptedProvider::streaming(Vec::new()));
        let embeddings = Arc::new(InMemoryEmbeddingRepository::default());
        let records = Arc::new(InMemoryRecordRepository::default());

        records.save_deal(deal("deal-1", "user-1")).await.expect("save");
        records.save_deal(deal("deal-2", "user-2")).await.expect("save");

        let engine = RetrievalEngine::new(provider, embeddings, records);
        let owner = UserId("user-1".to_string());
        let refs = vec![
            CitationRef { id: "deal-1".to_string(), source_type: SourceType::Deal },
            CitationRef { id: "deal-2".to_string(), source_type: SourceType::Deal },
            CitationRef { id: "missing".to_string(), source_type: SourceType::Deal },
        ];

        let citations = engine.resolve_citations(&owner, &refs).await.expect("resolve");
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].id, "deal-1");
        assert_eq!(citations[0].url, "/app/deals/deal-1");
    }
}
