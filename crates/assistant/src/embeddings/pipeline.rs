use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use atrium_core::domain::embedding::DocumentEmbedding;
use atrium_core::domain::records::{Company, Contact, Deal, Note, SourceType, Task, UserId};
use atrium_db::repositories::{EmbeddingRepository, RepositoryError};

use crate::llm::LanguageModelProvider;
use crate::metrics::{MetricsEvent, MetricsSink, NoopMetrics};

/// Input text is capped before embedding; everything past this is noise for
/// retrieval anyway.
pub const MAX_EMBED_CHARS: usize = 10_000;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 5;

/// One unit of indexing work: which row to (re)index and the canonical text
/// to index it under.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexRequest {
    pub source_type: SourceType,
    pub source_id: String,
    pub owner: UserId,
    pub content_text: String,
}

pub fn company_document(company: &Company) -> IndexRequest {
    let mut lines = vec![format!("Company: {}", company.name)];
    if let Some(domain) = &company.domain {
        lines.push(format!("Domain: {domain}"));
    }
    if let Some(industry) = &company.industry {
        lines.push(format!("Industry: {industry}"));
    }
    if let Some(notes) = &company.notes {
        lines.push(format!("Notes: {notes}"));
    }

    IndexRequest {
        source_type: SourceType::Company,
        source_id: company.id.0.clone(),
        owner: company.owner_user_id.clone(),
        content_text: lines.join("\n"),
    }
}

pub fn contact_document(contact: &Contact, company_name: Option<&str>) -> IndexRequest {
    let mut lines = vec![format!("Contact: {}", contact.full_name())];
    if let Some(title) = &contact.title {
        lines.push(format!("Title: {title}"));
    }
    if let Some(email) = &contact.email {
        lines.push(format!("Email: {email}"));
    }
    if let Some(phone) = &contact.phone {
        lines.push(format!("Phone: {phone}"));
    }
    if let Some(company_name) = company_name {
        lines.push(format!("Company: {company_name}"));
    }

    IndexRequest {
        source_type: SourceType::Contact,
        source_id: contact.id.0.clone(),
        owner: contact.owner_user_id.clone(),
        content_text: lines.join("\n"),
    }
}

pub fn deal_document(
    deal: &Deal,
    company_name: Option<&str>,
    contact_name: Option<&str>,
) -> IndexRequest {
    let mut lines =
        vec![format!("Deal: {}", deal.title), format!("Stage: {}", deal.stage.as_str())];
    if let Some(amount_cents) = deal.amount_cents {
        lines.push(format!("Amount: ${}.{:02}", amount_cents / 100, amount_cents % 100));
    }
    if let Some(close_date) = deal.close_date {
        lines.push(format!("Close date: {}", close_date.format("%Y-%m-%d")));
    }
    if let Some(company_name) = company_name {
        lines.push(format!("Company: {company_name}"));
    }
    if let Some(contact_name) = contact_name {
        lines.push(format!("Contact: {contact_name}"));
    }

    IndexRequest {
        source_type: SourceType::Deal,
        source_id: deal.id.0.clone(),
        owner: deal.owner_user_id.clone(),
        content_text: lines.join("\n"),
    }
}

pub fn task_document(task: &Task) -> IndexRequest {
    let mut lines =
        vec![format!("Task: {}", task.title), format!("Status: {}", task.status.as_str())];
    if let Some(due_date) = task.due_date {
        lines.push(format!("Due: {}", due_date.format("%Y-%m-%d")));
    }
    if let Some(description) = &task.description {
        lines.push(format!("Description: {description}"));
    }

    IndexRequest {
        source_type: SourceType::Task,
        source_id: task.id.0.clone(),
        owner: task.owner_user_id.clone(),
        content_text: lines.join("\n"),
    }
}

pub fn note_document(note: &Note) -> IndexRequest {
    IndexRequest {
        source_type: SourceType::Note,
        source_id: note.id.0.clone(),
        owner: note.owner_user_id.clone(),
        content_text: format!("Note: {}", note.body),
    }
}

/// Embeds canonical text and writes the retrieval row. Embedding failure is
/// degradation, not an error: after the retries are spent the row is stored
/// with a NULL vector so keyword fallback still finds it.
pub struct EmbeddingPipeline {
    provider: Arc<dyn LanguageModelProvider>,
    repository: Arc<dyn EmbeddingRepository>,
    metrics: Arc<dyn MetricsSink>,
}

impl EmbeddingPipeline {
    pub fn new(
        provider: Arc<dyn LanguageModelProvider>,
        repository: Arc<dyn EmbeddingRepository>,
    ) -> Self {
        Self { provider, repository, metrics: Arc::new(NoopMetrics) }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns `Ok(true)` when a row was written. Content that renders blank
    /// is not indexable: any stale row for the source is removed instead and
    /// the result is `Ok(false)`.
    pub async fn index(&self, request: IndexRequest) -> Result<bool, RepositoryError> {
        let text = truncate_chars(&request.content_text, MAX_EMBED_CHARS);
        if text.trim().is_empty() {
            warn!(
                event_name = "assistant.embeddings.blank_content",
                source_type = request.source_type.as_str(),
                source_id = %request.source_id,
            );
            self.repository.delete(request.source_type, &request.source_id).await?;
            return Ok(false);
        }

        let embedding = if self.provider.supports_embeddings() {
            let (vector, attempts) = self.embed_with_retry(&text, &request).await;
            self.metrics.record(MetricsEvent::EmbeddingGenerated {
                source_type: request.source_type,
                success: vector.is_some(),
                attempts,
            });
            vector
        } else {
            None
        };

        self.repository
            .upsert(DocumentEmbedding {
                source_type: request.source_type,
                source_id: request.source_id,
                owner_user_id: request.owner,
                content_text: text,
                embedding,
                updated_at: Utc::now(),
            })
            .await?;
        Ok(true)
    }

    pub async fn remove(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<(), RepositoryError> {
        self.repository.delete(source_type, source_id).await?;
        Ok(())
    }

    async fn embed_with_retry(
        &self,
        text: &str,
        request: &IndexRequest,
    ) -> (Option<Vec<f32>>, u32) {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.provider.embed(text).await {
                Ok(vector) => return (Some(vector), attempt),
                Err(error) => {
                    warn!(
                        event_name = "assistant.embeddings.attempt_failed",
                        source_type = request.source_type.as_str(),
                        source_id = %request.source_id,
                        attempt,
                        error = %error,
                    );
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                }
            }
        }

        warn!(
            event_name = "assistant.embeddings.degraded",
            source_type = request.source_type.as_str(),
            source_id = %request.source_id,
        );
        (None, MAX_ATTEMPTS)
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let secs = BACKOFF_BASE_SECS.saturating_mul(1u64 << (attempt - 1)).min(BACKOFF_CAP_SECS);
    Duration::from_secs(secs)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
