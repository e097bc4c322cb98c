use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::records::{SourceType, UserId};

/// One indexed row of the retrieval store. A row is eligible for similarity
/// search only while `embedding` is non-null; rows without a vector remain
/// reachable through keyword fallback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentEmbedding {
    pub source_type: SourceType,
    pub source_id: String,
    pub owner_user_id: UserId,
    pub content_text: String,
    pub embedding: Option<Vec<f32>>,
    pub updated_at: DateTime<Utc>,
}

/// Live details for a retrieved row, re-read from the source entity at query
/// time so results never show stale titles or dangling locators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityDetails {
    pub title: String,
    pub subtitle: Option<String>,
    pub url: String,
    pub metadata: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub source_type: SourceType,
    pub source_id: String,
    pub score: f64,
    pub content_text: String,
    pub entity: Option<EntityDetails>,
}

/// Reference to a record cited by a plain-text assistant reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub title: String,
    pub url: String,
}
