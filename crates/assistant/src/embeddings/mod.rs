//! Document indexing: canonical text, the embedding pipeline, and the
//! background queue that keeps the retrieval store current after writes.

pub mod pipeline;
pub mod queue;

pub use pipeline::{
    company_document, contact_document, deal_document, note_document, task_document,
    EmbeddingPipeline, IndexRequest, MAX_EMBED_CHARS,
};
pub use queue::{IndexJob, IndexQueue, Indexer, NoopIndexer};
