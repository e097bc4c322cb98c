//! Atrium assistant - retrieval, indexing, actions, and turn orchestration
//!
//! Everything here composes the pure logic from `atrium-core` with the
//! repositories from `atrium-db` and a language model provider:
//!
//! - `llm`: the provider trait plus the HTTP implementation and a scripted
//!   test double.
//! - `embeddings`: canonical document text, the indexing pipeline with retry
//!   and degradation, and the background index queue.
//! - `retrieval`: blended similarity/freshness scoring with keyword fallback.
//! - `actions`: the proposal state machine and the typed executor.
//! - `orchestrator`: one chat turn end to end, streamed as events.
//! - `metrics`: the sink seam the pipeline reports indexing outcomes to.

pub mod actions;
pub mod embeddings;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod prompt;
pub mod retrieval;

pub use actions::{ActionError, ActionService};
pub use embeddings::{EmbeddingPipeline, IndexJob, IndexQueue, IndexRequest, Indexer, NoopIndexer};
pub use metrics::{MetricsEvent, MetricsSink, NoopMetrics, TracingMetrics};
pub use llm::{
    ChatMessage, DisabledProvider, HttpProvider, LanguageModelProvider, ProviderError,
    ScriptedProvider,
};
pub use orchestrator::{Orchestrator, OrchestratorError, TurnEvent, TurnPhase, TurnRequest};
pub use retrieval::{RetrievalEngine, RetrievalError, SearchOptions};
