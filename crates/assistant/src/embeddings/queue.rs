use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use atrium_core::domain::records::SourceType;

use super::pipeline::{EmbeddingPipeline, IndexRequest};

#[derive(Clone, Debug)]
pub enum IndexJob {
    Upsert(IndexRequest),
    Delete { source_type: SourceType, source_id: String },
}

/// Fire-and-forget indexing seam. Callers on the write path never wait for
/// the index; a lost job means one stale retrieval row, not a failed write.
pub trait Indexer: Send + Sync {
    fn schedule(&self, job: IndexJob);
}

/// Background index worker fed by an unbounded channel. Jobs are processed
/// strictly in order; the worker drains and exits once every handle is
/// dropped.
pub struct IndexQueue {
    sender: mpsc::UnboundedSender<IndexJob>,
}

impl IndexQueue {
    pub fn start(pipeline: EmbeddingPipeline) -> (Arc<Self>, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<IndexJob>();

        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                match job {
                    IndexJob::Upsert(request) => {
                        let source_type = request.source_type;
                        let source_id = request.source_id.clone();
                        if let Err(error) = pipeline.index(request).await {
                            error!(
                                event_name = "assistant.index_queue.upsert_failed",
                                source_type = source_type.as_str(),
                                source_id = %source_id,
                                error = %error,
                            );
                        }
                    }
                    IndexJob::Delete { source_type, source_id } => {
                        if let Err(error) = pipeline.remove(source_type, &source_id).await {
                            error!(
                                event_name = "assistant.index_queue.delete_failed",
                                source_type = source_type.as_str(),
                                source_id = %source_id,
                                error = %error,
                            );
                        }
                    }
                }
            }
            debug!(event_name = "assistant.index_queue.drained");
        });

        (Arc::new(Self { sender }), worker)
    }
}

impl Indexer for IndexQueue {
    fn schedule(&self, job: IndexJob) {
        if self.sender.send(job).is_err() {
            warn!(event_name = "assistant.index_queue.closed");
        }
    }
}

/// For tests and degraded setups that run without an index worker.
#[derive(Default)]
pub struct NoopIndexer;

impl Indexer for NoopIndexer {
    fn schedule(&self, _job: IndexJob) {}
}
