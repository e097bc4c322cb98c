//! Fire-and-forget metrics seam. The sink is an external collaborator; the
//! pipeline records outcomes and never waits on or fails from the sink.

use atrium_core::domain::records::SourceType;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricsEvent {
    EmbeddingGenerated { source_type: SourceType, success: bool, attempts: u32 },
}

pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricsEvent);
}

/// Default sink when no collector is configured.
#[derive(Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _event: MetricsEvent) {}
}

/// Sink that lands every event in the structured log stream.
#[derive(Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, event: MetricsEvent) {
        match event {
            MetricsEvent::EmbeddingGenerated { source_type, success, attempts } => {
                tracing::info!(
                    event_name = "assistant.metrics.embedding_generated",
                    source_type = source_type.as_str(),
                    success,
                    attempts,
                );
            }
        }
    }
}
