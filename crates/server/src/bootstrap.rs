use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use atrium_assistant::{
    ActionService, DisabledProvider, EmbeddingPipeline, HttpProvider, IndexQueue,
    LanguageModelProvider, Orchestrator, ProviderError, RetrievalEngine, TracingMetrics,
};
use atrium_core::config::{AppConfig, ConfigError, LlmProvider, LoadOptions};
use atrium_db::repositories::{
    SqlActionRepository, SqlEmbeddingRepository, SqlRecordRepository, SqlThreadRepository,
};
use atrium_db::{connect, migrations, DbPool};

use crate::assistant_api::ApiState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub api: ApiState,
    pub index_worker: JoinHandle<()>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm provider setup failed: {0}")]
    Provider(#[source] ProviderError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let provider: Arc<dyn LanguageModelProvider> = match config.llm.provider {
        LlmProvider::Disabled => Arc::new(DisabledProvider),
        _ => Arc::new(HttpProvider::new(config.llm.clone()).map_err(BootstrapError::Provider)?),
    };
    info!(
        event_name = "system.bootstrap.llm_ready",
        provider = ?config.llm.provider,
        embeddings = provider.supports_embeddings(),
        "language model provider initialized"
    );

    let records = Arc::new(SqlRecordRepository::new(db_pool.clone()));
    let embeddings = Arc::new(SqlEmbeddingRepository::new(db_pool.clone()));
    let threads = Arc::new(SqlThreadRepository::new(db_pool.clone()));
    let action_rows = Arc::new(SqlActionRepository::new(db_pool.clone()));

    let pipeline = EmbeddingPipeline::new(provider.clone(), embeddings.clone())
        .with_metrics(Arc::new(TracingMetrics));
    let (indexer, index_worker) = IndexQueue::start(pipeline);

    let actions = Arc::new(ActionService::new(action_rows, records.clone(), indexer));
    let retrieval = Arc::new(RetrievalEngine::new(provider.clone(), embeddings, records));
    let orchestrator =
        Arc::new(Orchestrator::new(provider, threads.clone(), retrieval, actions.clone()));

    Ok(Application {
        config,
        db_pool,
        api: ApiState { orchestrator, actions, threads },
        index_worker,
    })
}

#[cfg(test)]
mod tests {
    use atrium_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn memory_options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_builds_the_api() {
        let app = bootstrap(memory_options("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed against an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN \
             ('companies', 'document_embeddings', 'conversation_threads', 'action_proposals')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("baseline tables should exist after bootstrap");
        assert_eq!(table_count, 4);

        app.index_worker.abort();
        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_a_non_sqlite_database_url() {
        let result = bootstrap(memory_options("postgres://localhost/atrium")).await;
        assert!(result.is_err());
    }
}
