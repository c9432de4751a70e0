use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use frontdesk_agent::llm::{HttpModelClient, ModelError};
use frontdesk_agent::runtime::TurnEngine;
use frontdesk_agent::tools::{IncompleteRegistry, ToolRegistry};
use frontdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use frontdesk_crm::InMemoryCrm;
use frontdesk_db::{connect_with_settings, migrations, DbPool, SqliteSessionStore};

use crate::session::{SessionDeps, SessionRegistry};

/// Shared axum state: everything a request handler needs.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub registry: Arc<SessionRegistry>,
}

pub struct Application {
    pub config: AppConfig,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error(transparent)]
    ToolCatalog(#[from] IncompleteRegistry),
    #[error("model client could not be built: {0}")]
    Model(#[source] ModelError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
        config.database.busy_timeout_ms,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let crm = Arc::new(InMemoryCrm::with_fixtures());
    let tools = Arc::new(ToolRegistry::standard(crm));
    tools.ensure_complete()?;

    let model =
        Arc::new(HttpModelClient::new(config.model.clone()).map_err(BootstrapError::Model)?);
    let engine = Arc::new(TurnEngine::new(
        model,
        tools,
        config.session.max_tool_iterations,
        config.session.max_zip_attempts,
    ));

    let registry = Arc::new(SessionRegistry::new(Arc::new(SessionDeps {
        store: Arc::new(SqliteSessionStore::new(db_pool.clone())),
        engine,
        config: config.session.clone(),
    })));
    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        model_provider = ?config.model.provider,
        "session orchestrator assembled"
    );

    Ok(Application { config, state: AppState { db_pool, registry } })
}

#[cfg(test)]
mod tests {
    use frontdesk_core::config::{ConfigOverrides, LoadOptions};

    use super::bootstrap;

    fn memory_options() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_owned()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_wires_the_full_stack_against_sqlite_memory() {
        let app = bootstrap(memory_options()).await.expect("bootstrap succeeds");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name = 'session_state'",
        )
        .fetch_one(&app.state.db_pool)
        .await
        .expect("schema query succeeds");
        assert_eq!(table_count, 1);

        assert_eq!(app.state.registry.config().event_buffer_capacity, 100);
        app.state.db_pool.close().await;
    }
}
