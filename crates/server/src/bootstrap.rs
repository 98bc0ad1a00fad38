use std::sync::Arc;

use bankdesk_agent::{AgentRuntime, BusError, OfflineModel, RuntimeDeps, RuntimeSettings};
use bankdesk_core::audit::TracingAuditSink;
use bankdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use bankdesk_db::repositories::{
    SqlAccountRepository, SqlCredentialRepository, SqlGatewayRepository,
};
use bankdesk_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::ws::SocketRegistry;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: AgentRuntime,
    pub sockets: Arc<SocketRegistry>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("agent runtime failed to start: {0}")]
    Runtime(#[from] BusError),
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

    let sockets = Arc::new(SocketRegistry::default());
    let runtime = AgentRuntime::start(RuntimeDeps {
        model: Arc::new(OfflineModel::new()),
        accounts: Arc::new(SqlAccountRepository::new(db_pool.clone())),
        gateway: Arc::new(SqlGatewayRepository::new(db_pool.clone())),
        credentials: Arc::new(SqlCredentialRepository::new(db_pool.clone())),
        replies: sockets.clone(),
        audit: Arc::new(TracingAuditSink),
        settings: RuntimeSettings::from_config(&config),
    })?;
    info!(
        event_name = "system.bootstrap.runtime_started",
        correlation_id = "bootstrap",
        max_tool_iterations = config.model.max_tool_iterations,
        default_label = %config.routing.default_label,
        "agent runtime registered"
    );

    Ok(Application { config, db_pool, runtime, sockets })
}

#[cfg(test)]
mod tests {
    use bankdesk_agent::LoginOutcome;
    use bankdesk_core::config::{ConfigOverrides, LoadOptions};
    use bankdesk_core::domain::session::SessionId;
    use bankdesk_db::DemoSeedDataset;
    use secrecy::SecretString;

    use crate::bootstrap::bootstrap;

    fn memory_options() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_rejects_an_invalid_iteration_bound() {
        let mut options = memory_options();
        options.overrides.max_tool_iterations = Some(0);

        let result = bootstrap(options).await;

        let message = result.err().expect("bootstrap should fail").to_string();
        assert!(message.contains("max_tool_iterations"), "{message}");
    }

    #[tokio::test]
    async fn bootstrapped_runtime_serves_seeded_customers() {
        let app = bootstrap(memory_options()).await.expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
             AND name IN ('accounts', 'ledger', 'gateway_transactions', 'credentials')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 4);

        DemoSeedDataset::load(&app.db_pool).await.expect("seed");
        let mut replies = app.sockets.attach(&SessionId::new("bob")).replies;

        let outcome = app
            .runtime
            .login("bob", SecretString::from("bob123".to_string()))
            .await
            .expect("login");
        assert_eq!(outcome, LoginOutcome::Accepted);

        app.runtime.submit(&SessionId::new("bob"), "what is my balance?").expect("submit");
        app.runtime.run_until_idle().await;

        let greeting = replies.recv().await.expect("greeting");
        assert_eq!(greeting.text, "Welcome, bob! How can I help you with your banking today?");
        let balance = replies.recv().await.expect("balance reply");
        assert_eq!(balance.agent, "RetailBankingAgent");
        assert!(balance.text.starts_with("Your current balance is $1200.50."), "{}", balance.text);

        app.db_pool.close().await;
    }
}
