use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use standsign_core::config::{AppConfig, ConfigError, LoadOptions};
use standsign_core::signing::{InMemorySnapshotProvider, NotificationDispatcher, SnapshotProvider};
use standsign_db::{connect_with_settings, migrations, DbPool, SqlTokenStore};

use crate::audit::SqlAuditSink;
use crate::health;
use crate::notify::{NoopNotifier, WebhookNotifier};
use crate::portal::{self, PortalState};
use crate::provider::HttpSnapshotProvider;
use crate::signing::SigningService;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub router: axum::Router,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
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

    let snapshots: Arc<dyn SnapshotProvider> = match &config.snapshot_provider.base_url {
        Some(base_url) => Arc::new(
            HttpSnapshotProvider::new(base_url.clone(), config.snapshot_provider.timeout_secs)
                .map_err(BootstrapError::HttpClient)?,
        ),
        None => {
            warn!(
                event_name = "system.bootstrap.snapshot_provider_missing",
                correlation_id = "bootstrap",
                "no snapshot provider configured, links cannot resolve documents"
            );
            Arc::new(InMemorySnapshotProvider::default())
        }
    };

    let notifier: Arc<dyn NotificationDispatcher> = match &config.notifier.webhook_url {
        Some(webhook_url) => Arc::new(
            WebhookNotifier::new(
                webhook_url.clone(),
                config.notifier.bearer_token.clone(),
                config.notifier.timeout_secs,
            )
            .map_err(BootstrapError::HttpClient)?,
        ),
        None => Arc::new(NoopNotifier),
    };

    let service = Arc::new(SigningService::new(
        Arc::new(SqlTokenStore::new(db_pool.clone())),
        snapshots,
        notifier,
        Arc::new(SqlAuditSink::new(db_pool.clone())),
        config.signing.max_signature_bytes,
    ));

    let router = portal::router(PortalState::new(service, config.signing.public_base_url.clone()))
        .merge(health::router(db_pool.clone()));

    Ok(Application { config, db_pool, router })
}
