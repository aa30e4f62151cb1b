use std::sync::Arc;

use anyhow::Context;

use uninexus_api::config::ApiConfig;
use uninexus_auth::Hs256JwtValidator;
use uninexus_core::SystemClock;
use uninexus_infra::store::DirectoryStore;
use uninexus_infra::workers::ExpirySweeper;
use uninexus_infra::{
    DirectoryServices, InMemoryDirectoryStore, InvitationSettings, PostgresDirectoryStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ApiConfig::from_env().context("invalid configuration")?;
    uninexus_observability::init_with(config.log_format);
    if config.uses_dev_secret() {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
    }

    let store: Arc<dyn DirectoryStore> = match &config.database_url {
        Some(url) => {
            let pool = uninexus_api::database::setup_database(url, config.db_max_connections).await?;
            Arc::new(PostgresDirectoryStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store (data is lost on restart)");
            Arc::new(InMemoryDirectoryStore::new())
        }
    };

    let services = DirectoryServices::new(
        store,
        Arc::new(SystemClock),
        InvitationSettings {
            ttl: config.invitation_ttl,
            frontend_url: config.frontend_url.clone(),
        },
    );
    let sweeper = ExpirySweeper::spawn(services.invitations.clone(), config.expiry_sweep_interval);

    let jwt = Arc::new(Hs256JwtValidator::new(config.jwt_secret.clone().into_bytes()));
    let app = uninexus_api::app::build_app_with(services, jwt);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.shutdown().await;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
