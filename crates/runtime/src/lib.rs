use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use courier_auth::JwtValidator;
use courier_config::AppConfig;
use courier_database::initialize_database;
use courier_gateway::{CloseReason, ConnectionRegistry, GatewayState};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::TRACE)
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

#[derive(Clone)]
pub struct BackendServices {
    pub db_pool: SqlitePool,
    pub jwt: Arc<JwtValidator>,
    pub config: AppConfig,
}

impl BackendServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let db_pool = initialize_database(&config.database)
            .await
            .context("failed to prepare database")?;

        let jwt = Arc::new(JwtValidator::new(&config.auth));
        info!(issuer = %config.auth.issuer, "token validation ready");

        Ok(Self {
            db_pool,
            jwt,
            config: config.clone(),
        })
    }

    /// Wire the realtime gateway on top of the shared pool.
    pub fn gateway_state(&self) -> GatewayState {
        GatewayState::new(
            self.db_pool.clone(),
            self.jwt.clone(),
            self.config.realtime.clone(),
            &self.config.messages,
        )
    }
}

/// Periodically evict connections that stopped talking to us.
pub fn spawn_idle_sweeper(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = registry.sweep_idle(timeout);
            if evicted > 0 {
                info!(evicted, "evicted idle connections");
            } else {
                debug!(connections = registry.connection_count(), "idle sweep");
            }
        }
    })
}

/// Tell every live session to close and give the writers a moment to flush.
pub async fn close_connections(registry: &ConnectionRegistry, grace: Duration) {
    let closed = registry.close_all(CloseReason::Shutdown);
    if closed > 0 {
        info!(closed, "closing realtime connections");
        tokio::time::sleep(grace).await;
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
