use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use courier_auth::JwtValidator;
use courier_config::load as load_config;
use courier_database::{prepare_database, run_migrations};
use courier_gateway::create_router;
use courier_runtime::{close_connections, spawn_idle_sweeper, telemetry, BackendServices};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Courier realtime chat backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP and websocket server (default)
    Serve,
    /// Apply database migrations and exit
    Migrate,
    /// Mint a bearer token for local testing
    DevToken {
        /// User id to put in the token subject
        #[arg(long)]
        user: String,
        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing().context("failed to initialise tracing")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server().await,
        Commands::Migrate => migrate().await,
        Commands::DevToken { user, ttl } => dev_token(&user, ttl),
    }
}

async fn run_server() -> anyhow::Result<()> {
    info!("starting Courier backend");

    let config = load_config().context("failed to load configuration")?;

    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let state = Arc::new(services.gateway_state());
    let registry = state.registry.clone();
    let sweeper = spawn_idle_sweeper(
        registry.clone(),
        config.realtime.sweep_interval(),
        config.realtime.client_timeout(),
    );
    let app = create_router(state);

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    let drain = config.realtime.drain_timeout() + Duration::from_millis(250);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            courier_runtime::shutdown_signal().await;
            close_connections(&registry, drain).await;
        })
        .await
        .context("http server error")?;

    sweeper.abort();
    services.db_pool.close().await;
    info!("backend shut down");
    Ok(())
}

async fn migrate() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;

    let pool = prepare_database(&config.database)
        .await
        .context("failed to open database")?;
    run_migrations(&pool).await.context("failed to apply migrations")?;
    pool.close().await;

    info!(url = %config.database.url, "migrations applied");
    Ok(())
}

fn dev_token(user: &str, ttl: u64) -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;

    let token = JwtValidator::new(&config.auth)
        .issue(user, Duration::from_secs(ttl))
        .context("failed to mint token")?;

    println!("{token}");
    Ok(())
}
