#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use courier_auth::JwtValidator;
use courier_config::{AuthConfig, DatabaseConfig, MessageConfig, RealtimeConfig};
use courier_database::initialize_database;
use courier_gateway::{create_router, GatewayState};
use tempfile::TempDir;

pub struct TestApp {
    pub state: Arc<GatewayState>,
    pub jwt: JwtValidator,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_realtime(RealtimeConfig::default()).await
    }

    pub async fn with_realtime(realtime: RealtimeConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let database = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("gateway.db").display()),
            max_connections: 5,
        };
        let pool = initialize_database(&database).await.unwrap();

        let jwt = JwtValidator::new(&AuthConfig::default());
        let state = GatewayState::new(
            pool,
            Arc::new(jwt.clone()),
            realtime,
            &MessageConfig::default(),
        );

        Self {
            state: Arc::new(state),
            jwt,
            _dir: dir,
        }
    }

    pub fn router(&self) -> axum::Router {
        create_router(self.state.clone())
    }

    pub fn token(&self, user_id: &str) -> String {
        self.jwt.issue(user_id, Duration::from_secs(600)).unwrap()
    }

    /// Serve the router on an ephemeral port.
    pub async fn spawn(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }
}
