use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "courier.toml",
    "config/courier.toml",
    "crates/config/courier.toml",
    "../courier.toml",
    "../config/courier.toml",
    "../crates/config/courier.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub realtime: RealtimeConfig,
    pub messages: MessageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://courier.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Settings for validating bearer tokens issued by the identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    #[serde(default = "AuthConfig::default_leeway")]
    pub leeway_seconds: u64,
}

impl AuthConfig {
    const fn default_leeway() -> u64 {
        30
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "development-secret-change-me".to_string(),
            issuer: "courier".to_string(),
            audience: "courier-clients".to_string(),
            leeway_seconds: Self::default_leeway(),
        }
    }
}

/// Tunables for live connections and the message pipeline.
///
/// ```
/// use courier_config::RealtimeConfig;
///
/// let realtime = RealtimeConfig::default();
/// assert_eq!(realtime.unsend_window_seconds, 60);
/// assert_eq!(realtime.unsend_window().as_secs(), 60);
/// assert_eq!(realtime.outbound_queue_size, 256);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub unsend_window_seconds: u64,
    pub max_connections_per_user: usize,
    pub outbound_queue_size: usize,
    pub heartbeat_interval_seconds: u64,
    pub client_timeout_seconds: u64,
    pub handshake_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub drain_timeout_ms: u64,
    pub max_frame_bytes: usize,
    pub typing_ttl_ms: u64,
    pub read_retry_attempts: u32,
    pub read_retry_backoff_ms: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            unsend_window_seconds: 60,
            max_connections_per_user: 32,
            outbound_queue_size: 256,
            heartbeat_interval_seconds: 30,
            client_timeout_seconds: 90,
            handshake_timeout_ms: 10_000,
            request_timeout_ms: 5_000,
            drain_timeout_ms: 1_000,
            max_frame_bytes: 8_192,
            typing_ttl_ms: 3_000,
            read_retry_attempts: 3,
            read_retry_backoff_ms: 25,
            sweep_interval_seconds: 30,
        }
    }
}

impl RealtimeConfig {
    pub fn unsend_window(&self) -> Duration {
        Duration::from_secs(self.unsend_window_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds.max(1))
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_seconds.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn read_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.read_retry_backoff_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    pub max_content_length: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            max_content_length: 4_096,
            default_page_size: 50,
            max_page_size: 200,
        }
    }
}

fn as_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use courier_config::load;
///
/// std::env::remove_var("COURIER_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();
    let realtime = &defaults.realtime;
    let messages = &defaults.messages;

    let mut builder = config::Config::builder()
        .set_default("http.address", defaults.http.address.clone())?
        .set_default("http.port", i64::from(defaults.http.port))?
        .set_default("database.url", defaults.database.url.clone())?
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )?
        .set_default("auth.jwt_secret", defaults.auth.jwt_secret.clone())?
        .set_default("auth.issuer", defaults.auth.issuer.clone())?
        .set_default("auth.audience", defaults.auth.audience.clone())?
        .set_default("auth.leeway_seconds", as_i64(defaults.auth.leeway_seconds))?
        .set_default(
            "realtime.unsend_window_seconds",
            as_i64(realtime.unsend_window_seconds),
        )?
        .set_default(
            "realtime.max_connections_per_user",
            as_i64(realtime.max_connections_per_user as u64),
        )?
        .set_default(
            "realtime.outbound_queue_size",
            as_i64(realtime.outbound_queue_size as u64),
        )?
        .set_default(
            "realtime.heartbeat_interval_seconds",
            as_i64(realtime.heartbeat_interval_seconds),
        )?
        .set_default(
            "realtime.client_timeout_seconds",
            as_i64(realtime.client_timeout_seconds),
        )?
        .set_default(
            "realtime.handshake_timeout_ms",
            as_i64(realtime.handshake_timeout_ms),
        )?
        .set_default(
            "realtime.request_timeout_ms",
            as_i64(realtime.request_timeout_ms),
        )?
        .set_default("realtime.drain_timeout_ms", as_i64(realtime.drain_timeout_ms))?
        .set_default(
            "realtime.max_frame_bytes",
            as_i64(realtime.max_frame_bytes as u64),
        )?
        .set_default("realtime.typing_ttl_ms", as_i64(realtime.typing_ttl_ms))?
        .set_default(
            "realtime.read_retry_attempts",
            i64::from(realtime.read_retry_attempts),
        )?
        .set_default(
            "realtime.read_retry_backoff_ms",
            as_i64(realtime.read_retry_backoff_ms),
        )?
        .set_default(
            "realtime.sweep_interval_seconds",
            as_i64(realtime.sweep_interval_seconds),
        )?
        .set_default(
            "messages.max_content_length",
            as_i64(messages.max_content_length as u64),
        )?
        .set_default(
            "messages.default_page_size",
            i64::from(messages.default_page_size),
        )?
        .set_default("messages.max_page_size", i64::from(messages.max_page_size))?;

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("COURIER_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via COURIER_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(config::Environment::with_prefix("COURIER").separator("__"));

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    if config.messages.max_page_size == 0 {
        config.messages.max_page_size = defaults.messages.max_page_size;
    }
    if config.messages.default_page_size > config.messages.max_page_size {
        config.messages.default_page_size = config.messages.max_page_size;
    }
    if config.realtime.outbound_queue_size == 0 {
        config.realtime.outbound_queue_size = 1;
    }

    debug!(
        http.port = config.http.port,
        database.url = %config.database.url,
        unsend_window_seconds = config.realtime.unsend_window_seconds,
        "loaded backend configuration"
    );
    Ok(config)
}
