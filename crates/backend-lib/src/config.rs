// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
//!
//! Settings are resolved once at startup and shared by `Arc`. Sources, later
//! ones winning: built-in defaults, a TOML file, then `DASHBOARD_*`
//! environment variables (`__` separates nested keys, e.g.
//! `DASHBOARD_AUTH__SECRET_KEY`).
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::password::{PasswordCost, DEFAULT_PASSWORD_COST};

/// Secret shipped in the defaults; refused in production.
pub const DEFAULT_SECRET_KEY: &str = "change-this";

const ENV_PREFIX: &str = "DASHBOARD_";
const DEFAULT_CONFIG_FILE: &str = "config.toml";
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
/// Longest accepted access token lifetime, one year
pub const MAX_TOKEN_LIFETIME_MINUTES: i64 = 365 * 24 * 60;

/// Errors raised while loading or validating settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Development,
    Test,
    Staging,
    #[serde(alias = "prod")]
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Human readable service name
    pub app_name: String,
    /// Deployment environment, gates the sample publisher
    pub environment: Environment,
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Log level
    pub log_level: String,
    pub log_format: LogFormat,
    /// Allowed CORS origins
    pub cors_origins: Vec<String>,
    /// How long shutdown waits for open connections to finish cleanup
    pub shutdown_grace_secs: u64,
    pub auth: AuthSettings,
    pub pubsub: PubSubSettings,
    pub publisher: PublisherSettings,
    pub relay: RelaySettings,
    pub storage: StorageSettings,
    pub seed: SeedSettings,
}

/// Token and password settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HMAC secret used to sign access tokens
    pub secret_key: String,
    /// JWT algorithm name, e.g. `HS256`
    pub algorithm: String,
    /// Access token lifetime in minutes
    pub access_token_expire_minutes: i64,
    /// scrypt cost parameter (log2 N) for newly hashed passwords
    pub password_cost: u8,
    /// Upper bound on the wait for a first-frame credential
    pub handshake_timeout_secs: u64,
}

/// Which pub/sub backbone to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackboneKind {
    #[default]
    Redis,
    Memory,
}

/// Pub/sub backbone connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubSettings {
    pub backend: BackboneKind,
    pub host: String,
    pub port: u16,
    /// Full connection URL, overrides host and port
    pub url: Option<String>,
}

impl PubSubSettings {
    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }
}

/// Sample publisher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    pub interval_ms: u64,
    pub value: f64,
}

impl PublisherSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Channel relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// A frame not written within this bound ends the relay
    pub send_timeout_secs: u64,
}

/// Which identity store to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Memory,
}

/// Identity store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageKind,
    pub path: PathBuf,
}

/// Initial admin identity created at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedSettings {
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    /// Precomputed PHC hash; wins over `admin_password`
    pub admin_password_hash: Option<String>,
    pub admin_role: dashboard_common::Role,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "Realtime Analytics Dashboard".to_string(),
            environment: Environment::default(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            cors_origins: vec!["http://localhost:5173".to_string()],
            shutdown_grace_secs: 10,
            auth: AuthSettings::default(),
            pubsub: PubSubSettings::default(),
            publisher: PublisherSettings::default(),
            relay: RelaySettings::default(),
            storage: StorageSettings::default(),
            seed: SeedSettings::default(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            algorithm: "HS256".to_string(),
            access_token_expire_minutes: 60,
            password_cost: DEFAULT_PASSWORD_COST,
            handshake_timeout_secs: 10,
        }
    }
}

impl Default for PubSubSettings {
    fn default() -> Self {
        Self {
            backend: BackboneKind::default(),
            host: "redis".to_string(),
            port: 6379,
            url: None,
        }
    }
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            value: 50.0,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            send_timeout_secs: 10,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageKind::default(),
            path: PathBuf::from("data"),
        }
    }
}

impl Default for SeedSettings {
    fn default() -> Self {
        Self {
            admin_email: Some("admin@example.com".to_string()),
            admin_password: Some("adminpass".to_string()),
            admin_password_hash: None,
            admin_role: dashboard_common::Role::Admin,
        }
    }
}

impl Settings {
    /// Load settings from `config.toml` (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(Path::new(DEFAULT_CONFIG_FILE)))
    }

    /// Load settings from an explicit TOML file and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Invalid(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        Self::from_figment(Self::figment(path))
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Settings = figment.extract().map_err(Box::new)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the settings for values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "unknown log level `{}`",
                self.log_level
            )));
        }
        if self.auth.secret_key.is_empty() {
            return Err(ConfigError::Invalid("auth.secret_key must not be empty".into()));
        }
        if self.environment.is_production() && self.auth.secret_key == DEFAULT_SECRET_KEY {
            return Err(ConfigError::Invalid(
                "auth.secret_key must be changed in production".into(),
            ));
        }
        self.token_algorithm()?;
        self.password_cost()?;
        self.token_lifetime()?;
        if self.publisher.interval_ms == 0 {
            return Err(ConfigError::Invalid("publisher.interval_ms must be positive".into()));
        }
        if self.relay.send_timeout_secs == 0 {
            return Err(ConfigError::Invalid("relay.send_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    /// The configured signing algorithm. Only the HMAC family is accepted
    /// since tokens are signed with a shared secret.
    pub fn token_algorithm(&self) -> Result<Algorithm, ConfigError> {
        let algorithm = Algorithm::from_str(&self.auth.algorithm).map_err(|_| {
            ConfigError::Invalid(format!("unknown token algorithm `{}`", self.auth.algorithm))
        })?;
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
            other => Err(ConfigError::Invalid(format!(
                "token algorithm {other:?} needs a key pair, only HS256/HS384/HS512 are supported"
            ))),
        }
    }

    pub fn password_cost(&self) -> Result<PasswordCost, ConfigError> {
        PasswordCost::new(self.auth.password_cost)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Access token lifetime, between one minute and one year
    pub fn token_lifetime(&self) -> Result<chrono::Duration, ConfigError> {
        let minutes = self.auth.access_token_expire_minutes;
        if !(1..=MAX_TOKEN_LIFETIME_MINUTES).contains(&minutes) {
            return Err(ConfigError::Invalid(format!(
                "auth.access_token_expire_minutes must be between 1 and {MAX_TOKEN_LIFETIME_MINUTES}, got {minutes}"
            )));
        }
        chrono::Duration::try_minutes(minutes).ok_or_else(|| {
            ConfigError::Invalid(format!("auth.access_token_expire_minutes out of range: {minutes}"))
        })
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.auth.handshake_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.send_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
