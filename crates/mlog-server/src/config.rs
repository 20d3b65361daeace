use anyhow::Context;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::info;

/// Server configuration loaded from TOML file
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    /// "production" hides internal error details from responses
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Network settings for the HTTP server
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    /// Host/interface to bind to, e.g. "127.0.0.1"
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on; the PORT environment variable wins
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    /// HMAC secret for issued JWTs; the JWT_SECRET environment variable wins
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    /// Issuer shown in authenticator apps
    #[serde(default = "default_totp_issuer")]
    pub totp_issuer: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl_hours(),
            totp_issuer: default_totp_issuer(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            upload_dir: default_upload_dir(),
        }
    }
}

/// Background mission generator
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationSettings {
    #[serde(default = "default_generation_interval")]
    pub interval_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_generation_interval(),
        }
    }
}

/// Suspicious activity monitor
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorSettings {
    /// More than this many actions inside the window flags a user
    #[serde(default = "default_threshold")]
    pub threshold: i64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            window_secs: default_window_secs(),
            poll_secs: default_poll_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_jwt_secret() -> String {
    "mlog-jwt-dev-secret".to_string()
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_totp_issuer() -> String {
    "SpaceMissionLog".to_string()
}

fn default_database_path() -> String {
    "mlog_server_data/missions.db".to_string()
}

fn default_upload_dir() -> String {
    "uploads".to_string()
}

fn default_generation_interval() -> u64 {
    5
}

fn default_threshold() -> i64 {
    10
}

fn default_window_secs() -> u64 {
    60
}

fn default_poll_secs() -> u64 {
    60
}

impl Settings {
    /// Load and parse the configuration from the given TOML file path
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut settings: Settings = toml::from_str(&data)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        // Expand JWT secret from environment variable if in ${VAR} form
        if settings.auth.jwt_secret.starts_with("${") && settings.auth.jwt_secret.ends_with('}') {
            let var = &settings.auth.jwt_secret[2..settings.auth.jwt_secret.len() - 1];
            settings.auth.jwt_secret = env::var(var)
                .with_context(|| format!("missing environment var {} for jwt_secret", var))?;
        }
        Ok(settings)
    }

    /// Read the config file when present, fall back to defaults otherwise,
    /// then apply PORT and JWT_SECRET from the environment.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut settings = if path.exists() {
            Self::from_file(path)?
        } else {
            info!(path = %path.display(), "config file not found, using defaults");
            Settings::default()
        };
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(port) = env::var("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("invalid PORT value '{}'", port))?;
        }
        if let Ok(secret) = env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        Ok(())
    }

    pub fn expose_error_details(&self) -> bool {
        self.environment != Environment::Production
    }

    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.storage.database_path)
    }

    pub fn upload_dir(&self) -> PathBuf {
        expand_home(&self.storage.upload_dir)
    }

    pub fn generation_interval(&self) -> Duration {
        Duration::from_secs(self.generation.interval_secs.max(1))
    }
}

/// Expand a leading "~/" to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
