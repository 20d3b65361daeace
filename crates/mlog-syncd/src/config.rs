use crate::queue::DrainPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf, time::Duration};

/// Client daemon configuration, stored as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncdConfig {
    /// Base URL of the mission log server
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Local cache and pending-write queue
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// How often the platform network presence is re-checked
    #[serde(default = "default_presence_interval")]
    pub presence_interval_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub drain_policy: DrainPolicy,
}

impl Default for SyncdConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            database_path: default_database_path(),
            probe_interval_secs: default_probe_interval(),
            presence_interval_secs: default_presence_interval(),
            request_timeout_secs: default_request_timeout(),
            drain_policy: DrainPolicy::default(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_database_path() -> String {
    "~/.local/share/mlog/client.db".to_string()
}

fn default_probe_interval() -> u64 {
    10
}

fn default_presence_interval() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    10
}

impl SyncdConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&data)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let data = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, data)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// API_URL wins over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("API_URL") {
            if !url.trim().is_empty() {
                self.api_url = url;
            }
        }
    }

    pub fn api_base(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.database_path)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }

    pub fn presence_interval(&self) -> Duration {
        Duration::from_secs(self.presence_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Load the daemon configuration, writing a default file on first run.
pub fn load_syncd_config(path: &Path) -> Result<SyncdConfig> {
    let mut config = if path.exists() {
        SyncdConfig::load_from(path)?
    } else {
        let config = SyncdConfig::default();
        config
            .save_to(path)
            .context("Failed to save default client config")?;
        tracing::info!(path = %path.display(), "created default client config");
        config
    };
    config.apply_env_overrides();
    Ok(config)
}

pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("client.toml");

        let config = load_syncd_config(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.probe_interval(), Duration::from_secs(10));
        assert_eq!(config.drain_policy, DrainPolicy::BestEffort);

        let reloaded = SyncdConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.database_path, config.database_path);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.toml");
        fs::write(
            &path,
            "api_url = \"http://mission-control:8080/\"\ndrain_policy = \"retain-failed\"\n",
        )
        .unwrap();

        let config = SyncdConfig::load_from(&path).unwrap();
        assert_eq!(config.api_base(), "http://mission-control:8080");
        assert_eq!(config.drain_policy, DrainPolicy::RetainFailed);
        assert_eq!(config.request_timeout_secs, 10);
    }
}
