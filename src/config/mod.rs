//! Configuration management
//! Supports TOML, YAML, JSON config files

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::push::api::DEFAULT_PUSH_SERVICE_URL;
use crate::push::ClientInfo;

const REDACTED: &str = "******REMOVED******";

/// Companion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device account private key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pk: Option<String>,
    /// Logging level
    pub log_level: Option<String>,
    pub push: PushConfig,
    /// Application identity reported to the push service
    pub client: ClientInfo,
    pub store: StoreConfig,
}

/// Push service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub service_url: String,
    /// Request timeout in seconds (default: 30)
    pub request_timeout_secs: u64,
    /// Fixed push token; without one authentication is never synced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Local persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Safe records
    pub path: PathBuf,
    /// Small key/value preferences (last synced push info)
    pub preferences_path: PathBuf,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_PUSH_SERVICE_URL.to_string(),
            request_timeout_secs: 30,
            token: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        let dir = dirs::data_dir()
            .map(|d| d.join("safe-companion"))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            path: dir.join("safes.json"),
            preferences_path: dir.join("preferences.json"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pk: None,
            push: PushConfig::default(),
            client: ClientInfo::default(),
            store: StoreConfig::default(),
            log_level: Some("info".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();

        let config = match extension {
            "toml" => toml::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => {
                if content.trim().starts_with('{') {
                    serde_json::from_str(&content)?
                } else if content.contains("---") {
                    serde_yaml::from_str(&content)?
                } else {
                    toml::from_str(&content)?
                }
            }
        };

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Load from default locations
    pub fn load() -> anyhow::Result<Self> {
        let locations = [
            "safe-companion.toml",
            "safe-companion.yaml",
            "safe-companion.yml",
            "safe-companion.json",
            ".safe-companion.toml",
        ];

        for location in &locations {
            if Path::new(location).exists() {
                return Self::from_file(location);
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let config_file = config_dir.join("safe-companion/config.toml");
            if config_file.exists() {
                return Self::from_file(config_file);
            }
        }

        anyhow::bail!("No configuration file found. Expected one of: {:?}", locations)
    }

    /// Save configuration to file with the private key redacted
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();

        let mut safe_config = self.clone();
        if safe_config.pk.is_some() {
            safe_config.pk = Some(REDACTED.to_string());
        }
        safe_config.push.token = None;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let content = match extension {
            "toml" => toml::to_string_pretty(&safe_config)?,
            "yaml" | "yml" => serde_yaml::to_string(&safe_config)?,
            _ => serde_json::to_string_pretty(&safe_config)?,
        };

        std::fs::write(path, content)?;
        info!("Configuration saved to: {} (sensitive data redacted)", path.display());
        Ok(())
    }

    /// Overlay `SAFE_COMPANION_*` environment variables
    pub fn apply_env(&mut self) {
        use std::env;

        if let Some(pk) = env::var("SAFE_COMPANION_PK").ok().filter(|v| !v.is_empty()) {
            self.pk = Some(pk);
        }
        if let Ok(url) = env::var("SAFE_COMPANION_PUSH_URL") {
            self.push.service_url = url;
        }
        if let Some(timeout) = env::var("SAFE_COMPANION_PUSH_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.push.request_timeout_secs = timeout;
        }
        if let Some(token) = env::var("SAFE_COMPANION_PUSH_TOKEN").ok().filter(|v| !v.is_empty()) {
            self.push.token = Some(token);
        }
        if let Ok(path) = env::var("SAFE_COMPANION_STORE") {
            self.store.path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("SAFE_COMPANION_PREFERENCES") {
            self.store.preferences_path = PathBuf::from(path);
        }
        if let Ok(level) = env::var("SAFE_COMPANION_LOG") {
            self.log_level = Some(level);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(pk) = &self.pk {
            let hex_part = pk
                .strip_prefix("0x")
                .ok_or_else(|| anyhow::anyhow!("Private key must start with 0x"))?;
            if hex_part.len() != 64 {
                anyhow::bail!("Private key must be 64 hex characters with 0x prefix (66 chars total)");
            }
            if hex::decode(hex_part).is_err() {
                anyhow::bail!("Private key contains invalid hex characters");
            }
        }

        let url = Url::parse(&self.push.service_url)
            .map_err(|e| anyhow::anyhow!("Invalid push service URL {}: {}", self.push.service_url, e))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            anyhow::bail!("Push service URL must be http(s)");
        }
        if self.push.request_timeout_secs == 0 {
            anyhow::bail!("Push request timeout must be positive");
        }
        if self.client.bundle.is_empty() || self.client.client.is_empty() {
            anyhow::bail!("Client bundle and client name are required");
        }
        Ok(())
    }
}

/// Load config from environment variables only
pub fn from_env() -> anyhow::Result<Config> {
    let mut config = Config::default();
    config.apply_env();
    config.validate()?;
    Ok(config)
}
