use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub yandex: YandexConfig,

    pub upload: UploadConfig,

    pub security: SecurityConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,

    pub database_path: String,

    pub max_db_connections: u32,

    pub min_db_connections: u32,

    /// Tokio worker threads; 0 lets the runtime decide
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            database_path: "sqlite:diskform.db".to_string(),
            max_db_connections: 5,
            min_db_connections: 1,
            worker_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,

    pub port: u16,

    pub cors_allowed_origins: Vec<String>,

    pub session_inactivity_minutes: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 6789,
            cors_allowed_origins: vec!["*".to_string()],
            session_inactivity_minutes: 60,
        }
    }
}

/// OAuth application credentials and Yandex endpoints.
///
/// The URLs are configurable so tests and staging setups can point the
/// clients at a local fake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YandexConfig {
    pub client_id: String,

    pub client_secret: String,

    pub redirect_uri: String,

    pub oauth_url: String,

    pub login_info_url: String,

    pub disk_api_url: String,

    /// Base of the browser-facing link used when the API omits `public_url`
    pub public_disk_url: String,

    pub request_timeout_seconds: u64,
}

impl Default for YandexConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "http://localhost:6789/auth/yandex/callback".to_string(),
            oauth_url: "https://oauth.yandex.ru".to_string(),
            login_info_url: "https://login.yandex.ru/info".to_string(),
            disk_api_url: "https://cloud-api.yandex.net/v1/disk".to_string(),
            public_disk_url: "https://disk.yandex.ru/client/disk".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub remote_dir: String,

    pub file_name: String,

    pub max_attempts: u32,

    /// Fixed pause between attempts, no backoff growth
    pub retry_delay_seconds: u64,

    /// Identity used by the session endpoint when nobody is logged in.
    /// Unset disables the fallback.
    pub fallback_identity_email: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            remote_dir: "/Documents".to_string(),
            file_name: "data.xlsx".to_string(),
            max_attempts: 5,
            retry_delay_seconds: 10,
            fallback_identity_email: None,
        }
    }
}

impl UploadConfig {
    #[must_use]
    pub fn remote_path(&self) -> String {
        format!(
            "{}/{}",
            self.remote_dir.trim_end_matches('/'),
            self.file_name
        )
    }

    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Lifetime of an issued API key; also the minimum gap between issuances
    pub api_key_ttl_days: i64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_key_ttl_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("diskform").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".diskform").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload.max_attempts == 0 {
            anyhow::bail!("upload.max_attempts must be at least 1");
        }

        if self.upload.file_name.is_empty() {
            anyhow::bail!("upload.file_name cannot be empty");
        }

        if !self.upload.remote_dir.starts_with('/') {
            anyhow::bail!("upload.remote_dir must be an absolute Disk path");
        }

        if self.security.api_key_ttl_days <= 0 {
            anyhow::bail!("security.api_key_ttl_days must be positive");
        }

        Ok(())
    }
}
