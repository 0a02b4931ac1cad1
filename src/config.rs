use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use zeroize::Zeroizing;

use crate::error::AppError;

const CONFIG_PATH_VAR: &str = "TEAMWORK_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "teamwork.toml";
const MIN_SECRET_LEN: usize = 16;

/// Process configuration. Loaded once at startup from an optional TOML file,
/// then overridden by environment variables (a `.env` file is honoured).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    #[serde(skip)]
    pub token_secret: Zeroizing<String>,
    pub db: DbConfig,
    pub messages: MessageConfig,
    pub blob: BlobConfig,
    pub notify: NotifyConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    pub page_size: usize,
    pub max_page_size: usize,
    pub max_content_len: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Remote store base URL. When unset, blobs live under `<data_dir>/blobs`.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// When unset, notifications are only logged.
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub json: bool,
    /// Write a daily-rolling log file under `<data_dir>/logs`.
    pub file: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 9430)),
            data_dir: default_data_dir(),
            token_secret: Zeroizing::new(String::new()),
            db: DbConfig::default(),
            messages: MessageConfig::default(),
            blob: BlobConfig::default(),
            notify: NotifyConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { pool_size: 8 }
    }
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_page_size: 200,
            max_content_len: 4000,
        }
    }
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: 15,
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json: false,
            file: true,
        }
    }
}

impl BlobConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("teamwork-hub")
}

impl AppConfig {
    /// Load configuration: file (if any) first, then environment overrides.
    pub fn load() -> Result<Self, AppError> {
        // Missing .env is the normal case in production
        let _ = dotenvy::dotenv();

        let path = std::env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, AppError> {
        toml::from_str(raw).map_err(|e| AppError::Validation(format!("Invalid config: {e}")))
    }

    /// Apply environment overrides. Takes a lookup function so tests don't
    /// have to mutate the process environment.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<(), AppError> {
        if let Some(bind) = get("TEAMWORK_BIND") {
            self.bind = bind
                .parse()
                .map_err(|_| AppError::Validation(format!("TEAMWORK_BIND is not an address: {bind}")))?;
        }
        if let Some(dir) = get("TEAMWORK_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(secret) = get("TEAMWORK_TOKEN_SECRET") {
            self.token_secret = Zeroizing::new(secret);
        }
        if let Some(url) = get("TEAMWORK_BLOB_URL") {
            self.blob.base_url = Some(url);
        }
        if let Some(key) = get("TEAMWORK_BLOB_API_KEY") {
            self.blob.api_key = Some(key);
        }
        if let Some(url) = get("TEAMWORK_NOTIFY_WEBHOOK") {
            self.notify.webhook_url = Some(url);
        }
        if let Some(json) = get("TEAMWORK_LOG_JSON") {
            self.log.json = matches!(json.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.token_secret.len() < MIN_SECRET_LEN {
            return Err(AppError::Validation(format!(
                "TEAMWORK_TOKEN_SECRET must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if self.messages.page_size == 0 || self.messages.page_size > self.messages.max_page_size {
            return Err(AppError::Validation(
                "messages.page_size must be between 1 and messages.max_page_size".into(),
            ));
        }
        if self.db.pool_size == 0 {
            return Err(AppError::Validation("db.pool_size must be positive".into()));
        }
        Ok(())
    }
}
