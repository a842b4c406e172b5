use crate::error::AppError;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "credit-meter";
pub const ENV_PREFIX: &str = "CREDIT_METER";

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("CREDIT_METER_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("com", "orbital", SERVICE_NAME) {
        let candidate = dirs.config_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".credit-meter"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root of the upstream message store.
    pub base_url: String,
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
    /// Report lookups in flight at once; 1 resolves messages one by one.
    pub max_concurrent_lookups: usize,
    /// Return the error text in 500 responses instead of a generic message.
    pub expose_error_details: bool,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            host: "127.0.0.1".into(),
            port: 8000,
            request_timeout_seconds: 30,
            connect_timeout_seconds: 10,
            max_concurrent_lookups: 1,
            expose_error_details: false,
            log_level: "info".into(),
        }
    }
}

impl AppConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let parsed = url::Url::parse(&self.base_url)
            .map_err(|e| AppError::Config(format!("invalid base_url '{}': {e}", self.base_url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "base_url must use http or https, got '{}'",
                parsed.scheme()
            )));
        }
        if self.request_timeout_seconds == 0 || self.connect_timeout_seconds == 0 {
            return Err(AppError::Config("timeouts must be at least one second".into()));
        }
        if self.max_concurrent_lookups == 0 {
            return Err(AppError::Config(
                "max_concurrent_lookups must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    Ok(())
}

/// Defaults, then the config file, then `CREDIT_METER_*` environment variables.
pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<AppConfig, AppError> {
    let cfg: AppConfig = ConfigBuilder::builder()
        .add_source(ConfigBuilder::try_from(&AppConfig::default())?)
        .add_source(File::from(path).format(FileFormat::Toml).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()?
        .try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let path = config_path()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !cfg_path.exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(())
}
