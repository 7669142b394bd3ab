use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "azdash";
const CONFIG_FILE: &str = "config.json";
const CONFIG_ENV: &str = "AZDASH_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: String,
    #[serde(default)]
    pub repo_ids: Vec<String>,
}

/// How a multi-repository fetch reacts to one repository failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    /// Any failing repository fails the whole batch.
    #[default]
    AllOrNothing,
    /// Keep records from repositories that answered, report the rest.
    Partial,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_task_clear_secs() -> u64 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub org_name: String,
    pub personal_access_token: String,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
    /// Unique name or display name of the user whose vote is shown.
    #[serde(default)]
    pub reviewer: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_task_clear_secs")]
    pub task_clear_secs: u64,
    #[serde(default)]
    pub fetch_policy: FetchPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            org_name: String::new(),
            personal_access_token: String::new(),
            projects: Vec::new(),
            reviewer: None,
            request_timeout_secs: default_request_timeout_secs(),
            task_clear_secs: default_task_clear_secs(),
            fetch_policy: FetchPolicy::default(),
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn task_clear_after(&self) -> Duration {
        Duration::from_secs(self.task_clear_secs)
    }
}

/// Source of the dashboard configuration.
pub trait ConfigProvider {
    fn load(&self) -> Result<Config, ConfigError>;
}

pub type Validator = fn(&Config) -> Result<(), ConfigError>;

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.org_name.trim().is_empty() {
        return Err(ConfigError::Validation("org_name is required".to_string()));
    }
    if config.personal_access_token.trim().is_empty() {
        return Err(ConfigError::Validation(
            "personal_access_token is required".to_string(),
        ));
    }
    if let Some(idx) = config.projects.iter().position(|p| p.id.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "projects[{idx}].id must not be empty"
        )));
    }
    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be > 0".to_string(),
        ));
    }
    Ok(())
}

pub struct JsonConfigProvider {
    path: PathBuf,
    validate: Validator,
}

impl JsonConfigProvider {
    pub fn new(path: PathBuf, validate: Validator) -> Self {
        Self { path, validate }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for JsonConfigProvider {
    fn load(&self) -> Result<Config, ConfigError> {
        if !self.path.exists() {
            return Err(ConfigError::NotFound(self.path.clone()));
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        let config: Config = serde_json::from_str(&content)?;
        (self.validate)(&config)?;
        Ok(config)
    }
}

/// `$XDG_CONFIG_HOME/azdash`, falling back to `~/.config/azdash`.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let base = match std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => dirs::home_dir()
            .ok_or(ConfigError::NoHomeDir)?
            .join(".config"),
    };
    Ok(base.join(APP_DIR))
}

/// Picks the config file: explicit flag, then `AZDASH_CONFIG`, then the
/// default location, which is bootstrapped with a template when missing.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let path = config_dir()?.join(CONFIG_FILE);
    create_default_if_missing(&path)?;
    Ok(path)
}

pub fn create_default_if_missing(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Ok(());
    }
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(&Config::default())?;
    std::fs::write(path, json).map_err(io_err)?;
    Ok(())
}
