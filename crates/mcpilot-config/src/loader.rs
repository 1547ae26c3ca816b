use std::collections::HashSet;
use std::path::{Path, PathBuf};

use mcpilot_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const API_KEY_ENV: &str = "OPENAI_API_KEY";
const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
const MODEL_ENV: &str = "MCPILOT_MODEL";

/// Reads an [`AppConfig`] from disk and overlays environment variables.
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loader for `<config_dir>/mcpilot/config.yml`.
    pub fn with_default_path() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("could not determine config directory".to_string()))?;
        Ok(Self::new(dir.join("mcpilot").join("config.yml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file (missing file means defaults), apply `.env` and process
    /// environment overrides, then validate.
    pub fn load(&self) -> Result<AppConfig> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("loaded environment from {}", path.display());
        }

        let mut config = if self.path.exists() {
            self.load_file()?
        } else {
            info!(
                "no config file at {}, using defaults",
                self.path.display()
            );
            AppConfig::default()
        };

        apply_env(&mut config, |key| std::env::var(key).ok());
        validate(&config)?;
        Ok(config)
    }

    /// Parse the file only; no environment overlay, no validation.
    pub fn load_file(&self) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(&self.path)?;
        let extension = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match extension.as_str() {
            "yml" | "yaml" => serde_yaml::from_str(&contents).map_err(|e| {
                Error::Config(format!("invalid YAML in {}: {e}", self.path.display()))
            }),
            "toml" => toml::from_str(&contents).map_err(|e| {
                Error::Config(format!("invalid TOML in {}: {e}", self.path.display()))
            }),
            other => Err(Error::Config(format!(
                "unsupported config format '{other}' for {}",
                self.path.display()
            ))),
        }
    }
}

/// Overlay credential and model settings from `lookup`.
///
/// Empty values are ignored so an exported-but-blank variable does not wipe a
/// value from the file.
pub fn apply_env(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(key) = non_empty(API_KEY_ENV) {
        config.llm.api_key = Some(key);
    }
    if let Some(url) = non_empty(BASE_URL_ENV) {
        config.llm.base_url = Some(url);
    }
    if let Some(model) = non_empty(MODEL_ENV) {
        config.llm.model = model;
    }
}

/// Reject configurations the agent cannot start with.
pub fn validate(config: &AppConfig) -> Result<()> {
    if config.llm.model.trim().is_empty() {
        return Err(Error::Config("model name cannot be empty".to_string()));
    }

    let mut seen = HashSet::new();
    for server in &config.mcp_servers {
        if server.command.trim().is_empty() {
            return Err(Error::Config(format!(
                "MCP server '{}' has no command",
                server.name
            )));
        }
        if !seen.insert(server.name.as_str()) {
            return Err(Error::Config(format!(
                "duplicate MCP server name '{}'",
                server.name
            )));
        }
    }
    Ok(())
}
