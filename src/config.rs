use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::freshrelease::types::ProjectScope;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub freshrelease: FreshreleaseConfig,
  /// Project used when a request names none (key like "WEBAPP" or numeric ID)
  pub default_project: Option<String>,
  /// Directory for log files (defaults to $XDG_DATA_HOME/fresolve/logs)
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FreshreleaseConfig {
  /// Account domain, e.g. "acme.freshrelease.com"
  pub domain: Option<String>,
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fresolve.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fresolve/config.yaml
  ///
  /// Without a file, configuration comes from the environment alone.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    Ok(config.with_overrides(|name| std::env::var(name).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fresolve.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fresolve").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Apply FRESHRELEASE_DOMAIN and FRESHRELEASE_PROJECT_KEY on top of the file.
  fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
    if let Some(domain) = var("FRESHRELEASE_DOMAIN").filter(|d| !d.trim().is_empty()) {
      self.freshrelease.domain = Some(domain);
    }
    if let Some(project) = var("FRESHRELEASE_PROJECT_KEY").filter(|p| !p.trim().is_empty()) {
      self.default_project = Some(project);
    }
    self
  }

  pub fn domain(&self) -> Result<&str> {
    self
      .freshrelease
      .domain
      .as_deref()
      .map(str::trim)
      .filter(|d| !d.is_empty())
      .ok_or_else(|| {
        eyre!("Freshrelease domain not configured. Set FRESHRELEASE_DOMAIN or freshrelease.domain.")
      })
  }

  pub fn default_scope(&self) -> Option<ProjectScope> {
    self.default_project.as_deref().and_then(ProjectScope::parse)
  }

  pub fn log_dir(&self) -> Option<PathBuf> {
    self
      .log_dir
      .clone()
      .or_else(|| dirs::data_dir().map(|d| d.join("fresolve").join("logs")))
  }

  /// Get the Freshrelease API key from the environment.
  pub fn get_api_key() -> Result<String> {
    std::env::var("FRESHRELEASE_API_KEY")
      .map_err(|_| eyre!("Freshrelease API key not found. Set FRESHRELEASE_API_KEY."))
  }
}
