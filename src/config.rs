use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::InstallPolicy;
use crate::net::resolve;
use crate::router::DEFAULT_API_MARKER;

/// Assets of the deployed front-end shell.
const DEFAULT_ASSETS: &[&str] = &[
  "./",
  "./index.html",
  "./manifest.json",
  "./nova-logo.png",
  "./natal.jpeg",
  "./leitura-agua.png",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  /// Base URL that relative asset, shell and request URLs resolve against
  pub origin: String,
  /// Tag of the current cache bucket; bump it whenever `assets` changes
  pub version: String,
  /// Asset manifest, cached at install time
  pub assets: Vec<String>,
  /// Document served to navigations that cannot reach the network
  pub shell: String,
  /// Path fragment that marks API traffic (network-first)
  pub api_marker: String,
  pub install_policy: InstallPolicy,
  /// Activate right after a successful install instead of waiting for `activate`
  pub skip_waiting: bool,
  /// Network timeout per request, in seconds
  pub timeout_secs: u64,
  /// Cache database path (defaults to $XDG_DATA_HOME/onhouse-cache/cache.db)
  pub cache_db: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000/".to_string(),
      version: "onhouse-cache-v1".to_string(),
      assets: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
      shell: "./index.html".to_string(),
      api_marker: DEFAULT_API_MARKER.to_string(),
      install_policy: InstallPolicy::default(),
      skip_waiting: true,
      timeout_secs: 10,
      cache_db: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./onhouse-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/onhouse-cache/config.yaml
  ///
  /// Built-in defaults are used when no file is found.
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
      None => Self::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("onhouse-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("onhouse-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(eyre!("`version` must not be empty"));
    }
    if self.api_marker.is_empty() {
      return Err(eyre!("`api_marker` must not be empty"));
    }
    if self.timeout_secs == 0 {
      return Err(eyre!("`timeout_secs` must be at least 1"));
    }
    // Surface URL mistakes at startup rather than on first use
    self.asset_urls()?;
    self.shell_url()?;
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a relative or absolute URL against the origin.
  pub fn resolve(&self, raw: &str) -> Result<Url> {
    resolve(&self.origin_url()?, raw)
  }

  pub fn asset_urls(&self) -> Result<Vec<Url>> {
    let origin = self.origin_url()?;
    self.assets.iter().map(|a| resolve(&origin, a)).collect()
  }

  pub fn shell_url(&self) -> Result<Url> {
    self.resolve(&self.shell)
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_deployed_worker() {
    let config = Config::default();
    config.validate().unwrap();

    assert_eq!(config.version, "onhouse-cache-v1");
    assert_eq!(config.install_policy, InstallPolicy::AllOrNothing);
    assert!(config.skip_waiting);

    let assets = config.asset_urls().unwrap();
    assert_eq!(assets.len(), 6);
    assert_eq!(assets[0].as_str(), "http://localhost:3000/");
    assert_eq!(assets[1].as_str(), "http://localhost:3000/index.html");
    assert_eq!(
      config.shell_url().unwrap().as_str(),
      "http://localhost:3000/index.html"
    );
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
origin: "https://condominio.example.com/app/"
version: onhouse-cache-v2
assets: ["/", "/index.html", "/manifest.json"]
install_policy: best-effort
skip_waiting: false
"#,
    )
    .unwrap();

    assert_eq!(config.version, "onhouse-cache-v2");
    assert_eq!(config.install_policy, InstallPolicy::BestEffort);
    assert!(!config.skip_waiting);
    assert_eq!(config.api_marker, "/api/");
    assert_eq!(config.timeout_secs, 10);

    let assets = config.asset_urls().unwrap();
    assert_eq!(
      assets.iter().map(Url::as_str).collect::<Vec<_>>(),
      vec![
        "https://condominio.example.com/",
        "https://condominio.example.com/index.html",
        "https://condominio.example.com/manifest.json",
      ]
    );
    assert_eq!(
      config.shell_url().unwrap().as_str(),
      "https://condominio.example.com/app/index.html"
    );
  }

  #[test]
  fn test_unknown_field_rejected() {
    assert!(Config::from_yaml("verison: v2\n").is_err());
  }

  #[test]
  fn test_validate_rejects_bad_values() {
    let config = Config {
      version: " ".to_string(),
      ..Config::default()
    };
    assert!(config.validate().is_err());

    let config = Config {
      origin: "not a url".to_string(),
      ..Config::default()
    };
    assert!(config.validate().is_err());

    let config = Config {
      timeout_secs: 0,
      ..Config::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let err = Config::load(Some(Path::new("/nonexistent/onhouse-cache.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("onhouse-cache.yaml");
    std::fs::write(&path, "version: onhouse-cache-v3\nshell: /offline.html\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.version, "onhouse-cache-v3");
    assert_eq!(
      config.shell_url().unwrap().as_str(),
      "http://localhost:3000/offline.html"
    );
  }
}
