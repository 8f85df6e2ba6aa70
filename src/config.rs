use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub site: SiteConfig,
  pub cache: CacheConfig,
  pub analytics: AnalyticsConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
  /// Origin the worker serves; same-origin GET requests are intercepted.
  pub origin: Url,
  /// Third-party origins that are also cacheable (e.g. a fonts CDN).
  #[serde(default)]
  pub allowed_origins: Vec<Url>,
  /// Path of the offline fallback document, relative to the origin.
  #[serde(default = "default_offline_path")]
  pub offline_path: String,
}

fn default_offline_path() -> String {
  "/offline.html".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cache generation identifier; bump it to discard all previous entries
  /// at the next activation.
  pub generation: String,
  /// Assets cached at install time. Install fails if any is unreachable.
  /// Entries are origin-relative paths or absolute URLs.
  pub static_assets: Vec<String>,
  /// Extra pages warmed a few seconds after startup.
  #[serde(default)]
  pub warm: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
  /// Remote endpoint tracked events are POSTed to.
  pub endpoint: Url,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Directory holding cache.db and queue.db (default: platform data dir).
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cachette.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cachette/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/cachette/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cachette.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cachette").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// The install-time static asset manifest as absolute URLs.
  pub fn static_asset_urls(&self) -> Result<Vec<Url>> {
    self.resolve_urls(&self.cache.static_assets)
  }

  /// The deferred warm list as absolute URLs.
  pub fn warm_urls(&self) -> Result<Vec<Url>> {
    self.resolve_urls(&self.cache.warm)
  }

  fn resolve_urls(&self, entries: &[String]) -> Result<Vec<Url>> {
    entries
      .iter()
      .map(|entry| {
        let parsed = if entry.starts_with("http://") || entry.starts_with("https://") {
          Url::parse(entry)
        } else {
          self.site.origin.join(entry)
        };
        parsed.map_err(|e| eyre!("Invalid asset URL {}: {}", entry, e))
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"
site:
  origin: https://blog.test
  allowed_origins:
    - https://fonts.googleapis.com
    - https://fonts.gstatic.com
cache:
  generation: blog-v1
  static_assets:
    - /
    - /index.html
    - /offline.html
    - https://fonts.googleapis.com/css2?family=IBM+Plex+Mono
  warm:
    - /pages/coding.html
analytics:
  endpoint: https://blog.test/api/events
"#;

  #[test]
  fn test_parse_sample_config() {
    let config: Config = serde_yaml::from_str(SAMPLE).unwrap();

    assert_eq!(config.site.offline_path, "/offline.html");
    assert_eq!(config.cache.generation, "blog-v1");
    assert_eq!(config.site.allowed_origins.len(), 2);
    assert!(config.storage.path.is_none());
  }

  #[test]
  fn test_asset_paths_resolve_against_origin() {
    let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
    let urls = config.static_asset_urls().unwrap();

    assert_eq!(urls[0].as_str(), "https://blog.test/");
    assert_eq!(urls[1].as_str(), "https://blog.test/index.html");
    // Absolute entries are kept as-is
    assert_eq!(
      urls[3].as_str(),
      "https://fonts.googleapis.com/css2?family=IBM+Plex+Mono"
    );
  }
}
