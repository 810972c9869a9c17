//! Configuration for waymark.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (WAYMARK_HOME, WAYMARK_STORE_URL, WAYMARK_API_TOKEN)
//! 2. Config file (.waymark/config.yaml)
//! 3. Defaults (~/.waymark, file store under it, built-in wiki profiles)
//!
//! Config file discovery:
//! - Searches current directory and parents for .waymark/config.yaml
//! - Paths in config file are relative to the .waymark/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::healing::HealingSettings;
use crate::page::{default_profiles, SourceProfile};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    /// Engine state directory (relative to .waymark/)
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub healing: HealingSettings,
    #[serde(default)]
    pub reveal: RevealSettings,
    /// Replaces the built-in profiles when present
    #[serde(default)]
    pub profiles: Option<Vec<SourceProfile>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSection {
    pub kind: Option<StoreKind>,
    pub url: Option<String>,
    pub token: Option<String>,
    /// Root directory of the file store
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Http,
    File,
}

/// Retry policy for scroll-into-view requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_retry_interval_ms() -> u64 {
    250
}

impl Default for RevealSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl RevealSettings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Resolved store settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub url: Option<String>,
    pub token: Option<String>,
    pub path: PathBuf,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to waymark home (engine state)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub store: StoreConfig,
    pub healing: HealingSettings,
    pub reveal: RevealSettings,
    pub profiles: Vec<SourceProfile>,
}

/// Find config file by searching a directory and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".waymark").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Environment overrides, read once per load
#[derive(Debug, Clone, Default)]
struct EnvOverrides {
    home: Option<String>,
    store_url: Option<String>,
    api_token: Option<String>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        Self {
            home: std::env::var("WAYMARK_HOME").ok(),
            store_url: std::env::var("WAYMARK_STORE_URL").ok(),
            api_token: std::env::var("WAYMARK_API_TOKEN").ok(),
        }
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".waymark");

    resolve_config(find_config_file(&cwd), default_home, EnvOverrides::from_env())
}

fn resolve_config(
    config_file: Option<PathBuf>,
    default_home: PathBuf,
    env: EnvOverrides,
) -> Result<ResolvedConfig> {
    let (file, config_dir) = match config_file {
        Some(ref path) => (
            load_config_file(path)?,
            // Relative paths resolve against .waymark/
            path.parent().map(Path::to_path_buf),
        ),
        None => (ConfigFile::default(), None),
    };

    let home = if let Some(env_home) = env.home {
        PathBuf::from(env_home)
    } else {
        match (&config_dir, &file.home) {
            (Some(dir), Some(home)) => resolve_path(dir, home),
            _ => default_home,
        }
    };

    let url = env.store_url.or(file.store.url);
    let kind = file.store.kind.unwrap_or(if url.is_some() {
        StoreKind::Http
    } else {
        StoreKind::File
    });
    let path = match (&config_dir, &file.store.path) {
        (Some(dir), Some(p)) => resolve_path(dir, p),
        _ => home.join("spans"),
    };

    let store = StoreConfig {
        kind,
        url,
        token: env.api_token.or(file.store.token),
        path,
    };

    Ok(ResolvedConfig {
        home,
        config_file,
        store,
        healing: file.healing,
        reveal: file.reveal,
        profiles: file.profiles.unwrap_or_else(default_profiles),
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &Path, yaml: &str) -> PathBuf {
        let waymark_dir = dir.join(".waymark");
        std::fs::create_dir_all(&waymark_dir).unwrap();
        let config_path = waymark_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", yaml).unwrap();
        config_path
    }

    #[test]
    fn test_defaults_without_file() {
        let home = PathBuf::from("/home/user/.waymark");
        let config = resolve_config(None, home.clone(), EnvOverrides::default()).unwrap();

        assert_eq!(config.home, home);
        assert!(config.config_file.is_none());
        assert_eq!(config.store.kind, StoreKind::File);
        assert_eq!(config.store.path, home.join("spans"));
        assert_eq!(config.healing, HealingSettings::default());
        assert_eq!(config.reveal.max_attempts, 10);
        assert_eq!(config.reveal.retry_interval(), Duration::from_millis(250));
        assert_eq!(config.profiles.len(), 3);
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            temp.path(),
            r#"
version: "1.0"
store:
  kind: http
  url: https://api.example.org/v1
healing:
  anchor_len: 40
  length_tolerance: 0.3
reveal:
  max_attempts: 3
profiles:
  - code: xx
    hosts: ["*.example.org"]
    mediawiki: false
    content_root: ""
"#,
        );

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version.as_deref(), Some("1.0"));
        assert_eq!(config.store.kind, Some(StoreKind::Http));
        assert_eq!(config.healing.anchor_len, 40);
        assert_eq!(config.healing.length_tolerance, 0.3);
        // Unset fields keep their defaults
        assert_eq!(config.healing.search_radius, 2000);
        assert_eq!(config.reveal.max_attempts, 3);
        assert_eq!(config.reveal.retry_interval_ms, 250);

        let profiles = config.profiles.unwrap();
        assert_eq!(profiles[0].code, "xx");
        assert!(!profiles[0].mediawiki);
    }

    #[test]
    fn test_env_overrides_config_file() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            temp.path(),
            r#"
home: ./state
store:
  url: https://file.example.org
  token: from-file
  path: ./spans
"#,
        );

        let env = EnvOverrides {
            home: None,
            store_url: Some("https://env.example.org".to_string()),
            api_token: Some("from-env".to_string()),
        };
        let config =
            resolve_config(Some(config_path.clone()), PathBuf::from("/unused"), env).unwrap();

        let waymark_dir = config_path.parent().unwrap();
        assert_eq!(config.home, waymark_dir.join("state"));
        assert_eq!(config.store.kind, StoreKind::Http);
        assert_eq!(config.store.url.as_deref(), Some("https://env.example.org"));
        assert_eq!(config.store.token.as_deref(), Some("from-env"));
        assert_eq!(config.store.path, waymark_dir.join("spans"));
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(temp.path(), "version: \"1\"");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(config_path));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
