//! Configuration loader and validator for the Rango server.
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub search: Search,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub bind_addr: String,
    #[serde(default = "default_site_name")]
    pub site_name: String,
}

/// External search provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Search {
    pub endpoint: String,
    /// Single-line file holding the provider key. Read on every query.
    pub key_file: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_results_per_page")]
    pub results_per_page: u32,
}

fn default_site_name() -> String {
    "Rango".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_results_per_page() -> u32 {
    10
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Default SQLite URL under `app.data_dir`, used when `DATABASE_URL` is unset.
    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}/rango.db",
            self.app.data_dir.trim_end_matches('/')
        )
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.app
            .bind_addr
            .parse()
            .map_err(|_| ConfigError::Invalid("app.bind_addr must be a socket address"))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    cfg.bind_addr()?;

    let endpoint = cfg.search.endpoint.trim();
    if endpoint.is_empty() {
        return Err(ConfigError::Invalid("search.endpoint must be non-empty"));
    }
    if reqwest::Url::parse(endpoint).is_err() {
        return Err(ConfigError::Invalid("search.endpoint must be an absolute URL"));
    }
    if cfg.search.key_file.trim().is_empty() {
        return Err(ConfigError::Invalid("search.key_file must be non-empty"));
    }
    if cfg.search.timeout_secs == 0 {
        return Err(ConfigError::Invalid("search.timeout_secs must be > 0"));
    }
    if cfg.search.results_per_page == 0 || cfg.search.results_per_page > 50 {
        return Err(ConfigError::Invalid(
            "search.results_per_page must be between 1 and 50",
        ));
    }

    Ok(())
}

/// Returns the canonical example YAML.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  bind_addr: "127.0.0.1:8000"
  site_name: "Rango"

search:
  endpoint: "https://api.datamarket.azure.com/Bing/Search/Web"
  key_file: "bing.key"
  timeout_secs: 10
  results_per_page: 10
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.search.results_per_page, 10);
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let yaml = r#"app:
  data_dir: "./data"
  bind_addr: "0.0.0.0:8080"
search:
  endpoint: "http://localhost:9000/search"
  key_file: "bing.key"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.site_name, "Rango");
        assert_eq!(cfg.search.timeout_secs, 10);
        assert_eq!(cfg.search.results_per_page, 10);
    }

    #[test]
    fn invalid_bind_addr() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.bind_addr = "localhost".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("bind_addr")), _ => panic!("wrong error") }
    }

    #[test]
    fn invalid_search_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.search.endpoint = "not a url".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("search.endpoint")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.search.key_file = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.search.timeout_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.search.results_per_page = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn database_url_uses_data_dir() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = "/var/lib/rango/".into();
        assert_eq!(cfg.database_url(), "sqlite:///var/lib/rango/rango.db");
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.search.key_file, "bing.key");
    }
}
