use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::db::DedupScope;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Background refresh interval in minutes, 0 leaves ingestion to `collect`
    #[serde(default)]
    pub refresh_interval: u64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub freshness: FreshnessConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Upper bound on simultaneous fetches, 0 means one task per feed
    #[serde(default)]
    pub max_concurrent: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FreshnessConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IngestConfig {
    #[serde(default)]
    pub dedup_scope: DedupScope,
}

fn default_database_url() -> String {
    "sqlite:feedroll.db?mode=rwc".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_per_page() -> i64 {
    50
}

fn default_timeout_secs() -> u64 {
    45
}

fn default_user_agent() -> String {
    concat!("feedroll/", env!("CARGO_PKG_VERSION"), " (RSS aggregator)").to_string()
}

fn default_cache_ttl_secs() -> u64 {
    5
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            max_concurrent: 0,
        }
    }
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            bind: default_bind(),
            refresh_interval: 0,
            per_page: default_per_page(),
            fetch: FetchConfig::default(),
            freshness: FreshnessConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl FreshnessConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.per_page > 0,
            "per_page must be positive, got {}",
            self.per_page
        );
        Ok(())
    }

    /// Load the file when it exists, otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_per_page_must_be_positive() {
        for raw in ["per_page = 0", "per_page = -5"] {
            let err = Config::from_str(raw).unwrap_err();
            assert!(err.to_string().contains("per_page"), "{}", err);
        }
        assert_eq!(Config::from_str("per_page = 1").unwrap().per_page, 1);
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_str("").unwrap();

        assert_eq!(config.database_url, "sqlite:feedroll.db?mode=rwc");
        assert_eq!(config.bind, "0.0.0.0:3000");
        assert_eq!(config.refresh_interval, 0);
        assert_eq!(config.per_page, 50);
        assert_eq!(config.fetch.timeout_secs, 45);
        assert_eq!(config.fetch.max_concurrent, 0);
        assert!(config.fetch.user_agent.starts_with("feedroll/"));
        assert_eq!(config.freshness.cache_ttl_secs, 5);
        assert_eq!(config.ingest.dedup_scope, DedupScope::Global);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
            database_url = "sqlite::memory:"
            bind = "127.0.0.1:8080"
            refresh_interval = 30
            per_page = 20

            [fetch]
            timeout_secs = 10
            user_agent = "test-agent"
            max_concurrent = 4

            [freshness]
            cache_ttl_secs = 2

            [ingest]
            dedup_scope = "feed"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.bind, "127.0.0.1:8080");
        assert_eq!(config.refresh_interval, 30);
        assert_eq!(config.per_page, 20);
        assert_eq!(config.fetch.timeout(), Duration::from_secs(10));
        assert_eq!(config.fetch.user_agent, "test-agent");
        assert_eq!(config.fetch.max_concurrent, 4);
        assert_eq!(config.freshness.cache_ttl(), Duration::from_secs(2));
        assert_eq!(config.ingest.dedup_scope, DedupScope::Feed);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let content = r#"
            [fetch]
            timeout_secs = 30
        "#;

        let config = Config::from_str(content).unwrap();
        assert_eq!(config.fetch.timeout_secs, 30);
        assert!(config.fetch.user_agent.starts_with("feedroll/"));
        assert_eq!(config.freshness.cache_ttl_secs, 5);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config.per_page, 50);
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let content = "this is not valid toml {{{";

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let result = Config::load(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_dedup_scope_rejected() {
        let content = r#"
            [ingest]
            dedup_scope = "category"
        "#;

        assert!(Config::from_str(content).is_err());
    }
}
