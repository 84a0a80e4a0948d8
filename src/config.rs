use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::redis_backend::RedisBackend;
use crate::cache::CacheStore;
use crate::db::IndexStore;
use crate::index::universe::{UniverseSelector, DEFAULT_COHORT_SIZE};
use crate::index::{AcquisitionPipeline, IndexCalculator};
use crate::market::nasdaq::NASDAQ_TRADED_URL;
use crate::market::yahoo::{HttpMarketData, YAHOO_CHART_URL};
use crate::market::{MarketDataProvider, RetryPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Redis,
    Memory,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackendKind,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_listing_url")]
    pub listing_url: String,
    #[serde(default = "default_quote_url")]
    pub quote_url: String,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_quote_retry_attempts")]
    pub quote_retry_attempts: u32,
    #[serde(default = "default_quote_retry_delay_ms")]
    pub quote_retry_delay_ms: u64,
    #[serde(default = "default_quote_concurrency")]
    pub quote_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_cohort_size")]
    pub cohort_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<String>,
    pub cache_backend: Option<CacheBackendKind>,
    pub redis_url: Option<String>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/top100-index/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(parsed)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(db_path) = overrides.db_path {
            self.storage.db_path = db_path;
        }
        if let Some(backend) = overrides.cache_backend {
            self.cache.backend = backend;
        }
        if let Some(redis_url) = overrides.redis_url {
            self.cache.redis_url = redis_url;
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn bind_address(&self) -> Result<std::net::SocketAddr> {
        let bind = format!("{}:{}", self.server.host, self.server.port);
        bind.parse()
            .map_err(|e| anyhow!("invalid bind address {bind}: {e}"))
    }

    /// An unreachable or misconfigured Redis does not stop startup: the store degrades to
    /// misses and re-checks connectivity on later calls.
    pub fn build_cache(&self) -> CacheStore {
        match self.cache.backend {
            CacheBackendKind::Memory => CacheStore::memory(),
            CacheBackendKind::Disabled => CacheStore::disabled(),
            CacheBackendKind::Redis => match RedisBackend::open(&self.cache.redis_url) {
                Ok(backend) => CacheStore::new(Arc::new(backend)),
                Err(err) => {
                    warn!("invalid redis url {}: {err:#}; caching disabled", self.cache.redis_url);
                    CacheStore::disabled()
                }
            },
        }
    }

    pub fn listing_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.market.retry_attempts,
            Duration::from_secs(self.market.retry_delay_secs),
        )
    }

    pub fn quote_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.market.quote_retry_attempts,
            Duration::from_millis(self.market.quote_retry_delay_ms),
        )
    }

    pub fn open_store(&self) -> Result<IndexStore> {
        let path = self.resolved_db_path();
        IndexStore::open(&path)
            .with_context(|| format!("failed opening index store: {}", path.display()))
    }

    pub fn open_calculator(&self) -> Result<IndexCalculator> {
        let store = Arc::new(self.open_store()?);
        let cache = Arc::new(self.build_cache());
        Ok(IndexCalculator::new(store, cache).with_cohort_size(self.index.cohort_size))
    }

    pub fn market_data(&self) -> Arc<dyn MarketDataProvider> {
        Arc::new(HttpMarketData::new(
            self.market.listing_url.clone(),
            self.market.quote_url.clone(),
        ))
    }

    pub fn universe_selector(&self, provider: Arc<dyn MarketDataProvider>) -> UniverseSelector {
        UniverseSelector::new(provider)
            .with_cohort_size(self.index.cohort_size)
            .with_concurrency(self.market.quote_concurrency)
            .with_retry(self.listing_retry(), self.quote_retry())
    }

    /// Pipeline writing into the same store and cache the calculator reads from.
    pub fn acquisition_pipeline(&self, calculator: &IndexCalculator) -> AcquisitionPipeline {
        AcquisitionPipeline::new(
            self.universe_selector(self.market_data()),
            calculator.store().clone(),
            calculator.cache().clone(),
        )
    }

    pub fn default_template() -> String {
        let template = r#"[storage]
db_path = "~/.local/share/top100-index/index.db"

[cache]
# redis | memory | disabled
backend = "redis"
redis_url = "redis://127.0.0.1:6379/0"

[market]
listing_url = "https://www.nasdaqtrader.com/dynamic/SymDir/nasdaqtraded.txt"
quote_url = "https://query1.finance.yahoo.com/v8/finance/chart"
retry_attempts = 3
retry_delay_secs = 5
quote_retry_attempts = 2
quote_retry_delay_ms = 500
quote_concurrency = 8

[index]
cohort_size = 100

[server]
host = "127.0.0.1"
port = 8000
"#;
        template.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            redis_url: default_redis_url(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            listing_url: default_listing_url(),
            quote_url: default_quote_url(),
            retry_attempts: default_retry_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            quote_retry_attempts: default_quote_retry_attempts(),
            quote_retry_delay_ms: default_quote_retry_delay_ms(),
            quote_concurrency: default_quote_concurrency(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cohort_size: default_cohort_size(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_db_path() -> String {
    "~/.local/share/top100-index/index.db".to_string()
}

fn default_cache_backend() -> CacheBackendKind {
    CacheBackendKind::Redis
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_listing_url() -> String {
    NASDAQ_TRADED_URL.to_string()
}

fn default_quote_url() -> String {
    YAHOO_CHART_URL.to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_quote_retry_attempts() -> u32 {
    2
}

fn default_quote_retry_delay_ms() -> u64 {
    500
}

fn default_quote_concurrency() -> usize {
    8
}

fn default_cohort_size() -> usize {
    DEFAULT_COHORT_SIZE
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_to_defaults() {
        let parsed: Config = toml::from_str(&Config::default_template()).expect("parse template");
        let defaults = Config::default();
        assert_eq!(parsed.cache.backend, defaults.cache.backend);
        assert_eq!(parsed.market.listing_url, defaults.market.listing_url);
        assert_eq!(parsed.market.retry_attempts, 3);
        assert_eq!(
            parsed.quote_retry(),
            RetryPolicy::new(2, Duration::from_millis(500))
        );
        assert_eq!(parsed.index.cohort_size, 100);
        assert_eq!(parsed.server.port, defaults.server.port);
    }

    #[test]
    fn partial_file_fills_missing_fields() {
        let parsed: Config = toml::from_str(
            r#"
[cache]
backend = "memory"

[market]
retry_delay_secs = 1
"#,
        )
        .expect("parse partial");
        assert_eq!(parsed.cache.backend, CacheBackendKind::Memory);
        assert_eq!(parsed.cache.redis_url, default_redis_url());
        assert_eq!(parsed.listing_retry().delay, Duration::from_secs(1));
        assert_eq!(parsed.market.quote_concurrency, 8);
    }

    #[test]
    fn overrides_win_over_file() {
        let mut config = Config::default();
        config.apply_overrides(ConfigOverrides {
            db_path: Some("/tmp/index.db".to_string()),
            cache_backend: Some(CacheBackendKind::Disabled),
            redis_url: None,
        });
        assert_eq!(config.resolved_db_path(), PathBuf::from("/tmp/index.db"));
        assert_eq!(config.build_cache().backend_name(), "disabled");
    }
}
