//! Ingestor Configuration Module
//!
//! Loads the ingestor configuration from an optional TOML file with
//! environment variable overrides, e.g. `BARFLOW__POLYGON__API_KEY`.
//! String values may reference environment variables (`${POLYGON_API_KEY}`).

use crate::service::{engine, feed, ingestion};
use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use types::TimeframeId;

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "BARFLOW";

/// Environment variable naming the config file
pub const CONFIG_PATH_VAR: &str = "BARFLOW_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/ingestor.toml";

/// Main ingestor configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestorConfig {
    /// Feed endpoint and credentials
    pub polygon: PolygonConfig,

    /// Tickers to subscribe to
    pub symbols: Vec<String>,

    /// Connection health and reconnection
    pub connection: ConnectionSettings,

    /// Batching and persistence
    pub ingestion: IngestionSettings,

    pub engine: EngineSettings,

    pub logging: LoggingSettings,

    /// Per-ticker reference data for the in-memory symbol registry
    pub reference: BTreeMap<String, SymbolReference>,
}

/// Float and average volume for one ticker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolReference {
    pub float_shares: Option<u64>,
    pub avg_daily_volume_3m: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolygonConfig {
    pub api_key: String,
    pub url: String,
    /// Aggregate channel prefix, `AM` for minute bars
    pub channel: String,
}

impl Default for PolygonConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: feed::DEFAULT_URL.to_string(),
            channel: feed::DEFAULT_CHANNEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connect_timeout_ms: u64,
    pub message_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: feed::CONNECT_TIMEOUT_MS,
            message_timeout_ms: feed::MESSAGE_TIMEOUT_MS,
            ping_interval_ms: feed::PING_INTERVAL_MS,
            reconnect_base_delay_ms: feed::RECONNECT_BASE_DELAY_MS,
            reconnect_max_delay_ms: feed::RECONNECT_MAX_DELAY_MS,
        }
    }
}

impl ConnectionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout_ms == 0 {
            return Err("Connect timeout must be greater than 0".to_string());
        }
        if self.message_timeout_ms == 0 {
            return Err("Message timeout must be greater than 0".to_string());
        }
        if self.ping_interval_ms == 0 || self.ping_interval_ms >= self.message_timeout_ms {
            return Err(format!(
                "Ping interval {}ms must be positive and below the message timeout {}ms",
                self.ping_interval_ms, self.message_timeout_ms
            ));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err("Reconnect base delay must be greater than 0".to_string());
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(format!(
                "Reconnect max delay {}ms is below base delay {}ms",
                self.reconnect_max_delay_ms, self.reconnect_base_delay_ms
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    /// Timeframe id stamped on incoming bars
    pub timeframe_id: u8,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_buffered_batches: usize,
    pub channel_capacity: usize,
    pub sink_retry_attempts: u32,
    pub metadata_ttl_secs: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            timeframe_id: TimeframeId::MINUTE_1.inner(),
            batch_size: ingestion::BATCH_SIZE,
            flush_interval_ms: ingestion::FLUSH_INTERVAL_MS,
            max_buffered_batches: ingestion::MAX_BUFFERED_BATCHES,
            channel_capacity: ingestion::CHANNEL_CAPACITY,
            sink_retry_attempts: ingestion::SINK_RETRY_ATTEMPTS,
            metadata_ttl_secs: ingestion::METADATA_TTL_SECS,
        }
    }
}

impl IngestionSettings {
    pub fn timeframe(&self) -> TimeframeId {
        TimeframeId::new(self.timeframe_id)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// `None` when reloading is disabled
    pub fn metadata_ttl(&self) -> Option<Duration> {
        (self.metadata_ttl_secs > 0).then(|| Duration::from_secs(self.metadata_ttl_secs))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.timeframe().label().is_none() {
            return Err(format!("Unknown timeframe id {}", self.timeframe_id));
        }
        if self.batch_size == 0 {
            return Err("Batch size must be greater than 0".to_string());
        }
        if self.flush_interval_ms == 0 {
            return Err("Flush interval must be greater than 0".to_string());
        }
        if self.max_buffered_batches == 0 {
            return Err("Max buffered batches must be greater than 0".to_string());
        }
        if self.channel_capacity == 0 {
            return Err("Channel capacity must be greater than 0".to_string());
        }
        if self.sink_retry_attempts == 0 {
            return Err("Sink retry attempts must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub market_timezone: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            market_timezone: engine::MARKET_TIMEZONE.to_string(),
        }
    }
}

impl EngineSettings {
    pub fn market_tz(&self) -> Result<Tz, String> {
        self.market_timezone
            .parse::<Tz>()
            .map_err(|e| format!("Invalid market timezone '{}': {}", self.market_timezone, e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl IngestorConfig {
    /// Load from `BARFLOW_CONFIG` (or `config/ingestor.toml`) plus `BARFLOW__*` overrides
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(Some(&path), ENV_PREFIX)
    }

    /// Load from an optional file with overrides from `<prefix>__SECTION__KEY`
    pub fn load_from(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if path.exists() {
                info!("Loading ingestor config: {:?}", path);
            } else {
                debug!("Config file {:?} not found, using defaults", path);
            }
            builder = builder.add_source(File::from(path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("symbols"),
        );

        let mut config: IngestorConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.expand_env_vars()?;
        config.normalize_symbols();
        config.validate().map_err(|e| anyhow!(e))?;
        Ok(config)
    }

    /// Expand environment variables in credential and endpoint values
    pub fn expand_env_vars(&mut self) -> Result<()> {
        self.polygon.api_key = shellexpand::env(&self.polygon.api_key)
            .context("Failed to expand API key")?
            .into_owned();
        self.polygon.url = shellexpand::env(&self.polygon.url)
            .context("Failed to expand feed URL")?
            .into_owned();
        Ok(())
    }

    /// Trim, upper-case and de-duplicate tickers, keeping first-seen order
    pub fn normalize_symbols(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.symbols = self
            .symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();
        self.reference = std::mem::take(&mut self.reference)
            .into_iter()
            .map(|(ticker, reference)| (ticker.trim().to_uppercase(), reference))
            .collect();
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.polygon.api_key.trim().is_empty() {
            return Err("Feed API key is required".to_string());
        }
        if !self.polygon.url.starts_with("ws://") && !self.polygon.url.starts_with("wss://") {
            return Err("Feed URL must start with ws:// or wss://".to_string());
        }
        if self.polygon.channel.is_empty() {
            return Err("Feed channel cannot be empty".to_string());
        }
        if self.symbols.is_empty() {
            return Err("At least one symbol must be configured".to_string());
        }
        self.connection.validate()?;
        self.ingestion.validate()?;
        self.engine.market_tz()?;
        Ok(())
    }

    /// Subscription topic, e.g. `AM.AAPL,AM.MSFT`
    pub fn subscription_params(&self) -> String {
        self.symbols
            .iter()
            .map(|s| format!("{}.{}", self.polygon.channel, s))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn valid() -> IngestorConfig {
        IngestorConfig {
            polygon: PolygonConfig {
                api_key: "key".to_string(),
                ..PolygonConfig::default()
            },
            symbols: vec!["AAPL".to_string()],
            ..IngestorConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = IngestorConfig::default();
        assert_eq!(config.polygon.url, "wss://delayed.polygon.io/stocks");
        assert_eq!(config.ingestion.batch_size, 500);
        assert_eq!(config.ingestion.flush_interval(), Duration::from_secs(1));
        assert_eq!(config.ingestion.timeframe(), TimeframeId::MINUTE_1);
        assert_eq!(config.connection.reconnect_base_delay_ms, 1_000);
        assert_eq!(config.connection.reconnect_max_delay_ms, 30_000);
        assert_eq!(config.connection.ping_interval(), Duration::from_secs(15));
        assert_eq!(config.engine.market_tz().unwrap(), chrono_tz::America::New_York);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("ingestor.toml");

        let config_content = r#"
symbols = ["aapl", "MSFT", " aapl "]

[polygon]
api_key = "file-key"

[ingestion]
batch_size = 50

[logging]
level = "debug"
json = true

[reference.aapl]
float_shares = 15000000000
avg_daily_volume_3m = 55000000

[reference.MSFT]
float_shares = 7400000000
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = IngestorConfig::load_from(Some(&config_path), "BARFLOW_TEST_FILE").unwrap();

        assert_eq!(config.polygon.api_key, "file-key");
        assert_eq!(config.symbols, vec!["AAPL", "MSFT"]);
        assert_eq!(config.ingestion.batch_size, 50);
        assert_eq!(config.ingestion.flush_interval_ms, 1_000);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.subscription_params(), "AM.AAPL,AM.MSFT");

        let aapl = &config.reference["AAPL"];
        assert_eq!(aapl.float_shares, Some(15_000_000_000));
        assert_eq!(aapl.avg_daily_volume_3m, Some(55_000_000));
        assert_eq!(config.reference["MSFT"].avg_daily_volume_3m, None);
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("BARFLOW_TEST_ENV__POLYGON__API_KEY", "env-key");
        std::env::set_var("BARFLOW_TEST_ENV__SYMBOLS", "TSLA,NVDA");
        std::env::set_var("BARFLOW_TEST_ENV__CONNECTION__RECONNECT_MAX_DELAY_MS", "5000");

        let config = IngestorConfig::load_from(None, "BARFLOW_TEST_ENV").unwrap();
        assert_eq!(config.polygon.api_key, "env-key");
        assert_eq!(config.symbols, vec!["TSLA", "NVDA"]);
        assert_eq!(config.connection.reconnect_max_delay_ms, 5_000);

        std::env::remove_var("BARFLOW_TEST_ENV__POLYGON__API_KEY");
        std::env::remove_var("BARFLOW_TEST_ENV__SYMBOLS");
        std::env::remove_var("BARFLOW_TEST_ENV__CONNECTION__RECONNECT_MAX_DELAY_MS");
    }

    #[test]
    fn test_api_key_expanded_from_environment() {
        std::env::set_var("BARFLOW_TEST_SECRET", "expanded-key");
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("ingestor.toml");
        fs::write(
            &config_path,
            "symbols = [\"SPY\"]\n[polygon]\napi_key = \"${BARFLOW_TEST_SECRET}\"\n",
        )
        .unwrap();

        let config = IngestorConfig::load_from(Some(&config_path), "BARFLOW_TEST_EXPAND").unwrap();
        assert_eq!(config.polygon.api_key, "expanded-key");
        std::env::remove_var("BARFLOW_TEST_SECRET");
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("ingestor.toml");
        fs::write(&config_path, "symbols = [\"SPY\"]\n").unwrap();

        let err = IngestorConfig::load_from(Some(&config_path), "BARFLOW_TEST_NOKEY").unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = valid();
        assert!(config.validate().is_ok());

        config.polygon.url = "http://invalid.com".to_string();
        assert!(config.validate().is_err());

        config = valid();
        config.connection.reconnect_max_delay_ms = 10;
        assert!(config.validate().is_err());

        config = valid();
        config.connection.ping_interval_ms = config.connection.message_timeout_ms;
        assert!(config.validate().is_err());

        config = valid();
        config.ingestion.batch_size = 0;
        assert!(config.validate().is_err());

        config = valid();
        config.engine.market_timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());

        config = valid();
        config.ingestion.timeframe_id = 5;
        assert!(config.validate().is_err());

        config = valid();
        config.symbols.clear();
        assert!(config.validate().is_err());
    }
}
