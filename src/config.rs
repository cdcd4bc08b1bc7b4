//! Service configuration
//!
//! Loaded from TOML, then overridden by `SERIES_*` environment variables:
//!
//! ```toml
//! [layout]
//! partition_period = "year"   # or "month"
//!
//! [read]
//! max_points = 10000
//!
//! [store]
//! kind = "simulated"          # or "in_memory"
//! seed = 42
//! write_fail_prob = 0.01
//!
//! [logging]
//! filter = "info,series_store=debug"
//! format = "json"             # or "text"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::error::ConfigError;
use crate::layout::{IndexResolver, PartitionPeriod};
use crate::query::DEFAULT_MAX_POINTS;
use crate::store::{
    InMemoryDocumentStore, SharedDocumentStore, SimulatedDocumentStore, SimulatedStoreConfig,
};

/// Hard upper bound for `read.max_points`
pub const MAX_POINTS_LIMIT: usize = 100_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub layout: LayoutConfig,
    pub read: ReadConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub partition_period: PartitionPeriod,
}

impl LayoutConfig {
    pub fn resolver(&self) -> IndexResolver {
        IndexResolver::new(self.partition_period)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    /// Maximum points a single range read may return
    pub max_points: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        ReadConfig {
            max_points: DEFAULT_MAX_POINTS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    InMemory,
    /// In-memory store behind seeded fault injection
    Simulated,
}

impl FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in_memory" | "memory" => Ok(StoreKind::InMemory),
            "simulated" => Ok(StoreKind::Simulated),
            other => Err(ConfigError::Invalid(format!("unknown store kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub seed: u64,
    pub write_fail_prob: f64,
    pub timeout_prob: f64,
    pub search_fail_prob: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let faults = SimulatedStoreConfig::default();
        StoreConfig {
            kind: StoreKind::InMemory,
            seed: 0,
            write_fail_prob: faults.write_fail_prob,
            timeout_prob: faults.timeout_prob,
            search_fail_prob: faults.search_fail_prob,
        }
    }
}

impl StoreConfig {
    pub fn simulated(&self) -> SimulatedStoreConfig {
        SimulatedStoreConfig {
            write_fail_prob: self.write_fail_prob,
            timeout_prob: self.timeout_prob,
            search_fail_prob: self.search_fail_prob,
            ..SimulatedStoreConfig::default()
        }
    }

    /// Construct the configured store
    pub fn build(&self) -> SharedDocumentStore {
        match self.kind {
            StoreKind::InMemory => {
                info!("Using in-memory document store");
                Arc::new(InMemoryDocumentStore::new())
            }
            StoreKind::Simulated => {
                let faults = self.simulated();
                info!(
                    "Using simulated document store (seed {}, faults {:?})",
                    self.seed, faults
                );
                Arc::new(SimulatedDocumentStore::new(
                    InMemoryDocumentStore::new(),
                    self.seed,
                    faults,
                ))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Invalid(format!("unknown log format: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: ServiceConfig = toml::from_str(&raw)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = ServiceConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Configuration for a command line
    ///
    /// A leading `--config <path>` loads that file, otherwise defaults are
    /// used; `SERIES_*` overrides apply either way. Returns the remaining
    /// arguments.
    pub fn from_args(mut args: Vec<String>) -> Result<(Self, Vec<String>), ConfigError> {
        if args.first().map(String::as_str) != Some("--config") {
            return Ok((ServiceConfig::from_env()?, args));
        }
        if args.len() < 2 {
            return Err(ConfigError::Invalid("--config requires a path".to_string()));
        }
        let path = args.remove(1);
        args.remove(0);
        Ok((ServiceConfig::load(&path)?, args))
    }

    /// Apply `SERIES_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup, then validate
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SERIES_PARTITION_PERIOD") {
            self.layout.partition_period = v
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("SERIES_PARTITION_PERIOD: {}", e)))?;
        }
        if let Some(v) = lookup("SERIES_MAX_POINTS") {
            self.read.max_points = parse_env("SERIES_MAX_POINTS", &v)?;
        }
        if let Some(v) = lookup("SERIES_STORE") {
            self.store.kind = v.parse()?;
        }
        if let Some(v) = lookup("SERIES_SEED") {
            self.store.seed = parse_env("SERIES_SEED", &v)?;
        }
        if let Some(v) = lookup("SERIES_LOG_FILTER") {
            self.logging.filter = v;
        }
        if let Some(v) = lookup("SERIES_LOG_FORMAT") {
            self.logging.format = v.parse()?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read.max_points == 0 || self.read.max_points > MAX_POINTS_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "read.max_points must be within 1..={}, got {}",
                MAX_POINTS_LIMIT, self.read.max_points
            )));
        }
        for (name, p) in [
            ("write_fail_prob", self.store.write_fail_prob),
            ("timeout_prob", self.store.timeout_prob),
            ("search_fail_prob", self.store.search_fail_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Invalid(format!(
                    "store.{} must be within [0, 1], got {}",
                    name, p
                )));
            }
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.filter must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{}={}: {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SeriesError;
    use crate::ingest::IngestService;
    use crate::layout::PartitionId;
    use crate::model::{MeasurementDistance, SeriesDefinition, TimeSeriesPoint};
    use crate::query::SeriesReader;
    use crate::store::DocumentStore;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.layout.partition_period, PartitionPeriod::Year);
        assert_eq!(config.read.max_points, 10_000);
        assert_eq!(config.store.kind, StoreKind::InMemory);
        assert_eq!(config.logging.filter, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServiceConfig::from_toml_str(
            r#"
            [layout]
            partition_period = "month"

            [store]
            kind = "simulated"
            seed = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.layout.partition_period, PartitionPeriod::Month);
        assert_eq!(config.store.kind, StoreKind::Simulated);
        assert_eq!(config.store.seed, 7);
        assert_eq!(config.read.max_points, DEFAULT_MAX_POINTS);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_invalid_toml_values() {
        assert!(matches!(
            ServiceConfig::from_toml_str("[layout]\npartition_period = \"week\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ServiceConfig::from_toml_str("[read]\nmax_points = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServiceConfig::from_toml_str("[store]\ntimeout_prob = 1.5"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let mut config = ServiceConfig::default();
        config
            .apply_overrides(lookup(&[
                ("SERIES_PARTITION_PERIOD", "month"),
                ("SERIES_MAX_POINTS", "500"),
                ("SERIES_STORE", "simulated"),
                ("SERIES_SEED", "99"),
                ("SERIES_LOG_FORMAT", "json"),
            ]))
            .unwrap();
        assert_eq!(config.layout.partition_period, PartitionPeriod::Month);
        assert_eq!(config.read.max_points, 500);
        assert_eq!(config.store.kind, StoreKind::Simulated);
        assert_eq!(config.store.seed, 99);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_overrides_are_errors() {
        let mut config = ServiceConfig::default();
        assert!(config.apply_overrides(lookup(&[("SERIES_MAX_POINTS", "lots")])).is_err());
        assert!(config.apply_overrides(lookup(&[("SERIES_STORE", "s3")])).is_err());
        assert!(config.apply_overrides(lookup(&[("SERIES_MAX_POINTS", "100001")])).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[read]\nmax_points = 250\n[logging]\nfilter = \"warn\"").unwrap();
        let config = ServiceConfig::load(file.path()).unwrap();
        assert_eq!(config.read.max_points, 250);
        assert_eq!(config.logging.filter, "warn");
        assert_eq!(config.layout.resolver().period(), PartitionPeriod::Year);
    }

    #[test]
    fn test_load_missing_file() {
        let result = ServiceConfig::load("/nonexistent/series.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_store_simulated_config() {
        let store = StoreConfig {
            write_fail_prob: 0.2,
            ..StoreConfig::default()
        };
        assert_eq!(store.simulated().write_fail_prob, 0.2);
    }

    #[test]
    fn test_from_args() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[layout]\npartition_period = \"month\"").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let args = vec!["--config".to_string(), path, "resolve".to_string()];
        let (config, rest) = ServiceConfig::from_args(args).unwrap();
        assert_eq!(config.layout.partition_period, PartitionPeriod::Month);
        assert_eq!(rest, vec!["resolve".to_string()]);

        assert!(ServiceConfig::from_args(vec!["--config".to_string()]).is_err());
        let (_, rest) = ServiceConfig::from_args(vec!["range".to_string()]).unwrap();
        assert_eq!(rest, vec!["range".to_string()]);
    }

    // =========================================================================
    // Wiring into services
    // =========================================================================

    fn config(raw: &str) -> ServiceConfig {
        ServiceConfig::from_toml_str(raw).unwrap()
    }

    fn points(n: u32) -> Vec<TimeSeriesPoint> {
        (0..n)
            .map(|m| {
                TimeSeriesPoint::new(Utc.with_ymd_and_hms(2021, 3, 3, 0, m, 0).unwrap())
                    .measurement("x", 1)
            })
            .collect()
    }

    fn minutes() -> SeriesDefinition {
        SeriesDefinition::new("123", "series", MeasurementDistance::Minutes).unwrap()
    }

    #[tokio::test]
    async fn test_configured_store_kind() {
        let in_memory = config("[store]\nkind = \"in_memory\"\nwrite_fail_prob = 1.0");
        let ingest = IngestService::from_config(in_memory.store.build(), &in_memory);
        assert!(ingest.ingest(&minutes(), &points(3)).await.unwrap().all_ok());

        let simulated = config("[store]\nkind = \"simulated\"\nseed = 7\nwrite_fail_prob = 1.0");
        let ingest = IngestService::from_config(simulated.store.build(), &simulated);
        let response = ingest.ingest(&minutes(), &points(3)).await.unwrap();
        assert_eq!(response.retryable_positions(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_configured_read_cap_and_period() {
        let config = config("[layout]\npartition_period = \"month\"\n[read]\nmax_points = 5");
        let store = config.store.build();
        let ingest = IngestService::from_config(store.clone(), &config);
        let reader = SeriesReader::from_config(store.clone(), &config);
        assert_eq!(reader.max_points(), 5);

        ingest.ingest(&minutes(), &points(6)).await.unwrap();
        let partitions = store.partitions("123@series@").await.unwrap();
        assert_eq!(partitions, vec![PartitionId::from("123@series@minute202103")]);
        assert!(matches!(
            reader.read(&minutes(), None, None).await,
            Err(SeriesError::CapacityExceeded { limit: 5, total: 6 })
        ));
    }
}
