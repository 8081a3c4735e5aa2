use std::{net::SocketAddr, path::Path, time::Duration};

use clap::{Parser, Subcommand};
use serde::Deserialize;
use thiserror::Error;

use acctsync_core::EligibilityPolicy;

#[derive(Parser, Debug)]
#[command(name = "acctsync", about = "Account sync pipeline - scheduled ingestion of provider account data")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, env = "ACCTSYNC_CONFIG", default_value = "acctsync.toml")]
    pub config: String,

    /// Port to listen on (overrides config file)
    #[arg(short, long, env = "ACCTSYNC_PORT")]
    pub port: Option<u16>,

    /// Log level (overrides config file)
    #[arg(short, long, env = "ACCTSYNC_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the fetcher, the normalizers and the health endpoint (default)
    Run,
    /// Insert the demo account and exit
    Seed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid listen address {0}")]
    ListenAddr(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Sqlite,
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    #[serde(default)]
    pub postgres_url: Option<String>,

    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,
}

/// Pipeline tuning. Durations are whole seconds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub tick_interval_secs: u64,
    pub batch_size: usize,
    pub staleness_threshold_secs: u64,
    pub zombie_threshold_secs: u64,
    pub lookback_days: u32,
    pub queue_capacity: usize,
    pub fetch_timeout_secs: u64,
    /// 0 disables automatic retry of FAILED accounts.
    pub failed_retry_after_secs: u64,
    /// 0 disables re-claiming accounts stuck in FETCHED.
    pub fetched_retry_after_secs: u64,
    pub default_priority: i32,
    pub normalizer_workers: usize,
    pub mock_latency_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: StorageBackendKind::default(),
            sqlite_path: default_sqlite_path(),
            postgres_url: None,
            snapshot_dir: default_snapshot_dir(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            tick_interval_secs: 5,
            batch_size: 10,
            staleness_threshold_secs: 6 * 60 * 60,
            zombie_threshold_secs: 60 * 60,
            lookback_days: 90,
            queue_capacity: 100,
            fetch_timeout_secs: 30,
            failed_retry_after_secs: 60 * 60,
            fetched_retry_after_secs: 60 * 60,
            default_priority: acctsync_core::DEFAULT_PRIORITY,
            normalizer_workers: 1,
            mock_latency_ms: 200,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sqlite_path() -> String {
    "acctsync.db".to_string()
}

fn default_snapshot_dir() -> String {
    "data/raw".to_string()
}

fn secs(value: u64) -> time::Duration {
    time::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

fn optional_secs(value: u64) -> Option<time::Duration> {
    (value > 0).then(|| secs(value))
}

impl IngestConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn mock_latency(&self) -> Duration {
        Duration::from_millis(self.mock_latency_ms)
    }

    pub fn lookback(&self) -> time::Duration {
        time::Duration::days(i64::from(self.lookback_days))
    }

    pub fn policy(&self) -> EligibilityPolicy {
        EligibilityPolicy {
            staleness: secs(self.staleness_threshold_secs),
            zombie: secs(self.zombie_threshold_secs),
            failed_retry_after: optional_secs(self.failed_retry_after_secs),
            fetched_retry_after: optional_secs(self.fetched_retry_after_secs),
        }
    }

    /// Applies `ACCTSYNC_INGEST_<FIELD>` overrides.
    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        env_override(&lookup, "ACCTSYNC_INGEST_TICK_INTERVAL_SECS", &mut self.tick_interval_secs)?;
        env_override(&lookup, "ACCTSYNC_INGEST_BATCH_SIZE", &mut self.batch_size)?;
        env_override(&lookup, "ACCTSYNC_INGEST_STALENESS_THRESHOLD_SECS", &mut self.staleness_threshold_secs)?;
        env_override(&lookup, "ACCTSYNC_INGEST_ZOMBIE_THRESHOLD_SECS", &mut self.zombie_threshold_secs)?;
        env_override(&lookup, "ACCTSYNC_INGEST_LOOKBACK_DAYS", &mut self.lookback_days)?;
        env_override(&lookup, "ACCTSYNC_INGEST_QUEUE_CAPACITY", &mut self.queue_capacity)?;
        env_override(&lookup, "ACCTSYNC_INGEST_FETCH_TIMEOUT_SECS", &mut self.fetch_timeout_secs)?;
        env_override(&lookup, "ACCTSYNC_INGEST_FAILED_RETRY_AFTER_SECS", &mut self.failed_retry_after_secs)?;
        env_override(&lookup, "ACCTSYNC_INGEST_FETCHED_RETRY_AFTER_SECS", &mut self.fetched_retry_after_secs)?;
        env_override(&lookup, "ACCTSYNC_INGEST_DEFAULT_PRIORITY", &mut self.default_priority)?;
        env_override(&lookup, "ACCTSYNC_INGEST_NORMALIZER_WORKERS", &mut self.normalizer_workers)?;
        env_override(&lookup, "ACCTSYNC_INGEST_MOCK_LATENCY_MS", &mut self.mock_latency_ms)?;
        Ok(())
    }
}

fn env_override<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(value) = lookup(key) {
        *target = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value,
        })?;
    }
    Ok(())
}

impl Config {
    /// File, then `ACCTSYNC_*` environment, then command line. A missing file
    /// means defaults; an unparsable one is an error.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        Self::load_with_env(cli, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(cli: &CliArgs, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::from_file(Path::new(&cli.config))?;

        if let Some(url) = lookup("ACCTSYNC_POSTGRES_URL") {
            config.storage.postgres_url = Some(url);
        }
        if let Some(path) = lookup("ACCTSYNC_SQLITE_PATH") {
            config.storage.sqlite_path = path;
        }
        if let Some(backend) = lookup("ACCTSYNC_STORAGE_BACKEND") {
            config.storage.backend = match backend.trim().to_ascii_lowercase().as_str() {
                "sqlite" => StorageBackendKind::Sqlite,
                "postgres" => StorageBackendKind::Postgres,
                "memory" => StorageBackendKind::Memory,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "ACCTSYNC_STORAGE_BACKEND".to_string(),
                        value: backend,
                    })
                }
            };
        }
        config.ingest.apply_env(&lookup)?;

        // CLI overrides
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ingest = &self.ingest;
        let zero = [
            ("ingest.tick_interval_secs", ingest.tick_interval_secs == 0),
            ("ingest.batch_size", ingest.batch_size == 0),
            ("ingest.queue_capacity", ingest.queue_capacity == 0),
            ("ingest.normalizer_workers", ingest.normalizer_workers == 0),
            ("ingest.fetch_timeout_secs", ingest.fetch_timeout_secs == 0),
        ];
        if let Some((key, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::Invalid(format!("{} must be positive", key)));
        }
        Ok(())
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse().map_err(|_| ConfigError::ListenAddr(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cli(path: &str) -> CliArgs {
        CliArgs {
            config: path.to_string(),
            port: None,
            log_level: None,
            command: None,
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load_with_env(&cli("/nonexistent/acctsync.toml"), no_env).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, StorageBackendKind::Sqlite);
        assert_eq!(config.ingest.batch_size, 10);
        assert_eq!(config.ingest.lookback(), time::Duration::days(90));

        let policy = config.ingest.policy();
        assert_eq!(policy.staleness, time::Duration::hours(6));
        assert_eq!(policy.zombie, time::Duration::hours(1));
        assert_eq!(policy.failed_retry_after, Some(time::Duration::hours(1)));
    }

    #[test]
    fn test_file_env_and_cli_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acctsync.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 9000

[storage]
backend = "memory"

[ingest]
batch_size = 25
failed_retry_after_secs = 0
"#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [("ACCTSYNC_INGEST_BATCH_SIZE", "50"), ("ACCTSYNC_INGEST_QUEUE_CAPACITY", "7")].into();
        let mut args = cli(path.to_str().unwrap());
        args.port = Some(9100);

        let config = Config::load_with_env(&args, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.storage.backend, StorageBackendKind::Memory);
        assert_eq!(config.ingest.batch_size, 50);
        assert_eq!(config.ingest.queue_capacity, 7);
        assert_eq!(config.ingest.policy().failed_retry_after, None);
        assert_eq!(config.listen_addr().unwrap().port(), 9100);
    }

    #[test]
    fn test_bad_env_value() {
        let err = Config::load_with_env(&cli("/nonexistent.toml"), |k| {
            (k == "ACCTSYNC_INGEST_BATCH_SIZE").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_unparsable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acctsync.toml");
        std::fs::write(&path, "[ingest\nbatch_size = ").unwrap();
        assert!(matches!(
            Config::load_with_env(&cli(path.to_str().unwrap()), no_env),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Config::load_with_env(&cli("/nonexistent.toml"), |k| {
            (k == "ACCTSYNC_INGEST_NORMALIZER_WORKERS").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
