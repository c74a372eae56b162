use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub node_api_url: String,
    /// Quality ratio below which a deal is closed and its supplier blacklisted.
    pub quality_threshold: f64,
    pub reconcile_interval: Duration,
    pub connection_timeout: Duration,
    pub log_processor: ProcessorFormat,
    pub processor: ProcessorConfig,
    pub pool_processor: PoolFormat,
    pub pool_api_url: String,
    pub pool: PoolConfig,
}

/// Timing knobs of the per-task log processor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessorConfig {
    pub warmup: Duration,
    pub stale_after: Duration,
    pub log_retry_interval: Duration,
    pub smoothing_window: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(3 * 60),
            stale_after: Duration::from_secs(2 * 60),
            log_retry_interval: Duration::from_secs(10),
            smoothing_window: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorFormat {
    /// Parse miner speed reports from the task's stdout.
    Common,
    /// Trust every task; quality is always 1.0.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolFormat {
    /// Poll worker statistics from dwarfpool.
    Dwarf,
    /// No pool signal; quality is always 1.0.
    Disabled,
}

/// Timing knobs of the per-task pool report processor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolConfig {
    pub track_interval: Duration,
    pub smoothing_window: Duration,
    /// Pool statistics lag behind the miner; the ratio is ignored until then.
    pub accuracy_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            track_interval: Duration::from_secs(60),
            smoothing_window: Duration::from_secs(60 * 60),
            accuracy_delay: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let node_api_url = env_map
            .get("NODE_API_URL")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("NODE_API_URL".to_string()))?;

        let quality_threshold = env_map
            .get("QUALITY_THRESHOLD")
            .map(|s| s.as_str())
            .unwrap_or("0.9")
            .parse::<f64>()
            .ok()
            .filter(|q| *q > 0.0 && *q <= 1.0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "QUALITY_THRESHOLD".to_string(),
                    "must be a number in (0, 1]".to_string(),
                )
            })?;

        let log_processor = match env_map
            .get("LOG_PROCESSOR")
            .map(|s| s.as_str())
            .unwrap_or("common")
        {
            "common" => ProcessorFormat::Common,
            "disabled" => ProcessorFormat::Disabled,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LOG_PROCESSOR".to_string(),
                    format!("must be common or disabled, got {}", other),
                ))
            }
        };

        let pool_processor = match env_map
            .get("POOL_PROCESSOR")
            .map(|s| s.as_str())
            .unwrap_or("disabled")
        {
            "dwarf" => PoolFormat::Dwarf,
            "disabled" => PoolFormat::Disabled,
            other => {
                return Err(ConfigError::InvalidValue(
                    "POOL_PROCESSOR".to_string(),
                    format!("must be dwarf or disabled, got {}", other),
                ))
            }
        };

        let pool_api_url = env_map
            .get("POOL_API_URL")
            .cloned()
            .unwrap_or_else(|| crate::services::pool::DWARFPOOL_API_URL.to_string());

        let pool = PoolConfig {
            track_interval: parse_secs(&env_map, "POOL_TRACK_SECS", 60)?,
            smoothing_window: parse_secs(&env_map, "POOL_SMOOTHING_WINDOW_SECS", 3600)?,
            accuracy_delay: parse_secs(&env_map, "POOL_ACCURACY_SECS", 3600)?,
        };

        let processor = ProcessorConfig {
            warmup: parse_secs(&env_map, "TASK_WARMUP_SECS", 180)?,
            stale_after: parse_secs(&env_map, "SAMPLE_STALE_SECS", 120)?,
            log_retry_interval: parse_secs(&env_map, "LOG_RETRY_SECS", 10)?,
            smoothing_window: parse_secs(&env_map, "SMOOTHING_WINDOW_SECS", 300)?,
        };

        Ok(Config {
            port,
            node_api_url,
            quality_threshold,
            reconcile_interval: parse_secs(&env_map, "RECONCILE_INTERVAL_SECS", 10)?,
            connection_timeout: parse_secs(&env_map, "CONNECTION_TIMEOUT_SECS", 30)?,
            log_processor,
            processor,
            pool_processor,
            pool_api_url,
            pool,
        })
    }
}

/// Parse a positive number of seconds, falling back to `default`.
fn parse_secs(
    env_map: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match env_map.get(key) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                ConfigError::InvalidValue(key.to_string(), "must be a positive integer".to_string())
            }),
    }
}
