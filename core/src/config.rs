use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable consulted for the API key when `api.app_key` is unset.
pub const API_KEY_ENV: &str = "TFL_API_KEY";

/// Upper bound on `collect.run_deadline_secs` (one day).
pub const MAX_RUN_DEADLINE_SECS: u64 = 86_400;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub api: ApiConfig,
    pub collect: CollectConfig,
    pub retry: RetryConfig,
    pub output: OutputConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub app_key: Option<String>,
    pub timeout_secs: u64,
    pub requests_per_second: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectConfig {
    /// Modes used to discover line ids when `line_ids` is empty.
    #[serde(default)]
    pub modes: Vec<String>,
    #[serde(default)]
    pub line_ids: Vec<String>,
    pub status_batch_size: usize,
    pub arrivals_batch_size: usize,
    pub max_concurrent_batches: usize,
    pub run_deadline_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    /// Fixed jitter seed; a random one is drawn per run when unset.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    pub status_dir: PathBuf,
    pub arrivals_dir: PathBuf,
    /// Nest snapshots under `dt=YYYY-MM-DD/` folders.
    pub partition_by_day: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Config {
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = Self::layered(path, Self::environment())?;

        if settings.api.app_key.is_none() {
            settings.api.app_key = std::env::var(API_KEY_ENV)
                .ok()
                .filter(|key| !key.is_empty());
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Environment overrides (TFL_COLLECTOR__ prefix, comma-separated lists)
    fn environment() -> Environment {
        Environment::with_prefix("TFL_COLLECTOR")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("collect.modes")
            .with_list_parse_key("collect.line_ids")
            .try_parsing(true)
    }

    fn layered(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        // Load default configuration
        builder = builder.add_source(config::Config::try_from(&Config::default())?);

        // Layer on config file: explicit path must exist, config.toml is optional
        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path.to_path_buf()).required(true));
            }
            None if Path::new("config.toml").exists() => {
                builder = builder.add_source(File::with_name("config"));
            }
            None => {}
        }

        builder.add_source(env).build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.is_empty() {
            return Err(ConfigError::Message("api.base_url is required".into()));
        }

        if self.api.requests_per_second == 0 {
            return Err(ConfigError::Message(
                "api.requests_per_second must be greater than 0".into(),
            ));
        }

        if self.collect.status_batch_size == 0 || self.collect.arrivals_batch_size == 0 {
            return Err(ConfigError::Message(
                "collect batch sizes must be greater than 0".into(),
            ));
        }

        if self.collect.max_concurrent_batches == 0 {
            return Err(ConfigError::Message(
                "collect.max_concurrent_batches must be greater than 0".into(),
            ));
        }

        if self.collect.modes.is_empty() && self.collect.line_ids.is_empty() {
            return Err(ConfigError::Message(
                "either collect.modes or collect.line_ids must be set".into(),
            ));
        }

        if self.collect.run_deadline_secs == 0
            || self.collect.run_deadline_secs > MAX_RUN_DEADLINE_SECS
        {
            return Err(ConfigError::Message(format!(
                "collect.run_deadline_secs must be between 1 and {MAX_RUN_DEADLINE_SECS}"
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "retry.max_attempts must be greater than 0".into(),
            ));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Message(
                "retry.max_delay_ms must not be below retry.base_delay_ms".into(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "https://api.tfl.gov.uk".to_string(),
                app_key: None,
                timeout_secs: 30,
                requests_per_second: 4,
            },
            collect: CollectConfig {
                modes: ["tube", "dlr", "overground", "elizabeth-line", "tram"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                line_ids: Vec::new(),
                status_batch_size: 20,
                arrivals_batch_size: 1,
                max_concurrent_batches: 4,
                run_deadline_secs: 600,
            },
            retry: RetryConfig {
                max_attempts: 6,
                base_delay_ms: 1500,
                max_delay_ms: 60_000,
                jitter_ms: 500,
                seed: None,
            },
            output: OutputConfig {
                status_dir: PathBuf::from("data/snapshots"),
                arrivals_dir: PathBuf::from("data/arrivals"),
                partition_by_day: false,
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
                log_format: LogFormat::Pretty,
                metrics_enabled: false,
                metrics_port: 9090,
            },
        }
    }
}
