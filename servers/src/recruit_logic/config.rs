use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use lib_recruit::ingestors::happenings_sse::DEFAULT_HAPPENINGS_URL;
use lib_recruit::retrieve::ns_http::DEFAULT_API_URL;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Recruitment feed server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "RECRUIT_PORT", help = "Port to listen on for HTTP requests.")]
    pub port: Option<u16>,

    #[clap(long, env = "RECRUIT_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RECRUIT_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RECRUIT_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "RECRUIT_OPERATOR", help = "Nation running this instance; sent in the User-Agent.")]
    pub operator: Option<String>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL connection URL. Without it state is kept in memory only.")]
    pub database_url: Option<String>,

    #[clap(long, env = "RECRUIT_API_URL", help = "API endpoint for shard lookups.")]
    pub api_url: Option<String>,

    #[clap(long, env = "RECRUIT_HAPPENINGS_URL", help = "Server-sent happenings feed URL.")]
    pub happenings_url: Option<String>,

    #[clap(long, env = "RECRUIT_PERIOD_MAX", help = "Maximum API requests inside one rate-limit window.")]
    pub period_max: Option<usize>,

    #[clap(long, env = "RECRUIT_POLLING_RATE_SECONDS", help = "Seconds between newnationdetails polls.")]
    pub polling_rate_seconds: Option<u64>,

    #[clap(long, env = "RECRUIT_POLL_RETRY_SECONDS", help = "Seconds to wait after a failed poll.")]
    pub poll_retry_seconds: Option<u64>,

    #[clap(long, env = "RECRUIT_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for stream reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "RECRUIT_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for stream reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "RECRUIT_IDLE_TIMEOUT_SECONDS", help = "Seconds of stream silence before reconnecting.")]
    pub idle_timeout_seconds: Option<u64>,

    #[clap(long, env = "RECRUIT_QUEUE_RETENTION_SECONDS", help = "Seconds a queued nation stays eligible.")]
    pub queue_retention_seconds: Option<u64>,

    #[clap(long, env = "RECRUIT_MONITOR_INTERVAL_SECONDS", help = "Seconds between queue monitor reports.")]
    pub monitor_interval_seconds: Option<u64>,

    #[clap(long, env = "RECRUIT_HOME_REGIONS", value_delimiter = ',', help = "Regions never recruited from (comma separated).")]
    pub home_regions: Option<Vec<String>>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            operator: other.operator.or(self.operator),
            database_url: other.database_url.or(self.database_url),
            api_url: other.api_url.or(self.api_url),
            happenings_url: other.happenings_url.or(self.happenings_url),
            period_max: other.period_max.or(self.period_max),
            polling_rate_seconds: other.polling_rate_seconds.or(self.polling_rate_seconds),
            poll_retry_seconds: other.poll_retry_seconds.or(self.poll_retry_seconds),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            idle_timeout_seconds: other.idle_timeout_seconds.or(self.idle_timeout_seconds),
            queue_retention_seconds: other.queue_retention_seconds.or(self.queue_retention_seconds),
            monitor_interval_seconds: other.monitor_interval_seconds.or(self.monitor_interval_seconds),
            home_regions: other.home_regions.or(self.home_regions),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(9010),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            api_url: Some(DEFAULT_API_URL.to_string()),
            happenings_url: Some(DEFAULT_HAPPENINGS_URL.to_string()),
            period_max: Some(45),
            polling_rate_seconds: Some(60),
            poll_retry_seconds: Some(60),
            reconnect_base_delay_ms: Some(1000),
            reconnect_max_delay_ms: Some(60000),
            idle_timeout_seconds: Some(120),
            queue_retention_seconds: Some(3600),
            monitor_interval_seconds: Some(60),
            ..Default::default()
        }
    }

    /// Fills every setting, failing on a missing operator or a bad URL.
    pub fn resolve(self) -> Result<Settings> {
        let defaults = Config::defaults();
        let c = defaults.merge(self);

        let operator = c
            .operator
            .filter(|o| !o.trim().is_empty())
            .context("An operator nation is required (--operator or RECRUIT_OPERATOR)")?;
        let api_url = parse_url(c.api_url.as_deref(), DEFAULT_API_URL)?;
        let happenings_url = parse_url(c.happenings_url.as_deref(), DEFAULT_HAPPENINGS_URL)?;

        Ok(Settings {
            port: c.port.unwrap_or(9010),
            log_dir: c.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: c.log_level.unwrap_or_else(|| "info".to_string()),
            operator,
            database_url: c.database_url.filter(|u| !u.trim().is_empty()),
            api_url,
            happenings_url,
            period_max: c.period_max.unwrap_or(45),
            polling_rate: Duration::from_secs(c.polling_rate_seconds.unwrap_or(60).max(1)),
            poll_retry: Duration::from_secs(c.poll_retry_seconds.unwrap_or(60).max(1)),
            reconnect_base_delay: Duration::from_millis(c.reconnect_base_delay_ms.unwrap_or(1000).max(100)),
            reconnect_max_delay: Duration::from_millis(c.reconnect_max_delay_ms.unwrap_or(60000).max(100)),
            idle_timeout: Duration::from_secs(c.idle_timeout_seconds.unwrap_or(120)),
            queue_retention: Duration::from_secs(c.queue_retention_seconds.unwrap_or(3600)),
            monitor_interval: Duration::from_secs(c.monitor_interval_seconds.unwrap_or(60).max(1)),
            home_regions: c.home_regions.unwrap_or_default(),
        })
    }
}

/// Fully resolved settings the server runs with.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub operator: String,
    pub database_url: Option<String>,
    pub api_url: Url,
    pub happenings_url: Url,
    pub period_max: usize,
    pub polling_rate: Duration,
    pub poll_retry: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub idle_timeout: Duration,
    pub queue_retention: Duration,
    pub monitor_interval: Duration,
    pub home_regions: Vec<String>,
}

fn parse_url(value: Option<&str>, fallback: &str) -> Result<Url> {
    let raw = value.unwrap_or(fallback);
    Url::parse(raw).with_context(|| format!("Invalid URL: {}", raw))
}

/// Layers the JSON config file over the defaults-free CLI view: file first,
/// then CLI arguments and environment variables on top.
pub fn load_config() -> Config {
    let cli_args = Config::parse();
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_recruit.conf"));

    read_config_file(&config_file_path).merge(cli_args)
}

fn read_config_file(path: &Path) -> Config {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return Config::default();
    }

    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => file_config,
            Err(e) => {
                log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                Config::default()
            }
        },
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            Config::default()
        }
    }
}
