//! Configuration loader and validator for the channel scanner.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::delivery::DeliverySettings;
use crate::update::CycleSettings;

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
    pub telegram: Telegram,
    pub scan: Scan,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Queue poll interval while it is empty.
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// Users allowed to ban and unban destinations.
    #[serde(default)]
    pub admin_ids: Vec<i64>,
}

/// Scan cycle settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scan {
    /// Crontab (5 fields, or 6 with seconds), evaluated in UTC.
    pub cron: String,
    pub request_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub accept_language: String,
    /// Items older than this are never delivered.
    pub page_window_days: u32,
    /// Stored ids younger than this count as already seen.
    pub lookback_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delivery {
    pub batch_delay_secs: u64,
    pub message_delay_ms: u64,
    pub error_delay_secs: u64,
    pub attempt_count: u32,
    #[serde(default)]
    pub dry_run: bool,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` when set, otherwise a file in `app.data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/tube-scanner.db", self.app.data_dir))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.scan.request_timeout_secs)
    }

    pub fn cycle_settings(&self) -> CycleSettings {
        CycleSettings {
            request_delay: Duration::from_millis(self.scan.request_delay_ms),
            page_window: chrono::Duration::days(self.scan.page_window_days.into()),
            lookback: chrono::Duration::days(self.scan.lookback_days.into()),
        }
    }

    pub fn delivery_settings(&self) -> DeliverySettings {
        DeliverySettings {
            attempt_count: self.delivery.attempt_count,
            throttle_fallback: Duration::from_secs(self.delivery.error_delay_secs),
            error_delay: Duration::from_secs(self.delivery.error_delay_secs),
            message_delay: Duration::from_millis(self.delivery.message_delay_ms),
            batch_delay: Duration::from_secs(self.delivery.batch_delay_secs),
            poll_interval: Duration::from_millis(self.app.poll_interval_ms),
        }
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
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }

    let fields = cfg.scan.cron.split_whitespace().count();
    if fields != 5 && fields != 6 {
        return Err(ConfigError::Invalid("scan.cron must have 5 or 6 fields"));
    }
    if cfg.scan.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("scan.request_timeout_secs must be > 0"));
    }
    if cfg.scan.page_window_days == 0 {
        return Err(ConfigError::Invalid("scan.page_window_days must be > 0"));
    }
    if cfg.scan.page_window_days >= cfg.scan.lookback_days {
        return Err(ConfigError::Invalid(
            "scan.page_window_days must be shorter than scan.lookback_days",
        ));
    }

    if cfg.delivery.attempt_count == 0 {
        return Err(ConfigError::Invalid("delivery.attempt_count must be > 0"));
    }

    Ok(())
}

/// Example configuration with the default timings.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 1000

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  admin_ids:
    - 123456789

scan:
  cron: "*/30 * * * *"
  request_delay_ms: 1000
  request_timeout_secs: 30
  accept_language: "en-US,en;q=0.9"
  page_window_days: 2
  lookback_days: 30

delivery:
  batch_delay_secs: 300
  message_delay_ms: 1000
  error_delay_secs: 65
  attempt_count: 3
  dry_run: false
"#
}
