//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/printwatch/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/printwatch/` (~/.config/printwatch/)
//! - State: `$XDG_STATE_HOME/printwatch/` (~/.local/state/printwatch/)
//!   holds the log file, the pending queue and the tail offsets.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where PaperCut Print Logger writes its daily CSV files on a stock install.
pub const DEFAULT_LOG_DIR: &str = r"C:\Program Files (x86)\PaperCut Print Logger\logs\csv\daily";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Sector/department label attached to every event
    #[serde(default)]
    pub sector: String,

    /// Company id attached to every event
    #[serde(default)]
    pub company_id: i64,

    /// Directory holding `papercut-print-log-YYYY-MM-DD.csv` files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Collector base URL; endpoints are appended to it
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Seconds between ticks
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,

    /// HTTP delivery settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Pending queue and tail offset locations
    #[serde(default)]
    pub state: StateConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sector: String::new(),
            company_id: 0,
            log_dir: default_log_dir(),
            api_base_url: default_api_base_url(),
            polling_interval_secs: default_polling_interval(),
            delivery: DeliveryConfig::default(),
            state: StateConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIR)
}

fn default_api_base_url() -> String {
    "http://localhost:3005".to_string()
}

fn default_polling_interval() -> u64 {
    10
}

/// Timeouts for the verify and send calls
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// Timeout for the verify call in seconds
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,

    /// Timeout for the send call in seconds
    #[serde(default = "default_send_timeout")]
    pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            verify_timeout_secs: default_verify_timeout(),
            timeout_secs: default_send_timeout(),
        }
    }
}

fn default_verify_timeout() -> u64 {
    15
}

fn default_send_timeout() -> u64 {
    30
}

/// Locations of durable agent state
#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    /// Override for the pending queue directory
    pub pending_dir: Option<PathBuf>,

    /// Keep tail offsets across restarts
    #[serde(default = "default_persist_offsets")]
    pub persist_offsets: bool,

    /// Override for the tail offsets file
    pub offsets_file: Option<PathBuf>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            pending_dir: None,
            persist_offsets: default_persist_offsets(),
            offsets_file: None,
        }
    }
}

fn default_persist_offsets() -> bool {
    true
}

impl StateConfig {
    /// Effective pending queue directory
    pub fn pending_dir(&self) -> PathBuf {
        self.pending_dir
            .clone()
            .unwrap_or_else(|| Config::state_dir().join("pending"))
    }

    /// Effective offsets file, or `None` when offsets live only in memory
    pub fn offsets_file(&self) -> Option<PathBuf> {
        if !self.persist_offsets {
            return None;
        }
        Some(
            self.offsets_file
                .clone()
                .unwrap_or_else(|| Config::state_dir().join("offsets.json")),
        )
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,

    /// Mirror log output to stderr
    #[serde(default)]
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
            console: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    ///
    /// Unlike optional tooling config, the agent cannot run without one:
    /// a missing file is an error.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Replace empty or zero values with their defaults.
    ///
    /// Returns the keys that were replaced so the caller can log them once
    /// logging is up.
    pub fn apply_defaults(&mut self) -> Vec<&'static str> {
        let mut replaced = Vec::new();

        if self.log_dir.as_os_str().is_empty() {
            self.log_dir = default_log_dir();
            replaced.push("log_dir");
        }
        if self.api_base_url.trim().is_empty() {
            self.api_base_url = default_api_base_url();
            replaced.push("api_base_url");
        }
        if self.polling_interval_secs == 0 {
            self.polling_interval_secs = default_polling_interval();
            replaced.push("polling_interval_secs");
        }
        if self.delivery.verify_timeout_secs == 0 {
            self.delivery.verify_timeout_secs = default_verify_timeout();
            replaced.push("delivery.verify_timeout_secs");
        }
        if self.delivery.timeout_secs == 0 {
            self.delivery.timeout_secs = default_send_timeout();
            replaced.push("delivery.timeout_secs");
        }
        if self.logging.max_files == 0 {
            self.logging.max_files = default_max_log_files();
            replaced.push("logging.max_files");
        }

        replaced
    }

    /// Interval between ticks
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/printwatch/config.toml` (~/.config/printwatch/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("printwatch").join("config.toml")
    }

    /// Returns the state directory path (logs, pending queue, offsets)
    ///
    /// `$XDG_STATE_HOME/printwatch/` (~/.local/state/printwatch/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("printwatch")
    }

    /// Returns the agent's own log file for `day`
    ///
    /// `$XDG_STATE_HOME/printwatch/printwatch.YYYY-MM-DD.log` (rotated daily)
    pub fn log_path(day: chrono::NaiveDate) -> PathBuf {
        Self::state_dir().join(format!("printwatch.{}.log", day.format("%Y-%m-%d")))
    }

    /// Ensure XDG base directory environment variables are set.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_base_url, "http://localhost:3005");
        assert_eq!(config.polling_interval_secs, 10);
        assert_eq!(config.delivery.verify_timeout_secs, 15);
        assert_eq!(config.delivery.timeout_secs, 30);
        assert!(config.state.persist_offsets);
        assert_eq!(config.log_dir, PathBuf::from(DEFAULT_LOG_DIR));
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
sector = "Finance"
company_id = 7
log_dir = "/srv/papercut/daily"
api_base_url = "https://collector.example.com"
polling_interval_secs = 30

[delivery]
verify_timeout_secs = 5

[state]
pending_dir = "/var/lib/printwatch/pending"
persist_offsets = false

[logging]
level = "debug"
console = true
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.sector, "Finance");
        assert_eq!(config.company_id, 7);
        assert_eq!(config.log_dir, PathBuf::from("/srv/papercut/daily"));
        assert_eq!(config.polling_interval(), Duration::from_secs(30));
        assert_eq!(config.delivery.verify_timeout_secs, 5);
        assert_eq!(config.delivery.timeout_secs, 30);
        assert_eq!(
            config.state.pending_dir(),
            PathBuf::from("/var/lib/printwatch/pending")
        );
        assert!(config.state.offsets_file().is_none());
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.console);
    }

    #[test]
    fn test_apply_defaults_replaces_zero_and_empty() {
        let toml = r#"
log_dir = ""
api_base_url = "  "
polling_interval_secs = 0
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        let replaced = config.apply_defaults();

        assert_eq!(
            replaced,
            vec!["log_dir", "api_base_url", "polling_interval_secs"]
        );
        assert_eq!(config.log_dir, PathBuf::from(DEFAULT_LOG_DIR));
        assert_eq!(config.api_base_url, "http://localhost:3005");
        assert_eq!(config.polling_interval_secs, 10);
    }

    #[test]
    fn test_apply_defaults_keeps_explicit_values() {
        let mut config = Config::default();
        assert!(config.apply_defaults().is_empty());
    }

    #[test]
    fn test_missing_config_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Config::load_from(&dir.path().join("config.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_offsets_file_defaults_under_state_dir() {
        let state = StateConfig::default();
        let file = state.offsets_file().unwrap();
        assert!(file.ends_with("printwatch/offsets.json"));
    }
}
