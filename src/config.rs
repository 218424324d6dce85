//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the compiled-in defaults of the bot.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Shared admin password used when none is configured.
pub const DEFAULT_ADMIN_PASSWORD: &str = "1452";

/// Default location of the persisted registry document.
pub const DEFAULT_DATA_FILE: &str = "partituras.json";

/// Default location of the Google service-account key.
pub const DEFAULT_CREDENTIALS_FILE: &str = "credentials.json";

/// Default rehearsal schedule spreadsheet.
pub const DEFAULT_SCHEDULE_URL: &str =
    "https://docs.google.com/spreadsheets/d/1FzS710QDmTO7HGoqWjk6BqTTsY6gHQfAkRBm9i_QxAY/edit";
/// Default QLab projects folder.
pub const DEFAULT_QLAB_URL: &str = "https://disk.yandex.ru/d/E5AOPqehJcxCGQ";
/// Default X32 scenes folder.
pub const DEFAULT_X32_URL: &str = "https://disk.yandex.ru/d/BQS3lXD8BFxIFw";

/// Telegram API retry: initial backoff in milliseconds
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Telegram API retry: maximum backoff in milliseconds
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Telegram API retry: maximum attempts
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    #[serde(alias = "bot_token")]
    pub telegram_token: String,

    /// Public HTTPS address Telegram delivers updates to.
    /// Long polling is used when unset.
    pub webhook_url: Option<String>,
    /// Local socket the webhook listener binds to
    #[serde(default = "default_webhook_bind")]
    pub webhook_bind: String,

    /// Shared password gating the add and delete flows
    #[serde(default = "default_admin_password")]
    pub admin_password: String,

    /// Registry document path
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    /// Service-account key used by the spreadsheet lookup
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,

    /// Rehearsal schedule link shown in the main menu
    #[serde(default = "default_schedule_url")]
    pub schedule_url: String,
    /// QLab projects link shown in the main menu
    #[serde(default = "default_qlab_url")]
    pub qlab_url: String,
    /// X32 scenes link shown in the main menu
    #[serde(default = "default_x32_url")]
    pub x32_url: String,

    /// Upper bound for a single spreadsheet lookup
    #[serde(default = "default_sheets_timeout_secs")]
    pub sheets_timeout_secs: u64,
    /// Idle time after which a user's conversation is forgotten
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

fn default_webhook_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_admin_password() -> String {
    DEFAULT_ADMIN_PASSWORD.to_string()
}

fn default_data_file() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_FILE)
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from(DEFAULT_CREDENTIALS_FILE)
}

fn default_schedule_url() -> String {
    DEFAULT_SCHEDULE_URL.to_string()
}

fn default_qlab_url() -> String {
    DEFAULT_QLAB_URL.to_string()
}

fn default_x32_url() -> String {
    DEFAULT_X32_URL.to_string()
}

const fn default_sheets_timeout_secs() -> u64 {
    15
}

const fn default_session_idle_secs() -> u64 {
    30 * 60
}

/// Static links rendered in the top-level menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuLinks {
    /// Rehearsal schedule
    pub schedule: String,
    /// QLab projects
    pub qlab: String,
    /// X32 scenes
    pub x32: String,
}

impl Default for MenuLinks {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_SCHEDULE_URL.to_string(),
            qlab: DEFAULT_QLAB_URL.to_string(),
            x32: DEFAULT_X32_URL.to_string(),
        }
    }
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use scoredesk::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Links for the top-level menu.
    #[must_use]
    pub fn menu_links(&self) -> MenuLinks {
        MenuLinks {
            schedule: self.schedule_url.clone(),
            qlab: self.qlab_url.clone(),
            x32: self.x32_url.clone(),
        }
    }

    /// Parsed webhook bind address.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if `webhook_bind` is not a socket address.
    pub fn webhook_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.webhook_bind.parse().map_err(|e| {
            ConfigError::Message(format!("invalid webhook_bind '{}': {e}", self.webhook_bind))
        })
    }

    /// Timeout applied to every spreadsheet lookup request.
    #[must_use]
    pub const fn sheets_timeout(&self) -> Duration {
        Duration::from_secs(self.sheets_timeout_secs)
    }

    /// Idle expiry of per-user conversation state.
    #[must_use]
    pub const fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

/// Build the layered configuration source.
///
/// # Errors
///
/// Returns a `ConfigError` if any source fails to load.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        // Start off by merging in the "default" configuration file
        .add_source(File::with_name("config/default").required(false))
        // Add in the current environment file
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Add in a local configuration file
        // This file shouldn't be checked into git
        .add_source(File::with_name("config/local").required(false))
        // Eg.. `APP__DATA_FILE=scores.json ./target/app` would set the `data_file` key
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Plain UPPER_SNAKE_CASE variables, empty ones treated as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}
