//! Configuration management

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bot identity and command settings
    pub bot: BotConfig,
    /// Protocol bridge settings
    pub bridge: BridgeConfig,
    /// Session credential storage
    pub session: SessionConfig,
    /// Reconnection policy
    pub reconnect: ReconnectConfig,
    /// Group metadata cache
    pub cache: CacheConfig,
    /// Rate limiting and command cooldowns
    pub rate_limit: RateLimitConfig,
    /// Periodic background jobs
    pub tasks: TasksConfig,
    /// Persistent store
    pub persistence: PersistenceConfig,
    /// Shutdown behaviour
    pub shutdown: ShutdownConfig,
    /// Crash-loop detection
    pub errors: ErrorTrackingConfig,
}

/// Bot identity and command settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Display name used in notifications
    pub name: String,
    /// Command prefix
    pub prefix: String,
    /// Phone number of the bot owner (number part only)
    pub owner_number: Option<String>,
    /// Send a status message to the bot's own chat after connecting
    pub notify_on_connect: bool,
    /// Users granted the premium level
    pub premium_users: Vec<String>,
}

/// Protocol bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Address of the protocol client sidecar
    pub address: String,
    /// Timeout for a single bridge request in milliseconds
    pub request_timeout_ms: u64,
}

/// Session credential storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding credential material
    pub directory: PathBuf,
}

/// Reconnection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Base backoff delay in milliseconds
    pub base_delay_ms: u64,
    /// Cap on the exponential term in milliseconds
    pub max_delay_ms: u64,
    /// Upper bound (exclusive) of random jitter in milliseconds
    pub jitter_ms: u64,
    /// Reconnect attempts before giving up
    pub max_retries: u32,
}

/// Group metadata cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Metadata TTL in seconds
    pub group_metadata_ttl_seconds: u64,
    /// Expired-entry sweep interval in seconds
    pub sweep_interval_seconds: u64,
}

/// Rate limiting and command cooldowns
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Minimum spacing between two actions of the same user in milliseconds
    pub global_interval_ms: u64,
    /// Age after which entries are dropped by the sweep, in seconds
    pub max_age_seconds: u64,
    /// Sweep interval in seconds
    pub sweep_interval_seconds: u64,
    /// Cooldown for commands missing from `cooldowns`, in seconds
    pub default_cooldown_seconds: u64,
    /// Per-command cooldowns in seconds
    pub cooldowns: HashMap<String, u64>,
}

/// Periodic background jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Presence keep-alive interval in seconds
    pub presence_interval_seconds: u64,
    /// Expired temp-ban sweep interval in seconds
    pub temp_ban_sweep_interval_seconds: u64,
    /// Lower bound of the pause between moderation actions in milliseconds
    pub action_delay_min_ms: u64,
    /// Upper bound of the pause between moderation actions in milliseconds
    pub action_delay_max_ms: u64,
    /// Delay before the startup notification in milliseconds
    pub startup_notification_delay_ms: u64,
}

/// Persistent store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// JSON file backing the store
    pub path: PathBuf,
    /// Bound on a single read issued from the message path, in milliseconds
    pub timeout_ms: u64,
}

/// Shutdown behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Grace period given to in-flight work after a termination signal
    pub grace_period_seconds: u64,
}

/// Crash-loop detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorTrackingConfig {
    /// Sliding window in seconds
    pub window_seconds: u64,
    /// Errors tolerated inside one window
    pub threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot: BotConfig::default(),
            bridge: BridgeConfig::default(),
            session: SessionConfig::default(),
            reconnect: ReconnectConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            tasks: TasksConfig::default(),
            persistence: PersistenceConfig::default(),
            shutdown: ShutdownConfig::default(),
            errors: ErrorTrackingConfig::default(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "RaveHub Bot".to_string(),
            prefix: ".".to_string(),
            owner_number: None,
            notify_on_connect: true,
            premium_users: Vec::new(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7000".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("auth_info"),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 30_000,
            jitter_ms: 2_000,
            max_retries: 15,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            group_metadata_ttl_seconds: 300,
            sweep_interval_seconds: 120,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let cooldowns = [
            ("ping", 2),
            ("me", 3),
            ("info", 3),
            ("shop", 3),
            ("deposit", 3),
            ("withdraw", 3),
            ("buy", 5),
            ("slot", 5),
            ("flip", 5),
            ("dice", 5),
            ("coinflip", 5),
            ("rob", 30),
            ("robar", 30),
            ("kick", 5),
            ("warn", 5),
            ("deliver", 3),
            ("reject", 3),
        ]
        .into_iter()
        .map(|(name, secs)| (name.to_string(), secs))
        .collect();

        Self {
            global_interval_ms: 500,
            max_age_seconds: 60,
            sweep_interval_seconds: 60,
            default_cooldown_seconds: 2,
            cooldowns,
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            presence_interval_seconds: 30,
            temp_ban_sweep_interval_seconds: 60,
            action_delay_min_ms: 1_000,
            action_delay_max_ms: 3_000,
            startup_notification_delay_ms: 2_000,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/store.json"),
            timeout_ms: 5_000,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_seconds: 5,
        }
    }
}

impl Default for ErrorTrackingConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            threshold: 10,
        }
    }
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl TasksConfig {
    pub fn presence_interval(&self) -> Duration {
        Duration::from_secs(self.presence_interval_seconds)
    }

    pub fn temp_ban_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.temp_ban_sweep_interval_seconds)
    }

    pub fn startup_notification_delay(&self) -> Duration {
        Duration::from_millis(self.startup_notification_delay_ms)
    }
}

impl PersistenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.bot.prefix.is_empty() {
            return Err(Error::Config("Command prefix cannot be empty".to_string()));
        }

        if self.bridge.address.parse::<SocketAddr>().is_err() {
            return Err(Error::Config(format!(
                "Invalid bridge address '{}'",
                self.bridge.address
            )));
        }

        if self.session.directory.as_os_str().is_empty() {
            return Err(Error::Config("Session directory cannot be empty".to_string()));
        }

        self.validate_reconnect()?;

        let intervals = [
            ("cache.sweep_interval_seconds", self.cache.sweep_interval_seconds),
            ("rate_limit.sweep_interval_seconds", self.rate_limit.sweep_interval_seconds),
            ("tasks.presence_interval_seconds", self.tasks.presence_interval_seconds),
            ("tasks.temp_ban_sweep_interval_seconds", self.tasks.temp_ban_sweep_interval_seconds),
            ("errors.window_seconds", self.errors.window_seconds),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }

        if self.tasks.action_delay_max_ms < self.tasks.action_delay_min_ms {
            return Err(Error::Config(
                "tasks.action_delay_max_ms must not be lower than tasks.action_delay_min_ms".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_reconnect(&self) -> Result<()> {
        let reconnect = &self.reconnect;

        if reconnect.base_delay_ms == 0 {
            return Err(Error::Config("Reconnect base delay must be greater than 0".to_string()));
        }

        if reconnect.max_delay_ms < reconnect.base_delay_ms {
            return Err(Error::Config(format!(
                "Reconnect max delay ({}ms) is lower than base delay ({}ms)",
                reconnect.max_delay_ms, reconnect.base_delay_ms
            )));
        }

        Ok(())
    }
}
