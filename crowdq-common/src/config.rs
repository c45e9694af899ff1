//! Configuration loading and config file resolution
//!
//! Config file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`CROWDQ_CONFIG`)
//! 3. Platform config file (`<config dir>/crowdq/config.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing file never terminates startup: the service logs a warning and
//! runs on compiled defaults. A file that exists but does not parse is an
//! error.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::model::AccountLevel;
use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CROWDQ_CONFIG";

/// Complete service configuration as read from `config.toml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    #[serde(default)]
    pub voting: VotingConfig,

    #[serde(default)]
    pub broadcast: BroadcastConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Accounts created at startup (demo and test deployments)
    #[serde(default)]
    pub accounts: Vec<SeedAccount>,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Session lifecycle policy
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Allow callers without an account to create sessions
    #[serde(default)]
    pub allow_anonymous_create: bool,

    /// Voter capacity of sessions created by FREE-level accounts (0 = unlimited)
    #[serde(default = "default_free_account_max_voters")]
    pub free_account_max_voters: usize,

    /// ACTIVE sessions idle for longer than this are ended by the reaper
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// ENDED sessions stay readable for this long, then resolve as NotFound
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

/// Voting power policy
#[derive(Debug, Clone, Deserialize)]
pub struct VotingConfig {
    /// Bonus votes a PRIVILEGED account starts with
    #[serde(default = "default_privileged_bonus_votes")]
    pub privileged_bonus_votes: u32,

    /// Non-admin voters idle for longer than this stop counting as voters
    #[serde(default = "default_voter_idle_timeout_secs")]
    pub voter_idle_timeout_secs: u64,
}

/// Snapshot fan-out configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Snapshots buffered per session before slow subscribers start lagging
    #[serde(default = "default_broadcast_capacity")]
    pub capacity: usize,
}

/// Bearer token policy
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Account and voter tokens unused for longer than this stop resolving
    #[serde(default = "default_token_idle_timeout_secs")]
    pub token_idle_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Account seeded into the in-memory directory at startup
#[derive(Debug, Clone, Deserialize)]
pub struct SeedAccount {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub level: AccountLevel,
    /// Overrides `voting.privileged_bonus_votes` for this account
    #[serde(default)]
    pub bonus_votes: Option<u32>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5760
}

fn default_free_account_max_voters() -> usize {
    50
}

fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

fn default_retention_secs() -> u64 {
    5 * 60
}

fn default_reaper_interval_secs() -> u64 {
    10
}

fn default_privileged_bonus_votes() -> u32 {
    1
}

fn default_voter_idle_timeout_secs() -> u64 {
    15 * 60
}

fn default_broadcast_capacity() -> usize {
    100
}

fn default_token_idle_timeout_secs() -> u64 {
    2 * 60 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            allow_anonymous_create: false,
            free_account_max_voters: default_free_account_max_voters(),
            idle_timeout_secs: default_idle_timeout_secs(),
            retention_secs: default_retention_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            privileged_bonus_votes: default_privileged_bonus_votes(),
            voter_idle_timeout_secs: default_voter_idle_timeout_secs(),
        }
    }
}

impl VotingConfig {
    pub fn voter_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.voter_idle_timeout_secs)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            capacity: default_broadcast_capacity(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_idle_timeout_secs: default_token_idle_timeout_secs(),
        }
    }
}

impl AuthConfig {
    pub fn token_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.token_idle_timeout_secs)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TomlConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.broadcast.capacity == 0 {
            return Err(Error::Config("broadcast.capacity must be at least 1".to_string()));
        }
        if self.auth.token_idle_timeout_secs == 0 {
            return Err(Error::Config(
                "auth.token_idle_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.sessions.reaper_interval_secs == 0 {
            return Err(Error::Config(
                "sessions.reaper_interval_secs must be at least 1".to_string(),
            ));
        }
        for account in &self.accounts {
            if account.email.trim().is_empty() {
                return Err(Error::Config("seed account with empty email".to_string()));
            }
        }
        Ok(())
    }
}

/// Resolve which config file to read, if any
///
/// Returns None when neither an explicit path nor the platform file exists;
/// the caller then runs on compiled defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config file
    default_config_path().filter(|path| path.exists())
}

/// Platform config file location (`~/.config/crowdq/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("crowdq").join("config.toml"))
}

/// Load configuration with graceful degradation
///
/// A resolved path that does not exist logs a warning and falls back to
/// compiled defaults. Parse and validation failures are returned.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    // Priority 4: Compiled defaults
    let Some(path) = resolve_config_path(cli_arg) else {
        info!("No config file found, using compiled defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!("Config file {} not found, using compiled defaults", path.display());
        return Ok(TomlConfig::default());
    }

    info!("Loading config from {}", path.display());
    TomlConfig::from_file(&path)
}
