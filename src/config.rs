//! Configuration loading and management
//!
//! Handles parsing of `.taskpool.toml` configuration files.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleOptions, Role};
use crate::lock::DEFAULT_LOCK_TIMEOUT_MS;
use crate::storage::CONFIG_FILE;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Actor configuration
    #[serde(default)]
    pub actor: ActorConfig,

    /// Pool store cache configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// View synchronization configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Lifecycle rules
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Reward limits
    #[serde(default)]
    pub rewards: RewardsConfig,
}

/// Actor-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Role used for actions either party may take
    #[serde(default = "default_role")]
    pub default: String,
}

fn default_role() -> String {
    "parent".to_string()
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            default: default_role(),
        }
    }
}

impl ActorConfig {
    pub fn role(&self) -> Result<Role> {
        match self.default.trim() {
            "parent" => Ok(Role::Parent),
            "child" => Ok(Role::Child),
            other => Err(Error::InvalidConfig(format!(
                "actor.default: invalid role '{other}' (expected parent|child)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Cached scopes older than this are refetched on read
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,

    /// Bounded wait for a mutation acknowledgement before rolling back
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,

    /// How long the local service waits for the pool file lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_stale_after_ms() -> u64 {
    30_000
}

fn default_confirm_timeout_ms() -> u64 {
    10_000
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: default_stale_after_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Prefetch other dependents' scopes after a focus switch
    #[serde(default = "default_true")]
    pub prefetch_on_focus: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            prefetch_on_focus: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Allow the system `miss` transition once a due date passes
    #[serde(default)]
    pub enforce_due_dates: bool,
}

impl LifecycleConfig {
    pub fn options(&self) -> LifecycleOptions {
        LifecycleOptions {
            enforce_due_dates: self.enforce_due_dates,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardsConfig {
    /// Upper bound for template and per-assignment rewards
    #[serde(default = "default_max_reward_coins")]
    pub max_reward_coins: u32,
}

fn default_max_reward_coins() -> u32 {
    10_000
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            max_reward_coins: default_max_reward_coins(),
        }
    }
}

impl Config {
    /// Load configuration from a `.taskpool.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the pool root, or return defaults when absent
    pub fn load_from_root(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        self.actor.role()?;
        if self.store.stale_after_ms == 0 {
            return Err(Error::InvalidConfig(
                "store.stale_after_ms must be > 0".to_string(),
            ));
        }
        if self.store.confirm_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "store.confirm_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.store.lock_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "store.lock_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.rewards.max_reward_coins == 0 {
            return Err(Error::InvalidConfig(
                "rewards.max_reward_coins must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
