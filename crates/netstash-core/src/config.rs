//! NetStash configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetStashConfig {
    #[serde(default = "default_backup_root")]
    pub backup_root: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_backup_root() -> String { "./backups".into() }
fn default_db_path() -> String { "~/.netstash/netstash.db".into() }

impl Default for NetStashConfig {
    fn default() -> Self {
        Self {
            backup_root: default_backup_root(),
            db_path: default_db_path(),
            session: SessionConfig::default(),
            normalizer: NormalizerConfig::default(),
            runner: RunnerConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl NetStashConfig {
    /// Load config from the default path (~/.netstash/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::NetStashError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::NetStashError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::NetStashError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".netstash")
            .join("config.toml")
    }

    /// Get the NetStash home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".netstash")
    }
}

/// Login/prompt state machine timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// TCP/SSH connect bound.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Per-stage bound on prompt marker detection.
    #[serde(default = "default_prompt_timeout")]
    pub prompt_timeout_secs: u64,
    /// Pause after sending a credential — embedded NOSes redraw slowly.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_connect_timeout() -> u64 { 10 }
fn default_prompt_timeout() -> u64 { 12 }
fn default_settle_ms() -> u64 { 1500 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            prompt_timeout_secs: default_prompt_timeout(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Output draining and post-processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Response is complete after two consecutive idle windows of this length.
    #[serde(default = "default_idle_window")]
    pub idle_window_secs: u64,
    /// Overall bound on one command's drain, paging included.
    #[serde(default = "default_drain_deadline")]
    pub drain_deadline_secs: u64,
    /// A trailing line ending in a prompt character shorter than this is
    /// treated as a bare prompt and dropped.
    #[serde(default = "default_prompt_line_max")]
    pub prompt_line_max: usize,
}

fn default_idle_window() -> u64 { 2 }
fn default_drain_deadline() -> u64 { 180 }
fn default_prompt_line_max() -> usize { 16 }

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            idle_window_secs: default_idle_window(),
            drain_deadline_secs: default_drain_deadline(),
            prompt_line_max: default_prompt_line_max(),
        }
    }
}

impl NormalizerConfig {
    pub fn idle_window(&self) -> Duration {
        Duration::from_secs(self.idle_window_secs)
    }
    pub fn drain_deadline(&self) -> Duration {
        Duration::from_secs(self.drain_deadline_secs)
    }
}

/// Inter-device rate limiting inside one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_success_delay")]
    pub success_delay_secs: u64,
    #[serde(default = "default_failure_delay")]
    pub failure_delay_secs: u64,
}

fn default_success_delay() -> u64 { 3 }
fn default_failure_delay() -> u64 { 2 }

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            success_delay_secs: default_success_delay(),
            failure_delay_secs: default_failure_delay(),
        }
    }
}

impl RunnerConfig {
    pub fn success_delay(&self) -> Duration {
        Duration::from_secs(self.success_delay_secs)
    }
    pub fn failure_delay(&self) -> Duration {
        Duration::from_secs(self.failure_delay_secs)
    }
}

/// Recurring trigger check cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick")]
    pub tick_secs: u64,
}

fn default_tick() -> u64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_secs: default_tick() }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}
