//! Error taxonomy shared across the workspace.

use std::time::Duration;

pub type Result<T> = std::result::Result<T, NetStashError>;

/// Protocol stage a timeout or failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    Connect,
    Username,
    Password,
    Enable,
    Prompt,
    Drain,
}

impl std::fmt::Display for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStage::Connect => write!(f, "connect"),
            SessionStage::Username => write!(f, "username"),
            SessionStage::Password => write!(f, "password"),
            SessionStage::Enable => write!(f, "enable"),
            SessionStage::Prompt => write!(f, "prompt"),
            SessionStage::Drain => write!(f, "drain"),
        }
    }
}

/// All NetStash errors. The first four variants are per-device failures:
/// they are caught at the device-iteration boundary and become log lines,
/// never job failures. The rest are orchestration-side.
#[derive(Debug, thiserror::Error)]
pub enum NetStashError {
    #[error("authentication failed on {host}: {reason}")]
    Authentication { host: String, reason: String },

    #[error("timeout on {host} during {stage} stage after {timeout:?}")]
    Timeout {
        host: String,
        stage: SessionStage,
        timeout: Duration,
    },

    #[error("protocol error on {host}: {reason}")]
    Protocol { host: String, reason: String },

    #[error("persistence error for {path}: {reason}")]
    Persistence { path: String, reason: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NetStashError {
    /// True for failures that belong to a single device attempt, which the
    /// run loop logs and skips past instead of failing the whole job.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            NetStashError::Authentication { .. }
                | NetStashError::Timeout { .. }
                | NetStashError::Protocol { .. }
                | NetStashError::Persistence { .. }
        )
    }
}
