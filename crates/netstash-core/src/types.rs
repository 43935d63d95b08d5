//! Data model: devices, run targets, jobs, backups, schedules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport used to reach a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Ssh,
    Telnet,
}

impl Protocol {
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Ssh => 22,
            Protocol::Telnet => 23,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Ssh => write!(f, "SSH"),
            Protocol::Telnet => write!(f, "Telnet"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ssh" => Ok(Protocol::Ssh),
            "telnet" => Ok(Protocol::Telnet),
            other => Err(format!("unknown protocol '{other}' (expected SSH or Telnet)")),
        }
    }
}

/// A managed network device, owned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub hostname: String,
    pub address: String,
    /// Free-form vendor string; the resolver matches on substrings.
    pub vendor: String,
    pub protocol: Protocol,
    pub port: u16,
    pub tags: Vec<String>,
    pub enabled: bool,
}

/// Point-in-time snapshot of one device's connection fields, taken before a
/// run starts so in-flight edits to the Device record cannot corrupt the run.
/// Credentials are deliberately absent; they are fetched just-in-time per
/// connection attempt.
#[derive(Debug, Clone)]
pub struct RunTarget {
    pub device_id: i64,
    pub hostname: String,
    pub address: String,
    pub vendor: String,
    pub protocol: Protocol,
    pub port: u16,
}

impl From<&Device> for RunTarget {
    fn from(d: &Device) -> Self {
        Self {
            device_id: d.id,
            hostname: d.hostname.clone(),
            address: d.address.clone(),
            vendor: d.vendor.clone(),
            protocol: d.protocol,
            port: d.port,
        }
    }
}

/// Pre-decrypted login material, supplied by the registry at connect time.
/// Debug is hand-written so no log macro can leak the secrets.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub enable_secret: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field(
                "enable_secret",
                &self.enable_secret.as_ref().map(|_| "***"),
            )
            .finish()
    }
}

/// Lifecycle of one backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Success => write!(f, "success"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// One backup run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    /// "manual" or "schedule:<name>".
    pub triggered_by: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Devices attempted (success or failure).
    pub devices: u32,
    /// Append-only chronological transcript.
    pub log: String,
}

/// One stored configuration artifact. Never mutated; may outlive its device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub id: i64,
    pub device_id: i64,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
    pub fingerprint: String,
    pub path: String,
}

/// How a schedule selects its devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetMode {
    All,
    Tag,
    Device,
}

impl std::fmt::Display for TargetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetMode::All => write!(f, "All"),
            TargetMode::Tag => write!(f, "Tag"),
            TargetMode::Device => write!(f, "Device"),
        }
    }
}

impl std::str::FromStr for TargetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(TargetMode::All),
            "tag" => Ok(TargetMode::Tag),
            "device" => Ok(TargetMode::Device),
            other => Err(format!("unknown target mode '{other}' (expected All, Tag, or Device)")),
        }
    }
}

/// Recurring backup definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    pub interval_days: u32,
    /// Time-of-day anchor, "HH:MM", interpreted in UTC.
    pub run_at: String,
    pub target_mode: TargetMode,
    pub target_tags: Vec<String>,
    pub target_device: Option<i64>,
    /// Consumed only by the retention CLI, never by the run pipeline.
    pub retention: u32,
    pub notify_on_fail: bool,
    pub enabled: bool,
}

/// Case-insensitive intersection test between two tag sets.
pub fn tags_intersect(a: &[String], b: &[String]) -> bool {
    a.iter().any(|x| {
        b.iter()
            .any(|y| x.trim().eq_ignore_ascii_case(y.trim()) && !x.trim().is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse() {
        assert_eq!("ssh".parse::<Protocol>().unwrap(), Protocol::Ssh);
        assert_eq!("Telnet".parse::<Protocol>().unwrap(), Protocol::Telnet);
        assert!("serial".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_run_target_snapshot() {
        let d = Device {
            id: 7,
            hostname: "core-sw1".into(),
            address: "10.0.0.1".into(),
            vendor: "Cisco (IOS Router/Switch)".into(),
            protocol: Protocol::Ssh,
            port: 22,
            tags: vec!["core".into()],
            enabled: true,
        };
        let t = RunTarget::from(&d);
        assert_eq!(t.device_id, 7);
        assert_eq!(t.hostname, "core-sw1");
        assert_eq!(t.protocol, Protocol::Ssh);
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let c = Credentials {
            username: "admin".into(),
            password: "hunter2".into(),
            enable_secret: Some("topsecret".into()),
        };
        let dbg = format!("{c:?}");
        assert!(dbg.contains("admin"));
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains("topsecret"));
    }

    #[test]
    fn test_tags_intersect_case_insensitive() {
        let device = vec!["core".to_string(), "edge".to_string()];
        let schedule = vec!["EDGE".to_string()];
        assert!(tags_intersect(&device, &schedule));
    }

    #[test]
    fn test_empty_tags_never_intersect() {
        let device: Vec<String> = vec![];
        let schedule = vec!["edge".to_string()];
        assert!(!tags_intersect(&device, &schedule));
        // blank entries do not count as a match either
        let blank = vec!["".to_string()];
        assert!(!tags_intersect(&blank, &vec!["".to_string()]));
    }
}
