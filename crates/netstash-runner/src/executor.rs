//! Per-device backup pipeline: open session, fetch the configuration,
//! fingerprint, persist the artifact, always tear down.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use netstash_core::config::NetStashConfig;
use netstash_core::error::{NetStashError, Result};
use netstash_core::fingerprint::fingerprint;
use netstash_core::types::{Credentials, RunTarget};

/// Opens authenticated device sessions. The production implementation is
/// [`crate::connector::NetworkConnector`]; tests substitute scripted ones.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, target: &RunTarget, creds: &Credentials) -> Result<Box<dyn DeviceSession>>;
}

/// One live session, good for a single configuration fetch.
#[async_trait]
pub trait DeviceSession: Send {
    /// Issue the vendor's config command and return the normalized text.
    async fn fetch_config(&mut self) -> Result<String>;

    /// Graceful exit then socket close. Never errors; called on every
    /// exit path.
    async fn close(&mut self);
}

/// Result of one successful per-device backup.
#[derive(Debug, Clone)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub fingerprint: String,
}

/// Drives one RunTarget end-to-end.
pub struct BackupExecutor {
    connector: std::sync::Arc<dyn Connector>,
    backup_root: PathBuf,
}

impl BackupExecutor {
    pub fn new(connector: std::sync::Arc<dyn Connector>, config: &NetStashConfig) -> Self {
        Self {
            connector,
            backup_root: PathBuf::from(&config.backup_root),
        }
    }

    /// connect → fetch → fingerprint → write → disconnect. All network
    /// stages happen before the write, so failure paths leave no partial
    /// artifact behind.
    pub async fn backup(&self, target: &RunTarget, creds: &Credentials) -> Result<BackupArtifact> {
        tracing::info!(
            "📡 Backing up {} ({} {}:{})",
            target.hostname,
            target.protocol,
            target.address,
            target.port
        );

        let mut session = self.connector.open(target, creds).await?;
        let fetched = session.fetch_config().await;
        session.close().await;
        let content = fetched?;

        let bytes = content.as_bytes();
        let fp = fingerprint(bytes);
        let path = artifact_path(&self.backup_root, &target.hostname, &fp);

        std::fs::create_dir_all(&self.backup_root).map_err(|e| NetStashError::Persistence {
            path: self.backup_root.display().to_string(),
            reason: format!("cannot create backup root: {e}"),
        })?;
        std::fs::write(&path, bytes).map_err(|e| NetStashError::Persistence {
            path: path.display().to_string(),
            reason: format!("artifact write failed: {e}"),
        })?;

        tracing::info!(
            "💾 {}: {} bytes -> {}",
            target.hostname,
            bytes.len(),
            path.display()
        );
        Ok(BackupArtifact {
            path,
            size_bytes: bytes.len() as u64,
            fingerprint: fp,
        })
    }
}

/// `{backupRoot}/{host}_{fingerprintPrefix}.cfg`
pub fn artifact_path(root: &Path, host: &str, fp: &str) -> PathBuf {
    root.join(format!("{host}_{fp}.cfg"))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted connector shared by the runner crate's tests.

    use super::*;
    use netstash_core::error::SessionStage;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Per-host behavior of the scripted fleet.
    #[derive(Clone)]
    pub enum HostScript {
        /// Session opens and yields this config text after `delay`.
        Config(String, Duration),
        /// Session open fails with a stage timeout after `delay`.
        Unreachable(Duration),
        /// Authentication rejected immediately.
        BadAuth,
    }

    #[derive(Clone, Default)]
    pub struct FakeConnector {
        pub scripts: Arc<Mutex<std::collections::HashMap<String, HostScript>>>,
        /// (host, open instant, close instant) per completed session.
        pub sessions: Arc<Mutex<Vec<(String, tokio::time::Instant, tokio::time::Instant)>>>,
    }

    impl FakeConnector {
        pub fn with(hosts: Vec<(&str, HostScript)>) -> Self {
            let c = Self::default();
            let mut m = c.scripts.lock().unwrap();
            for (h, s) in hosts {
                m.insert(h.to_string(), s);
            }
            drop(m);
            c
        }
    }

    pub struct FakeSession {
        host: String,
        config: String,
        delay: Duration,
        opened_at: tokio::time::Instant,
        sessions: Arc<Mutex<Vec<(String, tokio::time::Instant, tokio::time::Instant)>>>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn open(
            &self,
            target: &RunTarget,
            _creds: &Credentials,
        ) -> Result<Box<dyn DeviceSession>> {
            let script = self
                .scripts
                .lock()
                .unwrap()
                .get(&target.hostname)
                .cloned()
                .unwrap_or(HostScript::Config("default config".into(), Duration::ZERO));
            match script {
                HostScript::Config(cfg, delay) => Ok(Box::new(FakeSession {
                    host: target.hostname.clone(),
                    config: cfg,
                    delay,
                    opened_at: tokio::time::Instant::now(),
                    sessions: self.sessions.clone(),
                })),
                HostScript::Unreachable(delay) => {
                    tokio::time::sleep(delay).await;
                    Err(NetStashError::Timeout {
                        host: target.hostname.clone(),
                        stage: SessionStage::Connect,
                        timeout: delay,
                    })
                }
                HostScript::BadAuth => Err(NetStashError::Authentication {
                    host: target.hostname.clone(),
                    reason: "password rejected".into(),
                }),
            }
        }
    }

    #[async_trait]
    impl DeviceSession for FakeSession {
        async fn fetch_config(&mut self) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            Ok(self.config.clone())
        }

        async fn close(&mut self) {
            self.sessions.lock().unwrap().push((
                self.host.clone(),
                self.opened_at,
                tokio::time::Instant::now(),
            ));
        }
    }

    pub fn target(host: &str) -> RunTarget {
        RunTarget {
            device_id: 1,
            hostname: host.to_string(),
            address: format!("10.0.0.{}", host.len()),
            vendor: "cisco".into(),
            protocol: netstash_core::types::Protocol::Ssh,
            port: 22,
        }
    }

    pub fn creds() -> Credentials {
        Credentials {
            username: "admin".into(),
            password: "pw".into(),
            enable_secret: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn executor(connector: FakeConnector, root: &Path) -> BackupExecutor {
        let mut config = NetStashConfig::default();
        config.backup_root = root.display().to_string();
        BackupExecutor::new(Arc::new(connector), &config)
    }

    #[tokio::test]
    async fn test_successful_backup_writes_one_artifact() {
        let dir = std::env::temp_dir().join("netstash-test-exec-ok");
        std::fs::remove_dir_all(&dir).ok();
        let connector = FakeConnector::with(vec![(
            "r1",
            HostScript::Config("hostname r1\nend".into(), Duration::ZERO),
        )]);
        let exec = executor(connector.clone(), &dir);

        let art = exec.backup(&target("r1"), &creds()).await.unwrap();
        assert_eq!(art.size_bytes, 15);
        assert!(art.path.to_string_lossy().contains("r1_"));
        assert!(art.path.to_string_lossy().ends_with(".cfg"));
        let on_disk = std::fs::read_to_string(&art.path).unwrap();
        assert_eq!(on_disk, "hostname r1\nend");
        // session was closed
        assert_eq!(connector.sessions.lock().unwrap().len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_identical_content_yields_identical_artifact_name() {
        let dir = std::env::temp_dir().join("netstash-test-exec-fp");
        std::fs::remove_dir_all(&dir).ok();
        let connector = FakeConnector::with(vec![(
            "r1",
            HostScript::Config("same config".into(), Duration::ZERO),
        )]);
        let exec = executor(connector, &dir);

        let a = exec.backup(&target("r1"), &creds()).await.unwrap();
        let b = exec.backup(&target("r1"), &creds()).await.unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.path, b.path);
        // same content deduplicates to one file on disk
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_failure_leaves_no_partial_artifact() {
        let dir = std::env::temp_dir().join("netstash-test-exec-fail");
        std::fs::remove_dir_all(&dir).ok();
        let connector =
            FakeConnector::with(vec![("dead", HostScript::Unreachable(Duration::ZERO))]);
        let exec = executor(connector, &dir);

        let err = exec.backup(&target("dead"), &creds()).await.unwrap_err();
        assert!(err.is_device_failure());
        // the failure happened before the write step; nothing on disk
        assert!(!dir.exists());
    }
}
