//! Per-job device iteration: strictly sequential, rate-limited between
//! attempts, and tolerant of per-device failure. Only orchestration
//! errors (store calls failing, errors outside the loop) fail the job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use netstash_core::config::RunnerConfig;
use netstash_core::error::Result;
use netstash_core::traits::{AuditSink, DeviceRegistry, RunStore};
use netstash_core::types::{JobStatus, RunTarget};

use crate::executor::BackupExecutor;

/// Everything one run needs. Shared by the queue and the scheduler.
pub struct RunDeps {
    pub registry: Arc<dyn DeviceRegistry>,
    pub store: Arc<dyn RunStore>,
    pub audit: Arc<dyn AuditSink>,
    pub executor: BackupExecutor,
    pub runner_cfg: RunnerConfig,
}

/// Drive one admitted job to its terminal state. Store failures inside
/// are orchestration failures and mark the job `failed`.
pub async fn execute_job(
    deps: &RunDeps,
    job_id: i64,
    trigger: &str,
    targets: &[RunTarget],
    cancelled: &AtomicBool,
) {
    deps.audit
        .emit(trigger, "job_run", &format!("job:{job_id}"), "started")
        .await;

    if let Err(e) = iterate_devices(deps, job_id, targets, cancelled).await {
        tracing::error!("🛑 Job {job_id} orchestration failure: {e}");
        let _ = deps
            .store
            .append_job_log(job_id, &format!("orchestration failure: {e}"))
            .await;
        let _ = deps.store.finish_job(job_id, JobStatus::Failed).await;
        deps.audit
            .emit(trigger, "job_run", &format!("job:{job_id}"), "failed")
            .await;
        return;
    }

    let result = if cancelled.load(Ordering::SeqCst) {
        "cancelled"
    } else {
        "finished"
    };
    deps.audit
        .emit(trigger, "job_run", &format!("job:{job_id}"), result)
        .await;
}

async fn iterate_devices(
    deps: &RunDeps,
    job_id: i64,
    targets: &[RunTarget],
    cancelled: &AtomicBool,
) -> Result<()> {
    deps.store.mark_job_running(job_id).await?;
    tracing::info!("▶️ Job {job_id} running over {} device(s)", targets.len());

    if targets.is_empty() {
        deps.store.append_job_log(job_id, "no targets resolved").await?;
        deps.store.finish_job(job_id, JobStatus::Success).await?;
        return Ok(());
    }

    let total = targets.len();
    let mut attempted = 0u32;
    let mut ok = 0u32;

    for (i, target) in targets.iter().enumerate() {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        let outcome = attempt_device(deps, target).await;
        attempted += 1;
        let succeeded = match outcome {
            Ok(line) => {
                ok += 1;
                deps.store.append_job_log(job_id, &line).await?;
                true
            }
            Err(e) => {
                tracing::warn!("⚠️ {}: {e}", target.hostname);
                deps.store
                    .append_job_log(job_id, &format!("❌ {}: {e}", target.hostname))
                    .await?;
                false
            }
        };

        // protect constrained devices between attempts; never after the last
        if i + 1 < total && !cancelled.load(Ordering::SeqCst) {
            let delay = if succeeded {
                deps.runner_cfg.success_delay()
            } else {
                deps.runner_cfg.failure_delay()
            };
            tokio::time::sleep(delay).await;
        }
    }

    deps.store.set_job_attempts(job_id, attempted).await?;

    if cancelled.load(Ordering::SeqCst) {
        // status was already flipped by the cancellation; record how far
        // the iteration got
        deps.store
            .append_job_log(
                job_id,
                &format!("run cancelled after {attempted}/{total} device(s)"),
            )
            .await?;
        return Ok(());
    }

    deps.store
        .append_job_log(
            job_id,
            &format!("completed: {ok}/{attempted} device(s) succeeded"),
        )
        .await?;
    // all-failed runs are failures; partial failure stays success with
    // the counters carrying the detail
    let status = if attempted > 0 && ok == 0 {
        JobStatus::Failed
    } else {
        JobStatus::Success
    };
    deps.store.finish_job(job_id, status).await?;
    tracing::info!("🏁 Job {job_id} finished: {ok}/{attempted} succeeded");
    Ok(())
}

/// One device attempt: just-in-time credentials, then the executor
/// pipeline. Every failure kind becomes a log line, never a job abort.
async fn attempt_device(deps: &RunDeps, target: &RunTarget) -> Result<String> {
    let creds = deps.registry.credentials_for(target.device_id).await?;
    let artifact = deps.executor.backup(target, &creds).await?;
    deps.store
        .create_backup(
            target.device_id,
            artifact.size_bytes,
            &artifact.fingerprint,
            &artifact.path.display().to_string(),
        )
        .await?;
    Ok(format!(
        "✅ {}: {} bytes -> {}",
        target.hostname,
        artifact.size_bytes,
        artifact.path.display()
    ))
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory collaborators shared by the runner tests.

    use super::*;
    use async_trait::async_trait;
    use netstash_core::types::{Credentials, Device, Protocol, Schedule};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct JobRec {
        pub triggered_by: String,
        pub status: JobStatus,
        pub attempts: u32,
        pub log: Vec<String>,
        pub finished: bool,
    }

    #[derive(Debug, Clone)]
    pub struct BackupRec {
        pub device_id: i64,
        pub size_bytes: u64,
        pub fingerprint: String,
        pub path: String,
    }

    #[derive(Default)]
    pub struct MemStore {
        pub jobs: Mutex<HashMap<i64, JobRec>>,
        pub backups: Mutex<Vec<BackupRec>>,
        next_id: Mutex<i64>,
    }

    impl MemStore {
        pub fn job(&self, id: i64) -> JobRec {
            self.jobs.lock().unwrap().get(&id).unwrap().clone()
        }
    }

    #[async_trait]
    impl RunStore for MemStore {
        async fn create_job(&self, triggered_by: &str) -> netstash_core::error::Result<i64> {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            let id = *next;
            self.jobs.lock().unwrap().insert(
                id,
                JobRec {
                    triggered_by: triggered_by.to_string(),
                    status: JobStatus::Queued,
                    attempts: 0,
                    log: Vec::new(),
                    finished: false,
                },
            );
            Ok(id)
        }

        async fn mark_job_running(&self, id: i64) -> netstash_core::error::Result<()> {
            self.jobs.lock().unwrap().get_mut(&id).unwrap().status = JobStatus::Running;
            Ok(())
        }

        async fn append_job_log(&self, id: i64, line: &str) -> netstash_core::error::Result<()> {
            self.jobs
                .lock()
                .unwrap()
                .get_mut(&id)
                .unwrap()
                .log
                .push(line.to_string());
            Ok(())
        }

        async fn set_job_attempts(&self, id: i64, attempted: u32) -> netstash_core::error::Result<()> {
            self.jobs.lock().unwrap().get_mut(&id).unwrap().attempts = attempted;
            Ok(())
        }

        async fn finish_job(&self, id: i64, status: JobStatus) -> netstash_core::error::Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(&id).unwrap();
            job.status = status;
            job.finished = true;
            Ok(())
        }

        async fn create_backup(
            &self,
            device_id: i64,
            size_bytes: u64,
            fingerprint: &str,
            path: &str,
        ) -> netstash_core::error::Result<i64> {
            let mut backups = self.backups.lock().unwrap();
            backups.push(BackupRec {
                device_id,
                size_bytes,
                fingerprint: fingerprint.to_string(),
                path: path.to_string(),
            });
            Ok(backups.len() as i64)
        }
    }

    #[derive(Default)]
    pub struct MemRegistry {
        pub devices: Mutex<Vec<Device>>,
    }

    impl MemRegistry {
        pub fn with(devices: Vec<Device>) -> Self {
            Self {
                devices: Mutex::new(devices),
            }
        }
    }

    #[async_trait]
    impl DeviceRegistry for MemRegistry {
        async fn list_devices(&self) -> netstash_core::error::Result<Vec<Device>> {
            Ok(self.devices.lock().unwrap().clone())
        }

        async fn get_device(&self, id: i64) -> netstash_core::error::Result<Option<Device>> {
            Ok(self
                .devices
                .lock()
                .unwrap()
                .iter()
                .find(|d| d.id == id)
                .cloned())
        }

        async fn credentials_for(&self, _device_id: i64) -> netstash_core::error::Result<Credentials> {
            Ok(Credentials {
                username: "admin".into(),
                password: "pw".into(),
                enable_secret: None,
            })
        }
    }

    pub struct NullAudit;

    #[async_trait]
    impl AuditSink for NullAudit {
        async fn emit(&self, _actor: &str, _action: &str, _target: &str, _result: &str) {}
    }

    #[derive(Default)]
    pub struct MemSchedules {
        pub schedules: Mutex<Vec<Schedule>>,
    }

    #[async_trait]
    impl netstash_core::traits::ScheduleStore for MemSchedules {
        async fn list_schedules(&self) -> netstash_core::error::Result<Vec<Schedule>> {
            Ok(self.schedules.lock().unwrap().clone())
        }
    }

    pub fn device(id: i64, hostname: &str, tags: &[&str], enabled: bool) -> Device {
        Device {
            id,
            hostname: hostname.to_string(),
            address: format!("10.1.1.{id}"),
            vendor: "cisco".into(),
            protocol: Protocol::Ssh,
            port: 22,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            enabled,
        }
    }
}
