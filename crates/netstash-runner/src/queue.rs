//! Single-lane job queue.
//!
//! Admission is concurrent, execution is not: the active slot and the
//! FIFO backlog live under one mutex, so two admissions can never both
//! observe "no active run" and proceed. Devices and the shared backup
//! root are only ever touched by one run at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify};

use netstash_core::error::Result;
use netstash_core::types::{JobStatus, RunTarget};

use crate::run::{RunDeps, execute_job};

struct QueuedRun {
    job_id: i64,
    trigger: String,
    targets: Vec<RunTarget>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct QueueState {
    backlog: VecDeque<QueuedRun>,
    /// (job id, cancellation flag) of the run holding the lane.
    active: Option<(i64, Arc<AtomicBool>)>,
}

struct Inner {
    state: Mutex<QueueState>,
    deps: RunDeps,
    idle: Notify,
}

/// Cloneable handle to the single execution lane.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    pub fn new(deps: RunDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                deps,
                idle: Notify::new(),
            }),
        }
    }

    /// Admit a run. Creates the job record (queued) and either takes the
    /// lane immediately or joins the backlog. Returns the job id.
    pub async fn submit(&self, trigger: &str, targets: Vec<RunTarget>) -> Result<i64> {
        let job_id = self.inner.deps.store.create_job(trigger).await?;
        let run = QueuedRun {
            job_id,
            trigger: trigger.to_string(),
            targets,
            cancelled: Arc::new(AtomicBool::new(false)),
        };

        let mut state = self.inner.state.lock().await;
        if state.active.is_none() {
            state.active = Some((run.job_id, run.cancelled.clone()));
            tracing::info!("🚚 Job {job_id} admitted, lane free — starting");
            tokio::spawn(drain(self.inner.clone(), run));
        } else {
            tracing::info!(
                "🚚 Job {job_id} admitted, lane busy — backlog position {}",
                state.backlog.len() + 1
            );
            state.backlog.push_back(run);
        }
        Ok(job_id)
    }

    /// Flip a job's recorded status and stop treating it as active. An
    /// in-flight device session is never interrupted; the iteration
    /// observes the flag between devices.
    pub async fn cancel(&self, job_id: i64) -> Result<bool> {
        let mut state = self.inner.state.lock().await;

        if let Some((active_id, flag)) = &state.active
            && *active_id == job_id
        {
            flag.store(true, Ordering::SeqCst);
            self.inner
                .deps
                .store
                .append_job_log(job_id, "⛔ cancelled by operator")
                .await?;
            self.inner.deps.store.finish_job(job_id, JobStatus::Failed).await?;
            tracing::info!("⛔ Job {job_id} cancelled (in-flight device runs to completion)");
            return Ok(true);
        }

        if let Some(pos) = state.backlog.iter().position(|r| r.job_id == job_id) {
            state.backlog.remove(pos);
            self.inner
                .deps
                .store
                .append_job_log(job_id, "⛔ cancelled while queued")
                .await?;
            self.inner.deps.store.finish_job(job_id, JobStatus::Failed).await?;
            tracing::info!("⛔ Job {job_id} removed from backlog");
            return Ok(true);
        }

        Ok(false)
    }

    /// Resolve once the lane is free and the backlog is empty.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            {
                let state = self.inner.state.lock().await;
                if state.active.is_none() && state.backlog.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }
}

/// Lane task: run the current job, then keep pulling from the backlog
/// until it is empty. Exactly one of these exists at a time.
async fn drain(inner: Arc<Inner>, mut current: QueuedRun) {
    loop {
        execute_job(
            &inner.deps,
            current.job_id,
            &current.trigger,
            &current.targets,
            &current.cancelled,
        )
        .await;

        let next = {
            let mut state = inner.state.lock().await;
            match state.backlog.pop_front() {
                Some(run) => {
                    state.active = Some((run.job_id, run.cancelled.clone()));
                    Some(run)
                }
                None => {
                    state.active = None;
                    inner.idle.notify_waiters();
                    None
                }
            }
        };
        match next {
            Some(run) => current = run,
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::BackupExecutor;
    use crate::executor::testing::{FakeConnector, HostScript, target};
    use crate::run::testing::{MemRegistry, MemStore, NullAudit};
    use netstash_core::config::NetStashConfig;
    use std::time::Duration;

    fn queue_with(connector: FakeConnector, root: &str) -> (JobQueue, Arc<MemStore>) {
        let store = Arc::new(MemStore::default());
        let mut config = NetStashConfig::default();
        config.backup_root = root.to_string();
        let deps = RunDeps {
            registry: Arc::new(MemRegistry::default()),
            store: store.clone(),
            audit: Arc::new(NullAudit),
            executor: BackupExecutor::new(Arc::new(connector), &config),
            runner_cfg: config.runner.clone(),
        };
        (JobQueue::new(deps), store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_runs_never_overlap() {
        let dir = std::env::temp_dir().join("netstash-test-queue-serial");
        std::fs::remove_dir_all(&dir).ok();
        // each session takes 5 simulated seconds
        let connector = FakeConnector::with(vec![(
            "r1",
            HostScript::Config("cfg".into(), Duration::from_secs(5)),
        )]);
        let sessions = connector.sessions.clone();
        let (queue, store) = queue_with(connector, &dir.display().to_string());

        let a = queue.submit("manual", vec![target("r1")]).await.unwrap();
        let b = queue.submit("manual", vec![target("r1")]).await.unwrap();
        assert_ne!(a, b);
        queue.wait_idle().await;

        let windows = sessions.lock().unwrap().clone();
        assert_eq!(windows.len(), 2);
        // second session opened only after the first closed
        assert!(windows[1].1 >= windows[0].2);
        assert_eq!(store.job(a).status, JobStatus::Success);
        assert_eq!(store.job(b).status, JobStatus::Success);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_is_fifo() {
        let dir = std::env::temp_dir().join("netstash-test-queue-fifo");
        std::fs::remove_dir_all(&dir).ok();
        let connector = FakeConnector::with(vec![(
            "r1",
            HostScript::Config("cfg".into(), Duration::from_secs(1)),
        )]);
        let (queue, store) = queue_with(connector, &dir.display().to_string());

        let first = queue.submit("manual", vec![target("r1")]).await.unwrap();
        let second = queue.submit("manual", vec![target("r1")]).await.unwrap();
        let third = queue.submit("manual", vec![target("r1")]).await.unwrap();
        queue.wait_idle().await;

        // jobs are created in admission order and all reach a terminal state
        assert!(first < second && second < third);
        for id in [first, second, third] {
            assert!(store.job(id).finished);
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_queued_job_never_executes() {
        let dir = std::env::temp_dir().join("netstash-test-queue-cancel");
        std::fs::remove_dir_all(&dir).ok();
        let connector = FakeConnector::with(vec![(
            "r1",
            HostScript::Config("cfg".into(), Duration::from_secs(5)),
        )]);
        let sessions = connector.sessions.clone();
        let (queue, store) = queue_with(connector, &dir.display().to_string());

        let active = queue.submit("manual", vec![target("r1")]).await.unwrap();
        let queued = queue.submit("manual", vec![target("r1")]).await.unwrap();
        assert!(queue.cancel(queued).await.unwrap());
        queue.wait_idle().await;

        // only the first job's session ever opened
        assert_eq!(sessions.lock().unwrap().len(), 1);
        assert_eq!(store.job(active).status, JobStatus::Success);
        assert_eq!(store.job(queued).status, JobStatus::Failed);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unknown_job_is_noop() {
        let (queue, _store) = queue_with(FakeConnector::default(), "/tmp/netstash-unused");
        assert!(!queue.cancel(42).await.unwrap());
    }
}
