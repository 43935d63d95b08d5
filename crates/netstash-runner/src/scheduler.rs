//! Schedule engine — an owned instance with a start/stop/reload
//! lifecycle. One recurring trigger per enabled schedule, anchored at
//! its time-of-day (UTC) and repeating every interval in days. Reload
//! re-derives the whole trigger table and swaps it wholesale; the table
//! is never mutated row by row.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use netstash_core::error::Result;
use netstash_core::traits::{AuditSink, DeviceRegistry, ScheduleStore};
use netstash_core::types::{RunTarget, Schedule, TargetMode, tags_intersect};

use crate::queue::JobQueue;

struct Trigger {
    schedule: Schedule,
    fire_at: DateTime<Utc>,
}

/// The schedule engine. Target resolution happens at fire time, not at
/// reload time, so device edits between fires are picked up.
pub struct Scheduler {
    schedules: Arc<dyn ScheduleStore>,
    registry: Arc<dyn DeviceRegistry>,
    audit: Arc<dyn AuditSink>,
    queue: JobQueue,
    triggers: Arc<Mutex<Vec<Trigger>>>,
    stop: Arc<Notify>,
    tick: Duration,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        registry: Arc<dyn DeviceRegistry>,
        audit: Arc<dyn AuditSink>,
        queue: JobQueue,
        tick: Duration,
    ) -> Self {
        Self {
            schedules,
            registry,
            audit,
            queue,
            triggers: Arc::new(Mutex::new(Vec::new())),
            stop: Arc::new(Notify::new()),
            tick,
            handle: None,
        }
    }

    /// Re-derive the full trigger table from the persisted schedule set
    /// and swap it in atomically.
    pub async fn reload(&self) -> Result<()> {
        let now = Utc::now();
        let schedules = self.schedules.list_schedules().await?;
        let mut table = Vec::new();
        for schedule in schedules.into_iter().filter(|s| s.enabled) {
            match first_fire(&schedule.run_at, now) {
                Some(fire_at) => {
                    tracing::info!(
                        "📅 Schedule '{}' armed: next fire {} (every {} day(s))",
                        schedule.name,
                        fire_at.format("%Y-%m-%d %H:%M"),
                        schedule.interval_days
                    );
                    table.push(Trigger { schedule, fire_at });
                }
                None => {
                    tracing::warn!(
                        "⚠️ Schedule '{}' has unparseable run_at '{}' — skipped",
                        schedule.name,
                        schedule.run_at
                    );
                }
            }
        }
        let count = table.len();
        *self.triggers.lock().unwrap() = table;
        self.audit
            .emit("system", "scheduler_reload", "triggers", &format!("{count} armed"))
            .await;
        Ok(())
    }

    /// Spawn the tick loop. Call `reload` first to arm the table.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let triggers = self.triggers.clone();
        let registry = self.registry.clone();
        let queue = self.queue.clone();
        let stop = self.stop.clone();
        let tick = self.tick;

        tracing::info!("⏰ Scheduler started (check every {:?})", tick);
        self.handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let due = take_due(&triggers, Utc::now());
                        for schedule in due {
                            fire(&registry, &queue, &schedule).await;
                        }
                    }
                    _ = stop.notified() => break,
                }
            }
        }));
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(&mut self) {
        self.stop.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        tracing::info!("⏹️ Scheduler stopped");
    }

    /// Current trigger table snapshot: (schedule name, next fire).
    pub fn armed(&self) -> Vec<(String, DateTime<Utc>)> {
        self.triggers
            .lock()
            .unwrap()
            .iter()
            .map(|t| (t.schedule.name.clone(), t.fire_at))
            .collect()
    }
}

/// Pop every due trigger's schedule and advance its next fire by the
/// configured interval.
fn take_due(triggers: &Mutex<Vec<Trigger>>, now: DateTime<Utc>) -> Vec<Schedule> {
    let mut due = Vec::new();
    let mut table = triggers.lock().unwrap();
    for trigger in table.iter_mut() {
        if trigger.fire_at <= now {
            due.push(trigger.schedule.clone());
            let days = u64::from(trigger.schedule.interval_days.max(1));
            trigger.fire_at += chrono::Duration::days(days as i64);
        }
    }
    due
}

async fn fire(registry: &Arc<dyn DeviceRegistry>, queue: &JobQueue, schedule: &Schedule) {
    tracing::info!("🔔 Schedule '{}' fired", schedule.name);
    match resolve_schedule_targets(registry.as_ref(), schedule).await {
        Ok(targets) => {
            let trigger = format!("schedule:{}", schedule.name);
            if let Err(e) = queue.submit(&trigger, targets).await {
                tracing::error!("🛑 Schedule '{}' admission failed: {e}", schedule.name);
            }
        }
        Err(e) => {
            tracing::error!("🛑 Schedule '{}' target resolution failed: {e}", schedule.name);
        }
    }
}

/// Resolve a schedule's device set at fire time. Only enabled devices
/// are ever selected, in every mode.
pub async fn resolve_schedule_targets(
    registry: &dyn DeviceRegistry,
    schedule: &Schedule,
) -> Result<Vec<RunTarget>> {
    let devices = registry.list_devices().await?;
    let targets = devices
        .iter()
        .filter(|d| d.enabled)
        .filter(|d| match schedule.target_mode {
            TargetMode::All => true,
            TargetMode::Tag => tags_intersect(&d.tags, &schedule.target_tags),
            TargetMode::Device => schedule.target_device == Some(d.id),
        })
        .map(RunTarget::from)
        .collect();
    Ok(targets)
}

/// Next occurrence of the "HH:MM" anchor strictly after `now` (UTC):
/// today if still ahead, otherwise tomorrow.
pub fn first_fire(run_at: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(run_at, "%H:%M").ok()?;
    let candidate = now.date_naive().and_time(time).and_utc();
    if candidate > now {
        Some(candidate)
    } else {
        candidate.checked_add_days(Days::new(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::BackupExecutor;
    use crate::executor::testing::FakeConnector;
    use crate::run::testing::{MemRegistry, MemSchedules, MemStore, NullAudit, device};
    use crate::run::RunDeps;
    use chrono::TimeZone;
    use netstash_core::config::NetStashConfig;

    fn schedule(name: &str, mode: TargetMode, tags: &[&str]) -> Schedule {
        Schedule {
            id: 1,
            name: name.to_string(),
            interval_days: 7,
            run_at: "02:00".into(),
            target_mode: mode,
            target_tags: tags.iter().map(|t| t.to_string()).collect(),
            target_device: None,
            retention: 10,
            notify_on_fail: true,
            enabled: true,
        }
    }

    #[test]
    fn test_first_fire_today_or_tomorrow() {
        let before = Utc.with_ymd_and_hms(2026, 8, 30, 1, 30, 0).unwrap();
        let fire = first_fire("02:00", before).unwrap();
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 8, 30, 2, 0, 0).unwrap());

        let after = Utc.with_ymd_and_hms(2026, 8, 30, 2, 30, 0).unwrap();
        let fire = first_fire("02:00", after).unwrap();
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 8, 31, 2, 0, 0).unwrap());

        assert!(first_fire("not-a-time", after).is_none());
    }

    #[test]
    fn test_take_due_advances_by_interval() {
        let now = Utc.with_ymd_and_hms(2026, 8, 30, 2, 0, 0).unwrap();
        let triggers = Mutex::new(vec![Trigger {
            schedule: schedule("weekly", TargetMode::All, &[]),
            fire_at: now,
        }]);

        let due = take_due(&triggers, now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "weekly");
        // advanced a full interval, not to tomorrow
        assert_eq!(
            triggers.lock().unwrap()[0].fire_at,
            now + chrono::Duration::days(7)
        );

        // nothing due a second time
        assert!(take_due(&triggers, now).is_empty());
    }

    #[tokio::test]
    async fn test_tag_targets_match_case_insensitively() {
        let registry = MemRegistry::with(vec![
            device(1, "core1", &["core", "edge"], true),
            device(2, "lab1", &["lab"], true),
            device(3, "untagged", &[], true),
            device(4, "edge-off", &["edge"], false),
        ]);
        let sched = schedule("edges", TargetMode::Tag, &["EDGE"]);

        let targets = resolve_schedule_targets(&registry, &sched).await.unwrap();
        let names: Vec<&str> = targets.iter().map(|t| t.hostname.as_str()).collect();
        // tagged+enabled matches; untagged never matches; disabled excluded
        assert_eq!(names, vec!["core1"]);
    }

    #[tokio::test]
    async fn test_device_mode_targets_exactly_one_enabled_device() {
        let registry = MemRegistry::with(vec![
            device(1, "a", &[], true),
            device(2, "b", &[], false),
        ]);
        let mut sched = schedule("single", TargetMode::Device, &[]);
        sched.target_device = Some(1);
        let targets = resolve_schedule_targets(&registry, &sched).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].hostname, "a");

        // a disabled device resolves to nothing
        sched.target_device = Some(2);
        let targets = resolve_schedule_targets(&registry, &sched).await.unwrap();
        assert!(targets.is_empty());
    }

    #[tokio::test]
    async fn test_reload_swaps_the_whole_table() {
        let schedules = Arc::new(MemSchedules::default());
        let store = Arc::new(MemStore::default());
        let registry = Arc::new(MemRegistry::default());
        let deps = RunDeps {
            registry: registry.clone(),
            store,
            audit: Arc::new(NullAudit),
            executor: BackupExecutor::new(
                Arc::new(FakeConnector::default()),
                &NetStashConfig::default(),
            ),
            runner_cfg: NetStashConfig::default().runner,
        };
        let scheduler = Scheduler::new(
            schedules.clone(),
            registry,
            Arc::new(NullAudit),
            JobQueue::new(deps),
            Duration::from_secs(30),
        );

        schedules
            .schedules
            .lock()
            .unwrap()
            .push(schedule("alpha", TargetMode::All, &[]));
        scheduler.reload().await.unwrap();
        assert_eq!(scheduler.armed().len(), 1);
        assert_eq!(scheduler.armed()[0].0, "alpha");

        // replace alpha with beta and a disabled gamma; reload leaves no
        // stale trigger behind
        {
            let mut s = schedules.schedules.lock().unwrap();
            s.clear();
            s.push(schedule("beta", TargetMode::All, &[]));
            let mut gamma = schedule("gamma", TargetMode::All, &[]);
            gamma.enabled = false;
            s.push(gamma);
        }
        scheduler.reload().await.unwrap();
        let armed = scheduler.armed();
        assert_eq!(armed.len(), 1);
        assert_eq!(armed[0].0, "beta");
    }
}
