//! SQLite persistence for NetStash.
//!
//! One database file holds devices, jobs, backups, schedules, and the
//! audit log. This crate is the concrete implementation behind the
//! netstash-core collaborator traits; the core crates never depend on it.
//!
//! Tags and schedule tag lists are stored comma-joined; timestamps are
//! RFC 3339 text. `backups.device_id` is a soft reference — backups may
//! outlive their device, so there is no cascade.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use netstash_core::error::{NetStashError, Result};
use netstash_core::traits::{AuditSink, DeviceRegistry, RunStore, ScheduleStore};
use netstash_core::types::{
    Backup, Credentials, Device, Job, JobStatus, Protocol, Schedule, TargetMode,
};

/// Fields for a new device row. Credentials travel in this struct only
/// between the CLI and the insert; they are never read back except by
/// `credentials_for`.
pub struct NewDevice {
    pub hostname: String,
    pub address: String,
    pub vendor: String,
    pub protocol: Protocol,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub enable_secret: Option<String>,
    pub tags: Vec<String>,
}

/// Fields for a new schedule row.
pub struct NewSchedule {
    pub name: String,
    pub interval_days: u32,
    pub run_at: String,
    pub target_mode: TargetMode,
    pub target_tags: Vec<String>,
    pub target_device: Option<i64>,
    pub retention: u32,
}

/// SQLite-backed store. All collaborator traits are implemented on this
/// one type; the connection is shared under a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> NetStashError {
    NetStashError::Store(e.to_string())
}

fn join_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

fn split_tags(s: &str) -> Vec<String> {
    s.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SqliteStore {
    /// Open or create the database, run migrations, and seed the default
    /// schedule if the table is empty.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;

        // WAL for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        store.seed_default_schedule()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| NetStashError::Store(format!("lock poisoned: {e}")))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS devices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hostname TEXT NOT NULL UNIQUE,
                address TEXT NOT NULL,
                vendor TEXT DEFAULT '',
                protocol TEXT DEFAULT 'ssh',
                port INTEGER DEFAULT 22,
                username TEXT DEFAULT '',
                password TEXT DEFAULT '',
                enable_secret TEXT,
                tags TEXT DEFAULT '',
                enabled INTEGER DEFAULT 1,
                created_at TEXT DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                triggered_by TEXT NOT NULL,
                status TEXT DEFAULT 'queued',
                started_at TEXT NOT NULL,
                finished_at TEXT,
                devices INTEGER DEFAULT 0,
                log TEXT DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS backups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                fingerprint TEXT NOT NULL,
                path TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS schedules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                interval_days INTEGER DEFAULT 7,
                run_at TEXT DEFAULT '02:00',
                target_mode TEXT DEFAULT 'all',
                target_tags TEXT DEFAULT '',
                target_device INTEGER,
                retention INTEGER DEFAULT 10,
                notify_on_fail INTEGER DEFAULT 1,
                enabled INTEGER DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                target TEXT DEFAULT '',
                result TEXT DEFAULT ''
            );
            ",
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// A fresh install gets one weekly all-devices schedule at 02:00.
    fn seed_default_schedule(&self) -> Result<()> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schedules", [], |r| r.get(0))
            .map_err(db_err)?;
        if count > 0 {
            return Ok(());
        }
        conn.execute(
            "INSERT INTO schedules (name, interval_days, run_at, target_mode, retention)
             VALUES ('weekly-all', 7, '02:00', 'all', 10)",
            [],
        )
        .map_err(db_err)?;
        tracing::info!("🌱 Seeded default schedule 'weekly-all' (weekly, 02:00, all devices)");
        Ok(())
    }

    // ── Device administration ──────────────────────────────

    pub fn add_device(&self, d: &NewDevice) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO devices (hostname, address, vendor, protocol, port, username, password, enable_secret, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                d.hostname,
                d.address,
                d.vendor,
                d.protocol.to_string().to_lowercase(),
                d.port,
                d.username,
                d.password,
                d.enable_secret,
                join_tags(&d.tags),
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn remove_device(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn
            .execute("DELETE FROM devices WHERE id=?1", params![id])
            .map_err(db_err)?;
        Ok(n > 0)
    }

    pub fn set_device_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE devices SET enabled=?1 WHERE id=?2",
                params![enabled as i32, id],
            )
            .map_err(db_err)?;
        Ok(n > 0)
    }

    // ── Schedule administration ──────────────────────────────

    pub fn add_schedule(&self, s: &NewSchedule) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO schedules (name, interval_days, run_at, target_mode, target_tags, target_device, retention)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                s.name,
                s.interval_days,
                s.run_at,
                s.target_mode.to_string().to_lowercase(),
                join_tags(&s.target_tags),
                s.target_device,
                s.retention,
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn remove_schedule(&self, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn
            .execute("DELETE FROM schedules WHERE name=?1", params![name])
            .map_err(db_err)?;
        Ok(n > 0)
    }

    pub fn set_schedule_enabled(&self, name: &str, enabled: bool) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE schedules SET enabled=?1 WHERE name=?2",
                params![enabled as i32, name],
            )
            .map_err(db_err)?;
        Ok(n > 0)
    }

    pub fn get_schedule(&self, name: &str) -> Result<Option<Schedule>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("{SCHEDULE_SELECT} WHERE name=?1"),
            params![name],
            row_schedule,
        )
        .optional()
        .map_err(db_err)
    }

    // ── Job and backup inspection ──────────────────────────────

    pub fn list_jobs(&self, limit: u32) -> Result<Vec<Job>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{JOB_SELECT} ORDER BY id DESC LIMIT ?1"))
            .map_err(db_err)?;
        let jobs = stmt
            .query_map(params![limit], row_job)
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(jobs)
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let conn = self.conn()?;
        conn.query_row(&format!("{JOB_SELECT} WHERE id=?1"), params![id], row_job)
            .optional()
            .map_err(db_err)
    }

    pub fn list_backups(&self, device_id: Option<i64>) -> Result<Vec<Backup>> {
        let conn = self.conn()?;
        let (sql, filter) = match device_id {
            Some(id) => (
                format!("{BACKUP_SELECT} WHERE device_id=?1 ORDER BY id DESC"),
                vec![id],
            ),
            None => (format!("{BACKUP_SELECT} ORDER BY id DESC"), vec![]),
        };
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let backups = stmt
            .query_map(rusqlite::params_from_iter(filter), row_backup)
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(backups)
    }

    fn insert_audit(&self, actor: &str, action: &str, target: &str, result: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO audit (timestamp, actor, action, target, result)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![Utc::now().to_rfc3339(), actor, action, target, result],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

const DEVICE_SELECT: &str =
    "SELECT id, hostname, address, vendor, protocol, port, tags, enabled FROM devices";
const JOB_SELECT: &str =
    "SELECT id, triggered_by, status, started_at, finished_at, devices, log FROM jobs";
const BACKUP_SELECT: &str =
    "SELECT id, device_id, timestamp, size_bytes, fingerprint, path FROM backups";
const SCHEDULE_SELECT: &str = "SELECT id, name, interval_days, run_at, target_mode, target_tags, \
     target_device, retention, notify_on_fail, enabled FROM schedules";

// Credential columns are deliberately absent from the device row mapper;
// they only ever leave the database through `credentials_for`.
fn row_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
    let protocol: String = row.get(4)?;
    let tags: String = row.get(6)?;
    Ok(Device {
        id: row.get(0)?,
        hostname: row.get(1)?,
        address: row.get(2)?,
        vendor: row.get(3)?,
        protocol: protocol.parse().unwrap_or(Protocol::Ssh),
        port: row.get(5)?,
        tags: split_tags(&tags),
        enabled: row.get::<_, i32>(7)? != 0,
    })
}

fn row_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let status: String = row.get(2)?;
    let started: String = row.get(3)?;
    let finished: Option<String> = row.get(4)?;
    Ok(Job {
        id: row.get(0)?,
        triggered_by: row.get(1)?,
        status: status.parse().unwrap_or(JobStatus::Failed),
        started_at: parse_ts(&started),
        finished_at: finished.as_deref().map(parse_ts),
        devices: row.get(5)?,
        log: row.get(6)?,
    })
}

fn row_backup(row: &rusqlite::Row<'_>) -> rusqlite::Result<Backup> {
    let ts: String = row.get(2)?;
    Ok(Backup {
        id: row.get(0)?,
        device_id: row.get(1)?,
        timestamp: parse_ts(&ts),
        size_bytes: row.get(3)?,
        fingerprint: row.get(4)?,
        path: row.get(5)?,
    })
}

fn row_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    let mode: String = row.get(4)?;
    let tags: String = row.get(5)?;
    Ok(Schedule {
        id: row.get(0)?,
        name: row.get(1)?,
        interval_days: row.get(2)?,
        run_at: row.get(3)?,
        target_mode: mode.parse().unwrap_or(TargetMode::All),
        target_tags: split_tags(&tags),
        target_device: row.get(6)?,
        retention: row.get(7)?,
        notify_on_fail: row.get::<_, i32>(8)? != 0,
        enabled: row.get::<_, i32>(9)? != 0,
    })
}

#[async_trait]
impl DeviceRegistry for SqliteStore {
    async fn list_devices(&self) -> Result<Vec<Device>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{DEVICE_SELECT} ORDER BY hostname"))
            .map_err(db_err)?;
        let devices = stmt
            .query_map([], row_device)
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(devices)
    }

    async fn get_device(&self, id: i64) -> Result<Option<Device>> {
        let conn = self.conn()?;
        conn.query_row(&format!("{DEVICE_SELECT} WHERE id=?1"), params![id], row_device)
            .optional()
            .map_err(db_err)
    }

    async fn credentials_for(&self, device_id: i64) -> Result<Credentials> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT username, password, enable_secret FROM devices WHERE id=?1",
            params![device_id],
            |row| {
                Ok(Credentials {
                    username: row.get(0)?,
                    password: row.get(1)?,
                    enable_secret: row.get(2)?,
                })
            },
        )
        .map_err(db_err)
    }
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn create_job(&self, triggered_by: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO jobs (triggered_by, status, started_at) VALUES (?1, 'queued', ?2)",
            params![triggered_by, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    async fn mark_job_running(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE jobs SET status='running', started_at=?1 WHERE id=?2",
            params![Utc::now().to_rfc3339(), id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn append_job_log(&self, id: i64, line: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE jobs SET log = log || ?1 || char(10) WHERE id=?2",
            params![line, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_job_attempts(&self, id: i64, attempted: u32) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE jobs SET devices=?1 WHERE id=?2",
            params![attempted, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn finish_job(&self, id: i64, status: JobStatus) -> Result<()> {
        let conn = self.conn()?;
        // terminal status is set exactly once; a later finish is a no-op
        conn.execute(
            "UPDATE jobs SET status=?1, finished_at=?2 WHERE id=?3 AND finished_at IS NULL",
            params![status.to_string(), Utc::now().to_rfc3339(), id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn create_backup(
        &self,
        device_id: i64,
        size_bytes: u64,
        fingerprint: &str,
        path: &str,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO backups (device_id, timestamp, size_bytes, fingerprint, path)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                device_id,
                Utc::now().to_rfc3339(),
                size_bytes,
                fingerprint,
                path
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{SCHEDULE_SELECT} ORDER BY name"))
            .map_err(db_err)?;
        let schedules = stmt
            .query_map([], row_schedule)
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(schedules)
    }
}

#[async_trait]
impl AuditSink for SqliteStore {
    /// Audit writes never fail the primary operation; errors are logged
    /// and swallowed.
    async fn emit(&self, actor: &str, action: &str, target: &str, result: &str) {
        if let Err(e) = self.insert_audit(actor, action, target, result) {
            tracing::warn!("⚠️ Audit write failed ({action} on {target}): {e}");
        }
    }
}
