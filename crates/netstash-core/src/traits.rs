//! Collaborator seams. The runner only sees these traits; the SQLite
//! implementations live in netstash-store and are swapped out in tests.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Credentials, Device, JobStatus};

/// Supplies device records and pre-decrypted credentials. The core never
/// decrypts anything itself and never persists plaintext.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>>;

    async fn get_device(&self, id: i64) -> Result<Option<Device>>;

    /// Fetched just-in-time, once per connection attempt.
    async fn credentials_for(&self, device_id: i64) -> Result<Credentials>;
}

/// Persists job and backup records. Schema ownership is external.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a job in `queued` status; returns its id.
    async fn create_job(&self, triggered_by: &str) -> Result<i64>;

    async fn mark_job_running(&self, id: i64) -> Result<()>;

    /// Append one line to the job's chronological transcript.
    async fn append_job_log(&self, id: i64, line: &str) -> Result<()>;

    async fn set_job_attempts(&self, id: i64, attempted: u32) -> Result<()>;

    /// Set the terminal status exactly once and stamp the finish time.
    async fn finish_job(&self, id: i64, status: JobStatus) -> Result<()>;

    async fn create_backup(
        &self,
        device_id: i64,
        size_bytes: u64,
        fingerprint: &str,
        path: &str,
    ) -> Result<i64>;
}

/// Supplies persisted schedule definitions for scheduler reloads.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn list_schedules(&self) -> Result<Vec<crate::types::Schedule>>;
}

/// Fire-and-forget audit event emission. Implementations swallow their own
/// errors; emitting must never fail or block the primary operation.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, actor: &str, action: &str, target: &str, result: &str);
}
