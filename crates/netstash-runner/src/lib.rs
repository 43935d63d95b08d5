//! Run orchestration: the per-device backup executor, the single-lane job
//! queue, the device iteration loop, the schedule engine, and the
//! retention helper applied by external callers.

pub mod connector;
pub mod executor;
pub mod queue;
pub mod retention;
pub mod run;
pub mod scheduler;

pub use connector::NetworkConnector;
pub use executor::{BackupArtifact, BackupExecutor, Connector, DeviceSession};
pub use queue::JobQueue;
pub use run::RunDeps;
pub use scheduler::Scheduler;
