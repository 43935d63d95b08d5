//! Raw byte channel over an interactive session, plus the bounded
//! marker-scan read used by the login state machine.

use std::time::Duration;

use async_trait::async_trait;
use netstash_core::error::{NetStashError, Result, SessionStage};

/// An unframed interactive byte stream. Implemented by the Telnet and SSH
/// transports, and by scripted fakes in tests.
#[async_trait]
pub trait RawChannel: Send {
    /// Wait up to `wait` for any bytes; returns an empty vec on idle.
    /// Returns whatever arrived first — callers accumulate.
    async fn read_chunk(&mut self, wait: Duration) -> Result<Vec<u8>>;

    /// Transmit bytes as-is. Callers append line endings themselves.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Low-level close. Must not error; called unconditionally on teardown.
    async fn shutdown(&mut self);
}

/// Read until any of `markers` appears (case-insensitively) in the
/// accumulated stream, or fail with a timeout naming the host and stage.
/// Returns everything read, including the marker.
pub async fn read_until_any(
    channel: &mut dyn RawChannel,
    markers: &[&str],
    deadline: Duration,
    host: &str,
    stage: SessionStage,
) -> Result<String> {
    let start = tokio::time::Instant::now();
    let mut buf: Vec<u8> = Vec::new();

    loop {
        let elapsed = start.elapsed();
        if elapsed >= deadline {
            return Err(NetStashError::Timeout {
                host: host.to_string(),
                stage,
                timeout: deadline,
            });
        }

        let remaining = deadline - elapsed;
        let wait = remaining.min(Duration::from_millis(250));
        let chunk = channel.read_chunk(wait).await?;
        if chunk.is_empty() {
            continue;
        }
        buf.extend_from_slice(&chunk);

        let haystack = String::from_utf8_lossy(&buf).to_lowercase();
        if markers.iter().any(|m| haystack.contains(&m.to_lowercase())) {
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
    }
}
