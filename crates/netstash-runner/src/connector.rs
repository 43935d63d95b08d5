//! Production connector: resolves the vendor profile, runs the session
//! driver's login machinery, and drains command output through the
//! normalizer.

use async_trait::async_trait;

use netstash_core::config::{NormalizerConfig, SessionConfig};
use netstash_core::error::Result;
use netstash_core::types::{Credentials, RunTarget};
use netstash_session::normalize::drain_command;
use netstash_session::vendor::{VendorProfile, resolve};
use netstash_session::SessionDriver;

use crate::executor::{Connector, DeviceSession};

/// Opens real SSH/Telnet sessions via netstash-session.
pub struct NetworkConnector {
    session_cfg: SessionConfig,
    normalizer_cfg: NormalizerConfig,
}

impl NetworkConnector {
    pub fn new(session_cfg: SessionConfig, normalizer_cfg: NormalizerConfig) -> Self {
        Self {
            session_cfg,
            normalizer_cfg,
        }
    }
}

#[async_trait]
impl Connector for NetworkConnector {
    async fn open(&self, target: &RunTarget, creds: &Credentials) -> Result<Box<dyn DeviceSession>> {
        let profile = resolve(&target.vendor, target.protocol);
        tracing::debug!(
            "🧭 {} resolved to vendor family '{}' (command '{}')",
            target.hostname,
            profile.family,
            profile.command
        );
        let driver = SessionDriver::connect(target, creds, profile, &self.session_cfg).await?;
        Ok(Box::new(LiveSession {
            driver: Some(driver),
            profile,
            host: target.hostname.clone(),
            normalizer_cfg: self.normalizer_cfg.clone(),
        }))
    }
}

struct LiveSession {
    // Option so close() can consume the driver for teardown.
    driver: Option<SessionDriver>,
    profile: VendorProfile,
    host: String,
    normalizer_cfg: NormalizerConfig,
}

#[async_trait]
impl DeviceSession for LiveSession {
    async fn fetch_config(&mut self) -> Result<String> {
        let driver = self.driver.as_mut().ok_or_else(|| {
            netstash_core::error::NetStashError::Protocol {
                host: self.host.clone(),
                reason: "session already closed".into(),
            }
        })?;
        let command = self.profile.command.to_string();
        driver.send_line(&command).await?;
        drain_command(
            driver.channel_mut(),
            &self.normalizer_cfg,
            &self.profile,
            &self.host,
            &command,
        )
        .await
    }

    async fn close(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.teardown().await;
        }
    }
}
