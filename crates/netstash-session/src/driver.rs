//! Login/prompt state machine over a raw channel.
//!
//! Telnet walks the full sequence by hand: scan for a login marker, send
//! the username, scan for the password marker, send the password, settle.
//! SSH arrives already authenticated; both paths then share prompt
//! discovery, privileged-mode entry, and post-login profile commands.

use std::time::Duration;

use netstash_core::config::SessionConfig;
use netstash_core::error::{NetStashError, Result, SessionStage};
use netstash_core::types::{Credentials, Protocol, RunTarget};

use crate::channel::{RawChannel, read_until_any};
use crate::ssh::SshChannel;
use crate::telnet::TelnetChannel;
use crate::vendor::VendorProfile;

/// Prompt markers for the login stage, matched case-insensitively.
const LOGIN_MARKERS: &[&str] = &["username:", "login:", "user name:", "user:"];
const PASSWORD_MARKERS: &[&str] = &["password:"];

/// Short read window used while settling output that has no marker to
/// scan for (prompt discovery, on_open drains).
const POLL_WINDOW: Duration = Duration::from_millis(300);

/// An authenticated interactive session, ready to take commands.
pub struct SessionDriver {
    channel: Box<dyn RawChannel>,
    host: String,
    profile: VendorProfile,
    cfg: SessionConfig,
    prompt: String,
}

impl SessionDriver {
    /// Connect and authenticate per the target's protocol. On any failure
    /// after the socket is up, the channel is closed before returning.
    pub async fn connect(
        target: &RunTarget,
        creds: &Credentials,
        profile: VendorProfile,
        cfg: &SessionConfig,
    ) -> Result<Self> {
        let channel: Box<dyn RawChannel> = match target.protocol {
            Protocol::Telnet => Box::new(
                TelnetChannel::connect(
                    &target.hostname,
                    &target.address,
                    target.port,
                    cfg.connect_timeout(),
                )
                .await?,
            ),
            Protocol::Ssh => Box::new(
                SshChannel::connect(
                    &target.hostname,
                    &target.address,
                    target.port,
                    creds,
                    cfg.connect_timeout(),
                )
                .await?,
            ),
        };

        let mut driver = Self {
            channel,
            host: target.hostname.clone(),
            profile,
            cfg: cfg.clone(),
            prompt: String::new(),
        };
        if let Err(e) = driver.initialize(target.protocol, creds).await {
            driver.channel.shutdown().await;
            return Err(e);
        }
        tracing::info!("✅ Session ready on {} (prompt '{}')", driver.host, driver.prompt);
        Ok(driver)
    }

    async fn initialize(&mut self, protocol: Protocol, creds: &Credentials) -> Result<()> {
        match protocol {
            Protocol::Telnet => self.telnet_login(creds).await?,
            // russh already ran the password exchange; give the device a
            // moment to paint its banner before probing for the prompt.
            Protocol::Ssh => tokio::time::sleep(self.cfg.settle()).await,
        }

        self.prompt = self.discover_prompt().await?;

        if let Some(secret) = &creds.enable_secret
            && !self.profile.enable_command.is_empty()
            && self.prompt.trim_end().ends_with('>')
        {
            self.enter_enable(secret).await?;
        }

        self.run_on_open().await;
        Ok(())
    }

    /// Explicit Telnet login: marker scan, credential, settle, repeat.
    async fn telnet_login(&mut self, creds: &Credentials) -> Result<()> {
        // kick the device into printing its login prompt
        self.channel.send(b"\r\n").await?;

        read_until_any(
            self.channel.as_mut(),
            LOGIN_MARKERS,
            self.cfg.prompt_timeout(),
            &self.host,
            SessionStage::Username,
        )
        .await?;
        tracing::debug!("👤 {}: login prompt detected", self.host);
        self.send_line(&creds.username).await?;

        read_until_any(
            self.channel.as_mut(),
            PASSWORD_MARKERS,
            self.cfg.prompt_timeout(),
            &self.host,
            SessionStage::Password,
        )
        .await?;
        self.send_line(&creds.password).await?;

        // embedded NOSes are slow to redraw after a credential
        tokio::time::sleep(self.cfg.settle()).await;
        Ok(())
    }

    /// Transmit a bare line ending and take the last non-empty line the
    /// device paints as its prompt.
    async fn discover_prompt(&mut self) -> Result<String> {
        self.channel.send(b"\r\n").await?;

        let deadline = self.cfg.prompt_timeout();
        let start = tokio::time::Instant::now();
        let mut buf: Vec<u8> = Vec::new();
        let mut idle = 0u8;
        while idle < 2 && start.elapsed() < deadline {
            let chunk = self.channel.read_chunk(POLL_WINDOW).await?;
            if chunk.is_empty() {
                // nothing yet at all: keep waiting for the first byte
                if !buf.is_empty() {
                    idle += 1;
                }
            } else {
                idle = 0;
                buf.extend_from_slice(&chunk);
            }
        }

        let text = String::from_utf8_lossy(&buf);
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .next_back()
            .map(str::to_string)
            .ok_or_else(|| NetStashError::Timeout {
                host: self.host.clone(),
                stage: SessionStage::Prompt,
                timeout: deadline,
            })
    }

    /// Enter privileged mode and confirm the prompt actually changed level.
    async fn enter_enable(&mut self, secret: &str) -> Result<()> {
        tracing::debug!("🔑 {}: entering privileged mode", self.host);
        let enable = self.profile.enable_command.to_string();
        self.send_line(&enable).await?;

        read_until_any(
            self.channel.as_mut(),
            PASSWORD_MARKERS,
            self.cfg.prompt_timeout(),
            &self.host,
            SessionStage::Enable,
        )
        .await?;
        self.send_line(secret).await?;
        tokio::time::sleep(self.cfg.settle()).await;

        self.prompt = self.discover_prompt().await?;
        if self.prompt.trim_end().ends_with('>') {
            return Err(NetStashError::Authentication {
                host: self.host.clone(),
                reason: "privileged mode rejected (prompt still user-level)".into(),
            });
        }
        Ok(())
    }

    /// Best-effort session preparation (paging off, console width). A
    /// failure here must not fail the session.
    async fn run_on_open(&mut self) {
        for cmd in self.profile.on_open {
            if self.send_line(cmd).await.is_err() {
                return;
            }
            // swallow the echo and any complaint
            for _ in 0..3 {
                match self.channel.read_chunk(POLL_WINDOW).await {
                    Ok(chunk) if chunk.is_empty() => break,
                    Ok(_) => continue,
                    Err(_) => return,
                }
            }
        }
    }

    /// Send one line, appending CRLF.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let mut data = line.as_bytes().to_vec();
        data.extend_from_slice(b"\r\n");
        self.channel.send(&data).await
    }

    pub fn channel_mut(&mut self) -> &mut dyn RawChannel {
        self.channel.as_mut()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn profile(&self) -> &VendorProfile {
        &self.profile
    }

    /// Graceful exit command first, then the unconditional socket close.
    /// Never returns an error; callers run this on every exit path.
    pub async fn teardown(mut self) {
        if !self.profile.exit_command.is_empty() {
            let exit = self.profile.exit_command.to_string();
            let _ = self.send_line(&exit).await;
        }
        self.channel.shutdown().await;
        tracing::debug!("🔚 Session closed on {}", self.host);
    }
}
