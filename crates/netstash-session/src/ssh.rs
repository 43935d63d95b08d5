//! SSH transport via russh. Session negotiation absorbs the
//! username/password exchange; what comes out is a PTY + shell channel
//! exposed as the same raw byte stream the Telnet path produces.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::PublicKey;
use russh::{Channel, ChannelMsg, Disconnect};

use netstash_core::error::{NetStashError, Result, SessionStage};
use netstash_core::types::Credentials;

use crate::channel::RawChannel;

struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // Host key pinning is a deployment concern; backup targets are
    // reached over the management network.
    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// SSH channel: authenticated session plus an interactive shell.
pub struct SshChannel {
    session: client::Handle<ClientHandler>,
    channel: Channel<client::Msg>,
    host: String,
}

impl SshChannel {
    /// Connect, authenticate with a password, and open a PTY + shell.
    pub async fn connect(
        host: &str,
        address: &str,
        port: u16,
        creds: &Credentials,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let config = Arc::new(client::Config::default());

        let mut session = tokio::time::timeout(
            connect_timeout,
            client::connect(config, (address, port), ClientHandler),
        )
        .await
        .map_err(|_| NetStashError::Timeout {
            host: host.to_string(),
            stage: SessionStage::Connect,
            timeout: connect_timeout,
        })?
        .map_err(|e| NetStashError::Protocol {
            host: host.to_string(),
            reason: format!("ssh connect to {address}:{port} failed: {e}"),
        })?;

        let auth = session
            .authenticate_password(&creds.username, &creds.password)
            .await
            .map_err(|e| NetStashError::Protocol {
                host: host.to_string(),
                reason: format!("ssh authentication exchange failed: {e}"),
            })?;
        if !matches!(auth, client::AuthResult::Success) {
            return Err(NetStashError::Authentication {
                host: host.to_string(),
                reason: "password rejected".into(),
            });
        }

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| NetStashError::Protocol {
                host: host.to_string(),
                reason: format!("ssh channel open failed: {e}"),
            })?;
        channel
            .request_pty(false, "vt100", 200, 50, 0, 0, &[])
            .await
            .map_err(|e| NetStashError::Protocol {
                host: host.to_string(),
                reason: format!("ssh pty request failed: {e}"),
            })?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| NetStashError::Protocol {
                host: host.to_string(),
                reason: format!("ssh shell request failed: {e}"),
            })?;

        tracing::debug!("🔐 SSH session established with {address}:{port}");
        Ok(Self {
            session,
            channel,
            host: host.to_string(),
        })
    }
}

#[async_trait]
impl RawChannel for SshChannel {
    async fn read_chunk(&mut self, wait: Duration) -> Result<Vec<u8>> {
        match tokio::time::timeout(wait, self.channel.wait()).await {
            Err(_) => Ok(Vec::new()),
            Ok(Some(ChannelMsg::Data { data })) => Ok(data.to_vec()),
            Ok(Some(ChannelMsg::ExtendedData { data, .. })) => Ok(data.to_vec()),
            Ok(Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None) => {
                Err(NetStashError::Protocol {
                    host: self.host.clone(),
                    reason: "ssh channel closed by device".into(),
                })
            }
            // window adjusts, exit status, ...
            Ok(Some(_)) => Ok(Vec::new()),
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.channel
            .data(data)
            .await
            .map_err(|e| NetStashError::Protocol {
                host: self.host.clone(),
                reason: format!("ssh write failed: {e}"),
            })
    }

    async fn shutdown(&mut self) {
        let _ = self
            .session
            .disconnect(Disconnect::ByApplication, "backup complete", "en")
            .await;
    }
}
