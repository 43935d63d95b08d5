//! Raw Telnet transport over a tokio TCP stream.
//!
//! Option negotiation is minimal and deliberately unhelpful: every DO is
//! answered WONT, every WILL is answered DONT, and all IAC sequences are
//! stripped from the data handed to the state machine. Embedded network
//! operating systems cope fine with a dumb peer.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use netstash_core::error::{NetStashError, Result, SessionStage};

use crate::channel::RawChannel;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

/// Incremental RFC 854 command parser. Sequences can split across TCP
/// reads, so state is kept between chunks.
#[derive(Clone, Copy, Default)]
enum IacState {
    #[default]
    Data,
    Iac,
    Negotiate(u8),
    Subnegotiation,
    SubnegotiationIac,
}

#[derive(Default)]
struct TelnetParser {
    state: IacState,
}

impl TelnetParser {
    /// Split raw wire bytes into clean data and the refusals to send back.
    fn feed(&mut self, input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut data = Vec::with_capacity(input.len());
        let mut replies = Vec::new();

        for &b in input {
            match self.state {
                IacState::Data => {
                    if b == IAC {
                        self.state = IacState::Iac;
                    } else {
                        data.push(b);
                    }
                }
                IacState::Iac => match b {
                    IAC => {
                        // escaped literal 0xFF
                        data.push(IAC);
                        self.state = IacState::Data;
                    }
                    DO | DONT | WILL | WONT => {
                        self.state = IacState::Negotiate(b);
                    }
                    SB => {
                        self.state = IacState::Subnegotiation;
                    }
                    _ => {
                        // two-byte command (NOP, GA, ...) — ignore
                        self.state = IacState::Data;
                    }
                },
                IacState::Negotiate(verb) => {
                    match verb {
                        DO => replies.extend_from_slice(&[IAC, WONT, b]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, b]),
                        _ => {} // DONT/WONT need no answer
                    }
                    self.state = IacState::Data;
                }
                IacState::Subnegotiation => {
                    if b == IAC {
                        self.state = IacState::SubnegotiationIac;
                    }
                }
                IacState::SubnegotiationIac => {
                    self.state = if b == SE {
                        IacState::Data
                    } else {
                        IacState::Subnegotiation
                    };
                }
            }
        }

        (data, replies)
    }
}

/// Telnet channel: TCP stream plus the IAC parser.
pub struct TelnetChannel {
    stream: TcpStream,
    parser: TelnetParser,
    host: String,
}

impl TelnetChannel {
    /// Open a TCP connection within `connect_timeout`.
    pub async fn connect(host: &str, address: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect((address, port)))
            .await
            .map_err(|_| NetStashError::Timeout {
                host: host.to_string(),
                stage: SessionStage::Connect,
                timeout: connect_timeout,
            })?
            .map_err(|e| NetStashError::Protocol {
                host: host.to_string(),
                reason: format!("telnet connect to {address}:{port} failed: {e}"),
            })?;
        tracing::debug!("🔌 Telnet connected to {address}:{port}");
        Ok(Self {
            stream,
            parser: TelnetParser::default(),
            host: host.to_string(),
        })
    }
}

#[async_trait]
impl RawChannel for TelnetChannel {
    async fn read_chunk(&mut self, wait: Duration) -> Result<Vec<u8>> {
        let mut raw = [0u8; 4096];
        match tokio::time::timeout(wait, self.stream.read(&mut raw)).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(0)) => Err(NetStashError::Protocol {
                host: self.host.clone(),
                reason: "connection closed by device".into(),
            }),
            Ok(Ok(n)) => {
                let (data, replies) = self.parser.feed(&raw[..n]);
                if !replies.is_empty() {
                    self.stream.write_all(&replies).await.map_err(|e| NetStashError::Protocol {
                        host: self.host.clone(),
                        reason: format!("telnet negotiation write failed: {e}"),
                    })?;
                }
                Ok(data)
            }
            Ok(Err(e)) => Err(NetStashError::Protocol {
                host: self.host.clone(),
                reason: format!("telnet read failed: {e}"),
            }),
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await.map_err(|e| NetStashError::Protocol {
            host: self.host.clone(),
            reason: format!("telnet write failed: {e}"),
        })
    }

    async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
