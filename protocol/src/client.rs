//! UDP client for the connectionless query and remote console protocol.

use crate::error::{ProtocolError, Result};
use crate::packet::{encode_command, parse_packet, RawPacket};
use crate::status::{parse_rcon_status, parse_status, StatusRow, StatusSnapshot};
use log::{debug, info, warn};
use std::fmt;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RETRIES: u32 = 5;

const RECV_BUFFER_SIZE: usize = 8192;

/// Payloads the server sends instead of command output when the password is wrong.
const REJECTED_RCON_RESPONSES: [&str; 2] = ["No rconpassword set on the server.\n", "Bad rconpassword.\n"];

/// Host and port of the game server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parses `address:port`. IPv6 literals must be bracketed (`[::1]:27960`).
    pub fn parse(server: &str) -> Result<Self> {
        let invalid = || ProtocolError::InvalidAddress(server.to_string());

        let (host, port) = match server.strip_prefix('[') {
            Some(rest) => rest.split_once("]:").ok_or_else(invalid)?,
            None => {
                let (host, port) = server.split_once(':').ok_or_else(invalid)?;
                if port.contains(':') {
                    return Err(invalid());
                }
                (host, port)
            }
        };

        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(invalid());
        }

        let port: u16 = port.parse().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }

        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Sends commands to one server and waits for the matching reply.
///
/// Methods take `&mut self`, so the socket is only ever used by one caller at
/// a time. Sharing between tasks is the job of the owner, not the client.
pub struct ProtocolClient {
    socket: UdpSocket,
    endpoint: Endpoint,
    rcon_password: String,
    timeout: Duration,
    max_retries: u32,
}

impl ProtocolClient {
    /// Binds an ephemeral local socket and connects it to `endpoint`.
    pub async fn connect(endpoint: Endpoint, rcon_password: impl Into<String>) -> Result<Self> {
        let invalid = || ProtocolError::InvalidAddress(endpoint.to_string());

        let remote = lookup_host((endpoint.host(), endpoint.port()))
            .await
            .map_err(|_| invalid())?
            .next()
            .ok_or_else(invalid)?;

        let local = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;
        info!("Protocol client connected to {} ({})", endpoint, remote);

        Ok(ProtocolClient {
            socket,
            endpoint,
            rcon_password: rcon_password.into(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Overrides the per-attempt timeout and attempt count used by the
    /// privileged and status queries.
    pub fn with_retry_policy(mut self, timeout: Duration, max_retries: u32) -> Self {
        self.timeout = timeout;
        self.max_retries = max_retries;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Sends `command` and returns the first well-formed reply.
    ///
    /// Each of the `max_retries` attempts resends the identical datagram and
    /// waits `wait` for an answer. A malformed reply uses up an attempt the
    /// same way a timeout does; if the last attempt was malformed the result
    /// is `Malformed`, otherwise `Timeout`.
    pub async fn query(&mut self, command: &str, wait: Duration, max_retries: u32) -> Result<RawPacket> {
        let data = encode_command(command);
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let mut last_malformed = None;

        for attempt in 1..=max_retries {
            self.discard_stale_datagrams(&mut buffer);
            self.socket.send(&data).await?;

            match timeout(wait, self.socket.recv(&mut buffer)).await {
                Ok(Ok(len)) => match parse_packet(&buffer[..len]) {
                    Ok(packet) => return Ok(packet),
                    Err(e) => {
                        warn!("Attempt {}/{} to {}: {}", attempt, max_retries, self.endpoint, e);
                        last_malformed = Some(e);
                    }
                },
                Ok(Err(e)) => {
                    debug!("Attempt {}/{} to {} failed: {}", attempt, max_retries, self.endpoint, e);
                    last_malformed = None;
                }
                Err(_) => {
                    debug!("Attempt {}/{} to {} timed out", attempt, max_retries, self.endpoint);
                    last_malformed = None;
                }
            }
        }

        Err(last_malformed.unwrap_or(ProtocolError::Timeout {
            attempts: max_retries,
        }))
    }

    /// Runs `command` on the server console, authenticated with the rcon password.
    pub async fn rcon_query(&mut self, command: &str) -> Result<RawPacket> {
        let wrapped = format!("rcon \"{}\" {}", self.rcon_password, command);
        let packet = self.query(&wrapped, self.timeout, self.max_retries).await?;

        if REJECTED_RCON_RESPONSES.contains(&packet.payload.as_str()) {
            return Err(ProtocolError::AuthenticationFailed(
                packet.payload.trim_end_matches('\n').to_string(),
            ));
        }

        Ok(packet)
    }

    /// Public `getstatus` query.
    pub async fn status(&mut self) -> Result<StatusSnapshot> {
        let packet = self.query("getstatus", self.timeout, self.max_retries).await?;
        Ok(parse_status(&packet.payload))
    }

    /// Privileged `status` query returning the connected-player table.
    pub async fn rcon_status(&mut self) -> Result<Vec<StatusRow>> {
        let packet = self.rcon_query("status").await?;
        Ok(parse_rcon_status(&packet.payload))
    }

    fn discard_stale_datagrams(&self, buffer: &mut [u8]) {
        while let Ok(len) = self.socket.try_recv(buffer) {
            debug!("Discarding stale {} byte datagram from {}", len, self.endpoint);
        }
    }
}
