//! Client for the game service's private line protocol.
//!
//! Outbound frames are `0x40 + payload + "\n"`, UTF-8. Inbound reads pull at
//! most 128 bytes; the service occasionally prefixes noise terminated by NUL
//! bytes, so only the bytes after the last NUL are kept. The remainder is
//! decoded permissively (non-ASCII bytes dropped) and flattened onto one
//! line.

pub mod reload;
pub mod status;

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Control byte prefixed to every outbound line.
pub const FRAME_HEADER: u8 = 0x40;

/// Upper bound on a single inbound read.
pub const READ_CHUNK: usize = 128;

/// Connect bound for pure reachability probes.
pub const STATUS_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Connect bound when a call will be written.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(60);

/// Marker the service answers with after a successful authentication.
const AUTH_MARKER: &str = "SUCCESS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    On,
    Off,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::On => write!(f, "ON"),
            ConnectionStatus::Off => write!(f, "OFF"),
        }
    }
}

/// Owns at most one live socket; establishing a new connection always tears
/// down the previous one first (replacement, not pooling).
pub struct GameClient {
    target: ConnectionInfo,
    auth_pass: String,
    stream: Option<TcpStream>,
}

impl GameClient {
    pub fn new(target: ConnectionInfo, auth_pass: String) -> Self {
        Self {
            target,
            auth_pass,
            stream: None,
        }
    }

    /// Point the client at a different endpoint; takes effect on the next
    /// [`GameClient::establish`].
    pub fn retarget(&mut self, target: ConnectionInfo) {
        self.target = target;
    }

    pub fn target(&self) -> &ConnectionInfo {
        &self.target
    }

    /// Close and forget any existing socket. Idempotent.
    pub fn clear(&mut self) {
        self.stream = None;
    }

    /// Open a fresh connection to the current target within `timeout`.
    /// Every failure mode (refused, timed out, resolution failure) collapses
    /// to [`ConnectionStatus::Off`].
    pub async fn establish(&mut self, timeout: Duration) -> ConnectionStatus {
        self.clear();

        let connect = TcpStream::connect((self.target.host.as_str(), self.target.port));
        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(stream)) => {
                self.stream = Some(stream);
                ConnectionStatus::On
            }
            Ok(Err(err)) => {
                debug!(target = %self.target.host, port = self.target.port, "connect failed: {err}");
                ConnectionStatus::Off
            }
            Err(_) => ConnectionStatus::Off,
        }
    }

    /// Authenticate and issue one call. Returns `None` when the service is
    /// unreachable; a response without the success marker is returned
    /// verbatim (callers treat it as the failure message).
    pub async fn send_call(&mut self, payload: &str) -> Option<String> {
        if self.establish(WRITE_TIMEOUT).await == ConnectionStatus::Off {
            return None;
        }

        let pass = self.auth_pass.clone();
        self.write_frame(&pass).await.ok()?;
        let reply = self.read_frame().await.ok()?;
        if !reply.contains(AUTH_MARKER) {
            return Some(reply);
        }

        self.write_frame(payload).await.ok()?;
        self.read_frame().await.ok()
    }

    async fn write_frame(&mut self, payload: &str) -> std::io::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| std::io::Error::other("no live connection"))?;

        let mut line = Vec::with_capacity(payload.len() + 2);
        line.push(FRAME_HEADER);
        line.extend_from_slice(payload.as_bytes());
        line.push(b'\n');
        stream.write_all(&line).await?;
        stream.flush().await
    }

    async fn read_frame(&mut self) -> std::io::Result<String> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| std::io::Error::other("no live connection"))?;

        let mut buf = [0u8; READ_CHUNK];
        let n = stream.read(&mut buf).await?;
        Ok(parse_response(&buf[..n]))
    }
}

/// Extract the response text from a raw read: keep only the bytes after the
/// last NUL, drop non-ASCII bytes, strip CRs, and collapse newlines so a
/// multi-line answer lands on one line.
pub fn parse_response(bytes: &[u8]) -> String {
    let tail = match bytes.iter().rposition(|&b| b == 0) {
        Some(i) => &bytes[i + 1..],
        None => bytes,
    };

    let text: String = tail
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect();

    text.replace('\r', "")
        .replace('\n', " ")
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_after_last_nul() {
        assert_eq!(parse_response(b"\x00\x00pong\r\n"), "pong");
        assert_eq!(parse_response(b"noise\x00more\x00RELOADED\n"), "RELOADED");
    }

    #[test]
    fn response_without_nul_is_kept_whole() {
        assert_eq!(parse_response(b"SUCCESS\n"), "SUCCESS");
    }

    #[test]
    fn multi_line_answers_collapse() {
        assert_eq!(parse_response(b"line one\r\nline two\r\n"), "line one line two");
    }

    #[test]
    fn non_ascii_bytes_are_dropped() {
        assert_eq!(parse_response(b"ok\xff\xfe!"), "ok!");
    }

    #[test]
    fn empty_read_parses_to_empty() {
        assert_eq!(parse_response(b""), "");
        assert_eq!(parse_response(b"\x00"), "");
    }
}
