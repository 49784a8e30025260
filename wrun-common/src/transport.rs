//! Half-close framed transport.
//!
//! Exactly one message travels in each direction per connection. The sender
//! writes the whole payload and then shuts down its write half; the receiver
//! reads fixed-size chunks until a zero-length read. There is no length
//! prefix, so a peer that never half-closes is only cut off by a timeout.
//!
//! The server bounds its request read with `io_timeout`. The client's wait
//! for the response covers the whole remote execution, so it has its own
//! optional `response_timeout` and otherwise waits for the half-close.
//!
//! The functions here are generic over the stream so the same framing runs
//! over plain TCP, a TLS session, or an in-memory duplex pipe in tests.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::errors::ErrorCode;

/// Size of each read from the socket.
pub const BUFFER_SIZE: usize = 255;

/// Default cap on the size of one received message (16 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Default bound on connect, handshake, send and the server's request read.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-connection limits shared by server and client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Bound on connect, handshake, one send phase and the server's request read.
    pub io_timeout: Duration,
    /// Bound on the client's wait for a response. `None` waits until the
    /// server half-closes, however long the executable runs.
    pub response_timeout: Option<Duration>,
    /// Largest message accepted from the peer.
    pub max_message_bytes: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            io_timeout: DEFAULT_IO_TIMEOUT,
            response_timeout: None,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ConnectionLimits {
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_response_timeout(mut self, response_timeout: Option<Duration>) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }
}

/// Errors from connecting, accepting, handshaking or moving bytes.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error("{phase} timed out after {after:?}")]
    Timeout { phase: &'static str, after: Duration },

    #[error("message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    #[error("peer closed the connection without a message")]
    EmptyResponse,

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),
}

impl TransportError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Connect { .. } => ErrorCode::TransportConnectFailed,
            Self::Bind { .. } => ErrorCode::TransportBindFailed,
            Self::Io(_) => ErrorCode::TransportIo,
            Self::Timeout { .. } => ErrorCode::TransportTimeout,
            Self::MessageTooLarge { .. } => ErrorCode::TransportMessageTooLarge,
            Self::EmptyResponse => ErrorCode::TransportEmptyResponse,
            Self::Handshake(_) => ErrorCode::SecurityTlsHandshake,
        }
    }
}

/// Read one message: everything the peer writes before half-closing.
pub async fn receive<S>(stream: &mut S, limits: &ConnectionLimits) -> Result<Vec<u8>, TransportError>
where
    S: AsyncRead + Unpin,
{
    debug!("receiving");
    let message = tokio::time::timeout(
        limits.io_timeout,
        read_to_half_close(stream, limits.max_message_bytes),
    )
    .await
    .map_err(|_| TransportError::Timeout {
        phase: "receive",
        after: limits.io_timeout,
    })??;
    Ok(message)
}

/// Read the server's response, bounded only by `response_timeout`.
pub async fn receive_response<S>(
    stream: &mut S,
    limits: &ConnectionLimits,
) -> Result<Vec<u8>, TransportError>
where
    S: AsyncRead + Unpin,
{
    debug!("waiting for response");
    let read = read_to_half_close(stream, limits.max_message_bytes);
    match limits.response_timeout {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| TransportError::Timeout {
                phase: "response",
                after: limit,
            })?,
        None => read.await,
    }
}

async fn read_to_half_close<S>(stream: &mut S, max_bytes: usize) -> Result<Vec<u8>, TransportError>
where
    S: AsyncRead + Unpin,
{
    let mut message = Vec::new();
    let mut chunk = [0u8; BUFFER_SIZE];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            debug!("no more data to receive");
            break;
        }
        debug!(bytes = n, "received {} bytes", n);
        if message.len() + n > max_bytes {
            return Err(TransportError::MessageTooLarge { limit: max_bytes });
        }
        message.extend_from_slice(&chunk[..n]);
    }
    Ok(message)
}

/// Write one message and half-close the write side.
pub async fn send<S>(
    stream: &mut S,
    payload: &[u8],
    limits: &ConnectionLimits,
) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    debug!(bytes = payload.len(), "sending");
    tokio::time::timeout(limits.io_timeout, async {
        stream.write_all(payload).await?;
        stream.flush().await?;
        stream.shutdown().await
    })
    .await
    .map_err(|_| TransportError::Timeout {
        phase: "send",
        after: limits.io_timeout,
    })??;
    debug!("sent");
    Ok(())
}
