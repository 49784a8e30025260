//! Client side of one request/response exchange.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info_span, Instrument};

use crate::auth::{AuthError, SharedSecret};
use crate::errors::ErrorCode;
use crate::protocol::{Command, DecodeError, ExecResult};
use crate::tls::{ClientTls, TlsError};
use crate::transport::{self, ConnectionLimits, TransportError};

/// Why the exchange itself failed.
#[derive(Debug, Error)]
pub enum CommunicationError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("communication with {addr} failed: {source}")]
    Communication {
        addr: String,
        #[source]
        source: CommunicationError,
    },

    #[error("invalid response: {0}")]
    Decode(#[source] DecodeError),

    #[error("failed to encode request: {0}")]
    Encode(#[source] DecodeError),
}

impl ProxyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Communication { source, .. } => match source {
                CommunicationError::Transport(e) => e.code(),
                CommunicationError::Tls(e) => e.code(),
                CommunicationError::Auth(e) => e.code(),
            },
            Self::Decode(e) | Self::Encode(e) => e.code(),
        }
    }

    pub fn is_communication(&self) -> bool {
        matches!(self, Self::Communication { .. })
    }
}

/// Remote end of a wrun server.
#[derive(Debug, Clone)]
pub struct Proxy {
    host: String,
    port: u16,
    tls: Option<ClientTls>,
    secret: Option<SharedSecret>,
    limits: ConnectionLimits,
}

impl Proxy {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: None,
            secret: None,
            limits: ConnectionLimits::default(),
        }
    }

    pub fn with_tls(mut self, tls: ClientTls) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_secret(mut self, secret: SharedSecret) -> Self {
        self.secret = Some(secret);
        self
    }

    pub fn with_limits(mut self, limits: ConnectionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// `host:port`, bracketing bare IPv6 hosts.
    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Send raw bytes and return the raw response.
    ///
    /// An empty response means the server closed without answering and is
    /// reported as a communication failure.
    pub async fn request(&self, payload: &[u8]) -> Result<Vec<u8>, ProxyError> {
        let addr = self.addr();
        let span = info_span!("proxy", addr = %addr);
        self.exchange(&addr, payload)
            .instrument(span)
            .await
            .map_err(|source| ProxyError::Communication { addr, source })
    }

    /// Run `executable` remotely and decode its result.
    pub async fn run<I, S>(
        &self,
        executable: &str,
        arguments: I,
        stdin: &str,
    ) -> Result<ExecResult, ProxyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = Command::new(executable)
            .with_args(arguments)
            .with_stdin(stdin);
        self.run_command(&command).await
    }

    pub async fn run_command(&self, command: &Command) -> Result<ExecResult, ProxyError> {
        let payload = command.encode().map_err(ProxyError::Encode)?;
        let response = self.request(&payload).await?;
        ExecResult::decode(&response).map_err(ProxyError::Decode)
    }

    async fn exchange(&self, addr: &str, payload: &[u8]) -> Result<Vec<u8>, CommunicationError> {
        let (message, nonce) = match &self.secret {
            Some(secret) => {
                let (message, nonce) = secret.seal_request(payload);
                (message, Some(nonce))
            }
            None => (payload.to_vec(), None),
        };

        let io_timeout = self.limits.io_timeout;
        let stream = tokio::time::timeout(io_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout {
                phase: "connect",
                after: io_timeout,
            })?
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        debug!("connected");

        let response = match &self.tls {
            Some(tls) => {
                let server_name = tls.server_name(&self.host)?;
                let mut stream =
                    tokio::time::timeout(io_timeout, tls.connector().connect(server_name, stream))
                        .await
                        .map_err(|_| TransportError::Timeout {
                            phase: "handshake",
                            after: io_timeout,
                        })?
                        .map_err(TransportError::Handshake)?;
                self.send_and_receive(&mut stream, &message).await?
            }
            None => {
                let mut stream = stream;
                self.send_and_receive(&mut stream, &message).await?
            }
        };
        debug!("closing client socket");

        if response.is_empty() {
            return Err(TransportError::EmptyResponse.into());
        }
        match (&self.secret, &nonce) {
            (Some(secret), Some(nonce)) => Ok(secret.open_response(nonce, &response)?),
            _ => Ok(response),
        }
    }

    async fn send_and_receive<S>(
        &self,
        stream: &mut S,
        message: &[u8],
    ) -> Result<Vec<u8>, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        transport::send(stream, message, &self.limits).await?;
        transport::receive_response(stream, &self.limits).await
    }
}
