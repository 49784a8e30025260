//! Sequential connection-handling loop.
//!
//! One connection is handled at a time on the calling task: accept, optional
//! TLS handshake, receive one framed request, run the action, send one framed
//! response, close. Per-connection failures are logged and the loop moves on;
//! only a failure of the listening socket ends it.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::auth::SharedSecret;
use crate::errors::{ErrorCategory, ErrorCode, HandlerError};
use crate::tls::ServerTls;
use crate::transport::{self, ConnectionLimits, TransportError};

/// Maps one raw request to one raw response.
pub trait Action: Send + Sync + 'static {
    fn call(
        &self,
        request: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, HandlerError>> + Send;
}

impl<A: Action> Action for Arc<A> {
    fn call(
        &self,
        request: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, HandlerError>> + Send {
        (**self).call(request)
    }
}

/// Adapts a synchronous closure into an [`Action`].
pub struct FnAction<F>(F);

impl<F> FnAction<F>
where
    F: Fn(Vec<u8>) -> Result<Vec<u8>, HandlerError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Action for FnAction<F>
where
    F: Fn(Vec<u8>) -> Result<Vec<u8>, HandlerError> + Send + Sync + 'static,
{
    fn call(
        &self,
        request: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, HandlerError>> + Send {
        std::future::ready((self.0)(request))
    }
}

/// Core server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port` to listen on.
    pub bind_addr: String,
    pub secret: Option<SharedSecret>,
    pub tls: Option<ServerTls>,
    pub limits: ConnectionLimits,
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            secret: None,
            tls: None,
            limits: ConnectionLimits::default(),
        }
    }

    pub fn with_secret(mut self, secret: SharedSecret) -> Self {
        self.secret = Some(secret);
        self
    }

    pub fn with_tls(mut self, tls: ServerTls) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_limits(mut self, limits: ConnectionLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Lifecycle of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Listening,
    Accepting,
    Handling,
    Closed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Accepting => "accepting",
            Self::Handling => "handling",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Bind(TransportError),

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("connection {conn_id}: {source}")]
    Transport {
        conn_id: String,
        #[source]
        source: TransportError,
    },

    #[error("connection {conn_id}: {source}")]
    Handler {
        conn_id: String,
        #[source]
        source: HandlerError,
    },

    #[error("server is closed")]
    Closed,
}

impl ServerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Bind(e) | Self::Transport { source: e, .. } => e.code(),
            Self::Accept(_) => ErrorCode::TransportIo,
            Self::Handler { source, .. } => source.code(),
            Self::Closed => ErrorCode::TransportIo,
        }
    }

    /// Whether the listening socket is unusable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Bind(_) | Self::Closed => true,
            Self::Accept(e) => !matches!(
                e.kind(),
                io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
            ),
            Self::Transport { .. } | Self::Handler { .. } => false,
        }
    }
}

/// Cloneable handle to stop a server and observe its state.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    stop: Arc<watch::Sender<bool>>,
    state: Arc<watch::Sender<ServerState>>,
}

impl ServerHandle {
    fn new() -> Self {
        Self {
            stop: Arc::new(watch::Sender::new(false)),
            state: Arc::new(watch::Sender::new(ServerState::Idle)),
        }
    }

    /// Stop accepting. A blocked accept returns at once; an in-flight
    /// exchange completes.
    pub fn stop(&self) {
        if !self.stop.send_replace(true) {
            info!("stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ServerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "server state");
        }
    }
}

enum Failure {
    Transport(TransportError),
    Handler(HandlerError),
}

impl From<TransportError> for Failure {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<HandlerError> for Failure {
    fn from(e: HandlerError) -> Self {
        Self::Handler(e)
    }
}

pub struct Server<A> {
    listener: Option<TcpListener>,
    config: ServerConfig,
    action: A,
    handle: ServerHandle,
}

impl<A: Action> Server<A> {
    /// Bind the listening socket (Idle -> Listening).
    pub async fn bind(config: ServerConfig, action: A) -> Result<Self, ServerError> {
        let handle = ServerHandle::new();
        let listener = TcpListener::bind(&config.bind_addr).await.map_err(|source| {
            ServerError::Bind(TransportError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })
        })?;
        info!(
            addr = %config.bind_addr,
            tls = config.tls.is_some(),
            shared_secret = config.secret.is_some(),
            "listening"
        );
        handle.set_state(ServerState::Listening);
        Ok(Self {
            listener: Some(listener),
            config,
            action,
            handle,
        })
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.listener {
            Some(listener) => listener.local_addr(),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "server is closed")),
        }
    }

    pub fn state(&self) -> ServerState {
        self.handle.state()
    }

    /// Accept one connection and run one exchange on it.
    pub async fn process(&mut self) -> Result<(), ServerError> {
        let listener = self.listener.as_ref().ok_or(ServerError::Closed)?;
        self.handle.set_state(ServerState::Accepting);
        let (stream, peer) = listener.accept().await.map_err(ServerError::Accept)?;
        self.handle_connection(stream, peer).await
    }

    /// Serve connections until [`ServerHandle::stop`] is called.
    pub async fn serve(mut self) -> Result<(), ServerError> {
        let mut stop = self.handle.stop.subscribe();
        let result = loop {
            if *stop.borrow_and_update() {
                break Ok(());
            }
            let Some(listener) = self.listener.as_ref() else {
                break Err(ServerError::Closed);
            };
            self.handle.set_state(ServerState::Accepting);

            let accepted = tokio::select! {
                biased;
                _ = stop.wait_for(|stopped| *stopped) => break Ok(()),
                accepted = listener.accept() => accepted,
            };

            let outcome = match accepted {
                Ok((stream, peer)) => self.handle_connection(stream, peer).await,
                Err(e) => Err(ServerError::Accept(e)),
            };
            match outcome {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!(code = %e.code().code_string(), "{}", e);
                    break Err(e);
                }
                Err(e) => log_failure(&e),
            }
        };
        self.close();
        result
    }

    fn close(&mut self) {
        self.listener = None;
        self.handle.set_state(ServerState::Closed);
        info!("server closed");
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), ServerError> {
        self.handle.set_state(ServerState::Handling);
        let conn_id = Uuid::new_v4().to_string();
        let span = info_span!("conn", conn_id = %conn_id, peer = %peer);

        let outcome = self.secure_exchange(stream).instrument(span).await;

        outcome.map_err(|failure| match failure {
            Failure::Transport(source) => ServerError::Transport { conn_id, source },
            Failure::Handler(source) => ServerError::Handler { conn_id, source },
        })
    }

    async fn secure_exchange(&self, stream: TcpStream) -> Result<(), Failure> {
        debug!("accepted");
        let Some(tls) = &self.config.tls else {
            let mut stream = stream;
            return self.exchange_and_close(&mut stream).await;
        };

        let io_timeout = self.config.limits.io_timeout;
        let handshake = tokio::time::timeout(io_timeout, tls.acceptor().accept(stream))
            .await
            .map_err(|_| TransportError::Timeout {
                phase: "handshake",
                after: io_timeout,
            })?;
        let mut stream = handshake.map_err(TransportError::Handshake)?;
        self.exchange_and_close(&mut stream).await
    }

    async fn exchange_and_close<S>(&self, stream: &mut S) -> Result<(), Failure>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.exchange(stream).await;
        if result.is_err() {
            // Close our side so the client sees an empty response.
            let _ = tokio::time::timeout(self.config.limits.io_timeout, stream.shutdown()).await;
        }
        debug!("closing client socket");
        result
    }

    async fn exchange<S>(&self, stream: &mut S) -> Result<(), Failure>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let limits = &self.config.limits;
        let message = transport::receive(stream, limits).await?;
        let (request, nonce) = match &self.config.secret {
            Some(secret) => {
                let (nonce, payload) =
                    secret.open_request(&message).map_err(HandlerError::from)?;
                (payload, Some(nonce))
            }
            None => (message, None),
        };

        let response = self.action.call(request).await?;

        let response = match (&self.config.secret, &nonce) {
            (Some(secret), Some(nonce)) => secret.seal_response(nonce, &response),
            _ => response,
        };
        transport::send(stream, &response, limits).await?;
        Ok(())
    }
}

fn log_failure(e: &ServerError) {
    let code = e.code();
    match code.category() {
        ErrorCategory::Security => warn!(code = %code.code_string(), "security: {}", e),
        _ => warn!(code = %code.code_string(), "{}", e),
    }
}
