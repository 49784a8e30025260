//! Service lifecycle: `start` binds, `run` serves, `stop` asks the loop to end.
//!
//! A host (the `wrund` binary, or an OS service manager adapter) owns one
//! [`Service`] and drives it through these three calls.

use std::future::Future;
use std::net::SocketAddr;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, ServerSettings};
use crate::errors::ErrorCode;
use crate::executor::{ExecError, Executor};
use crate::server::{Server, ServerError, ServerHandle};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Executor(#[from] ExecError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("service has not been started")]
    NotStarted,
}

impl ServiceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Config(e) => e.code(),
            Self::Executor(e) => e.code(),
            Self::Server(e) => e.code(),
            Self::NotStarted => ErrorCode::InternalServiceState,
        }
    }
}

pub trait Service {
    /// Acquire resources (bind the listening socket).
    fn start(&mut self) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// Serve until stopped.
    fn run(&mut self) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// Ask a running service to stop; returns immediately.
    fn stop(&self);
}

/// Settings -> Executor -> Server.
pub struct WrunService {
    settings: ServerSettings,
    server: Option<Server<Executor>>,
    handle: Option<ServerHandle>,
    local_addr: Option<SocketAddr>,
}

impl WrunService {
    pub fn new(settings: ServerSettings) -> Self {
        Self {
            settings,
            server: None,
            handle: None,
            local_addr: None,
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Handle for signal handlers; available once started.
    pub fn stop_handle(&self) -> Option<ServerHandle> {
        self.handle.clone()
    }

    /// Address actually bound, useful when the port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Service for WrunService {
    async fn start(&mut self) -> Result<(), ServiceError> {
        let executor = Executor::new(self.settings.executor_config())?;
        let config = self.settings.server_config()?;
        let server = Server::bind(config, executor).await?;
        self.local_addr = server.local_addr().ok();
        self.handle = Some(server.handle());
        self.server = Some(server);
        info!(addr = ?self.local_addr, "service started");
        Ok(())
    }

    async fn run(&mut self) -> Result<(), ServiceError> {
        let server = self.server.take().ok_or(ServiceError::NotStarted)?;
        server.serve().await?;
        info!("service stopped");
        Ok(())
    }

    fn stop(&self) {
        match &self.handle {
            Some(handle) => handle.stop(),
            None => debug!("stop requested before start"),
        }
    }
}
