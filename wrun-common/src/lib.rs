//! wrun protocol core.
//!
//! Runs a named executable from a fixed directory on a remote host and
//! returns its output. One request and one response per TCP (optionally
//! TLS) connection; message boundaries are marked by half-closing the
//! write side.
//!
//! Layers, leaves first:
//! - [`transport`]: half-close framing with size and time limits
//! - [`protocol`]: JSON request/result codec
//! - [`executor`]: resolves and runs executables from the base directory
//! - [`server`]: sequential accept loop driving an [`Action`]
//! - [`proxy`]: client side of one exchange
//! - [`auth`], [`tls`]: optional shared-secret envelope and TLS

pub mod auth;
pub mod config;
pub mod errors;
pub mod executor;
pub mod logging;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod service;
pub mod tls;
pub mod transport;
pub mod util;

pub use auth::{AuthError, Nonce, SharedSecret};
pub use config::{ConfigError, EnvError, EnvParser, ServerSettings};
pub use errors::{ErrorCategory, ErrorCode, ErrorEntry, HandlerError};
pub use executor::{ExecError, Executor, ExecutorConfig};
pub use logging::{LogConfig, LogFormat, LoggingError, LoggingGuards, init_logging};
pub use protocol::{Command, DecodeError, ExecResult};
pub use proxy::{CommunicationError, Proxy, ProxyError};
pub use server::{Action, FnAction, Server, ServerConfig, ServerError, ServerHandle, ServerState};
pub use service::{Service, ServiceError, WrunService};
pub use tls::{ClientTls, ServerTls, TlsError};
pub use transport::{BUFFER_SIZE, ConnectionLimits, TransportError};
