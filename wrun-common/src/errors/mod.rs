//! Error catalog and the per-request error type.
//!
//! Each subsystem owns a `thiserror` enum (`TransportError`, `DecodeError`,
//! `ExecError`, `AuthError`, `ConfigError`). Every variant maps onto a stable
//! [`ErrorCode`]; the code's range decides its [`ErrorCategory`].
//!
//! # Error Code Ranges
//!
//! | Range      | Category    |
//! |------------|-------------|
//! | E001-E099  | Config      |
//! | E100-E199  | Transport   |
//! | E200-E299  | Decode      |
//! | E300-E399  | Execution   |
//! | E400-E499  | Security    |
//! | E500-E599  | Internal    |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use crate::auth::AuthError;
use crate::executor::ExecError;
use crate::protocol::DecodeError;

/// Failure of a single request inside the server loop.
///
/// None of these stop the loop: the connection is closed without a
/// response and the server goes back to accepting.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Execution(#[from] ExecError),

    #[error(transparent)]
    Security(#[from] AuthError),

    /// Failure raised by a caller-supplied action.
    #[error("{0}")]
    Action(String),
}

impl HandlerError {
    /// Build an action failure from any displayable error.
    pub fn action(message: impl std::fmt::Display) -> Self {
        Self::Action(message.to_string())
    }

    /// Catalog code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Decode(e) => e.code(),
            Self::Execution(e) => e.code(),
            Self::Security(e) => e.code(),
            Self::Action(_) => ErrorCode::InternalActionFailed,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }
}
