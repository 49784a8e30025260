//! Error Catalog for wrun
//!
//! Every failure the protocol can report maps to a stable code:
//! - A unique code (WRUN-E001 through WRUN-E599)
//! - A human-readable message
//! - Remediation steps
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                              |
//! |------------|-------------|------------------------------------------|
//! | E001-E099  | Config      | Settings, environment and TLS material   |
//! | E100-E199  | Transport   | Connect, accept, handshake and socket IO |
//! | E200-E299  | Decode      | Malformed request/response payloads      |
//! | E300-E399  | Execution   | Subprocess could not be launched         |
//! | E400-E499  | Security    | Shared-secret verification failures      |
//! | E500-E599  | Internal    | Internal/unexpected errors               |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all wrun error scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// Settings file not found
    ConfigNotFound,
    /// Settings file could not be read
    ConfigReadError,
    /// Settings file contains invalid TOML syntax
    ConfigParseError,
    /// Settings contain invalid values
    ConfigValidationError,
    /// Environment variable has invalid value
    ConfigEnvError,
    /// Certificate or key material is unusable
    ConfigTlsError,
    /// Settings file could not be written
    ConfigWriteError,

    // =========================================================================
    // Transport Errors (E100-E199)
    // =========================================================================
    /// Could not connect to the server
    TransportConnectFailed,
    /// Could not bind the listening socket
    TransportBindFailed,
    /// Socket read/write failed
    TransportIo,
    /// Read or write phase exceeded the IO timeout
    TransportTimeout,
    /// Incoming message exceeded the configured limit
    TransportMessageTooLarge,
    /// Peer closed the connection without sending a message
    TransportEmptyResponse,

    // =========================================================================
    // Decode Errors (E200-E299)
    // =========================================================================
    /// Payload is not valid JSON or has the wrong shape
    DecodeMalformed,
    /// Command array has the wrong number of elements
    DecodeArity,
    /// Payload is not valid UTF-8
    DecodeNotUtf8,
    /// Value could not be serialized
    EncodeFailed,

    // =========================================================================
    // Execution Errors (E300-E399)
    // =========================================================================
    /// Executable name escapes the base directory
    ExecInvalidName,
    /// Executable does not exist in the base directory
    ExecNotFound,
    /// Executable exists but could not be started
    ExecLaunchFailed,
    /// Base directory is missing or not a directory
    ExecBaseDirInvalid,
    /// Communicating with the child process failed
    ExecIo,

    // =========================================================================
    // Security Errors (E400-E499)
    // =========================================================================
    /// Message arrived without a signature
    SecurityMissingSignature,
    /// Message signature does not match
    SecurityBadSignature,
    /// Shared secret is unusable
    SecurityInvalidSecret,
    /// TLS handshake failed
    SecurityTlsHandshake,

    // =========================================================================
    // Internal Errors (E500-E599)
    // =========================================================================
    /// Logging could not be initialized
    InternalLoggingError,
    /// Service driven out of order
    InternalServiceState,
    /// Caller-supplied server action failed
    InternalActionFailed,
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::ConfigNotFound => 1,
            Self::ConfigReadError => 2,
            Self::ConfigParseError => 3,
            Self::ConfigValidationError => 4,
            Self::ConfigEnvError => 5,
            Self::ConfigTlsError => 6,
            Self::ConfigWriteError => 7,

            Self::TransportConnectFailed => 100,
            Self::TransportBindFailed => 101,
            Self::TransportIo => 102,
            Self::TransportTimeout => 103,
            Self::TransportMessageTooLarge => 104,
            Self::TransportEmptyResponse => 105,

            Self::DecodeMalformed => 200,
            Self::DecodeArity => 201,
            Self::DecodeNotUtf8 => 202,
            Self::EncodeFailed => 203,

            Self::ExecInvalidName => 300,
            Self::ExecNotFound => 301,
            Self::ExecLaunchFailed => 302,
            Self::ExecBaseDirInvalid => 303,
            Self::ExecIo => 304,

            Self::SecurityMissingSignature => 400,
            Self::SecurityBadSignature => 401,
            Self::SecurityInvalidSecret => 402,
            Self::SecurityTlsHandshake => 403,

            Self::InternalLoggingError => 500,
            Self::InternalServiceState => 501,
            Self::InternalActionFailed => 502,
        }
    }

    /// Returns the formatted error code string (e.g., "WRUN-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("WRUN-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Transport,
            200..=299 => ErrorCategory::Decode,
            300..=399 => ErrorCategory::Execution,
            400..=499 => ErrorCategory::Security,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigNotFound => "Settings file not found",
            Self::ConfigReadError => "Failed to read settings file",
            Self::ConfigParseError => "Settings file contains invalid TOML syntax",
            Self::ConfigValidationError => "Settings contain invalid values",
            Self::ConfigEnvError => "Environment variable has invalid value",
            Self::ConfigTlsError => "Certificate or private key could not be loaded",
            Self::ConfigWriteError => "Failed to write settings file",

            Self::TransportConnectFailed => "Could not connect to the wrun server",
            Self::TransportBindFailed => "Could not bind the listening socket",
            Self::TransportIo => "Socket read or write failed",
            Self::TransportTimeout => "Connection IO timed out",
            Self::TransportMessageTooLarge => "Incoming message exceeds the size limit",
            Self::TransportEmptyResponse => "Server closed the connection without a response",
            Self::SecurityTlsHandshake => "TLS handshake failed",

            Self::DecodeMalformed => "Message is not a well-formed wrun payload",
            Self::DecodeArity => "Command must have two or three elements",
            Self::DecodeNotUtf8 => "Message is not valid UTF-8",
            Self::EncodeFailed => "Message could not be encoded",

            Self::ExecInvalidName => "Executable name is not confined to the base directory",
            Self::ExecNotFound => "Executable not found in the base directory",
            Self::ExecLaunchFailed => "Executable could not be started",
            Self::ExecBaseDirInvalid => "Executable base directory is invalid",
            Self::ExecIo => "Communication with the child process failed",

            Self::SecurityMissingSignature => "Message is not signed",
            Self::SecurityBadSignature => "Message signature does not match",
            Self::SecurityInvalidSecret => "Shared secret is unusable",

            Self::InternalLoggingError => "Logging could not be initialized",
            Self::InternalServiceState => "Service was run before it was started",
            Self::InternalActionFailed => "Server action failed while handling a request",
        }
    }

    /// Returns remediation steps for this error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigNotFound => &[
                "Check the settings path passed to wrund",
                "Create a settings file with at least executable_path",
            ],
            Self::ConfigReadError => &["Check file permissions on the settings file"],
            Self::ConfigParseError => &[
                "Validate the settings file TOML syntax",
                "Run: wrund check <settings> to see the parse error location",
            ],
            Self::ConfigValidationError => &[
                "Run: wrund check <settings> for details",
                "Ensure executable_path points to an existing directory",
            ],
            Self::ConfigEnvError => &["Fix or unset the offending WRUN_* environment variable"],
            Self::ConfigTlsError => &[
                "Verify the certificate and key files are PEM encoded",
                "Ensure the key matches the certificate",
            ],
            Self::ConfigWriteError => &["Check that the settings directory is writable"],

            Self::TransportConnectFailed => &[
                "Verify the server host and port",
                "Check that wrund is running on the remote machine",
                "Verify firewall rules allow the configured port",
            ],
            Self::TransportBindFailed => &[
                "Check that no other process uses the configured port",
                "Verify the host setting resolves to a local address",
            ],
            Self::TransportIo => &["Check network stability between client and server"],
            Self::TransportTimeout => &[
                "Increase io_timeout in the settings file",
                "Check that the peer half-closes its side after sending",
            ],
            Self::TransportMessageTooLarge => &["Increase max_message_bytes or send less data"],
            Self::TransportEmptyResponse => &[
                "Check the server log for the rejected request",
                "Verify client and server use the same shared secret",
                "Verify the executable exists in the server base directory",
            ],
            Self::SecurityTlsHandshake => &[
                "Verify the client trusts the server CA",
                "Verify client certificates when mutual TLS is enabled",
            ],

            Self::DecodeMalformed => &["Send [executable, [args...], stdin] as JSON"],
            Self::DecodeArity => &["Send [executable, [args...]] or [executable, [args...], stdin]"],
            Self::DecodeNotUtf8 => &["Encode payloads as UTF-8"],
            Self::EncodeFailed => &["Report this as a bug"],

            Self::ExecInvalidName => &["Pass a plain file name relative to the base directory"],
            Self::ExecNotFound => &["Check the executable name and the server executable_path"],
            Self::ExecLaunchFailed => &[
                "Check execute permissions on the executable",
                "Verify the interpreter line of scripts",
            ],
            Self::ExecBaseDirInvalid => &["Ensure executable_path exists and is a directory"],
            Self::ExecIo => &["Check the server log for the child process failure"],

            Self::SecurityMissingSignature | Self::SecurityBadSignature => &[
                "Configure the same shared secret on client and server",
            ],
            Self::SecurityInvalidSecret => &["Use a non-empty shared secret"],

            Self::InternalLoggingError => &[
                "Check that the log directory exists and is writable",
                "Check WRUN_LOG filter syntax",
            ],
            Self::InternalServiceState => &["Call start before run; report this as a bug"],
            Self::InternalActionFailed => &["Check the server log for the action's error message"],
        }
    }

    /// Returns all error codes.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::ConfigNotFound,
            Self::ConfigReadError,
            Self::ConfigParseError,
            Self::ConfigValidationError,
            Self::ConfigEnvError,
            Self::ConfigTlsError,
            Self::ConfigWriteError,
            Self::TransportConnectFailed,
            Self::TransportBindFailed,
            Self::TransportIo,
            Self::TransportTimeout,
            Self::TransportMessageTooLarge,
            Self::TransportEmptyResponse,
            Self::DecodeMalformed,
            Self::DecodeArity,
            Self::DecodeNotUtf8,
            Self::EncodeFailed,
            Self::ExecInvalidName,
            Self::ExecNotFound,
            Self::ExecLaunchFailed,
            Self::ExecBaseDirInvalid,
            Self::ExecIo,
            Self::SecurityMissingSignature,
            Self::SecurityBadSignature,
            Self::SecurityInvalidSecret,
            Self::SecurityTlsHandshake,
            Self::InternalLoggingError,
            Self::InternalServiceState,
            Self::InternalActionFailed,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Settings, environment and TLS material (E001-E099)
    Config,
    /// Connect, accept, handshake and socket IO (E100-E199)
    Transport,
    /// Malformed request/response payloads (E200-E299)
    Decode,
    /// Subprocess could not be launched (E300-E399)
    Execution,
    /// Authentication failures (E400-E499)
    Security,
    /// Internal/unexpected errors (E500-E599)
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable name for the category.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Transport => "Transport",
            Self::Decode => "Decode",
            Self::Execution => "Execution",
            Self::Security => "Security",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "WRUN-E001")
    pub code: String,
    /// Error category
    pub category: ErrorCategory,
    /// Human-readable error message
    pub message: String,
    /// Steps to remediate the error
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("\nRemediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }

    /// Formats the error as a single line.
    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}
