//! Wire codec for wrun requests and results.
//!
//! A request is the compact JSON array `[executable, [args...], stdin]`.
//! The two-element form `[executable, [args...]]` is still accepted on
//! decode and means an empty stdin. A result is a JSON object with
//! `stdout`, `returncode` and, when the server captures it, `stderr`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::errors::ErrorCode;

/// Failure to turn bytes into a request or result.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Command array had neither two nor three elements.
    #[error("command must have 2 or 3 elements, got {0}")]
    Arity(usize),

    #[error("failed to encode payload: {0}")]
    Encode(serde_json::Error),
}

impl DecodeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotUtf8(_) => ErrorCode::DecodeNotUtf8,
            Self::Malformed(_) => ErrorCode::DecodeMalformed,
            Self::Arity(_) => ErrorCode::DecodeArity,
            Self::Encode(_) => ErrorCode::EncodeFailed,
        }
    }
}

/// A request to run one executable from the server's base directory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    /// File name relative to the base directory.
    pub executable: String,
    /// Arguments appended after the executable, in order.
    pub arguments: Vec<String>,
    /// Standard input payload; empty means no input.
    pub stdin: String,
}

impl Command {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }

    /// Encode as the canonical three-element array.
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        serde_json::to_vec(&(&self.executable, &self.arguments, &self.stdin))
            .map_err(DecodeError::Encode)
    }

    /// Decode either the two- or three-element array form.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(bytes)?;
        let mut items: Vec<Value> = serde_json::from_str(text)?;
        let stdin = match items.len() {
            2 => String::new(),
            3 => match items.pop() {
                Some(value) => serde_json::from_value(value)?,
                None => String::new(),
            },
            n => return Err(DecodeError::Arity(n)),
        };
        let mut items = items.into_iter();
        let executable: String = serde_json::from_value(items.next().unwrap_or(Value::Null))?;
        let arguments: Vec<String> = serde_json::from_value(items.next().unwrap_or(Value::Null))?;

        Ok(Self {
            executable,
            arguments,
            stdin,
        })
    }
}

/// Outcome of one remote execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    /// Present only when the server captures standard error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    pub returncode: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.returncode == 0
    }

    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        serde_json::to_vec(self).map_err(DecodeError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(bytes)?;
        Ok(serde_json::from_str(text)?)
    }
}
