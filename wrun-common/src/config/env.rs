//! Environment variable parsing with type safety.
//!
//! Provides a type-safe parser for `WRUN_*` environment variables with
//! validation, error collection, and source tracking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::errors::ErrorCode;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Invalid duration format.
    #[error("Invalid duration for {var}: {value}")]
    InvalidDuration { var: String, value: String },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

impl EnvError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::ConfigEnvError
    }
}

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in default or the settings file.
    Default,
    /// A `WRUN_*` environment variable.
    Environment,
}

/// A value together with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Variable name when the value came from the environment.
    pub var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            var: None,
        }
    }

    pub fn from_env(value: T, var: String) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            var: Some(var),
        }
    }

    pub fn is_from_env(&self) -> bool {
        self.source == ConfigSource::Environment
    }
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Type-safe environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
pub struct EnvParser {
    prefix: &'static str,
    lookup: Lookup,
    errors: Vec<EnvError>,
    overrides: Vec<String>,
}

impl EnvParser {
    /// Create a new parser over the process environment with the WRUN_ prefix.
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    /// Create a parser that reads variables through `lookup`.
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            prefix: "WRUN_",
            lookup: Box::new(lookup),
            errors: Vec::new(),
            overrides: Vec::new(),
        }
    }

    /// Create a parser over a fixed set of variables.
    pub fn from_map(vars: HashMap<String, String>) -> Self {
        Self::with_lookup(move |name| vars.get(name).cloned())
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Names of the variables that supplied a value so far.
    pub fn overrides(&self) -> &[String] {
        &self.overrides
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn read(&mut self, name: &str) -> (String, Option<String>) {
        let var_name = self.var_name(name);
        let value = (self.lookup)(&var_name);
        if value.is_some() {
            self.overrides.push(var_name.clone());
        }
        (var_name, value)
    }

    /// Get a string value with default.
    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        match self.read(name) {
            (var_name, Some(value)) => Sourced::from_env(value, var_name),
            (_, None) => Sourced::default_value(default.to_string()),
        }
    }

    /// Get an optional string (None if set to the empty string).
    pub fn get_optional_string(
        &mut self,
        name: &str,
        default: Option<&str>,
    ) -> Sourced<Option<String>> {
        match self.read(name) {
            (var_name, Some(value)) if value.is_empty() => Sourced::from_env(None, var_name),
            (var_name, Some(value)) => Sourced::from_env(Some(value), var_name),
            (_, None) => Sourced::default_value(default.map(str::to_string)),
        }
    }

    /// Get a boolean value with default.
    ///
    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off, "" (for false)
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let (var_name, value) = self.read(name);
        let Some(value) = value else {
            return Sourced::default_value(default);
        };
        match parse_bool(&value) {
            Some(parsed) => Sourced::from_env(parsed, var_name),
            None => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }

    /// Get a u16 value with default and range validation.
    pub fn get_u16_range(&mut self, name: &str, default: u16, min: u16, max: u16) -> Sourced<u16> {
        let (var_name, value) = self.read(name);
        let Some(value) = value else {
            return Sourced::default_value(default);
        };
        match value.trim().parse::<u16>() {
            Ok(n) if n >= min && n <= max => Sourced::from_env(n, var_name),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var_name,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                Sourced::default_value(default)
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "unsigned 16-bit integer".to_string(),
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }

    /// Get a human-friendly duration such as `60s` or `2m 30s`.
    pub fn get_duration(&mut self, name: &str, default: Duration) -> Sourced<Duration> {
        let (var_name, value) = self.read(name);
        let Some(value) = value else {
            return Sourced::default_value(default);
        };
        match humantime::parse_duration(value.trim()) {
            Ok(d) if !d.is_zero() => Sourced::from_env(d, var_name),
            _ => {
                self.errors.push(EnvError::InvalidDuration {
                    var: var_name,
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }

    /// Get a path value with ~ expansion.
    pub fn get_path(&mut self, name: &str, default: &Path) -> Sourced<PathBuf> {
        match self.read(name) {
            (var_name, Some(value)) => Sourced::from_env(expand_tilde(&value), var_name),
            (_, None) => Sourced::default_value(default.to_path_buf()),
        }
    }

    /// Get a log level value with validation.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let (var_name, value) = self.read(name);
        let Some(value) = value else {
            return Sourced::default_value(default.to_string());
        };
        match parse_log_level(&value) {
            Some(level) => Sourced::from_env(level, var_name),
            None => {
                self.errors.push(EnvError::InvalidLogLevel {
                    var: var_name,
                    value,
                });
                Sourced::default_value(default.to_string())
            }
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_log_level(value: &str) -> Option<String> {
    let lower = value.trim().to_lowercase();
    match lower.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" | "off" => Some(lower),
        _ => None,
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(value: &str) -> PathBuf {
    if let Some(stripped) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(value)
}
