//! Server settings file.
//!
//! ```toml
//! executable_path = "C:/jobs"
//! host = "localhost"
//! port = 3333
//! capture_stderr = false
//! shared_secret = "..."
//! io_timeout = "60s"
//! max_message_bytes = 16777216
//!
//! [tls]
//! cert_file = "server.crt"
//! key_file = "server.key"
//! client_ca_file = "clients.pem"
//!
//! [log]
//! level = "info"
//! path = "wrund.log"
//! format = "pretty"
//! ```
//!
//! Relative paths in a loaded file are resolved against the file's directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::env::{EnvError, EnvParser, parse_log_level};
use crate::auth::{AuthError, SharedSecret};
use crate::errors::ErrorCode;
use crate::executor::ExecutorConfig;
use crate::logging::{LogConfig, LogFormat};
use crate::server::ServerConfig;
use crate::tls::{ServerTls, TlsError};
use crate::transport::{ConnectionLimits, DEFAULT_IO_TIMEOUT, DEFAULT_MAX_MESSAGE_BYTES};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3333;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid settings: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("invalid environment: {}", join_env_errors(.0))]
    Env(Vec<EnvError>),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("invalid shared secret: {0}")]
    Secret(#[from] AuthError),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

fn join_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::ConfigNotFound,
            Self::Read { .. } => ErrorCode::ConfigReadError,
            Self::Parse(_) => ErrorCode::ConfigParseError,
            Self::Validation(_) => ErrorCode::ConfigValidationError,
            Self::Env(_) => ErrorCode::ConfigEnvError,
            Self::Tls(_) => ErrorCode::ConfigTlsError,
            Self::Secret(e) => e.code(),
            Self::Write { .. } | Self::Serialize(_) => ErrorCode::ConfigWriteError,
        }
    }
}

/// `[tls]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSettings {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// Require client certificates signed by this CA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ca_file: Option<PathBuf>,
}

/// `[log]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            path: None,
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Directory holding the executables callers may run.
    pub executable_path: PathBuf,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub capture_stderr: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_secret: Option<String>,
    #[serde(default = "default_io_timeout", with = "humantime_duration")]
    pub io_timeout: Duration,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSettings>,
    #[serde(default)]
    pub log: LogSettings,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_io_timeout() -> Duration {
    DEFAULT_IO_TIMEOUT
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

fn default_log_level() -> String {
    "info".to_string()
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(de::Error::custom)
    }
}

impl ServerSettings {
    pub fn new(executable_path: impl Into<PathBuf>) -> Self {
        Self {
            executable_path: executable_path.into(),
            host: default_host(),
            port: default_port(),
            capture_stderr: false,
            shared_secret: None,
            io_timeout: default_io_timeout(),
            max_message_bytes: default_max_message_bytes(),
            tls: None,
            log: LogSettings::default(),
        }
    }

    /// Read and parse a settings file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::from_toml_str(&text)?;
        if let Some(dir) = path.parent() {
            settings.resolve_relative_to(dir);
        }
        debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the settings as TOML, creating parent directories.
    pub fn store(&self, path: &Path) -> Result<(), ConfigError> {
        let text = self.to_toml_string()?;
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(write_error)?;
        }
        std::fs::write(path, text).map_err(write_error)
    }

    fn resolve_relative_to(&mut self, dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        resolve(&mut self.executable_path);
        if let Some(tls) = &mut self.tls {
            resolve(&mut tls.cert_file);
            resolve(&mut tls.key_file);
            if let Some(ca) = &mut tls.client_ca_file {
                resolve(ca);
            }
        }
        if let Some(log_path) = &mut self.log.path {
            resolve(log_path);
        }
    }

    /// Apply `WRUN_*` overrides; all bad variables are reported together.
    pub fn apply_env(&mut self, env: &mut EnvParser) -> Result<(), ConfigError> {
        self.host = env.get_string("HOST", &self.host).value;
        self.port = env.get_u16_range("PORT", self.port, 1, u16::MAX).value;
        self.executable_path = env.get_path("EXECUTABLE_PATH", &self.executable_path).value;
        self.capture_stderr = env.get_bool("CAPTURE_STDERR", self.capture_stderr).value;
        self.shared_secret = env
            .get_optional_string("SHARED_SECRET", self.shared_secret.as_deref())
            .value;
        self.io_timeout = env.get_duration("IO_TIMEOUT", self.io_timeout).value;
        self.log.level = env.get_log_level("LOG_LEVEL", &self.log.level).value;

        if env.has_errors() {
            return Err(ConfigError::Env(env.take_errors()));
        }
        Ok(())
    }

    /// Check every field and report all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();

        if !self.executable_path.is_dir() {
            issues.push(format!(
                "executable_path {} is not a directory",
                self.executable_path.display()
            ));
        }
        if self.host.trim().is_empty() {
            issues.push("host must not be empty".to_string());
        }
        if self.port == 0 {
            issues.push("port must be between 1 and 65535".to_string());
        }
        if self.io_timeout.is_zero() {
            issues.push("io_timeout must be greater than zero".to_string());
        }
        if self.max_message_bytes == 0 {
            issues.push("max_message_bytes must be greater than zero".to_string());
        }
        if self.shared_secret.as_deref().is_some_and(str::is_empty) {
            issues.push("shared_secret must not be empty".to_string());
        }
        if let Some(tls) = &self.tls {
            let files = [
                Some(("tls.cert_file", &tls.cert_file)),
                Some(("tls.key_file", &tls.key_file)),
                tls.client_ca_file.as_ref().map(|p| ("tls.client_ca_file", p)),
            ];
            for (name, path) in files.into_iter().flatten() {
                if !path.is_file() {
                    issues.push(format!("{name} {} does not exist", path.display()));
                }
            }
        }
        if parse_log_level(&self.log.level).is_none() {
            issues.push(format!("log.level '{}' is not a valid level", self.log.level));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(issues))
        }
    }

    /// `host:port`, bracketing bare IPv6 hosts.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn limits(&self) -> ConnectionLimits {
        ConnectionLimits::default()
            .with_io_timeout(self.io_timeout)
            .with_max_message_bytes(self.max_message_bytes)
    }

    /// Build the core server configuration, loading TLS material.
    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let mut config = ServerConfig::new(self.bind_addr()).with_limits(self.limits());
        if let Some(secret) = &self.shared_secret {
            config = config.with_secret(SharedSecret::new(secret)?);
        }
        if let Some(tls) = &self.tls {
            config = config.with_tls(ServerTls::from_files(
                &tls.cert_file,
                &tls.key_file,
                tls.client_ca_file.as_deref(),
            )?);
        }
        Ok(config)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::new(&self.executable_path).with_capture_stderr(self.capture_stderr)
    }

    pub fn log_config(&self) -> LogConfig {
        let config = LogConfig::default()
            .with_level(&self.log.level)
            .with_format(self.log.format);
        match &self.log.path {
            Some(path) => config.with_file(path),
            None => config,
        }
    }

    /// Copy with the shared secret masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.shared_secret.is_some() {
            copy.shared_secret = Some("***".to_string());
        }
        copy
    }
}
