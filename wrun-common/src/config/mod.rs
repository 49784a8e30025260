//! Configuration for wrun.
//!
//! - `settings`: the server settings file (TOML) and its validation
//! - `env`: type-safe `WRUN_*` environment overrides with source tracking

pub mod env;
pub mod settings;

pub use env::{ConfigSource, EnvError, EnvParser, Sourced, expand_tilde};
pub use settings::{
    ConfigError, DEFAULT_HOST, DEFAULT_PORT, LogSettings, ServerSettings, TlsSettings,
};
