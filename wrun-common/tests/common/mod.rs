#![allow(dead_code)]

pub mod fixtures;
pub mod logging;

pub use fixtures::{TestPki, spawn_server};
#[cfg(unix)]
pub use fixtures::JobDir;
pub use logging::init_test_logging;
