#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;
pub mod logging;

pub use assertions::{assert_contains, assert_not_contains};
pub use fixtures::{SettingsDir, free_port};
pub use logging::init_test_logging;
