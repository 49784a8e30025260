#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;
pub mod logging;

pub use assertions::assert_contains;
pub use fixtures::{FakeRemote, fake_remote};
pub use logging::init_test_logging;
