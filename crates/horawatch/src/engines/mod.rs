//! Browser engine implementations.

pub mod chromium;
pub mod mock;

pub use chromium::{ChromiumEngine, ChromiumLauncher};
pub use mock::{MockEngine, MockState};
