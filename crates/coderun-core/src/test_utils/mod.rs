//! Test doubles shared by the unit tests of this crate.

pub mod mock_runtime;

pub use mock_runtime::{MockBehavior, MockRuntime};
