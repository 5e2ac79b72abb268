//! Library half of the CLI crate, shared with the integration tests.
pub mod watch;
