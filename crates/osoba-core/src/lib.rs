//! Watcher/dispatcher core: ticket and phase model, port traits, the
//! workspace reconciler, phase actions, dispatcher, watcher and cleanup
//! loops. Adapter crates implement the traits in [`ports`] against a real
//! ticket tracker, terminal multiplexer, git checkout, and AI assistant.

pub mod actions;
pub mod dispatcher;
pub mod error;
pub mod phase_state;
pub mod ports;
pub mod reconciler;
pub mod redact;
pub mod sweeper;
pub mod ticket;
pub mod watcher;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::{Error, Result};
