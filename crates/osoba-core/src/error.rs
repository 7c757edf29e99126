//! Error taxonomy for the core (see spec §7).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transient I/O error: {0}")]
    Transient(String),

    #[error("external tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("ticket {0} is already processing")]
    AlreadyProcessing(u64),

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
