//! Errors surfaced to whoever triggered a run.

use std::fmt;
use crate::config::ConfigError;
use crate::sources::SourceError;
use crate::store::StoreError;

//------------ Error ---------------------------------------------------------

/// A fatal error for a run. Per-project fetch and normalization problems
/// never become one of these; they are collected in the update report while
/// the other projects continue.
#[derive(Debug)]
pub enum Error {
    /// The registry could not produce the discovered project set, so there
    /// is nothing to reconcile against.
    Registry(SourceError),

    /// Reading from or writing to the store failed. When this happens
    /// during the persistence call nothing of the run was committed, and
    /// retention must not be attempted.
    Store(StoreError),

    /// Retention failed after the update was committed. Distinct from
    /// [`Error::Store`] because the data is safe and retention can simply
    /// be retried on the next run.
    Retention(StoreError),

    Config(ConfigError),

    Custom(String),
}

impl Error {
    pub fn custom(msg: impl fmt::Display) -> Self {
        Error::Custom(msg.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Registry(e) => write!(f, "project registry error: {}", e),
            Error::Store(e) => write!(f, "store error: {}", e),
            Error::Retention(e) => write!(f, "retention error: {}", e),
            Error::Config(e) => e.fmt(f),
            Error::Custom(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::Store(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}
