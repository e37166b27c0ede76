//! Error types for the I/O-facing components.
//!
//! Grammar, query, and backend errors live in `chanlog_core::error`; the
//! ones here belong to the log writer, the indexer, configuration, and the
//! search facade.

use std::path::PathBuf;

use chanlog_core::{BackendError, QueryError};
use thiserror::Error;

/// Filesystem failure while appending to or rotating a channel log.
///
/// Always fatal for the write that hit it: the plaintext log is the
/// durability floor, so this is propagated and never swallowed.
#[derive(Debug, Error)]
pub enum LogWriteError {
    #[error("cannot create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot append to log file {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A bulk submission the backend did not accept.
#[derive(Debug, Error)]
pub enum IndexSubmissionError {
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Invalid configuration, detected at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("channel allow-list is empty")]
    NoChannels,

    #[error("channel {0:?} is empty once its prefix is removed")]
    EmptyChannel(String),

    #[error("channel {0:?} cannot be used as a directory name")]
    UnsafeChannel(String),

    #[error("channel {0:?} is not in the allow-list")]
    ChannelNotAllowed(String),
}

/// Failure of one search request.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The request itself is at fault; shown to the user.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The backend could not answer.
    #[error(transparent)]
    Backend(BackendError),
}

impl From<BackendError> for SearchError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Rejected(reason) => SearchError::Query(QueryError::Rejected(reason)),
            other => SearchError::Backend(other),
        }
    }
}
