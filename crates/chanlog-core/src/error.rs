//! Error types for the pure parts of the pipeline.

use thiserror::Error;

/// A log line or feed record that does not match the expected grammar.
///
/// Never retried. The caller decides whether to skip or abort.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line does not match the log grammar: {0:?}")]
    NoMatch(String),

    #[error("invalid time of day {0:?}")]
    InvalidTime(String),

    #[error("invalid log file name {0:?}: expected <channel>.<YYYY-MM-DD>")]
    FileName(String),

    #[error("malformed bulk payload at line {line}: {reason}")]
    Bulk { line: usize, reason: String },

    #[error("malformed feed record: {0}")]
    Feed(String),
}

/// A search request that cannot be turned into a backend query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("none of the selected channels are searchable: {0:?}")]
    NoAllowedChannels(Vec<String>),

    #[error("the {field} filter contains nothing searchable: {value:?}")]
    UnsearchableText { field: String, value: String },

    #[error("the search backend rejected the query: {0}")]
    Rejected(String),
}

/// Failure talking to a search backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("search backend unavailable: {0}")]
    Unavailable(String),

    #[error("search backend rejected the request: {0}")]
    Rejected(String),

    #[error("search backend did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("unexpected search backend response: {0}")]
    Malformed(String),
}
