use tantivy::TantivyError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Systemic failures. Per-query and per-candidate failures are collected as
/// [`QueryError`] and [`MatchError`] values instead of being returned through
/// this type, so one bad stored query never aborts a batch or a match run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("index error: {0}")]
    Index(#[from] TantivyError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A per-query failure recorded while updating the monitor.
#[derive(Debug, Clone, Error)]
#[error("query \"{id}\" ({query}): {message}")]
pub struct QueryError {
    pub id: String,
    pub query: String,
    pub message: String,
}

impl QueryError {
    pub fn new(id: &str, query: &str, error: &Error) -> Self {
        Self {
            id: id.to_string(),
            query: query.to_string(),
            message: error.to_string(),
        }
    }
}

/// A per-candidate failure recorded during a match run.
#[derive(Debug, Clone, Error)]
#[error("query \"{query_id}\" failed to match: {message}")]
pub struct MatchError {
    pub query_id: String,
    pub message: String,
}

impl MatchError {
    pub fn new(query_id: &str, error: &TantivyError) -> Self {
        Self {
            query_id: query_id.to_string(),
            message: error.to_string(),
        }
    }
}
