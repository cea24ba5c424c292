use thiserror::Error;

/// Errors raised by the runtime core.
///
/// Transport and service failures of a webservice call are *not* errors here: they are
/// routed to the call's failure handler and reported through [`crate::invoker::CallOutcome`].
/// `CoreError` covers what the caller has to fix: storage faults, malformed
/// configuration, and handlers that were never registered.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("lmdb error: {0}")]
    Lmdb(#[from] lmdb::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unknown handler: {0}")]
    UnknownHandler(String),
    #[error("invalid handler: {0}")]
    InvalidHandler(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
