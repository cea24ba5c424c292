use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

use crate::error::CoreError;

/// Result envelope handed across the C ABI as a JSON string.
#[derive(Debug, Serialize, Deserialize)]
pub enum AppResponse {
    DatabaseError(String),
    SerializationError(String),
    NotFound(String),
    ValidationError(String),
    BadRequest(String),
    Ok(String),
}

impl Display for AppResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppResponse::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppResponse::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppResponse::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppResponse::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppResponse::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            AppResponse::Ok(msg) => write!(f, "Ok: {}", msg),
        }
    }
}

impl From<CoreError> for AppResponse {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Lmdb(lmdb::Error::NotFound) =>
                AppResponse::NotFound("Key not found".to_string()),
            CoreError::Lmdb(e) =>
                AppResponse::DatabaseError(format!("LMDB error: {}", e)),
            CoreError::Storage(msg) =>
                AppResponse::DatabaseError(msg),
            CoreError::Io(e) =>
                AppResponse::DatabaseError(format!("IO error: {}", e)),
            CoreError::Serialization(e) =>
                AppResponse::SerializationError(format!("JSON serialization error: {}", e)),
            CoreError::UnknownHandler(name) =>
                AppResponse::NotFound(format!("Handler '{}' is not registered", name)),
            CoreError::InvalidHandler(msg) | CoreError::Config(msg) =>
                AppResponse::ValidationError(msg),
            CoreError::Transport(msg) =>
                AppResponse::BadRequest(format!("Transport error: {}", msg)),
        }
    }
}

impl From<SerdeError> for AppResponse {
    fn from(err: SerdeError) -> Self {
        AppResponse::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl AppResponse {
    pub fn success(msg: impl Into<String>) -> Self {
        AppResponse::Ok(msg.into())
    }
}
