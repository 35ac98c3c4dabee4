use std::{fmt, io};

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

#[cfg(feature = "service")]
use sqlx::Error as SqlxError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum LineageError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Error connecting to database: {0}")]
    Connection(String),
    #[error("Inference error: {0}")]
    Inference(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Error in model: {0}")]
    Model(String),
    #[error("No metadata found for file: {0}")]
    NoMetadata(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Error fetching file structure: {0}")]
    Query(String),
    #[error("Render error: {0}")]
    Render(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl LineageError {
    /// Process exit code reported by the CLI for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            LineageError::Config(_) => 78,
            LineageError::Connection(_) => 69,
            LineageError::NoMetadata(_) | LineageError::NotFound(_) => 66,
            LineageError::Model(_) | LineageError::Inference(_) => 65,
            LineageError::Io(_) | LineageError::Render(_) => 74,
            LineageError::Query(_) | LineageError::Serialization(_) => 1,
        }
    }
}

impl From<toml::de::Error> for LineageError {
    fn from(src: toml::de::Error) -> LineageError {
        LineageError::Config(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for LineageError {
    fn from(src: toml::ser::Error) -> LineageError {
        LineageError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for LineageError {
    fn from(src: JsonError) -> LineageError {
        LineageError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for LineageError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => LineageError::NotFound(format!("{x}")),
            _ => LineageError::Io(format!("IOError: {x}")),
        }
    }
}

impl From<fmt::Error> for LineageError {
    fn from(x: fmt::Error) -> Self {
        LineageError::Render(format!("{x}"))
    }
}

/// Query-time failures. Connection failures are mapped explicitly at the call sites that
/// open the pool, since sqlx reports both through the same error type.
#[cfg(feature = "service")]
impl From<SqlxError> for LineageError {
    fn from(db_error: SqlxError) -> Self {
        match db_error {
            SqlxError::Configuration(e) => LineageError::Connection(format!("{e}")),
            SqlxError::Io(e) => LineageError::Connection(format!("{e}")),
            SqlxError::Tls(e) => LineageError::Connection(format!("{e}")),
            SqlxError::PoolTimedOut => LineageError::Connection("pool timed out".to_string()),
            SqlxError::PoolClosed => LineageError::Connection("pool closed".to_string()),
            other => LineageError::Query(format!("{other}")),
        }
    }
}
