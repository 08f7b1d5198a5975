use std::{array::TryFromSliceError, fmt::Display, string::FromUtf8Error, sync::PoisonError};

use bincode::ErrorKind;
use serde::{de, ser};
use thiserror::Error;

/// Custom Result type for DocDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for DocDB
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A schema version was registered twice
    #[error("schema version {0} is already registered")]
    DuplicateVersion(u32),
    /// Point lookup or delete on an absent primary key
    #[error("no record with key {key} in table {table}")]
    NotFound { table: String, key: String },
    /// Table is not part of the open schema
    #[error("table {0} does not exist")]
    TableNotFound(String),
    /// Stored schema version cannot be reached from the requested target
    #[error("unsupported schema version: stored {stored}, target {target}")]
    UnsupportedVersion { stored: u32, target: u32 },
    /// A migration step failed and was rolled back
    #[error("migration to version {version} failed: {reason}")]
    MigrationFailed { version: u32, reason: String },
    /// A transaction failed and all of its writes were rolled back
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),
    /// Primary key or value type constraint broken
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    /// Malformed table definition or schema configuration
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// Store is not in the Open state
    #[error("database is not open")]
    NotOpen,
    /// MVCC write conflict
    #[error("write conflict, try transaction")]
    WriteConflict,
    /// Internal error (storage, serialization, etc.)
    #[error("internal error {0}")]
    Internal(String),
    /// I/O error from a file-backed engine
    #[error("io error {0}")]
    Io(String),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(value: PoisonError<T>) -> Self {
        Error::Internal(value.to_string())
    }
}

impl From<Box<ErrorKind>> for Error {
    fn from(value: Box<ErrorKind>) -> Self {
        Error::Internal(value.to_string())
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Error::Internal(value.to_string())
    }
}

impl From<FromUtf8Error> for Error {
    fn from(value: FromUtf8Error) -> Self {
        Error::Internal(value.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::InvalidSchema(value.to_string())
    }
}

impl ser::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::Internal(msg.to_string())
    }
}

impl de::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::Internal(msg.to_string())
    }
}
