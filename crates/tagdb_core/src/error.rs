//! Error types for TagDB core.

use crate::entity::TagKind;
use tagdb_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in TagDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A document with this key already exists.
    #[error("key already exists: {key}")]
    KeyAlreadyExists {
        /// The duplicate key.
        key: String,
    },

    /// No document is stored under this key.
    #[error("document not found: {key}")]
    DocumentNotFound {
        /// The key that was looked up.
        key: String,
    },

    /// The key cannot be stored.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Why the key was rejected.
        message: String,
    },

    /// A value cannot be used as a tag.
    #[error("invalid tag type: {message}")]
    InvalidTagType {
        /// Description of the rejected value.
        message: String,
    },

    /// A tag name is already bound to a value of another type.
    #[error("conflicting tag type for {name}: bound as {existing}, got {requested}")]
    ConflictingTagType {
        /// The tag name.
        name: String,
        /// Type currently bound to the name.
        existing: TagKind,
        /// Type that was assigned.
        requested: TagKind,
    },

    /// A tag name cannot be written to the log.
    #[error("invalid tag name: {name:?}")]
    InvalidTagName {
        /// The rejected name.
        name: String,
    },

    /// A log record does not follow the command grammar.
    #[error("invalid command at line {line}, offset {offset}: {message}")]
    CommandInvalid {
        /// Description of the problem.
        message: String,
        /// Protocol line where the problem was found (1-based).
        line: u64,
        /// Byte offset where the offending element starts.
        offset: u64,
    },

    /// The log ends in the middle of a record.
    #[error("unexpected EOF at offset {offset}")]
    UnexpectedEof {
        /// Offset of the incomplete element.
        offset: u64,
    },

    /// Reading the log failed.
    #[error("source file read failed: {0}")]
    SourceFileReadFailed(#[source] StorageError),

    /// Appending to the log failed. Any partial record was removed.
    #[error("database file write failed: {0}")]
    DbFileWriteFailed(#[source] StorageError),

    /// Storage backend error outside of reads and appends.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Operation not permitted in the current configuration or state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// An internal invariant does not hold.
    #[error("invariant violated: {message}")]
    InvariantViolated {
        /// Description of the broken invariant.
        message: String,
    },
}

impl CoreError {
    /// Creates a key-already-exists error.
    pub fn key_already_exists(key: impl Into<String>) -> Self {
        Self::KeyAlreadyExists { key: key.into() }
    }

    /// Creates a document-not-found error.
    pub fn document_not_found(key: impl Into<String>) -> Self {
        Self::DocumentNotFound { key: key.into() }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates an invalid tag type error.
    pub fn invalid_tag_type(message: impl Into<String>) -> Self {
        Self::InvalidTagType {
            message: message.into(),
        }
    }

    /// Creates a command-invalid error with its location in the log.
    pub fn command_invalid(message: impl Into<String>, line: u64, offset: u64) -> Self {
        Self::CommandInvalid {
            message: message.into(),
            line,
            offset,
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolated {
            message: message.into(),
        }
    }

    /// Returns true for internal invariant violations, as opposed to errors
    /// caused by the caller or by the log content.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolated { .. })
    }
}
