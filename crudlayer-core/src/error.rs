//! Error types and result types for adapter operations.
//!
//! Every fallible operation in the workspace returns [`AdapterResult<T>`]. Backend
//! failures are not passed through raw: each backend ships an [`ErrorClassifier`]
//! that maps its native error onto the shared [`ErrorKind`] taxonomy and wraps the
//! original error as the cause of an [`AdapterError::Backend`].

use std::{error::Error as StdError, fmt};

use bson::error::Error as BsonError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Boxed native error carried as the cause of a translated backend failure.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The stable error taxonomy shared by all backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A single-record operation matched no record.
    NotFound,
    /// The caller supplied an invalid request, or the backend rejected the data.
    BadRequest,
    /// The backend refused the operation for permission reasons.
    Forbidden,
    /// The backend could not be reached or is temporarily unable to serve.
    Unavailable,
    /// Anything that could not be classified.
    General,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::BadRequest => "bad request",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::General => "general error",
        })
    }
}

/// Represents all possible errors that can occur when running an adapter operation.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// A single-record operation matched zero records, or the `id` argument
    /// conflicts with an identifier constraint in the query.
    #[error("Not found: {0}")]
    NotFound(String),
    /// A usage error: malformed query, unknown operator, unsupported payload shape.
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// The operation was refused.
    #[error("Forbidden: {0}")]
    Forbidden(String),
    /// The backend is unreachable.
    #[error("Unavailable: {0}")]
    Unavailable(String),
    /// Serialization/deserialization error when converting between BSON and JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during backend initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A native backend failure, classified into the shared taxonomy.
    #[error("Backend error ({kind}): {message}")]
    Backend {
        /// The classification of the native error.
        kind: ErrorKind,
        /// Rendered message of the native error.
        message: String,
        /// The native error itself.
        #[source]
        cause: BoxError,
    },
}

impl AdapterError {
    /// Wraps a native backend error under the given classification.
    pub fn backend<E>(kind: ErrorKind, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        AdapterError::Backend {
            kind,
            message: cause.to_string(),
            cause: Box::new(cause),
        }
    }

    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::NotFound(_) => ErrorKind::NotFound,
            AdapterError::BadRequest(_) => ErrorKind::BadRequest,
            AdapterError::Forbidden(_) => ErrorKind::Forbidden,
            AdapterError::Unavailable(_) => ErrorKind::Unavailable,
            AdapterError::Serialization(_) => ErrorKind::BadRequest,
            AdapterError::Initialization(_) => ErrorKind::Unavailable,
            AdapterError::Backend { kind, .. } => *kind,
        }
    }

    /// Returns the native error that caused a [`AdapterError::Backend`], if any.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            AdapterError::Backend { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_bad_request(&self) -> bool {
        self.kind() == ErrorKind::BadRequest
    }
}

/// A specialized `Result` type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Maps a backend's native error type onto the shared [`ErrorKind`] taxonomy.
///
/// Backends implement this once and route every native failure through
/// [`ErrorClassifier::translate`], so callers only ever see [`AdapterError`].
///
/// # Example
///
/// ```ignore
/// struct IoClassifier;
///
/// impl ErrorClassifier for IoClassifier {
///     type Error = std::io::Error;
///
///     fn classify(error: &Self::Error) -> ErrorKind {
///         match error.kind() {
///             std::io::ErrorKind::PermissionDenied => ErrorKind::Forbidden,
///             _ => ErrorKind::Unavailable,
///         }
///     }
/// }
/// ```
pub trait ErrorClassifier {
    /// The native error type produced by the backend driver.
    type Error: StdError + Send + Sync + 'static;

    /// Classifies a native error.
    fn classify(error: &Self::Error) -> ErrorKind;

    /// Classifies and wraps a native error.
    fn translate(error: Self::Error) -> AdapterError {
        let kind = Self::classify(&error);

        tracing::warn!(%kind, error = %error, "backend operation failed");

        AdapterError::backend(kind, error)
    }
}

impl From<BsonError> for AdapterError {
    fn from(err: BsonError) -> Self {
        AdapterError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for AdapterError {
    fn from(err: SerdeJsonError) -> Self {
        AdapterError::Serialization(err.to_string())
    }
}
