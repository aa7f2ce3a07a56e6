//! Classification of MongoDB driver failures.

use mongodb::error::{Error, ErrorKind as MongoErrorKind, WriteFailure};

use crudlayer_core::error::{ErrorClassifier, ErrorKind};

/// Maps `mongodb` errors onto [`ErrorKind`].
pub struct MongoErrorClassifier;

impl ErrorClassifier for MongoErrorClassifier {
    type Error = Error;

    fn classify(error: &Self::Error) -> ErrorKind {
        match error.kind.as_ref() {
            MongoErrorKind::Authentication { .. } => ErrorKind::Forbidden,
            MongoErrorKind::Io(_)
            | MongoErrorKind::ServerSelection { .. }
            | MongoErrorKind::ConnectionPoolCleared { .. }
            | MongoErrorKind::DnsResolve { .. } => ErrorKind::Unavailable,
            MongoErrorKind::InvalidArgument { .. } | MongoErrorKind::BsonSerialization(_) => {
                ErrorKind::BadRequest
            }
            MongoErrorKind::Command(command) => classify_code(command.code),
            MongoErrorKind::Write(WriteFailure::WriteError(write)) => classify_code(write.code),
            MongoErrorKind::Write(WriteFailure::WriteConcernError(concern)) => classify_code(concern.code),
            _ => ErrorKind::General,
        }
    }
}

/// Classifies a server error code.
///
/// See <https://www.mongodb.com/docs/manual/reference/error-codes/>.
pub fn classify_code(code: i32) -> ErrorKind {
    match code {
        // Unauthorized, AuthenticationFailed
        13 | 18 => ErrorKind::Forbidden,
        // BadValue, FailedToParse, DocumentValidationFailure, DuplicateKey
        2 | 9 | 121 | 11000 => ErrorKind::BadRequest,
        // HostUnreachable, HostNotFound, NetworkTimeout, ShutdownInProgress,
        // NotWritablePrimary, NotPrimaryNoSecondaryOk
        6 | 7 | 89 | 91 | 10107 | 13435 => ErrorKind::Unavailable,
        _ => ErrorKind::General,
    }
}
