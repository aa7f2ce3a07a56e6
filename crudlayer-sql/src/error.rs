//! Classification of `sqlx` failures.

use crudlayer_core::error::{ErrorClassifier, ErrorKind};

/// Maps SQLite (and SQLSTATE-reporting) driver errors onto [`ErrorKind`].
///
/// Database errors are classified by the driver's constraint kind first, then
/// by SQLite primary result code, then by SQLSTATE class for drivers that
/// report one.
pub struct SqliteErrorClassifier;

impl ErrorClassifier for SqliteErrorClassifier {
    type Error = sqlx::Error;

    fn classify(error: &Self::Error) -> ErrorKind {
        match error {
            sqlx::Error::Database(db) => match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation
                | sqlx::error::ErrorKind::ForeignKeyViolation
                | sqlx::error::ErrorKind::NotNullViolation
                | sqlx::error::ErrorKind::CheckViolation => ErrorKind::BadRequest,
                _ => db.code().map_or(ErrorKind::General, |code| classify_code(&code)),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => ErrorKind::Unavailable,
            sqlx::Error::RowNotFound => ErrorKind::NotFound,
            sqlx::Error::ColumnNotFound(_) | sqlx::Error::Encode(_) => ErrorKind::BadRequest,
            _ => ErrorKind::General,
        }
    }
}

/// Classifies a driver error code: a numeric SQLite result code (possibly
/// extended) or a five-character SQLSTATE.
pub fn classify_code(code: &str) -> ErrorKind {
    // SQLite result codes, extended ones included, never exceed four digits.
    if code.len() == 5 {
        return classify_sqlstate(code);
    }

    match code.parse::<i64>() {
        Ok(numeric) => match numeric & 0xff {
            // CONSTRAINT, MISMATCH, RANGE
            19 | 20 | 25 => ErrorKind::BadRequest,
            // PERM, AUTH
            3 | 23 => ErrorKind::Forbidden,
            // BUSY, LOCKED, IOERR, FULL, CANTOPEN
            5 | 6 | 10 | 13 | 14 => ErrorKind::Unavailable,
            _ => ErrorKind::General,
        },
        Err(_) => ErrorKind::General,
    }
}

fn classify_sqlstate(code: &str) -> ErrorKind {
    match code.get(..2) {
        Some("02") => ErrorKind::NotFound,
        Some("28") => ErrorKind::Forbidden,
        Some("08" | "0A" | "0K") => ErrorKind::Unavailable,
        Some("20" | "21" | "22" | "23" | "24" | "25" | "40" | "42" | "70") => ErrorKind::BadRequest,
        _ => ErrorKind::General,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_codes() {
        assert_eq!(classify_code("2067"), ErrorKind::BadRequest);
        assert_eq!(classify_code("19"), ErrorKind::BadRequest);
        assert_eq!(classify_code("5"), ErrorKind::Unavailable);
        assert_eq!(classify_code("23"), ErrorKind::Forbidden);
        assert_eq!(classify_code("1"), ErrorKind::General);
    }

    #[test]
    fn sqlstate_classes() {
        assert_eq!(classify_code("23505"), ErrorKind::BadRequest);
        assert_eq!(classify_code("28P01"), ErrorKind::Forbidden);
        assert_eq!(classify_code("08006"), ErrorKind::Unavailable);
        assert_eq!(classify_code("02000"), ErrorKind::NotFound);
        assert_eq!(classify_code("XX000"), ErrorKind::General);
    }

    #[test]
    fn driver_errors() {
        assert_eq!(SqliteErrorClassifier::classify(&sqlx::Error::PoolTimedOut), ErrorKind::Unavailable);
        assert_eq!(SqliteErrorClassifier::classify(&sqlx::Error::RowNotFound), ErrorKind::NotFound);
        assert_eq!(
            SqliteErrorClassifier::classify(&sqlx::Error::Protocol("bad frame".into())),
            ErrorKind::General
        );
    }
}
