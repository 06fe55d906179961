//! Database query modules

pub mod jobs;
pub mod workflows;

use wfxrs_core::Error;

/// Map a sqlx failure to a storage error, keeping constraint violations
/// distinguishable for callers that translate them
pub(crate) fn storage_error(context: &str, err: sqlx::Error) -> Error {
    Error::Storage(format!("{}: {}", context, err))
}

/// True if the error is a UNIQUE constraint violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// True if the error is a FOREIGN KEY constraint violation
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}
